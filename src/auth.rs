//! Authentication against the backend: sessions, sign-up form checks and
//! OAuth redirects.
//!
//! The backend keeps the real session in an HTTP-only cookie. The
//! `access_token` returned by login is cached as a bearer fallback for
//! clients that cannot keep cookies, such as the CLI between runs.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

use crate::client::AuthBackend;
use crate::error::{Error, Result};

/// User record as returned by `/api/auth/me`
///
/// Fields this crate does not know about are kept in `extra` so nothing the
/// backend sends is lost.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    #[serde(default)]
    pub id: Value,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Response of `/api/auth/login`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LoginResponse {
    #[serde(default)]
    pub access_token: Option<String>,
}

/// Body of `/api/auth/register`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
    pub name: String,
}

/// Supported OAuth providers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OAuthProvider {
    Google,
    Github,
}

impl OAuthProvider {
    pub fn as_str(self) -> &'static str {
        match self {
            OAuthProvider::Google => "google",
            OAuthProvider::Github => "github",
        }
    }
}

impl FromStr for OAuthProvider {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "google" => Ok(OAuthProvider::Google),
            "github" => Ok(OAuthProvider::Github),
            other => Err(Error::InvalidForm(format!(
                "Unsupported login provider: {}",
                other
            ))),
        }
    }
}

impl fmt::Display for OAuthProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Rejects anything without an `@`
pub fn validate_email(email: &str) -> Result<()> {
    let email = email.trim();
    if email.is_empty() || !email.contains('@') {
        return Err(Error::InvalidForm(
            "Please enter a valid email address".to_string(),
        ));
    }
    Ok(())
}

/// The sign-up form as the user filled it in
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct SignupForm {
    #[serde(default)]
    pub name: String,
    pub email: String,
    pub password: String,
    #[serde(default, alias = "confirmPassword")]
    pub confirm_password: String,
    #[serde(default)]
    pub terms: bool,
}

impl SignupForm {
    /// Checks the form locally, before anything is sent.
    ///
    /// # Returns
    /// * The register request to send on success
    ///
    /// # Errors
    /// * `Error::InvalidForm` with the message to show next to the form
    pub fn validate(&self) -> Result<RegisterRequest> {
        if self.name.trim().is_empty() {
            return Err(Error::InvalidForm("Please enter your name".to_string()));
        }
        validate_email(&self.email)?;
        if self.password.is_empty() {
            return Err(Error::InvalidForm("Please enter a password".to_string()));
        }
        if self.password != self.confirm_password {
            return Err(Error::InvalidForm("Passwords do not match".to_string()));
        }
        if !self.terms {
            return Err(Error::InvalidForm(
                "Please agree to the Terms of Service and Privacy Policy".to_string(),
            ));
        }

        Ok(RegisterRequest {
            email: self.email.trim().to_string(),
            password: self.password.clone(),
            name: self.name.trim().to_string(),
        })
    }
}

/// Who is logged in, and the bearer token fallback
#[derive(Debug, Clone, Default)]
pub struct AuthSession {
    user: Option<User>,
    token: Option<String>,
}

impl AuthSession {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts from a token saved by an earlier run
    pub fn with_token<B: AuthBackend + ?Sized>(backend: &B, token: Option<String>) -> Self {
        backend.set_token(token.clone());
        Self { user: None, token }
    }

    pub fn user(&self) -> Option<&User> {
        self.user.as_ref()
    }

    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    pub fn is_authenticated(&self) -> bool {
        self.user.is_some()
    }

    /// Logs in and fetches the user record.
    ///
    /// # Errors
    /// * `Error::InvalidForm` for an email without `@` or an empty password
    /// * Backend errors, with the backend's message
    pub async fn login<B: AuthBackend + ?Sized>(
        &mut self,
        backend: &B,
        email: &str,
        password: &str,
    ) -> Result<&User> {
        validate_email(email)?;
        if password.is_empty() {
            return Err(Error::InvalidForm("Please enter a password".to_string()));
        }

        let response = backend.login(email.trim(), password).await?;
        if let Some(token) = response.access_token {
            backend.set_token(Some(token.clone()));
            self.token = Some(token);
        }

        let user = backend.current_user().await?;
        log::info!("logged in as {}", user.email);
        Ok(self.user.insert(user))
    }

    /// Registers a new account. Does not log in.
    pub async fn register<B: AuthBackend + ?Sized>(
        &mut self,
        backend: &B,
        form: &SignupForm,
    ) -> Result<User> {
        let request = form.validate()?;
        let user = backend.register(&request).await?;
        log::info!("registered {}", request.email);
        Ok(user)
    }

    /// Forgets the local session first, then tells the backend.
    ///
    /// Backend failures are logged and ignored: locally the user is logged
    /// out either way.
    pub async fn logout<B: AuthBackend + ?Sized>(&mut self, backend: &B) {
        self.token = None;
        backend.set_token(None);

        if let Err(e) = backend.logout().await {
            log::warn!("ignoring logout error: {}", e);
        }
        self.user = None;
    }

    /// Asks the backend who we are. Any failure means "not logged in" and
    /// drops the cached token.
    pub async fn check<B: AuthBackend + ?Sized>(&mut self, backend: &B) -> Option<&User> {
        match backend.current_user().await {
            Ok(user) => {
                self.user = Some(user);
            }
            Err(e) => {
                log::debug!("no active session: {}", e);
                self.user = None;
                self.token = None;
                backend.set_token(None);
            }
        }
        self.user.as_ref()
    }

    /// URL of the provider's consent screen
    pub async fn oauth_url<B: AuthBackend + ?Sized>(
        &self,
        backend: &B,
        provider: OAuthProvider,
    ) -> Result<String> {
        backend.authorization_url(provider).await.map_err(|e| {
            log::warn!("oauth initiation for {} failed: {}", provider, e);
            e
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn form() -> SignupForm {
        SignupForm {
            name: "Ada".into(),
            email: "ada@example.com".into(),
            password: "secret".into(),
            confirm_password: "secret".into(),
            terms: true,
        }
    }

    #[test]
    fn valid_form_builds_request() {
        let request = form().validate().unwrap();
        assert_eq!(request.email, "ada@example.com");
        assert_eq!(request.name, "Ada");
    }

    #[test]
    fn form_messages() {
        let mismatch = SignupForm {
            confirm_password: "other".into(),
            ..form()
        };
        assert_eq!(
            mismatch.validate().unwrap_err().to_string(),
            "Passwords do not match"
        );

        let no_terms = SignupForm {
            terms: false,
            ..form()
        };
        assert_eq!(
            no_terms.validate().unwrap_err().to_string(),
            "Please agree to the Terms of Service and Privacy Policy"
        );

        let bad_email = SignupForm {
            email: "ada.example.com".into(),
            ..form()
        };
        assert_eq!(
            bad_email.validate().unwrap_err().to_string(),
            "Please enter a valid email address"
        );
    }

    #[test]
    fn user_keeps_unknown_fields() {
        let user: User = serde_json::from_str(
            r#"{"id": 7, "email": "a@b.c", "name": null, "is_verified": true}"#,
        )
        .unwrap();
        assert_eq!(user.email, "a@b.c");
        assert_eq!(user.extra.get("is_verified"), Some(&Value::Bool(true)));
    }

    #[test]
    fn providers() {
        assert_eq!("GitHub".parse::<OAuthProvider>().unwrap(), OAuthProvider::Github);
        assert!("myspace".parse::<OAuthProvider>().is_err());
    }
}
