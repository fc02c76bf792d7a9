//! Runtime configuration, read from the environment.

use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{Error, Result};

pub const DEFAULT_API_URL: &str = "http://localhost:8000";
pub const DEFAULT_DATA_DIR: &str = ".businalyst";
pub const DEFAULT_BIND: &str = "127.0.0.1:3000";
pub const DEFAULT_TIMEOUT_SECS: u64 = 10;

/// Where the backend lives, where state is kept, and where the dashboard
/// server listens
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub api_url: String,
    pub data_dir: PathBuf,
    pub bind_addr: SocketAddr,
    pub request_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            data_dir: PathBuf::from(DEFAULT_DATA_DIR),
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 3000)),
            request_timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        }
    }
}

impl Config {
    /// Reads `BUSINALYST_*` variables, falling back to `VITE_API_URL` for the
    /// backend URL so an existing frontend `.env` keeps working.
    ///
    /// # Errors
    /// * `Error::Config` for an unparseable bind address or timeout
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Same as [`Config::from_env`] with an arbitrary variable source
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let mut config = Config::default();

        if let Some(url) = non_empty("BUSINALYST_API_URL").or_else(|| non_empty("VITE_API_URL")) {
            config.api_url = url.trim().trim_end_matches('/').to_string();
        }
        if let Some(dir) = non_empty("BUSINALYST_DATA_DIR") {
            config.data_dir = PathBuf::from(dir);
        }
        if let Some(bind) = non_empty("BUSINALYST_BIND") {
            config.bind_addr = parse_bind(&bind)?;
        }
        if let Some(secs) = non_empty("BUSINALYST_TIMEOUT_SECS") {
            config.request_timeout = parse_timeout(&secs)?;
        }

        Ok(config)
    }
}

pub fn parse_bind(raw: &str) -> Result<SocketAddr> {
    raw.trim()
        .parse()
        .map_err(|_| Error::Config(format!("invalid bind address: {}", raw)))
}

pub fn parse_timeout(raw: &str) -> Result<Duration> {
    match raw.trim().parse::<u64>() {
        Ok(secs) if secs > 0 => Ok(Duration::from_secs(secs)),
        _ => Err(Error::Config(format!("invalid timeout: {}", raw))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults() {
        let config = Config::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.bind_addr.to_string(), DEFAULT_BIND);
    }

    #[test]
    fn vite_url_is_a_fallback() {
        let config = Config::from_lookup(lookup(&[("VITE_API_URL", "https://api.example.com/")]))
            .unwrap();
        assert_eq!(config.api_url, "https://api.example.com");

        let config = Config::from_lookup(lookup(&[
            ("VITE_API_URL", "https://vite.example.com"),
            ("BUSINALYST_API_URL", "https://own.example.com"),
        ]))
        .unwrap();
        assert_eq!(config.api_url, "https://own.example.com");
    }

    #[test]
    fn bad_values() {
        assert!(matches!(
            Config::from_lookup(lookup(&[("BUSINALYST_BIND", "nowhere")])),
            Err(Error::Config(_))
        ));
        assert!(Config::from_lookup(lookup(&[("BUSINALYST_TIMEOUT_SECS", "0")])).is_err());
        let config = Config::from_lookup(lookup(&[("BUSINALYST_TIMEOUT_SECS", "3")])).unwrap();
        assert_eq!(config.request_timeout, Duration::from_secs(3));
    }
}
