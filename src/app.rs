use axum::{
    Json, Router,
    extract::{Multipart, Path, Query, State},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::aggregate::{Bucketing, Granularity, Timeframe, aggregate_timeframe, top_months};
use crate::auth::{AuthSession, OAuthProvider, SignupForm};
use crate::client::{AuthBackend, HttpBackend, KpiBackend};
use crate::config::Config;
use crate::demo;
use crate::derive::{SeriesRequest, derive_entries, metric_cards};
use crate::error::{Error, Result};
use crate::export;
use crate::graph::{self, GraphOptions, GraphType};
use crate::kpi::{KpiSnapshot, Metric};
use crate::store::{FilePersistence, Persistence, SnapshotStore};
use crate::upload::{SelectedFile, UploadFlow};
use crate::views::{BarLayout, Breakdown, BreakdownView, ChartLayout, LineLayout, gauges};

pub type DynStore = SnapshotStore<Box<dyn Persistence>>;

/// Shared state of the dashboard server
///
/// Store and upload flow sit behind std mutexes that are never held across
/// an `.await`; the auth session is async all the way and uses tokio's.
pub struct AppState {
    store: Mutex<DynStore>,
    upload: Mutex<UploadFlow>,
    session: tokio::sync::Mutex<AuthSession>,
    kpi_backend: Arc<dyn KpiBackend>,
    auth_backend: Arc<dyn AuthBackend>,
}

impl AppState {
    pub fn new(
        store: DynStore,
        kpi_backend: Arc<dyn KpiBackend>,
        auth_backend: Arc<dyn AuthBackend>,
    ) -> Self {
        Self {
            store: Mutex::new(store),
            upload: Mutex::new(UploadFlow::new()),
            session: tokio::sync::Mutex::new(AuthSession::new()),
            kpi_backend,
            auth_backend,
        }
    }
}

/// A poisoned lock only means another handler panicked; the data is still
/// consistent because every mutation is a single assignment.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Marks the running upload abandoned if the handler is dropped before the
/// backend answers, which is what happens when the client disconnects.
struct AbandonOnDrop<'a> {
    flow: &'a Mutex<UploadFlow>,
    armed: bool,
}

impl<'a> AbandonOnDrop<'a> {
    fn new(flow: &'a Mutex<UploadFlow>) -> Self {
        Self { flow, armed: true }
    }

    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for AbandonOnDrop<'_> {
    fn drop(&mut self) {
        if self.armed {
            lock(self.flow).abandon();
        }
    }
}

#[derive(Serialize)]
struct StatusResponse {
    status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<String>,
}

impl StatusResponse {
    fn ok() -> Self {
        Self {
            status: "ok",
            message: None,
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = match &self {
            e if e.is_validation() => StatusCode::BAD_REQUEST,
            Error::NoData => StatusCode::NOT_FOUND,
            // an error reported inside a 2xx body is still a gateway failure
            Error::Backend { status, .. } => StatusCode::from_u16(*status)
                .ok()
                .filter(|s| s.is_client_error() || s.is_server_error())
                .unwrap_or(StatusCode::BAD_GATEWAY),
            Error::BackendUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            Error::Http(_) | Error::InvalidPayload(_) => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };

        if status.is_server_error() {
            log::error!("request failed: {}", self);
        }

        let body = StatusResponse {
            status: "error",
            message: Some(self.to_string()),
        };
        (status, Json(body)).into_response()
    }
}

#[derive(Deserialize)]
struct SeriesQuery {
    metric: Option<String>,
    granularity: Option<String>,
    last: Option<usize>,
    limit: Option<usize>,
}

impl SeriesQuery {
    fn request(&self) -> Result<SeriesRequest> {
        let metric = match &self.metric {
            Some(m) => m.parse::<Metric>().map_err(Error::InvalidForm)?,
            None => Metric::Revenue,
        };
        let bucketing = match (self.last, &self.granularity) {
            (Some(n), _) => Bucketing::LastPoints(n),
            (None, Some(g)) => {
                Bucketing::Calendar(g.parse::<Granularity>().map_err(Error::InvalidForm)?)
            }
            (None, None) => Bucketing::Calendar(Granularity::Month),
        };
        Ok(SeriesRequest {
            metric,
            bucketing,
            limit: self.limit,
        })
    }
}

/// Series parameters plus chart settings. Not flattened: urlencoded
/// numbers do not survive `#[serde(flatten)]`.
#[derive(Deserialize)]
struct ChartQuery {
    metric: Option<String>,
    granularity: Option<String>,
    last: Option<usize>,
    limit: Option<usize>,
    kind: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
}

#[derive(Deserialize)]
struct TimeframeQuery {
    frame: Option<String>,
    compare: Option<String>,
}

#[derive(Deserialize)]
struct TopMonthsQuery {
    metric: Option<String>,
    n: Option<usize>,
}

#[derive(Deserialize)]
struct LoginRequest {
    email: String,
    password: String,
}

/// Builds the dashboard router on top of a ready state
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/kpis", get(get_kpis).delete(clear_kpis))
        .route("/api/upload", post(upload_file))
        .route("/api/upload/status", get(upload_status))
        .route("/api/metrics", get(get_metrics))
        .route("/api/series", get(get_series))
        .route("/api/timeframe", get(get_timeframe))
        .route("/api/top-months", get(get_top_months))
        .route("/api/export/series.csv", get(export_series_csv))
        .route("/api/export/series.xlsx", get(export_series_xlsx))
        .route("/api/export/top5.csv", get(export_top5_csv))
        .route("/api/chart.svg", get(chart_svg))
        .route("/api/chart.png", get(chart_png))
        .route("/api/chart/layout", get(chart_layout))
        .route("/api/breakdown/column/:column", get(column_breakdown))
        .route("/api/breakdown/:kind", get(breakdown))
        .route("/api/gauges", get(get_gauges))
        .route("/api/auth/login", post(login))
        .route("/api/auth/register", post(register))
        .route("/api/auth/logout", post(logout))
        .route("/api/auth/me", get(me))
        .route("/api/auth/oauth/:provider", get(oauth))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Starts the dashboard server
///
/// Restores the persisted snapshot (or the demo data on first start) and
/// serves until the process is stopped.
pub async fn run(config: Config) -> Result<()> {
    let persistence: Box<dyn Persistence> = Box::new(FilePersistence::new(&config.data_dir));
    let mut store = SnapshotStore::open(persistence)?;
    if demo::seed_demo(&mut store)? {
        log::info!("no saved data, showing the demo dataset");
    }

    let backend = Arc::new(HttpBackend::new(&config)?);
    let app_state = Arc::new(AppState::new(store, backend.clone(), backend));

    let listener = TcpListener::bind(config.bind_addr)
        .await
        .map_err(|e| Error::Config(format!("cannot bind {}: {}", config.bind_addr, e)))?;
    log::info!("Listening on http://{}", config.bind_addr);
    log::info!("Backend at {}", config.api_url);

    axum::serve(listener, router(app_state)).await?;
    Ok(())
}

/// Clone of the current snapshot, so no lock outlives the handler's first line
fn current_snapshot(state: &AppState) -> Result<KpiSnapshot> {
    lock(&state.store)
        .snapshot()
        .cloned()
        .ok_or(Error::NoData)
}

async fn get_kpis(State(state): State<Arc<AppState>>) -> Response {
    match lock(&state.store).get() {
        Some(stored) => Json(stored).into_response(),
        None => StatusCode::NO_CONTENT.into_response(),
    }
}

async fn clear_kpis(State(state): State<Arc<AppState>>) -> Result<Json<StatusResponse>> {
    lock(&state.store).clear()?;
    Ok(Json(StatusResponse::ok()))
}

async fn upload_file(
    State(state): State<Arc<AppState>>,
    mut multipart: Multipart,
) -> Result<Response> {
    let mut selected = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| Error::InvalidForm(e.to_string()))?
    {
        if field.name() != Some("file") {
            continue;
        }
        let name = field.file_name().unwrap_or_default().to_string();
        // reject before reading the body
        crate::upload::validate_file_name(&name)?;
        let bytes = field
            .bytes()
            .await
            .map_err(|e| Error::InvalidForm(e.to_string()))?;
        selected = Some(SelectedFile::new(name, bytes.to_vec())?);
    }
    let file = selected.ok_or(Error::NoFileSelected)?;

    let file = {
        let mut flow = lock(&state.upload);
        flow.select(file)?;
        flow.begin()?
    };

    let guard = AbandonOnDrop::new(&state.upload);
    let outcome = state.kpi_backend.upload(&file).await;
    guard.disarm();

    let mut flow = lock(&state.upload);
    let mut store = lock(&state.store);
    flow.finish(outcome, &mut *store)?;
    Ok(Json(store.get()).into_response())
}

async fn upload_status(State(state): State<Arc<AppState>>) -> Response {
    Json(lock(&state.upload).state().clone()).into_response()
}

async fn get_metrics(State(state): State<Arc<AppState>>) -> Response {
    Json(metric_cards(lock(&state.store).get())).into_response()
}

async fn get_gauges(State(state): State<Arc<AppState>>) -> Response {
    Json(gauges(&metric_cards(lock(&state.store).get()))).into_response()
}

async fn breakdown(
    State(state): State<Arc<AppState>>,
    Path(kind): Path<String>,
) -> Result<Response> {
    let breakdown = kind.parse::<Breakdown>()?;
    let snapshot = current_snapshot(&state)?;
    Ok(Json(BreakdownView::new(&snapshot, &breakdown)).into_response())
}

async fn column_breakdown(
    State(state): State<Arc<AppState>>,
    Path(column): Path<String>,
) -> Result<Response> {
    let snapshot = current_snapshot(&state)?;
    Ok(Json(BreakdownView::new(&snapshot, &Breakdown::Column(column))).into_response())
}

async fn get_series(
    State(state): State<Arc<AppState>>,
    Query(query): Query<SeriesQuery>,
) -> Result<Response> {
    let request = query.request()?;
    let snapshot = current_snapshot(&state)?;
    Ok(Json(request.entries(&snapshot)).into_response())
}

async fn get_timeframe(
    State(state): State<Arc<AppState>>,
    Query(query): Query<TimeframeQuery>,
) -> Result<Response> {
    let frame = match &query.frame {
        Some(f) => f.parse::<Timeframe>().map_err(Error::InvalidForm)?,
        None => Timeframe::TwelveMonths,
    };
    let compare = match &query.compare {
        Some(c) => c.parse::<Metric>().map_err(Error::InvalidForm)?,
        None => Metric::Expense,
    };
    let snapshot = current_snapshot(&state)?;
    Ok(Json(aggregate_timeframe(&snapshot.rows(), frame, compare)).into_response())
}

async fn get_top_months(
    State(state): State<Arc<AppState>>,
    Query(query): Query<TopMonthsQuery>,
) -> Result<Response> {
    let metric = match &query.metric {
        Some(m) => m.parse::<Metric>().map_err(Error::InvalidForm)?,
        None => Metric::Revenue,
    };
    let snapshot = current_snapshot(&state)?;
    let months = top_months(&snapshot.series(metric), query.n.unwrap_or(5));
    Ok(Json(derive_entries(&months)).into_response())
}

fn attachment(content_type: &'static str, file_name: &str, body: impl IntoResponse) -> Response {
    (
        [
            (header::CONTENT_TYPE, content_type.to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", file_name),
            ),
        ],
        body,
    )
        .into_response()
}

async fn export_series_csv(
    State(state): State<Arc<AppState>>,
    Query(query): Query<SeriesQuery>,
) -> Result<Response> {
    let request = query.request()?;
    let snapshot = current_snapshot(&state)?;
    let csv = export::series_to_csv(&request.entries(&snapshot))?;
    Ok(attachment("text/csv; charset=utf-8", "series.csv", csv))
}

async fn export_series_xlsx(
    State(state): State<Arc<AppState>>,
    Query(query): Query<SeriesQuery>,
) -> Result<Response> {
    let request = query.request()?;
    let snapshot = current_snapshot(&state)?;
    let xlsx = export::series_to_xlsx(&request.entries(&snapshot))?;
    Ok(attachment(
        "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        "series.xlsx",
        xlsx,
    ))
}

async fn export_top5_csv(State(state): State<Arc<AppState>>) -> Result<Response> {
    let snapshot = current_snapshot(&state)?;
    let csv = export::table_to_csv(&snapshot.top5_columns, &snapshot.top5_profit)?;
    Ok(attachment("text/csv; charset=utf-8", "top5_profit.csv", csv))
}

impl ChartQuery {
    fn series(&self) -> SeriesQuery {
        SeriesQuery {
            metric: self.metric.clone(),
            granularity: self.granularity.clone(),
            last: self.last,
            limit: self.limit,
        }
    }
}

fn chart_options(query: &ChartQuery, request: &SeriesRequest) -> Result<GraphOptions> {
    let defaults = GraphOptions::default();
    Ok(GraphOptions {
        title: request.title(),
        y_label: request.metric.to_string(),
        width: query.width.unwrap_or(defaults.width).clamp(200, 4000),
        height: query.height.unwrap_or(defaults.height).clamp(150, 4000),
        graph_type: match &query.kind {
            Some(kind) => kind
                .parse::<GraphType>()
                .map_err(|e| Error::InvalidForm(e.to_string()))?,
            None => defaults.graph_type,
        },
    })
}

async fn chart_layout(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ChartQuery>,
) -> Result<Response> {
    let request = query.series().request()?;
    let options = chart_options(&query, &request)?;
    let snapshot = current_snapshot(&state)?;
    let entries = request.entries(&snapshot);
    let (width, height) = (f64::from(options.width), f64::from(options.height));

    let layout = match options.graph_type {
        GraphType::Line => ChartLayout::Line(LineLayout::new(&entries, width, height)),
        GraphType::Area => ChartLayout::Area(LineLayout::new(&entries, width, height)),
        GraphType::Bar => ChartLayout::Bar(BarLayout::new(&entries, width, height)),
    };
    Ok(Json(layout).into_response())
}

async fn chart_svg(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ChartQuery>,
) -> Result<Response> {
    let request = query.series().request()?;
    let options = chart_options(&query, &request)?;
    let snapshot = current_snapshot(&state)?;
    let svg = graph::render_svg(&request.entries(&snapshot), &options)?;
    Ok(([(header::CONTENT_TYPE, "image/svg+xml")], svg).into_response())
}

async fn chart_png(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ChartQuery>,
) -> Result<Response> {
    let request = query.series().request()?;
    let options = chart_options(&query, &request)?;
    let snapshot = current_snapshot(&state)?;
    let png = graph::render_png(&request.entries(&snapshot), &options)?;
    Ok(([(header::CONTENT_TYPE, "image/png")], png).into_response())
}

async fn login(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<LoginRequest>,
) -> Result<Response> {
    let mut session = state.session.lock().await;
    let user = session
        .login(state.auth_backend.as_ref(), &payload.email, &payload.password)
        .await?;
    Ok(Json(user).into_response())
}

async fn register(
    State(state): State<Arc<AppState>>,
    Json(form): Json<SignupForm>,
) -> Result<Response> {
    let mut session = state.session.lock().await;
    let user = session.register(state.auth_backend.as_ref(), &form).await?;
    Ok((StatusCode::CREATED, Json(user)).into_response())
}

async fn logout(State(state): State<Arc<AppState>>) -> Json<StatusResponse> {
    let mut session = state.session.lock().await;
    session.logout(state.auth_backend.as_ref()).await;
    Json(StatusResponse::ok())
}

async fn me(State(state): State<Arc<AppState>>) -> Response {
    let mut session = state.session.lock().await;
    match session.check(state.auth_backend.as_ref()).await {
        Some(user) => Json(user).into_response(),
        None => (
            StatusCode::UNAUTHORIZED,
            Json(StatusResponse {
                status: "error",
                message: Some("Not authenticated".to_string()),
            }),
        )
            .into_response(),
    }
}

async fn oauth(
    State(state): State<Arc<AppState>>,
    Path(provider): Path<String>,
) -> Result<Response> {
    let provider = provider.parse::<OAuthProvider>()?;
    let session = state.session.lock().await;
    let url = session
        .oauth_url(state.auth_backend.as_ref(), provider)
        .await?;
    Ok(Json(serde_json::json!({ "authorization_url": url })).into_response())
}
