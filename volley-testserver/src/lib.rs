use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use axum::Json;
use axum::Router;
use axum::extract::{ConnectInfo, Query, State};
use axum::http::{HeaderMap, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::time::{Duration, sleep};

pub const PATH_HEALTH: &str = "/health";
pub const PATH_LIMITED: &str = "/limited";
pub const PATH_SLOW: &str = "/slow";
pub const PATH_FAIL: &str = "/fail";
pub const PATH_QUOTA: &str = "/quota";

const DEFAULT_SLOW_MS: u64 = 50;
const DEFAULT_QUOTA_PER_MINUTE: u64 = 60;
const QUOTA_WINDOW: Duration = Duration::from_secs(60);
/// Expired windows are evicted once this many (client, path) keys are tracked.
const QUOTA_PRUNE_AT: usize = 10_000;

#[derive(Debug, Clone, Default)]
pub struct TestServerStats {
    requests_total: Arc<AtomicU64>,
    rate_limited_total: Arc<AtomicU64>,
}

impl TestServerStats {
    fn inc_requests_total(&self) {
        self.requests_total.fetch_add(1, Ordering::Relaxed);
    }

    fn inc_rate_limited_total(&self) {
        self.rate_limited_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn requests_total(&self) -> u64 {
        self.requests_total.load(Ordering::Relaxed)
    }

    pub fn rate_limited_total(&self) -> u64 {
        self.rate_limited_total.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Clone)]
pub struct TestServerUrls {
    pub base_url: String,
    pub health: String,
    pub limited: String,
    pub slow: String,
    pub fail: String,
    pub quota: String,
}

impl TestServerUrls {
    pub fn new(base_url: String) -> Self {
        Self {
            health: format!("{base_url}{PATH_HEALTH}"),
            limited: format!("{base_url}{PATH_LIMITED}"),
            slow: format!("{base_url}{PATH_SLOW}"),
            fail: format!("{base_url}{PATH_FAIL}"),
            quota: format!("{base_url}{PATH_QUOTA}"),
            base_url,
        }
    }

    /// `/slow` with a fixed response delay.
    pub fn slow_ms(&self, ms: u64) -> String {
        format!("{}?ms={ms}", self.slow)
    }

    /// `/quota` allowing `limit` requests per client per minute.
    pub fn quota_per_minute(&self, limit: u64) -> String {
        format!("{}?limit={limit}", self.quota)
    }
}

/// Fixed one-minute request windows keyed by client and path.
#[derive(Debug)]
struct QuotaWindows {
    windows: DashMap<(String, String), (Instant, u64)>,
    prune_at: usize,
}

impl Default for QuotaWindows {
    fn default() -> Self {
        Self::with_prune_at(QUOTA_PRUNE_AT)
    }
}

impl QuotaWindows {
    fn with_prune_at(prune_at: usize) -> Self {
        Self {
            windows: DashMap::new(),
            prune_at: prune_at.max(1),
        }
    }

    /// Counts one hit and returns the number of hits in the current window.
    fn hit(&self, client: String, path: String) -> u64 {
        self.hit_at(client, path, Instant::now())
    }

    fn hit_at(&self, client: String, path: String, now: Instant) -> u64 {
        if self.windows.len() >= self.prune_at {
            self.windows
                .retain(|_, (start, _)| now.saturating_duration_since(*start) < QUOTA_WINDOW);
        }

        let mut entry = self.windows.entry((client, path)).or_insert((now, 0));
        let (start, hits) = entry.value_mut();
        if now.saturating_duration_since(*start) >= QUOTA_WINDOW {
            *start = now;
            *hits = 0;
        }
        *hits += 1;
        *hits
    }

    #[cfg(test)]
    fn tracked(&self) -> usize {
        self.windows.len()
    }
}

#[derive(Clone, Default)]
struct AppState {
    stats: TestServerStats,
    quotas: Arc<QuotaWindows>,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    code: &'static str,
    message: &'static str,
}

fn error_response(status: StatusCode, code: &'static str, message: &'static str) -> Response {
    (status, Json(ErrorBody { code, message })).into_response()
}

fn client_key(headers: &HeaderMap, peer: SocketAddr) -> String {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map_or_else(|| peer.ip().to_string(), str::to_string)
}

async fn handle_health(State(state): State<AppState>) -> &'static str {
    state.stats.inc_requests_total();
    "ok"
}

async fn handle_limited(State(state): State<AppState>) -> Response {
    state.stats.inc_requests_total();
    state.stats.inc_rate_limited_total();
    error_response(
        StatusCode::TOO_MANY_REQUESTS,
        "RATE_LIMITED",
        "Too many requests",
    )
}

#[derive(Debug, Deserialize)]
struct SlowQuery {
    ms: Option<u64>,
}

async fn handle_slow(State(state): State<AppState>, Query(q): Query<SlowQuery>) -> &'static str {
    state.stats.inc_requests_total();
    sleep(Duration::from_millis(q.ms.unwrap_or(DEFAULT_SLOW_MS))).await;
    "slow"
}

async fn handle_fail(State(state): State<AppState>) -> Response {
    state.stats.inc_requests_total();
    error_response(
        StatusCode::INTERNAL_SERVER_ERROR,
        "INTERNAL",
        "Internal error",
    )
}

#[derive(Debug, Deserialize)]
struct QuotaQuery {
    limit: Option<u64>,
}

async fn handle_quota(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    uri: Uri,
    Query(q): Query<QuotaQuery>,
) -> Response {
    state.stats.inc_requests_total();

    let limit = q.limit.unwrap_or(DEFAULT_QUOTA_PER_MINUTE);
    let n = state
        .quotas
        .hit(client_key(&headers, peer), uri.path().to_string());
    if n > limit {
        state.stats.inc_rate_limited_total();
        return error_response(
            StatusCode::TOO_MANY_REQUESTS,
            "RATE_LIMITED",
            "Too many requests",
        );
    }
    (StatusCode::OK, "ok").into_response()
}

fn router(state: AppState) -> Router {
    Router::new()
        .route(PATH_HEALTH, get(handle_health))
        .route(PATH_LIMITED, get(handle_limited))
        .route(PATH_SLOW, get(handle_slow))
        .route(PATH_FAIL, get(handle_fail))
        .route(PATH_QUOTA, get(handle_quota))
        .with_state(state)
}

/// Serves the stub endpoints on `listener` until `shutdown` resolves.
pub async fn serve(
    listener: TcpListener,
    stats: TestServerStats,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> std::io::Result<()> {
    let app = router(AppState {
        stats,
        quotas: Arc::default(),
    });
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown)
    .await
}

/// In-process stub target for tests.
pub struct TestServer {
    urls: TestServerUrls,
    stats: TestServerStats,
    shutdown_tx: Option<oneshot::Sender<()>>,
    task: Option<tokio::task::JoinHandle<()>>,
}

impl TestServer {
    pub async fn start() -> std::io::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;

        let stats = TestServerStats::default();

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let task = tokio::spawn({
            let stats = stats.clone();
            async move {
                let _ = serve(listener, stats, async move {
                    let _ = shutdown_rx.await;
                })
                .await;
            }
        });

        Ok(Self {
            urls: TestServerUrls::new(format!("http://{addr}")),
            stats,
            shutdown_tx: Some(shutdown_tx),
            task: Some(task),
        })
    }

    pub fn urls(&self) -> &TestServerUrls {
        &self.urls
    }

    pub fn stats(&self) -> &TestServerStats {
        &self.stats
    }

    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }

        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        if self.shutdown_tx.is_some()
            && let Some(task) = self.task.take()
        {
            task.abort();
        }
    }
}
