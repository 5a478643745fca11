/// HTTP control surface: start/stop a run, read its status, stream its events.
use crate::config::KeepaliveConfig;
use crate::signals::{self, ShutdownRequest};
use crate::status::{StatusData, StatusFile};
use crate::view::RunView;
use crate::worker::{KeepAliveWorker, RunConfig, StartError, WorkerEvent};
use axum::{
    extract::State,
    http::StatusCode,
    response::sse::{Event, KeepAlive, Sse},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use std::future::IntoFuture;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_stream::{wrappers::BroadcastStream, Stream, StreamExt};
use tower_http::cors::CorsLayer;

/// Events buffered per SSE subscriber before it starts lagging.
const EVENT_BUFFER: usize = 256;

type ApiError = (StatusCode, Json<serde_json::Value>);

#[derive(Clone)]
pub struct AppState {
    worker: Arc<Mutex<KeepAliveWorker>>,
    view: Arc<RwLock<RunView>>,
    events: broadcast::Sender<WorkerEvent>,
    defaults: RunConfig,
    /// Runs started so far.
    runs: Arc<AtomicU64>,
    /// Terminal events the pump has fully handled so far.
    settled: Arc<watch::Sender<u64>>,
}

impl AppState {
    /// Build the shared state and spawn the task that fans worker events out.
    pub fn spawn(defaults: RunConfig, status: Option<StatusFile>) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(EVENT_BUFFER);
        let state = Self {
            worker: Arc::new(Mutex::new(KeepAliveWorker::new(tx))),
            view: Arc::new(RwLock::new(RunView::default())),
            events,
            defaults,
            runs: Arc::new(AtomicU64::new(0)),
            settled: Arc::new(watch::Sender::new(0)),
        };
        let pump = tokio::spawn(pump(state.clone(), rx, status));
        (state, pump)
    }

    /// Start a run and reset the view for it.
    ///
    /// The previous run's terminal event may still be queued for the pump when
    /// its phase already allows a restart. Resetting the view before the pump
    /// has handled it would let that event land on the new run, so wait for it.
    async fn start(&self, target: PathBuf, config: RunConfig) -> Result<StatusData, StartError> {
        loop {
            let mut worker = self.worker.lock().await;
            let runs = self.runs.load(Ordering::Acquire);
            if worker.phase().is_active() || *self.settled.borrow() >= runs {
                // Held across start so the pump cannot apply the new run's
                // first event before the view is reset
                let mut view = self.view.write().await;
                let resolved = worker.start(&target, config)?;
                self.runs.store(runs + 1, Ordering::Release);
                view.begin(&resolved, config);
                return Ok(StatusData::new(worker.phase(), &view));
            }
            drop(worker);

            let mut settled = self.settled.subscribe();
            // The sender lives in this state, so this only fails if it is gone
            if settled.wait_for(|n| *n >= runs).await.is_err() {
                return Err(StartError::AlreadyRunning);
            }
        }
    }

    async fn snapshot(&self) -> StatusData {
        let phase = self.worker.lock().await.phase();
        let view = self.view.read().await;
        StatusData::new(phase, &view)
    }
}

/// Forward worker events into the view, the status file and SSE subscribers.
async fn pump(
    state: AppState,
    mut rx: mpsc::UnboundedReceiver<WorkerEvent>,
    status: Option<StatusFile>,
) {
    while let Some(event) = rx.recv().await {
        let view = {
            let mut view = state.view.write().await;
            view.apply(&event);
            view.clone()
        };

        if let Some(status) = &status {
            if !matches!(event, WorkerEvent::CountdownTick { .. }) {
                let phase = state.worker.lock().await.phase();
                status.update(phase, &view);
            }
        }

        let terminal = event.is_terminal();
        // No subscribers is fine
        let _ = state.events.send(event);
        if terminal {
            state.settled.send_modify(|n| *n += 1);
        }
    }
}

/// How the serve front end ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Exit {
    /// The run (if any) reached its terminal event.
    Drained,
    /// A second signal arrived while waiting for the run to stop.
    Forced,
}

impl Exit {
    fn code(self) -> i32 {
        match self {
            Exit::Drained => 0,
            Exit::Forced => 130,
        }
    }
}

/// React to shutdown requests: the first stops the run and waits for its
/// terminal event, an `Immediate` one gives up waiting.
async fn supervise(state: AppState, mut shutdown: mpsc::UnboundedReceiver<ShutdownRequest>) -> Exit {
    // A closed channel means nobody can ask anymore; treat it like a request
    if let Some(ShutdownRequest::Immediate) = shutdown.recv().await {
        return Exit::Forced;
    }

    // Subscribe before stopping so the terminal event cannot slip past
    let mut events = state.events.subscribe();
    let active = {
        let worker = state.worker.lock().await;
        worker.stop();
        worker.phase().is_active()
    };
    if !active {
        return Exit::Drained;
    }
    tracing::info!("waiting for the run to stop (signal again to exit now)");

    loop {
        tokio::select! {
            biased;
            Some(request) = shutdown.recv() => {
                if request == ShutdownRequest::Immediate {
                    return Exit::Forced;
                }
            }
            event = events.recv() => match event {
                Ok(event) if event.is_terminal() => return Exit::Drained,
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(_)) => {
                    if !state.worker.lock().await.phase().is_active() {
                        return Exit::Drained;
                    }
                }
                Err(broadcast::error::RecvError::Closed) => return Exit::Drained,
            },
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .route("/api/status", get(api_status))
        .route("/api/start", post(api_start))
        .route("/api/stop", post(api_stop))
        .route("/api/events", get(api_events))
        .with_state(state)
        .layer(CorsLayer::permissive())
}

/// Serve the API until a shutdown signal. Returns the process exit code.
///
/// Open SSE streams never end on their own, so shutdown follows the worker
/// rather than the connections: once the run is drained the server is dropped.
pub async fn run(config: &KeepaliveConfig) -> Result<i32, Box<dyn std::error::Error>> {
    let status = config.status.file.clone().map(StatusFile::new);
    let (state, pump) = AppState::spawn(config.run_config(), status);

    if let Some(target) = &config.probe.target {
        state.start(target.clone(), config.run_config()).await?;
    }

    let app = router(state.clone());
    let addr = format!("{}:{}", config.serve.bind, config.serve.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    let local_addr = listener.local_addr()?;
    tracing::info!("serve listening on {local_addr}");

    let shutdown = signals::install()?;
    let exit = tokio::select! {
        served = axum::serve(listener, app).into_future() => {
            served?;
            Exit::Drained
        }
        exit = supervise(state.clone(), shutdown) => exit,
    };
    tracing::info!(?exit, "shutting down http front end");

    // The pump would otherwise rewrite the status file with the final event
    pump.abort();
    let _ = pump.await;
    if let Some(path) = &config.status.file {
        StatusFile::new(path.clone()).remove();
    }
    Ok(exit.code())
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({"ok": true}))
}

async fn api_status(State(state): State<AppState>) -> Json<StatusData> {
    Json(state.snapshot().await)
}

#[derive(Debug, Deserialize)]
struct StartRequest {
    target: PathBuf,
    #[serde(default)]
    interval_secs: Option<u64>,
    #[serde(default)]
    max_duration_mins: Option<u64>,
}

async fn api_start(
    State(state): State<AppState>,
    Json(req): Json<StartRequest>,
) -> Result<Json<StatusData>, ApiError> {
    let config = RunConfig::new(
        req.interval_secs.unwrap_or(state.defaults.interval_secs),
        req.max_duration_mins
            .unwrap_or(state.defaults.max_duration_mins),
    );

    match state.start(req.target, config).await {
        Ok(status) => Ok(Json(status)),
        Err(e) => {
            let code = match e {
                StartError::AlreadyRunning => StatusCode::CONFLICT,
                StartError::InvalidConfig { .. } => StatusCode::BAD_REQUEST,
            };
            Err((code, Json(serde_json::json!({"error": e.to_string()}))))
        }
    }
}

async fn api_stop(State(state): State<AppState>) -> Json<serde_json::Value> {
    let worker = state.worker.lock().await;
    worker.stop();
    Json(serde_json::json!({"ok": true, "phase": worker.phase()}))
}

async fn api_events(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, axum::Error>>> {
    // Lagged subscribers silently skip what they missed
    let stream = BroadcastStream::new(state.events.subscribe())
        .filter_map(|msg| msg.ok())
        .map(|event| Event::default().json_data(event));
    Sse::new(stream).keep_alive(KeepAlive::default())
}
