//! Loopback HTTP Response Surface: REST endpoints plus a long-lived SSE
//! event stream.
//!
//! Grounded on `hi-youichi-loom`'s `serve` crate for the
//! `axum::serve(listener, app).with_graceful_shutdown(...)` pattern and its
//! `Arc<AppState>` shape — the teacher repo has no HTTP server of its own.

use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::stream::{self, Stream, StreamExt};
use serde::Deserialize;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tracing::{info, warn};

use crate::activity::ActivityStore;
use crate::broker::QuestionBroker;
use crate::ipc::EventLogWriter;
use crate::state::StateStore;
use crate::{Error, Result};

struct AppState {
    store: Arc<StateStore>,
    broker: Arc<QuestionBroker>,
    activity: Arc<ActivityStore>,
    events: Arc<EventLogWriter>,
}

/// Owns the listening socket and the shutdown trigger. `close()` is
/// idempotent: a no-op before `start`, safe to call twice after.
pub struct Server {
    shutdown_tx: std::sync::Mutex<Option<oneshot::Sender<()>>>,
    handle: std::sync::Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl Server {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            shutdown_tx: std::sync::Mutex::new(None),
            handle: std::sync::Mutex::new(None),
        })
    }

    pub async fn start(
        self: &Arc<Self>,
        port: u16,
        store: Arc<StateStore>,
        broker: Arc<QuestionBroker>,
        activity: Arc<ActivityStore>,
        events: Arc<EventLogWriter>,
    ) -> Result<()> {
        let addr = format!("127.0.0.1:{port}");
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|_| Error::PortInUse(port))?;

        let state = Arc::new(AppState { store, broker, activity, events });
        let app = router(state);

        let (tx, rx) = oneshot::channel();
        *self.shutdown_tx.lock().expect("server mutex poisoned") = Some(tx);

        info!(port, "response surface listening");
        let handle = tokio::spawn(async move {
            let result = axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    let _ = rx.await;
                })
                .await;
            if let Err(e) = result {
                warn!("response surface exited with error: {e}");
            }
        });

        *self.handle.lock().expect("server mutex poisoned") = Some(handle);
        Ok(())
    }

    /// No-op if never started; safe to call more than once.
    pub async fn close(&self) {
        let tx = self.shutdown_tx.lock().expect("server mutex poisoned").take();
        if let Some(tx) = tx {
            let _ = tx.send(());
        }
        let handle = self.handle.lock().expect("server mutex poisoned").take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }
}

fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .route("/api/state", get(get_state))
        .route("/api/questions/:id", get(get_question).post(post_answer))
        .route("/api/events", get(sse_events))
        .route("/api/activity", get(get_activity))
        .with_state(state)
}

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

async fn get_state(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.store.snapshot())
}

async fn get_question(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> impl IntoResponse {
    match state.broker.get_pending_by_id(&id) {
        Some(question) => Json(question).into_response(),
        None => axum::http::StatusCode::NOT_FOUND.into_response(),
    }
}

#[derive(Debug, Deserialize)]
struct AnswerBody {
    answers: HashMap<String, String>,
}

async fn post_answer(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(body): Json<AnswerBody>,
) -> impl IntoResponse {
    match state.broker.submit_answer(&id, body.answers) {
        Ok(true) => axum::http::StatusCode::OK.into_response(),
        Ok(false) => axum::http::StatusCode::NOT_FOUND.into_response(),
        Err(e) => {
            warn!("failed to submit answer: {e}");
            axum::http::StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

async fn get_activity(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.activity.feed())
}

async fn sse_events(
    State(state): State<Arc<AppState>>,
) -> Sse<impl Stream<Item = std::result::Result<Event, Infallible>>> {
    let burst = state.events.read_all().unwrap_or_default();
    let live = state.events.subscribe();

    let burst_stream = stream::iter(burst.into_iter().map(|record| {
        Ok(Event::default().event(record.event.clone()).json_data(&record).unwrap_or_default())
    }));

    let live_stream = tokio_stream::wrappers::BroadcastStream::new(live).filter_map(|result| async move {
        match result {
            Ok(record) => Some(Ok(Event::default().event(record.event.clone()).json_data(&record).unwrap_or_default())),
            Err(_) => None,
        }
    });

    Sse::new(burst_stream.chain(live_stream)).keep_alive(KeepAlive::new().interval(Duration::from_secs(15)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::StepKind;

    fn test_state() -> Arc<AppState> {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(StateStore::create_fresh(dir.path().join("state.json")));
        let broker = Arc::new(QuestionBroker::new(store.clone()));
        let activity = Arc::new(ActivityStore::new(dir.path().join("activity.json")));
        let events = Arc::new(EventLogWriter::new(dir.path().join("events.ndjson")).unwrap());
        Arc::new(AppState { store, broker, activity, events })
    }

    #[tokio::test]
    async fn health_reports_ok() {
        let response = health().await.into_response();
        assert_eq!(response.status(), axum::http::StatusCode::OK);
    }

    #[tokio::test]
    async fn unknown_question_id_returns_404() {
        let state = test_state();
        let response = get_question(State(state), Path("missing".to_string())).await.into_response();
        assert_eq!(response.status(), axum::http::StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn answering_a_pending_question_returns_200() {
        let state = test_state();
        let broker = state.broker.clone();
        let broker2 = broker.clone();
        let waiter = tokio::spawn(async move { broker2.handle_question(1, StepKind::Plan, vec![]).await });
        tokio::task::yield_now().await;
        let id = broker.get_pending()[0].id.clone();

        let body = AnswerBody { answers: HashMap::new() };
        let response = post_answer(State(state), Path(id), Json(body)).await.into_response();
        assert_eq!(response.status(), axum::http::StatusCode::OK);
        waiter.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn close_before_start_is_a_no_op() {
        let server = Server::new();
        server.close().await;
    }
}
