//! Axum HTTP routes for the seeding API.

use crate::context::SharedClients;
use crate::coordinator::{Coordinator, SystemStatus};
use crate::error::{ServerError, ServerResult};
use axum::extract::{Query, State};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// Shared application state
pub struct AppState {
    pub clients: Arc<SharedClients>,
}

// ─── Route builder ───────────────────────────────────────────────

pub fn build_router(state: Arc<AppState>) -> Router {
    let api = Router::new()
        .route("/health", get(health))
        .route("/status", get(status))
        .route("/trigger", get(trigger_get).post(trigger_post));

    Router::new()
        .nest("/api", api)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

// ─── Handlers ────────────────────────────────────────────────────

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "service": "acl-crawler",
    }))
}

async fn status(State(state): State<Arc<AppState>>) -> ServerResult<Json<SystemStatus>> {
    let coordinator = Coordinator::new(vec![
        state.clients.visit_queue().await?,
        state.clients.create_queue().await?,
    ]);
    Ok(Json(coordinator.status().await?))
}

/// `?name=<root>`
#[derive(Debug, Default, serde::Deserialize)]
pub struct TriggerQuery {
    pub name: Option<String>,
}

/// `{"name": "<root>"}`
#[derive(Debug, serde::Deserialize)]
pub struct TriggerBody {
    pub name: Option<String>,
}

async fn trigger_get(
    State(state): State<Arc<AppState>>,
    Query(query): Query<TriggerQuery>,
) -> ServerResult<String> {
    trigger(&state, query.name).await
}

async fn trigger_post(
    State(state): State<Arc<AppState>>,
    Query(query): Query<TriggerQuery>,
    body: Option<Json<TriggerBody>>,
) -> ServerResult<String> {
    // The query string wins over the body
    let name = query.name.or_else(|| body.and_then(|Json(b)| b.name));
    trigger(&state, name).await
}

async fn trigger(state: &AppState, name: Option<String>) -> ServerResult<String> {
    let root = name
        .map(|n| n.trim().to_string())
        .filter(|n| !n.is_empty())
        .ok_or(ServerError::MissingName)?;

    tracing::info!("Trigger received for {}", root);
    let dispatcher = state.clients.seed_dispatcher().await?;
    Ok(dispatcher.dispatch(&root).await?)
}

// ─── Server startup ──────────────────────────────────────────────

/// Serve until `shutdown` is set
pub async fn serve(
    clients: Arc<SharedClients>,
    bind: &str,
    shutdown: Arc<AtomicBool>,
) -> ServerResult<()> {
    let addr: SocketAddr = bind
        .parse()
        .map_err(|_| ServerError::InvalidBind(bind.to_string()))?;

    let router = build_router(Arc::new(AppState { clients }));

    eprintln!("Seeding endpoint listening on http://{}", addr);
    eprintln!("API endpoints:");
    eprintln!("  GET       /api/health");
    eprintln!("  GET       /api/status");
    eprintln!("  GET|POST  /api/trigger?name=<root>");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal(shutdown))
        .await?;

    eprintln!("\nServer shut down.");
    Ok(())
}

/// Resolves once the Ctrl+C handler has set the flag
async fn shutdown_signal(shutdown: Arc<AtomicBool>) {
    while !shutdown.load(Ordering::Relaxed) {
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::QueueSettings;
    use crate::item::AclEntry;
    use crate::queue::MemoryQueue;
    use crate::sink::MemorySink;
    use crate::store::MemoryStore;
    use axum::http::StatusCode;

    fn state() -> (Arc<MemoryQueue>, Arc<AppState>) {
        let store = Arc::new(MemoryStore::new());
        store
            .add_dir("/a", vec![AclEntry::user("u1", "rwx")])
            .add_file("/a/f1", vec![])
            .add_dir("/a/b", vec![]);
        let visit = Arc::new(MemoryQueue::new("visit", Duration::from_secs(30)));
        let settings = QueueSettings {
            redis_url: "redis://127.0.0.1:6379".into(),
            key_prefix: "test".into(),
            visit_queue: "visit".into(),
            create_queue: "create".into(),
            lease: Duration::from_secs(30),
        };
        let clients = SharedClients::from_parts(
            settings,
            store,
            visit.clone(),
            Arc::new(MemoryQueue::new("create", Duration::from_secs(30))),
            Arc::new(MemorySink::new()),
        );
        (visit, Arc::new(AppState { clients: Arc::new(clients) }))
    }

    #[tokio::test]
    async fn test_trigger_by_query() {
        let (visit, state) = state();
        let ack = trigger_get(
            State(state),
            Query(TriggerQuery {
                name: Some("/a".into()),
            }),
        )
        .await
        .unwrap();

        assert_eq!(ack, "Processing triggered for /a");
        assert_eq!(visit.pending_bodies().len(), 1);
    }

    #[tokio::test]
    async fn test_trigger_by_body() {
        let (visit, state) = state();
        let body = Json(TriggerBody {
            name: Some("/a".into()),
        });
        let ack = trigger_post(State(state), Query(TriggerQuery::default()), Some(body))
            .await
            .unwrap();

        assert_eq!(ack, "Processing triggered for /a");
        assert_eq!(visit.pending_bodies().len(), 1);
    }

    #[tokio::test]
    async fn test_missing_name_is_bad_request() {
        let (visit, state) = state();
        let err = trigger_post(State(state), Query(TriggerQuery::default()), None)
            .await
            .unwrap_err();

        assert!(matches!(err, ServerError::MissingName));
        assert_eq!(err.into_response().status(), StatusCode::BAD_REQUEST);
        assert!(visit.pending_bodies().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_root_is_not_found() {
        let (_visit, state) = state();
        let err = trigger(&state, Some("/missing".into())).await.unwrap_err();
        assert_eq!(err.into_response().status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_status_reports_both_queues() {
        let (_visit, state) = state();
        let Json(status) = super::status(State(state)).await.unwrap();
        let names: Vec<_> = status.queues.iter().map(|q| q.name.as_str()).collect();
        assert_eq!(names, vec!["visit", "create"]);
    }
}
