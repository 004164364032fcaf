//! Application assembly
//!
//! Wires the storage backend, handlers and middleware into a router.

use std::sync::Arc;

use axum::{middleware, routing::get, Json, Router};
use serde_json::json;
use sqlx::PgPool;
use tower::ServiceBuilder;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;

use crate::api::{self, AppState};
use crate::audit::{AuditLog, MemoryAuditLog, PgAuditLog};
use crate::config::Config;
use crate::domain::{Clock, SystemClock};
use crate::event_store::{EventRepository, EventStore, InMemoryEventRepository, PgEventRepository};
use crate::handlers::{CommandExecutor, SaleCommandHandler, SaleQueryService};

/// State backed by PostgreSQL
pub fn postgres_state(config: Config, pool: PgPool) -> AppState {
    assemble(
        config,
        Arc::new(PgEventRepository::new(pool.clone())),
        Arc::new(PgAuditLog::new(pool)),
        Arc::new(SystemClock),
    )
}

/// State kept in process memory; nothing survives a restart
pub fn memory_state(config: Config, clock: Arc<dyn Clock>) -> AppState {
    assemble(
        config,
        Arc::new(InMemoryEventRepository::new()),
        Arc::new(MemoryAuditLog::new()),
        clock,
    )
}

pub fn assemble(
    config: Config,
    repository: Arc<dyn EventRepository>,
    audit: Arc<dyn AuditLog>,
    clock: Arc<dyn Clock>,
) -> AppState {
    let store = EventStore::new(repository, config.store_timeout);
    let executor = CommandExecutor::new(
        store.clone(),
        audit.clone(),
        clock.clone(),
        config.policy,
        config.max_write_attempts,
    );

    AppState {
        commands: SaleCommandHandler::new(executor),
        queries: SaleQueryService::new(store, clock, config.policy),
        audit,
        config: Arc::new(config),
    }
}

/// Build the application router
pub fn build_router(state: AppState) -> Router {
    // Layers run last-added first: auth -> logging -> handler
    let protected_routes = api::create_router()
        .layer(middleware::from_fn(api::middleware::logging_middleware))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            api::middleware::auth_middleware,
        ));

    Router::new()
        // Health check (no auth)
        .route("/health", get(health_check))
        .nest("/api/v1", protected_routes)
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
                .layer(TraceLayer::new_for_http())
                .layer(PropagateRequestIdLayer::x_request_id()),
        )
        .with_state(state)
}

async fn health_check() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}
