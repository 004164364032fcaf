//! API module
//!
//! HTTP API endpoints and middleware.

pub mod middleware;
pub mod routes;

use std::sync::Arc;

use crate::audit::AuditLog;
use crate::config::Config;
use crate::handlers::{SaleCommandHandler, SaleQueryService};

pub use routes::create_router;

/// Shared state handed to every route and middleware
#[derive(Clone)]
pub struct AppState {
    pub commands: SaleCommandHandler,
    pub queries: SaleQueryService,
    pub audit: Arc<dyn AuditLog>,
    pub config: Arc<Config>,
}
