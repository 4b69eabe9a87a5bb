//! HTTP application wiring (Axum router + shared state).
//!
//! - `routes/`: handlers, one file per area
//! - `dto.rs`: request bodies and response mapping
//! - `errors.rs`: consistent error responses

use std::sync::Arc;
use std::time::Instant;

use axum::{Extension, Router, routing::get};
use tower::ServiceBuilder;

use rigger_infra::Clock;
use rigger_infra::queue::QueueService;
use rigger_infra::store::MarketplaceStore;

pub mod dto;
pub mod errors;
pub mod routes;

/// Services shared by every handler.
pub struct AppState {
    pub store: Arc<dyn MarketplaceStore>,
    pub queues: QueueService,
    pub clock: Arc<dyn Clock>,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(
        store: Arc<dyn MarketplaceStore>,
        queues: QueueService,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            queues,
            clock,
            started_at: Instant::now(),
        }
    }
}

/// Build the full HTTP router.
pub fn build_app(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(routes::system::health))
        .route("/health/detailed", get(routes::system::health_detailed))
        .nest("/api", routes::router())
        .layer(ServiceBuilder::new().layer(Extension(state)))
}
