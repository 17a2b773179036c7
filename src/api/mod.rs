//! API layer - HTTP endpoint handlers.

mod events;
mod health;
mod metrics;
mod routes;
mod updates;

// Re-export all handlers for use in server/app.rs
pub use events::{publish_event, PublishResponse};
pub use health::{health, stats, HealthResponse, StatsResponse};
pub use metrics::prometheus_metrics;
pub use routes::api_routes;
pub use updates::{get_updates, list_links, UpdatesQuery};
