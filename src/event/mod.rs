//! Change events carried by the notification pipeline.
//!
//! Every event is a tagged union over four kinds, each with its own payload:
//!
//! - `created` / `updated`: the full [`LinkRecord`]
//! - `deleted`: the [`DeletedLink`] id and label
//! - `initial_state_snapshot`: the ordered current collection
//!
//! On the wire an event is `{"type", "payload", "timestamp", "id"}`.

mod record;
mod types;

pub use record::{DeletedLink, LinkRecord};
pub use types::{Event, EventBody, EventDraft, EventError, EventKind};

/// Get current time in milliseconds since epoch
pub fn current_time_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
