//! Registry of live client connections owned by this process.

mod registry;
mod stats;
mod types;

pub use registry::ConnectionRegistry;
pub use stats::{ConnectionStats, FanoutResult};
pub use types::{ConnectionHandle, ConnectionState, SendError};
