mod settings;

pub use settings::{
    ClientConfig, FeedConfig, OtelConfig, PublisherConfig, RelayConfig, ServerConfig, Settings,
    WebSocketConfig,
};
