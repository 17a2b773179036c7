// Shared infrastructure
pub mod config;
pub mod error;
pub mod metrics;
pub mod telemetry;

// Domain
pub mod event;
pub mod feed;
pub mod relay;

// Server side of the pipeline
pub mod connection_manager;
pub mod gateway;
pub mod publisher;
pub mod websocket;

// Application layer
pub mod api;
pub mod server;

// Client side of the pipeline
pub mod client;

// Supporting modules
pub mod shutdown;
pub mod tasks;
