// Shared components
pub mod config;
pub mod error;
pub mod telemetry;

// Domain layer
pub mod connection_manager;
pub mod fanout;
pub mod relay;

// Application layer
pub mod api;
pub mod server;
pub mod websocket;

// Supporting modules
pub mod shutdown;
