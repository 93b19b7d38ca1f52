pub mod cli;
pub mod config;
pub mod coordinator;
pub mod protocol;
pub mod registry;
pub mod server;
pub mod session;
pub mod telemetry;
pub mod websocket;
