pub mod command;
pub mod config;
pub mod server;
pub mod session;
pub mod subscription;
pub mod telemetry;
pub mod transport;
