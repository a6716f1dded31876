//! Server configuration and socket plumbing

pub mod config;
pub mod listener;

pub use config::{ServerConfig, VadSettings};
pub use listener::ReflectorServer;
