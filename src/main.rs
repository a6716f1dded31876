//! reflectord: audio reflector daemon
//!
//! Usage: `reflectord [CONFIG]` where CONFIG defaults to
//! `reflector.toml` in the working directory. Log verbosity follows
//! `RUST_LOG`.

use std::path::PathBuf;
use std::process::ExitCode;

use tracing_subscriber::EnvFilter;

use reflector::server::{ReflectorServer, ServerConfig};

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("reflector.toml"));

    let cfg = match ServerConfig::load(&config_path) {
        Ok(cfg) => cfg,
        Err(e) => {
            tracing::error!(path = %config_path.display(), error = %e, "cannot load configuration");
            return ExitCode::FAILURE;
        }
    };

    let server = ReflectorServer::new(cfg);
    tokio::select! {
        result = server.run() => {
            if let Err(e) = result {
                tracing::error!(error = %e, "server failed");
                return ExitCode::FAILURE;
            }
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutting down");
        }
    }
    ExitCode::SUCCESS
}
