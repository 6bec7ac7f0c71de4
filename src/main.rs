use std::sync::Arc;

use tracing_subscriber::EnvFilter;

use proctor_session::api;
use proctor_session::config::{Config, LogFormat};
use proctor_session::proctoring::ProctorManager;
use proctor_session::storage;

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);

    match format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Text => builder.init(),
    }
}

#[tokio::main]
async fn main() {
    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            std::process::exit(1);
        }
    };
    init_tracing(config.logging.format);

    let (durable, backup) = match storage::from_config(&config.storage) {
        Ok(stores) => stores,
        Err(e) => {
            tracing::error!(error = %e, "Failed to set up session storage");
            std::process::exit(1);
        }
    };
    let manager = Arc::new(ProctorManager::new(durable, backup));

    let addr = config.bind_address();
    tracing::info!(host = %config.server.host, port = config.server.port, "Starting proctoring server");

    warp::serve(api::routes(manager)).run(addr).await;
}
