mod backend;
mod config;
mod config_store;
mod handlers;
mod resolver;
mod routes;
mod state;
mod upload;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::EnvFilter;

use backend::directory::DirectoryBucket;
use backend::native::NativeBindings;
use config::ServerConfig;
use config_store::{ConfigStore, DEFAULT_TTL};
use resolver::{BackendResolver, EnvLayer};
use state::AppState;

const DEFAULT_DATA_DIR: &str = "/var/lib/multidrive";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse()?))
        .init();

    info!("multidrive-server starting");

    let mut config = match std::env::var("MULTIDRIVE_CONFIG") {
        Ok(path) => ServerConfig::load(&PathBuf::from(path))?,
        Err(_) => {
            let data_dir = PathBuf::from(
                std::env::var("MULTIDRIVE_DATA_DIR").unwrap_or_else(|_| DEFAULT_DATA_DIR.to_string()),
            );
            ServerConfig::with_data_dir(&data_dir)
        }
    };
    if let Some(port) = std::env::var("MULTIDRIVE_PORT").ok().and_then(|p| p.parse().ok()) {
        config.listen_port = port;
    }

    let mut bindings = NativeBindings::new();
    for (name, dir) in &config.bindings {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("creating bucket directory {}", dir.display()))?;
        bindings.insert(name.clone(), Arc::new(DirectoryBucket::new(dir)));
        info!(binding = %name, dir = %dir.display(), "Native binding ready");
    }

    let resolver = BackendResolver::new(EnvLayer::from_process(), bindings);
    info!(bindings = ?resolver.bindings().names(), "Backend resolver ready");
    let config_store = match &config.storage_config_path {
        Some(path) => ConfigStore::new(Some(path.clone()), DEFAULT_TTL),
        None => ConfigStore::disabled(),
    };
    // A broken persisted config is fatal at startup.
    config_store.load().await?;

    let state = Arc::new(AppState::new(resolver, config_store, config.admin_token.clone()));
    let app = routes::build_router(state).layer(TraceLayer::new_for_http());

    let addr = SocketAddr::from(([0, 0, 0, 0], config.listen_port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(port = config.listen_port, "Listening on http://0.0.0.0:{}", config.listen_port);
    axum::serve(listener, app).await?;

    Ok(())
}
