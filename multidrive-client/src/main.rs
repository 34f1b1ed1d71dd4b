use std::path::PathBuf;
use std::sync::Arc;

use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use multidrive_client::config::UploadConfig;
use multidrive_client::resume;
use multidrive_client::{ChunkedUploadDriver, HttpTransport, PartSource, UploadError};
use multidrive_common::types::MultipartOptions;

const DEFAULT_CONFIG_PATH: &str = "upload.toml";
const USAGE: &str = "usage: multidrive-client <file> <remote-key> [config.toml]";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse()?))
        .init();

    let args: Vec<String> = std::env::args().collect();
    let (Some(file), Some(key)) = (args.get(1), args.get(2)) else {
        anyhow::bail!(USAGE);
    };
    let file = PathBuf::from(file);
    let key = key.trim_matches('/').to_string();
    let config_path = args
        .get(3)
        .cloned()
        .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());
    let config = UploadConfig::load(&PathBuf::from(&config_path))?;

    let source = PartSource::open(&file).await?;
    let size = source.len();
    let state_path = resume::state_path_for(&file);
    let previous = match resume::load(&state_path).await? {
        Some(state) if state.matches(&key, size) => {
            info!(upload_id = %state.upload_id, acknowledged = state.acknowledged(), "Resuming previous upload");
            Some(state)
        }
        Some(_) => {
            warn!(path = %state_path.display(), "Discarding resume state for a different key or size");
            resume::remove(&state_path).await?;
            None
        }
        None => None,
    };

    let transport = Arc::new(HttpTransport::new(&config.server_url, config.drive_id.clone()));
    let driver = ChunkedUploadDriver::new(transport, config.driver_options()).with_progress(|e| {
        debug!(part = e.part_number, loaded = e.loaded, total = e.total, "Upload progress");
    });
    let opts = MultipartOptions {
        content_type: Some(
            mime_guess::from_path(&file)
                .first_or_octet_stream()
                .essence_str()
                .to_string(),
        ),
        ..Default::default()
    };

    match driver.upload(source, &key, &opts, previous.as_ref()).await {
        Ok(outcome) => {
            resume::remove(&state_path).await?;
            info!(key = %outcome.key, size = outcome.size, parts = outcome.parts.len(), "Upload finished");
            Ok(())
        }
        Err(e) => {
            if session_gone(&e) {
                warn!("Upload session is no longer valid; the next run starts over");
                resume::remove(&state_path).await?;
            } else if let Some(mut state) = e.resume_state() {
                state.key = Some(key.clone());
                state.size = Some(size);
                resume::save(&state_path, &state).await?;
                warn!(
                    path = %state_path.display(),
                    acknowledged = state.acknowledged(),
                    "Upload interrupted; run the same command again to resume"
                );
            }
            Err(e.into())
        }
    }
}

/// The server no longer knows the upload id (HTTP 410).
fn session_gone(e: &UploadError) -> bool {
    match e {
        UploadError::PartUploadExhausted { source, .. } | UploadError::Complete { source, .. } => {
            source.status() == Some(410)
        }
        _ => false,
    }
}
