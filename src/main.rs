//! Command-line artifact fetch tool
//!
//! Loads a configuration file, builds the resolution engine, resolves
//! one artifact and streams its bytes to stdout. The HTTP server sits in
//! the surrounding application; this binary exists for smoke-testing a
//! configuration from the shell.
//!
//! ```bash
//! artifact-relay artifact_relay.yaml storage0 public org/example/lib-1.0.jar > lib-1.0.jar
//! ```

use anyhow::{bail, Context};
use artifact_relay::{LayoutRegistry, RelayConfig, ResolutionEngine};
use http::HeaderMap;
use std::env;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = env::args().skip(1).collect();
    let [config_path, storage_id, repository_id, raw_path] = args.as_slice() else {
        bail!("usage: artifact-relay <config.yaml> <storageId> <repositoryId> <path>");
    };

    info!("Loading configuration from {}", config_path);
    let config = RelayConfig::from_file(config_path)
        .with_context(|| format!("loading configuration from {}", config_path))?;
    info!(
        "Configuration loaded: {} storage(s), upstream timeout {}s",
        config.storages.len(),
        config.request_timeout_secs
    );

    let registry = Arc::new(config.build_registry()?);
    let engine = ResolutionEngine::with_options(
        registry,
        Arc::new(LayoutRegistry::new()),
        Duration::from_secs(config.request_timeout_secs),
    )?;

    let mut stdout = tokio::io::stdout();
    let ack = engine
        .download(
            storage_id,
            repository_id,
            raw_path,
            &HeaderMap::new(),
            &mut stdout,
        )
        .await
        .with_context(|| {
            format!(
                "resolving /{}/{}/{}",
                storage_id, repository_id, raw_path
            )
        })?;

    info!("Streamed {} bytes", ack.bytes_written);
    info!(
        "metrics: {}",
        serde_json::to_string(&engine.metrics()).context("serializing metrics")?
    );
    for stats in engine.pool_stats() {
        info!(
            "pool {}: {}",
            stats.endpoint,
            serde_json::to_string(&stats).context("serializing pool stats")?
        );
    }

    Ok(())
}
