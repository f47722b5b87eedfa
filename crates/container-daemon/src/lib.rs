//! Container orchestrator daemon
//!
//! Wires the docker runtime, a record store and the reaper into an
//! [`Orchestrator`] and serves it over WebSocket using the JSON protocol in
//! [`protocol`].

#![warn(missing_docs)]

pub mod config;
pub mod handlers;
pub mod protocol;
pub mod server;

pub use config::DaemonConfig;
pub use handlers::DaemonState;

use anyhow::{Context, Result};
use async_runtime_compat::smol::SmolSpawner;
use container_orchestration::{Orchestrator, Reaper};
use container_runtime::DockerCli;
use container_store::{MemoryStore, RecordStore, SledStore};
use std::sync::Arc;
use tracing::{info, warn};

/// Open the record store: sled under the data directory, or memory
pub async fn open_store(config: &DaemonConfig, ephemeral: bool) -> Result<Arc<dyn RecordStore>> {
    let store: Arc<dyn RecordStore> = if ephemeral {
        info!("Using in-memory record store");
        Arc::new(MemoryStore::new())
    } else {
        let path = config.data_dir().join("records");
        info!("Using record store at {}", path.display());
        Arc::new(
            SledStore::open(&path)
                .await
                .with_context(|| format!("Failed to open record store {}", path.display()))?,
        )
    };

    store.init().await.context("Failed to initialize record store")?;
    Ok(store)
}

/// Run the daemon until the server stops
pub async fn run(config: DaemonConfig, ephemeral: bool) -> Result<()> {
    let store = open_store(&config, ephemeral).await?;
    let runtime = Arc::new(DockerCli::new(config.docker.clone()));
    let orchestrator = Arc::new(Orchestrator::new(
        runtime,
        store,
        config.orchestrator.clone(),
    ));

    match orchestrator
        .runtime()
        .ping(config.orchestrator.call_timeout())
        .await
    {
        Ok(version) => info!("Container runtime {} reachable", version),
        Err(e) => warn!("Container runtime not reachable yet: {}", e),
    }

    let restored = orchestrator
        .recover()
        .await
        .context("Failed to recover container records")?;
    info!("Restored {} port leases", restored);

    let reaper = Reaper::new(orchestrator.clone(), config.orchestrator.reaper.clone())
        .spawn(&SmolSpawner);

    let state = Arc::new(DaemonState {
        orchestrator,
        public_host: config.public_host.clone(),
    });

    let listener = server::bind(&config.listen).await?;
    let result = server::serve(listener, state).await;
    reaper.stop();
    result
}
