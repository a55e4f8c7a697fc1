//! Foreground reinsertion loop

use std::future::Future;
use std::io::Write;
use std::sync::Arc;

use anyhow::Result;
use lifeline_config::Config;
use lifeline_keeper::memory::MemoryNetwork;
use lifeline_keeper::{ContentClient, EngineHandle, EngineSettings, ReinsertionEngine};
use tracing::info;

use super::Workspace;

/// Content store the engine talks to
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Store {
    /// In-process store that starts empty; for dry runs
    Memory,
}

impl Store {
    pub fn connect(self) -> Arc<dyn ContentClient> {
        match self {
            Store::Memory => Arc::new(MemoryNetwork::new()),
        }
    }
}

/// Run the engine over every tracked document until `shutdown` resolves
pub async fn execute(
    config: &Config,
    client: Arc<dyn ContentClient>,
    shutdown: impl Future<Output = ()>,
    out: &mut impl Write,
) -> Result<()> {
    let workspace = Workspace::open(config)?;
    let documents = workspace.tracker.document_ids().len();
    let tracker = Arc::new(workspace.tracker);
    let engine = Arc::new(ReinsertionEngine::new(
        EngineSettings::from(config),
        client,
        tracker,
    ));

    let handle = EngineHandle::new();
    handle.start(engine.clone()).await;
    writeln!(out, "Keeping {} documents alive", documents)?;
    writeln!(out, "Press Ctrl+C to stop")?;
    out.flush()?;

    shutdown.await;
    info!("Received shutdown signal");
    handle.stop().await;

    let stats = engine.metrics().stats();
    writeln!(
        out,
        "Stopped after {} finished passes ({} failed)",
        stats.passes_finished, stats.passes_failed
    )?;
    Ok(())
}

/// Resolves on Ctrl+C
pub async fn ctrl_c() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for ctrl-c: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lifeline_keeper::BlockCount;
    use std::time::Duration;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_run_reinserts_until_shutdown() {
        let dir = TempDir::new().unwrap();
        let mut config = Config::default();
        config.storage.state_dir = dir.path().to_path_buf();

        let network = Arc::new(MemoryNetwork::new());
        let root = network.publish_text("kept alive");
        let id = Workspace::open(&config)
            .unwrap()
            .tracker
            .add_document(root.clone())
            .unwrap();

        let shutdown = {
            let network = network.clone();
            async move {
                while network.inserts().is_empty() {
                    tokio::time::sleep(Duration::from_millis(10)).await;
                }
            }
        };
        let mut out = Vec::new();
        tokio::time::timeout(
            Duration::from_secs(10),
            execute(&config, network.clone(), shutdown, &mut out),
        )
        .await
        .unwrap()
        .unwrap();

        let text = String::from_utf8(out).unwrap();
        assert!(text.starts_with("Keeping 1 documents alive\n"));
        assert!(text.contains("Stopped after"));
        assert_eq!(network.inserts()[0].0, root);

        let record = Workspace::open(&config).unwrap().tracker.document(id).unwrap();
        assert_eq!(record.block_count, BlockCount::Known(1));
    }

    #[tokio::test]
    async fn test_memory_store_starts_empty() {
        let client = Store::Memory.connect();
        let key = MemoryNetwork::key_for(b"anything");
        assert!(client.fetch(&key, false).await.is_err());
    }
}
