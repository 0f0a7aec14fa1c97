use std::sync::Arc;

use tokio::sync::mpsc;

use seine_common::config::AppConfig;
use seine_common::types::SyncEvent;
use seine_filters::{BlockFilter, Filter, Sources};
use seine_sync::pipeline::Pipeline;
use seine_sync::poller::Poller;
use seine_sync::rpc::{HttpRpc, RpcClient};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "seine_sync=info,seine_filters=info".into()),
        )
        .json()
        .init();

    tracing::info!("Seine sync starting...");

    // Load configuration
    let config = AppConfig::from_env()?;
    let network = config.network();

    // Load declared sources, or fall back to emitting every block
    let sources = match &config.sources_path {
        Some(path) => {
            let raw = std::fs::read_to_string(path)?;
            let sources = Sources::from_json(&raw)?;
            tracing::info!(
                filters = sources.filters.len(),
                factories = sources.factories.len(),
                "Loaded sources"
            );
            sources
        }
        None => {
            tracing::info!("No SOURCES_PATH set, emitting an event for every block");
            Sources::new(vec![Filter::Block(BlockFilter {
                chain_id: config.chain_id,
                from_block: None,
                to_block: None,
                interval: 1,
                offset: 0,
            })])
        }
    };

    // Seed the initial finalized block from the current head
    let rpc = Arc::new(HttpRpc::new(&config.rpc_url)?);
    let latest = rpc.get_latest_block().await?;
    let finalized = latest.as_light();
    tracing::info!(
        chain = %network.name,
        block = finalized.number,
        hash = %finalized.hash,
        "Seeded finalized block from latest head"
    );

    let (blocks_tx, blocks_rx) = mpsc::channel(64);
    let (events_tx, mut events_rx) = mpsc::channel(1024);

    let pipeline = Pipeline::new(
        network.clone(),
        rpc.clone(),
        sources,
        finalized,
        blocks_rx,
        events_tx,
    );
    let poller = Poller::new(rpc, network, blocks_tx);

    let mut pipeline_task = tokio::spawn(pipeline.run());
    let mut poller_task = tokio::spawn(poller.run());
    let sink_task = tokio::spawn(async move {
        while let Some(event) = events_rx.recv().await {
            match event {
                SyncEvent::Block { block, events, .. } => {
                    tracing::info!(block = block.number, events = events.len(), "Block");
                }
                SyncEvent::Finalize { block } => {
                    tracing::info!(block = block.number, "Finalized");
                }
                SyncEvent::Reorg {
                    common_ancestor,
                    reorged_blocks,
                } => {
                    tracing::warn!(
                        common_ancestor = common_ancestor.number,
                        depth = reorged_blocks.len(),
                        "Reorg"
                    );
                }
            }
        }
    });

    // Run with graceful shutdown on Ctrl+C
    tokio::select! {
        result = &mut pipeline_task => {
            match result {
                Ok(Ok(())) => tracing::info!("Pipeline stopped"),
                Ok(Err(err)) => {
                    tracing::error!(error = %err, "Pipeline exited with fatal error");
                    return Err(err.into());
                }
                Err(err) => return Err(err.into()),
            }
        }
        result = &mut poller_task => {
            match result {
                Ok(Ok(())) => tracing::info!("Poller stopped"),
                Ok(Err(err)) => {
                    tracing::error!(error = %err, "Poller exited with fatal error");
                    return Err(err.into());
                }
                Err(err) => return Err(err.into()),
            }
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Received shutdown signal, stopping gracefully...");
        }
    }

    pipeline_task.abort();
    poller_task.abort();
    sink_task.abort();

    tracing::info!("Seine sync stopped.");
    Ok(())
}
