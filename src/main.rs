use dex_sync::chain::{ChainConnector, RpcChainClient};
use dex_sync::config::EngineConfig;
use dex_sync::decoder::AbiEventDecoder;
use dex_sync::publisher::BroadcastPublisher;
use dex_sync::store::{LocalStore, MemoryStore, StatePersistenceService};
use dex_sync::sync::SyncOrchestrator;

use std::error::Error;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tracing::{debug, error, info, warn};

#[tokio::main]
async fn main() {
	tracing_subscriber::fmt()
		.with_env_filter(
			tracing_subscriber::EnvFilter::from_default_env()
				.add_directive(tracing::Level::INFO.into()),
		)
		.with_target(false)
		.with_thread_ids(false)
		.with_thread_names(false)
		.with_file(false)
		.with_line_number(false)
		.with_timer(tracing_subscriber::fmt::time::time())
		.init();

	if let Err(e) = run().await {
		error!("Sync engine stopped: {}", e);
		std::process::exit(1);
	}
}

async fn run() -> Result<(), Box<dyn Error + Send + Sync>> {
	info!("Starting exchange sync engine");
	let config = Arc::new(EngineConfig::from_env()?);

	let chain: Arc<dyn ChainConnector> = Arc::new(RpcChainClient::new(
		config.rpc_url.clone(),
		config.rpc_user.clone(),
		config.rpc_password.clone(),
		Duration::from_secs(config.request_timeout_secs),
	)?);
	info!("Created chain client for {}", config.rpc_url);

	let persistence = Arc::new(StatePersistenceService::new(config.data_dir.clone()));
	let memory = if config.enable_persistence {
		match persistence.restore_store().await? {
			Some((store, height)) => {
				info!("Resuming after block {}", height);
				Arc::new(store)
			}
			None => {
				info!("No snapshot found, syncing from the deployment block");
				Arc::new(MemoryStore::new())
			}
		}
	} else {
		info!("Persistence disabled, syncing from the deployment block");
		Arc::new(MemoryStore::new())
	};
	let store: Arc<dyn LocalStore> = memory.clone();

	let publisher = Arc::new(BroadcastPublisher::new(1024));
	let mut notifications = publisher.subscribe();
	tokio::spawn(async move {
		loop {
			match notifications.recv().await {
				Ok(notification) => debug!("Published {}", notification.topic()),
				Err(broadcast::error::RecvError::Lagged(skipped)) => {
					warn!("Notification log lagged, skipped {}", skipped)
				}
				Err(broadcast::error::RecvError::Closed) => break,
			}
		}
	});

	let mut orchestrator = SyncOrchestrator::new(
		chain,
		store,
		publisher,
		Arc::new(AbiEventDecoder::new()),
		config.clone(),
	);
	if config.enable_persistence {
		orchestrator = orchestrator.with_persistence(persistence, memory);
	}

	let (shutdown_tx, shutdown_rx) = watch::channel(false);
	tokio::spawn(async move {
		match tokio::signal::ctrl_c().await {
			Ok(()) => info!("Shutdown requested, finishing current cycle"),
			Err(e) => error!("Failed to listen for shutdown signal: {}", e),
		}
		let _ = shutdown_tx.send(true);
	});

	orchestrator.run(shutdown_rx).await;
	info!("Sync engine stopped");
	Ok(())
}
