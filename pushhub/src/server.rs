//! Node runtime
//!
//! Starts the hub, reports its metrics periodically and tears everything
//! down on Ctrl+C or SIGTERM.

use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, Instrument};

use pushhub_cluster::broker::{Broker, RedisBroker};
use pushhub_cluster::PushHub;
use pushhub_core::Config;

/// How often hub metrics are logged
const METRICS_INTERVAL: Duration = Duration::from_secs(60);

pub struct PushNode {
    hub: Arc<PushHub>,
    redis: Option<Arc<RedisBroker>>,
}

impl PushNode {
    pub fn new(config: &Config, broker: Arc<dyn Broker>, redis: Option<Arc<RedisBroker>>) -> Self {
        Self {
            hub: Arc::new(PushHub::with_defaults(config, broker)),
            redis,
        }
    }

    /// Start the hub and wait for a shutdown signal
    pub async fn run(self) -> anyhow::Result<()> {
        self.hub.start().await?;
        info!(instance_id = %self.hub.instance_id(), "PushHub node ready");

        let metrics_hub = self.hub.clone();
        let task = async move {
            let mut interval = tokio::time::interval(METRICS_INTERVAL);
            // First tick completes immediately
            interval.tick().await;
            loop {
                interval.tick().await;
                let metrics = metrics_hub.metrics();
                info!(
                    active_connections = metrics.active_connections,
                    total_registered = metrics.total_registered,
                    total_disconnected = metrics.total_disconnected,
                    broker_enabled = metrics.broker_enabled,
                    "Hub metrics"
                );
            }
        };
        let metrics_task = tokio::spawn(task.in_current_span());

        shutdown_signal().await;
        info!("Shutdown signal received, starting graceful shutdown...");

        metrics_task.abort();
        self.hub.shutdown();
        if let Some(redis) = &self.redis {
            redis.shutdown();
        }

        info!("PushHub node stopped");
        Ok(())
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => { info!("Received Ctrl+C"); }
        () = terminate => { info!("Received SIGTERM"); }
    }
}
