mod server;

use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;
use tracing::{info, Instrument};

use pushhub_cluster::broker::{Broker, MemoryBroker, RedisBroker};
use pushhub_core::config::BrokerConfig;
use pushhub_core::{logging, BrokerKind, Config};

use server::PushNode;

#[derive(Parser, Debug)]
#[command(name = "pushhub")]
#[command(about = "Clustered server-push hub", long_about = None)]
struct Args {
    /// Configuration file (TOML, YAML or JSON)
    #[arg(short, long, env = "PUSHHUB_CONFIG")]
    config: Option<String>,
}

/// Host name carried by the root log span
fn node_name() -> String {
    hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "unknown".to_string())
}

type Brokers = (Arc<dyn Broker>, Option<Arc<RedisBroker>>);

/// Build the broker named by `broker.kind`.
///
/// `broker.enabled` only gates publishing, so a node that does not publish
/// still subscribes to the shared broker and receives its siblings' records.
fn connect_broker(config: &BrokerConfig) -> Result<Brokers> {
    match config.kind {
        BrokerKind::Redis => {
            let redis = Arc::new(
                RedisBroker::new(&config.url, config.timeout())
                    .context("Failed to create Redis broker")?,
            );
            info!(url = %config.url, publishing = config.enabled, "Using Redis broker");
            Ok((redis.clone() as Arc<dyn Broker>, Some(redis)))
        }
        BrokerKind::Memory => {
            info!("Using in-process broker (single-node mode)");
            Ok((Arc::new(MemoryBroker::new()) as Arc<dyn Broker>, None))
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // 1. Load configuration
    let config = Config::load(args.config.as_deref()).context("Failed to load configuration")?;

    // 2. Validate configuration (fail fast on misconfigurations)
    if let Err(errors) = config.validate() {
        for e in &errors {
            eprintln!("Config validation error: {e}");
        }
        return Err(anyhow::anyhow!(
            "Configuration validation failed with {} error(s)",
            errors.len()
        ));
    }

    // 3. Initialize logging
    logging::init_logging(&config.logging)?;
    let node_span = logging::node_span(&node_name());

    // 4. Connect the broker
    let (broker, redis) = node_span.in_scope(|| {
        info!("PushHub node starting...");
        connect_broker(&config.broker)
    })?;

    // 5. Run until shutdown
    PushNode::new(&config, broker, redis)
        .run()
        .instrument(node_span)
        .await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_publish_disabled_node_still_uses_shared_broker() {
        let config = BrokerConfig {
            enabled: false,
            ..BrokerConfig::default()
        };

        let (_broker, redis) = connect_broker(&config).unwrap();
        assert!(redis.is_some());
    }

    #[test]
    fn test_memory_kind_uses_in_process_broker() {
        let config = BrokerConfig {
            kind: BrokerKind::Memory,
            enabled: true,
            ..BrokerConfig::default()
        };

        let (_broker, redis) = connect_broker(&config).unwrap();
        assert!(redis.is_none());
    }
}
