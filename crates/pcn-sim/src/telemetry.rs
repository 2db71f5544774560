//! Tracing setup for simulation runs.

use std::sync::Arc;

use pcn_network::SimNetwork;
use pcn_routing::RoutingMessage;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing_subscriber::EnvFilter;

use crate::config::{LogFormat, LoggingConfig};

/// Install the global subscriber. `RUST_LOG` overrides the configured
/// level. Fails if a subscriber is already installed.
pub fn init_tracing(config: &LoggingConfig) -> anyhow::Result<()> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);
    let installed = match config.format {
        LogFormat::Text => builder.try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
    installed.map_err(|e| anyhow::anyhow!("installing tracing subscriber: {e}"))
}

/// Log every packet trace of `network` as a JSON line at trace level.
pub fn spawn_packet_logger(network: &Arc<SimNetwork<RoutingMessage>>) -> JoinHandle<()> {
    let mut traces = network.subscribe();
    tokio::spawn(async move {
        loop {
            match traces.recv().await {
                Ok(trace) => match serde_json::to_string(&trace) {
                    Ok(line) => tracing::trace!(target: "pcn::packets", "{line}"),
                    Err(e) => tracing::warn!(error = %e, "packet trace not serializable"),
                },
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "packet logger fell behind");
                }
                Err(RecvError::Closed) => break,
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pcn_core::NetworkAddress;
    use pcn_network::{NetworkConfig, Socket};
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn test_packet_logger_drains_traces() {
        let network = SimNetwork::<RoutingMessage>::new(NetworkConfig::default());
        let logger = spawn_packet_logger(&network);
        let a = network.connect(NetworkAddress::new("a")).unwrap();
        let _b = network.connect(NetworkAddress::new("b")).unwrap();
        let message = RoutingMessage::from(pcn_routing::TrustMessage::TrustRequest {
            target: pcn_core::WalletAddress::new("b"),
        });
        a.notify(&NetworkAddress::new("b"), message).await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!logger.is_finished());
        logger.abort();
    }

    #[test]
    fn test_second_init_fails() {
        let config = LoggingConfig::default();
        let first = init_tracing(&config);
        let second = init_tracing(&config);
        assert!(first.is_err() || second.is_err());
    }
}
