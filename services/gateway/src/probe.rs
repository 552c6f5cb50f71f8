//! Per-network health probe task.
//!
//! Periodically exercises the cheapest RPC call. On a degraded network a
//! success flips the gateway back to healthy; transitions in either
//! direction are reported so the engine can ledger them and the executor can
//! gate submissions.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use types::{NetworkHealth, NetworkId};

use crate::ChainGateway;

/// Spawn the probe loop for one gateway. Health transitions are sent as
/// `(network, new_health)`; the receiver is responsible for ledgering them.
pub fn spawn_health_probe<G>(
    gateway: Arc<G>,
    interval: Duration,
    transitions: mpsc::UnboundedSender<(NetworkId, NetworkHealth)>,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()>
where
    G: ChainGateway + ?Sized + 'static,
{
    tokio::spawn(async move {
        let network = gateway.network().clone();
        let mut last = gateway.health();

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        debug!(%network, "health probe stopping");
                        return;
                    }
                }
                _ = tokio::time::sleep(interval) => {}
            }

            // The call itself maintains the gateway's health state.
            let result = gateway.block_number().await;
            let current = gateway.health();

            if current != last {
                match current {
                    NetworkHealth::Healthy => {
                        info!(%network, "network health restored")
                    }
                    NetworkHealth::Degraded => {
                        warn!(%network, error = ?result.err().map(|e| e.to_string()), "network degraded")
                    }
                }
                if transitions.send((network.clone(), current)).is_err() {
                    return;
                }
                last = current;
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockGateway;

    #[tokio::test(start_paused = true)]
    async fn probe_reports_degradation_and_recovery() {
        let gateway = Arc::new(MockGateway::new(NetworkId::new("polygon")));
        let (tx, mut rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let handle =
            spawn_health_probe(gateway.clone(), Duration::from_secs(5), tx, shutdown_rx);

        gateway.set_health(NetworkHealth::Degraded);
        gateway.fail_rpc(true);
        tokio::time::sleep(Duration::from_secs(6)).await;
        let (network, health) = rx.recv().await.unwrap();
        assert_eq!(network, NetworkId::new("polygon"));
        assert_eq!(health, NetworkHealth::Degraded);

        gateway.fail_rpc(false);
        tokio::time::sleep(Duration::from_secs(6)).await;
        let (_, health) = rx.recv().await.unwrap();
        assert_eq!(health, NetworkHealth::Healthy);

        shutdown_tx.send(true).unwrap();
        handle.await.unwrap();
    }
}
