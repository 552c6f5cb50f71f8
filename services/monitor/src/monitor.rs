//! Per-pool polling tasks.

use chain_gateway::{ChainGateway, GatewayError};
use config::PoolConfig;
use ledger::Ledger;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use types::{time, EventKind, PoolId, PriceSnapshot};

use crate::oracle::PriceOracle;

/// Handle to a running pool monitor task.
pub struct MonitorHandle {
    pub pool_id: PoolId,
    pub task: JoinHandle<()>,
}

/// Spawn the polling task for one enabled pool.
///
/// Every tick: read pool state via the gateway, decode, discard reads
/// outside the configured expected price range, ledger the snapshot, publish
/// to the oracle, and nudge the detector. Failures log and wait for the next
/// tick.
pub fn spawn_pool_monitor(
    pool: PoolConfig,
    interval: Duration,
    gateway: Arc<dyn ChainGateway>,
    oracle: Arc<PriceOracle>,
    ledger: Arc<Ledger>,
    updates: mpsc::Sender<PoolId>,
    mut shutdown: watch::Receiver<bool>,
) -> MonitorHandle {
    let pool_id = pool.id.clone();
    let task_pool_id = pool_id.clone();

    let task = tokio::spawn(async move {
        let pool_id = task_pool_id;
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        debug!(pool = %pool_id, "pool monitor stopping");
                        return;
                    }
                }
                _ = ticker.tick() => {}
            }

            match poll_once(&pool, gateway.as_ref(), &oracle, &ledger).await {
                Ok(()) => {
                    // Nudge the detector; a full channel just means a
                    // detection pass is already pending.
                    let _ = updates.try_send(pool_id.clone());
                }
                Err(e) => {
                    warn!(pool = %pool_id, error = %e, "pool poll failed, waiting for next tick");
                }
            }
        }
    });

    MonitorHandle { pool_id, task }
}

async fn poll_once(
    pool: &PoolConfig,
    gateway: &dyn ChainGateway,
    oracle: &PriceOracle,
    ledger: &Ledger,
) -> Result<(), GatewayError> {
    let observation = gateway.read_pool_state(pool.address).await?;
    let now_ns = time::now_ns();

    let snapshot = PriceSnapshot::from_observation(pool.id.clone(), observation, now_ns)
        .map_err(|e| GatewayError::PermanentRpc {
            network: pool.network_id.to_string(),
            message: format!("undecodable pool state for {}: {e}", pool.id),
        })?;

    if let Some(range) = &pool.expected_price_range {
        let quote = snapshot.price.token1_per_token0();
        if quote < range.min || quote > range.max {
            warn!(
                pool = %pool.id,
                %quote,
                min = %range.min,
                max = %range.max,
                "discarding pool read outside expected price range"
            );
            return Ok(());
        }
    }

    // Ledger before the snapshot becomes observable through the oracle.
    ledger
        .append(EventKind::PriceSnapshot {
            pool_id: pool.id.clone(),
            block_number: snapshot.block_number,
            quote: snapshot.price.token1_per_token0(),
        })
        .map_err(|e| GatewayError::PermanentRpc {
            network: pool.network_id.to_string(),
            message: format!("ledger append failed: {e}"),
        })?;

    oracle.publish(snapshot);
    Ok(())
}
