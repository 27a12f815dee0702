//! Epoch-scoped TTL cache of protocol parameters (§4.7).
//!
//! Grounded on `dolos-minibf`'s `CacheService` (`cache.rs`): an
//! `RwLock`-guarded entry with a TTL check on the read path and a
//! refetch-and-store path on the write path. The spec's cache only
//! ever holds one value type, so this is the single-entry
//! simplification of that generic type-keyed map.

use std::time::{Duration, SystemTime};

use tokio::sync::RwLock;

use crate::error::NodeBridgeError;
use crate::model::GatewayConfig;
use crate::nodebridge::{NodeBridge, NormalizedParameters};
use crate::sqlport::SqlPort;

/// Shelley-era epoch length in slots, used only to size the cache TTL
/// (§9 "secondsPerSlot = 1" already documents this module's horizon as
/// Shelley-era; epoch length follows the same assumption).
const SLOTS_PER_EPOCH: u64 = 432_000;

struct Cached {
    params: NormalizedParameters,
    ttl: SystemTime,
}

#[derive(Default)]
pub struct ParametersCache {
    entry: RwLock<Option<Cached>>,
}

impl ParametersCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(
        &self,
        bridge: &NodeBridge,
        sql: &SqlPort,
        config: &GatewayConfig,
    ) -> Result<NormalizedParameters, NodeBridgeError> {
        {
            let guard = self.entry.read().await;
            if let Some(cached) = guard.as_ref() {
                if SystemTime::now() < cached.ttl {
                    return Ok(cached.params.clone());
                }
            }
        }

        let mut guard = self.entry.write().await;
        if let Some(cached) = guard.as_ref() {
            if SystemTime::now() < cached.ttl {
                return Ok(cached.params.clone());
            }
        }

        let mut params = bridge.normalized_parameters().await?;
        params.collateral_utxo_id = Self::attach_collateral(sql, config, &params).await;

        let slots_to_epoch_end = SLOTS_PER_EPOCH - (params.ref_tip_slot % SLOTS_PER_EPOCH);
        let ttl = SystemTime::now() + Duration::from_secs(slots_to_epoch_end);
        *guard = Some(Cached { params: params.clone(), ttl });
        Ok(params)
    }

    /// Attaches the configured collateral UTXO id only if it is still
    /// unconsumed and sitting at the wallet's own address.
    async fn attach_collateral(
        sql: &SqlPort,
        config: &GatewayConfig,
        _params: &NormalizedParameters,
    ) -> Option<String> {
        let (tx_hex, index) = config.collateral_parts()?;
        let wallet_address = crate::wallet::enterprise_address(config).ok()?;
        let utxo = sql.utxo(&tx_hex, index).await.ok()??;
        if utxo.is_spent() {
            return None;
        }
        if utxo.address != wallet_address {
            return None;
        }
        Some(format!("{tx_hex}{index}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slots_per_epoch_is_positive() {
        assert!(SLOTS_PER_EPOCH > 0);
    }
}
