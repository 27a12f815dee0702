//! Domain core of the cardano-iris gateway: everything in the
//! specification's §4 component list except the HTTP transport, which
//! lives in the binary crate at the workspace root.

pub mod chainstore;
pub mod codec;
pub mod coinselector;
pub mod error;
pub mod facade;
pub mod mempool;
pub mod model;
pub mod nodebridge;
pub mod paramscache;
pub mod shapes;
pub mod sqlport;
pub mod submit;
pub mod wallet;

use std::sync::Arc;

use chainstore::ChainStore;
use coinselector::CoinSelector;
use error::ChainError;
use mempool::Mempool;
use model::GatewayConfig;
use nodebridge::NodeBridge;
use paramscache::ParametersCache;
use sqlport::SqlPort;

/// Every long-lived subsystem the facade and submission pipeline draw
/// on, bundled behind `Arc` so the HTTP layer can clone one handle per
/// request without re-opening pools or re-reading the chain archive.
///
/// §5's global RW mutex is deliberately not held here: it gates
/// *handlers*, not this struct, so the HTTP layer owns it and acquires
/// the per-subsystem locks inside `chain`/`mempool`/`coin_selector`/
/// `parameters` only after it, per the nesting order in §5.
pub struct Gateway {
    pub config: GatewayConfig,
    pub chain: ChainStore,
    pub mempool: Mempool,
    pub sql: SqlPort,
    pub coin_selector: CoinSelector,
    pub bridge: NodeBridge,
    pub parameters: ParametersCache,
}

impl Gateway {
    pub fn new(
        config: GatewayConfig,
        chain_root: impl AsRef<std::path::Path>,
        database_url: &str,
        bridge: NodeBridge,
    ) -> Result<Arc<Self>, ChainError> {
        Ok(Arc::new(Self {
            config,
            chain: ChainStore::open(chain_root)?,
            mempool: Mempool::new(),
            sql: SqlPort::connect(database_url).map_err(|e| {
                ChainError::Io(std::io::Error::other(e.to_string()))
            })?,
            coin_selector: CoinSelector::new(),
            bridge,
            parameters: ParametersCache::new(),
        }))
    }

    pub fn facade(&self) -> facade::QueryFacade<'_> {
        facade::QueryFacade {
            chain: &self.chain,
            mempool: &self.mempool,
            sql: &self.sql,
            coin_selector: &self.coin_selector,
        }
    }
}
