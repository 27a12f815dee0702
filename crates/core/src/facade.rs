//! Query facade (§4.9): the one place that stitches SQL, the mempool
//! overlay, and the chain archive into the shapes the HTTP edge serves.
//!
//! Grounded on `dolos-minibf`'s route handlers (`routes/addresses/...`):
//! read SQL first, merge the mempool view on top, and hand back
//! domain types for the transport layer to encode. This module stays
//! axum-free — the splitting of "facade" from "transport" mirrors the
//! teacher's own `dolos_core::Domain` / `minibf::Facade` split.

use pallas::ledger::addresses::Address;

use crate::chainstore::ChainStore;
use crate::codec::DecodedValue;
use crate::coinselector::{lock_key, CoinSelector};
use crate::error::FacadeError;
use crate::mempool::{filters, Mempool};
use crate::model::{PolicyAsset, SelectRequest, Utxo};
use crate::shapes::{encode_tx_output, encode_value, DatumOption};
use crate::sqlport::SqlPort;

use std::time::Duration;

const SELECTION_LOCK_TTL: Duration = Duration::from_secs(10);

pub struct QueryFacade<'a> {
    pub chain: &'a ChainStore,
    pub mempool: &'a Mempool,
    pub sql: &'a SqlPort,
    pub coin_selector: &'a CoinSelector,
}

impl<'a> QueryFacade<'a> {
    /// Address-UTXOs read path: SQL view with the mempool overlay
    /// merged on top, filtered by asset when one is given.
    pub async fn address_utxos(&self, address: &str, asset: Option<&str>) -> Result<Vec<Utxo>, FacadeError> {
        let base = match asset {
            Some(a) => self.sql.address_utxos_with_asset(address, a).await?,
            None => self.sql.address_utxos(address).await?,
        };
        let filter = match asset {
            Some(a) => filters::asset_at_address(address, a),
            None => filters::all_for_address(address),
        };
        Ok(self.mempool.overlay(base, filter).await)
    }

    /// UTXO by id: mempool view first, falling back to SQL. Returned as-is
    /// whether spent or not — callers inspect `Utxo::is_spent()` and build
    /// the 409 + `Consumed-By` + full-body response themselves (S5), since
    /// that response still needs the UTXO payload this facade holds.
    pub async fn utxo_by_id(&self, tx_id: &str, index: u32) -> Result<Utxo, FacadeError> {
        if let Some(u) = self.mempool.get_utxo(tx_id, index).await {
            return Ok(u);
        }
        self.sql.utxo(tx_id, index).await?.ok_or(FacadeError::NotFound)
    }

    /// Tx-by-id: mempool first (raw tx bytes), else resolve through SQL
    /// block info and read the tx out of the chain archive.
    pub async fn tx_by_id(&self, tx_id: &str) -> Result<Vec<u8>, FacadeError> {
        if let Some(raw) = self.mempool.get_tx(tx_id).await {
            return Ok(raw);
        }
        let info = self.sql.tx_block_info(tx_id).await?.ok_or(FacadeError::NotFound)?;
        Ok(self.chain.block_tx(&info.block_id, info.index as i64).await?)
    }

    pub async fn tx_block(&self, tx_id: &str) -> Result<crate::model::TxBlockInfo, FacadeError> {
        self.sql.tx_block_info(tx_id).await?.ok_or(FacadeError::NotFound)
    }

    pub async fn tx_output(&self, tx_id: &str, index: u32) -> Result<Vec<u8>, FacadeError> {
        let utxo = self.utxo_by_id(tx_id, index).await?;
        Ok(encode_utxo_output(&utxo)?.to_cbor_bytes())
    }

    /// Block/block-tx reads go straight to the chain archive; mempool
    /// is never consulted for them (§5 "No lock").
    pub async fn block(&self, block_id: &str) -> Result<Vec<u8>, FacadeError> {
        Ok(self.chain.block(block_id).await?.raw_cbor)
    }

    pub async fn block_tx(&self, block_id: &str, index: i64) -> Result<Vec<u8>, FacadeError> {
        Ok(self.chain.block_tx(block_id, index).await?)
    }

    pub async fn policy_assets(&self, policy_hex: &str) -> Result<Vec<PolicyAsset>, FacadeError> {
        Ok(self.sql.policy_assets(policy_hex).await?)
    }

    pub async fn asset_addresses(&self, policy_and_name_hex: &str) -> Result<Vec<crate::model::AssetAddress>, FacadeError> {
        Ok(self.sql.asset_addresses(policy_and_name_hex).await?)
    }

    /// Coin selection (write path, §4.9): fetch + overlay, drop locked
    /// UTXOs, sort per the requested algorithm, accumulate greedily,
    /// then lock everything selected for 10s.
    pub async fn select_coins(&self, address: &str, req: &SelectRequest) -> Result<Vec<Utxo>, FacadeError> {
        let target_lovelace: i128 = req.lovelace.parse().unwrap_or(0);
        let min_quantity: i128 = req.min_quantity.as_deref().and_then(|s| s.parse().ok()).unwrap_or(0);

        let mut candidates = self.address_utxos(address, req.asset.as_deref()).await?;

        self.coin_selector.prune_expired().await;
        let mut kept = Vec::with_capacity(candidates.len());
        for utxo in candidates.drain(..) {
            let key = lock_key(&utxo.tx_id, utxo.output_index);
            if !self.coin_selector.is_locked(&key).await {
                kept.push(utxo);
            }
        }

        let descending = matches!(req.algorithm.as_deref(), Some("largest") | Some("largest-first"));
        kept.sort_by_key(|u| u.lovelace.parse::<i128>().unwrap_or(0));
        if descending {
            kept.reverse();
        }

        let mut selected = Vec::new();
        let mut got_lovelace: i128 = 0;
        let mut got_asset: i128 = 0;
        for utxo in kept {
            if got_lovelace >= target_lovelace && (req.asset.is_none() || got_asset >= min_quantity) {
                break;
            }
            got_lovelace += utxo.lovelace.parse::<i128>().unwrap_or(0);
            if let Some(asset) = &req.asset {
                got_asset += utxo
                    .assets
                    .iter()
                    .filter(|a| crate::sqlport::asciifold(&a.asset) == crate::sqlport::asciifold(asset))
                    .filter_map(|a| a.quantity.parse::<i128>().ok())
                    .sum::<i128>();
            }
            selected.push(utxo);
        }

        if got_lovelace < target_lovelace || (req.asset.is_some() && got_asset < min_quantity) {
            return Err(FacadeError::InsufficientFunds);
        }

        for utxo in &selected {
            let key = lock_key(&utxo.tx_id, utxo.output_index);
            self.coin_selector.lock(&key, SELECTION_LOCK_TTL).await;
        }

        Ok(selected)
    }
}

/// `tuple(tuple(txIdBytes, index), txOutputObject)`, the element shape
/// of the CBOR address-UTXOs response (§4.9).
pub fn encode_utxo_cbor_entry(utxo: &Utxo) -> Result<DecodedValue, FacadeError> {
    let tx_id_bytes = hex::decode(&utxo.tx_id).map_err(|_| FacadeError::Codec(crate::error::CodecError::Malformed("tx id is not hex".into())))?;
    let key = DecodedValue::tuple(vec![
        DecodedValue::bytes(tx_id_bytes),
        DecodedValue::int(utxo.output_index as i64),
    ]);
    Ok(DecodedValue::tuple(vec![key, encode_utxo_output(utxo)?]))
}

fn encode_utxo_output(utxo: &Utxo) -> Result<DecodedValue, FacadeError> {
    let address = Address::from_bech32(&utxo.address)
        .map_err(|_| FacadeError::InvalidAddress)?
        .to_vec();
    let lovelace: num_bigint::BigInt = utxo.lovelace.parse().unwrap_or_default();
    let multiasset = utxo
        .assets
        .iter()
        .map(|a| {
            let raw = hex::decode(&a.asset).unwrap_or_default();
            let policy = raw.get(..28).unwrap_or(&[]).to_vec();
            let name = raw.get(28..).unwrap_or(&[]).to_vec();
            (policy, vec![(name, a.quantity.parse().unwrap_or_default())])
        })
        .collect();
    let value = encode_value(&lovelace, &multiasset);
    let datum = utxo
        .inline_datum
        .as_ref()
        .map(|d| hex::decode(d).unwrap_or_default())
        .map(DatumOption::Inline)
        .or_else(|| utxo.datum_hash.as_ref().map(|h| hex::decode(h).unwrap_or_default()).map(DatumOption::Hash));
    let ref_script = utxo
        .ref_script
        .as_ref()
        .map(|rs| hex::decode(rs).unwrap_or_default())
        .map(|bytes| crate::shapes::encode_ref_script(&bytes));
    Ok(encode_tx_output(&address, value, datum, ref_script))
}

/// Addresses must begin with the network's prefix (§6 "Address
/// validity"); anything else is a 404 at the HTTP edge.
pub fn is_valid_address(address: &str, network: crate::model::Network) -> bool {
    address.starts_with(network.address_prefix())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Network;

    #[test]
    fn valid_address_requires_network_prefix() {
        assert!(is_valid_address("addr_test1vqzkxpwrnvu3ylqvj6wupde0pjk4w28zu9893wu55z4upfc2504tp", Network::Preprod));
        assert!(!is_valid_address("addr1vqzkxpwrnvu3ylqvj6wupde0pjk4w28zu9893wu55z4upfc2504tp", Network::Preprod));
        assert!(!is_valid_address("not-an-address", Network::Mainnet));
    }

    #[test]
    fn encode_utxo_cbor_entry_rejects_non_hex_tx_id() {
        let utxo = Utxo {
            tx_id: "not-hex".into(),
            output_index: 0,
            address: "addr_test1vqzkxpwrnvu3ylqvj6wupde0pjk4w28zu9893wu55z4upfc2504tp".into(),
            lovelace: "1000000".into(),
            assets: vec![],
            datum_hash: None,
            inline_datum: None,
            ref_script: None,
            consumed_by: None,
        };
        assert!(encode_utxo_cbor_entry(&utxo).is_err());
    }
}
