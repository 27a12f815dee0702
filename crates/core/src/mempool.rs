//! In-memory store of recently submitted, not-yet-confirmed
//! transactions (§4.3): TTL- and confirmation-based eviction, plus a
//! UTXO overlay merged on top of SQL-sourced views.
//!
//! Transaction fields (hash, produced outputs, consumed inputs) are
//! read through `pallas::ledger::traverse::MultiEraTx`, the same
//! typed traversal `dolos-cardano` uses in `utxoset.rs` — the hand
//! rolled codec (§4.1) is reserved for shape-level work (splice,
//! output encoding), not for re-deriving ledger-typed tx semantics.

use std::collections::HashMap;
use std::time::{Duration, SystemTime};

use num_bigint::BigInt;
use pallas::ledger::traverse::MultiEraTx;
use tokio::sync::RwLock;

use crate::error::MempoolError;
use crate::model::{PolicyAsset, Utxo};
use crate::sqlport::{asciifold, SqlPort};

pub struct MempoolEntry {
    pub raw_tx: Vec<u8>,
    pub submitted_at: SystemTime,
    pub ttl: SystemTime,
}

impl MempoolEntry {
    fn tx(&self) -> Option<MultiEraTx<'_>> {
        MultiEraTx::decode(&self.raw_tx).ok()
    }
}

pub struct Mempool {
    entries: RwLock<HashMap<String, MempoolEntry>>,
}

impl Default for Mempool {
    fn default() -> Self {
        Self::new()
    }
}

impl Mempool {
    pub fn new() -> Self {
        Self { entries: RwLock::new(HashMap::new()) }
    }

    /// `AddTx(tx, ttlDeadline)`: computes `txID = tx.Hash()`; stores
    /// `{tx, submittedAt=now, ttl=ttlDeadline}`. Replacement is
    /// allowed (same key overwrites).
    pub async fn add_tx(&self, raw_tx: Vec<u8>, ttl_deadline: SystemTime) -> Option<String> {
        let tx_id = {
            let tx = MultiEraTx::decode(&raw_tx).ok()?;
            hex::encode(tx.hash())
        };
        let entry = MempoolEntry { raw_tx, submitted_at: SystemTime::now(), ttl: ttl_deadline };
        self.entries.write().await.insert(tx_id.clone(), entry);
        Some(tx_id)
    }

    pub async fn get_tx(&self, tx_id: &str) -> Option<Vec<u8>> {
        self.entries.read().await.get(tx_id).map(|e| e.raw_tx.clone())
    }

    /// `GetUTXO(txID, index)`: searches every stored tx's produced
    /// outputs for the matching key; last writer wins, i.e. later
    /// insertion order takes precedence on a tie (there should be at
    /// most one writer of any given key in practice).
    pub async fn get_utxo(&self, tx_id: &str, index: u32) -> Option<Utxo> {
        let entries = self.entries.read().await;
        let mut found = None;
        for entry in entries.values() {
            let Some(tx) = entry.tx() else { continue };
            if hex::encode(tx.hash()) != tx_id {
                continue;
            }
            if let Some(output) = tx.output_at(index as usize) {
                found = Some(to_utxo(tx_id, index, &output));
            }
        }
        found
    }

    /// Two-pass pruning (§4.3): expired entries first, then entries
    /// confirmed on-chain (skipped entirely if the SQL call fails, so
    /// a transient outage never evicts on stale information).
    pub async fn prune(&self, sql: &SqlPort) -> Result<(), MempoolError> {
        let now = SystemTime::now();
        let mut entries = self.entries.write().await;
        entries.retain(|_, e| e.ttl > now);

        let remaining: Vec<String> = entries.keys().cloned().collect();
        if remaining.is_empty() {
            return Ok(());
        }
        match sql.filter_missing_txs(&remaining).await {
            Ok(missing) => {
                let missing: std::collections::HashSet<_> = missing.into_iter().collect();
                entries.retain(|id, _| missing.contains(id));
                Ok(())
            }
            Err(_) => Ok(()),
        }
    }

    /// `Hashes()`: every stored tx id, in arbitrary order (the facade
    /// sorts them for the `/api/mempool` response).
    pub async fn hashes(&self) -> Vec<String> {
        self.entries.read().await.keys().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    /// `Overlay(base, filter)`: keys `base` by `(txID, outputIndex)`,
    /// then for every mempool tx adds filtered produced outputs not
    /// already present and removes consumed inputs, processing both
    /// passes per entry so a self-spend within one tx never survives.
    pub async fn overlay(&self, base: Vec<Utxo>, filter: impl Fn(&Utxo) -> bool) -> Vec<Utxo> {
        let mut keyed: HashMap<(String, u32), Utxo> = base.into_iter().map(|u| (u.key(), u)).collect();

        let entries = self.entries.read().await;
        for entry in entries.values() {
            let Some(tx) = entry.tx() else { continue };
            let tx_id = hex::encode(tx.hash());

            for (index, output) in tx.outputs().iter().enumerate() {
                let utxo = to_utxo(&tx_id, index as u32, output);
                if filter(&utxo) {
                    keyed.entry(utxo.key()).or_insert(utxo);
                }
            }
            for input in tx.inputs() {
                let key = (hex::encode(input.hash()), input.index() as u32);
                keyed.remove(&key);
            }
        }

        keyed.into_values().collect()
    }
}

fn to_utxo(tx_id: &str, index: u32, output: &pallas::ledger::traverse::MultiEraOutput<'_>) -> Utxo {
    let address = output
        .address()
        .map(|a| a.to_string())
        .unwrap_or_default();
    let value = output.value();
    let assets = value
        .assets()
        .iter()
        .flat_map(|bundle| {
            let policy = hex::encode(bundle.policy());
            bundle
                .assets()
                .into_iter()
                .map(move |a| PolicyAsset {
                    asset: format!("{}{}", policy, hex::encode(a.name())),
                    quantity: a.output_coin().unwrap_or(0).to_string(),
                })
        })
        .collect();

    Utxo {
        tx_id: tx_id.to_string(),
        output_index: index,
        address,
        lovelace: BigInt::from(value.coin()).to_string(),
        assets,
        datum_hash: output.datum().and_then(|d| match d {
            pallas::ledger::primitives::babbage::PseudoDatumOption::Hash(h) => Some(hex::encode(h)),
            _ => None,
        }),
        inline_datum: output.datum().and_then(|d| match d {
            pallas::ledger::primitives::babbage::PseudoDatumOption::Data(cbor) => Some(hex::encode(cbor.raw_cbor())),
            _ => None,
        }),
        ref_script: output.script_ref().map(|script| match script {
            pallas::ledger::traverse::ScriptRef::NativeScript(s) => hex::encode(s.raw_cbor()),
            pallas::ledger::traverse::ScriptRef::PlutusV1Script(s) => hex::encode(s.as_ref()),
            pallas::ledger::traverse::ScriptRef::PlutusV2Script(s) => hex::encode(s.as_ref()),
            pallas::ledger::traverse::ScriptRef::PlutusV3Script(s) => hex::encode(s.as_ref()),
        }),
        consumed_by: None,
    }
}

/// Filter semantics used by the facade (§4.3).
pub mod filters {
    use super::Utxo;

    pub fn all_for_address<'a>(address: &'a str) -> impl Fn(&Utxo) -> bool + 'a {
        move |u| u.address == address
    }

    pub fn lovelace_only_for_address<'a>(address: &'a str) -> impl Fn(&Utxo) -> bool + 'a {
        move |u| u.address == address && u.assets.is_empty()
    }

    pub fn asset_at_address<'a>(address: &'a str, asset: &'a str) -> impl Fn(&Utxo) -> bool + 'a {
        let folded = super::asciifold_owned(asset);
        move |u| u.address == address && u.assets.iter().any(|a| super::asciifold_owned(&a.asset) == folded)
    }
}

fn asciifold_owned(s: &str) -> String {
    asciifold(s)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration as StdDuration;

    fn far_future() -> SystemTime {
        SystemTime::now() + StdDuration::from_secs(600)
    }

    fn already_past() -> SystemTime {
        SystemTime::now() - StdDuration::from_secs(5)
    }

    #[tokio::test]
    async fn p5_expired_entries_are_pruned_without_sql() {
        let pool = Mempool::new();
        // Directly populate an entry with a body-less tx so
        // MultiEraTx::decode fails gracefully and is simply skipped by
        // get_tx/get_utxo, exercising only the TTL pass here.
        {
            let mut entries = pool.entries.write().await;
            entries.insert(
                "deadbeef".into(),
                MempoolEntry { raw_tx: vec![0x80], submitted_at: SystemTime::now(), ttl: already_past() },
            );
            entries.insert(
                "cafebabe".into(),
                MempoolEntry { raw_tx: vec![0x80], submitted_at: SystemTime::now(), ttl: far_future() },
            );
        }
        // Simulate the TTL-only pass directly (SQL port unavailable in
        // this unit test); mirrors what `prune` does before its SQL step.
        {
            let now = SystemTime::now();
            let mut entries = pool.entries.write().await;
            entries.retain(|_, e| e.ttl > now);
        }
        assert_eq!(pool.len().await, 1);
        assert!(pool.get_tx("cafebabe").await.is_some());
        assert!(pool.get_tx("deadbeef").await.is_none());
    }

    #[test]
    fn filters_match_spec_semantics() {
        let addr = "addr_test1vqzkxpwrnvu3ylqvj6wupde0pjk4w28zu9893wu55z4upfc2504tp".to_string();
        let u = Utxo {
            tx_id: "aa".into(),
            output_index: 0,
            address: addr.clone(),
            lovelace: "1000000".into(),
            assets: vec![],
            datum_hash: None,
            inline_datum: None,
            ref_script: None,
            consumed_by: None,
        };
        assert!(filters::all_for_address(&addr)(&u));
        assert!(filters::lovelace_only_for_address(&addr)(&u));
        assert!(!filters::lovelace_only_for_address("other")(&u));
    }
}
