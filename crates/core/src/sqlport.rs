//! Connection-pooled db-sync query accessors (§4.6).
//!
//! The teacher's own `xtask` reaches for the synchronous `postgres`
//! crate for one-off db-sync debugging queries
//! (`xtask/src/dbsync_query.rs`): raw SQL strings, `row.get(index)`
//! positional extraction, decimal amounts cast to `text` in-query so
//! arbitrary precision survives intact. This module is the
//! connection-pooled, async sibling of that same pattern, built on
//! `tokio-postgres` + `deadpool-postgres` for request-path use.

use deadpool_postgres::{Config as PoolConfig, Pool, Runtime};
use tokio_postgres::NoTls;

use crate::error::SqlError;
use crate::model::{AssetAddress, PolicyAsset, TxBlockInfo, Utxo};

pub struct SqlPort {
    pool: Pool,
}

impl SqlPort {
    pub fn connect(database_url: &str) -> Result<Self, SqlError> {
        let mut cfg = PoolConfig::new();
        cfg.url = Some(database_url.to_string());
        let pool = cfg
            .create_pool(Some(Runtime::Tokio1), NoTls)
            .map_err(|e| SqlError::Build(e.to_string()))?;
        Ok(Self { pool })
    }

    fn row_to_utxo(row: &tokio_postgres::Row) -> Utxo {
        let asset_hex: Vec<String> = row.get("asset_policy_names");
        let asset_qty: Vec<String> = row.get("asset_quantities");
        let assets = asset_hex
            .into_iter()
            .zip(asset_qty)
            .map(|(asset, quantity)| PolicyAsset { asset, quantity })
            .collect();
        Utxo {
            tx_id: row.get("tx_id"),
            output_index: row.get::<_, i32>("output_index") as u32,
            address: row.get("address"),
            lovelace: row.get("lovelace"),
            assets,
            datum_hash: row.try_get::<_, Option<String>>("datum_hash").ok().flatten(),
            inline_datum: row.try_get::<_, Option<String>>("inline_datum").ok().flatten(),
            ref_script: row.try_get::<_, Option<String>>("ref_script").ok().flatten(),
            consumed_by: row
                .try_get::<_, Option<String>>("consumed_by")
                .ok()
                .flatten()
                .filter(|s| !s.is_empty()),
        }
    }

    pub async fn address_utxos(&self, address: &str) -> Result<Vec<Utxo>, SqlError> {
        let client = self.pool.get().await?;
        let rows = client
            .query(
                r#"
                select
                    encode(tx.hash, 'hex') as tx_id,
                    txo.index as output_index,
                    txo.address as address,
                    txo.value::text as lovelace,
                    array(select encode(ma.policy || ma.name, 'hex') from ma_tx_out mto
                          join multi_asset ma on ma.id = mto.ident
                          where mto.tx_out_id = txo.id) as asset_policy_names,
                    array(select mto.quantity::text from ma_tx_out mto
                          where mto.tx_out_id = txo.id) as asset_quantities,
                    encode(txo.data_hash, 'hex') as datum_hash,
                    encode(d.bytes, 'hex') as inline_datum,
                    encode(s.bytes, 'hex') as ref_script,
                    null::text as consumed_by
                from tx_out txo
                join tx on tx.id = txo.tx_id
                left join datum d on d.id = txo.inline_datum_id
                left join script s on s.id = txo.reference_script_id
                where txo.address = $1 and txo.consumed_by_tx_id is null
                "#,
                &[&address],
            )
            .await?;
        Ok(rows.iter().map(Self::row_to_utxo).collect())
    }

    pub async fn address_utxos_with_asset(&self, address: &str, asset: &str) -> Result<Vec<Utxo>, SqlError> {
        let all = self.address_utxos(address).await?;
        Ok(all
            .into_iter()
            .filter(|u| u.assets.iter().any(|a| asciifold(&a.asset) == asciifold(asset)))
            .collect())
    }

    pub async fn asset_addresses(&self, asset: &str) -> Result<Vec<AssetAddress>, SqlError> {
        let client = self.pool.get().await?;
        let rows = client
            .query(
                r#"
                select txo.address as address, sum(mto.quantity)::text as quantity
                from ma_tx_out mto
                join multi_asset ma on ma.id = mto.ident
                join tx_out txo on txo.id = mto.tx_out_id
                where encode(ma.policy || ma.name, 'hex') = $1 and txo.consumed_by_tx_id is null
                group by txo.address
                "#,
                &[&asset],
            )
            .await?;
        Ok(rows
            .iter()
            .map(|r| AssetAddress { address: r.get("address"), quantity: r.get("quantity") })
            .collect())
    }

    pub async fn policy_assets(&self, policy_hex: &str) -> Result<Vec<PolicyAsset>, SqlError> {
        let client = self.pool.get().await?;
        let rows = client
            .query(
                r#"
                select encode(ma.policy || ma.name, 'hex') as asset, sum(mto.quantity)::text as quantity
                from ma_tx_out mto
                join multi_asset ma on ma.id = mto.ident
                join tx_out txo on txo.id = mto.tx_out_id
                where encode(ma.policy, 'hex') = $1 and txo.consumed_by_tx_id is null
                group by ma.policy, ma.name
                "#,
                &[&policy_hex],
            )
            .await?;
        Ok(rows
            .iter()
            .map(|r| PolicyAsset { asset: r.get("asset"), quantity: r.get("quantity") })
            .collect())
    }

    pub async fn tx_block_info(&self, tx_id_hex: &str) -> Result<Option<TxBlockInfo>, SqlError> {
        let client = self.pool.get().await?;
        let row = client
            .query_opt(
                r#"
                select
                    encode(tx.hash, 'hex') as hash,
                    encode(b.hash, 'hex') as block_id,
                    b.block_no as block_height,
                    extract(epoch from b.time)::bigint as block_time,
                    b.slot_no as slot,
                    tx.block_index as index
                from tx
                join block b on b.id = tx.block_id
                where encode(tx.hash, 'hex') = $1
                "#,
                &[&tx_id_hex],
            )
            .await?;
        Ok(row.map(|r| TxBlockInfo {
            hash: r.get("hash"),
            block_id: r.get("block_id"),
            block_height: r.get::<_, i32>("block_height") as u32,
            block_time: r.get::<_, i64>("block_time") as u64,
            slot: r.get::<_, i64>("slot") as u64,
            index: r.get::<_, i32>("index") as u32,
        }))
    }

    pub async fn utxo(&self, tx_id_hex: &str, index: u32) -> Result<Option<Utxo>, SqlError> {
        let client = self.pool.get().await?;
        let row = client
            .query_opt(
                r#"
                select
                    encode(tx.hash, 'hex') as tx_id,
                    txo.index as output_index,
                    txo.address as address,
                    txo.value::text as lovelace,
                    array(select encode(ma.policy || ma.name, 'hex') from ma_tx_out mto
                          join multi_asset ma on ma.id = mto.ident
                          where mto.tx_out_id = txo.id) as asset_policy_names,
                    array(select mto.quantity::text from ma_tx_out mto
                          where mto.tx_out_id = txo.id) as asset_quantities,
                    encode(txo.data_hash, 'hex') as datum_hash,
                    encode(d.bytes, 'hex') as inline_datum,
                    encode(s.bytes, 'hex') as ref_script,
                    encode(consumer.hash, 'hex') as consumed_by
                from tx_out txo
                join tx on tx.id = txo.tx_id
                left join datum d on d.id = txo.inline_datum_id
                left join script s on s.id = txo.reference_script_id
                left join tx_in ti on ti.tx_out_id = tx.id and ti.tx_out_index = txo.index
                left join tx consumer on consumer.id = ti.tx_in_id
                where encode(tx.hash, 'hex') = $1 and txo.index = $2
                "#,
                &[&tx_id_hex, &(index as i32)],
            )
            .await?;
        Ok(row.map(|r| Self::row_to_utxo(&r)))
    }

    pub async fn filter_missing_txs(&self, tx_ids_hex: &[String]) -> Result<Vec<String>, SqlError> {
        let client = self.pool.get().await?;
        let rows = client
            .query(
                r#"
                select unnest($1::text[]) as tx_id
                except
                select encode(hash, 'hex') from tx where encode(hash, 'hex') = any($1::text[])
                "#,
                &[&tx_ids_hex],
            )
            .await?;
        Ok(rows.iter().map(|r| r.get("tx_id")).collect())
    }

    pub async fn create_indices(&self) -> Result<(), SqlError> {
        let client = self.pool.get().await?;
        client
            .batch_execute(
                r#"
                create index if not exists idx_iris_tx_out_address on tx_out (address);
                create index if not exists idx_iris_tx_hash on tx using hash (hash);
                create index if not exists idx_iris_ma_tx_out_ident on ma_tx_out (ident);
                "#,
            )
            .await?;
        Ok(())
    }
}

/// ASCII-casefold used to compare asset names/policies case-insensitively
/// per §4.3's "asset-at-address" filter semantics.
pub fn asciifold(s: &str) -> String {
    s.to_ascii_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn asciifold_is_case_insensitive() {
        assert_eq!(asciifold("ABCdef"), asciifold("abcDEF"));
    }
}
