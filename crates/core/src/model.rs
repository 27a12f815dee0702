//! Shared data model (§3 of the specification).
//!
//! Hashes and other identifiers are held as lowercase hex strings at
//! this boundary; raw bytes only appear inside the codec and chain
//! store where byte-level work actually happens. Every monetary or
//! asset quantity is a decimal string, never a machine integer, so
//! that arbitrary precision survives the JSON boundary untouched.

use serde::{Deserialize, Serialize};

pub type TxId = String;
pub type Hex = String;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PolicyAsset {
    pub asset: Hex,
    pub quantity: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AssetAddress {
    pub address: String,
    pub quantity: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Utxo {
    pub tx_id: TxId,
    pub output_index: u32,
    pub address: String,
    pub lovelace: String,
    pub assets: Vec<PolicyAsset>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub datum_hash: Option<Hex>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inline_datum: Option<Hex>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ref_script: Option<Hex>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub consumed_by: Option<TxId>,
}

impl Utxo {
    pub fn key(&self) -> (TxId, u32) {
        (self.tx_id.clone(), self.output_index)
    }

    pub fn is_spent(&self) -> bool {
        self.consumed_by.as_ref().is_some_and(|c| !c.is_empty())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TxBlockInfo {
    pub hash: TxId,
    pub block_id: Hex,
    pub block_height: u32,
    pub block_time: u64,
    pub slot: u64,
    pub index: u32,
}

/// Index into a chunk and its secondary-index entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockPtr {
    pub chunk_index: u32,
    pub entry_index: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Network {
    Mainnet,
    Preprod,
}

impl Network {
    pub fn address_prefix(&self) -> &'static str {
        match self {
            Network::Mainnet => "addr1",
            Network::Preprod => "addr_test1",
        }
    }

    /// Matches the `--mainnet` / `--testnet-magic 1` selector the node CLI
    /// bridge passes through to the subprocess.
    pub fn cli_network_args(&self) -> Vec<String> {
        match self {
            Network::Mainnet => vec!["--mainnet".to_string()],
            Network::Preprod => vec!["--testnet-magic".to_string(), "1".to_string()],
        }
    }

    pub fn pallas_network(&self) -> pallas::ledger::addresses::Network {
        match self {
            Network::Mainnet => pallas::ledger::addresses::Network::Mainnet,
            Network::Preprod => pallas::ledger::addresses::Network::Testnet,
        }
    }
}

/// Process-wide configuration, immutable after load.
#[derive(Debug, Clone, Default)]
pub struct WalletConfig {
    pub mnemonic: Option<Vec<String>>,
    /// 32-byte tx-id hex concatenated with a decimal output index.
    pub collateral_utxo_id: Option<String>,
}

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub network: Network,
    pub wallet: WalletConfig,
}

impl GatewayConfig {
    pub fn collateral_parts(&self) -> Option<(String, u32)> {
        let id = self.wallet.collateral_utxo_id.as_ref()?;
        if id.len() < 65 {
            return None;
        }
        let (tx_hex, idx) = id.split_at(64);
        let idx: u32 = idx.parse().ok()?;
        Some((tx_hex.to_string(), idx))
    }
}

/// Selection request body for the coin-selection write path (§4.9).
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SelectRequest {
    pub lovelace: String,
    #[serde(default)]
    pub asset: Option<Hex>,
    #[serde(default)]
    pub min_quantity: Option<String>,
    #[serde(default)]
    pub algorithm: Option<String>,
}
