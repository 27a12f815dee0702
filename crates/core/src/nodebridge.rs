//! Typed wrapper around the local node's CLI subprocess (§4.5).
//!
//! Every call shells out through `tokio::process::Command` — the same
//! suspension-point discipline §5 requires for anything that can block
//! on I/O — with a network selector (`--mainnet` / `--testnet-magic 1`)
//! and the node's UNIX socket path threaded onto every invocation.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tokio::process::Command;

use crate::error::NodeBridgeError;
use crate::model::Network;

pub struct NodeBridge {
    cli_path: PathBuf,
    socket_path: PathBuf,
    network: Network,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tip {
    pub hash: String,
    pub epoch: u64,
    pub epoch_slot: u64,
    pub absolute_slot: u64,
    pub block: u64,
    pub block_height: u64,
    pub block_time: u64,
    pub sync_progress: String,
}

/// Raw protocol-parameters shape the node CLI prints as JSON. Field
/// names mirror `cardano-cli query protocol-parameters` output closely
/// enough for serde to pick out what the projection needs; unknown
/// fields are ignored.
#[derive(Debug, Deserialize)]
struct RawParameters {
    #[serde(rename = "collateralPercentage")]
    collateral_percentage: u32,
    #[serde(rename = "costModels")]
    cost_models: serde_json::Value,
    #[serde(rename = "executionUnitPrices")]
    execution_unit_prices: RawExUnitPrices,
    #[serde(rename = "maxCollateralInputs")]
    max_collateral_inputs: u32,
    #[serde(rename = "maxTxExecutionUnits")]
    max_tx_execution_units: RawExUnits,
    #[serde(rename = "maxTxSize")]
    max_tx_size: u32,
    #[serde(rename = "minFeeRefScriptCostPerByte", default)]
    min_fee_ref_script_cost_per_byte: f64,
    #[serde(rename = "stakeAddressDeposit")]
    stake_address_deposit: u64,
    #[serde(rename = "txFeeFixed")]
    tx_fee_fixed: u64,
    #[serde(rename = "txFeePerByte")]
    tx_fee_per_byte: u64,
    #[serde(rename = "utxoCostPerByte")]
    utxo_cost_per_byte: u64,
}

#[derive(Debug, Deserialize)]
struct RawExUnitPrices {
    #[serde(rename = "priceMemory")]
    price_memory: f64,
    #[serde(rename = "priceSteps")]
    price_steps: f64,
}

#[derive(Debug, Deserialize)]
struct RawExUnits {
    memory: u64,
    steps: u64,
}

/// Normalized protocol parameters (§4.5 "Parameter projection").
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NormalizedParameters {
    pub collateral_percentage: u32,
    pub cost_models: serde_json::Value,
    pub ex_cpu_fee_per_unit: f64,
    pub ex_mem_fee_per_unit: f64,
    pub max_collateral_inputs: u32,
    pub max_tx_ex_cpu: u64,
    pub max_tx_ex_mem: u64,
    pub max_tx_size: u32,
    pub ref_scripts_fee_per_byte: f64,
    pub ref_tip_slot: u64,
    /// Milliseconds since the epoch.
    pub ref_tip_time: u64,
    pub seconds_per_slot: u64,
    pub stake_addr_deposit: u64,
    pub tx_fee_fixed: u64,
    pub tx_fee_per_byte: u64,
    pub utxo_deposit_per_byte: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub collateral_utxo_id: Option<String>,
}

/// §4.5 "Error classifier": the structured shapes `ParseTxSubmitError`
/// recovers from CLI stderr.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitClassification {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bad_inputs: Option<Vec<TxInRef>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value_not_conserved: Option<ValueNotConserved>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub insufficient_collateral: Option<InsufficientCollateral>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub no_collateral_inputs: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub translation_missing_inputs: Option<Vec<TxInRef>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TxInRef {
    pub tx_id: String,
    pub index: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct ValueNotConserved {
    pub supplied: i128,
    pub expected: i128,
}

#[derive(Debug, Clone, Serialize)]
pub struct InsufficientCollateral {
    pub delta: i128,
    pub provided: i128,
}

impl SubmitClassification {
    /// True when the only recognized failure mode is "input not yet
    /// visible to the node" — the one case the orchestrator retries.
    pub fn has_missing_inputs(&self) -> bool {
        self.bad_inputs.as_ref().is_some_and(|v| !v.is_empty())
            || self.translation_missing_inputs.as_ref().is_some_and(|v| !v.is_empty())
    }
}

/// Parses the node CLI's stderr with the patterns in §4.5.
pub fn parse_tx_submit_error(stderr: &str) -> SubmitClassification {
    let mut out = SubmitClassification::default();
    let mut matched_any = false;

    let bad_inputs_re = Regex::new(
        r#"BadInputsUTxO \(fromList \[(.*?)\]\)"#,
    )
    .unwrap();
    let txin_re = Regex::new(
        r#"TxIn \(TxId \{unTxId = SafeHash "([0-9a-fA-F]+)"\}\) \(TxIx \{unTxIx = (\d+)\}\)"#,
    )
    .unwrap();

    if let Some(caps) = bad_inputs_re.captures(stderr) {
        let list = txin_re
            .captures_iter(&caps[1])
            .map(|c| TxInRef { tx_id: c[1].to_string(), index: c[2].parse().unwrap_or(0) })
            .collect();
        out.bad_inputs = Some(list);
        matched_any = true;
    }

    let translation_re = Regex::new(r#"TranslationLogicMissingInput \((.*?)\)\)"#).unwrap();
    if let Some(caps) = translation_re.captures(stderr) {
        let list = txin_re
            .captures_iter(&caps[1])
            .map(|c| TxInRef { tx_id: c[1].to_string(), index: c[2].parse().unwrap_or(0) })
            .collect();
        out.translation_missing_inputs = Some(list);
        matched_any = true;
    }

    let value_re =
        Regex::new(r#"ValueNotConservedUTxO.*?Coin (-?\d+).*?Coin (-?\d+)"#).unwrap();
    if let Some(caps) = value_re.captures(stderr) {
        out.value_not_conserved = Some(ValueNotConserved {
            supplied: caps[1].parse().unwrap_or(0),
            expected: caps[2].parse().unwrap_or(0),
        });
        matched_any = true;
    }

    let collateral_re =
        Regex::new(r#"InsufficientCollateral \(DeltaCoin \((-?\d+)\)\) \(Coin (-?\d+)\)"#).unwrap();
    if let Some(caps) = collateral_re.captures(stderr) {
        out.insufficient_collateral = Some(InsufficientCollateral {
            delta: caps[1].parse().unwrap_or(0),
            provided: caps[2].parse().unwrap_or(0),
        });
        matched_any = true;
    }

    if stderr.contains("NoCollateralInputs") {
        out.no_collateral_inputs = true;
        matched_any = true;
    }

    if !matched_any {
        out.raw = Some(stderr.to_string());
    }
    out
}

impl NodeBridge {
    pub fn new(cli_path: impl Into<PathBuf>, socket_path: impl Into<PathBuf>, network: Network) -> Self {
        Self { cli_path: cli_path.into(), socket_path: socket_path.into(), network }
    }

    fn base_command(&self) -> Command {
        let mut cmd = Command::new(&self.cli_path);
        cmd.env("CARDANO_NODE_SOCKET_PATH", &self.socket_path);
        cmd.stdout(Stdio::piped()).stderr(Stdio::piped());
        cmd
    }

    fn network_args(&self) -> Vec<String> {
        self.network.cli_network_args()
    }

    async fn run(&self, args: &[&str]) -> Result<std::process::Output, NodeBridgeError> {
        let network_args = self.network_args();
        let mut cmd = self.base_command();
        cmd.args(args).args(&network_args);
        let output = cmd.output().await?;
        Ok(output)
    }

    /// CBOR-encoded UTXOs at `address`. Returns raw bytes for the
    /// caller to hand to the codec.
    pub async fn utxo_by_address_cbor(&self, address: &str) -> Result<Vec<u8>, NodeBridgeError> {
        let output = self
            .run(&["query", "utxo", "--address", address, "--out-file", "/dev/stdout", "--cbor"])
            .await?;
        if !output.status.success() {
            return Err(NodeBridgeError::CliFailure(
                String::from_utf8_lossy(&output.stderr).into_owned(),
            ));
        }
        Ok(output.stdout)
    }

    /// CBOR-encoded UTXO at `(tx_id, index)`. An empty map (`0xA0`)
    /// means not-found.
    pub async fn utxo_by_ref_cbor(&self, tx_id: &str, index: u32) -> Result<Option<Vec<u8>>, NodeBridgeError> {
        let tx_in = format!("{tx_id}#{index}");
        let output = self
            .run(&["query", "utxo", "--tx-in", &tx_in, "--out-file", "/dev/stdout", "--cbor"])
            .await?;
        if !output.status.success() {
            return Err(NodeBridgeError::CliFailure(
                String::from_utf8_lossy(&output.stderr).into_owned(),
            ));
        }
        if output.stdout == [0xA0] {
            Ok(None)
        } else {
            Ok(Some(output.stdout))
        }
    }

    pub async fn tip(&self) -> Result<Tip, NodeBridgeError> {
        let output = self.run(&["query", "tip"]).await?;
        if !output.status.success() {
            return Err(NodeBridgeError::CliFailure(
                String::from_utf8_lossy(&output.stderr).into_owned(),
            ));
        }
        Ok(serde_json::from_slice(&output.stdout)?)
    }

    async fn protocol_parameters(&self) -> Result<RawParameters, NodeBridgeError> {
        let output = self.run(&["query", "protocol-parameters"]).await?;
        if !output.status.success() {
            return Err(NodeBridgeError::CliFailure(
                String::from_utf8_lossy(&output.stderr).into_owned(),
            ));
        }
        Ok(serde_json::from_slice(&output.stdout)?)
    }

    /// Samples tip and protocol parameters together and projects them
    /// into the normalized shape the facade/parameters-cache serve.
    pub async fn normalized_parameters(&self) -> Result<NormalizedParameters, NodeBridgeError> {
        let raw = self.protocol_parameters().await?;
        let tip = self.tip().await?;
        Ok(NormalizedParameters {
            collateral_percentage: raw.collateral_percentage,
            cost_models: raw.cost_models,
            ex_cpu_fee_per_unit: raw.execution_unit_prices.price_steps,
            ex_mem_fee_per_unit: raw.execution_unit_prices.price_memory,
            max_collateral_inputs: raw.max_collateral_inputs,
            max_tx_ex_cpu: raw.max_tx_execution_units.steps,
            max_tx_ex_mem: raw.max_tx_execution_units.memory,
            max_tx_size: raw.max_tx_size,
            ref_scripts_fee_per_byte: raw.min_fee_ref_script_cost_per_byte,
            ref_tip_slot: tip.absolute_slot,
            ref_tip_time: tip.block_time * 1000,
            seconds_per_slot: 1,
            stake_addr_deposit: raw.stake_address_deposit,
            tx_fee_fixed: raw.tx_fee_fixed,
            tx_fee_per_byte: raw.tx_fee_per_byte,
            utxo_deposit_per_byte: raw.utxo_cost_per_byte,
            collateral_utxo_id: None,
        })
    }

    /// Submits the JSON tx envelope at `path`, returning the CLI's
    /// stdout message on success or a classified stderr on failure.
    pub async fn submit(&self, envelope_path: &Path) -> Result<String, NodeBridgeError> {
        let output = self
            .run(&["transaction", "submit", "--tx-file", envelope_path.to_str().unwrap_or_default()])
            .await?;
        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
        } else {
            Err(NodeBridgeError::CliFailure(String::from_utf8_lossy(&output.stderr).into_owned()))
        }
    }

    /// Shelley-era slot-to-time conversion, assuming `secondsPerSlot =
    /// 1` (§9 open question — followed verbatim, not patched here).
    pub fn slot_to_time(&self, reference: &NormalizedParameters, slot: u64) -> u64 {
        let delta = slot as i64 - reference.ref_tip_slot as i64;
        let ms = reference.ref_tip_time as i64 + delta * reference.seconds_per_slot as i64 * 1000;
        ms.max(0) as u64
    }

    pub fn time_to_slot(&self, reference: &NormalizedParameters, time_ms: u64) -> u64 {
        let delta_ms = time_ms as i64 - reference.ref_tip_time as i64;
        let slot = reference.ref_tip_slot as i64 + delta_ms / (reference.seconds_per_slot as i64 * 1000);
        slot.max(0) as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn s4_insufficient_collateral_fixture() {
        let stderr = r#"…InsufficientCollateral (DeltaCoin (-4549920)) (Coin 277715))…NoCollateralInputs…BadInputsUTxO (fromList [TxIn (TxId {unTxId = SafeHash "b1e73e000000000000000000000000000000000000000000000000009f8dac"}) (TxIx {unTxIx = 1})])…"#;
        let parsed = parse_tx_submit_error(stderr);
        assert_eq!(parsed.insufficient_collateral.as_ref().unwrap().delta, -4549920);
        assert_eq!(parsed.insufficient_collateral.as_ref().unwrap().provided, 277715);
        assert!(parsed.no_collateral_inputs);
        let bad = parsed.bad_inputs.unwrap();
        assert_eq!(bad.len(), 1);
        assert_eq!(bad[0].index, 1);
        assert!(bad[0].tx_id.starts_with("b1e73e"));
        assert!(parsed.has_missing_inputs());
    }

    #[test]
    fn p8_value_not_conserved_fixture() {
        let stderr = "ValueNotConservedUTxO (Coin 1000000) (Coin 1500000)";
        let parsed = parse_tx_submit_error(stderr);
        let v = parsed.value_not_conserved.unwrap();
        assert_eq!(v.supplied, 1000000);
        assert_eq!(v.expected, 1500000);
    }

    #[test]
    fn p8_translation_missing_input_fixture() {
        let stderr = r#"TranslationLogicMissingInput (TxIn (TxId {unTxId = SafeHash "aa00000000000000000000000000000000000000000000000000000000bb"}) (TxIx {unTxIx = 2}))"#;
        let parsed = parse_tx_submit_error(stderr);
        assert!(parsed.has_missing_inputs());
        assert_eq!(parsed.translation_missing_inputs.unwrap()[0].index, 2);
    }

    #[test]
    fn unrecognized_content_is_kept_raw() {
        let stderr = "some unrelated node failure";
        let parsed = parse_tx_submit_error(stderr);
        assert_eq!(parsed.raw.as_deref(), Some(stderr));
        assert!(!parsed.has_missing_inputs());
    }
}
