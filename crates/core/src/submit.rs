//! Submission pipeline (§4.8): request-body decoding,
//! collateral co-signing, retrying submission through the node CLI, and
//! inserting the accepted tx into the mempool.
//!
//! Grounded on the teacher's `submit/grpc/submit.rs` (`MultiEraTx::decode`
//! auto-detecting era from raw bytes, `.redeemers()`/`.hash()` reads) and
//! `sync/emulator.rs` (matching a decoded tx down to its era-specific
//! ledger-primitive variant to reach fields the `MultiEraTx` facade
//! doesn't forward, e.g. `collateral`/`collateral_return`).

use std::path::PathBuf;
use std::time::{Duration, SystemTime};

use pallas::ledger::traverse::MultiEraTx;
use serde::Serialize;
use tokio::time::sleep;

use crate::error::{NodeBridgeError, SubmitError};
use crate::mempool::Mempool;
use crate::model::GatewayConfig;
use crate::nodebridge::{parse_tx_submit_error, NodeBridge, NormalizedParameters};
use crate::shapes::{splice_vkey_witness, vkey_witness};

const MAX_BODY_BYTES: usize = 17_000;
const BACKOFFS: [Duration; 2] = [Duration::from_secs(5), Duration::from_secs(10)];
const DEFAULT_TTL: Duration = Duration::from_secs(600);

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitResponse {
    pub tx_id: String,
    pub message: String,
    pub extra_signatures: Vec<String>,
}

/// Interprets the request body per the `Content-Type` the caller
/// observed, returning raw tx bytes (§4.8 "Input formats").
pub fn decode_body(content_type: &str, body: &[u8]) -> Result<Vec<u8>, SubmitError> {
    if body.len() > MAX_BODY_BYTES {
        return Err(SubmitError::BodyTooLarge);
    }
    if content_type.eq_ignore_ascii_case("application/cbor") {
        return Ok(body.to_vec());
    }
    let text = std::str::from_utf8(body).map_err(|_| SubmitError::InvalidUtf8)?;
    if content_type.eq_ignore_ascii_case("application/json") {
        let value: serde_json::Value =
            serde_json::from_str(text).map_err(|_| SubmitError::InvalidJson)?;
        let cbor_hex = value.get("cborHex").and_then(|v| v.as_str()).ok_or(SubmitError::InvalidJson)?;
        hex::decode(cbor_hex).map_err(|_| SubmitError::InvalidHex)
    } else {
        hex::decode(text.trim()).map_err(|_| SubmitError::InvalidHex)
    }
}

/// `decodeLedgerTx(bytes)`: era is auto-detected by `MultiEraTx::decode`
/// from the CBOR shape itself.
fn decode_ledger_tx(bytes: &[u8]) -> Result<MultiEraTx<'_>, SubmitError> {
    MultiEraTx::decode(bytes).map_err(|e| SubmitError::DecodeTx(crate::error::CodecError::Malformed(e.to_string())))
}

/// Co-signs with the configured wallet's collateral key when every
/// eligibility condition in §4.8 holds; otherwise a no-op that returns
/// the bytes unchanged.
fn sign_collateral_if_eligible(
    tx_bytes: &[u8],
    tx: &MultiEraTx<'_>,
    config: &GatewayConfig,
) -> (Vec<u8>, Option<String>) {
    let unchanged = (tx_bytes.to_vec(), None);

    let Some((collateral_tx_hex, collateral_index)) = config.collateral_parts() else {
        return unchanged;
    };
    if config.wallet.mnemonic.is_none() {
        return unchanged;
    }

    let (collateral, collateral_return) = match tx {
        MultiEraTx::Babbage(b) => (b.transaction_body.collateral.as_ref(), b.transaction_body.collateral_return.as_ref()),
        MultiEraTx::Conway(c) => (c.transaction_body.collateral.as_ref(), c.transaction_body.collateral_return.as_ref()),
        _ => return unchanged,
    };

    let Some(collateral) = collateral else { return unchanged };
    if collateral_return.is_some() {
        return unchanged;
    }
    let inputs: Vec<_> = collateral.iter().collect();
    let [only] = inputs.as_slice() else { return unchanged };
    if hex::encode(only.transaction_id) != collateral_tx_hex || only.index != collateral_index as u64 {
        return unchanged;
    }

    let hash = tx.hash();
    let Ok((vkey, signature)) = crate::wallet::sign(config, hash.as_slice()) else {
        return unchanged;
    };
    let witness = vkey_witness(&vkey, &signature);
    match splice_vkey_witness(tx_bytes, witness) {
        Ok(spliced) => (spliced, Some(hex::encode(&signature))),
        Err(_) => unchanged,
    }
}

async fn submit_with_retries(bridge: &NodeBridge, envelope_path: &std::path::Path) -> Result<String, SubmitError> {
    let mut attempt = 0;
    loop {
        match bridge.submit(envelope_path).await {
            Ok(msg) => return Ok(msg),
            Err(NodeBridgeError::CliFailure(stderr)) => {
                let classified = parse_tx_submit_error(&stderr);
                if !classified.has_missing_inputs() || attempt >= BACKOFFS.len() {
                    return Err(SubmitError::Rejected(stderr));
                }
                sleep(BACKOFFS[attempt]).await;
                attempt += 1;
            }
            Err(other) => return Err(SubmitError::NodeBridge(other)),
        }
    }
}

fn ttl_deadline(bridge: &NodeBridge, params: &NormalizedParameters, tx: &MultiEraTx<'_>) -> SystemTime {
    let default = SystemTime::now() + DEFAULT_TTL;
    let ttl = tx.ttl().unwrap_or(0);
    if ttl == 0 {
        return default;
    }
    let ttl_ms = bridge.slot_to_time(params, ttl);
    let from_slot = SystemTime::UNIX_EPOCH + Duration::from_millis(ttl_ms);
    default.min(from_slot)
}

/// Runs the full pipeline from §4.8, under the caller's write lock.
pub async fn submit_tx(
    body: &[u8],
    content_type: &str,
    config: &GatewayConfig,
    bridge: &NodeBridge,
    params: &NormalizedParameters,
    mempool: &Mempool,
) -> Result<SubmitResponse, SubmitError> {
    let raw = decode_body(content_type, body)?;
    let tx = decode_ledger_tx(&raw)?;
    let tx_id = hex::encode(tx.hash());
    let deadline = ttl_deadline(bridge, params, &tx);
    let (signed_bytes, extra_witness) = sign_collateral_if_eligible(&raw, &tx, config);

    let envelope = serde_json::json!({
        "type": "Tx ConwayEra",
        "description": "",
        "cborHex": hex::encode(&signed_bytes),
    });
    let path = PathBuf::from(format!("/tmp/{tx_id}"));
    tokio::fs::write(&path, serde_json::to_vec(&envelope)?).await?;

    let message = submit_with_retries(bridge, &path).await?;

    let tx_id = mempool
        .add_tx(signed_bytes, deadline)
        .await
        .unwrap_or(tx_id);

    Ok(SubmitResponse {
        tx_id,
        message,
        extra_signatures: extra_witness.into_iter().collect(),
    })
}

impl From<serde_json::Error> for SubmitError {
    fn from(e: serde_json::Error) -> Self {
        SubmitError::NodeBridge(NodeBridgeError::Json(e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_body_rejects_oversized_payload() {
        let body = vec![0u8; MAX_BODY_BYTES + 1];
        assert!(matches!(decode_body("application/cbor", &body), Err(SubmitError::BodyTooLarge)));
    }

    #[test]
    fn decode_body_cbor_passthrough() {
        let body = vec![0x80];
        assert_eq!(decode_body("application/cbor", &body).unwrap(), body);
    }

    #[test]
    fn decode_body_json_cbor_hex() {
        let body = br#"{"cborHex":"80","description":"x"}"#;
        assert_eq!(decode_body("application/json", body).unwrap(), vec![0x80]);
    }

    #[test]
    fn decode_body_defaults_to_hex() {
        let body = b"80";
        assert_eq!(decode_body("text/plain", body).unwrap(), vec![0x80]);
    }

    #[test]
    fn decode_body_json_missing_cbor_hex_is_invalid() {
        let body = br#"{"foo":"bar"}"#;
        assert!(matches!(decode_body("application/json", body), Err(SubmitError::InvalidJson)));
    }
}
