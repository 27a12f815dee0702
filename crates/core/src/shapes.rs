//! Domain-specific CBOR shapes built on top of the generic codec AST
//! (§4.1): transaction outputs, the `Value` union, datum options and
//! reference scripts, plus the witness-set splice used by the
//! submission orchestrator (§4.8).

use num_bigint::BigInt;

use crate::codec::{ContainerMode, DecodedValue, ListMode};
use crate::error::CodecError;

pub enum DatumOption {
    Hash(Vec<u8>),
    Inline(Vec<u8>),
}

impl DatumOption {
    fn to_decoded(&self) -> DecodedValue {
        match self {
            DatumOption::Hash(h) => {
                DecodedValue::tuple(vec![DecodedValue::int(0), DecodedValue::bytes(h.clone())])
            }
            DatumOption::Inline(d) => DecodedValue::tuple(vec![
                DecodedValue::int(1),
                DecodedValue::Envelope(
                    24,
                    ContainerMode::Definite,
                    Box::new(DecodedValue::bytes(d.clone())),
                ),
            ]),
        }
    }
}

/// `tag(24) ∥ byteString(tuple(scriptVersionTag=2, byteString(flatBytes)))`.
pub fn encode_ref_script(flat_bytes: &[u8]) -> DecodedValue {
    let inner = DecodedValue::tuple(vec![DecodedValue::int(2), DecodedValue::bytes(flat_bytes.to_vec())]);
    DecodedValue::Envelope(24, ContainerMode::Definite, Box::new(inner))
}

/// `{policy: {assetName: quantity}}` nested multiasset map, entirely
/// definite-length (canonical ledger maps never use indefinite heads).
pub type MultiAsset = Vec<(Vec<u8>, Vec<(Vec<u8>, BigInt)>)>;

/// A lone integer when the multiasset bundle is empty, otherwise the
/// `(lovelace, multiasset)` tuple form, per the `Value` union in §3.
pub fn encode_value(lovelace: &BigInt, multiasset: &MultiAsset) -> DecodedValue {
    if multiasset.is_empty() {
        return DecodedValue::Int(lovelace.clone());
    }
    let outer_pairs = multiasset
        .iter()
        .map(|(policy, assets)| {
            let inner_pairs = assets
                .iter()
                .map(|(name, qty)| (DecodedValue::bytes(name.clone()), DecodedValue::Int(qty.clone())))
                .collect();
            (
                DecodedValue::bytes(policy.clone()),
                DecodedValue::Map(ContainerMode::Definite, inner_pairs),
            )
        })
        .collect();
    DecodedValue::tuple(vec![
        DecodedValue::Int(lovelace.clone()),
        DecodedValue::Map(ContainerMode::Definite, outer_pairs),
    ])
}

/// A post-Alonzo transaction output: a definite int-keyed map
/// `{0: address, 1: value, 2?: datum option, 3?: ref script}`.
pub fn encode_tx_output(
    address: &[u8],
    value: DecodedValue,
    datum: Option<DatumOption>,
    ref_script: Option<DecodedValue>,
) -> DecodedValue {
    let mut pairs = vec![
        (DecodedValue::int(0), DecodedValue::bytes(address.to_vec())),
        (DecodedValue::int(1), value),
    ];
    if let Some(d) = datum {
        pairs.push((DecodedValue::int(2), d.to_decoded()));
    }
    if let Some(rs) = ref_script {
        pairs.push((DecodedValue::int(3), rs));
    }
    DecodedValue::Map(ContainerMode::Definite, pairs)
}

/// Splices a pre-built vkey witness into a decoded transaction's
/// witness set (§4.1 "Splice operation"): finds the int-keyed `0`
/// entry (vkey witnesses) inside the witness set at index 1 of the
/// top-level `[body, witnessSet, isValid, auxiliaryData]` array,
/// appends the witness, and creates that entry (as a CBOR set) if it
/// was absent. Every untouched sibling — the body, `isValid`, and
/// auxiliary data — round-trips byte-for-byte because the codec
/// preserves the container mode of everything it decodes.
pub fn splice_vkey_witness(tx_bytes: &[u8], witness: DecodedValue) -> Result<Vec<u8>, CodecError> {
    let top = crate::codec::decode_all(tx_bytes)?;
    let DecodedValue::List(top_mode, mut items) = top else {
        return Err(CodecError::Malformed("transaction is not a top-level array".into()));
    };
    if items.len() != 4 {
        return Err(CodecError::Malformed(format!(
            "expected 4-item transaction envelope, found {}",
            items.len()
        )));
    }

    let witness_set = items.remove(1);
    let DecodedValue::Map(map_mode, mut pairs) = witness_set else {
        return Err(CodecError::Malformed("witness set is not a map".into()));
    };

    let mut found = false;
    for (k, v) in pairs.iter_mut() {
        if k.is_int(0) {
            found = true;
            match v.as_list_mut() {
                Some(list) => list.push(witness.clone()),
                None => return Err(CodecError::Malformed("vkey witness entry is not a list".into())),
            }
            break;
        }
    }
    if !found {
        pairs.push((DecodedValue::int(0), DecodedValue::List(ListMode::Set, vec![witness])));
    }

    items.insert(1, DecodedValue::Map(map_mode, pairs));
    Ok(DecodedValue::List(top_mode, items).to_cbor_bytes())
}

/// Builds the `[vkeyBytes, signatureBytes]` tuple a vkey witness is.
pub fn vkey_witness(vkey: &[u8], signature: &[u8]) -> DecodedValue {
    DecodedValue::tuple(vec![
        DecodedValue::bytes(vkey.to_vec()),
        DecodedValue::bytes(signature.to_vec()),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::decode_all;

    fn sample_tx(witness_pairs: Vec<(DecodedValue, DecodedValue)>) -> Vec<u8> {
        let body = DecodedValue::Map(ContainerMode::Definite, vec![]);
        let witness_set = DecodedValue::Map(ContainerMode::Definite, witness_pairs);
        let is_valid = DecodedValue::Bool(true);
        let aux = DecodedValue::Null;
        DecodedValue::list_pref(vec![body, witness_set, is_valid, aux]).to_cbor_bytes()
    }

    #[test]
    fn splice_creates_entry_when_absent() {
        let tx = sample_tx(vec![]);
        let w = vkey_witness(&[1; 32], &[2; 64]);
        let spliced = splice_vkey_witness(&tx, w.clone()).unwrap();
        let decoded = decode_all(&spliced).unwrap();
        let DecodedValue::List(_, items) = decoded else { panic!() };
        let DecodedValue::Map(_, pairs) = &items[1] else { panic!() };
        assert_eq!(pairs.len(), 1);
        let DecodedValue::List(mode, witnesses) = &pairs[0].1 else { panic!() };
        assert_eq!(*mode, ListMode::Set);
        assert_eq!(witnesses.len(), 1);
        assert_eq!(witnesses[0], w);
    }

    #[test]
    fn splice_appends_to_existing_entry() {
        let existing = vkey_witness(&[9; 32], &[8; 64]);
        let tx = sample_tx(vec![(
            DecodedValue::int(0),
            DecodedValue::List(ListMode::Set, vec![existing.clone()]),
        )]);
        let w = vkey_witness(&[1; 32], &[2; 64]);
        let spliced = splice_vkey_witness(&tx, w.clone()).unwrap();
        let decoded = decode_all(&spliced).unwrap();
        let DecodedValue::List(_, items) = decoded else { panic!() };
        let DecodedValue::Map(_, pairs) = &items[1] else { panic!() };
        let DecodedValue::List(mode, witnesses) = &pairs[0].1 else { panic!() };
        assert_eq!(*mode, ListMode::Set);
        assert_eq!(witnesses, &vec![existing, w]);
    }

    #[test]
    fn splice_preserves_untouched_siblings_byte_for_byte() {
        let tx = sample_tx(vec![]);
        let w = vkey_witness(&[1; 32], &[2; 64]);
        let spliced = splice_vkey_witness(&tx, w).unwrap();
        let original = decode_all(&tx).unwrap();
        let after = decode_all(&spliced).unwrap();
        let (DecodedValue::List(_, orig_items), DecodedValue::List(_, new_items)) = (original, after) else {
            panic!()
        };
        assert_eq!(orig_items[0].to_cbor_bytes(), new_items[0].to_cbor_bytes());
        assert_eq!(orig_items[2].to_cbor_bytes(), new_items[2].to_cbor_bytes());
        assert_eq!(orig_items[3].to_cbor_bytes(), new_items[3].to_cbor_bytes());
    }

    #[test]
    fn value_lone_int_when_no_assets() {
        let v = encode_value(&BigInt::from(5_000_000), &vec![]);
        assert_eq!(v, DecodedValue::Int(BigInt::from(5_000_000)));
    }

    #[test]
    fn value_tuple_when_assets_present() {
        let multiasset = vec![(vec![0xAA; 28], vec![(b"token".to_vec(), BigInt::from(1))])];
        let v = encode_value(&BigInt::from(2_000_000), &multiasset);
        let DecodedValue::List(mode, items) = &v else { panic!() };
        assert_eq!(*mode, ListMode::Definite);
        assert_eq!(items.len(), 2);
        assert_eq!(items[0], DecodedValue::Int(BigInt::from(2_000_000)));
    }
}
