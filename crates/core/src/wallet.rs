//! BIP-39 mnemonic → Ed25519/Extended key derivation for collateral
//! co-signing (§4.8 "signCollateralIfEligible").
//!
//! Grounded on `pallas-wallet`'s `hd::Bip32PrivateKey` (sibling crate to
//! `pallas-codec`/`pallas-addresses` in the same pallas workspace the
//! teacher already depends on): `from_bip39_mnenomic` + CIP-1852
//! `derive(...)` calls, `.to_ed25519_private_key()` to sign, and
//! `pallas::ledger::addresses::Address` (enterprise, payment-key hash)
//! to derive the bech32 address.

use pallas::crypto::hash::Hasher;
use pallas::ledger::addresses::{Address, ShelleyAddress, ShelleyDelegationPart, ShelleyPaymentPart};
use pallas_wallet::hd::Bip32PrivateKey;

use crate::model::GatewayConfig;

const HARDENED: u32 = 0x8000_0000;

/// CIP-1852 purpose 1852' / coin 1815' / account 0' / chain 0 / index 0.
fn derive_payment_key(mnemonic: &[String]) -> Result<Bip32PrivateKey, String> {
    let phrase = mnemonic.join(" ");
    let root = Bip32PrivateKey::from_bip39_mnenomic(phrase, String::new())
        .map_err(|e| format!("invalid mnemonic: {e}"))?;
    Ok(root
        .derive(HARDENED + 1852)
        .derive(HARDENED + 1815)
        .derive(HARDENED)
        .derive(0)
        .derive(0))
}

fn payment_key_hash(key: &Bip32PrivateKey) -> pallas::crypto::hash::Hash<28> {
    let pubkey = key.to_public().to_ed25519_pubkey();
    let mut hasher = Hasher::<224>::new();
    hasher.input(pubkey.as_ref());
    hasher.finalize()
}

/// Bech32-encoded enterprise address (payment-key-hash only, no
/// staking part) for the configured wallet, per S2.
pub fn enterprise_address(config: &GatewayConfig) -> Result<String, String> {
    let mnemonic = config.wallet.mnemonic.as_ref().ok_or("no wallet configured")?;
    let key = derive_payment_key(mnemonic)?;
    let hash = payment_key_hash(&key);
    let addr = ShelleyAddress::new(
        config.network.pallas_network(),
        ShelleyPaymentPart::key_hash(hash),
        ShelleyDelegationPart::Null,
    );
    Address::Shelley(addr).to_bech32().map_err(|e| e.to_string())
}

/// Signs `message` (the tx hash) with the wallet's derived payment
/// key, returning `(vkey_bytes, signature_bytes)`.
pub fn sign(config: &GatewayConfig, message: &[u8]) -> Result<(Vec<u8>, Vec<u8>), String> {
    let mnemonic = config.wallet.mnemonic.as_ref().ok_or("no wallet configured")?;
    let key = derive_payment_key(mnemonic)?;
    let private = key.to_ed25519_private_key();
    let vkey = key.to_public().to_ed25519_pubkey().as_ref().to_vec();
    let signature = private.sign(message).as_ref().to_vec();
    Ok((vkey, signature))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn s2_enterprise_address_derivation() {
        let mnemonic: Vec<String> = "abandon amount liar amount expire adjust cage candy arch gather drum bullet absurd math era live bid rhythm alien crouch range attend journey unaware"
            .split_whitespace()
            .map(str::to_string)
            .collect();
        let config = GatewayConfig {
            network: crate::model::Network::Preprod,
            wallet: crate::model::WalletConfig { mnemonic: Some(mnemonic), collateral_utxo_id: None },
        };
        let addr = enterprise_address(&config).unwrap();
        assert_eq!(addr, "addr_test1vqzkxpwrnvu3ylqvj6wupde0pjk4w28zu9893wu55z4upfc2504tp");
    }
}
