//! Black-box checks for the configuration surface a deployer actually
//! touches: the flat `/etc/cardano-iris/*` files (§6).

use cardano_iris::config::load_gateway_config;
use iris_core::model::Network;

#[test]
fn full_directory_yields_mainnet_wallet_and_collateral() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("network"), "mainnet\n").unwrap();
    std::fs::write(
        dir.path().join("wallet"),
        "abandon amount liar amount expire adjust cage candy arch gather drum bullet absurd math era live bid rhythm alien crouch range attend journey unaware\n",
    )
    .unwrap();
    std::fs::write(dir.path().join("collateral"), "aa".repeat(32) + "0\n").unwrap();

    let config = load_gateway_config(dir.path()).unwrap();

    assert_eq!(config.network, Network::Mainnet);
    assert_eq!(config.wallet.mnemonic.as_ref().unwrap().len(), 24);
    assert!(config.wallet.collateral_utxo_id.unwrap().ends_with('0'));
}

#[test]
fn empty_wallet_file_disables_the_wallet() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("wallet"), "   \n").unwrap();

    let config = load_gateway_config(dir.path()).unwrap();

    assert!(config.wallet.mnemonic.is_none());
}
