//! Process configuration (§6 "Configuration"): pool/listener settings
//! loaded through the `config` crate (`Config::builder()`, the same
//! builder the teacher's own config plumbing uses — see
//! `tests/submit/mod.rs`), layered with environment overrides, plus the
//! three flat-file overrides the specification calls for directly.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use iris_core::model::{GatewayConfig, Network, WalletConfig};
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    #[serde(default = "default_listen_address")]
    pub listen_address: SocketAddr,
    pub database_url: String,
    pub chain_root: PathBuf,
    pub node_cli_path: PathBuf,
    pub node_socket_path: PathBuf,
    #[serde(default = "default_config_dir")]
    pub config_dir: PathBuf,
}

fn default_listen_address() -> SocketAddr {
    "0.0.0.0:80".parse().unwrap()
}

fn default_config_dir() -> PathBuf {
    PathBuf::from("/etc/cardano-iris")
}

/// Loads `Settings` from (in increasing priority) a `cardano-iris.toml`
/// next to the binary, then `IRIS_*` environment variables.
pub fn load_settings() -> Result<Settings, config::ConfigError> {
    config::Config::builder()
        .add_source(config::File::with_name("cardano-iris").required(false))
        .add_source(config::Environment::with_prefix("IRIS").separator("_"))
        .build()?
        .try_deserialize()
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigFatal {
    #[error("invalid network {0:?} in {1}: must be \"mainnet\" or \"preprod\"")]
    InvalidNetwork(String, PathBuf),
}

/// Loads the network/wallet/collateral flat-file overrides into a
/// `GatewayConfig` (§6). A missing network file defaults to preprod; an
/// invalid one is fatal. A missing wallet or collateral file simply
/// disables the feature they gate.
pub fn load_gateway_config(config_dir: &Path) -> Result<GatewayConfig, ConfigFatal> {
    let network_path = config_dir.join("network");
    let network = match std::fs::read_to_string(&network_path) {
        Ok(contents) => match contents.trim() {
            "mainnet" => Network::Mainnet,
            "preprod" => Network::Preprod,
            other => return Err(ConfigFatal::InvalidNetwork(other.to_string(), network_path)),
        },
        Err(_) => Network::Preprod,
    };

    let mnemonic = std::fs::read_to_string(config_dir.join("wallet"))
        .ok()
        .map(|s| s.split_whitespace().map(str::to_string).collect::<Vec<_>>())
        .filter(|words| !words.is_empty());

    let collateral_utxo_id = std::fs::read_to_string(config_dir.join("collateral"))
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty());

    Ok(GatewayConfig { network, wallet: WalletConfig { mnemonic, collateral_utxo_id } })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_network_file_defaults_to_preprod() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_gateway_config(dir.path()).unwrap();
        assert_eq!(config.network, Network::Preprod);
        assert!(config.wallet.mnemonic.is_none());
    }

    #[test]
    fn invalid_network_file_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("network"), "wat").unwrap();
        assert!(matches!(load_gateway_config(dir.path()), Err(ConfigFatal::InvalidNetwork(_, _))));
    }

    #[test]
    fn wallet_file_is_split_on_whitespace() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("wallet"), "abandon amount liar\n").unwrap();
        let config = load_gateway_config(dir.path()).unwrap();
        assert_eq!(config.wallet.mnemonic.unwrap(), vec!["abandon", "amount", "liar"]);
    }
}
