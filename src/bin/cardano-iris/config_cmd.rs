use cardano_iris::config;

type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Debug, clap::Args)]
pub struct Args {
    #[clap(subcommand)]
    pub action: Action,
}

#[derive(Debug, clap::Subcommand)]
pub enum Action {
    /// Prints the loaded settings and gateway config as JSON.
    Show,
    /// Loads the configuration and exits non-zero on any fatal error.
    Check,
}

pub fn run(args: &Args) -> Result<(), BoxError> {
    let settings = config::load_settings()?;
    let gateway_config = config::load_gateway_config(&settings.config_dir)?;

    match args.action {
        Action::Show => {
            println!(
                "{}",
                serde_json::json!({
                    "listenAddress": settings.listen_address.to_string(),
                    "chainRoot": settings.chain_root,
                    "network": format!("{:?}", gateway_config.network),
                    "walletConfigured": gateway_config.wallet.mnemonic.is_some(),
                    "collateralConfigured": gateway_config.wallet.collateral_utxo_id.is_some(),
                })
            );
        }
        Action::Check => {
            println!("configuration OK");
        }
    }

    Ok(())
}
