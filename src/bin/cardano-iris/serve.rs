use cardano_iris::{config, http};
use iris_core::nodebridge::NodeBridge;
use iris_core::Gateway;

type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Debug, clap::Args)]
pub struct Args {}

#[tokio::main]
pub async fn run(_args: &Args) -> Result<(), BoxError> {
    let settings = config::load_settings()?;
    let gateway_config = config::load_gateway_config(&settings.config_dir)?;

    let bridge = NodeBridge::new(
        settings.node_cli_path.clone(),
        settings.node_socket_path.clone(),
        gateway_config.network,
    );

    let gateway = Gateway::new(gateway_config, &settings.chain_root, &settings.database_url, bridge)?;

    http::serve(settings, gateway).await?;

    Ok(())
}
