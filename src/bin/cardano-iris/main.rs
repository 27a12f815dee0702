use clap::Parser;
use miette::{IntoDiagnostic, Result};

mod config_cmd;
mod serve;

#[derive(Parser)]
#[clap(name = "cardano-iris")]
#[clap(bin_name = "cardano-iris")]
#[clap(author, version, about, long_about = None)]
enum CardanoIris {
    Serve(serve::Args),
    Config(config_cmd::Args),
}

fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let args = CardanoIris::parse();

    match args {
        CardanoIris::Serve(x) => serve::run(&x).into_diagnostic()?,
        CardanoIris::Config(x) => config_cmd::run(&x).into_diagnostic()?,
    };

    Ok(())
}
