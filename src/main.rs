mod cli;

use anyhow::Result;
use clap::Parser;
use cli::Cli;
use log::info;

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    octane_ci_bridge::output::print_banner();

    let cli = Cli::parse();
    info!("Starting octane-bridge");
    cli.execute().await?;

    Ok(())
}
