use clap::Parser;
use deploy_scripts::{cli::Cli, network::DeployerConfig};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> eyre::Result<()> {
    // A missing `.env` is fine, secrets may come from the environment directly
    dotenv::dotenv().ok();

    let Cli { config, command } = Cli::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().pretty().with_env_filter(filter).init();

    let config = DeployerConfig::load(&config)?;
    command.run(&config).await?;

    Ok(())
}
