use anyhow::Result;
use clap::Parser;
use keyforge_cli::Cli;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .compact()
        .init();

    let output = keyforge_cli::run(cli).await?;
    if !output.is_empty() {
        println!("{output}");
    }
    Ok(())
}
