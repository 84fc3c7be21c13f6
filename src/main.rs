mod cli;

use clap::Parser;
use cli::Cli;
use dbtunnel::utils::logger;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if cli.verbose {
        logger::init_with_level("debug");
    } else {
        logger::init();
    }

    cli::run(cli).await
}
