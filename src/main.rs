use anyhow::Result;
use clap::Parser;

use kgrag::cli::{self, Cli, Commands};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = cli.config.as_deref();

    match cli.command {
        Commands::Ask {
            question,
            verbose,
            json,
        } => cli::ask::run(config, &question, verbose, json).await,
        Commands::Entities { question } => cli::entities::run(config, &question).await,
        Commands::Query { file } => cli::query::run(config, file.as_deref()).await,
        Commands::Check { file, entities } => cli::check::run(config, &file, &entities),
        Commands::Properties { search } => cli::properties::run(config, search.as_deref()),
        Commands::Config => cli::config::run(config),
    }
}
