//! `gwctl` - serve the gateway daemon, mint local test tokens, and
//! generate shell completions.

mod cli;
mod commands;
mod invoker;

use clap::Parser;
use cli::Cli;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    if let Err(err) = cli.execute().await {
        tracing::error!(error = %err, "gwctl failed");
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}
