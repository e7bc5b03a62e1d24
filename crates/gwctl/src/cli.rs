use clap::{Parser, Subcommand};

use crate::commands;

/// gwctl - agent gateway control CLI
#[derive(Parser, Debug)]
#[command(name = "gwctl")]
#[command(version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the gateway daemon
    Serve {
        /// GatewayConfig YAML file
        #[arg(short, long)]
        config: Option<String>,

        /// Port to listen on (overrides config)
        #[arg(short, long)]
        port: Option<u16>,

        /// Host to bind to (overrides config)
        #[arg(long)]
        host: Option<String>,
    },

    /// Mint an HMAC-signed bearer token for local testing
    Token {
        /// Tenant UUID (a random one is generated if omitted)
        #[arg(short, long)]
        tenant: Option<String>,

        /// Comma-separated scopes (wire method names) to embed in the token
        #[arg(short, long, value_delimiter = ',')]
        scopes: Vec<String>,
    },

    /// Generate shell completion scripts
    Completion {
        #[arg(value_enum)]
        shell: commands::completion::Shell,
    },
}

impl Cli {
    pub async fn execute(self) -> anyhow::Result<()> {
        match self.command {
            Commands::Serve { config, port, host } => {
                commands::serve::execute(config.as_deref(), port, host.as_deref()).await
            }
            Commands::Token { tenant, scopes } => commands::token::execute(tenant.as_deref(), &scopes),
            Commands::Completion { shell } => commands::completion::execute(shell),
        }
    }
}
