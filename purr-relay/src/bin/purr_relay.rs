//! purr-relay: clipboard sync server
//!
//! Run with: purr-relay serve --password <shared password>
//! Every option can also be set through a `PURR_RELAY_*` environment variable.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use purr_relay::config::{ServeArgs, StorageArgs};
use purr_relay::tokenizer::TokenizerStrategy;
use purr_relay::{http, ClipboardRelay, ClipboardRelayApi};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Emit logs as JSON lines
    #[arg(long, global = true, env = "PURR_RELAY_JSON_LOGS")]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the HTTP server
    Serve(ServeArgs),
    /// Fingerprint every legacy item and report counts
    Backfill(StorageArgs),
    /// Print the tokens of a piece of text
    Tokenize {
        text: String,
        #[arg(long, value_enum, default_value_t = TokenizerStrategy::Chunked)]
        strategy: TokenizerStrategy,
    },
}

fn init_tracing(json: bool) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let result = if json {
        fmt().with_env_filter(filter).json().try_init()
    } else {
        fmt().with_env_filter(filter).try_init()
    };
    result.map_err(|e| anyhow::anyhow!(e)).context("failed to install tracing subscriber")
}

#[actix_web::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.json_logs)?;

    match args.command {
        Command::Serve(serve) => {
            let (relay_config, server_config) = serve.into_configs();
            let relay = ClipboardRelay::open(&relay_config)
                .with_context(|| format!("opening {}", relay_config.db_path.display()))?;
            let relay: Arc<dyn ClipboardRelayApi> = Arc::new(relay);
            http::serve(server_config, relay)
                .await
                .context("HTTP server failed")?;
        }
        Command::Backfill(storage) => {
            let config = storage.into_config();
            let relay = ClipboardRelay::open(&config)
                .with_context(|| format!("opening {}", config.db_path.display()))?;
            let report = relay.backfill().await.context("backfill failed")?;
            info!(scanned = report.scanned, updated = report.updated, skipped = report.skipped, "backfill complete");
            println!("{}", serde_json::to_string(&report)?);
        }
        Command::Tokenize { text, strategy } => {
            for token in strategy.tokenize(&text) {
                println!("{}", token);
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_tracing_init_is_reported() {
        init_tracing(false).unwrap();
        let err = init_tracing(true).unwrap_err();
        assert!(err.to_string().contains("failed to install tracing subscriber"));
    }
}
