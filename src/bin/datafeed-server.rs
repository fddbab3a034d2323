//! CLI entry point for the datafeed server (§6 of the design).
//!
//! ```sh
//! datafeed-server --port 8082 --datadir ./var --config ./datafeed.toml
//! ```

use std::path::PathBuf;

use clap::Parser;
use datafeed_rs::config::Config;
use datafeed_rs::providers::NullProvider;
use datafeed_rs::server::Server;

/// Session-aligned time-series datafeed server for stock market ticks,
/// minute snapshots, and OHLC archives.
#[derive(Debug, Parser)]
#[command(name = "datafeed-server", version, about)]
struct Args {
    /// TCP listen port. Overrides the config file's `port` if set.
    #[arg(long)]
    port: Option<u16>,

    /// Data directory holding `data.h5` and `dstore.dump`. Overrides the
    /// config file's `datadir` if set.
    #[arg(long)]
    datadir: Option<PathBuf>,

    /// Enable the secondary `rdb/` archive backend.
    #[arg(long)]
    rdb: bool,

    /// Path to the TOML config file (password, datadir, port, calendar).
    /// Missing file is not fatal — auth is disabled and defaults apply.
    #[arg(long, default_value = "datafeed.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> std::process::ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let mut config = match Config::load(&args.config) {
        Ok(config) => config,
        Err(err) => {
            tracing::error!(error = %err, "failed to load config");
            return std::process::ExitCode::FAILURE;
        }
    };

    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(datadir) = args.datadir {
        config.datadir = datadir.to_string_lossy().into_owned();
    }
    if args.rdb {
        config.rdb = true;
    }

    let server = Server::new(config);
    match server.run(Box::new(NullProvider), Box::new(NullProvider)).await {
        Ok(()) => std::process::ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!(error = %err, "fatal server error");
            std::process::ExitCode::FAILURE
        }
    }
}
