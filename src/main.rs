use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use connpool::{cli, config, Core};

#[derive(Parser)]
#[command(name = "connpool")]
#[command(version, about = "Bounded client connection pool with a benchmark driver", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file path (defaults to CONNPOOL_* environment variables)
    #[arg(long, global = true)]
    config: Option<String>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, global = true, default_value = "info")]
    log_level: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a TCP echo server to benchmark against
    Serve {
        /// Address to listen on
        #[arg(long, default_value = "127.0.0.1:18081")]
        listen: String,
    },

    /// Send echo requests to the configured target
    Bench {
        /// Number of concurrent workers
        #[arg(long, default_value = "16")]
        workers: usize,

        /// Total number of requests
        #[arg(long, default_value = "10000")]
        requests: usize,

        /// Payload sent on every request
        #[arg(long, default_value = "ping")]
        payload: String,

        /// Override the target address from the configuration
        #[arg(long)]
        target: Option<String>,

        /// Dial a new connection per request instead of using the pool
        #[arg(long)]
        no_pool: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| cli.log_level.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async_main(cli))
}

async fn async_main(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Serve { listen } => {
            cli::commands::cmd_serve(&listen).await?;
        }
        Commands::Bench {
            workers,
            requests,
            payload,
            target,
            no_pool,
        } => {
            let mut config = config::load_config(cli.config.as_deref())?;
            if let Some(target) = target {
                config.target.address = target;
            }

            let core = Core::new(config).await?;
            let result = cli::commands::cmd_bench(&core, workers, requests, &payload, no_pool).await;
            core.shutdown();
            result?;
        }
    }

    Ok(())
}
