use clap::Parser;
use partitiondb::config::ServerConfig;
use partitiondb::network::Server;
use std::path::PathBuf;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// partitiondb server
#[derive(Parser, Debug)]
#[command(name = "partitiondb", version, about = "Partitioned JSON document store server")]
struct Args {
    /// Configuration file (default: ./partitiondb.toml if present)
    #[arg(short = 'c', long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Host address to bind to
    #[arg(short = 'H', long)]
    host: Option<String>,

    /// Port to listen on
    #[arg(short = 'p', long)]
    port: Option<u16>,

    /// Data directory; partitions stay in memory when neither this nor the config sets one
    #[arg(short = 'd', long, value_name = "DIR")]
    data_dir: Option<PathBuf>,

    /// Ignore any configured data directory
    #[arg(long)]
    memory: bool,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long)]
    log_level: Option<String>,

    /// Print the effective configuration and exit
    #[arg(long)]
    print_config: bool,
}

impl Args {
    /// CLI arguments win over whatever the file and environment said
    fn apply(&self, config: &mut ServerConfig) {
        if let Some(host) = &self.host {
            config.host.clone_from(host);
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(dir) = &self.data_dir {
            config.data_dir = Some(dir.clone());
        }
        if self.memory {
            config.data_dir = None;
        }
        if let Some(level) = &self.log_level {
            config.log_level.clone_from(level);
        }
    }
}

fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(format!("partitiondb={level}")))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .init();
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let mut config = ServerConfig::load(args.config.as_deref())?;
    args.apply(&mut config);

    if args.print_config {
        println!("{}", serde_json::to_string_pretty(&config)?);
        return Ok(());
    }

    init_logging(&config.log_level);
    info!(
        version = env!("CARGO_PKG_VERSION"),
        data_dir = ?config.data_dir,
        partition_size = config.store.max_partition_size,
        reopen_policy = ?config.store.reopen_policy,
        "starting partitiondb"
    );

    let server = Server::from_config(&config)?;
    let addr = config.bind_addr();

    tokio::select! {
        result = server.start(&addr) => {
            if let Err(e) = &result {
                error!(error = %e, "server stopped");
            }
            result?;
        }
        _ = tokio::signal::ctrl_c() => {
            info!("shutting down");
        }
    }
    Ok(())
}
