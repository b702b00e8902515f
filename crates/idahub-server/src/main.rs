//! idahub - JSON-RPC front end for many IDA instances.
//!
//! `idahub serve` exposes one tool catalog over HTTP and routes each call to
//! the backend named by its `instance_id`. `idahub list` prints the registry.

mod handler;
mod server;
mod tools;

use anyhow::Result;
use clap::{Parser, Subcommand};
use idahub_core::config::ServerConfig;
use server::ServeOptions;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(name = "idahub")]
#[command(about = "Route tool calls to registered IDA Pro instances")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the JSON-RPC server
    Serve {
        /// Host to bind to
        #[arg(long, default_value = "127.0.0.1")]
        host: String,

        /// Port to listen on (0 = auto-assign)
        #[arg(short, long, default_value = "0")]
        port: u16,

        /// Registry document (defaults to IDAHUB_REGISTRY or ~/.ida-mcp/instances.json)
        #[arg(long)]
        registry: Option<PathBuf>,

        /// Seconds between stale-instance sweeps
        #[arg(long, default_value_t = ServerConfig::SWEEP_INTERVAL.as_secs())]
        sweep_interval: u64,

        /// Enable debug logging
        #[arg(short, long)]
        debug: bool,
    },
    /// Print registered instances
    List {
        /// Registry document (defaults to IDAHUB_REGISTRY or ~/.ida-mcp/instances.json)
        #[arg(long)]
        registry: Option<PathBuf>,
    },
}

fn init_logging(debug: bool) {
    let log_level = if debug { Level::DEBUG } else { Level::INFO };
    FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .with_thread_ids(false)
        .with_writer(std::io::stderr)
        .compact()
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Serve {
            host,
            port,
            registry,
            sweep_interval,
            debug,
        } => {
            init_logging(debug);
            info!("Starting idahub server");

            let addr = server::start_server(ServeOptions {
                host,
                port,
                registry_path: registry,
                sweep_interval: Duration::from_secs(sweep_interval),
            })
            .await?;

            // Clients and tests read the port from this line.
            println!("RPC_PORT={}", addr.port());

            info!("RPC server running on {}", addr);

            tokio::signal::ctrl_c().await?;
            info!("Shutdown signal received, exiting");
        }
        Command::List { registry } => {
            init_logging(false);
            tokio::task::spawn_blocking(move || list(registry.as_ref())).await??;
        }
    }

    Ok(())
}

fn list(registry: Option<&PathBuf>) -> Result<()> {
    let registry = server::open_registry(registry)?;
    let instances = registry.list_instances()?;
    let active = registry.get_active()?;

    println!("Registry: {}", registry.path().display());
    if instances.is_empty() {
        println!("No registered instances.");
        return Ok(());
    }

    println!(
        "{:<3}{:<8}{:<8}{:<22}{:<24}{}",
        "", "ID", "PID", "ADDRESS", "BINARY", "IDB"
    );
    for (id, instance) in &instances {
        let marker = if active.as_deref() == Some(id.as_str()) {
            "*"
        } else {
            ""
        };
        println!(
            "{:<3}{:<8}{:<8}{:<22}{:<24}{}",
            marker,
            id,
            instance.pid,
            format!("{}:{}", instance.host, instance.port),
            instance.binary_name,
            instance.idb_path
        );
    }
    Ok(())
}
