//! WolfTun - Encrypted Point-to-Point Tunnel
//!
//! Command-line entry point for both tunnel roles.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use wolftun::config::{LoggingConfig, TunnelConfig};
use wolftun::session::{TunnelClient, TunnelServer};
use wolftun::Error;

/// WolfTun - Encrypted point-to-point TLS tunnel
#[derive(Parser)]
#[command(name = "wolftun")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to configuration file (defaults are used if it does not exist)
    #[arg(short, long, default_value = "wolftun.toml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error), overrides the config file
    #[arg(short, long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect to a tunnel server and relay until the session ends
    Client {
        /// Offer the X25519MLKEM768 post-quantum hybrid key exchange
        #[arg(long)]
        pqc: bool,

        /// Only perform the TLS handshake, then exit
        #[arg(long)]
        handshake_only: bool,

        /// Server address (host:port)
        #[arg(short, long)]
        server: Option<String>,
    },

    /// Accept tunnel clients
    Server {
        /// Offer the X25519MLKEM768 post-quantum hybrid key exchange
        #[arg(long)]
        pqc: bool,

        /// Address to listen on
        #[arg(short = 'L', long)]
        listen: Option<String>,
    },

    /// Initialize a new configuration file
    Init {
        /// Output path for configuration file
        #[arg(short, long, default_value = "wolftun.toml")]
        output: PathBuf,
    },

    /// Validate configuration file
    Validate,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let loaded = TunnelConfig::load_or_default(&cli.config)
        .with_context(|| format!("Failed to load configuration from {}", cli.config.display()));

    let logging = loaded
        .as_ref()
        .map(|config| config.logging.clone())
        .unwrap_or_default();
    init_logging(cli.log_level.as_deref().unwrap_or(&logging.level), &logging);

    let result = match cli.command {
        Commands::Init { output } => run_init(&output),
        Commands::Validate => run_validate(&cli.config),
        Commands::Client {
            pqc,
            handshake_only,
            server,
        } => match loaded {
            Ok(config) => run_client(config, pqc, handshake_only, server).await,
            Err(e) => Err(e),
        },
        Commands::Server { pqc, listen } => match loaded {
            Ok(config) => run_server(config, pqc, listen).await,
            Err(e) => Err(e),
        },
    };

    if let Err(e) = result {
        tracing::error!("{:#}", e);
        std::process::exit(1);
    }
}

/// Initialize logging
fn init_logging(level: &str, logging: &LoggingConfig) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| level.into());

    let registry = tracing_subscriber::registry().with(env_filter);
    if logging.format == "compact" {
        registry
            .with(tracing_subscriber::fmt::layer().compact())
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().pretty())
            .init();
    }
}

/// Cancelled on Ctrl-C
fn shutdown_signal() -> CancellationToken {
    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                tracing::info!("Received shutdown signal");
                trigger.cancel();
            }
            Err(e) => tracing::warn!("Cannot listen for Ctrl-C: {}", e),
        }
    });
    token
}

/// TUN devices, routes and NAT all need root
fn warn_if_not_root() {
    if !nix::unistd::Uid::effective().is_root() {
        tracing::warn!("Not running as root; TUN and route setup will likely fail");
    }
}

/// Run the client role
async fn run_client(
    mut config: TunnelConfig,
    pqc: bool,
    handshake_only: bool,
    server: Option<String>,
) -> Result<()> {
    if pqc {
        config.tls.post_quantum = true;
    }
    if let Some(server) = server {
        config.client.server_address = server;
    }
    config.validate().context("Invalid client configuration")?;

    if !handshake_only {
        warn_if_not_root();
    }

    tracing::info!(
        "Starting tunnel client for {} (post-quantum: {})",
        config.client.server_address,
        config.tls.post_quantum
    );

    let client = TunnelClient::new(config);
    match client.run(handshake_only, shutdown_signal()).await {
        Ok(Some(outcome)) => {
            tracing::info!("Tunnel closed ({})", outcome);
            Ok(())
        }
        Ok(None) => Ok(()),
        Err(Error::Cancelled) => {
            tracing::info!("Interrupted before the tunnel was established");
            Ok(())
        }
        Err(e) => Err(e).context("Tunnel client failed"),
    }
}

/// Run the server role
async fn run_server(mut config: TunnelConfig, pqc: bool, listen: Option<String>) -> Result<()> {
    if pqc {
        config.tls.post_quantum = true;
    }
    if let Some(listen) = listen {
        config.server.bind_address = listen;
    }
    config.validate().context("Invalid server configuration")?;

    warn_if_not_root();

    tracing::info!(
        "Starting tunnel server on {} (post-quantum: {})",
        config.server.bind_address,
        config.tls.post_quantum
    );

    TunnelServer::new(config)
        .run(shutdown_signal())
        .await
        .context("Tunnel server failed")
}

/// Initialize a new configuration file
fn run_init(output: &Path) -> Result<()> {
    if output.exists() {
        anyhow::bail!("{} already exists, refusing to overwrite", output.display());
    }

    TunnelConfig::default()
        .save(output)
        .with_context(|| format!("Failed to write {}", output.display()))?;

    println!("Configuration written to {}", output.display());
    println!("Place the server certificate and key under /app/certs or edit the paths.");
    Ok(())
}

/// Validate configuration file
fn run_validate(path: &Path) -> Result<()> {
    let config = TunnelConfig::from_file(path)
        .with_context(|| format!("Configuration error in {}", path.display()))?;

    println!("✓ Configuration is valid");
    println!("  Interface:      {} (MTU {})", config.interface.name, config.interface.mtu);
    println!("  Post-quantum:   {}", config.tls.post_quantum);
    println!("  Client → {}", config.client.server_address);
    println!("  Server ← {}", config.server.bind_address);
    Ok(())
}
