//! Forward proxy binary.
//!
//! ```text
//! forward-proxy run --config proxy.toml [--bind 0.0.0.0:3128] [--intercept]
//! forward-proxy gen-ca --cert ca.pem --key ca.key [--common-name "My CA"]
//! ```

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use forward_proxy::ca::RcgenAuthority;
use forward_proxy::config::{load_config, ConfigOverrides, ProxyConfig};
use forward_proxy::lifecycle::{signals, startup};
use forward_proxy::observability::{logging, metrics};

#[derive(Parser)]
#[command(name = "forward-proxy")]
#[command(about = "Forward HTTP/HTTPS proxy with optional TLS interception", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the proxy
    Run {
        /// TOML config file; defaults apply when omitted
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Override listener.bind_address
        #[arg(short, long)]
        bind: Option<String>,

        /// Force interception mode
        #[arg(long)]
        intercept: bool,
    },
    /// Generate a CA certificate and key for interception
    GenCa {
        #[arg(long)]
        cert: PathBuf,

        #[arg(long)]
        key: PathBuf,

        #[arg(long, default_value = "forward-proxy interception CA")]
        common_name: String,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    match Cli::parse().command {
        Commands::Run {
            config,
            bind,
            intercept,
        } => run(config, bind, intercept).await,
        Commands::GenCa {
            cert,
            key,
            common_name,
        } => {
            let authority = RcgenAuthority::generate(&common_name)?;
            authority.write_pem(&cert, &key)?;
            println!("Wrote CA certificate to {} and key to {}", cert.display(), key.display());
            Ok(())
        }
    }
}

async fn run(path: Option<PathBuf>, bind: Option<String>, intercept: bool) -> Result<(), Box<dyn std::error::Error>> {
    let config = match &path {
        Some(path) => load_config(path)?,
        None => ProxyConfig::default(),
    };
    let config = ConfigOverrides {
        bind_address: bind,
        intercept,
    }
    .apply(config)?;

    logging::init_logging(&config.observability)?;
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        config = ?path,
        bind_address = %config.listener.bind_address,
        interception = ?config.interception.mode,
        request_timeout_secs = config.timeouts.request_secs,
        "forward-proxy starting"
    );

    if config.observability.metrics_enabled {
        let addr = config.observability.metrics_address.parse()?;
        metrics::init_metrics(addr)?;
    }

    let (server, listener) = startup::bind(&config).await?;
    tokio::spawn(signals::shutdown_on_signal(server.state().shutdown().clone()));

    server.run(listener, config.timeouts.shutdown()).await?;
    tracing::info!("Shutdown complete");
    Ok(())
}
