//! Metergate - CLI Application
//!
//! An entitlement-gated API gateway:
//! - Per-request admission against a remote entitlement store
//! - Quota metering off the response path
//! - Prometheus metrics and health endpoints
//! - TOML configuration

use clap::{Parser, Subcommand};
use metergate::{config::GatewayConfig, pipeline};
use rand::distributions::Alphanumeric;
use rand::Rng;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

/// Metergate - An entitlement-gated API gateway
#[derive(Parser)]
#[command(name = "metergate")]
#[command(version, about = "An entitlement-gated API gateway", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the gateway server
    Start {
        /// Configuration file path
        #[arg(short, long, default_value = "config.toml")]
        config: String,
    },
    /// Validate the configuration file
    Validate {
        /// Configuration file path
        #[arg(short, long, default_value = "config.toml")]
        config: String,
    },
    /// Generate a sample configuration file
    Init {
        /// Output file path
        #[arg(short, long, default_value = "config.toml")]
        output: String,
    },
    /// Generate API keys in the configured format
    Keygen {
        /// Key prefix (environment marker)
        #[arg(short, long, default_value = "mk_live_")]
        prefix: String,
        /// Length of the random suffix
        #[arg(short, long, default_value_t = 32)]
        suffix_len: usize,
        /// Number of keys to generate
        #[arg(short, long, default_value_t = 1)]
        count: usize,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Start { config } => start_server(&config).await?,
        Commands::Validate { config } => validate_config(&config)?,
        Commands::Init { output } => generate_sample_config(&output)?,
        Commands::Keygen {
            prefix,
            suffix_len,
            count,
        } => generate_keys(&prefix, suffix_len, count),
    }

    Ok(())
}

/// Start the gateway server
async fn start_server(config_path: &str) -> anyhow::Result<()> {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config = GatewayConfig::from_file(config_path)?;
    info!("Loaded configuration from {}", config_path);

    pipeline::serve(config).await
}

/// Validate configuration file
fn validate_config(config_path: &str) -> anyhow::Result<()> {
    match GatewayConfig::from_file(config_path) {
        Ok(config) => {
            println!("✓ Configuration is valid!");
            println!();
            println!("Server: {}:{}", config.server.host, config.server.port);
            println!(
                "Upstream: {} (service '{}')",
                config.upstream.base_url, config.upstream.service_id
            );
            println!("Verify endpoint: {}", config.store.verify_url);
            println!("Track endpoint: {}", config.store.track_url);
            println!(
                "Fail mode on store outage: {}",
                if config.store.fail_open {
                    "open (allow)"
                } else {
                    "closed (deny)"
                }
            );
            if config.rate_limit.enabled {
                println!(
                    "Rate limit: {} requests / {}s",
                    config.rate_limit.max_requests, config.rate_limit.window_secs
                );
            } else {
                println!("Rate limit: disabled");
            }
            Ok(())
        }
        Err(e) => {
            eprintln!("✗ Configuration is invalid:");
            eprintln!("  {}", e);
            std::process::exit(1);
        }
    }
}

/// Generate sample configuration file
fn generate_sample_config(output_path: &str) -> anyhow::Result<()> {
    let sample_config = r#"# Metergate Configuration

[server]
host = "0.0.0.0"
port = 8080
timeout = 30

[upstream]
base_url = "http://localhost:3001"
service_id = "svc-example"
timeout_secs = 30

[store]
verify_url = "http://localhost:4000/api/keys/verify"
track_url = "http://localhost:4000/api/usage/track"
timeout_ms = 5000
track_timeout_ms = 2000
# Deny requests when the store is unreachable (fail closed). Flip only if
# availability matters more than strict quota correctness.
fail_open = false

[auth]
key_prefix = "mk_live_"
key_suffix_len = 32
api_key_header = "X-API-Key"

[rate_limit]
enabled = false
window_secs = 60
max_requests = 100

[metrics]
enabled = true
path = "/metrics"

[health]
enabled = true
path = "/health"
"#;

    std::fs::write(output_path, sample_config)?;
    println!("Sample configuration written to {}", output_path);
    Ok(())
}

/// Print freshly generated API keys
fn generate_keys(prefix: &str, suffix_len: usize, count: usize) {
    for _ in 0..count {
        let suffix: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(suffix_len)
            .map(char::from)
            .collect();
        println!("{}{}", prefix, suffix);
    }
}
