// ============================================================================
// CLI & MAIN ENTRY POINT
// ============================================================================
// Host process for the StatsD service:
// - `run` listens, prints a snapshot every interval, stops on Ctrl-C
// - `validate` / `generate-config` work on the configuration file
// ============================================================================

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result as AnyhowResult};
use clap::{Parser, Subcommand};
use tracing::{debug, info, warn};

use cerebro_statsd::logging::init_logging;
use cerebro_statsd::{
    StatsdConfig, StatsdError, StatsdResult, StatsdService, ENGINE_FULL_NAME, ENGINE_VERSION,
};

/// Cerebro StatsD CLI
#[derive(Parser, Debug)]
#[command(
    name = "cerebro-statsd",
    author = "AIOps Team",
    version,
    about = "StatsD metric ingestion for AIOps",
    long_about = "Cerebro StatsD listens for StatsD line-protocol packets over UDP, \
                  aggregates counters, gauges, sets and timings in memory and \
                  periodically emits a JSON snapshot of the aggregated values."
)]
pub struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "cerebro-statsd.toml", env = "CEREBRO_STATSD_CONFIG")]
    pub config: PathBuf,

    /// Log level override
    #[arg(short, long, env = "CEREBRO_STATSD_LOG_LEVEL")]
    pub log_level: Option<String>,

    /// Enable debug mode
    #[arg(short, long, env = "CEREBRO_STATSD_DEBUG")]
    pub debug: bool,

    /// Subcommand to run
    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the listener
    Run {
        /// Seconds between snapshots
        #[arg(short, long, default_value_t = 10)]
        interval: u64,
    },

    /// Validate configuration file
    Validate {
        /// Show full parsed configuration
        #[arg(short, long)]
        verbose: bool,
    },

    /// Generate default configuration file
    GenerateConfig {
        /// Output path (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Show version and build info
    Version,
}

// ----------------------------------------------------------------------------
// Handlers
// ----------------------------------------------------------------------------

fn handle_validate(config_path: &Path, verbose: bool) -> StatsdResult<()> {
    println!("Validating configuration file: {}", config_path.display());

    match StatsdConfig::load(config_path) {
        Ok(config) => {
            println!("✅ Configuration is valid!");

            if verbose {
                println!("\n📋 Parsed configuration:");
                println!("{}", "=".repeat(60));
                match toml::to_string_pretty(&config) {
                    Ok(s) => println!("{}", s),
                    Err(e) => println!("Failed to serialize: {}", e),
                }
            }

            let service = &config.service;
            println!("\n📊 Configuration Summary:");
            println!("  • Listen address: {}", service.bind_address());
            println!("  • Queue capacity: {}", service.allowed_pending_messages);
            println!("  • Percentiles: {:?}", service.percentiles);
            println!("  • Sample window: {}", service.percentile_limit);
            println!("  • Cleared after collect:");
            if service.delete_timings { println!("    - Timings"); }
            if service.delete_gauges { println!("    - Gauges"); }
            if service.delete_counters { println!("    - Counters"); }
            if service.delete_sets { println!("    - Sets"); }

            Ok(())
        }
        Err(e) => {
            println!("❌ Configuration validation failed!");
            println!("Error: {}", e);
            Err(StatsdError::Config(e))
        }
    }
}

fn handle_generate_config(output: Option<&Path>) -> StatsdResult<()> {
    let config_str = StatsdConfig::generate_default_config();

    match output {
        Some(path) => {
            fs::write(path, &config_str)?;
            println!("✅ Default configuration written to: {}", path.display());
        }
        None => {
            println!("{}", config_str);
        }
    }

    Ok(())
}

fn handle_version() {
    println!("📈 {} v{}", ENGINE_FULL_NAME, ENGINE_VERSION);
    println!();
    println!("Build Information:");
    println!("  • Target: {}", std::env::consts::ARCH);
    println!("  • OS: {}", std::env::consts::OS);
    println!();
    println!("Metric types: counter (c), gauge (g), set (s), timing (ms), histogram (h)");
}

/// Run until Ctrl-C, printing a snapshot every `interval` seconds
async fn run_service(config: StatsdConfig, interval: u64) -> AnyhowResult<()> {
    let service = StatsdService::start(config.service, None)
        .await
        .context("Failed to start StatsD service")?;

    let mut ticker = tokio::time::interval(Duration::from_secs(interval.max(1)));
    // First tick completes immediately.
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let snapshot = service.collect();
                let stats = service.stats();
                debug!(
                    target: "statsd::service",
                    packets = stats.packets_received,
                    dropped = stats.packets_dropped,
                    processed = stats.packets_processed,
                    parse_errors = stats.parse_errors,
                    queue_depth = stats.queue_depth,
                    "Collection tick"
                );
                if !snapshot.is_empty() {
                    println!("{}", snapshot);
                }
            }
            result = tokio::signal::ctrl_c() => {
                if let Err(e) = result {
                    warn!(target: "statsd::service", error = %e, "Failed to listen for Ctrl-C");
                }
                info!(target: "statsd::service", "Shutdown requested");
                break;
            }
        }
    }

    service.stop().await;
    Ok(())
}

// ============================================================================
// MAIN
// ============================================================================

#[tokio::main]
async fn main() -> AnyhowResult<()> {
    let cli = Cli::parse();

    // Subcommands that don't need logging or a running service
    match &cli.command {
        Some(Commands::Version) => {
            handle_version();
            return Ok(());
        }
        Some(Commands::GenerateConfig { output }) => {
            handle_generate_config(output.as_deref())?;
            return Ok(());
        }
        Some(Commands::Validate { verbose }) => {
            handle_validate(&cli.config, *verbose)?;
            return Ok(());
        }
        _ => {}
    }

    let config_missing = !cli.config.exists();
    let config = if config_missing {
        StatsdConfig::default()
    } else {
        StatsdConfig::load(&cli.config)
            .with_context(|| format!("Failed to load config from {}", cli.config.display()))?
    };

    let mut logging_config = config.logging.clone();
    if let Some(level) = &cli.log_level {
        logging_config.level = level.clone();
    }
    if cli.debug {
        logging_config.level = "debug".into();
    }

    init_logging(&logging_config)?;

    info!("📈 {} v{}", ENGINE_FULL_NAME, ENGINE_VERSION);
    if config_missing {
        warn!("Config file not found at {}, using defaults", cli.config.display());
    }

    let interval = match cli.command {
        Some(Commands::Run { interval }) => interval,
        _ => 10,
    };

    run_service(config, interval).await
}
