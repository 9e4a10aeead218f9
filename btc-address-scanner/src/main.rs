//! BTC Address Scanner CLI
//!
//! Next-unused receive address discovery for watch-only Bitcoin wallets.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::{path::PathBuf, sync::Arc};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use btc_address_scanner::{
    cache::UsageCache,
    config::ScannerConfig,
    deriver::{derive, derive_master},
    scanner::{AddressScanner, FoundAddress, ScanResult},
    verify::verify_ownership,
};

#[derive(Parser)]
#[command(name = "btc-address-scanner")]
#[command(about = "Next unused receive address discovery for BIP84 wallets")]
#[command(version)]
struct Cli {
    /// Path to configuration file (defaults apply if it does not exist)
    #[arg(short, long, default_value = "scanner.toml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Extended public key (xpub or zpub), overrides the config file
    #[arg(long, env = "SCANNER_XPUB")]
    xpub: Option<String>,

    /// Fingerprint salt, overrides the config file
    #[arg(long)]
    salt: Option<String>,

    /// Cache directory, overrides the config file
    #[arg(long)]
    cache_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Find the next unused receive address
    Next {
        /// First index to consider
        #[arg(short, long, default_value = "0")]
        start: u32,

        /// Also print public key, fingerprint and salt
        #[arg(long)]
        full: bool,
    },

    /// Check whether an address belongs to the wallet
    Verify {
        /// Address to look for
        address: String,
    },

    /// Derive a range of receive addresses
    Derive {
        /// Starting index
        #[arg(short, long, default_value = "0")]
        start: u32,

        /// Number of addresses to derive
        #[arg(short = 'n', long, default_value = "10")]
        count: u32,
    },

    /// Show usage cache statistics
    CacheStats,

    /// Validate configuration file
    ValidateConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    init_logging(&cli.log_level)?;

    let config = match load_config(&cli) {
        Ok(c) => c,
        Err(e) => {
            if matches!(cli.command, Commands::ValidateConfig) {
                eprintln!("Configuration validation failed: {:#}", e);
                std::process::exit(1);
            }
            anyhow::bail!("Failed to load config from {:?}: {:#}", cli.config, e);
        }
    };

    match cli.command {
        Commands::Next { start, full } => next_address(&config, start, full).await,
        Commands::Verify { address } => verify_address(&config, &address),
        Commands::Derive { start, count } => derive_addresses(&config, start, count),
        Commands::CacheStats => show_cache_stats(&config),
        Commands::ValidateConfig => validate_config(&config),
    }
}

fn init_logging(level: &str) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    Ok(())
}

/// Config file (if present) with command-line overrides applied.
fn load_config(cli: &Cli) -> Result<ScannerConfig> {
    let mut config = if cli.config.exists() {
        ScannerConfig::from_file(&cli.config)?
    } else {
        tracing::debug!("No config file at {:?}, using defaults", cli.config);
        ScannerConfig::default()
    };

    if let Some(xpub) = &cli.xpub {
        config.xpub = Some(xpub.clone());
    }
    if let Some(salt) = &cli.salt {
        config.salt = Some(salt.clone());
    }
    if let Some(dir) = &cli.cache_dir {
        config.cache_dir = dir.clone();
    }

    config.validate()?;
    Ok(config)
}

fn require_xpub(config: &ScannerConfig) -> Result<&str> {
    config
        .xpub()
        .context("No xpub configured (use --xpub, SCANNER_XPUB or the config file)")
}

async fn next_address(config: &ScannerConfig, start: u32, full: bool) -> Result<()> {
    let xpub = require_xpub(config)?;
    let cache = Arc::new(UsageCache::open(&config.cache_dir));
    let scanner = AddressScanner::from_config(config, cache)?;

    let report = scanner.scan(xpub, start, config.salt.as_deref()).await?;
    tracing::info!(
        "Scanned {} batches: {} cache hits, {} oracle lookups, {} stale corrections",
        report.stats.batches_scanned,
        report.stats.cache_hits,
        report.stats.oracle_lookups,
        report.stats.stale_corrections
    );

    match report.result {
        ScanResult::Found(found) => {
            println!("{}", serde_json::to_string_pretty(&found_json(&found, full)?)?);
            Ok(())
        }
        ScanResult::Exhausted {
            start_index,
            gap_limit,
        } => Err(btc_address_scanner::ScanError::GapLimitReached {
            start_index,
            gap_limit,
        }
        .into()),
    }
}

/// Public key, fingerprint and salt are only shown on request.
fn found_json(found: &FoundAddress, full: bool) -> Result<serde_json::Value> {
    if full {
        Ok(serde_json::to_value(found)?)
    } else {
        Ok(serde_json::json!({
            "address": found.address,
            "index": found.index,
        }))
    }
}

fn verify_address(config: &ScannerConfig, address: &str) -> Result<()> {
    let master = derive_master(require_xpub(config)?)?;
    let ownership = verify_ownership(&master, address, config.gap_limit)?;

    println!("{}", serde_json::to_string_pretty(&ownership)?);
    Ok(())
}

fn derive_addresses(config: &ScannerConfig, start: u32, count: u32) -> Result<()> {
    let master = derive_master(require_xpub(config)?)?;

    println!(
        "Deriving {} addresses starting from index {}:",
        count, start
    );
    println!();

    for i in 0..count {
        let index = start.checked_add(i).context("Index overflow")?;
        let derived = derive(&master, index)?;

        println!("{}: {}", index, derived.address);
    }

    Ok(())
}

fn show_cache_stats(config: &ScannerConfig) -> Result<()> {
    let cache = UsageCache::open(&config.cache_dir);
    let stats = cache.stats();

    println!("Usage Cache");
    println!("===========");
    match cache.path() {
        Some(path) => println!("File: {}", path.display()),
        None => println!("File: none (volatile)"),
    }
    println!("Entries: {}", stats.total);
    println!("  Used: {}", stats.used);
    println!("  Unused: {}", stats.unused);

    Ok(())
}

fn validate_config(config: &ScannerConfig) -> Result<()> {
    let xpub_status = match config.xpub() {
        Some(xpub) => match derive_master(xpub) {
            Ok(_) => "configured",
            Err(e) => {
                eprintln!("Configuration validation failed: {}", e);
                std::process::exit(1);
            }
        },
        None => "not configured",
    };

    println!("Configuration is valid.");
    println!("  Xpub: {}", xpub_status);
    println!("  Gap limit: {}", config.gap_limit);
    println!("  Batch size: {}", config.batch_size);
    println!("  Cache dir: {:?}", config.cache_dir);
    println!("  Fail fast: {}", config.fail_fast);
    println!(
        "  Providers: {}, {}, {}",
        config.providers.blockchain_info_url,
        config.providers.blockchair_url,
        config.providers.mempool_url
    );
    Ok(())
}
