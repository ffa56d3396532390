//! Datafile Bank command-line client
//!
//! Runs one query against the configured backend and prints the result as
//! JSON.
//!
//! # CLI Commands
//!
//! - `check-config` - Validate configuration (and reach the Redis cache, if any)
//! - `last <key>` - Latest value of a key
//! - `columns <keys>...` - Parallel columns of keys over an age window
//! - `stddev <key>` - Population standard deviation over an age window
//! - `populate` - Refresh the caches of the local backend
//!
//! # Configuration
//!
//! Configuration is read from:
//! 1. `--config` (path to TOML file)
//! 2. `DATAFILE_CONFIG` environment variable
//! 3. `./datafile.toml` in current directory
//! 4. Default configuration
//!
//! `DATAFILE_*` environment variables override file settings.

use clap::{Parser, Subcommand};
use datafile_bank::{
    cache::Caches,
    config::{BackendKind, CacheBackendKind, Config},
    engine,
    enumerator::LocalEnumerator,
    redis::{sanitize_url, RedisConfig, RedisPool},
    FlatDataFileBank, KeySpec, ONE_WEEK_S,
};
use serde_json::Value;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

#[derive(Parser)]
#[command(name = "datafile-query")]
#[command(version)]
#[command(about = "Query latest and windowed values of data file archives", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to configuration file (overrides DATAFILE_CONFIG env var)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Device whose files the S3 backend reads
    #[arg(short, long, global = true)]
    device_id: Option<String>,

    /// Pretty-print JSON output
    #[arg(long, global = true)]
    pretty: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate configuration without running a query
    CheckConfig,

    /// Latest value of a key
    Last {
        /// Dotted key within the measurement subtree
        key: String,

        /// Metadata fields to attach (e.g. Time)
        #[arg(long)]
        decorate: Vec<String>,
    },

    /// Parallel columns of keys over an age window
    Columns {
        /// Dotted keys within the measurement subtree
        #[arg(required = true)]
        keys: Vec<String>,

        /// Age window in seconds
        #[arg(long, default_value_t = ONE_WEEK_S)]
        age_secs: u64,

        /// Metadata fields to attach as a trailing column
        #[arg(long)]
        decorate: Vec<String>,

        /// List values oldest first
        #[arg(long)]
        reverse: bool,
    },

    /// Population standard deviation of a key over an age window
    Stddev {
        /// Dotted key within the measurement subtree
        key: String,

        /// Age window in seconds
        #[arg(long, default_value_t = ONE_WEEK_S)]
        age_secs: u64,
    },

    /// Re-list local directories and re-read their files into the caches
    Populate,
}

// =============================================================================
// Configuration
// =============================================================================

fn load_config(cli: &Cli) -> datafile_bank::Result<Config> {
    let path = cli
        .config
        .clone()
        .or_else(|| std::env::var("DATAFILE_CONFIG").ok().map(PathBuf::from))
        .or_else(|| {
            let local = Path::new("datafile.toml");
            local.exists().then(|| local.to_path_buf())
        });

    match path {
        Some(path) => Config::from_file_with_env(&path.to_string_lossy()),
        None => Config::from_env(),
    }
}

/// Single key as-is, several keys as a composite
fn key_spec(mut keys: Vec<String>) -> Option<KeySpec> {
    match keys.len() {
        0 => None,
        1 => keys.pop().map(KeySpec::One),
        _ => Some(KeySpec::Many(keys)),
    }
}

fn print_json(value: &Value, pretty: bool) -> Result<(), Box<dyn std::error::Error>> {
    let output = if pretty {
        serde_json::to_string_pretty(value)?
    } else {
        serde_json::to_string(value)?
    };
    println!("{}", output);
    Ok(())
}

// =============================================================================
// CLI Command Handlers
// =============================================================================

/// Validate configuration and print summary
async fn cmd_check_config(config: &Config) -> Result<(), Box<dyn std::error::Error>> {
    config.validate()?;

    println!("Configuration is valid!");
    println!();
    println!("Bank Settings:");
    println!("  Backend: {:?}", config.bank.backend);
    println!("  File limit: {}", config.bank.effective_file_limit());
    println!("  Prefix: {:?}", config.bank.prefix);
    match config.bank.backend {
        BackendKind::Local => {
            println!("  Directories: {:?}", config.local.dirs());
        },
        BackendKind::S3 => {
            println!("  Bucket: {}", config.s3.bucket);
            println!("  Base: {}", config.s3.base);
            println!(
                "  Workers: list={} get={}",
                config.s3.effective_max_workers_list(),
                config.s3.effective_max_workers_get()
            );
        },
    }
    println!();
    println!("Cache Settings:");
    println!("  Backend: {:?}", config.cache.backend);
    if config.cache.backend == CacheBackendKind::Remote {
        let url = config.cache.remote_url.clone().unwrap_or_default();
        println!("  URL: {}", sanitize_url(&url));

        let pool = RedisPool::new(RedisConfig::with_url(url)).await?;
        let latency = pool.ping().await?;
        println!("  Ping: {:.1}ms", latency.as_secs_f64() * 1000.0);
    }
    println!();
    println!("Log level: {}", config.logging.level);

    Ok(())
}

/// Refresh the local backend's caches
async fn cmd_populate(config: &Config) -> Result<(), Box<dyn std::error::Error>> {
    if config.bank.backend != BackendKind::Local {
        return Err("populate is only supported by the local backend".into());
    }
    config.validate()?;

    let caches = Caches::from_config(&config.cache).await?;
    let enumerator = LocalEnumerator::new(
        config.local.dirs(),
        config.bank.effective_file_limit(),
        caches,
        config.local.listing_ttl(),
    );
    let report = enumerator.populate_caches().await?;

    println!(
        "{}",
        serde_json::json!({
            "dirs_listed": report.dirs_listed,
            "files_read": report.files_read,
        })
    );
    Ok(())
}

async fn flat_bank(config: &Config, device_id: Option<&str>) -> datafile_bank::Result<FlatDataFileBank> {
    Ok(engine::from_config(config, device_id).await?.flat())
}

// =============================================================================
// Main Entry Point
// =============================================================================

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let config = load_config(&cli)?;

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.logging.level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();

    datafile_bank::metrics::init();
    debug!("Configuration: backend={:?}, cache={:?}", config.bank.backend, config.cache.backend);

    let device_id = cli.device_id.as_deref();
    let value = match cli.command {
        Commands::CheckConfig => return cmd_check_config(&config).await,
        Commands::Populate => return cmd_populate(&config).await,
        Commands::Last { key, decorate } => {
            let bank = flat_bank(&config, device_id).await?;
            bank.last(key, key_spec(decorate)).await?
        },
        Commands::Columns {
            keys,
            age_secs,
            decorate,
            reverse,
        } => {
            let keys = key_spec(keys).ok_or("at least one key is required")?;
            let bank = flat_bank(&config, device_id).await?;
            Value::Array(bank.columns(keys, age_secs, key_spec(decorate), reverse).await?)
        },
        Commands::Stddev { key, age_secs } => {
            let bank = flat_bank(&config, device_id).await?;
            bank.stddev(key, age_secs).await?
        },
    };

    print_json(&value, cli.pretty)?;
    info!("Query complete");
    Ok(())
}
