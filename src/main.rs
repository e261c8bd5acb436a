//! One-shot traffic accounting agent for multi-tenant shadowsocks hosts.
//! Meant to be run from cron: each invocation provisions iptables
//! accounting rules for every tenant port, differences the byte counters
//! against the previous run, and appends the deltas to per-port MySQL
//! tables. Per-port failures are logged and skipped; only setup failures
//! abort the run.

mod config;
mod counter_store;
mod db;
mod delta;
mod iptables;
mod local_ip;
mod pipeline;
mod tenants;

use anyhow::{Context, Result};
use clap::Parser;
use counter_store::CounterStore;
use pipeline::PortState;
use std::time::Instant;
use tracing::level_filters::LevelFilter;
use tracing::{error, info, trace};

#[derive(Parser)]
#[command(about = "Collects per-port proxy traffic from iptables counters into MySQL")]
struct Args {
    /// Path to the agent configuration file
    #[arg(default_value = "config.json")]
    config: String,
}

/// Append-creates the log file with the same 0644 mode the counter store
/// uses; cron jobs inherit restrictive umasks and the log must stay
/// readable for operators.
fn open_log_file(path: &str) -> std::io::Result<std::fs::File> {
    use std::os::unix::fs::OpenOptionsExt;
    std::fs::OpenOptions::new()
        .append(true)
        .create(true)
        .mode(0o644)
        .open(path)
}

/// Routes all diagnostics to the configured log file, decorated with
/// source location. `RUST_LOG` narrows the level; the default keeps the
/// trace stream, which is the primary audit trail for a cron-driven run.
fn init_logging(path: &str) -> Result<()> {
    let log_file =
        open_log_file(path).with_context(|| format!("unable to open log file {path}"))?;
    let level = if let Ok(level) = std::env::var("RUST_LOG") {
        match level.to_lowercase().as_str() {
            "trace" => LevelFilter::TRACE,
            "debug" => LevelFilter::DEBUG,
            "info" => LevelFilter::INFO,
            "warn" => LevelFilter::WARN,
            "error" => LevelFilter::ERROR,
            _ => LevelFilter::TRACE,
        }
    } else {
        LevelFilter::TRACE
    };
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(level)
        .compact()
        .with_ansi(false)
        .with_file(true)
        .with_line_number(true)
        .with_target(false)
        .with_writer(std::sync::Mutex::new(log_file))
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Everything up to the fan-out is fatal on failure: a partial setup
    // would record garbage for every port.
    let config = config::Config::load(&args.config)?;
    std::env::set_current_dir(&config.working_dir)
        .with_context(|| format!("unable to change directory to {}", config.working_dir))?;
    init_logging(&config.log)?;

    let start = Instant::now();
    trace!(
        "starting run: workdir {}, tenant directory {}, counter prefix {}",
        config.working_dir,
        config.ss_config,
        config.temp_dir
    );

    std::fs::create_dir_all(&config.temp_dir)
        .with_context(|| format!("unable to create counter directory {}", config.temp_dir))?;

    let pool = db::connect(&config.db)
        .await
        .context("unable to connect to the database")?;

    let ports = tenants::load(&config.ss_config)?;
    trace!("tenant ports: {ports:?}");
    match local_ip::local_ipv4() {
        Some(ip) => trace!("local address: {ip}"),
        None => trace!("no non-loopback IPv4 address found"),
    }

    let store = CounterStore::new(config.temp_dir.clone());
    let outcomes = pipeline::run_all(&ports, &pool, &store).await;
    let skipped = outcomes
        .iter()
        .filter(|(_, state)| *state == PortState::Skipped)
        .count();
    if skipped > 0 {
        error!("{skipped} of {} ports were skipped this run", outcomes.len());
    }

    // The barrier has passed; persist whatever rules this run appended.
    iptables::save().await;

    info!("run finished in {:?}", start.elapsed());
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use std::os::unix::fs::PermissionsExt;

    #[test]
    fn log_file_is_created_owner_writable_and_world_readable() {
        let path = std::env::temp_dir().join(format!("sstats_log_{}", std::process::id()));
        let path = path.to_str().unwrap().to_string();
        let _ = std::fs::remove_file(&path);

        let file = open_log_file(&path).unwrap();
        let mode = file.metadata().unwrap().permissions().mode();
        // The umask may clear group/other bits, never the owner's.
        assert_eq!(mode & 0o600, 0o600);

        // Append-create must not clobber existing content on reopen.
        std::fs::write(&path, "existing line\n").unwrap();
        drop(open_log_file(&path).unwrap());
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "existing line\n");
    }
}
