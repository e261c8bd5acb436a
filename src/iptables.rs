//! Wraps the external `iptables` CLI. Three operations: ensure a per-port
//! accounting rule exists on OUTPUT, read the byte counter attached to
//! that rule, and persist the rule set with `iptables-save`.
//!
//! The accounting rule has no target; it only increments counters. Every
//! invocation passes `-w` so concurrent runs serialize on the xtables
//! lock.

use thiserror::Error;
use tokio::process::Command;
use tracing::{error, trace};

const IPTABLES: &str = "iptables";
const IPTABLES_SAVE: &str = "iptables-save";

#[derive(Error, Debug)]
pub enum IptablesError {
    #[error("unable to run {command}: {source}")]
    Spawn {
        command: &'static str,
        source: std::io::Error,
    },
    #[error("appending accounting rule for port {port} failed")]
    AppendFailed { port: u16 },
    #[error("listing counters failed with {status}")]
    ListFailed { status: std::process::ExitStatus },
    #[error("counter listing is not valid UTF-8")]
    Utf8,
    #[error("no accounting rule found for port {port}")]
    CounterMissing { port: u16 },
    #[error("counter column {value:?} for port {port} is not a number")]
    CounterParse { port: u16, value: String },
}

fn rule_args(port: u16) -> [String; 6] {
    [
        "OUTPUT".into(),
        "-w".into(),
        "-p".into(),
        "tcp".into(),
        "--sport".into(),
        port.to_string(),
    ]
}

/// Presence decision for the `-C` check. Observed CLI behavior: a
/// present rule produces no output on either stream, a missing one
/// complains on stderr. The exit status does not decide; some iptables
/// versions signal absence by status alone, and appending on that signal
/// would duplicate the rule and double-count. Check errors, spawn
/// failures included, also do not decide.
fn rule_missing(check: &std::io::Result<std::process::Output>) -> bool {
    match check {
        Ok(output) => !(output.stdout.is_empty() && output.stderr.is_empty()),
        Err(_) => false,
    }
}

/// Makes sure the accounting rule for `port` exists, appending it when
/// missing. Errors from the check itself are logged but never fatal; the
/// presence decision is `rule_missing` on the check's output alone.
pub async fn ensure_rule(port: u16) -> Result<(), IptablesError> {
    trace!("checking accounting rule for port {port}");
    let check = Command::new(IPTABLES)
        .arg("-C")
        .args(rule_args(port))
        .output()
        .await;
    match &check {
        // Expected when the rule does not exist yet.
        Ok(output) if !output.status.success() => {
            let mut combined = output.stdout.clone();
            combined.extend_from_slice(&output.stderr);
            error!(
                "rule check for port {port} exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&combined).trim()
            );
        }
        Err(e) => error!("unable to run rule check for port {port}: {e}"),
        _ => {}
    }
    if !rule_missing(&check) {
        trace!("accounting rule for port {port} already exists");
        return Ok(());
    }

    let append = Command::new(IPTABLES)
        .arg("-A")
        .args(rule_args(port))
        .output()
        .await
        .map_err(|e| IptablesError::Spawn {
            command: IPTABLES,
            source: e,
        })?;
    if !append.status.success() {
        error!(
            "appending accounting rule for port {port} failed with {}: {}",
            append.status,
            String::from_utf8_lossy(&append.stderr).trim()
        );
        return Err(IptablesError::AppendFailed { port });
    }
    trace!("appended accounting rule for port {port}");
    Ok(())
}

/// Reads the cumulative byte counter for the port's accounting rule from
/// the full filter-table listing.
pub async fn read_counter(port: u16) -> Result<u64, IptablesError> {
    let listing = Command::new(IPTABLES)
        .args(["-vnL", "-t", "filter", "-w", "-x"])
        .output()
        .await
        .map_err(|e| IptablesError::Spawn {
            command: IPTABLES,
            source: e,
        })?;
    if !listing.status.success() {
        return Err(IptablesError::ListFailed {
            status: listing.status,
        });
    }
    let text = String::from_utf8(listing.stdout).map_err(|_| IptablesError::Utf8)?;
    extract_counter(&text, port)
}

/// Pulls the byte column out of a verbose `iptables -vnL -x` listing.
/// The accounting rule is the line ending in `spt:<port>`; with `-x` the
/// second column is the exact byte count. Only the first matching line is
/// used.
fn extract_counter(listing: &str, port: u16) -> Result<u64, IptablesError> {
    let suffix = format!("spt:{port}");
    for line in listing.lines() {
        let line = line.trim_end();
        if !line.ends_with(suffix.as_str()) {
            continue;
        }
        let bytes = match line.split_whitespace().nth(1) {
            Some(column) => column,
            None => continue,
        };
        return bytes.parse::<u64>().map_err(|_| IptablesError::CounterParse {
            port,
            value: bytes.to_string(),
        });
    }
    Err(IptablesError::CounterMissing { port })
}

/// Persists the current rule set. Failure here costs only re-provisioning
/// on the next run, so it is logged and swallowed.
pub async fn save() {
    match Command::new(IPTABLES_SAVE).output().await {
        Ok(output) if output.status.success() => trace!("iptables rules saved"),
        Ok(output) => error!(
            "{IPTABLES_SAVE} failed with {}: {}",
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        ),
        Err(e) => error!("unable to run {IPTABLES_SAVE}: {e}"),
    }
}
