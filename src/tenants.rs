//! Reads the tenant directory: the shadowsocks server configuration,
//! whose `port_password` object maps listening ports to credentials.
//! Only the keys matter here; the credentials are opaque to the agent.

use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use thiserror::Error;
use tracing::error;

#[derive(Deserialize)]
struct TenantDirectory {
    port_password: HashMap<String, Value>,
}

#[derive(Error, Debug)]
pub enum TenantError {
    #[error("unable to read tenant directory {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("unable to parse tenant directory {path}: {source}")]
    Parse {
        path: String,
        source: serde_json::Error,
    },
}

/// Returns the configured tenant ports, in no particular order. Keys that
/// do not parse as a port number are logged and skipped; a missing or
/// malformed `port_password` object aborts the run.
pub fn load(path: &str) -> Result<Vec<u16>, TenantError> {
    let raw = std::fs::read_to_string(path).map_err(|e| TenantError::Read {
        path: path.to_string(),
        source: e,
    })?;
    ports_from_str(&raw).map_err(|e| TenantError::Parse {
        path: path.to_string(),
        source: e,
    })
}

fn ports_from_str(raw: &str) -> Result<Vec<u16>, serde_json::Error> {
    let directory: TenantDirectory = serde_json::from_str(raw)?;
    let mut ports = Vec::with_capacity(directory.port_password.len());
    for key in directory.port_password.keys() {
        match key.parse::<u16>() {
            Ok(port) => ports.push(port),
            Err(e) => error!("skipping tenant port key {key}: {e}"),
        }
    }
    Ok(ports)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn collects_ports_from_keys() {
        let mut ports = ports_from_str(
            r#"{"server": "0.0.0.0", "port_password": {"8388": "pw-a", "8389": "pw-b"}}"#,
        )
        .unwrap();
        ports.sort_unstable();
        assert_eq!(ports, vec![8388, 8389]);
    }

    #[test]
    fn bad_key_is_skipped_not_fatal() {
        let ports =
            ports_from_str(r#"{"port_password": {"abc": "pw", "8388": "pw"}}"#).unwrap();
        assert_eq!(ports, vec![8388]);
    }

    #[test]
    fn empty_directory_yields_no_ports() {
        let ports = ports_from_str(r#"{"port_password": {}}"#).unwrap();
        assert!(ports.is_empty());
    }

    #[test]
    fn missing_field_is_fatal() {
        assert!(ports_from_str(r#"{"server": "0.0.0.0"}"#).is_err());
    }

    #[test]
    fn malformed_json_is_fatal() {
        assert!(ports_from_str("not json").is_err());
    }
}
