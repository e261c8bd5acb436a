//! Flat-file store of the last cumulative counter seen per port. One file
//! per port at `<prefix><port>`, holding the decimal byte count. The
//! prefix is joined by plain concatenation, so a directory layout needs
//! a trailing separator in the configuration.

use std::fs::OpenOptions;
use std::io::{Read, Write};
use std::os::unix::fs::OpenOptionsExt;
use std::path::PathBuf;
use thiserror::Error;
use tracing::trace;

#[derive(Clone)]
pub struct CounterStore {
    prefix: String,
}

#[derive(Error, Debug)]
pub enum CounterStoreError {
    #[error("unable to access last-reading file for port {port}: {source}")]
    Io {
        port: u16,
        source: std::io::Error,
    },
    #[error("last-reading file for port {port} holds non-numeric content {content:?}")]
    Corrupt { port: u16, content: String },
}

impl CounterStore {
    pub fn new<S: Into<String>>(prefix: S) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    fn path_for(&self, port: u16) -> PathBuf {
        PathBuf::from(format!("{}{}", self.prefix, port))
    }

    /// Last reading for the port, or `None` when no usable prior reading
    /// exists. The file is created empty on first access so that
    /// permissions are settled before the first write.
    pub fn read(&self, port: u16) -> Result<Option<u64>, CounterStoreError> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .mode(0o644)
            .open(self.path_for(port))
            .map_err(|e| CounterStoreError::Io { port, source: e })?;
        let mut raw = String::new();
        file.read_to_string(&mut raw)
            .map_err(|e| CounterStoreError::Io { port, source: e })?;
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            trace!("no prior reading for port {port}");
            return Ok(None);
        }
        let value = trimmed
            .parse::<u64>()
            .map_err(|_| CounterStoreError::Corrupt {
                port,
                content: trimmed.to_string(),
            })?;
        trace!("last reading for port {port}: {value}");
        Ok(Some(value))
    }

    /// Replaces the port's file with the decimal form of `value`.
    pub fn write(&self, port: u16, value: u64) -> Result<(), CounterStoreError> {
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o644)
            .open(self.path_for(port))
            .map_err(|e| CounterStoreError::Io { port, source: e })?;
        file.write_all(value.to_string().as_bytes())
            .map_err(|e| CounterStoreError::Io { port, source: e })?;
        Ok(())
    }
}
