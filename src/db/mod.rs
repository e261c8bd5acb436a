//! MySQL access: connection pool, per-port schema management and the
//! traffic recorder. The pool is cloned into the per-port tasks; sqlx
//! handles concurrent prepared-statement execution internally.

mod record;
mod schema;

pub use record::record_traffic;
pub use schema::ensure_table;

use crate::config::DbConfig;
use sqlx::mysql::MySqlPoolOptions;
use sqlx::{MySql, Pool};
use thiserror::Error;
use tracing::trace;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("database error: {0}")]
    Database(String),
}

/// Builds the pool and pings the server once. A failed ping is fatal to
/// the run; nothing port-local has happened yet.
pub async fn connect(config: &DbConfig) -> Result<Pool<MySql>, sqlx::Error> {
    let pool = MySqlPoolOptions::new()
        .max_connections(16)
        .connect(&config.url())
        .await?;
    sqlx::query("SELECT 1").execute(&pool).await?;
    trace!("database connection established");
    Ok(pool)
}

pub(crate) fn table_name(port: u16) -> String {
    format!("port_{port}")
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn table_names_are_per_port() {
        assert_eq!(table_name(8388), "port_8388");
        assert_eq!(table_name(1), "port_1");
    }
}
