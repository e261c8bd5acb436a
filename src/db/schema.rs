//! Lazily creates the per-port time-series table. The timestamp primary
//! key caps inserts at one row per second per port, which a cron-driven
//! agent never approaches.

use super::{table_name, DbError};
use sqlx::{MySql, Pool};
use tracing::{error, trace};

fn create_table_sql(port: u16) -> String {
    format!(
        "CREATE TABLE IF NOT EXISTS {} ( \
            traffic_diff BIGINT NOT NULL DEFAULT 0, \
            collect_time TIMESTAMP DEFAULT CURRENT_TIMESTAMP, \
            PRIMARY KEY (collect_time) \
        ) ENGINE=InnoDB DEFAULT CHARSET=utf8",
        table_name(port)
    )
}

pub async fn ensure_table(cnn: &Pool<MySql>, port: u16) -> Result<(), DbError> {
    if port <= 1024 || port > 49151 {
        // Out-of-band ports are suspicious but still accounted for.
        error!("port {port} is outside the registered port range");
    }
    trace!("ensuring table {} exists", table_name(port));
    sqlx::query(&create_table_sql(port))
        .execute(cnn)
        .await
        .map_err(|e| DbError::Database(e.to_string()))?;
    trace!("table {} ready", table_name(port));
    Ok(())
}
