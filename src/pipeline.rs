//! Per-port pipeline. Each port runs two independent subtasks in
//! parallel: rule-provisioning plus counter collection, and table
//! creation. Their results meet at a join; only when both succeeded is
//! the delta recorded. Failures are port-local: a port that fails any
//! stage is skipped, and the other ports are unaffected.

use crate::counter_store::{CounterStore, CounterStoreError};
use crate::db::{self, DbError};
use crate::delta::collect_delta;
use crate::iptables::{self, IptablesError};
use sqlx::{MySql, Pool};
use thiserror::Error;
use tracing::{error, trace};

#[derive(Error, Debug)]
pub enum PortError {
    #[error(transparent)]
    Iptables(#[from] IptablesError),
    #[error(transparent)]
    CounterStore(#[from] CounterStoreError),
}

/// Terminal state of one port's pipeline for this run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortState {
    Recorded,
    Skipped,
}

/// Fans out over all ports and waits for every pipeline to finish. This
/// await is the global barrier: the caller may only save the rule set
/// once it returns.
pub async fn run_all(
    ports: &[u16],
    pool: &Pool<MySql>,
    store: &CounterStore,
) -> Vec<(u16, PortState)> {
    let mut handles = Vec::with_capacity(ports.len());
    for &port in ports {
        let pool = pool.clone();
        let store = store.clone();
        handles.push((port, tokio::spawn(process_port(port, pool, store))));
    }
    let mut outcomes = Vec::with_capacity(handles.len());
    for (port, handle) in handles {
        match handle.await {
            Ok(state) => outcomes.push((port, state)),
            Err(e) => {
                error!("pipeline task for port {port} panicked: {e}");
                outcomes.push((port, PortState::Skipped));
            }
        }
    }
    outcomes
}

/// One port's pipeline: spawn the two subtasks, join, then record. The
/// delta and the table status flow back through the join handles, so no
/// shared state is needed between the subtasks.
async fn process_port(port: u16, pool: Pool<MySql>, store: CounterStore) -> PortState {
    let collect = tokio::spawn(rule_and_collect(port, store));
    let schema = {
        let pool = pool.clone();
        tokio::spawn(async move { db::ensure_table(&pool, port).await })
    };
    let (collect, schema) = tokio::join!(collect, schema);

    let delta = match collect {
        Ok(Ok(delta)) => Some(delta),
        Ok(Err(e)) => {
            error!("rule/collect failed on port {port}: {e}");
            None
        }
        Err(e) => {
            error!("rule/collect task for port {port} panicked: {e}");
            None
        }
    };
    let table_ok = match schema {
        Ok(Ok(())) => true,
        Ok(Err(e)) => {
            error!("table creation failed for port {port}: {e}");
            false
        }
        Err(e) => {
            error!("table task for port {port} panicked: {e}");
            false
        }
    };

    let delta = match (delta, table_ok) {
        (Some(delta), true) => delta,
        (delta, table_ok) => {
            error!(
                "skipping port {port}: collect ok: {}, table ok: {table_ok}",
                delta.is_some()
            );
            return PortState::Skipped;
        }
    };

    match db::record_traffic(&pool, port, delta).await {
        Ok(()) => PortState::Recorded,
        Err(DbError::Database(e)) => {
            error!("recording traffic on port {port} failed: {e}");
            PortState::Skipped
        }
    }
}

/// Subtask A: provision the accounting rule, read its counter, and turn
/// the reading into a delta. The last-reading file is already updated by
/// the time this returns, regardless of what happens downstream.
async fn rule_and_collect(port: u16, store: CounterStore) -> Result<u64, PortError> {
    iptables::ensure_rule(port).await?;
    let current = iptables::read_counter(port).await?;
    trace!("cumulative counter on port {port}: {current}");
    let delta = collect_delta(&store, port, current)?;
    Ok(delta)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::counter_store::test::scratch_store;

    // The subtasks that need live iptables and MySQL are exercised by the
    // deployment's smoke runs; here we pin down the parts that fail
    // before any external process is involved.

    #[tokio::test]
    async fn collect_fails_fast_on_a_corrupt_store() {
        let store = scratch_store("pipeline_corrupt");
        std::fs::write(
            std::env::temp_dir()
                .join(format!("sstats_pipeline_corrupt_{}", std::process::id()))
                .join("8388"),
            "junk",
        )
        .unwrap();
        let result = collect_delta(&store, 8388, 500);
        assert!(matches!(
            result.map_err(PortError::from),
            Err(PortError::CounterStore(_))
        ));
    }

    #[test]
    fn terminal_states_are_distinct() {
        assert_ne!(PortState::Recorded, PortState::Skipped);
    }
}
