//! Turns a cumulative counter reading into a per-interval delta using the
//! last-reading file. The policy, in evaluation order:
//!
//! 1. A zero reading means the counters were flushed since the last run;
//!    report zero and leave the last-reading file untouched.
//! 2. Otherwise the current reading is persisted before any delta is
//!    reported, so the file always reflects the reading that produced the
//!    most recent delta.
//! 3. No prior reading (or a prior reading of zero) makes the current
//!    reading the baseline: the whole counter is reported.
//! 4. A prior reading larger than the current one means the rule was
//!    recreated mid-interval; the interval is assumed to have started at
//!    zero and the whole counter is reported.
//! 5. Otherwise the delta is the plain difference.

use crate::counter_store::{CounterStore, CounterStoreError};
use tracing::{error, trace};

pub fn collect_delta(
    store: &CounterStore,
    port: u16,
    current: u64,
) -> Result<u64, CounterStoreError> {
    if current == 0 {
        trace!("counter on port {port} is zero, treating as post-reset");
        return Ok(0);
    }
    let previous = store.read(port)?;
    store.write(port, current)?;
    let delta = match previous {
        None | Some(0) => current,
        Some(prev) if prev > current => {
            error!("counter on port {port} went backwards: {prev} -> {current}");
            current
        }
        Some(prev) => current - prev,
    };
    trace!("traffic delta on port {port}: {delta}");
    Ok(delta)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::counter_store::test::scratch_store;

    #[test]
    fn first_reading_becomes_the_baseline() {
        let store = scratch_store("delta_first");
        assert_eq!(collect_delta(&store, 8388, 1000).unwrap(), 1000);
        assert_eq!(store.read(8388).unwrap(), Some(1000));
    }

    #[test]
    fn steady_growth_reports_the_difference() {
        let store = scratch_store("delta_growth");
        store.write(8388, 1000).unwrap();
        assert_eq!(collect_delta(&store, 8388, 1500).unwrap(), 500);
        assert_eq!(store.read(8388).unwrap(), Some(1500));
    }

    #[test]
    fn unchanged_counter_reports_zero() {
        let store = scratch_store("delta_idle");
        store.write(8388, 1500).unwrap();
        assert_eq!(collect_delta(&store, 8388, 1500).unwrap(), 0);
    }

    #[test]
    fn backwards_counter_restarts_from_zero() {
        let store = scratch_store("delta_reset");
        store.write(8388, 1500).unwrap();
        assert_eq!(collect_delta(&store, 8388, 200).unwrap(), 200);
        assert_eq!(store.read(8388).unwrap(), Some(200));
    }

    #[test]
    fn zero_reading_skips_the_store_entirely() {
        let store = scratch_store("delta_zero");
        store.write(8388, 1500).unwrap();
        assert_eq!(collect_delta(&store, 8388, 0).unwrap(), 0);
        // Flushed counters must not clobber the stored reading.
        assert_eq!(store.read(8388).unwrap(), Some(1500));
    }

    #[test]
    fn stored_zero_is_treated_as_fresh_baseline() {
        let store = scratch_store("delta_stored_zero");
        store.write(8388, 0).unwrap();
        assert_eq!(collect_delta(&store, 8388, 800).unwrap(), 800);
    }

    #[test]
    fn corrupt_store_aborts_the_port() {
        let store = scratch_store("delta_corrupt");
        std::fs::write(
            std::env::temp_dir()
                .join(format!("sstats_delta_corrupt_{}", std::process::id()))
                .join("8388"),
            "not-a-number",
        )
        .unwrap();
        assert!(collect_delta(&store, 8388, 500).is_err());
    }

    #[test]
    fn delta_never_exceeds_current() {
        let store = scratch_store("delta_bound");
        for (prev, current) in [(0u64, 10u64), (10, 10), (10, 25), (25, 3)] {
            store.write(8388, prev).unwrap();
            let delta = collect_delta(&store, 8388, current).unwrap();
            assert!(delta <= current);
        }
    }
}
