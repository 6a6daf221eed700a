//! Waiting on a coordinate set that an upstream picker is still filling.

use log::info;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Result, TopazError};
use crate::types::CoordinateSet;
use crate::utils::read_json;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(10);

/// Least amount of time one poll counts toward `max_wait`
const MIN_POLL_STEP: Duration = Duration::from_secs(1);

/// Anything that can hand out the current state of a coordinate set
pub trait CoordinateSource {
    fn snapshot(&self) -> Result<CoordinateSet>;
}

/// Coordinate set stored as a JSON document, re-read on every snapshot
pub struct JsonCoordinateSource {
    path: PathBuf,
}

impl JsonCoordinateSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl CoordinateSource for JsonCoordinateSource {
    fn snapshot(&self) -> Result<CoordinateSet> {
        read_json(&self.path)
    }
}

pub trait Sleeper {
    fn sleep(&self, duration: Duration);
}

pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

#[derive(Debug, Clone, Copy)]
pub struct PollPolicy {
    pub interval: Duration,
    pub max_wait: Option<Duration>,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            interval: DEFAULT_POLL_INTERVAL,
            max_wait: None,
        }
    }
}

/// Distinct micrograph ids referenced by the coordinates, lowest first,
/// capped at `limit`.
pub fn distinct_micrograph_ids(set: &CoordinateSet, limit: usize) -> Vec<u64> {
    let ids: BTreeSet<u64> = set.coordinates.iter().map(|coord| coord.mic_id).collect();
    ids.into_iter().take(limit).collect()
}

/// Poll `source` until its coordinates cover `minimum` distinct
/// micrographs, returning the snapshot and the chosen ids.
///
/// Fails once the source reports its stream closed without reaching the
/// minimum, or when `policy.max_wait` worth of sleeping has passed. Each
/// poll counts as at least one second, so a zero interval still times out.
pub fn wait_for_micrographs<S, Z>(
    source: &S,
    minimum: usize,
    policy: &PollPolicy,
    sleeper: &Z,
) -> Result<(CoordinateSet, Vec<u64>)>
where
    S: CoordinateSource + ?Sized,
    Z: Sleeper + ?Sized,
{
    let mut waited = Duration::ZERO;

    loop {
        let snapshot = source.snapshot()?;
        let ids = distinct_micrograph_ids(&snapshot, minimum);
        if ids.len() >= minimum {
            return Ok((snapshot, ids));
        }

        if snapshot.stream_closed {
            return Err(TopazError::InsufficientData(format!(
                "input coordinates are closed with {} of the {} micrographs needed for training",
                ids.len(),
                minimum
            )));
        }
        if let Some(max_wait) = policy.max_wait {
            if waited >= max_wait {
                return Err(TopazError::WaitTimedOut {
                    waited_secs: waited.as_secs(),
                    found: ids.len(),
                    required: minimum,
                });
            }
        }

        info!("Not yet there: {} of {} micrographs", ids.len(), minimum);
        sleeper.sleep(policy.interval);
        waited += policy.interval.max(MIN_POLL_STEP);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Coordinate;
    use std::cell::Cell;

    struct OpenEmptySource;

    impl CoordinateSource for OpenEmptySource {
        fn snapshot(&self) -> Result<CoordinateSet> {
            Ok(CoordinateSet::default())
        }
    }

    #[derive(Default)]
    struct CountingSleeper {
        sleeps: Cell<usize>,
    }

    impl Sleeper for CountingSleeper {
        fn sleep(&self, _duration: Duration) {
            self.sleeps.set(self.sleeps.get() + 1);
            assert!(self.sleeps.get() < 1000, "wait never gave up");
        }
    }

    #[test]
    fn test_zero_interval_still_times_out() {
        let policy = PollPolicy {
            interval: Duration::ZERO,
            max_wait: Some(Duration::from_secs(5)),
        };
        let sleeper = CountingSleeper::default();

        let result = wait_for_micrographs(&OpenEmptySource, 2, &policy, &sleeper);
        assert!(matches!(result, Err(TopazError::WaitTimedOut { .. })));
        assert_eq!(sleeper.sleeps.get(), 5);
    }

    #[test]
    fn test_distinct_ids_are_sorted_and_capped() {
        let set = CoordinateSet {
            coordinates: vec![
                Coordinate::new(9, 0, 0),
                Coordinate::new(2, 0, 0),
                Coordinate::new(9, 1, 1),
                Coordinate::new(4, 0, 0),
            ],
            ..Default::default()
        };
        assert_eq!(distinct_micrograph_ids(&set, 2), vec![2, 4]);
    }
}
