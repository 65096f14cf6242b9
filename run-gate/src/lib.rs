//! Per-job run gate: non-blocking mutual exclusion plus minimum-interval
//! spacing, so a scheduler tick firing while the previous run is still in
//! flight (or too soon after it) is refused instead of overlapping.
//!
//! Gate state is process-local and never persisted. A restart forgets both
//! the in-flight flag and the last run time; that is acceptable because the
//! idempotent sink, not this gate, is the source of truth for duplicate
//! prevention.

use chrono::{DateTime, Duration, Utc};
use log::debug;
use parking_lot::Mutex;
use std::sync::Arc;

#[derive(Debug, Default)]
struct GateState {
    in_flight: bool,
    last_run_at: Option<DateTime<Utc>>,
}

/// One gate per job. Clones share state, so the job context and its spawned
/// work can hold the same gate.
#[derive(Debug, Clone)]
pub struct RunGate {
    job_id: Arc<str>,
    tolerance: Duration,
    state: Arc<Mutex<GateState>>,
}

impl RunGate {
    pub fn new(job_id: &str, tolerance: Duration) -> Self {
        Self {
            job_id: Arc::from(job_id),
            tolerance,
            state: Arc::new(Mutex::new(GateState::default())),
        }
    }

    pub fn with_default_tolerance(job_id: &str) -> Self {
        Self::new(job_id, Duration::seconds(10))
    }

    /// Attempts to start a run at `now`. Never blocks and never errors.
    ///
    /// Returns `None` when a run is already in flight, or when less than
    /// `interval - tolerance` has elapsed since the last granted run. On a
    /// grant, `last_run_at` advances to `now` and the returned permit keeps
    /// the gate closed until it is dropped.
    pub fn try_acquire(&self, now: DateTime<Utc>, interval: Duration) -> Option<RunPermit> {
        let mut state = self.state.lock();
        if state.in_flight {
            debug!("{}: run already in flight, skipping tick", self.job_id);
            return None;
        }
        if let Some(last) = state.last_run_at {
            if now.signed_duration_since(last) < interval - self.tolerance {
                debug!(
                    "{}: last run at {}, too soon for another",
                    self.job_id, last
                );
                return None;
            }
        }
        let previous = state.last_run_at;
        state.in_flight = true;
        state.last_run_at = Some(now);
        Some(RunPermit {
            state: Arc::clone(&self.state),
            previous,
        })
    }

    pub fn last_run_at(&self) -> Option<DateTime<Utc>> {
        self.state.lock().last_run_at
    }
}

/// Scoped acquisition: dropping the permit reopens the gate on every exit
/// path, including panics in the guarded work.
#[derive(Debug)]
pub struct RunPermit {
    state: Arc<Mutex<GateState>>,
    previous: Option<DateTime<Utc>>,
}

impl RunPermit {
    /// Relinquishes a grant whose run never executed, restoring the prior
    /// `last_run_at` so the skipped tick does not consume spacing budget.
    /// A pre-open tick on a long-interval job would otherwise push the first
    /// in-window run back by up to a full interval.
    pub fn cancel(self) {
        self.state.lock().last_run_at = self.previous;
        // Drop clears the in-flight flag.
    }
}

impl Drop for RunPermit {
    fn drop(&mut self) {
        self.state.lock().in_flight = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn base() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2021, 3, 1, 9, 15, 0).unwrap()
    }

    #[test]
    fn second_acquire_before_release_is_refused() {
        let gate = RunGate::with_default_tolerance("job");
        let interval = Duration::seconds(180);
        let permit = gate.try_acquire(base(), interval);
        assert!(permit.is_some());
        assert!(gate.try_acquire(base(), interval).is_none());
    }

    #[test]
    fn acquire_succeeds_after_release_and_a_full_interval() {
        let gate = RunGate::with_default_tolerance("job");
        let interval = Duration::seconds(180);
        drop(gate.try_acquire(base(), interval));
        let later = base() + Duration::seconds(180);
        assert!(gate.try_acquire(later, interval).is_some());
    }

    #[test]
    fn acquire_is_refused_inside_the_spacing_tolerance() {
        let gate = RunGate::with_default_tolerance("job");
        let interval = Duration::seconds(180);
        drop(gate.try_acquire(base(), interval));
        // 180 - 10 = 170s is the minimum spacing; 160s is too soon.
        let too_soon = base() + Duration::seconds(160);
        assert!(gate.try_acquire(too_soon, interval).is_none());
        // 170s on the nose is allowed.
        let at_tolerance = base() + Duration::seconds(170);
        assert!(gate.try_acquire(at_tolerance, interval).is_some());
    }

    #[test]
    fn last_run_at_advances_on_every_grant() {
        let gate = RunGate::with_default_tolerance("job");
        let interval = Duration::seconds(60);
        assert!(gate.last_run_at().is_none());
        drop(gate.try_acquire(base(), interval));
        assert_eq!(gate.last_run_at(), Some(base()));
        let later = base() + Duration::seconds(60);
        drop(gate.try_acquire(later, interval));
        assert_eq!(gate.last_run_at(), Some(later));
    }

    #[test]
    fn cancelled_permit_restores_the_previous_last_run() {
        let gate = RunGate::with_default_tolerance("job");
        let interval = Duration::seconds(3600);

        // A granted-but-skipped tick gives its spacing budget back.
        let permit = gate.try_acquire(base(), interval).unwrap();
        permit.cancel();
        assert_eq!(gate.last_run_at(), None);
        let soon = base() + Duration::seconds(300);
        assert!(gate.try_acquire(soon, interval).is_some());
        assert_eq!(gate.last_run_at(), Some(soon));

        // Cancelling restores the prior run's timestamp, not just None.
        let later = soon + Duration::seconds(3600);
        let permit = gate.try_acquire(later, interval).unwrap();
        permit.cancel();
        assert_eq!(gate.last_run_at(), Some(soon));
    }

    #[test]
    fn permit_reopens_the_gate_on_panic() {
        let gate = RunGate::with_default_tolerance("job");
        let interval = Duration::seconds(60);
        let inner = gate.clone();
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(move || {
            let _permit = inner.try_acquire(base(), interval);
            panic!("guarded work failed");
        }));
        assert!(result.is_err());
        // Gate reopened; spacing still applies from the granted run.
        let later = base() + Duration::seconds(60);
        assert!(gate.try_acquire(later, interval).is_some());
    }
}
