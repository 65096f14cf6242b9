use crate::error::CollectError;
use chrono::{DateTime, Utc};
use core_types::status::{RunOutcome, RunStatus};
use log::error;
use std::collections::BTreeMap;
use std::future::Future;

/// Runs `per_target` for every target, each isolated in its own task, and
/// waits for all of them before finalizing. One target's failure or panic
/// marks that target false and never aborts the rest.
///
/// An empty target list aggregates to `Success` over an empty map: every
/// target (vacuously) succeeded. Callers with a meaningful "nothing to do"
/// state should guard before fanning out, as `CollectorJob` does by
/// substituting the job id for an empty list.
pub async fn run_fan_out<F, Fut>(
    now: DateTime<Utc>,
    targets: Vec<String>,
    per_target: F,
) -> RunStatus
where
    F: Fn(String) -> Fut,
    Fut: Future<Output = Result<(), CollectError>> + Send + 'static,
{
    let mut handles = Vec::with_capacity(targets.len());
    for target in targets {
        let work = tokio::spawn(per_target(target.clone()));
        handles.push((target, work));
    }

    // Barrier: every target outcome must be known before the status is built.
    let mut per_target_results = BTreeMap::new();
    for (target, handle) in handles {
        let ok = match handle.await {
            Ok(Ok(())) => true,
            Ok(Err(err)) => {
                error!("target {target} failed: {err}");
                false
            }
            Err(join_err) => {
                error!("target {target} aborted: {join_err}");
                false
            }
        };
        per_target_results.insert(target, ok);
    }

    let outcome = aggregate(&per_target_results);
    RunStatus {
        last_run_at: now,
        outcome,
        per_target: per_target_results,
    }
}

fn aggregate(results: &BTreeMap<String, bool>) -> RunOutcome {
    let succeeded = results.values().filter(|ok| **ok).count();
    if succeeded == results.len() {
        RunOutcome::Success
    } else if succeeded > 0 {
        RunOutcome::Partial
    } else {
        RunOutcome::Failed
    }
}
