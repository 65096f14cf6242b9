use crate::cache::MetaCache;
use crate::error::CollectError;
use crate::fetch::{fetch_with_retry, FetchOutcome, Fetcher, KeyStrategy};
use crate::runner::run_fan_out;
use chrono::{DateTime, Duration, Timelike, Utc};
use chrono_tz::Tz;
use core_types::config::{ConfigHandle, JobConfig};
use core_types::retry::RetryPolicy;
use core_types::status::{RunStatus, StatusSink};
use log::{debug, error, warn};
use market_calendar::{HolidaySet, ScheduleConfig, ScheduleError};
use run_gate::RunGate;
use snapshot_sink::{DocumentStore, SnapshotSink};
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum JobBuildError {
    #[error("job {0:?} not present in configuration")]
    UnknownJob(String),
    #[error("invalid schedule: {0}")]
    Schedule(#[from] ScheduleError),
}

/// One configuration-driven collector. A single `[jobs.<name>]` table plus
/// this type replaces what used to be a dedicated script per symbol.
///
/// `run_once` is the whole protocol: gate, window policy, fan-out of
/// fetch-and-upsert, status. The schedule is re-read from the live config on
/// every tick, so edits apply without a restart.
pub struct CollectorJob {
    job_id: String,
    gate: RunGate,
    fetcher: Arc<dyn Fetcher>,
    sink: SnapshotSink,
    key_strategy: KeyStrategy,
    status: Arc<dyn StatusSink>,
    meta_cache: Arc<dyn MetaCache>,
    config: ConfigHandle,
    holidays: Arc<HolidaySet>,
}

impl CollectorJob {
    pub fn new(
        job_id: String,
        config: ConfigHandle,
        store: Arc<dyn DocumentStore>,
        fetcher: Arc<dyn Fetcher>,
        status: Arc<dyn StatusSink>,
        meta_cache: Arc<dyn MetaCache>,
        holidays: Arc<HolidaySet>,
    ) -> Result<Self, JobBuildError> {
        let job_cfg = config
            .job(&job_id)
            .ok_or_else(|| JobBuildError::UnknownJob(job_id.clone()))?;
        // Fail fast on a schedule the window policy would reject every tick.
        build_schedule(&job_cfg)?;
        let key_strategy = key_strategy_for(&job_cfg);
        let sink = SnapshotSink::new(store, &job_cfg.collection, key_strategy.key_field());
        let tolerance = Duration::seconds(config.snapshot().gate_tolerance_s as i64);
        Ok(Self {
            gate: RunGate::new(&job_id, tolerance),
            job_id,
            fetcher,
            sink,
            key_strategy,
            status,
            meta_cache,
            config,
            holidays,
        })
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    /// Executes one scheduled tick at `now`. Gate and window rejections skip
    /// silently (debug trace) and write no status; a completed run overwrites
    /// the job's status snapshot whatever its outcome.
    pub async fn run_once(&self, now_business: DateTime<Tz>) {
        let Some(job_cfg) = self.config.job(&self.job_id) else {
            warn!("{}: job dropped from configuration, skipping", self.job_id);
            return;
        };
        let schedule = match build_schedule(&job_cfg) {
            Ok(schedule) => schedule,
            Err(err) => {
                error!("{}: schedule rejected: {err}", self.job_id);
                return;
            }
        };

        let now = now_business.with_timezone(&Utc);
        let Some(permit) = self.gate.try_acquire(now, schedule.interval()) else {
            debug!("{}: gate closed, skipping tick", self.job_id);
            return;
        };

        if !schedule.is_eligible(now_business, &self.holidays) {
            debug!(
                "{}: outside window, next eligible run {}",
                self.job_id,
                schedule.next_eligible_run(now_business, &self.holidays)
            );
            // Nothing ran; hand the spacing budget back so the first
            // in-window tick is not delayed by this grant.
            permit.cancel();
            return;
        }

        let endpoint = self.resolve_endpoint(&job_cfg, now_business).await;
        let retry = RetryPolicy::new(
            job_cfg.max_attempts,
            std::time::Duration::from_millis(job_cfg.retry_delay_ms),
        );
        let targets = if job_cfg.targets.is_empty() {
            vec![self.job_id.clone()]
        } else {
            job_cfg.targets.clone()
        };

        let fetcher = Arc::clone(&self.fetcher);
        let sink = self.sink.clone();
        let strategy = self.key_strategy.clone();
        let fan_out = run_fan_out(now, targets, move |target| {
            let url = endpoint.replace("{target}", &target);
            collect_target(
                Arc::clone(&fetcher),
                sink.clone(),
                strategy.clone(),
                retry.clone(),
                url,
                now,
            )
        });

        // The fan-out isolates per-target faults; anything escaping it is
        // recorded as an error outcome instead of crashing the tick loop.
        let run_status = match tokio::spawn(fan_out).await {
            Ok(status) => status,
            Err(join_err) => {
                error!("{}: run aborted unexpectedly: {join_err}", self.job_id);
                RunStatus::error(now)
            }
        };

        if let Err(err) = self.status.record(&self.job_id, run_status) {
            error!("{}: failed to persist run status: {err}", self.job_id);
        }
        // Permit drops here, reopening the gate.
    }

    /// Expands the endpoint template. The per-day expansion is cached for the
    /// remainder of the business day; cache failures fall through silently.
    async fn resolve_endpoint(&self, job_cfg: &JobConfig, now_business: DateTime<Tz>) -> String {
        if !job_cfg.endpoint.contains("{date}") {
            return job_cfg.endpoint.clone();
        }
        let date = now_business.date_naive();
        let cache_key = format!("endpoint:{}:{}", self.job_id, date);
        let now = now_business.with_timezone(&Utc);
        if let Some(cached) = self.meta_cache.get(&cache_key, now).await {
            return cached;
        }
        let resolved = job_cfg.endpoint.replace("{date}", &date.to_string());
        self.meta_cache
            .put(&cache_key, &resolved, ttl_until_end_of_day(now_business), now)
            .await;
        resolved
    }
}

async fn collect_target(
    fetcher: Arc<dyn Fetcher>,
    sink: SnapshotSink,
    strategy: KeyStrategy,
    retry: RetryPolicy,
    url: String,
    now: DateTime<Utc>,
) -> Result<(), CollectError> {
    match fetch_with_retry(fetcher.as_ref(), &url, &strategy, &retry, now).await {
        FetchOutcome::Ok(records) => {
            let items = records
                .into_iter()
                .map(|record| (record.natural_key, record.payload))
                .collect();
            sink.upsert_grouped(items, now).await?;
            Ok(())
        }
        FetchOutcome::Invalid(reason) => Err(CollectError::Validation(reason)),
        FetchOutcome::Transient(reason) => Err(CollectError::Transport(reason)),
    }
}

fn build_schedule(job_cfg: &JobConfig) -> Result<ScheduleConfig, ScheduleError> {
    ScheduleConfig::parse(
        job_cfg.interval_s as i64,
        &job_cfg.window_start,
        &job_cfg.window_end,
        &job_cfg.weekdays,
        job_cfg.enabled,
    )
}

fn key_strategy_for(job_cfg: &JobConfig) -> KeyStrategy {
    match &job_cfg.key_field {
        Some(field) => KeyStrategy::UpstreamField(field.clone()),
        None => KeyStrategy::CollectionTime,
    }
}

fn ttl_until_end_of_day(now: DateTime<Tz>) -> std::time::Duration {
    let elapsed = u64::from(now.num_seconds_from_midnight());
    std::time::Duration::from_secs(86_400u64.saturating_sub(elapsed).max(1))
}
