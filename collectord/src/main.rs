// Copyright (c) James Kassemi, SC, US. All rights reserved.

//! Collector daemon: one windowed, gated, idempotent ingestion loop per
//! configured job.

use collector_engine::cache::{MemoryMetaCache, MetaCache, NoopCache};
use collector_engine::fetch::{Fetcher, HttpFetcher};
use collector_engine::job::CollectorJob;
use core_types::config::ConfigHandle;
use core_types::status::{MemoryStatusSink, StatusSink};
use log::{error, info, warn};
use market_calendar::{BusinessClock, HolidaySet};
use snapshot_sink::{DocumentStore, MemoryStore};
use std::sync::Arc;
use std::time::Duration;

const CONFIG_BASENAME: &str = "collector";
const RELOAD_INTERVAL: Duration = Duration::from_secs(60);
/// Jobs tick at least this often so hot-reloaded schedules apply promptly;
/// the run gate enforces the actual per-job spacing.
const MAX_TICK: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() {
    env_logger::init();

    let config = match ConfigHandle::load(CONFIG_BASENAME) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("failed to load configuration: {err}");
            std::process::exit(1);
        }
    };
    let snapshot = config.snapshot();

    let holidays = match HolidaySet::parse(&snapshot.holidays) {
        Ok(holidays) => Arc::new(holidays),
        Err(err) => {
            eprintln!("bad holiday calendar: {err}");
            std::process::exit(1);
        }
    };

    let fetcher: Arc<dyn Fetcher> = match HttpFetcher::new() {
        Ok(fetcher) => Arc::new(fetcher),
        Err(err) => {
            eprintln!("failed to build http client: {err}");
            std::process::exit(1);
        }
    };

    let store: Arc<dyn DocumentStore> = Arc::new(MemoryStore::new());
    let status = MemoryStatusSink::new();
    let meta_cache: Arc<dyn MetaCache> = if snapshot.cache_enabled {
        Arc::new(MemoryMetaCache::new())
    } else {
        Arc::new(NoopCache)
    };
    let clock = BusinessClock;

    let mut started = 0usize;
    for (job_id, job_cfg) in &snapshot.jobs {
        let job = match CollectorJob::new(
            job_id.clone(),
            config.clone(),
            Arc::clone(&store),
            Arc::clone(&fetcher),
            Arc::new(status.clone()) as Arc<dyn StatusSink>,
            Arc::clone(&meta_cache),
            Arc::clone(&holidays),
        ) {
            Ok(job) => job,
            Err(err) => {
                error!("{job_id}: not started: {err}");
                continue;
            }
        };

        let tick = Duration::from_secs(job_cfg.interval_s.max(1)).min(MAX_TICK);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(tick);
            loop {
                ticker.tick().await;
                job.run_once(clock.now()).await;
            }
        });
        started += 1;
    }
    info!("collectord started {started} of {} configured jobs", snapshot.jobs.len());

    let reload_config = config.clone();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(RELOAD_INTERVAL);
        ticker.tick().await; // skip the immediate first tick
        loop {
            ticker.tick().await;
            if let Err(err) = reload_config.reload() {
                warn!("config reload failed, keeping previous snapshot: {err}");
            }
        }
    });

    if let Err(err) = tokio::signal::ctrl_c().await {
        error!("signal wait failed: {err}");
    }
    info!("shutting down");
}
