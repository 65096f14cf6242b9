// Copyright (c) James Kassemi, SC, US. All rights reserved.

//! The collection core: fetch-with-retry, fan-out aggregation, the optional
//! metadata side-cache, and the configuration-driven collector job that ties
//! gate, window policy, and sink together.

pub mod cache;
pub mod error;
pub mod fetch;
pub mod job;
pub mod runner;

pub use cache::{MemoryMetaCache, MetaCache, NoopCache};
pub use error::CollectError;
pub use fetch::{fetch_with_retry, FetchOutcome, Fetcher, HttpFetcher, KeyStrategy, KeyedRecord};
pub use job::{CollectorJob, JobBuildError};
pub use runner::run_fan_out;
