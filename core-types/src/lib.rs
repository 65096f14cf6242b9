// Copyright (c) James Kassemi, SC, US. All rights reserved.

//! Shared configuration, run-status types, and the retry policy used across
//! the collector services.

pub mod config;
pub mod retry;
pub mod status;

pub use config::{AppConfig, ConfigHandle, JobConfig};
pub use retry::RetryPolicy;
pub use status::{MemoryStatusSink, RunOutcome, RunStatus, StatusSink};
