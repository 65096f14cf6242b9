// Copyright (c) James Kassemi, SC, US. All rights reserved.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use core_types::retry::RetryPolicy;
use log::warn;
use reqwest::Client;
use serde_json::Value;
use std::time::Duration;

/// One record ready for the sink: natural key plus document payload.
#[derive(Debug, Clone, PartialEq)]
pub struct KeyedRecord {
    pub natural_key: String,
    pub payload: Value,
}

/// Final result of a fetch episode, after retries are exhausted.
#[derive(Debug)]
pub enum FetchOutcome {
    Ok(Vec<KeyedRecord>),
    /// Structurally bad response, or natural key missing/empty.
    Invalid(String),
    /// Transport-level failure: timeout, reset, non-2xx.
    Transient(String),
}

/// How the natural key is derived from fetched content. An explicit per-job
/// choice: upstream-keyed jobs collapse identical snapshots, collection-time
/// jobs record every run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyStrategy {
    UpstreamField(String),
    CollectionTime,
}

impl KeyStrategy {
    /// Field name the stored document carries the key under.
    pub fn key_field(&self) -> &str {
        match self {
            KeyStrategy::UpstreamField(field) => field,
            KeyStrategy::CollectionTime => "collected_at",
        }
    }
}

/// Upstream seam; tests substitute scripted fetchers.
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Returns the parsed response body, or a transport-level reason.
    async fn fetch(&self, url: &str) -> Result<Value, String>;
}

/// Production fetcher: JSON over HTTPS with a fixed header set and a 30s
/// per-request timeout. No mutation of shared state.
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    pub fn new() -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent("collectord/0.1")
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<Value, String> {
        let response = self
            .client
            .get(url)
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(|err| err.to_string())?;
        let status = response.status();
        if !status.is_success() {
            return Err(format!("upstream returned {status}"));
        }
        response.json::<Value>().await.map_err(|err| err.to_string())
    }
}

enum FetchFailure {
    Transient(String),
    Invalid(String),
}

/// Fetches `url` with bounded, fixed-delay retries. Transport failures and
/// invalid payloads both retry; the last classification wins once attempts
/// are exhausted so the caller can log at the right severity.
pub async fn fetch_with_retry(
    fetcher: &dyn Fetcher,
    url: &str,
    strategy: &KeyStrategy,
    retry: &RetryPolicy,
    collected_at: DateTime<Utc>,
) -> FetchOutcome {
    let result = retry
        .run(|attempt| async move {
            if attempt > 0 {
                warn!("retrying {url} (attempt {})", attempt + 1);
            }
            let payload = fetcher
                .fetch(url)
                .await
                .map_err(FetchFailure::Transient)?;
            extract_records(&payload, strategy, collected_at).map_err(FetchFailure::Invalid)
        })
        .await;
    match result {
        Ok(records) => FetchOutcome::Ok(records),
        Err(FetchFailure::Transient(reason)) => FetchOutcome::Transient(reason),
        Err(FetchFailure::Invalid(reason)) => FetchOutcome::Invalid(reason),
    }
}

/// Validates the response shape and extracts one keyed record per item. A
/// top-level array fans out into multiple records; every item must yield a
/// key or the whole response is invalid.
pub fn extract_records(
    payload: &Value,
    strategy: &KeyStrategy,
    collected_at: DateTime<Utc>,
) -> Result<Vec<KeyedRecord>, String> {
    match payload {
        Value::Array(items) if items.is_empty() => Err("empty response array".to_string()),
        Value::Array(items) => items
            .iter()
            .map(|item| record_for(item, strategy, collected_at))
            .collect(),
        Value::Object(_) => Ok(vec![record_for(payload, strategy, collected_at)?]),
        other => Err(format!(
            "unexpected top-level value: {}",
            value_kind(other)
        )),
    }
}

fn record_for(
    item: &Value,
    strategy: &KeyStrategy,
    collected_at: DateTime<Utc>,
) -> Result<KeyedRecord, String> {
    if !item.is_object() {
        return Err(format!("record is not an object: {}", value_kind(item)));
    }
    let natural_key = match strategy {
        KeyStrategy::UpstreamField(field) => match item.get(field) {
            Some(Value::String(s)) if !s.trim().is_empty() => s.clone(),
            Some(Value::Number(n)) => n.to_string(),
            _ => return Err(format!("natural key field {field:?} missing or empty")),
        },
        KeyStrategy::CollectionTime => collected_at.to_rfc3339(),
    };
    Ok(KeyedRecord {
        natural_key,
        payload: item.clone(),
    })
}

fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use parking_lot::Mutex;
    use serde_json::json;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2021, 3, 1, 9, 30, 0).unwrap()
    }

    /// Scripted fetcher: pops the next response per call.
    struct ScriptedFetcher {
        responses: Mutex<Vec<Result<Value, String>>>,
        calls: Mutex<usize>,
    }

    impl ScriptedFetcher {
        fn new(responses: Vec<Result<Value, String>>) -> Self {
            Self {
                responses: Mutex::new(responses),
                calls: Mutex::new(0),
            }
        }

        fn calls(&self) -> usize {
            *self.calls.lock()
        }
    }

    #[async_trait]
    impl Fetcher for ScriptedFetcher {
        async fn fetch(&self, _url: &str) -> Result<Value, String> {
            *self.calls.lock() += 1;
            let mut responses = self.responses.lock();
            if responses.is_empty() {
                Err("script exhausted".to_string())
            } else {
                responses.remove(0)
            }
        }
    }

    fn upstream_key() -> KeyStrategy {
        KeyStrategy::UpstreamField("report_date".to_string())
    }

    #[tokio::test(start_paused = true)]
    async fn succeeds_on_third_attempt_with_exactly_three_calls() {
        let fetcher = ScriptedFetcher::new(vec![
            Err("timeout".to_string()),
            Err("connection reset".to_string()),
            Ok(json!({"report_date": "2021-03-01", "close": 100})),
        ]);
        let retry = RetryPolicy::new(3, Duration::from_millis(50));
        let outcome =
            fetch_with_retry(&fetcher, "http://x", &upstream_key(), &retry, now()).await;
        assert!(matches!(outcome, FetchOutcome::Ok(records) if records.len() == 1));
        assert_eq!(fetcher.calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_transport_failures_are_transient() {
        let fetcher = ScriptedFetcher::new(vec![
            Err("timeout".to_string()),
            Err("timeout".to_string()),
        ]);
        let retry = RetryPolicy::new(2, Duration::from_millis(50));
        let outcome =
            fetch_with_retry(&fetcher, "http://x", &upstream_key(), &retry, now()).await;
        assert!(matches!(outcome, FetchOutcome::Transient(_)));
        assert_eq!(fetcher.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn missing_natural_key_is_invalid_and_retries() {
        let fetcher = ScriptedFetcher::new(vec![
            Ok(json!({"close": 100})),
            Ok(json!({"report_date": "", "close": 100})),
        ]);
        let retry = RetryPolicy::new(2, Duration::from_millis(50));
        let outcome =
            fetch_with_retry(&fetcher, "http://x", &upstream_key(), &retry, now()).await;
        assert!(matches!(outcome, FetchOutcome::Invalid(_)));
        assert_eq!(fetcher.calls(), 2);
    }

    #[test]
    fn arrays_fan_out_and_numbers_key() {
        let payload = json!([
            {"report_date": "2021-03-01", "close": 100},
            {"report_date": 20210302, "close": 101},
        ]);
        let records = extract_records(&payload, &upstream_key(), now()).unwrap();
        assert_eq!(records[0].natural_key, "2021-03-01");
        assert_eq!(records[1].natural_key, "20210302");
    }

    #[test]
    fn collection_time_keys_on_the_run_timestamp() {
        let payload = json!({"close": 100});
        let records =
            extract_records(&payload, &KeyStrategy::CollectionTime, now()).unwrap();
        assert_eq!(records[0].natural_key, now().to_rfc3339());
    }

    #[test]
    fn non_object_shapes_are_invalid() {
        assert!(extract_records(&json!("text"), &upstream_key(), now()).is_err());
        assert!(extract_records(&json!([]), &upstream_key(), now()).is_err());
        assert!(extract_records(&json!([1, 2]), &upstream_key(), now()).is_err());
    }
}
