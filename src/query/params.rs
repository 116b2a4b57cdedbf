// SPDX-License-Identifier: Apache-2.0

//! Query-string parsing into typed filter descriptors. Parsing never
//! fails: malformed values degrade to the documented defaults and a
//! missing or unparseable field simply disables its predicate.

use crate::telemetry::record::StatusCode;
use chrono::{DateTime, TimeZone, Utc};
use std::collections::HashMap;

pub const DEFAULT_PAGE_LIMIT: usize = 100;
pub const MAX_PAGE_LIMIT: usize = 1000;

/// Decoded query-string parameters. Repeated keys keep the last value.
#[derive(Debug, Default)]
pub struct QueryParams(HashMap<String, String>);

impl QueryParams {
    pub fn parse(query: Option<&str>) -> Self {
        let mut map = HashMap::new();
        if let Some(query) = query {
            for (key, value) in url::form_urlencoded::parse(query.as_bytes()) {
                map.insert(key.into_owned(), value.into_owned());
            }
        }
        Self(map)
    }

    fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str).filter(|v| !v.is_empty())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Pagination {
    pub offset: usize,
    pub limit: usize,
}

impl Default for Pagination {
    fn default() -> Self {
        Self {
            offset: 0,
            limit: DEFAULT_PAGE_LIMIT,
        }
    }
}

impl Pagination {
    fn from_params(params: &QueryParams) -> Self {
        let mut pagination = Self::default();
        if let Some(offset) = params.get("offset").and_then(|v| v.parse::<i64>().ok()) {
            if offset >= 0 {
                pagination.offset = offset as usize;
            }
        }
        if let Some(limit) = params.get("limit").and_then(|v| v.parse::<i64>().ok()) {
            if limit > 0 {
                pagination.limit = (limit as usize).min(MAX_PAGE_LIMIT);
            }
        }
        pagination
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct TimeRange {
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
}

impl TimeRange {
    fn from_params(params: &QueryParams) -> Self {
        Self {
            start: params.get("start_time").and_then(parse_timestamp),
            end: params.get("end_time").and_then(parse_timestamp),
        }
    }

    pub fn contains(&self, instant: DateTime<Utc>) -> bool {
        if self.start.is_some_and(|start| instant < start) {
            return false;
        }
        if self.end.is_some_and(|end| instant > end) {
            return false;
        }
        true
    }

    /// Range check against an in-record unix-nanosecond timestamp.
    pub fn contains_nanos(&self, nanos: u64) -> bool {
        let nanos = i64::try_from(nanos).unwrap_or(i64::MAX);
        if let Some(start) = self.start {
            if nanos < start.timestamp_nanos_opt().unwrap_or(i64::MIN) {
                return false;
            }
        }
        if let Some(end) = self.end {
            if nanos > end.timestamp_nanos_opt().unwrap_or(i64::MAX) {
                return false;
            }
        }
        true
    }
}

/// Timestamps are accepted as RFC3339 text or a unix-millisecond integer.
fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    if let Ok(parsed) = DateTime::parse_from_rfc3339(value) {
        return Some(parsed.with_timezone(&Utc));
    }
    value
        .parse::<i64>()
        .ok()
        .and_then(|millis| Utc.timestamp_millis_opt(millis).single())
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SortKey {
    #[default]
    Time,
    Duration,
    Name,
}

impl SortKey {
    fn parse(value: Option<&str>) -> Self {
        match value.map(str::to_lowercase).as_deref() {
            Some("duration") => SortKey::Duration,
            Some("name") => SortKey::Name,
            _ => SortKey::Time,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

impl SortOrder {
    fn parse(value: Option<&str>) -> Self {
        match value.map(str::to_lowercase).as_deref() {
            Some("asc") => SortOrder::Asc,
            _ => SortOrder::Desc,
        }
    }
}

/// Filter descriptor for span listings.
#[derive(Clone, Debug, Default)]
pub struct TraceQuery {
    /// Matched against "service spanName", case-insensitively.
    pub service: String,
    pub status: Option<StatusCode>,
    pub min_duration_nanos: Option<i64>,
    pub max_duration_nanos: Option<i64>,
    pub time_range: TimeRange,
    pub pagination: Pagination,
    pub sort_by: SortKey,
    pub sort_order: SortOrder,
}

impl TraceQuery {
    pub fn from_params(params: &QueryParams) -> Self {
        Self {
            service: params.get("service").unwrap_or_default().to_string(),
            status: params.get("status").and_then(|v| match v.to_lowercase().as_str() {
                "ok" => Some(StatusCode::Ok),
                "error" => Some(StatusCode::Error),
                "unset" => Some(StatusCode::Unset),
                _ => None,
            }),
            min_duration_nanos: duration_ms_param(params, "min_duration_ms"),
            max_duration_nanos: duration_ms_param(params, "max_duration_ms"),
            time_range: TimeRange::from_params(params),
            pagination: Pagination::from_params(params),
            sort_by: SortKey::parse(params.get("sort_by")),
            sort_order: SortOrder::parse(params.get("sort_order")),
        }
    }
}

fn duration_ms_param(params: &QueryParams, key: &str) -> Option<i64> {
    params
        .get(key)
        .and_then(|v| v.parse::<i64>().ok())
        .map(|ms| ms.saturating_mul(1_000_000))
}

/// Filter descriptor for log listings.
#[derive(Clone, Debug, Default)]
pub struct LogQuery {
    /// Matched against the service name only.
    pub service: String,
    /// Substring over the severity text.
    pub severity: String,
    /// Numeric threshold on the OTel severity scale; 0 disables.
    pub min_severity: i32,
    pub body: String,
    pub trace_id: String,
    pub time_range: TimeRange,
    pub pagination: Pagination,
}

impl LogQuery {
    pub fn from_params(params: &QueryParams) -> Self {
        Self {
            service: params.get("service").unwrap_or_default().to_string(),
            severity: params.get("severity").unwrap_or_default().to_string(),
            min_severity: params
                .get("min_severity")
                .map(severity_threshold)
                .unwrap_or_default(),
            body: params.get("body").unwrap_or_default().to_string(),
            trace_id: params.get("trace_id").unwrap_or_default().to_string(),
            time_range: TimeRange::from_params(params),
            pagination: Pagination::from_params(params),
        }
    }
}

/// Severity-name to number mapping on the OTel 1..24 scale. Unknown names
/// map to 0, which disables the threshold.
pub fn severity_threshold(name: &str) -> i32 {
    match name.to_lowercase().as_str() {
        "trace" => 1,
        "debug" => 5,
        "info" => 9,
        "warn" => 13,
        "error" => 17,
        "fatal" => 21,
        _ => 0,
    }
}

/// Filter descriptor for metric listings.
#[derive(Clone, Debug, Default)]
pub struct MetricQuery {
    /// Matched against "service metricName", case-insensitively.
    pub service: String,
    pub metric_name: String,
    /// Case-insensitive exact match against the metric type text.
    pub metric_type: String,
    pub time_range: TimeRange,
    pub pagination: Pagination,
}

impl MetricQuery {
    pub fn from_params(params: &QueryParams) -> Self {
        Self {
            service: params.get("service").unwrap_or_default().to_string(),
            metric_name: params.get("metric").unwrap_or_default().to_string(),
            metric_type: params.get("type").unwrap_or_default().to_string(),
            time_range: TimeRange::from_params(params),
            pagination: Pagination::from_params(params),
        }
    }
}
