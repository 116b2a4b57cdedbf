// SPDX-License-Identifier: Apache-2.0

//! Predicate application, ordering, and pagination over record slices.
//! Predicates AND together; disabled (empty) fields always pass. Every
//! call also reports the input and post-filter sizes so the wire layer can
//! emit pagination headers.

use crate::query::params::{LogQuery, MetricQuery, Pagination, SortKey, SortOrder, TraceQuery};
use crate::telemetry::record::{LogRecord, MetricRecord, SpanRecord};
use std::collections::VecDeque;
use std::sync::Arc;

pub struct QueryResult<T> {
    /// Records for the requested page, in final order.
    pub page: Vec<Arc<T>>,
    /// Size of the input slice.
    pub total: usize,
    /// Survivor count after predicates, before pagination.
    pub filtered: usize,
}

pub fn filter_spans(
    spans: &VecDeque<Arc<SpanRecord>>,
    query: &TraceQuery,
) -> QueryResult<SpanRecord> {
    let total = spans.len();
    let mut survivors: Vec<Arc<SpanRecord>> = spans
        .iter()
        .filter(|span| matches_span(span, query))
        .cloned()
        .collect();
    sort_spans(&mut survivors, query.sort_by, query.sort_order);
    let filtered = survivors.len();
    QueryResult {
        page: paginate(survivors, &query.pagination),
        total,
        filtered,
    }
}

fn matches_span(span: &SpanRecord, query: &TraceQuery) -> bool {
    if !query.service.is_empty() {
        let haystack = format!("{} {}", span.service_name, span.name);
        if !contains_fold(&haystack, &query.service) {
            return false;
        }
    }

    if let Some(status) = query.status {
        if span.status.code != status {
            return false;
        }
    }

    let duration = span.duration_nanos();
    if query.min_duration_nanos.is_some_and(|min| duration < min) {
        return false;
    }
    if query.max_duration_nanos.is_some_and(|max| duration > max) {
        return false;
    }

    query.time_range.contains(span.received_at)
}

/// Stable sort on the requested key with a received-at-descending
/// tie-break, so equal-keyed spans list newest first.
fn sort_spans(spans: &mut [Arc<SpanRecord>], key: SortKey, order: SortOrder) {
    spans.sort_by(|a, b| {
        let primary = match key {
            SortKey::Time => a.received_at.cmp(&b.received_at),
            SortKey::Duration => a.duration_nanos().cmp(&b.duration_nanos()),
            SortKey::Name => a.name.cmp(&b.name),
        };
        let primary = match order {
            SortOrder::Asc => primary,
            SortOrder::Desc => primary.reverse(),
        };
        primary.then_with(|| b.received_at.cmp(&a.received_at))
    });
}

pub fn filter_logs(logs: &VecDeque<Arc<LogRecord>>, query: &LogQuery) -> QueryResult<LogRecord> {
    let total = logs.len();
    let survivors: Vec<Arc<LogRecord>> = logs
        .iter()
        .filter(|log| matches_log(log, query))
        .cloned()
        .collect();
    let filtered = survivors.len();
    QueryResult {
        page: paginate(survivors, &query.pagination),
        total,
        filtered,
    }
}

fn matches_log(log: &LogRecord, query: &LogQuery) -> bool {
    if !query.service.is_empty() && !contains_fold(&log.service_name, &query.service) {
        return false;
    }
    if !query.severity.is_empty() && !contains_fold(&log.severity_text, &query.severity) {
        return false;
    }
    if query.min_severity > 0 && log.severity_number < query.min_severity {
        return false;
    }
    if !query.body.is_empty() && !contains_fold(&log.body, &query.body) {
        return false;
    }
    if !query.trace_id.is_empty() && log.trace_id != query.trace_id {
        return false;
    }

    // Logs filter on the datum timestamp, not received-at.
    query.time_range.contains_nanos(log.time_unix_nano)
}

pub fn filter_metrics(
    metrics: &VecDeque<Arc<MetricRecord>>,
    query: &MetricQuery,
) -> QueryResult<MetricRecord> {
    let total = metrics.len();
    let survivors: Vec<Arc<MetricRecord>> = metrics
        .iter()
        .filter(|metric| matches_metric(metric, query))
        .cloned()
        .collect();
    let filtered = survivors.len();
    QueryResult {
        page: paginate(survivors, &query.pagination),
        total,
        filtered,
    }
}

fn matches_metric(metric: &MetricRecord, query: &MetricQuery) -> bool {
    if !query.service.is_empty() {
        let haystack = format!("{} {}", metric.service_name, metric.name);
        if !contains_fold(&haystack, &query.service) {
            return false;
        }
    }
    if !query.metric_name.is_empty() && !contains_fold(&metric.name, &query.metric_name) {
        return false;
    }
    if !query.metric_type.is_empty()
        && !metric
            .metric_type
            .as_str()
            .eq_ignore_ascii_case(&query.metric_type)
    {
        return false;
    }

    query.time_range.contains(metric.received_at)
}

fn contains_fold(haystack: &str, needle: &str) -> bool {
    haystack.to_lowercase().contains(&needle.to_lowercase())
}

fn paginate<T>(records: Vec<Arc<T>>, pagination: &Pagination) -> Vec<Arc<T>> {
    if pagination.offset >= records.len() {
        return Vec::new();
    }
    records
        .into_iter()
        .skip(pagination.offset)
        .take(pagination.limit)
        .collect()
}
