// SPDX-License-Identifier: Apache-2.0

//! The telemetry store: single owner of the primary record arrays and the
//! secondary indexes. One writer (the ingest path) and many readers (the
//! query handlers) coordinate through a single readers-writer lock; writes
//! are atomic at batch granularity and readers always observe a consistent
//! pre- or post-batch snapshot.

use crate::query::topology::{self, ServiceGraph};
use crate::telemetry::cache::{LogCache, MetricCache, TraceCache};
use crate::telemetry::convert;
use crate::telemetry::record::{LogRecord, MetricRecord, SpanRecord};
use crate::telemetry::Clock;
use chrono::{DateTime, Utc};
use opentelemetry_proto::tonic::logs::v1::ResourceLogs;
use opentelemetry_proto::tonic::metrics::v1::ResourceMetrics;
use opentelemetry_proto::tonic::trace::v1::ResourceSpans;
use parking_lot::{RwLock, RwLockReadGuard};
use std::collections::{BTreeSet, VecDeque};
use std::sync::Arc;

/// Primary array caps. The oldest record is evicted before a new one is
/// appended once a cap is reached; ingestion drops old data, never new.
pub const MAX_SPAN_COUNT: usize = 1000;
pub const MAX_METRIC_COUNT: usize = 3000;
pub const MAX_LOG_COUNT: usize = 1000;

/// Point-in-time counters reported by the stats endpoint.
#[derive(Clone, Debug)]
pub struct StoreStats {
    pub span_count: usize,
    pub metric_count: usize,
    pub log_count: usize,
    pub trace_count: usize,
    pub service_count: usize,
    pub last_updated: DateTime<Utc>,
}

pub struct TelemetryStore {
    clock: Arc<dyn Clock>,
    state: RwLock<StoreState>,
}

impl TelemetryStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        let updated_at = clock.now();
        Self {
            clock,
            state: RwLock::new(StoreState {
                spans: VecDeque::new(),
                metrics: VecDeque::new(),
                logs: VecDeque::new(),
                trace_cache: TraceCache::default(),
                metric_cache: MetricCache::default(),
                log_cache: LogCache::default(),
                updated_at,
            }),
        }
    }

    /// Ingest one trace batch. Infallible; evicts the oldest span per
    /// insertion once the cap is reached.
    pub fn add_span_batch(&self, batch: Vec<ResourceSpans>) {
        let now = self.clock.now();
        let records = convert::span_records(batch, now);
        let mut state = self.state.write();
        for record in records {
            state.insert_span(Arc::new(record));
        }
        state.updated_at = now;
    }

    /// Ingest one metrics batch.
    pub fn add_metric_batch(&self, batch: Vec<ResourceMetrics>) {
        let now = self.clock.now();
        let records = convert::metric_records(batch, now);
        let mut state = self.state.write();
        for record in records {
            state.insert_metric(Arc::new(record));
        }
        state.updated_at = now;
    }

    /// Ingest one logs batch.
    pub fn add_log_batch(&self, batch: Vec<ResourceLogs>) {
        let now = self.clock.now();
        let records = convert::log_records(batch, now);
        let mut state = self.state.write();
        for record in records {
            state.insert_log(Arc::new(record));
        }
        state.updated_at = now;
    }

    /// Shared-lock view for queries. Handlers hold the guard for the whole
    /// request, including JSON serialization, so eviction cannot happen
    /// mid-response.
    pub fn read(&self) -> RwLockReadGuard<'_, StoreState> {
        self.state.read()
    }

    /// Drop every record and index entry.
    pub fn reset(&self) {
        let mut state = self.state.write();
        state.spans.clear();
        state.metrics.clear();
        state.logs.clear();
        state.trace_cache.reset();
        state.metric_cache.reset();
        state.log_cache.reset();
        state.updated_at = self.clock.now();
    }
}

pub struct StoreState {
    spans: VecDeque<Arc<SpanRecord>>,
    metrics: VecDeque<Arc<MetricRecord>>,
    logs: VecDeque<Arc<LogRecord>>,
    trace_cache: TraceCache,
    metric_cache: MetricCache,
    log_cache: LogCache,
    updated_at: DateTime<Utc>,
}

impl StoreState {
    fn insert_span(&mut self, record: Arc<SpanRecord>) {
        if self.spans.len() >= MAX_SPAN_COUNT {
            if let Some(oldest) = self.spans.pop_front() {
                self.trace_cache.remove(&oldest);
            }
        }
        self.trace_cache.add(&record);
        self.spans.push_back(record);
    }

    fn insert_metric(&mut self, record: Arc<MetricRecord>) {
        if self.metrics.len() >= MAX_METRIC_COUNT {
            if let Some(oldest) = self.metrics.pop_front() {
                self.metric_cache.remove(&oldest);
            }
        }
        self.metric_cache.add(&record);
        self.metrics.push_back(record);
    }

    fn insert_log(&mut self, record: Arc<LogRecord>) {
        if self.logs.len() >= MAX_LOG_COUNT {
            if let Some(oldest) = self.logs.pop_front() {
                self.log_cache.remove(&oldest);
            }
        }
        self.log_cache.add(&record);
        self.logs.push_back(record);
    }

    pub fn spans(&self) -> &VecDeque<Arc<SpanRecord>> {
        &self.spans
    }

    pub fn metrics(&self) -> &VecDeque<Arc<MetricRecord>> {
        &self.metrics
    }

    pub fn logs(&self) -> &VecDeque<Arc<LogRecord>> {
        &self.logs
    }

    pub fn span_by_id(&self, span_id: &str) -> Option<&Arc<SpanRecord>> {
        self.trace_cache.span_by_id(span_id)
    }

    pub fn spans_by_trace(&self, trace_id: &str) -> Option<&[Arc<SpanRecord>]> {
        self.trace_cache.spans_by_trace(trace_id)
    }

    pub fn spans_by_trace_and_service(
        &self,
        trace_id: &str,
        service: &str,
    ) -> Option<&[Arc<SpanRecord>]> {
        self.trace_cache
            .spans_by_trace_and_service(trace_id, service)
    }

    pub fn metrics_by_service_and_name(
        &self,
        service: &str,
        name: &str,
    ) -> Option<&[Arc<MetricRecord>]> {
        self.metric_cache.metrics_by_service_and_name(service, name)
    }

    pub fn logs_by_trace(&self, trace_id: &str) -> Option<&[Arc<LogRecord>]> {
        self.log_cache.logs_by_trace(trace_id)
    }

    /// On-demand case-insensitive substring view over metrics. The haystack
    /// is "service metricName"; an empty query returns everything in
    /// insertion order.
    pub fn filtered_metrics(&self, query: &str) -> Vec<Arc<MetricRecord>> {
        if query.is_empty() {
            return self.metrics.iter().cloned().collect();
        }
        let needle = query.to_lowercase();
        self.metrics
            .iter()
            .filter(|m| {
                let haystack = format!("{} {}", m.service_name, m.name).to_lowercase();
                haystack.contains(&needle)
            })
            .cloned()
            .collect()
    }

    /// On-demand case-insensitive substring view over logs, matching the
    /// service name, resolved body, or severity text.
    pub fn filtered_logs(&self, query: &str) -> Vec<Arc<LogRecord>> {
        if query.is_empty() {
            return self.logs.iter().cloned().collect();
        }
        let needle = query.to_lowercase();
        self.logs
            .iter()
            .filter(|l| {
                l.service_name.to_lowercase().contains(&needle)
                    || l.body.to_lowercase().contains(&needle)
                    || l.severity_text.to_lowercase().contains(&needle)
            })
            .cloned()
            .collect()
    }

    /// Distinct live service names across every signal type, excluding the
    /// empty string and anything containing "unknown". Sorted so responses
    /// are deterministic.
    pub fn services(&self) -> Vec<String> {
        let mut services: BTreeSet<&String> = BTreeSet::new();
        services.extend(self.trace_cache.services());
        services.extend(self.metric_cache.services());
        services.extend(self.log_cache.services());
        services
            .into_iter()
            .filter(|s| !s.is_empty() && !s.contains("unknown"))
            .cloned()
            .collect()
    }

    pub fn stats(&self) -> StoreStats {
        StoreStats {
            span_count: self.spans.len(),
            metric_count: self.metrics.len(),
            log_count: self.logs.len(),
            trace_count: self.trace_cache.trace_count(),
            service_count: self.trace_cache.service_count(),
            last_updated: self.updated_at,
        }
    }

    /// Derive the inter-service call graph from the current span window.
    pub fn service_graph(&self) -> ServiceGraph {
        topology::derive(self.spans.iter(), |id| self.trace_cache.span_by_id(id))
    }

    pub fn last_updated(&self) -> DateTime<Utc> {
        self.updated_at
    }
}
