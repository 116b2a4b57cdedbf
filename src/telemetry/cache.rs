// SPDX-License-Identifier: Apache-2.0

//! Secondary indexes over the store's primary arrays. Slices are kept in
//! insertion order and share record allocations with the primary arrays;
//! removal matches by pointer identity so eviction cannot drop a newer
//! record that happens to reuse an id. Keys whose slice becomes empty are
//! deleted, so key enumeration only yields live entries.

use crate::telemetry::record::{LogRecord, MetricRecord, SpanRecord};
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;

fn remove_record<K, T>(map: &mut HashMap<K, Vec<Arc<T>>>, key: &K, record: &Arc<T>)
where
    K: Eq + Hash,
{
    if let Some(slice) = map.get_mut(key) {
        slice.retain(|r| !Arc::ptr_eq(r, record));
        if slice.is_empty() {
            map.remove(key);
        }
    }
}

#[derive(Default)]
pub struct TraceCache {
    span_by_id: HashMap<String, Arc<SpanRecord>>,
    spans_by_trace_id: HashMap<String, Vec<Arc<SpanRecord>>>,
    spans_by_trace_and_service: HashMap<(String, String), Vec<Arc<SpanRecord>>>,
    spans_by_service: HashMap<String, Vec<Arc<SpanRecord>>>,
}

impl TraceCache {
    pub fn add(&mut self, span: &Arc<SpanRecord>) {
        self.span_by_id
            .insert(span.span_id.clone(), Arc::clone(span));
        self.spans_by_trace_id
            .entry(span.trace_id.clone())
            .or_default()
            .push(Arc::clone(span));
        self.spans_by_trace_and_service
            .entry((span.trace_id.clone(), span.service_name.clone()))
            .or_default()
            .push(Arc::clone(span));
        self.spans_by_service
            .entry(span.service_name.clone())
            .or_default()
            .push(Arc::clone(span));
    }

    pub fn remove(&mut self, span: &Arc<SpanRecord>) {
        // A later span may have reused the id; only drop the entry when it
        // still points at this record.
        if self
            .span_by_id
            .get(&span.span_id)
            .is_some_and(|existing| Arc::ptr_eq(existing, span))
        {
            self.span_by_id.remove(&span.span_id);
        }
        remove_record(&mut self.spans_by_trace_id, &span.trace_id, span);
        let key = (span.trace_id.clone(), span.service_name.clone());
        remove_record(&mut self.spans_by_trace_and_service, &key, span);
        remove_record(&mut self.spans_by_service, &span.service_name, span);
    }

    pub fn span_by_id(&self, span_id: &str) -> Option<&Arc<SpanRecord>> {
        self.span_by_id.get(span_id)
    }

    pub fn spans_by_trace(&self, trace_id: &str) -> Option<&[Arc<SpanRecord>]> {
        self.spans_by_trace_id.get(trace_id).map(Vec::as_slice)
    }

    pub fn spans_by_trace_and_service(
        &self,
        trace_id: &str,
        service: &str,
    ) -> Option<&[Arc<SpanRecord>]> {
        self.spans_by_trace_and_service
            .get(&(trace_id.to_string(), service.to_string()))
            .map(Vec::as_slice)
    }

    pub fn spans_by_service(&self, service: &str) -> Option<&[Arc<SpanRecord>]> {
        self.spans_by_service.get(service).map(Vec::as_slice)
    }

    pub fn services(&self) -> impl Iterator<Item = &String> {
        self.spans_by_service.keys()
    }

    pub fn trace_count(&self) -> usize {
        self.spans_by_trace_id.len()
    }

    pub fn service_count(&self) -> usize {
        self.spans_by_service.len()
    }

    pub fn reset(&mut self) {
        self.span_by_id.clear();
        self.spans_by_trace_id.clear();
        self.spans_by_trace_and_service.clear();
        self.spans_by_service.clear();
    }
}

#[derive(Default)]
pub struct MetricCache {
    metrics_by_service_and_name: HashMap<(String, String), Vec<Arc<MetricRecord>>>,
    metrics_by_service: HashMap<String, Vec<Arc<MetricRecord>>>,
}

impl MetricCache {
    pub fn add(&mut self, metric: &Arc<MetricRecord>) {
        self.metrics_by_service_and_name
            .entry((metric.service_name.clone(), metric.name.clone()))
            .or_default()
            .push(Arc::clone(metric));
        self.metrics_by_service
            .entry(metric.service_name.clone())
            .or_default()
            .push(Arc::clone(metric));
    }

    pub fn remove(&mut self, metric: &Arc<MetricRecord>) {
        let key = (metric.service_name.clone(), metric.name.clone());
        remove_record(&mut self.metrics_by_service_and_name, &key, metric);
        remove_record(&mut self.metrics_by_service, &metric.service_name, metric);
    }

    pub fn metrics_by_service_and_name(
        &self,
        service: &str,
        name: &str,
    ) -> Option<&[Arc<MetricRecord>]> {
        self.metrics_by_service_and_name
            .get(&(service.to_string(), name.to_string()))
            .map(Vec::as_slice)
    }

    pub fn metrics_by_service(&self, service: &str) -> Option<&[Arc<MetricRecord>]> {
        self.metrics_by_service.get(service).map(Vec::as_slice)
    }

    pub fn services(&self) -> impl Iterator<Item = &String> {
        self.metrics_by_service.keys()
    }

    pub fn reset(&mut self) {
        self.metrics_by_service_and_name.clear();
        self.metrics_by_service.clear();
    }
}

#[derive(Default)]
pub struct LogCache {
    logs_by_trace_id: HashMap<String, Vec<Arc<LogRecord>>>,
    logs_by_service: HashMap<String, Vec<Arc<LogRecord>>>,
}

impl LogCache {
    pub fn add(&mut self, log: &Arc<LogRecord>) {
        // Only logs that carry trace context are reachable by trace id.
        if !log.trace_id.is_empty() {
            self.logs_by_trace_id
                .entry(log.trace_id.clone())
                .or_default()
                .push(Arc::clone(log));
        }
        self.logs_by_service
            .entry(log.service_name.clone())
            .or_default()
            .push(Arc::clone(log));
    }

    pub fn remove(&mut self, log: &Arc<LogRecord>) {
        if !log.trace_id.is_empty() {
            remove_record(&mut self.logs_by_trace_id, &log.trace_id, log);
        }
        remove_record(&mut self.logs_by_service, &log.service_name, log);
    }

    pub fn logs_by_trace(&self, trace_id: &str) -> Option<&[Arc<LogRecord>]> {
        self.logs_by_trace_id.get(trace_id).map(Vec::as_slice)
    }

    pub fn logs_by_service(&self, service: &str) -> Option<&[Arc<LogRecord>]> {
        self.logs_by_service.get(service).map(Vec::as_slice)
    }

    pub fn services(&self) -> impl Iterator<Item = &String> {
        self.logs_by_service.keys()
    }

    pub fn reset(&mut self) {
        self.logs_by_trace_id.clear();
        self.logs_by_service.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::record::{SpanKind, SpanStatus, StatusCode};
    use chrono::Utc;

    fn span(trace_id: &str, span_id: &str, service: &str) -> Arc<SpanRecord> {
        Arc::new(SpanRecord {
            trace_id: trace_id.to_string(),
            span_id: span_id.to_string(),
            parent_span_id: String::new(),
            name: "op".to_string(),
            kind: SpanKind::Internal,
            start_time_unix_nano: 0,
            end_time_unix_nano: 0,
            status: SpanStatus {
                code: StatusCode::Unset,
                message: String::new(),
            },
            attributes: Default::default(),
            events: vec![],
            links: vec![],
            service_name: service.to_string(),
            resource_attributes: Default::default(),
            scope_name: String::new(),
            scope_version: String::new(),
            received_at: Utc::now(),
        })
    }

    #[test]
    fn add_and_lookup_through_every_index() {
        let mut cache = TraceCache::default();
        let a = span("t1", "s1", "front");
        let b = span("t1", "s2", "back");
        cache.add(&a);
        cache.add(&b);

        assert!(cache.span_by_id("s1").is_some());
        assert_eq!(2, cache.spans_by_trace("t1").unwrap().len());
        assert_eq!(
            1,
            cache.spans_by_trace_and_service("t1", "front").unwrap().len()
        );
        assert_eq!(1, cache.spans_by_service("back").unwrap().len());
        assert_eq!(1, cache.trace_count());
        assert_eq!(2, cache.service_count());
    }

    #[test]
    fn remove_prunes_empty_keys() {
        let mut cache = TraceCache::default();
        let a = span("t1", "s1", "front");
        cache.add(&a);
        cache.remove(&a);

        assert!(cache.span_by_id("s1").is_none());
        assert!(cache.spans_by_trace("t1").is_none());
        assert!(cache.spans_by_trace_and_service("t1", "front").is_none());
        assert!(cache.spans_by_service("front").is_none());
        assert_eq!(0, cache.trace_count());
        assert_eq!(0, cache.services().count());
    }

    #[test]
    fn remove_matches_by_identity_not_id() {
        let mut cache = TraceCache::default();
        let old = span("t1", "dup", "front");
        let new = span("t2", "dup", "front");
        cache.add(&old);
        cache.add(&new);

        // Evicting the older record must not drop the newer one that took
        // over the span-id slot.
        cache.remove(&old);
        let found = cache.span_by_id("dup").unwrap();
        assert!(Arc::ptr_eq(found, &new));
        assert!(cache.spans_by_trace("t1").is_none());
        assert_eq!(1, cache.spans_by_trace("t2").unwrap().len());
    }

    #[test]
    fn metric_cache_keys_by_service_and_name() {
        let metric = |service: &str, name: &str| {
            Arc::new(MetricRecord {
                name: name.to_string(),
                description: String::new(),
                unit: String::new(),
                metric_type: crate::telemetry::record::MetricType::Gauge,
                data_points: vec![],
                service_name: service.to_string(),
                resource_attributes: Default::default(),
                scope_name: String::new(),
                scope_version: String::new(),
                received_at: Utc::now(),
            })
        };

        let mut cache = MetricCache::default();
        let a = metric("svc", "latency");
        let b = metric("svc", "depth");
        cache.add(&a);
        cache.add(&b);

        assert_eq!(1, cache.metrics_by_service_and_name("svc", "latency").unwrap().len());
        assert_eq!(2, cache.metrics_by_service("svc").unwrap().len());
        assert_eq!(1, cache.services().count());

        cache.remove(&a);
        assert!(cache.metrics_by_service_and_name("svc", "latency").is_none());
        assert_eq!(1, cache.metrics_by_service("svc").unwrap().len());

        cache.remove(&b);
        assert!(cache.metrics_by_service("svc").is_none());
        assert_eq!(0, cache.services().count());
    }

    #[test]
    fn log_cache_skips_traceless_logs() {
        let mut cache = LogCache::default();
        let log = Arc::new(LogRecord {
            time_unix_nano: 0,
            observed_time_unix_nano: 0,
            severity_number: 9,
            severity_text: "INFO".to_string(),
            body: "hi".to_string(),
            attributes: Default::default(),
            trace_id: String::new(),
            span_id: String::new(),
            flags: 0,
            service_name: "svc".to_string(),
            resource_attributes: Default::default(),
            scope_name: String::new(),
            scope_version: String::new(),
            received_at: Utc::now(),
        });
        cache.add(&log);

        assert!(cache.logs_by_trace("").is_none());
        assert_eq!(1, cache.logs_by_service("svc").unwrap().len());
    }
}
