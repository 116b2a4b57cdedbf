// SPDX-License-Identifier: Apache-2.0

//! Ingest normalizer: flattens decoded OTLP batches into denormalized
//! per-datum records ready for store insertion. Never fails; malformed
//! fields degrade to empty strings and zero values.

use crate::telemetry::record::{
    AttrMap, DataPoint, LogRecord, MetricRecord, MetricType, Quantile, SpanEvent, SpanKind,
    SpanLink, SpanRecord, SpanStatus, StatusCode,
};
use chrono::{DateTime, Utc};
use opentelemetry_proto::tonic::common::v1::any_value::Value;
use opentelemetry_proto::tonic::common::v1::{AnyValue, KeyValue};
use opentelemetry_proto::tonic::logs::v1::ResourceLogs;
use opentelemetry_proto::tonic::metrics::v1::metric::Data;
use opentelemetry_proto::tonic::metrics::v1::number_data_point::Value as NumberValue;
use opentelemetry_proto::tonic::metrics::v1::{
    HistogramDataPoint, Metric, NumberDataPoint, ResourceMetrics, SummaryDataPoint,
};
use opentelemetry_proto::tonic::resource::v1::Resource;
use opentelemetry_proto::tonic::trace::v1::ResourceSpans;

const SERVICE_NAME_KEY: &str = "service.name";
const UNKNOWN_SERVICE: &str = "unknown";

/// Flatten a trace batch into span records. All records in the batch share
/// the caller-supplied received-at instant.
pub fn span_records(batch: Vec<ResourceSpans>, received_at: DateTime<Utc>) -> Vec<SpanRecord> {
    let mut records = Vec::new();
    for resource_spans in batch {
        let service_name = service_name(resource_spans.resource.as_ref());
        let resource_attributes = resource_attributes(resource_spans.resource.as_ref());
        for scope_spans in resource_spans.scope_spans {
            let (scope_name, scope_version) = scope_identity(scope_spans.scope.as_ref());
            for span in scope_spans.spans {
                let status = span.status.unwrap_or_default();
                records.push(SpanRecord {
                    trace_id: encode_id(&span.trace_id),
                    span_id: encode_id(&span.span_id),
                    parent_span_id: encode_id(&span.parent_span_id),
                    name: span.name,
                    kind: SpanKind::from_protobuf(span.kind),
                    start_time_unix_nano: span.start_time_unix_nano,
                    end_time_unix_nano: span.end_time_unix_nano,
                    status: SpanStatus {
                        code: StatusCode::from_protobuf(status.code),
                        message: status.message,
                    },
                    attributes: attr_map(&span.attributes),
                    events: span
                        .events
                        .into_iter()
                        .map(|e| SpanEvent {
                            name: e.name,
                            time_unix_nano: e.time_unix_nano,
                            attributes: attr_map(&e.attributes),
                            dropped_attributes_count: e.dropped_attributes_count,
                        })
                        .collect(),
                    links: span
                        .links
                        .into_iter()
                        .map(|l| SpanLink {
                            trace_id: encode_id(&l.trace_id),
                            span_id: encode_id(&l.span_id),
                            trace_state: l.trace_state,
                            attributes: attr_map(&l.attributes),
                            dropped_attributes_count: l.dropped_attributes_count,
                        })
                        .collect(),
                    service_name: service_name.clone(),
                    resource_attributes: resource_attributes.clone(),
                    scope_name: scope_name.clone(),
                    scope_version: scope_version.clone(),
                    received_at,
                });
            }
        }
    }
    records
}

/// Flatten a metrics batch into metric records.
pub fn metric_records(
    batch: Vec<ResourceMetrics>,
    received_at: DateTime<Utc>,
) -> Vec<MetricRecord> {
    let mut records = Vec::new();
    for resource_metrics in batch {
        let service_name = service_name(resource_metrics.resource.as_ref());
        let resource_attributes = resource_attributes(resource_metrics.resource.as_ref());
        for scope_metrics in resource_metrics.scope_metrics {
            let (scope_name, scope_version) = scope_identity(scope_metrics.scope.as_ref());
            for metric in scope_metrics.metrics {
                let Metric {
                    name,
                    description,
                    unit,
                    data,
                    ..
                } = metric;
                let (metric_type, data_points) = metric_data(data);
                records.push(MetricRecord {
                    name,
                    description,
                    unit,
                    metric_type,
                    data_points,
                    service_name: service_name.clone(),
                    resource_attributes: resource_attributes.clone(),
                    scope_name: scope_name.clone(),
                    scope_version: scope_version.clone(),
                    received_at,
                });
            }
        }
    }
    records
}

/// Flatten a logs batch into log records.
pub fn log_records(batch: Vec<ResourceLogs>, received_at: DateTime<Utc>) -> Vec<LogRecord> {
    let mut records = Vec::new();
    for resource_logs in batch {
        let service_name = service_name(resource_logs.resource.as_ref());
        let resource_attributes = resource_attributes(resource_logs.resource.as_ref());
        for scope_logs in resource_logs.scope_logs {
            let (scope_name, scope_version) = scope_identity(scope_logs.scope.as_ref());
            for log in scope_logs.log_records {
                records.push(LogRecord {
                    time_unix_nano: log.time_unix_nano,
                    observed_time_unix_nano: log.observed_time_unix_nano,
                    severity_number: log.severity_number,
                    severity_text: log.severity_text,
                    body: body_string(log.body.as_ref()),
                    attributes: attr_map(&log.attributes),
                    trace_id: encode_id(&log.trace_id),
                    span_id: encode_id(&log.span_id),
                    flags: log.flags,
                    service_name: service_name.clone(),
                    resource_attributes: resource_attributes.clone(),
                    scope_name: scope_name.clone(),
                    scope_version: scope_version.clone(),
                    received_at,
                });
            }
        }
    }
    records
}

/// Resolve the owning service from resource attributes; producers that do
/// not set service.name (or set it to a non-string) land under "unknown".
fn service_name(resource: Option<&Resource>) -> String {
    resource
        .map(|r| r.attributes.as_slice())
        .unwrap_or_default()
        .iter()
        .find(|kv| kv.key == SERVICE_NAME_KEY)
        .and_then(|kv| kv.value.as_ref())
        .and_then(|v| match &v.value {
            Some(Value::StringValue(s)) => Some(s.clone()),
            _ => None,
        })
        .unwrap_or_else(|| UNKNOWN_SERVICE.to_string())
}

fn resource_attributes(resource: Option<&Resource>) -> AttrMap {
    resource
        .map(|r| attr_map(&r.attributes))
        .unwrap_or_default()
}

fn scope_identity(
    scope: Option<&opentelemetry_proto::tonic::common::v1::InstrumentationScope>,
) -> (String, String) {
    match scope {
        Some(s) => (s.name.clone(), s.version.clone()),
        None => (String::new(), String::new()),
    }
}

/// Hex-encodes a trace or span id; absent and all-zero ids are treated as
/// "no id" and become the empty string.
pub(crate) fn encode_id(bytes: &[u8]) -> String {
    if bytes.iter().all(|b| *b == 0) {
        String::new()
    } else {
        hex::encode(bytes)
    }
}

/// Coerce an OTLP attribute value to its neutral JSON form. Byte values are
/// hex-encoded; absent values are null.
pub(crate) fn any_value_to_json(value: Option<&AnyValue>) -> serde_json::Value {
    match value.and_then(|v| v.value.as_ref()) {
        Some(Value::StringValue(s)) => serde_json::Value::String(s.clone()),
        Some(Value::BoolValue(b)) => serde_json::Value::Bool(*b),
        Some(Value::IntValue(i)) => serde_json::Value::Number((*i).into()),
        Some(Value::DoubleValue(d)) => serde_json::Number::from_f64(*d)
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null),
        Some(Value::ArrayValue(arr)) => serde_json::Value::Array(
            arr.values.iter().map(|v| any_value_to_json(Some(v))).collect(),
        ),
        Some(Value::KvlistValue(kv)) => serde_json::Value::Object(attr_map(&kv.values)),
        Some(Value::BytesValue(b)) => serde_json::Value::String(hex::encode(b)),
        None => serde_json::Value::Null,
    }
}

pub(crate) fn attr_map(attrs: &[KeyValue]) -> AttrMap {
    let mut map = AttrMap::new();
    for attr in attrs {
        map.insert(attr.key.clone(), any_value_to_json(attr.value.as_ref()));
    }
    map
}

/// Resolve a log body to its display string: plain values render directly,
/// structured values render as JSON text.
fn body_string(body: Option<&AnyValue>) -> String {
    match body.and_then(|v| v.value.as_ref()) {
        Some(Value::StringValue(s)) => s.clone(),
        Some(Value::BoolValue(b)) => b.to_string(),
        Some(Value::IntValue(i)) => i.to_string(),
        Some(Value::DoubleValue(d)) => d.to_string(),
        Some(_) => any_value_to_json(body).to_string(),
        None => String::new(),
    }
}

fn metric_data(data: Option<Data>) -> (MetricType, Vec<DataPoint>) {
    match data {
        Some(Data::Gauge(gauge)) => (MetricType::Gauge, number_points(gauge.data_points)),
        Some(Data::Sum(sum)) => (MetricType::Sum, number_points(sum.data_points)),
        Some(Data::Histogram(histogram)) => (
            MetricType::Histogram,
            histogram
                .data_points
                .into_iter()
                .map(histogram_point)
                .collect(),
        ),
        Some(Data::ExponentialHistogram(histogram)) => (
            MetricType::ExponentialHistogram,
            histogram
                .data_points
                .into_iter()
                .map(|p| DataPoint {
                    attributes: attr_map(&p.attributes),
                    start_time_unix_nano: p.start_time_unix_nano,
                    time_unix_nano: p.time_unix_nano,
                    count: Some(p.count),
                    sum: Some(p.sum.unwrap_or_default()),
                    min: p.min,
                    max: p.max,
                    flags: p.flags,
                    ..Default::default()
                })
                .collect(),
        ),
        Some(Data::Summary(summary)) => (
            MetricType::Summary,
            summary
                .data_points
                .into_iter()
                .map(summary_point)
                .collect(),
        ),
        None => (MetricType::Empty, Vec::new()),
    }
}

fn number_points(points: Vec<NumberDataPoint>) -> Vec<DataPoint> {
    points
        .into_iter()
        .map(|p| {
            let value = match p.value {
                Some(NumberValue::AsInt(i)) => i as f64,
                Some(NumberValue::AsDouble(d)) => d,
                None => 0.0,
            };
            DataPoint {
                attributes: attr_map(&p.attributes),
                start_time_unix_nano: p.start_time_unix_nano,
                time_unix_nano: p.time_unix_nano,
                value: Some(value),
                flags: p.flags,
                ..Default::default()
            }
        })
        .collect()
}

fn histogram_point(p: HistogramDataPoint) -> DataPoint {
    DataPoint {
        attributes: attr_map(&p.attributes),
        start_time_unix_nano: p.start_time_unix_nano,
        time_unix_nano: p.time_unix_nano,
        count: Some(p.count),
        sum: Some(p.sum.unwrap_or_default()),
        bucket_counts: p.bucket_counts,
        explicit_bounds: p.explicit_bounds,
        min: p.min,
        max: p.max,
        flags: p.flags,
        ..Default::default()
    }
}

fn summary_point(p: SummaryDataPoint) -> DataPoint {
    DataPoint {
        attributes: attr_map(&p.attributes),
        start_time_unix_nano: p.start_time_unix_nano,
        time_unix_nano: p.time_unix_nano,
        count: Some(p.count),
        sum: Some(p.sum),
        quantile_values: p
            .quantile_values
            .into_iter()
            .map(|q| Quantile {
                quantile: q.quantile,
                value: q.value,
            })
            .collect(),
        flags: p.flags,
        ..Default::default()
    }
}
