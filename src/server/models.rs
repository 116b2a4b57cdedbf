// SPDX-License-Identifier: Apache-2.0

//! Wire representations for the query API. Each response body is a fresh
//! serialization of the store's records; field names and omission rules
//! follow the published JSON schema.

use crate::telemetry::record::{
    AttrMap, DataPoint, LogRecord, MetricRecord, Quantile, SpanEvent, SpanLink, SpanRecord,
};
use crate::telemetry::store::{StoreStats, MAX_LOG_COUNT, MAX_METRIC_COUNT, MAX_SPAN_COUNT};
use chrono::{DateTime, Utc};
use serde::Serialize;

fn is_zero_u32(value: &u32) -> bool {
    *value == 0
}

fn is_zero_u64(value: &u64) -> bool {
    *value == 0
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SpanJson {
    pub trace_id: String,
    pub span_id: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub parent_span_id: String,
    pub name: String,
    pub kind: &'static str,
    pub start_time_unix_nano: u64,
    pub end_time_unix_nano: u64,
    pub duration_nano: i64,
    pub duration_text: String,
    pub attributes: AttrMap,
    pub status: SpanStatusJson,
    pub events: Vec<SpanEventJson>,
    pub links: Vec<SpanLinkJson>,
    pub service_name: String,
    pub resource_attributes: AttrMap,
    pub scope_name: String,
    pub scope_version: String,
    pub received_at: DateTime<Utc>,
}

#[derive(Serialize)]
pub struct SpanStatusJson {
    pub code: &'static str,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub message: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SpanEventJson {
    pub name: String,
    pub time_unix_nano: u64,
    pub attributes: AttrMap,
    pub dropped_attributes_count: u32,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SpanLinkJson {
    pub trace_id: String,
    pub span_id: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub trace_state: String,
    pub attributes: AttrMap,
    pub dropped_attributes_count: u32,
}

impl From<&SpanRecord> for SpanJson {
    fn from(span: &SpanRecord) -> Self {
        Self {
            trace_id: span.trace_id.clone(),
            span_id: span.span_id.clone(),
            parent_span_id: span.parent_span_id.clone(),
            name: span.name.clone(),
            kind: span.kind.as_str(),
            start_time_unix_nano: span.start_time_unix_nano,
            end_time_unix_nano: span.end_time_unix_nano,
            duration_nano: span.duration_nanos(),
            duration_text: span.duration_text(),
            attributes: span.attributes.clone(),
            status: SpanStatusJson {
                code: span.status.code.as_str(),
                message: span.status.message.clone(),
            },
            events: span.events.iter().map(SpanEventJson::from).collect(),
            links: span.links.iter().map(SpanLinkJson::from).collect(),
            service_name: span.service_name.clone(),
            resource_attributes: span.resource_attributes.clone(),
            scope_name: span.scope_name.clone(),
            scope_version: span.scope_version.clone(),
            received_at: span.received_at,
        }
    }
}

impl From<&SpanEvent> for SpanEventJson {
    fn from(event: &SpanEvent) -> Self {
        Self {
            name: event.name.clone(),
            time_unix_nano: event.time_unix_nano,
            attributes: event.attributes.clone(),
            dropped_attributes_count: event.dropped_attributes_count,
        }
    }
}

impl From<&SpanLink> for SpanLinkJson {
    fn from(link: &SpanLink) -> Self {
        Self {
            trace_id: link.trace_id.clone(),
            span_id: link.span_id.clone(),
            trace_state: link.trace_state.clone(),
            attributes: link.attributes.clone(),
            dropped_attributes_count: link.dropped_attributes_count,
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TraceJson {
    pub trace_id: String,
    pub spans: Vec<SpanJson>,
    pub services: Vec<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricJson {
    pub name: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub unit: String,
    #[serde(rename = "type")]
    pub metric_type: &'static str,
    pub data_points: Vec<DataPointJson>,
    pub service_name: String,
    pub resource_attributes: AttrMap,
    pub scope_name: String,
    pub scope_version: String,
    pub received_at: DateTime<Utc>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DataPointJson {
    pub attributes: AttrMap,
    #[serde(skip_serializing_if = "is_zero_u64")]
    pub start_time_unix_nano: u64,
    pub time_unix_nano: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub count: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sum: Option<f64>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub bucket_counts: Vec<u64>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub explicit_bounds: Vec<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub quantile_values: Vec<QuantileJson>,
    #[serde(skip_serializing_if = "is_zero_u32")]
    pub flags: u32,
}

#[derive(Serialize)]
pub struct QuantileJson {
    pub quantile: f64,
    pub value: f64,
}

impl From<&MetricRecord> for MetricJson {
    fn from(metric: &MetricRecord) -> Self {
        Self {
            name: metric.name.clone(),
            description: metric.description.clone(),
            unit: metric.unit.clone(),
            metric_type: metric.metric_type.as_str(),
            data_points: metric.data_points.iter().map(DataPointJson::from).collect(),
            service_name: metric.service_name.clone(),
            resource_attributes: metric.resource_attributes.clone(),
            scope_name: metric.scope_name.clone(),
            scope_version: metric.scope_version.clone(),
            received_at: metric.received_at,
        }
    }
}

impl From<&DataPoint> for DataPointJson {
    fn from(point: &DataPoint) -> Self {
        Self {
            attributes: point.attributes.clone(),
            start_time_unix_nano: point.start_time_unix_nano,
            time_unix_nano: point.time_unix_nano,
            value: point.value,
            count: point.count,
            sum: point.sum,
            bucket_counts: point.bucket_counts.clone(),
            explicit_bounds: point.explicit_bounds.clone(),
            min: point.min,
            max: point.max,
            quantile_values: point
                .quantile_values
                .iter()
                .map(|q: &Quantile| QuantileJson {
                    quantile: q.quantile,
                    value: q.value,
                })
                .collect(),
            flags: point.flags,
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LogJson {
    pub time_unix_nano: u64,
    pub observed_time_unix_nano: u64,
    pub severity_number: i32,
    pub severity_text: String,
    pub body: String,
    pub attributes: AttrMap,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub trace_id: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub span_id: String,
    pub flags: u32,
    pub service_name: String,
    pub resource_attributes: AttrMap,
    pub scope_name: String,
    pub scope_version: String,
    pub received_at: DateTime<Utc>,
}

impl From<&LogRecord> for LogJson {
    fn from(log: &LogRecord) -> Self {
        Self {
            time_unix_nano: log.time_unix_nano,
            observed_time_unix_nano: log.observed_time_unix_nano,
            severity_number: log.severity_number,
            severity_text: log.severity_text.clone(),
            body: log.body.clone(),
            attributes: log.attributes.clone(),
            trace_id: log.trace_id.clone(),
            span_id: log.span_id.clone(),
            flags: log.flags,
            service_name: log.service_name.clone(),
            resource_attributes: log.resource_attributes.clone(),
            scope_name: log.scope_name.clone(),
            scope_version: log.scope_version.clone(),
            received_at: log.received_at,
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsJson {
    pub span_count: usize,
    pub metric_count: usize,
    pub log_count: usize,
    pub trace_count: usize,
    pub service_count: usize,
    pub last_updated: DateTime<Utc>,
    pub max_service_span_count: usize,
    pub max_metric_count: usize,
    pub max_log_count: usize,
}

impl From<&StoreStats> for StatsJson {
    fn from(stats: &StoreStats) -> Self {
        Self {
            span_count: stats.span_count,
            metric_count: stats.metric_count,
            log_count: stats.log_count,
            trace_count: stats.trace_count,
            service_count: stats.service_count,
            last_updated: stats.last_updated,
            max_service_span_count: MAX_SPAN_COUNT,
            max_metric_count: MAX_METRIC_COUNT,
            max_log_count: MAX_LOG_COUNT,
        }
    }
}

#[derive(Serialize)]
pub struct ErrorJson {
    pub error: String,
}
