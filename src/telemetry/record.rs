// SPDX-License-Identifier: Apache-2.0

use chrono::{DateTime, Utc};
use std::fmt::{Display, Formatter};

/// Attribute maps hold values already coerced to their neutral JSON form.
/// serde_json's map keeps keys sorted, so serialized output is stable.
pub type AttrMap = serde_json::Map<String, serde_json::Value>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SpanKind {
    Unspecified,
    Internal,
    Server,
    Client,
    Producer,
    Consumer,
}

impl SpanKind {
    pub fn from_protobuf(kind: i32) -> Self {
        match kind {
            1 => SpanKind::Internal,
            2 => SpanKind::Server,
            3 => SpanKind::Client,
            4 => SpanKind::Producer,
            5 => SpanKind::Consumer,
            _ => SpanKind::Unspecified,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SpanKind::Unspecified => "Unspecified",
            SpanKind::Internal => "Internal",
            SpanKind::Server => "Server",
            SpanKind::Client => "Client",
            SpanKind::Producer => "Producer",
            SpanKind::Consumer => "Consumer",
        }
    }
}

impl Display for SpanKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StatusCode {
    Unset,
    Ok,
    Error,
}

impl StatusCode {
    pub fn from_protobuf(code: i32) -> Self {
        match code {
            1 => StatusCode::Ok,
            2 => StatusCode::Error,
            _ => StatusCode::Unset,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StatusCode::Unset => "Unset",
            StatusCode::Ok => "Ok",
            StatusCode::Error => "Error",
        }
    }
}

#[derive(Clone, Debug)]
pub struct SpanStatus {
    pub code: StatusCode,
    pub message: String,
}

#[derive(Clone, Debug)]
pub struct SpanEvent {
    pub name: String,
    pub time_unix_nano: u64,
    pub attributes: AttrMap,
    pub dropped_attributes_count: u32,
}

#[derive(Clone, Debug)]
pub struct SpanLink {
    pub trace_id: String,
    pub span_id: String,
    pub trace_state: String,
    pub attributes: AttrMap,
    pub dropped_attributes_count: u32,
}

/// Denormalized view over one trace span. Ids are lowercase hex; absent or
/// all-zero ids become empty strings.
#[derive(Clone, Debug)]
pub struct SpanRecord {
    pub trace_id: String,
    pub span_id: String,
    pub parent_span_id: String,
    pub name: String,
    pub kind: SpanKind,
    pub start_time_unix_nano: u64,
    pub end_time_unix_nano: u64,
    pub status: SpanStatus,
    pub attributes: AttrMap,
    pub events: Vec<SpanEvent>,
    pub links: Vec<SpanLink>,
    pub service_name: String,
    pub resource_attributes: AttrMap,
    pub scope_name: String,
    pub scope_version: String,
    pub received_at: DateTime<Utc>,
}

impl SpanRecord {
    pub fn duration_nanos(&self) -> i64 {
        self.end_time_unix_nano as i64 - self.start_time_unix_nano as i64
    }

    pub fn duration_text(&self) -> String {
        format_duration_nanos(self.duration_nanos())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MetricType {
    Gauge,
    Sum,
    Histogram,
    ExponentialHistogram,
    Summary,
    Empty,
}

impl MetricType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricType::Gauge => "Gauge",
            MetricType::Sum => "Sum",
            MetricType::Histogram => "Histogram",
            MetricType::ExponentialHistogram => "ExponentialHistogram",
            MetricType::Summary => "Summary",
            MetricType::Empty => "Empty",
        }
    }
}

impl Display for MetricType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Quantile {
    pub quantile: f64,
    pub value: f64,
}

/// One normalized data point. Which fields are populated depends on the
/// owning metric's type: value for Gauge/Sum, count/sum/buckets for the
/// histogram kinds, quantile_values for Summary.
#[derive(Clone, Debug, Default)]
pub struct DataPoint {
    pub attributes: AttrMap,
    pub start_time_unix_nano: u64,
    pub time_unix_nano: u64,
    pub value: Option<f64>,
    pub count: Option<u64>,
    pub sum: Option<f64>,
    pub bucket_counts: Vec<u64>,
    pub explicit_bounds: Vec<f64>,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub quantile_values: Vec<Quantile>,
    pub flags: u32,
}

/// Denormalized view over one metric datum.
#[derive(Clone, Debug)]
pub struct MetricRecord {
    pub name: String,
    pub description: String,
    pub unit: String,
    pub metric_type: MetricType,
    pub data_points: Vec<DataPoint>,
    pub service_name: String,
    pub resource_attributes: AttrMap,
    pub scope_name: String,
    pub scope_version: String,
    pub received_at: DateTime<Utc>,
}

/// Denormalized view over one log datum. The body is resolved to a display
/// string at ingest; trace/span ids are hex or empty.
#[derive(Clone, Debug)]
pub struct LogRecord {
    pub time_unix_nano: u64,
    pub observed_time_unix_nano: u64,
    pub severity_number: i32,
    pub severity_text: String,
    pub body: String,
    pub attributes: AttrMap,
    pub trace_id: String,
    pub span_id: String,
    pub flags: u32,
    pub service_name: String,
    pub resource_attributes: AttrMap,
    pub scope_name: String,
    pub scope_version: String,
    pub received_at: DateTime<Utc>,
}

/// Renders a nanosecond count in the short human form used on the wire,
/// e.g. "250ns", "1.5µs", "1.23ms", "2s".
pub fn format_duration_nanos(nanos: i64) -> String {
    if nanos == 0 {
        return "0s".to_string();
    }

    let sign = if nanos < 0 { "-" } else { "" };
    let abs = nanos.unsigned_abs();
    if abs < 1_000 {
        return format!("{}{}ns", sign, abs);
    }

    let (scaled, unit) = if abs < 1_000_000 {
        (abs as f64 / 1_000.0, "µs")
    } else if abs < 1_000_000_000 {
        (abs as f64 / 1_000_000.0, "ms")
    } else {
        (abs as f64 / 1_000_000_000.0, "s")
    };

    let mut text = format!("{:.2}", scaled);
    if text.contains('.') {
        text = text
            .trim_end_matches('0')
            .trim_end_matches('.')
            .to_string();
    }
    format!("{}{}{}", sign, text, unit)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duration_text_picks_unit() {
        assert_eq!("0s", format_duration_nanos(0));
        assert_eq!("250ns", format_duration_nanos(250));
        assert_eq!("1.5µs", format_duration_nanos(1_500));
        assert_eq!("1.23ms", format_duration_nanos(1_230_000));
        assert_eq!("200ms", format_duration_nanos(200_000_000));
        assert_eq!("2s", format_duration_nanos(2_000_000_000));
        assert_eq!("-1.5µs", format_duration_nanos(-1_500));
    }

    #[test]
    fn kind_and_status_from_protobuf() {
        assert_eq!(SpanKind::Server, SpanKind::from_protobuf(2));
        assert_eq!(SpanKind::Unspecified, SpanKind::from_protobuf(42));
        assert_eq!(StatusCode::Error, StatusCode::from_protobuf(2));
        assert_eq!(StatusCode::Unset, StatusCode::from_protobuf(-1));
    }
}
