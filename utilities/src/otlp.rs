use chrono::Utc;
use opentelemetry_proto::tonic::collector::logs::v1::ExportLogsServiceRequest;
use opentelemetry_proto::tonic::collector::metrics::v1::ExportMetricsServiceRequest;
use opentelemetry_proto::tonic::collector::trace::v1::ExportTraceServiceRequest;
use opentelemetry_proto::tonic::common::v1::any_value::Value::StringValue;
use opentelemetry_proto::tonic::common::v1::{AnyValue, InstrumentationScope, KeyValue};
use opentelemetry_proto::tonic::logs::v1::{LogRecord, ResourceLogs, ScopeLogs};
use opentelemetry_proto::tonic::metrics::v1::metric::Data;
use opentelemetry_proto::tonic::metrics::v1::number_data_point::Value;
use opentelemetry_proto::tonic::metrics::v1::{
    Gauge, Metric, NumberDataPoint, ResourceMetrics, ScopeMetrics,
};
use opentelemetry_proto::tonic::resource::v1::Resource;
use opentelemetry_proto::tonic::trace::v1;
use opentelemetry_proto::tonic::trace::v1::span::SpanKind;
use opentelemetry_proto::tonic::trace::v1::{ResourceSpans, ScopeSpans, Status};

const SCHEMA_URL: &str = "https://opentelemetry.io/schemas/1.21.0";

pub struct FakeOTLP;

impl FakeOTLP {
    pub fn logs_service_request() -> ExportLogsServiceRequest {
        Self::logs_service_request_with_logs(1, 1)
    }

    pub fn logs_service_request_with_logs(
        num_resource_logs: usize,
        num_logs: usize,
    ) -> ExportLogsServiceRequest {
        let mut exp = ExportLogsServiceRequest {
            resource_logs: Vec::with_capacity(num_resource_logs),
        };
        for _i in 0..num_resource_logs {
            let logs = (0..num_logs)
                .map(|_| Self::log_record(0, "WARNING", "This is a log message", vec![]))
                .collect();
            exp.resource_logs
                .push(Self::resource_logs_for("test-service", logs));
        }
        exp
    }

    /// One ResourceLogs whose resource names the given service.
    pub fn resource_logs_for(service: &str, logs: Vec<LogRecord>) -> ResourceLogs {
        ResourceLogs {
            resource: Some(Self::resource(service)),
            scope_logs: vec![ScopeLogs {
                scope: None,
                log_records: logs,
                schema_url: SCHEMA_URL.to_string(),
            }],
            schema_url: SCHEMA_URL.to_string(),
        }
    }

    pub fn log_record(
        severity_number: i32,
        severity_text: &str,
        body: &str,
        trace_id: Vec<u8>,
    ) -> LogRecord {
        let now_ns = Utc::now().timestamp_nanos_opt().unwrap();
        LogRecord {
            time_unix_nano: now_ns as u64,
            observed_time_unix_nano: now_ns as u64,
            severity_number,
            severity_text: severity_text.to_string(),
            body: Some(AnyValue {
                value: Some(StringValue(body.to_string())),
            }),
            attributes: vec![],
            dropped_attributes_count: 0,
            flags: 0,
            trace_id,
            span_id: vec![],
            event_name: "".to_string(),
        }
    }

    pub fn metrics_service_request() -> ExportMetricsServiceRequest {
        Self::metrics_service_request_with_metrics(1, 1)
    }

    pub fn metrics_service_request_with_metrics(
        num_resource_metrics: usize,
        num_metrics: usize,
    ) -> ExportMetricsServiceRequest {
        let mut exp = ExportMetricsServiceRequest {
            resource_metrics: Vec::with_capacity(num_resource_metrics),
        };
        for _i in 0..num_resource_metrics {
            let metrics = (0..num_metrics)
                .map(|_| Self::gauge("test-metric", 100.0))
                .collect();
            exp.resource_metrics
                .push(Self::resource_metrics_for("test-service", metrics));
        }
        exp
    }

    /// One ResourceMetrics whose resource names the given service.
    pub fn resource_metrics_for(service: &str, metrics: Vec<Metric>) -> ResourceMetrics {
        ResourceMetrics {
            resource: Some(Self::resource(service)),
            scope_metrics: vec![ScopeMetrics {
                scope: None,
                metrics,
                schema_url: SCHEMA_URL.to_string(),
            }],
            schema_url: SCHEMA_URL.to_string(),
        }
    }

    pub fn gauge(name: &str, value: f64) -> Metric {
        let now_ns = Utc::now().timestamp_nanos_opt().unwrap();
        Metric {
            name: name.to_string(),
            description: "An example OTLP Metric".to_string(),
            unit: "".to_string(),
            metadata: vec![],
            data: Some(Data::Gauge(Gauge {
                data_points: vec![NumberDataPoint {
                    attributes: vec![],
                    start_time_unix_nano: now_ns as u64,
                    time_unix_nano: now_ns as u64,
                    exemplars: vec![],
                    flags: 0,
                    value: Some(Value::AsDouble(value)),
                }],
            })),
        }
    }

    pub fn trace_service_request() -> ExportTraceServiceRequest {
        Self::trace_service_request_with_spans(1, 1)
    }

    pub fn trace_service_request_with_spans(
        num_res_spans: usize,
        num_spans: usize,
    ) -> ExportTraceServiceRequest {
        let mut exp = ExportTraceServiceRequest {
            resource_spans: Vec::with_capacity(num_res_spans),
        };
        for _i in 0..num_res_spans {
            let spans = (0..num_spans)
                .map(|_| Self::span_with_ids("foo", Self::trace_id(1), Self::span_id(2), vec![]))
                .collect();
            exp.resource_spans
                .push(Self::resource_spans_for("test-service", spans));
        }
        exp
    }

    /// One ResourceSpans whose resource names the given service.
    pub fn resource_spans_for(service: &str, spans: Vec<v1::Span>) -> ResourceSpans {
        let scope_spans = ScopeSpans {
            scope: Some(InstrumentationScope {
                name: "scope".to_string(),
                version: "0.0.1".to_string(),
                attributes: vec![string_attr("module", "api")],
                dropped_attributes_count: 0,
            }),
            spans,
            schema_url: SCHEMA_URL.to_string(),
        };
        ResourceSpans {
            resource: Some(Self::resource(service)),
            scope_spans: vec![scope_spans],
            schema_url: SCHEMA_URL.to_string(),
        }
    }

    /// A 1ms span with explicit identity; tweak fields on the returned
    /// value for durations, statuses, or timestamps.
    pub fn span_with_ids(
        name: &str,
        trace_id: Vec<u8>,
        span_id: Vec<u8>,
        parent_span_id: Vec<u8>,
    ) -> v1::Span {
        let now_ns = Utc::now().timestamp_nanos_opt().unwrap();
        let finish_ns = now_ns + 1_000_000;
        v1::Span {
            trace_id,
            span_id,
            trace_state: "".to_string(),
            parent_span_id,
            flags: 0,
            name: name.to_string(),
            kind: SpanKind::Internal.into(),
            start_time_unix_nano: now_ns as u64,
            end_time_unix_nano: finish_ns as u64,
            attributes: vec![
                string_attr("http.method", "POST"),
                string_attr("http.request.path", "/items"),
            ],
            dropped_attributes_count: 0,
            events: vec![],
            dropped_events_count: 0,
            links: vec![],
            dropped_links_count: 0,
            status: Some(Status::default()),
        }
    }

    /// Distinct, never-all-zero 16-byte trace id derived from a counter.
    pub fn trace_id(n: u64) -> Vec<u8> {
        let mut id = Vec::with_capacity(16);
        id.extend_from_slice(&(n | 1 << 63).to_be_bytes());
        id.extend_from_slice(&n.to_be_bytes());
        id
    }

    /// Distinct, never-all-zero 8-byte span id derived from a counter.
    pub fn span_id(n: u64) -> Vec<u8> {
        (n | 1 << 63).to_be_bytes().to_vec()
    }

    fn resource(service: &str) -> Resource {
        Resource {
            attributes: vec![
                string_attr("service.name", service),
                string_attr("telemetry.sdk.version", "1.13.0"),
                string_attr("telemetry.sdk.name", "open-telemetry"),
                string_attr("k8s.pod.uid", "dc2c3e55-0dfb-4fda-854c-f7a1e5f88fd6"),
                string_attr("k8s.node.name", "ip-10-250-64-50.ec2.internal"),
                string_attr(
                    "container.id",
                    "b1e5232f92b315b7d91052e2c1b09de3735bea5b51c983a2a81ff3d69dfd0359",
                ),
            ],
            ..Default::default()
        }
    }
}

pub fn string_attr(key: &str, value: &str) -> KeyValue {
    KeyValue {
        key: key.to_string(),
        value: Some(AnyValue {
            value: Some(StringValue(value.to_string())),
        }),
    }
}
