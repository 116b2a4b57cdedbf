// SPDX-License-Identifier: Apache-2.0

//! Read-only HTTP query surface. Every handler takes the store's shared
//! lock, runs the relevant accessor, and serializes JSON while still
//! holding it, so a response always reflects one consistent snapshot.

pub mod models;

use crate::listener::Listener;
use crate::query::{
    filter_logs, filter_metrics, filter_spans, LogQuery, MetricQuery, Pagination, QueryParams,
    QueryResult, TraceQuery,
};
use crate::server::models::{
    ErrorJson, LogJson, MetricJson, SpanJson, StatsJson, TraceJson,
};
use crate::telemetry::store::TelemetryStore;
use http::header::{
    HeaderMap, HeaderValue, ACCESS_CONTROL_ALLOW_CREDENTIALS, ACCESS_CONTROL_ALLOW_HEADERS,
    ACCESS_CONTROL_ALLOW_METHODS, ACCESS_CONTROL_ALLOW_ORIGIN, ACCESS_CONTROL_EXPOSE_HEADERS,
    ACCESS_CONTROL_MAX_AGE, CONTENT_TYPE,
};
use http::Method;
use http_body_util::Full;
use hyper::body::{Body, Bytes};
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder;
use hyper_util::service::TowerToHyperService;
use percent_encoding::percent_decode_str;
use serde::Serialize;
use std::collections::BTreeSet;
use std::error::Error as StdError;
use std::fmt::{Debug, Display};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio_util::sync::CancellationToken;
use tower::{Service, ServiceBuilder};
use tower_http::trace::{HttpMakeClassifier, Trace, TraceLayer};
use tracing::error;

/// Serves the `/api` query routes for one telemetry store.
pub struct QueryApiServer {
    store: Arc<TelemetryStore>,
}

impl QueryApiServer {
    pub fn new(store: Arc<TelemetryStore>) -> Self {
        Self { store }
    }

    /// Accepts connections until cancelled, then drains them gracefully.
    pub async fn serve(
        &self,
        listener: Listener,
        cancellation: CancellationToken,
    ) -> Result<(), Box<dyn StdError + Send + Sync>> {
        let svc = build_service(self.store.clone());

        // To bridge Tower->Hyper we must wrap the tower service
        let svc = TowerToHyperService::new(svc);

        let timer = hyper_util::rt::TokioTimer::new();
        let graceful = hyper_util::server::graceful::GracefulShutdown::new();

        let mut builder = Builder::new(TokioExecutor::new());
        builder.http1().timer(timer.clone());
        builder.http2().timer(timer);

        let listener = listener.into_async()?;
        loop {
            let stream = tokio::select! {
                r = listener.accept() => {
                    match r {
                        Ok((stream, _)) => stream,
                        Err(e) => return Err(e.into()),
                    }
                },
                _ = cancellation.cancelled() => break
            };

            let io = TokioIo::new(stream);

            let conn = builder.serve_connection(io, svc.clone());
            let fut = graceful.watch(conn.into_owned());

            tokio::spawn(async move {
                let _ = fut.await.map_err(|e| {
                    error!("error serving query connection: {:?}", e);
                });
            });
        }

        graceful.shutdown().await;

        Ok(())
    }
}

fn build_service(store: Arc<TelemetryStore>) -> Trace<ApiService, HttpMakeClassifier> {
    ServiceBuilder::new()
        // Log requests at debug level
        .layer(TraceLayer::new_for_http())
        .service(ApiService::new(store))
}

#[derive(Clone)]
struct ApiService {
    store: Arc<TelemetryStore>,
}

impl ApiService {
    fn new(store: Arc<TelemetryStore>) -> Self {
        Self { store }
    }

    fn route<H>(&self, req: &Request<H>) -> Response<Full<Bytes>> {
        if req.method() != Method::GET {
            return error_response(StatusCode::NOT_FOUND, "Not found");
        }

        let params = QueryParams::parse(req.uri().query());
        let segments = path_segments(req.uri().path());
        let segments: Vec<&str> = segments.iter().map(String::as_str).collect();

        match segments.as_slice() {
            ["api", "traces"] => self.list_traces(&params),
            ["api", "traces", trace_id] => self.trace_by_id(trace_id),
            ["api", "traces", trace_id, "services", service] => {
                self.trace_by_id_and_service(trace_id, service)
            }
            ["api", "spans", span_id] => self.span_by_id(span_id),
            ["api", "metrics"] => self.list_metrics(&params),
            ["api", "metrics", service] => self.metrics_by_service(service),
            ["api", "metrics", service, metric_name] => {
                self.metrics_by_service_and_name(service, metric_name)
            }
            ["api", "logs"] => self.list_logs(&params),
            ["api", "logs", "trace", trace_id] => self.logs_by_trace(trace_id),
            ["api", "topology"] => self.topology(),
            ["api", "services"] => self.services(),
            ["api", "stats"] => self.stats(),
            _ => error_response(StatusCode::NOT_FOUND, "Not found"),
        }
    }

    fn list_traces(&self, params: &QueryParams) -> Response<Full<Bytes>> {
        let query = TraceQuery::from_params(params);
        let state = self.store.read();
        let result = filter_spans(state.spans(), &query);
        let body: Vec<SpanJson> = result.page.iter().map(|s| SpanJson::from(s.as_ref())).collect();
        paginated_json(&body, &result, &query.pagination)
    }

    fn trace_by_id(&self, trace_id: &str) -> Response<Full<Bytes>> {
        let state = self.store.read();
        let Some(spans) = state.spans_by_trace(trace_id) else {
            return error_response(StatusCode::NOT_FOUND, "Trace not found");
        };

        let services: BTreeSet<String> =
            spans.iter().map(|s| s.service_name.clone()).collect();
        let body = TraceJson {
            trace_id: trace_id.to_string(),
            spans: spans.iter().map(|s| SpanJson::from(s.as_ref())).collect(),
            services: services.into_iter().collect(),
        };
        json_response(StatusCode::OK, &body)
    }

    fn trace_by_id_and_service(&self, trace_id: &str, service: &str) -> Response<Full<Bytes>> {
        let state = self.store.read();
        let Some(spans) = state.spans_by_trace_and_service(trace_id, service) else {
            return error_response(
                StatusCode::NOT_FOUND,
                "Spans not found for trace and service",
            );
        };

        let body: Vec<SpanJson> = spans.iter().map(|s| SpanJson::from(s.as_ref())).collect();
        json_response(StatusCode::OK, &body)
    }

    fn span_by_id(&self, span_id: &str) -> Response<Full<Bytes>> {
        let state = self.store.read();
        let Some(span) = state.span_by_id(span_id) else {
            return error_response(StatusCode::NOT_FOUND, "Span not found");
        };
        json_response(StatusCode::OK, &SpanJson::from(span.as_ref()))
    }

    fn list_metrics(&self, params: &QueryParams) -> Response<Full<Bytes>> {
        let query = MetricQuery::from_params(params);
        let state = self.store.read();
        let result = filter_metrics(state.metrics(), &query);
        let body: Vec<MetricJson> = result
            .page
            .iter()
            .map(|m| MetricJson::from(m.as_ref()))
            .collect();
        paginated_json(&body, &result, &query.pagination)
    }

    fn metrics_by_service(&self, service: &str) -> Response<Full<Bytes>> {
        let state = self.store.read();
        let body: Vec<MetricJson> = state
            .filtered_metrics(service)
            .iter()
            .map(|m| MetricJson::from(m.as_ref()))
            .collect();
        json_response(StatusCode::OK, &body)
    }

    fn metrics_by_service_and_name(&self, service: &str, name: &str) -> Response<Full<Bytes>> {
        let state = self.store.read();
        let Some(metrics) = state.metrics_by_service_and_name(service, name) else {
            return error_response(
                StatusCode::NOT_FOUND,
                "Metrics not found for service and metric name",
            );
        };
        let body: Vec<MetricJson> = metrics.iter().map(|m| MetricJson::from(m.as_ref())).collect();
        json_response(StatusCode::OK, &body)
    }

    fn list_logs(&self, params: &QueryParams) -> Response<Full<Bytes>> {
        let query = LogQuery::from_params(params);
        let state = self.store.read();
        let result = filter_logs(state.logs(), &query);
        let body: Vec<LogJson> = result.page.iter().map(|l| LogJson::from(l.as_ref())).collect();
        paginated_json(&body, &result, &query.pagination)
    }

    fn logs_by_trace(&self, trace_id: &str) -> Response<Full<Bytes>> {
        let state = self.store.read();
        let Some(logs) = state.logs_by_trace(trace_id) else {
            return error_response(StatusCode::NOT_FOUND, "Logs not found for trace");
        };
        let body: Vec<LogJson> = logs.iter().map(|l| LogJson::from(l.as_ref())).collect();
        json_response(StatusCode::OK, &body)
    }

    fn topology(&self) -> Response<Full<Bytes>> {
        let state = self.store.read();
        json_response(StatusCode::OK, &state.service_graph())
    }

    fn services(&self) -> Response<Full<Bytes>> {
        let state = self.store.read();
        json_response(StatusCode::OK, &state.services())
    }

    fn stats(&self) -> Response<Full<Bytes>> {
        let state = self.store.read();
        json_response(StatusCode::OK, &StatsJson::from(&state.stats()))
    }
}

impl<H> Service<Request<H>> for ApiService
where
    H: Body + Send + Sync + 'static,
    <H as Body>::Data: Send + Sync + Clone,
    <H as Body>::Error: Display + Debug + Send + Sync + ToString,
{
    type Response = Response<Full<Bytes>>;
    type Error = hyper::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: Request<H>) -> Self::Future {
        let mut response = if req.method() == Method::OPTIONS {
            Response::builder()
                .status(StatusCode::NO_CONTENT)
                .body(Full::new(Bytes::new()))
                .unwrap()
        } else {
            self.route(&req)
        };
        apply_cors(response.headers_mut());
        Box::pin(futures::future::ok(response))
    }
}

fn path_segments(path: &str) -> Vec<String> {
    path.split('/')
        .filter(|s| !s.is_empty())
        .map(|s| percent_decode_str(s).decode_utf8_lossy().into_owned())
        .collect()
}

/// Permissive CORS headers, applied to every response including errors and
/// preflights.
fn apply_cors(headers: &mut HeaderMap) {
    headers.insert(ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*"));
    headers.insert(
        ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static("GET, POST, PUT, DELETE, OPTIONS, PATCH, HEAD"),
    );
    headers.insert(ACCESS_CONTROL_ALLOW_HEADERS, HeaderValue::from_static("*"));
    headers.insert(
        ACCESS_CONTROL_ALLOW_CREDENTIALS,
        HeaderValue::from_static("true"),
    );
    headers.insert(ACCESS_CONTROL_EXPOSE_HEADERS, HeaderValue::from_static("*"));
    headers.insert(ACCESS_CONTROL_MAX_AGE, HeaderValue::from_static("86400"));
}

fn json_response<T: Serialize>(status: StatusCode, body: &T) -> Response<Full<Bytes>> {
    match serde_json::to_vec(body) {
        Ok(buf) => Response::builder()
            .status(status)
            .header(CONTENT_TYPE, "application/json")
            .body(Full::new(Bytes::from(buf)))
            .unwrap(),
        Err(e) => {
            error!(error = %e, "Failed to serialize response body.");
            Response::builder()
                .status(StatusCode::INTERNAL_SERVER_ERROR)
                .body(Full::new(Bytes::from_static(b"serialization failure")))
                .unwrap()
        }
    }
}

fn error_response(status: StatusCode, message: &str) -> Response<Full<Bytes>> {
    json_response(
        status,
        &ErrorJson {
            error: message.to_string(),
        },
    )
}

fn paginated_json<T: Serialize, R>(
    body: &T,
    result: &QueryResult<R>,
    pagination: &Pagination,
) -> Response<Full<Bytes>> {
    let mut response = json_response(StatusCode::OK, body);
    let headers = response.headers_mut();
    headers.insert("X-Total-Count", HeaderValue::from(result.total as u64));
    headers.insert("X-Filtered-Count", HeaderValue::from(result.filtered as u64));
    headers.insert("X-Offset", HeaderValue::from(pagination.offset as u64));
    headers.insert("X-Limit", HeaderValue::from(pagination.limit as u64));
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::SystemClock;
    use http_body_util::BodyExt;
    use serde_json::Value;

    extern crate utilities;
    use utilities::otlp::FakeOTLP;

    fn new_store() -> Arc<TelemetryStore> {
        Arc::new(TelemetryStore::new(Arc::new(SystemClock)))
    }

    async fn call(
        store: &Arc<TelemetryStore>,
        method: Method,
        path_and_query: &str,
    ) -> Response<Full<Bytes>> {
        let mut svc = ApiService::new(store.clone());
        let req: Request<Full<Bytes>> = Request::builder()
            .method(method)
            .uri(path_and_query)
            .body(Full::<Bytes>::default())
            .unwrap();
        svc.call(req).await.unwrap()
    }

    async fn get_json(store: &Arc<TelemetryStore>, path: &str) -> (StatusCode, Value) {
        let resp = call(store, Method::GET, path).await;
        let status = resp.status();
        let body = resp.into_body().collect().await.unwrap().to_bytes();
        (status, serde_json::from_slice(&body).unwrap())
    }

    fn seed_trace(store: &Arc<TelemetryStore>) {
        store.add_span_batch(vec![
            FakeOTLP::resource_spans_for(
                "front",
                vec![FakeOTLP::span_with_ids(
                    "root",
                    FakeOTLP::trace_id(7),
                    FakeOTLP::span_id(1),
                    vec![],
                )],
            ),
            FakeOTLP::resource_spans_for(
                "back",
                vec![FakeOTLP::span_with_ids(
                    "child",
                    FakeOTLP::trace_id(7),
                    FakeOTLP::span_id(2),
                    FakeOTLP::span_id(1),
                )],
            ),
        ]);
    }

    #[tokio::test]
    async fn cors_headers_on_every_response() {
        let store = new_store();

        let resp = call(&store, Method::OPTIONS, "/api/traces").await;
        assert_eq!(StatusCode::NO_CONTENT, resp.status());
        assert_eq!("*", resp.headers().get(ACCESS_CONTROL_ALLOW_ORIGIN).unwrap());
        assert_eq!("86400", resp.headers().get(ACCESS_CONTROL_MAX_AGE).unwrap());

        let resp = call(&store, Method::GET, "/api/nope").await;
        assert_eq!(StatusCode::NOT_FOUND, resp.status());
        assert_eq!("*", resp.headers().get(ACCESS_CONTROL_ALLOW_ORIGIN).unwrap());
    }

    #[tokio::test]
    async fn traces_list_sets_pagination_headers() {
        let store = new_store();
        seed_trace(&store);

        let resp = call(&store, Method::GET, "/api/traces?limit=1").await;
        assert_eq!(StatusCode::OK, resp.status());
        assert_eq!("2", resp.headers().get("X-Total-Count").unwrap());
        assert_eq!("2", resp.headers().get("X-Filtered-Count").unwrap());
        assert_eq!("0", resp.headers().get("X-Offset").unwrap());
        assert_eq!("1", resp.headers().get("X-Limit").unwrap());

        let body = resp.into_body().collect().await.unwrap().to_bytes();
        let value: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(1, value.as_array().unwrap().len());
    }

    #[tokio::test]
    async fn trace_detail_and_404() {
        let store = new_store();
        seed_trace(&store);

        let trace_id = hex::encode(FakeOTLP::trace_id(7));
        let (status, value) = get_json(&store, &format!("/api/traces/{}", trace_id)).await;
        assert_eq!(StatusCode::OK, status);
        assert_eq!(2, value["spans"].as_array().unwrap().len());
        assert_eq!(
            vec!["back", "front"],
            value["services"]
                .as_array()
                .unwrap()
                .iter()
                .map(|v| v.as_str().unwrap())
                .collect::<Vec<_>>()
        );

        let (status, value) = get_json(&store, "/api/traces/doesnotexist").await;
        assert_eq!(StatusCode::NOT_FOUND, status);
        assert_eq!("Trace not found", value["error"]);
    }

    #[tokio::test]
    async fn trace_service_detail() {
        let store = new_store();
        seed_trace(&store);
        let trace_id = hex::encode(FakeOTLP::trace_id(7));

        let (status, value) =
            get_json(&store, &format!("/api/traces/{}/services/front", trace_id)).await;
        assert_eq!(StatusCode::OK, status);
        assert_eq!(1, value.as_array().unwrap().len());

        let (status, value) =
            get_json(&store, &format!("/api/traces/{}/services/nope", trace_id)).await;
        assert_eq!(StatusCode::NOT_FOUND, status);
        assert_eq!("Spans not found for trace and service", value["error"]);
    }

    #[tokio::test]
    async fn span_detail() {
        let store = new_store();
        seed_trace(&store);

        let span_id = hex::encode(FakeOTLP::span_id(2));
        let (status, value) = get_json(&store, &format!("/api/spans/{}", span_id)).await;
        assert_eq!(StatusCode::OK, status);
        assert_eq!("child", value["name"]);
        assert_eq!("back", value["serviceName"]);
        assert_eq!(hex::encode(FakeOTLP::span_id(1)), value["parentSpanId"]);

        let (status, value) = get_json(&store, "/api/spans/ffffffffffffffff").await;
        assert_eq!(StatusCode::NOT_FOUND, status);
        assert_eq!("Span not found", value["error"]);
    }

    #[tokio::test]
    async fn metric_routes() {
        let store = new_store();
        store.add_metric_batch(vec![
            FakeOTLP::resource_metrics_for("checkout", vec![FakeOTLP::gauge("http.latency", 1.0)]),
            FakeOTLP::resource_metrics_for("billing", vec![FakeOTLP::gauge("queue.depth", 2.0)]),
        ]);

        let resp = call(&store, Method::GET, "/api/metrics").await;
        assert_eq!(StatusCode::OK, resp.status());
        assert_eq!("2", resp.headers().get("X-Total-Count").unwrap());

        // Substring view, empty array rather than 404
        let (status, value) = get_json(&store, "/api/metrics/checkout").await;
        assert_eq!(StatusCode::OK, status);
        assert_eq!(1, value.as_array().unwrap().len());
        let (status, value) = get_json(&store, "/api/metrics/absent").await;
        assert_eq!(StatusCode::OK, status);
        assert!(value.as_array().unwrap().is_empty());

        let (status, value) = get_json(&store, "/api/metrics/checkout/http.latency").await;
        assert_eq!(StatusCode::OK, status);
        assert_eq!("http.latency", value[0]["name"]);

        let (status, value) = get_json(&store, "/api/metrics/checkout/nope").await;
        assert_eq!(StatusCode::NOT_FOUND, status);
        assert_eq!("Metrics not found for service and metric name", value["error"]);
    }

    #[tokio::test]
    async fn log_routes() {
        let store = new_store();
        store.add_log_batch(vec![FakeOTLP::resource_logs_for(
            "svc",
            vec![
                FakeOTLP::log_record(9, "INFO", "listening", FakeOTLP::trace_id(3)),
                FakeOTLP::log_record(17, "ERROR", "timeout", vec![]),
            ],
        )]);

        let resp = call(&store, Method::GET, "/api/logs?min_severity=error").await;
        assert_eq!("1", resp.headers().get("X-Filtered-Count").unwrap());
        assert_eq!("2", resp.headers().get("X-Total-Count").unwrap());

        let trace_id = hex::encode(FakeOTLP::trace_id(3));
        let (status, value) = get_json(&store, &format!("/api/logs/trace/{}", trace_id)).await;
        assert_eq!(StatusCode::OK, status);
        assert_eq!("listening", value[0]["body"]);

        let (status, value) = get_json(&store, "/api/logs/trace/none").await;
        assert_eq!(StatusCode::NOT_FOUND, status);
        assert_eq!("Logs not found for trace", value["error"]);
    }

    #[tokio::test]
    async fn topology_services_stats() {
        let store = new_store();
        seed_trace(&store);

        let (status, value) = get_json(&store, "/api/topology").await;
        assert_eq!(StatusCode::OK, status);
        assert_eq!(2, value["nodes"].as_array().unwrap().len());
        assert_eq!("front", value["edges"][0]["source"]);
        assert_eq!("back", value["edges"][0]["target"]);
        assert_eq!(1, value["edges"][0]["count"]);

        let (status, value) = get_json(&store, "/api/services").await;
        assert_eq!(StatusCode::OK, status);
        assert_eq!(
            vec!["back", "front"],
            value
                .as_array()
                .unwrap()
                .iter()
                .map(|v| v.as_str().unwrap())
                .collect::<Vec<_>>()
        );

        let (status, value) = get_json(&store, "/api/stats").await;
        assert_eq!(StatusCode::OK, status);
        assert_eq!(2, value["spanCount"]);
        assert_eq!(1, value["traceCount"]);
        assert_eq!(2, value["serviceCount"]);
        assert_eq!(1000, value["maxServiceSpanCount"]);
        assert_eq!(3000, value["maxMetricCount"]);
    }

    #[tokio::test]
    async fn non_get_is_rejected() {
        let store = new_store();
        let resp = call(&store, Method::POST, "/api/traces").await;
        assert_eq!(StatusCode::NOT_FOUND, resp.status());
    }

    #[tokio::test]
    async fn path_segments_are_percent_decoded() {
        let store = new_store();
        store.add_span_batch(vec![FakeOTLP::resource_spans_for(
            "front end",
            vec![FakeOTLP::span_with_ids(
                "root",
                FakeOTLP::trace_id(9),
                FakeOTLP::span_id(9),
                vec![],
            )],
        )]);

        let trace_id = hex::encode(FakeOTLP::trace_id(9));
        let (status, value) = get_json(
            &store,
            &format!("/api/traces/{}/services/front%20end", trace_id),
        )
        .await;
        assert_eq!(StatusCode::OK, status);
        assert_eq!(1, value.as_array().unwrap().len());
    }
}
