// SPDX-License-Identifier: Apache-2.0

//! OTLP/HTTP ingest adapter: accepts `POST /v1/{traces,metrics,logs}` in
//! protobuf or JSON (optionally gzipped), decodes, and pushes the batches
//! into the telemetry store. Store ingestion cannot fail, so accepted
//! content is always acknowledged with an empty success response.

use crate::listener::Listener;
use crate::receivers::get_meter;
use crate::telemetry::store::TelemetryStore;
use flate2::read::GzDecoder;
use http::header::{CONTENT_ENCODING, CONTENT_TYPE};
use http::{HeaderValue, Method};
use http_body_util::{BodyExt, Full};
use hyper::body::Body;
use hyper::body::Bytes;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder;
use hyper_util::service::TowerToHyperService;
use opentelemetry::metrics::Counter;
use opentelemetry::KeyValue;
use opentelemetry_proto::tonic::collector::logs::v1::{
    ExportLogsServiceRequest, ExportLogsServiceResponse,
};
use opentelemetry_proto::tonic::collector::metrics::v1::{
    ExportMetricsServiceRequest, ExportMetricsServiceResponse,
};
use opentelemetry_proto::tonic::collector::trace::v1::{
    ExportTraceServiceRequest, ExportTraceServiceResponse,
};
use opentelemetry_proto::tonic::logs::v1::ResourceLogs;
use opentelemetry_proto::tonic::metrics::v1::ResourceMetrics;
use opentelemetry_proto::tonic::trace::v1::ResourceSpans;
use prost::EncodeError;
use read_restrict::ReadExt;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::error::Error as StdError;
use std::fmt::{Debug, Display};
use std::future::Future;
use std::io::{ErrorKind, Read};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tower::{Service, ServiceBuilder};
use tower_http::compression::{Compression, CompressionLayer};
use tower_http::limit::{RequestBodyLimit, RequestBodyLimitLayer};
use tower_http::trace::{HttpMakeClassifier, Trace, TraceLayer};
use tower_http::validate_request::{
    ValidateRequest, ValidateRequestHeader, ValidateRequestHeaderLayer,
};
use tracing::{debug, error};

// 20MiB matches collector limit:
// https://github.com/open-telemetry/opentelemetry-collector/blob/main/config/confighttp/README.md
const MAX_BODY_SIZE: usize = 20 * 1024 * 1024;

const DEFAULT_HEADER_TIMEOUT: Duration = Duration::from_secs(30);

const PROTOBUF_CT: &str = "application/x-protobuf";
const JSON_CT: &str = "application/json";

const TRACES_PATH: &str = "/v1/traces";
const METRICS_PATH: &str = "/v1/metrics";
const LOGS_PATH: &str = "/v1/logs";

pub struct OTLPHttpServerBuilder {
    store: Arc<TelemetryStore>,
    header_timeout: Option<Duration>,
}

impl OTLPHttpServerBuilder {
    pub fn with_header_timeout(self, header_timeout: Duration) -> Self {
        Self {
            header_timeout: Some(header_timeout),
            ..self
        }
    }

    pub fn build(self) -> OTLPHttpServer {
        OTLPHttpServer {
            store: self.store,
            header_timeout: self.header_timeout.unwrap_or(DEFAULT_HEADER_TIMEOUT),
        }
    }
}

pub struct OTLPHttpServer {
    store: Arc<TelemetryStore>,
    header_timeout: Duration,
}

impl OTLPHttpServer {
    pub fn builder(store: Arc<TelemetryStore>) -> OTLPHttpServerBuilder {
        OTLPHttpServerBuilder {
            store,
            header_timeout: None,
        }
    }

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
        builder
            .http1()
            .header_read_timeout(Some(self.header_timeout))
            .timer(timer.clone());
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
                    if let Some(hyper_err) = e.downcast_ref::<hyper::Error>() {
                        let err_str = format!("{:?}", hyper_err);

                        // Client shutdown races and idle header timeouts are
                        // routine; only log the rest.
                        let err_not_connected = err_str.contains("NotConnected");
                        let err_hdr_timeout = err_str.contains("HeaderTimeout");

                        if !err_not_connected && !err_hdr_timeout {
                            error!("error serving connection: {:?}", hyper_err);
                        }
                    } else {
                        error!("error serving connection: {:?}", e);
                    }
                });
            });
        }

        // gracefully shutdown existing connections
        graceful.shutdown().await;

        Ok(())
    }
}

#[derive(Clone, Default)]
struct ValidateOTLPContentType;

impl<B> ValidateRequest<B> for ValidateOTLPContentType {
    type ResponseBody = Full<Bytes>;

    fn validate(&mut self, request: &mut Request<B>) -> Result<(), Response<Self::ResponseBody>> {
        // Only validate requests for known signal paths; anything else gets
        // a 404 from the service rather than a 400 here.
        if request.method() != Method::POST
            || (request.uri().path() != TRACES_PATH
                && request.uri().path() != METRICS_PATH
                && request.uri().path() != LOGS_PATH)
        {
            return Ok(());
        }

        let ct = request.headers().get(CONTENT_TYPE);
        if ct.is_none_or(|ct| {
            !matches!(ct.to_str(), Ok(PROTOBUF_CT) | Ok(JSON_CT))
        }) {
            debug!(content_type = ?ct, "Unsupported content-type");
            Err(response_4xx(StatusCode::BAD_REQUEST).unwrap())
        } else {
            Ok(())
        }
    }
}

fn build_service(
    store: Arc<TelemetryStore>,
) -> Trace<
    RequestBodyLimit<Compression<ValidateRequestHeader<OTLPService, ValidateOTLPContentType>>>,
    HttpMakeClassifier,
> {
    ServiceBuilder::new()
        // Log requests at debug level
        .layer(TraceLayer::new_for_http())
        // Limit incoming body size
        .layer(RequestBodyLimitLayer::new(MAX_BODY_SIZE))
        // Compress responses with gzip, if accept-encoding set
        .layer(CompressionLayer::new())
        // Only supports protobuf and JSON content-types
        .layer(ValidateRequestHeaderLayer::custom(ValidateOTLPContentType))
        .service(OTLPService::new(store))
}

#[derive(Clone)]
struct OTLPService {
    store: Arc<TelemetryStore>,
    accepted_spans_counter: Counter<u64>,
    accepted_metric_points_counter: Counter<u64>,
    accepted_log_records_counter: Counter<u64>,
    tags: [KeyValue; 1],
}

impl OTLPService {
    fn new(store: Arc<TelemetryStore>) -> Self {
        Self {
            store,
            accepted_spans_counter: get_meter()
                .u64_counter("otelscope_receiver_accepted_spans")
                .with_description("Number of spans ingested into the store")
                .with_unit("spans")
                .build(),
            accepted_metric_points_counter: get_meter()
                .u64_counter("otelscope_receiver_accepted_metrics")
                .with_description("Number of metrics ingested into the store")
                .with_unit("metrics")
                .build(),
            accepted_log_records_counter: get_meter()
                .u64_counter("otelscope_receiver_accepted_log_records")
                .with_description("Number of log records ingested into the store")
                .with_unit("log_records")
                .build(),
            tags: [KeyValue::new("protocol", "http")],
        }
    }
}

impl<H> Service<Request<H>> for OTLPService
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
        if req.method() != Method::POST {
            return Box::pin(futures::future::ok(
                response_4xx(StatusCode::NOT_FOUND).unwrap(),
            ));
        }

        let tags = self.tags.clone();
        match req.uri().path() {
            TRACES_PATH => {
                let store = self.store.clone();
                let accepted = self.accepted_spans_counter.clone();
                Box::pin(handle::<
                    H,
                    ExportTraceServiceRequest,
                    ExportTraceServiceResponse,
                    _,
                >(req, accepted, tags, move |r| {
                    let count = r.resource_spans.iter().map(span_count).sum();
                    store.add_span_batch(r.resource_spans);
                    count
                }))
            }
            METRICS_PATH => {
                let store = self.store.clone();
                let accepted = self.accepted_metric_points_counter.clone();
                Box::pin(handle::<
                    H,
                    ExportMetricsServiceRequest,
                    ExportMetricsServiceResponse,
                    _,
                >(req, accepted, tags, move |r| {
                    let count = r.resource_metrics.iter().map(metric_count).sum();
                    store.add_metric_batch(r.resource_metrics);
                    count
                }))
            }
            LOGS_PATH => {
                let store = self.store.clone();
                let accepted = self.accepted_log_records_counter.clone();
                Box::pin(handle::<
                    H,
                    ExportLogsServiceRequest,
                    ExportLogsServiceResponse,
                    _,
                >(req, accepted, tags, move |r| {
                    let count = r.resource_logs.iter().map(log_count).sum();
                    store.add_log_batch(r.resource_logs);
                    count
                }))
            }
            _ => Box::pin(futures::future::ok(
                response_4xx(StatusCode::NOT_FOUND).unwrap(),
            )),
        }
    }
}

fn span_count(resource_spans: &ResourceSpans) -> usize {
    resource_spans
        .scope_spans
        .iter()
        .map(|ss| ss.spans.len())
        .sum()
}

fn metric_count(resource_metrics: &ResourceMetrics) -> usize {
    resource_metrics
        .scope_metrics
        .iter()
        .map(|sm| sm.metrics.len())
        .sum()
}

fn log_count(resource_logs: &ResourceLogs) -> usize {
    resource_logs
        .scope_logs
        .iter()
        .map(|sl| sl.log_records.len())
        .sum()
}

async fn decode_body<H: Body>(req: Request<H>) -> Result<Bytes, StatusCode>
where
    <H as Body>::Error: Display + Debug + Send + Sync + ToString,
{
    let is_gzip = req
        .headers()
        .get(CONTENT_ENCODING)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.to_lowercase() == "gzip")
        .unwrap_or(false);

    let body_bytes = match req.collect().await {
        Ok(bytes) => bytes.to_bytes(),
        Err(e) => {
            // The limit layer's error type is erased by the time it reaches
            // here, so match on the message.
            if e.to_string().contains("length limit exceeded") {
                return Err(StatusCode::PAYLOAD_TOO_LARGE);
            }
            error!("Failed to read request body: {:?}", e);
            return Err(StatusCode::BAD_REQUEST);
        }
    };

    let decoded_bytes = if is_gzip {
        match decompress_gzip(&body_bytes) {
            Ok(bytes) => bytes,
            Err(e) => {
                if ErrorKind::InvalidData == e.kind() {
                    return Err(StatusCode::PAYLOAD_TOO_LARGE);
                }
                error!("Failed to decompress gzip data: {}", e);
                return Err(StatusCode::BAD_REQUEST);
            }
        }
    } else {
        body_bytes
    };

    Ok(decoded_bytes)
}

async fn handle<H, ExpReq, ExpResp, F>(
    req: Request<H>,
    accepted_counter: Counter<u64>,
    tags: [KeyValue; 1],
    push: F,
) -> Result<Response<Full<Bytes>>, hyper::Error>
where
    H: Body,
    <H as Body>::Error: Display + Debug + Send + Sync + ToString,
    ExpReq: prost::Message + DeserializeOwned + Default,
    ExpResp: prost::Message + Serialize + Default,
    F: FnOnce(ExpReq) -> usize,
{
    let Some(ct) = req.headers().get(CONTENT_TYPE).cloned() else {
        return response_4xx(StatusCode::BAD_REQUEST);
    };

    let decoded_bytes = match decode_body(req).await {
        Ok(bytes) => bytes,
        Err(code) => return response_4xx(code),
    };

    let mut json_resp = false;
    let otlp_req = match ct.to_str().unwrap_or_default() {
        PROTOBUF_CT => match ExpReq::decode(decoded_bytes) {
            Ok(decoded) => decoded,
            Err(e) => {
                error!(
                    error = e.to_string(),
                    "Failed to decode OTLP HTTP/Protobuf request."
                );
                return response_4xx(StatusCode::BAD_REQUEST);
            }
        },
        JSON_CT => match serde_json::from_slice::<ExpReq>(decoded_bytes.as_ref()) {
            Ok(decoded) => {
                json_resp = true;
                decoded
            }
            Err(e) => {
                error!(
                    error = e.to_string(),
                    "Failed to decode OTLP HTTP/JSON request."
                );
                return response_4xx(StatusCode::BAD_REQUEST);
            }
        },
        _ => {
            return response_4xx(StatusCode::BAD_REQUEST);
        }
    };

    let mut rb = Response::builder();
    let resp_headers = rb.headers_mut().unwrap();
    if json_resp {
        resp_headers.insert(CONTENT_TYPE, HeaderValue::from_static(JSON_CT));
    } else {
        resp_headers.insert(CONTENT_TYPE, HeaderValue::from_static(PROTOBUF_CT));
    }

    // Ingestion never fails; it evicts old data rather than refusing new.
    let count = push(otlp_req);
    accepted_counter.add(count as u64, &tags);

    let body = compute_ok_resp::<ExpResp>(json_resp).unwrap_or_default();
    Ok(rb.body(Full::new(body)).unwrap())
}

// We can't use the DecompressionLayer because it doesn't provide a limit
// on the inflated size
fn decompress_gzip(compressed: &[u8]) -> std::io::Result<Bytes> {
    let decoder = GzDecoder::new(compressed);
    let mut decoder = decoder.restrict(MAX_BODY_SIZE as u64);
    let mut decompressed = Vec::new();
    decoder.read_to_end(&mut decompressed)?;
    Ok(Bytes::from(decompressed))
}

fn response_4xx(code: StatusCode) -> Result<Response<Full<Bytes>>, hyper::Error> {
    Ok(Response::builder()
        .status(code)
        .body(Full::new(Bytes::default()))
        .unwrap())
}

fn compute_ok_resp<T: prost::Message + Serialize + Default>(
    as_json: bool,
) -> Result<Bytes, EncodeError> {
    // The success response carries no partial-failure details, so this is
    // an empty message in either encoding.
    let resp = T::default();

    let ret_buf = match as_json {
        true => serde_json::to_vec(&resp).unwrap_or_default(),
        false => {
            let mut buf = Vec::with_capacity(resp.encoded_len());
            resp.encode(&mut buf)?;
            buf
        }
    };

    Ok(ret_buf.into())
}

#[cfg(test)]
mod tests {
    use crate::receivers::otlp_http::{
        build_service, OTLPService, ValidateOTLPContentType, JSON_CT, MAX_BODY_SIZE, PROTOBUF_CT,
    };
    use crate::telemetry::store::TelemetryStore;
    use crate::telemetry::SystemClock;
    use bytes::Bytes;
    use flate2::read::GzEncoder;
    use flate2::Compression as GZCompression;
    use http::header::{CONTENT_ENCODING, CONTENT_TYPE};
    use http::{Method, Request, StatusCode};
    use http_body_util::Full;
    use hyper::service::Service;
    use hyper_util::service::TowerToHyperService;
    use prost::Message;
    use std::io::Read;
    use std::sync::Arc;
    use tokio_test::assert_ok;
    use tower_http::compression::Compression;
    use tower_http::limit::RequestBodyLimit;
    use tower_http::trace::{HttpMakeClassifier, Trace};
    use tower_http::validate_request::ValidateRequestHeader;

    extern crate utilities;
    use utilities::otlp::FakeOTLP;

    fn new_svc() -> (
        TowerToHyperService<
            Trace<
                RequestBodyLimit<
                    Compression<ValidateRequestHeader<OTLPService, ValidateOTLPContentType>>,
                >,
                HttpMakeClassifier,
            >,
        >,
        Arc<TelemetryStore>,
    ) {
        let store = Arc::new(TelemetryStore::new(Arc::new(SystemClock)));
        let svc = TowerToHyperService::new(build_service(store.clone()));
        (svc, store)
    }

    #[tokio::test]
    async fn invalid_requests() {
        let (svc, _) = new_svc();

        // Bad path
        let req: Request<Full<Bytes>> = Request::builder()
            .uri("/")
            .method(Method::POST)
            .body(Full::<Bytes>::default())
            .unwrap();
        let resp = svc.call(req).await.unwrap();
        assert_eq!(StatusCode::NOT_FOUND, resp.status());

        // Wrong method
        let req: Request<Full<Bytes>> = Request::builder()
            .uri("/v1/traces")
            .method(Method::GET)
            .body(Full::<Bytes>::default())
            .unwrap();
        let resp = svc.call(req).await.unwrap();
        assert_eq!(StatusCode::NOT_FOUND, resp.status());

        // Invalid content type
        let req: Request<Full<Bytes>> = Request::builder()
            .uri("/v1/traces")
            .method(Method::POST)
            .header(CONTENT_TYPE, "text/plain")
            .body(Full::<Bytes>::default())
            .unwrap();
        let resp = svc.call(req).await.unwrap();
        assert_eq!(StatusCode::BAD_REQUEST, resp.status());
    }

    #[tokio::test]
    async fn size_limits() {
        let (svc, _) = new_svc();

        let buf = Bytes::from(vec![0; MAX_BODY_SIZE + 1]);

        // Content too long
        let req: Request<Full<Bytes>> = Request::builder()
            .uri("/v1/traces")
            .method(Method::POST)
            .header(CONTENT_TYPE, PROTOBUF_CT)
            .body(Full::new(buf))
            .unwrap();
        let resp = svc.call(req).await.unwrap();
        assert_eq!(StatusCode::PAYLOAD_TOO_LARGE, resp.status());

        // Inflated content too long
        let large_vec = vec![0; MAX_BODY_SIZE + 1];
        let mut gz_vec = Vec::new();
        let mut gz = GzEncoder::new(&large_vec[..], GZCompression::fast());
        gz.read_to_end(&mut gz_vec).unwrap();

        let buf = Bytes::from(gz_vec);
        assert!(buf.len() < MAX_BODY_SIZE);

        let req: Request<Full<Bytes>> = Request::builder()
            .uri("/v1/traces")
            .method(Method::POST)
            .header(CONTENT_TYPE, PROTOBUF_CT)
            .header(CONTENT_ENCODING, "gzip")
            .body(Full::new(buf))
            .unwrap();
        let resp = svc.call(req).await.unwrap();
        assert_eq!(StatusCode::PAYLOAD_TOO_LARGE, resp.status());
    }

    #[tokio::test]
    async fn valid_trace_posts() {
        let (svc, store) = new_svc();

        let trace_req = FakeOTLP::trace_service_request();
        let mut buf = Vec::with_capacity(trace_req.encoded_len());
        assert_ok!(trace_req.encode(&mut buf));

        let req: Request<Full<Bytes>> = Request::builder()
            .uri("/v1/traces")
            .method(Method::POST)
            .header(CONTENT_TYPE, PROTOBUF_CT)
            .body(Full::new(Bytes::from(buf)))
            .unwrap();
        let resp = svc.call(req).await.unwrap();
        assert_eq!(StatusCode::OK, resp.status());
        assert_eq!(PROTOBUF_CT, resp.headers().get(CONTENT_TYPE).unwrap());

        assert_eq!(1, store.read().spans().len());
    }

    #[tokio::test]
    async fn valid_trace_posts_json() {
        let (svc, store) = new_svc();

        let trace_req = FakeOTLP::trace_service_request();
        let buf = serde_json::to_vec(&trace_req).unwrap();

        let req: Request<Full<Bytes>> = Request::builder()
            .uri("/v1/traces")
            .method(Method::POST)
            .header(CONTENT_TYPE, JSON_CT)
            .body(Full::new(Bytes::from(buf)))
            .unwrap();
        let resp = svc.call(req).await.unwrap();
        assert_eq!(StatusCode::OK, resp.status());
        assert_eq!(JSON_CT, resp.headers().get(CONTENT_TYPE).unwrap());

        assert_eq!(1, store.read().spans().len());
    }

    #[tokio::test]
    async fn valid_metrics_posts() {
        let (svc, store) = new_svc();

        let metrics_req = FakeOTLP::metrics_service_request();
        let mut buf = Vec::with_capacity(metrics_req.encoded_len());
        assert_ok!(metrics_req.encode(&mut buf));

        let req: Request<Full<Bytes>> = Request::builder()
            .uri("/v1/metrics")
            .method(Method::POST)
            .header(CONTENT_TYPE, PROTOBUF_CT)
            .body(Full::new(Bytes::from(buf)))
            .unwrap();
        let resp = svc.call(req).await.unwrap();
        assert_eq!(StatusCode::OK, resp.status());

        let state = store.read();
        assert_eq!(1, state.metrics().len());
        assert_eq!("test-service", state.metrics()[0].service_name);
    }

    #[tokio::test]
    async fn valid_logs_posts() {
        let (svc, store) = new_svc();

        let logs_req = FakeOTLP::logs_service_request();
        let mut buf = Vec::with_capacity(logs_req.encoded_len());
        assert_ok!(logs_req.encode(&mut buf));

        let req: Request<Full<Bytes>> = Request::builder()
            .uri("/v1/logs")
            .method(Method::POST)
            .header(CONTENT_TYPE, PROTOBUF_CT)
            .body(Full::new(Bytes::from(buf)))
            .unwrap();
        let resp = svc.call(req).await.unwrap();
        assert_eq!(StatusCode::OK, resp.status());

        assert_eq!(1, store.read().logs().len());
    }

    #[tokio::test]
    async fn gzip_bodies_are_inflated() {
        let (svc, store) = new_svc();

        let trace_req = FakeOTLP::trace_service_request();
        let mut buf = Vec::with_capacity(trace_req.encoded_len());
        assert_ok!(trace_req.encode(&mut buf));

        let mut gz_vec = Vec::new();
        let mut gz = GzEncoder::new(&buf[..], GZCompression::fast());
        gz.read_to_end(&mut gz_vec).unwrap();

        let req: Request<Full<Bytes>> = Request::builder()
            .uri("/v1/traces")
            .method(Method::POST)
            .header(CONTENT_TYPE, PROTOBUF_CT)
            .header(CONTENT_ENCODING, "gzip")
            .body(Full::new(Bytes::from(gz_vec)))
            .unwrap();
        let resp = svc.call(req).await.unwrap();
        assert_eq!(StatusCode::OK, resp.status());

        assert_eq!(1, store.read().spans().len());
    }

    #[tokio::test]
    async fn malformed_protobuf_rejected() {
        let (svc, store) = new_svc();

        let req: Request<Full<Bytes>> = Request::builder()
            .uri("/v1/traces")
            .method(Method::POST)
            .header(CONTENT_TYPE, PROTOBUF_CT)
            .body(Full::new(Bytes::from_static(&[0xff, 0xff, 0xff])))
            .unwrap();
        let resp = svc.call(req).await.unwrap();
        assert_eq!(StatusCode::BAD_REQUEST, resp.status());
        assert!(store.read().spans().is_empty());
    }
}
