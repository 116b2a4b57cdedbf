// SPDX-License-Identifier: Apache-2.0

use clap::Parser;
use otelscope::listener::Listener;
use otelscope::receivers::otlp_http::OTLPHttpServer;
use otelscope::server::QueryApiServer;
use otelscope::telemetry::store::TelemetryStore;
use otelscope::telemetry::SystemClock;
use std::collections::HashMap;
use std::error::Error;
use std::net::SocketAddr;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tokio::select;
use tokio::signal::unix::{signal, Signal, SignalKind};
use tokio::task::JoinSet;
use tokio::time::{timeout_at, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{EnvFilter, Registry};

#[derive(Debug, Parser)]
#[command(name = "otelscope")]
#[command(version)]
#[command(about = "In-process OpenTelemetry aggregation store with an HTTP query API", long_about = None)]
struct Arguments {
    /// OTLP HTTP ingest endpoint
    #[arg(long, env = "OTELSCOPE_OTLP_HTTP_ENDPOINT", default_value = "localhost:4318", value_parser = parse_endpoint)]
    otlp_http_endpoint: SocketAddr,

    /// Query API endpoint
    #[arg(long, env = "OTELSCOPE_API_ENDPOINT", default_value = "localhost:8787", value_parser = parse_endpoint)]
    api_endpoint: SocketAddr,

    /// Log level filter
    #[arg(long, env = "OTELSCOPE_LOG_LEVEL", default_value = "info")]
    log_level: String,
}

/// Parse an endpoint
fn parse_endpoint(s: &str) -> Result<SocketAddr, Box<dyn Error + Send + Sync + 'static>> {
    // Use actual localhost address instead of localhost name
    let s = if s.starts_with("localhost:") {
        s.replace("localhost:", "127.0.0.1:")
    } else {
        s.to_string()
    };
    let sa: SocketAddr = s.parse()?;
    Ok(sa)
}

fn main() -> ExitCode {
    let args = Arguments::parse();

    // Claim both ports before the runtime starts so a bind failure is
    // reported immediately.
    let port_map = match bind_endpoints(&[args.otlp_http_endpoint, args.api_endpoint]) {
        Ok(ports) => ports,
        Err(e) => {
            eprintln!("ERROR: {}", e);
            return ExitCode::from(1);
        }
    };

    setup_logging(&args.log_level);

    match run(args, port_map) {
        Ok(_) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = ?e, "Failed to run otelscope.");
            ExitCode::from(1)
        }
    }
}

fn bind_endpoints(
    endpoints: &[SocketAddr],
) -> Result<HashMap<SocketAddr, Listener>, Box<dyn Error + Send + Sync>> {
    endpoints
        .iter()
        .map(|endpoint| Ok((*endpoint, Listener::listen_std(*endpoint)?)))
        .collect()
}

fn setup_logging(log_level: &str) {
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_level(true)
        .compact();

    let subscriber = Registry::default()
        .with(EnvFilter::new(log_level))
        .with(fmt_layer);
    tracing::subscriber::set_global_default(subscriber).expect("unable to set logging subscriber");
}

#[tokio::main]
async fn run(
    args: Arguments,
    mut port_map: HashMap<SocketAddr, Listener>,
) -> Result<(), Box<dyn Error + Send + Sync>> {
    info!(
        otlp_http_endpoint = args.otlp_http_endpoint.to_string(),
        api_endpoint = args.api_endpoint.to_string(),
        "Starting otelscope.",
    );

    let store = Arc::new(TelemetryStore::new(Arc::new(SystemClock)));

    let mut task_set: JoinSet<Result<(), String>> = JoinSet::new();
    let server_cancel = CancellationToken::new();

    {
        let listener = port_map
            .remove(&args.otlp_http_endpoint)
            .ok_or("unable to find OTLP HTTP listener socket")?;
        let server = OTLPHttpServer::builder(store.clone()).build();
        let token = server_cancel.clone();
        task_set.spawn(async move {
            server
                .serve(listener, token)
                .await
                .map_err(|e| format!("OTLP HTTP server failed: {}", e))
        });
    }

    {
        let listener = port_map
            .remove(&args.api_endpoint)
            .ok_or("unable to find query API listener socket")?;
        let server = QueryApiServer::new(store.clone());
        let token = server_cancel.clone();
        task_set.spawn(async move {
            server
                .serve(listener, token)
                .await
                .map_err(|e| format!("query API server failed: {}", e))
        });
    }

    let mut result = Ok(());
    select! {
        _ = signal_wait() => {
            info!("Shutdown signal received.");
        },
        e = wait_for_any_task(&mut task_set) => {
            match e {
                Ok(()) => warn!("Unexpected early exit of server task."),
                Err(e) => result = Err(e),
            }
        },
    }

    server_cancel.cancel();

    let deadline = Instant::now() + Duration::from_secs(5);
    while let Ok(Some(res)) = timeout_at(deadline, task_set.join_next()).await {
        match res {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(error = %e, "Server task exited with error during shutdown."),
            Err(e) => error!("Failed to join with task: {:?}", e),
        }
        if task_set.is_empty() {
            break;
        }
    }

    result
}

async fn wait_for_any_task(
    tasks: &mut JoinSet<Result<(), String>>,
) -> Result<(), Box<dyn Error + Send + Sync>> {
    match tasks.join_next().await {
        None => Ok(()),
        Some(Ok(r)) => r.map_err(|e| e.into()),
        Some(Err(e)) => Err(e.into()),
    }
}

async fn signal_wait() {
    let mut sig_term = sig(SignalKind::terminate());
    let mut sig_int = sig(SignalKind::interrupt());

    select! {
        _ = sig_term.recv() => {},
        _ = sig_int.recv() => {},
    }
}

fn sig(kind: SignalKind) -> Signal {
    signal(kind).expect("unable to install signal handler")
}
