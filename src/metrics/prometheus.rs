//! Prometheus metrics definitions and HTTP server

use std::net::SocketAddr;

use http_body_util::Full;
use hyper::body::Bytes;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use prometheus::{
    register_counter_vec, register_gauge, register_histogram_vec, CounterVec, Encoder, Gauge,
    HistogramVec, TextEncoder,
};
use tokio::net::TcpListener;
use tracing::{error, info};

lazy_static::lazy_static! {
    /// Lifecycle events dispatched to handlers
    pub static ref EVENTS: CounterVec = register_counter_vec!(
        "entity_operator_events_total",
        "Total number of lifecycle events dispatched to handlers",
        &["operator", "action"]
    ).unwrap();

    /// Handler invocations that returned an error
    pub static ref HANDLER_ERRORS: CounterVec = register_counter_vec!(
        "entity_operator_handler_errors_total",
        "Total number of failed handler invocations",
        &["operator", "action"]
    ).unwrap();

    /// Resources that could not be converted into entities
    pub static ref CONVERSION_FAILURES: CounterVec = register_counter_vec!(
        "entity_operator_conversion_failures_total",
        "Total number of resources skipped because conversion failed",
        &["operator"]
    ).unwrap();

    /// Full reconciliation runs
    pub static ref FULL_RECONCILIATIONS: CounterVec = register_counter_vec!(
        "entity_operator_full_reconciliations_total",
        "Total number of full reconciliations",
        &["operator"]
    ).unwrap();

    /// Full reconciliation duration histogram
    pub static ref FULL_RECONCILIATION_DURATION: HistogramVec = register_histogram_vec!(
        "entity_operator_full_reconciliation_duration_seconds",
        "Duration of full reconciliations in seconds",
        &["operator"],
        vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]
    ).unwrap();

    /// Operators with an active watch
    pub static ref RUNNING_OPERATORS: Gauge = register_gauge!(
        "entity_operator_running_operators",
        "Number of operators with an active watch"
    ).unwrap();

    /// Operator health (1 = healthy, 0 = unhealthy)
    pub static ref OPERATOR_HEALTH: Gauge = register_gauge!(
        "entity_operator_health",
        "Operator health status (1 = healthy, 0 = unhealthy)"
    ).unwrap();
}

/// Start the metrics HTTP server
pub async fn serve(port: u16) -> anyhow::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr).await?;
    info!("Metrics server listening on {}", addr);

    OPERATOR_HEALTH.set(1.0);

    loop {
        let (stream, _) = listener.accept().await?;
        let io = TokioIo::new(stream);

        tokio::spawn(async move {
            if let Err(e) = http1::Builder::new()
                .serve_connection(io, service_fn(handle_request))
                .await
            {
                error!("Error serving connection: {}", e);
            }
        });
    }
}

async fn handle_request(
    req: Request<hyper::body::Incoming>,
) -> Result<Response<Full<Bytes>>, hyper::Error> {
    Ok(route(req.uri().path()))
}

fn route(path: &str) -> Response<Full<Bytes>> {
    match path {
        "/metrics" => metrics_response(),
        "/healthz" | "/health" => health_response(),
        "/readyz" | "/ready" => ready_response(),
        _ => text_response(StatusCode::NOT_FOUND, "Not Found"),
    }
}

fn metrics_response() -> Response<Full<Bytes>> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        error!("Failed to encode metrics: {}", e);
        return text_response(StatusCode::INTERNAL_SERVER_ERROR, "Failed to encode metrics");
    }

    let mut response = Response::new(Full::new(Bytes::from(buffer)));
    if let Ok(content_type) = encoder.format_type().parse() {
        response
            .headers_mut()
            .insert(hyper::header::CONTENT_TYPE, content_type);
    }
    response
}

fn health_response() -> Response<Full<Bytes>> {
    if OPERATOR_HEALTH.get() > 0.0 {
        text_response(StatusCode::OK, "ok")
    } else {
        text_response(StatusCode::SERVICE_UNAVAILABLE, "unhealthy")
    }
}

/// Ready once at least one operator is watching
fn ready_response() -> Response<Full<Bytes>> {
    if RUNNING_OPERATORS.get() > 0.0 {
        text_response(StatusCode::OK, "ok")
    } else {
        text_response(StatusCode::SERVICE_UNAVAILABLE, "no running operators")
    }
}

fn text_response(status: StatusCode, body: &'static str) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from_static(body.as_bytes())));
    *response.status_mut() = status;
    response
}
