//! Reconcile counters and the `/metrics` endpoint.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use std::convert::Infallible;

use hyper::header::{CONTENT_TYPE, HeaderValue};
use hyper::server::conn::AddrIncoming;
use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Method, Request, Response, Server, StatusCode};
use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounterVec, Opts, Registry, TEXT_FORMAT, TextEncoder,
};
use tracing::{info, warn};

use crate::error::Error;

pub const RESULT_SUCCESS: &str = "success";
pub const RESULT_ERROR: &str = "error";

#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    reconciles: IntCounterVec,
    duration: Histogram,
}

impl Metrics {
    pub fn new() -> Result<Self, Error> {
        let registry = Registry::new();

        let reconciles = IntCounterVec::new(
            Opts::new(
                "mlflow_operator_reconcile_total",
                "Reconcile passes by result",
            ),
            &["result"],
        )?;
        let duration = Histogram::with_opts(HistogramOpts::new(
            "mlflow_operator_reconcile_duration_seconds",
            "Wall time of one reconcile pass",
        ))?;

        registry.register(Box::new(reconciles.clone()))?;
        registry.register(Box::new(duration.clone()))?;

        Ok(Self {
            registry,
            reconciles,
            duration,
        })
    }

    pub fn observe(&self, result: &str, elapsed: Duration) {
        self.reconciles.with_label_values(&[result]).inc();
        self.duration.observe(elapsed.as_secs_f64());
    }

    /// Text exposition of everything registered.
    pub fn render(&self) -> Result<String, Error> {
        let mut buf = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buf)?;
        Ok(String::from_utf8_lossy(&buf).into_owned())
    }
}

/// Serve `GET /metrics` until the process exits.
pub async fn serve(addr: SocketAddr, metrics: Arc<Metrics>) -> Result<(), Error> {
    let incoming = AddrIncoming::bind(&addr)?;
    info!(address = %incoming.local_addr(), "metrics server listening");
    serve_on(incoming, metrics).await
}

async fn serve_on(incoming: AddrIncoming, metrics: Arc<Metrics>) -> Result<(), Error> {
    let make_svc = make_service_fn(move |_| {
        let metrics = metrics.clone();
        async move {
            Ok::<_, Infallible>(service_fn(move |req: Request<Body>| {
                let metrics = metrics.clone();
                async move { Ok::<_, Infallible>(handle(&req, &metrics)) }
            }))
        }
    });

    Server::builder(incoming).serve(make_svc).await?;
    Ok(())
}

fn handle(req: &Request<Body>, metrics: &Metrics) -> Response<Body> {
    if req.method() != Method::GET || req.uri().path() != "/metrics" {
        return plain(StatusCode::NOT_FOUND, "not found\n".into());
    }
    match metrics.render() {
        Ok(body) => {
            let mut response = Response::new(Body::from(body));
            response
                .headers_mut()
                .insert(CONTENT_TYPE, HeaderValue::from_static(TEXT_FORMAT));
            response
        }
        Err(e) => {
            warn!(error = %e, "failed to encode metrics");
            plain(StatusCode::INTERNAL_SERVER_ERROR, format!("{e}\n"))
        }
    }
}

fn plain(status: StatusCode, body: String) -> Response<Body> {
    let mut response = Response::new(Body::from(body));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("text/plain"));
    response
}
