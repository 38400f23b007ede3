//! Prometheus metrics server, gated behind the `metrics` feature
//! (`default = ["metrics"]`). Registers per-controller reconcile counters
//! plus cluster/topology/workerpool gauges and serves them over a plain
//! `hyper` HTTP server rather than pulling in a web framework.

use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Request, Response, Server};
use prometheus::{Encoder, HistogramVec, IntCounterVec, IntGaugeVec, Registry, TextEncoder};
use std::convert::Infallible;
use std::net::SocketAddr;

/// Per-controller reconcile/action counters and timers, one instance per
/// resource kind (cluster/topology/workerpool), held on each controller's
/// `ContextData`.
pub struct ControllerMetrics {
    pub reconcile_counter: IntCounterVec,
    pub action_counter: IntCounterVec,
    pub read_histogram: HistogramVec,
    pub write_histogram: HistogramVec,
}

impl ControllerMetrics {
    pub fn new(kind: &str) -> Self {
        let reconcile_counter = IntCounterVec::new(
            prometheus::Opts::new(
                format!("stormop_{kind}_reconcile_total"),
                "Total number of reconciles for this resource kind",
            ),
            &["name", "namespace"],
        )
        .unwrap();
        let action_counter = IntCounterVec::new(
            prometheus::Opts::new(
                format!("stormop_{kind}_action_total"),
                "Total number of actions dispatched, by action name",
            ),
            &["name", "namespace", "action"],
        )
        .unwrap();
        let read_histogram = HistogramVec::new(
            prometheus::HistogramOpts::new(
                format!("stormop_{kind}_read_seconds"),
                "Time spent determining the next action",
            ),
            &["name", "namespace", "action"],
        )
        .unwrap();
        let write_histogram = HistogramVec::new(
            prometheus::HistogramOpts::new(
                format!("stormop_{kind}_write_seconds"),
                "Time spent performing the dispatched action",
            ),
            &["name", "namespace", "action"],
        )
        .unwrap();

        let registry = REGISTRY.clone();
        registry
            .register(Box::new(reconcile_counter.clone()))
            .ok();
        registry.register(Box::new(action_counter.clone())).ok();
        registry.register(Box::new(read_histogram.clone())).ok();
        registry.register(Box::new(write_histogram.clone())).ok();

        Self {
            reconcile_counter,
            action_counter,
            read_histogram,
            write_histogram,
        }
    }
}

lazy_static::lazy_static! {
    static ref REGISTRY: Registry = Registry::new();
    /// Storm-cluster-level gauges, distinct from per-reconcile counters:
    /// these reflect the latest observed state, not an event count.
    pub static ref SUPERVISOR_COUNT: IntGaugeVec = {
        let g = IntGaugeVec::new(
            prometheus::Opts::new("stormop_supervisor_count", "Observed supervisor count"),
            &["cluster", "namespace"],
        ).unwrap();
        REGISTRY.register(Box::new(g.clone())).ok();
        g
    };
    pub static ref SLOTS: IntGaugeVec = {
        let g = IntGaugeVec::new(
            prometheus::Opts::new("stormop_slots", "Worker slots by state"),
            &["cluster", "namespace", "state"],
        ).unwrap();
        REGISTRY.register(Box::new(g.clone())).ok();
        g
    };
    pub static ref TOPOLOGY_SUBMISSIONS: IntCounterVec = {
        let c = IntCounterVec::new(
            prometheus::Opts::new("stormop_topology_submissions_total", "Topology submission outcomes"),
            &["topology", "namespace", "result"],
        ).unwrap();
        REGISTRY.register(Box::new(c.clone())).ok();
        c
    };
    pub static ref TOPOLOGY_DELETIONS: IntCounterVec = {
        let c = IntCounterVec::new(
            prometheus::Opts::new("stormop_topology_deletions_total", "Topology deletions"),
            &["topology", "namespace"],
        ).unwrap();
        REGISTRY.register(Box::new(c.clone())).ok();
        c
    };
    pub static ref WORKERPOOL_REPLICAS: IntGaugeVec = {
        let g = IntGaugeVec::new(
            prometheus::Opts::new("stormop_workerpool_replicas", "WorkerPool replica counts by state"),
            &["workerpool", "namespace", "state"],
        ).unwrap();
        REGISTRY.register(Box::new(g.clone())).ok();
        g
    };
}

async fn serve_metrics(_req: Request<Body>) -> Result<Response<Body>, Infallible> {
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    let encoder = TextEncoder::new();
    encoder.encode(&metric_families, &mut buffer).unwrap();
    Ok(Response::new(Body::from(buffer)))
}

/// Runs the `/metrics` HTTP server until the process exits. Intended to be
/// `tokio::spawn`ed from `main` alongside the resource controllers.
pub async fn run_server(port: u16) {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let make_svc =
        make_service_fn(|_conn| async { Ok::<_, Infallible>(service_fn(serve_metrics)) });
    if let Err(err) = Server::bind(&addr).serve(make_svc).await {
        eprintln!("metrics server error: {err}");
    }
}
