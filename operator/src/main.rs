use clap::Parser;
use kube::client::Client;
use std::sync::Arc;

mod clusters;
mod config;
mod coordinator;
mod jar;
mod kernel;
mod storm;
mod topologies;
mod util;
mod workerpools;

use jar::JarCache;
use storm::ClientManager;

/// Top-level CLI configuration for the binary. Any command line
/// flags should go in here.
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Prometheus metrics server scrape port. Disabled by default.
    #[cfg(feature = "metrics")]
    #[arg(long, env = "METRICS_PORT")]
    metrics_port: Option<u16>,

    /// Directory used as the content-addressed JAR cache.
    #[arg(long, env = "JAR_CACHE_DIR", default_value = "/var/lib/storm-operator/jars")]
    jar_cache_dir: String,

    /// `storm` CLI binary invoked for topology submission.
    #[arg(long, env = "STORM_BINARY", default_value = "storm")]
    storm_binary: String,
}

/// Secondary entrypoint that runs every reconciler concurrently. Each
/// controller fleet runs its own leader-election loop (see
/// `clusters::reconcile::run` etc.), so no further coordination is needed
/// here beyond sharing the `Client`, `ClientManager`, and `JarCache`.
async fn run(client: Client) {
    let cli = Cli::parse();

    #[cfg(feature = "metrics")]
    if let Some(metrics_port) = cli.metrics_port {
        tokio::spawn(util::metrics::run_server(metrics_port));
    }

    let storm_clients = Arc::new(ClientManager::default());
    let jar_cache = Arc::new(JarCache::new(cli.jar_cache_dir));

    stormop_common::signal_ready();

    let clusters = tokio::spawn(clusters::run(client.clone(), storm_clients.clone()));
    let topologies = tokio::spawn(topologies::run(
        client.clone(),
        storm_clients.clone(),
        jar_cache.clone(),
        cli.storm_binary.clone(),
    ));
    let workerpools = tokio::spawn(workerpools::run(client.clone()));

    let (clusters, topologies, workerpools) = tokio::join!(clusters, topologies, workerpools);
    clusters.unwrap().unwrap();
    topologies.unwrap().unwrap();
    workerpools.unwrap().unwrap();

    panic!("exited unexpectedly");
}

/// Main entrypoint that sets up the environment before running the secondary entrypoint `run`.
#[tokio::main]
async fn main() {
    stormop_common::init();

    // Set the panic hook to exit the process with a non-zero exit code
    // when a panic occurs on any thread. This is desired behavior when
    // running in a container, as the metrics server or controller may
    // panic and we always want to restart the container in that case.
    let default_panic = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        default_panic(info);
        std::process::exit(1);
    }));

    // Create a kubernetes client using the default configuration.
    // In-cluster, the kubeconfig will be set by the service account.
    let client: Client = Client::try_default()
        .await
        .expect("Expected a valid KUBECONFIG environment variable.");

    // Run the secondary entrypoint.
    run(client).await;

    // This is an unreachable branch. The controllers and metrics
    // servers should never exit without a panic.
    panic!("exited prematurely");
}
