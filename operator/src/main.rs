use std::net::SocketAddr;
use std::sync::Arc;

use clap::Parser;
use kube::{Client, CustomResourceExt};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use mlflow_operator::capabilities::Capabilities;
use mlflow_operator::client::{ClusterOps, KubeCluster};
use mlflow_operator::config::OperatorConfig;
use mlflow_operator::controller;
use mlflow_operator::crd::{MLflow, MLflowConfig};
use mlflow_operator::error::Error;
use mlflow_operator::metrics::{self, Metrics};
use mlflow_operator::reconcile::Ctx;
use mlflow_operator::render::Renderer;

#[derive(Parser, Debug)]
#[command(name = "mlflow-operator", version, about = "Kubernetes operator for MLflow")]
struct Cli {
    #[command(flatten)]
    config: OperatorConfig,

    /// Metrics server address
    #[arg(long, env = "METRICS_ADDR", default_value = "0.0.0.0:8080")]
    metrics_addr: SocketAddr,

    /// Print the CRDs as YAML and exit
    #[arg(long)]
    print_crd: bool,
}

fn print_crds() -> Result<(), serde_yaml::Error> {
    println!("{}", serde_yaml::to_string(&MLflow::crd())?);
    println!("---");
    println!("{}", serde_yaml::to_string(&MLflowConfig::crd())?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    if cli.print_crd {
        print_crds()?;
        return Ok(());
    }

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), namespace = %cli.config.namespace, "starting mlflow-operator");

    let client = Client::try_default().await.map_err(Error::Kube)?;
    let cluster = Arc::new(KubeCluster::new(client.clone(), cli.config.request_timeout()));

    let capabilities = Capabilities::detect(cluster.as_ref()).await?;

    let metrics = Arc::new(Metrics::new()?);
    let server = metrics.clone();
    let metrics_addr = cli.metrics_addr;
    tokio::spawn(async move {
        if let Err(e) = metrics::serve(metrics_addr, server).await {
            error!(error = %e, "metrics server failed");
        }
    });

    let cluster: Arc<dyn ClusterOps> = cluster;
    let ctx = Arc::new(Ctx::new(
        cluster,
        Renderer::new()?,
        cli.config,
        capabilities,
        metrics,
    ));

    controller::run(client, ctx).await;
    Ok(())
}
