//! Armada federated informer - watches one resource type across every ready member cluster

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use kube::api::DynamicObject;
use kube::{CustomResourceExt, ResourceExt};
use tracing::{debug, info};

use armada_common::crd::FederatedCluster;
use armada_common::kube_utils::{build_api_resource, create_client_with_timeout};
use armada_common::telemetry::{init_telemetry, TelemetryConfig};
use armada_informer::{
    key_for, managed_resource_factory, ClusterLifecycleHandlers, FederatedInformer,
    FederatedInformerParts, InformerConfig, KubeClientFactory, KubeClusterWatch,
    SecretConfigFactory, TriggerFn,
};

/// Armada federated informer
#[derive(Parser, Debug)]
#[command(name = "armada-informer", version, about, long_about = None)]
struct Cli {
    /// Print the FederatedCluster CRD and exit
    #[arg(long)]
    crd: bool,

    /// Kubeconfig for the federation host cluster (inferred if unset)
    #[arg(long, env = "KUBECONFIG")]
    kubeconfig: Option<PathBuf>,

    /// apiVersion of the resource to watch in member clusters
    #[arg(long, default_value = "v1")]
    api_version: String,

    /// Kind of the resource to watch in member clusters
    #[arg(long, default_value = "ConfigMap")]
    kind: String,

    /// Only watch this namespace in member clusters
    #[arg(long)]
    target_namespace: Option<String>,

    /// Namespace holding member credential secrets
    #[arg(long)]
    fed_system_namespace: Option<String>,

    /// Emit JSON logs
    #[arg(long)]
    json_logs: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if cli.crd {
        let crd = serde_yaml::to_string(&FederatedCluster::crd())
            .map_err(|e| anyhow::anyhow!("Failed to serialize CRD: {}", e))?;
        println!("{crd}");
        return Ok(());
    }

    let defaults = TelemetryConfig::default();
    init_telemetry(TelemetryConfig {
        service_name: "armada-informer".to_string(),
        json: cli.json_logs || defaults.json,
    })?;

    let mut config = InformerConfig::from_env();
    if let Some(ns) = cli.fed_system_namespace {
        config.fed_system_namespace = ns;
    }
    if cli.target_namespace.is_some() {
        config.target_namespace = cli.target_namespace;
    }

    let client = create_client_with_timeout(
        cli.kubeconfig.as_deref(),
        config.connect_timeout,
        config.read_timeout,
    )
    .await?;

    let api_resource = build_api_resource(&cli.api_version, &cli.kind);
    info!(
        api_version = %cli.api_version,
        kind = %cli.kind,
        target_namespace = ?config.target_namespace,
        fed_system_namespace = %config.fed_system_namespace,
        "Starting federated informer"
    );

    let trigger: TriggerFn<DynamicObject> = Arc::new(|obj: &DynamicObject| {
        debug!(object = %key_for(obj), "Member object changed");
    });
    let lifecycle = ClusterLifecycleHandlers::new()
        .with_available(|cluster: &FederatedCluster| {
            info!(cluster = %cluster.name_any(), "Cluster available");
        })
        .with_unavailable(|cluster: &FederatedCluster, objects: Vec<Arc<DynamicObject>>| {
            info!(cluster = %cluster.name_any(), count = objects.len(), "Cluster unavailable");
        });

    let informer = FederatedInformer::new(FederatedInformerParts {
        registry: Arc::new(KubeClusterWatch::new(client.clone(), config.cluster_sync_period)),
        config_factory: Arc::new(SecretConfigFactory::new(client, &config)),
        client_factory: Arc::new(KubeClientFactory),
        target_factory: managed_resource_factory(
            api_resource,
            config.target_namespace.clone(),
            trigger,
        ),
        lifecycle,
    });

    informer.start();
    tokio::signal::ctrl_c().await?;
    info!("Shutting down");
    informer.stop().await;
    Ok(())
}
