//! Example that resolves a Kubernetes service and keeps a balance channel updated.
//!
//! The program resolves the service once and prints the result, then hands the
//! resolver to `discover` and keeps running so refreshes show up in the logs.
//!
//! # Running in Kubernetes
//!
//! The program expects to run inside a Kubernetes cluster (or with a local
//! kubeconfig) with permission to get services, and to list them cluster-wide
//! when `ALL_NAMESPACES` is set.
//!
//! # Environment Variables
//!
//! - `SERVICE_NAME`: Kubernetes service name (default: greeter-server)
//! - `SERVICE_NAMESPACE`: Kubernetes namespace (default: uses pod's namespace)
//! - `SERVICE_PORT_NAME`: Port name hint for multi-port services (default: none)
//! - `CLUSTER_DOMAIN`: Cluster DNS domain (default: cluster.local)
//! - `ALL_NAMESPACES`: Search every namespace when not found (default: false)
//! - `REFRESH_INTERVAL_SECS`: Seconds between refreshes (default: 30)

use std::env;
use std::time::Duration;

use tonic::transport::{Channel, Endpoint};
use tonic_lb_k8s_services::{
    KubeRegistry, Resolution, ResolutionSettings, ResolvedServer, Resolver, ServiceRef, discover,
};
use tracing::{Level, error, info, warn};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(Level::INFO.into()),
        )
        .init();

    // Read configuration from environment
    let service_name = env::var("SERVICE_NAME").unwrap_or_else(|_| "greeter-server".to_string());
    let service_namespace = env::var("SERVICE_NAMESPACE").ok();
    let port_name = env::var("SERVICE_PORT_NAME").ok();
    let cluster_domain =
        env::var("CLUSTER_DOMAIN").unwrap_or_else(|_| "cluster.local".to_string());
    let all_namespaces: bool = env::var("ALL_NAMESPACES")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(false);
    let refresh_interval_secs: u64 = env::var("REFRESH_INTERVAL_SECS")
        .ok()
        .and_then(|i| i.parse().ok())
        .unwrap_or(30);

    info!("Service: {service_name}");
    if let Some(ref ns) = service_namespace {
        info!("Namespace: {ns}");
    }

    info!("All namespaces: {all_namespaces}");
    info!("Refresh interval: {refresh_interval_secs}s");

    let mut service = ServiceRef::new(&service_name);
    if let Some(ns) = service_namespace {
        service = service.namespace(ns);
    }

    if let Some(name) = port_name {
        service = service.port_name(name);
    }

    let settings = ResolutionSettings::default()
        .cluster_domain(cluster_domain)
        .all_namespaces(all_namespaces)
        .refresh_interval(Duration::from_secs(refresh_interval_secs));

    let registry = KubeRegistry::try_default().await?;
    let resolver = Resolver::new(registry, service, settings);

    match resolver.get_updated_list_of_servers().await? {
        Resolution::Resolved(servers) => {
            for server in &servers {
                info!("Resolved server: {server}");
            }
        }

        Resolution::Empty => warn!("No servers found for {service_name}"),
        Resolution::Ambiguous => error!("Service {service_name} exists in several namespaces"),
    }

    // Create a balance channel and keep it updated
    let (_channel, tx) = Channel::balance_channel::<ResolvedServer>(1024);
    let handle = discover(resolver, tx, |server| {
        Endpoint::from_shared(format!("http://{server}"))
            .expect("valid endpoint URI")
            .connect_timeout(Duration::from_secs(5))
    });

    handle.await?;
    Ok(())
}
