//! Access to Kubernetes `Service` objects.
//!
//! The resolver only needs three lookups from the cluster, captured by the
//! [`ServiceRegistry`] trait. [`KubeRegistry`] implements them against the
//! Kubernetes API server; tests substitute a mock.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Service, ServicePort};
use kube::api::ListParams;
use kube::{Api, Client};

#[cfg(test)]
use mockall::automock;

use crate::Result;

/// A service port as declared in the service spec.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PortEntry {
    /// The port name, required by Kubernetes only when a service has several ports.
    pub name: Option<String>,
    /// The port number exposed by the service.
    pub port: i32,
}

impl PortEntry {
    /// Creates a port entry.
    #[must_use]
    pub fn new(name: Option<&str>, port: i32) -> Self {
        Self {
            name: name.map(String::from),
            port,
        }
    }
}

impl From<&ServicePort> for PortEntry {
    fn from(port: &ServicePort) -> Self {
        Self {
            name: port.name.clone(),
            port: port.port,
        }
    }
}

/// The parts of a Kubernetes `Service` needed for resolution.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServiceObject {
    /// The service name.
    pub name: String,
    /// The namespace the service lives in; blank means `default`.
    pub namespace: Option<String>,
    /// Declared ports, in spec order.
    pub ports: Vec<PortEntry>,
}

impl ServiceObject {
    /// Creates a service object.
    #[must_use]
    pub fn new(name: impl Into<String>, namespace: Option<&str>, ports: Vec<PortEntry>) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.map(String::from),
            ports,
        }
    }
}

impl From<&Service> for ServiceObject {
    fn from(service: &Service) -> Self {
        let ports = service
            .spec
            .as_ref()
            .and_then(|spec| spec.ports.as_ref())
            .map(|ports| ports.iter().map(PortEntry::from).collect())
            .unwrap_or_default();

        Self {
            name: service.metadata.name.clone().unwrap_or_default(),
            namespace: service.metadata.namespace.clone(),
            ports,
        }
    }
}

/// Lookups against the cluster's service registry.
///
/// Implementations must not swallow failures: communication and authorization
/// errors are returned as-is so the caller can decide what to do with them.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ServiceRegistry: Send + Sync {
    /// Fetches a service by name from the client's default namespace.
    ///
    /// # Errors
    ///
    /// Returns an error if the API request fails.
    async fn get_service(&self, name: &str) -> Result<Option<ServiceObject>>;

    /// Fetches a service by name from the given namespace.
    ///
    /// # Errors
    ///
    /// Returns an error if the API request fails.
    async fn get_namespaced_service(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<ServiceObject>>;

    /// Lists every service in every namespace.
    ///
    /// # Errors
    ///
    /// Returns an error if the API request fails.
    async fn list_all_services(&self) -> Result<Vec<ServiceObject>>;
}

/// [`ServiceRegistry`] backed by the Kubernetes API server.
///
/// # Requirements
///
/// - RBAC permission to `get` services in the target namespace
/// - RBAC permission to `list` services cluster-wide when searching all namespaces
#[derive(Clone)]
pub struct KubeRegistry {
    client: Client,
}

impl KubeRegistry {
    /// Wraps an existing kube client.
    #[must_use]
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Creates a registry using the in-cluster configuration or local kubeconfig.
    ///
    /// # Errors
    ///
    /// Returns an error if no usable client configuration can be found.
    pub async fn try_default() -> Result<Self> {
        let client = Client::try_default().await?;
        Ok(Self::new(client))
    }
}

#[async_trait]
impl ServiceRegistry for KubeRegistry {
    async fn get_service(&self, name: &str) -> Result<Option<ServiceObject>> {
        let services: Api<Service> = Api::default_namespaced(self.client.clone());
        let service = services.get_opt(name).await?;
        Ok(service.as_ref().map(ServiceObject::from))
    }

    async fn get_namespaced_service(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<ServiceObject>> {
        let services: Api<Service> = Api::namespaced(self.client.clone(), namespace);
        let service = services.get_opt(name).await?;
        Ok(service.as_ref().map(ServiceObject::from))
    }

    async fn list_all_services(&self) -> Result<Vec<ServiceObject>> {
        let services: Api<Service> = Api::all(self.client.clone());
        let list = services.list(&ListParams::default()).await?;
        Ok(list.items.iter().map(ServiceObject::from).collect())
    }
}
