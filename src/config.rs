//! Configuration for Kubernetes Service resolution.

use std::time::Duration;

/// Default Kubernetes cluster DNS domain.
pub const DEFAULT_CLUSTER_DOMAIN: &str = "cluster.local";

/// Default interval between server list refreshes.
pub const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_secs(30);

/// Identifies the Kubernetes service to resolve.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServiceRef {
    /// The Kubernetes service name.
    pub service_id: String,

    /// The Kubernetes namespace where the service is deployed.
    /// If `None` or blank, uses the current namespace from the kube client.
    pub namespace: Option<String>,

    /// Hint used to pick ports when the service exposes more than one.
    pub port_name: Option<String>,
}

impl ServiceRef {
    /// Creates a reference to a service in the client's default namespace.
    #[must_use]
    pub fn new(service_id: impl Into<String>) -> Self {
        Self {
            service_id: service_id.into(),
            namespace: None,
            port_name: None,
        }
    }

    /// Sets an explicit namespace for the service.
    #[must_use]
    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    /// Sets the port name hint.
    #[must_use]
    pub fn port_name(mut self, port_name: impl Into<String>) -> Self {
        self.port_name = Some(port_name.into());
        self
    }

    /// Returns the namespace if one was given and it is not blank.
    #[must_use]
    pub fn scoped_namespace(&self) -> Option<&str> {
        non_blank(self.namespace.as_deref())
    }

    /// Returns the port name hint if one was given and it is not blank.
    #[must_use]
    pub fn port_hint(&self) -> Option<&str> {
        non_blank(self.port_name.as_deref())
    }
}

/// Settings shared by every resolution of a [`Resolver`](crate::Resolver).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResolutionSettings {
    /// DNS domain suffix used when building service host names.
    pub cluster_domain: String,

    /// Whether to search every namespace when the scoped lookup finds nothing.
    pub all_namespaces: bool,

    /// How often [`discover`](crate::discover) refreshes the server list.
    pub refresh_interval: Duration,
}

impl Default for ResolutionSettings {
    fn default() -> Self {
        Self {
            cluster_domain: DEFAULT_CLUSTER_DOMAIN.to_string(),
            all_namespaces: false,
            refresh_interval: DEFAULT_REFRESH_INTERVAL,
        }
    }
}

impl ResolutionSettings {
    /// Sets the cluster DNS domain.
    #[must_use]
    pub fn cluster_domain(mut self, cluster_domain: impl Into<String>) -> Self {
        self.cluster_domain = cluster_domain.into();
        self
    }

    /// Enables or disables the cross-namespace fallback search.
    #[must_use]
    pub fn all_namespaces(mut self, all_namespaces: bool) -> Self {
        self.all_namespaces = all_namespaces;
        self
    }

    /// Sets the refresh interval.
    #[must_use]
    pub fn refresh_interval(mut self, refresh_interval: Duration) -> Self {
        self.refresh_interval = refresh_interval;
        self
    }
}

pub(crate) fn non_blank(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn service_ref_new() {
        let service = ServiceRef::new("orders");

        assert_eq!(service.service_id, "orders");
        assert!(service.namespace.is_none());
        assert!(service.port_name.is_none());
    }

    #[test]
    fn service_ref_with_namespace_and_port_name() {
        let service = ServiceRef::new("orders").namespace("shop").port_name("grpc");

        assert_eq!(service.scoped_namespace(), Some("shop"));
        assert_eq!(service.port_hint(), Some("grpc"));
    }

    #[test]
    fn service_ref_blank_values_are_unscoped() {
        let service = ServiceRef::new("orders").namespace("  ").port_name("");

        assert_eq!(service.scoped_namespace(), None);
        assert_eq!(service.port_hint(), None);
    }

    #[test]
    fn settings_defaults() {
        let settings = ResolutionSettings::default();

        assert_eq!(settings.cluster_domain, "cluster.local");
        assert!(!settings.all_namespaces);
        assert_eq!(settings.refresh_interval, Duration::from_secs(30));
    }

    #[test]
    fn settings_builder() {
        let settings = ResolutionSettings::default()
            .cluster_domain("corp.internal")
            .all_namespaces(true)
            .refresh_interval(Duration::from_secs(5));

        assert_eq!(settings.cluster_domain, "corp.internal");
        assert!(settings.all_namespaces);
        assert_eq!(settings.refresh_interval, Duration::from_secs(5));
    }
}
