//! Kubernetes Service resolution.
//!
//! A [`Resolver`] turns a [`ServiceRef`] into the list of servers a load
//! balancer should route to. Every call performs fresh lookups against the
//! [`ServiceRegistry`]; nothing is cached between calls.
//!
//! # How It Works
//!
//! 1. Looks up the service by name, in the configured namespace if there is one
//! 2. When searching all namespaces and the lookup found nothing, lists every
//!    service and accepts a single match by name (several matches are ambiguous)
//! 3. Picks the service's port(s)
//! 4. Builds a `<name>.<namespace>.svc.<cluster-domain>` host for each port
//!
//! # Example
//!
//! ```ignore
//! use tonic_lb_k8s_services::{KubeRegistry, ResolutionSettings, Resolver, ServiceRef};
//!
//! let registry = KubeRegistry::try_default().await?;
//! let resolver = Resolver::new(
//!     registry,
//!     ServiceRef::new("orders").namespace("shop"),
//!     ResolutionSettings::default(),
//! );
//!
//! for server in resolver.resolve().await?.servers() {
//!     println!("{server}");
//! }
//! ```

use std::fmt;

use tracing::{Instrument, Span};

use crate::Result;
use crate::config::{ResolutionSettings, ServiceRef, non_blank};
use crate::registry::{PortEntry, ServiceObject, ServiceRegistry};

/// Namespace used in host names when a service has none.
const DEFAULT_NAMESPACE: &str = "default";

/// Scope reported when the lookup used the kube client's own namespace.
const CLIENT_DEFAULT_NAMESPACE: &str = "client default";

/// A connectable server derived from a service port.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResolvedServer {
    /// Fully qualified service host name.
    pub host: String,
    /// Service port number.
    pub port: u16,
}

impl ResolvedServer {
    /// Creates a resolved server.
    #[must_use]
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for ResolvedServer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Outcome of a resolution.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Resolution {
    /// At least one server was resolved.
    Resolved(Vec<ResolvedServer>),
    /// Several services share the name across namespaces; none was chosen.
    Ambiguous,
    /// No service matched, or the matching service had no usable ports.
    Empty,
}

impl Resolution {
    /// Returns the resolved servers, or an empty slice.
    #[must_use]
    pub fn servers(&self) -> &[ResolvedServer] {
        match self {
            Self::Resolved(servers) => servers,
            Self::Ambiguous | Self::Empty => &[],
        }
    }

    /// Consumes the resolution and returns its servers.
    #[must_use]
    pub fn into_servers(self) -> Vec<ResolvedServer> {
        match self {
            Self::Resolved(servers) => servers,
            Self::Ambiguous | Self::Empty => Vec::new(),
        }
    }

    /// Returns `true` if nothing matched.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        matches!(self, Self::Empty)
    }

    /// Returns `true` if the service name was not unique across namespaces.
    #[must_use]
    pub fn is_ambiguous(&self) -> bool {
        matches!(self, Self::Ambiguous)
    }
}

/// Resolves one Kubernetes service into a server list.
///
/// The resolver holds no mutable state, so concurrent calls to
/// [`resolve`](Self::resolve) are safe.
pub struct Resolver<R> {
    registry: R,
    service: ServiceRef,
    settings: ResolutionSettings,
    span: Span,
}

impl<R: ServiceRegistry> Resolver<R> {
    /// Creates a resolver for the given service.
    #[must_use]
    pub fn new(registry: R, service: ServiceRef, settings: ResolutionSettings) -> Self {
        let span = tracing::info_span!(
            "resolver",
            service = %service.service_id,
            namespace = ?service.scoped_namespace(),
            port_name = ?service.port_hint(),
        );

        Self {
            registry,
            service,
            settings,
            span,
        }
    }

    /// Returns the service this resolver looks up.
    #[must_use]
    pub fn service(&self) -> &ServiceRef {
        &self.service
    }

    /// Returns the resolution settings.
    #[must_use]
    pub fn settings(&self) -> &ResolutionSettings {
        &self.settings
    }

    /// Returns the current server list for the service.
    ///
    /// Equivalent to [`resolve`](Self::resolve); provided under the name load
    /// balancers poll.
    ///
    /// # Errors
    ///
    /// Returns any error raised by the registry.
    pub async fn get_updated_list_of_servers(&self) -> Result<Resolution> {
        self.resolve().await
    }

    /// Resolves the service against the registry's current state.
    ///
    /// # Errors
    ///
    /// Returns any error raised by the registry, unchanged.
    pub async fn resolve(&self) -> Result<Resolution> {
        self.resolve_inner().instrument(self.span.clone()).await
    }

    async fn resolve_inner(&self) -> Result<Resolution> {
        let name = self.service.service_id.as_str();
        let mut selected = match self.service.scoped_namespace() {
            Some(namespace) => self.registry.get_namespaced_service(namespace, name).await?,
            None => self.registry.get_service(name).await?,
        };

        if self.settings.all_namespaces {
            if selected.is_some() {
                // same namespace wins over any other match
                tracing::info!("found service {name} in its own namespace");
            } else {
                let services = self.registry.list_all_services().await?;
                match select_unique(services, name) {
                    Selection::None => {}
                    Selection::One(service) => selected = Some(service),
                    Selection::Many(count) => {
                        tracing::error!(
                            "communication disabled: service {name} found in {count} namespaces"
                        );

                        return Ok(Resolution::Ambiguous);
                    }
                }
            }
        }

        let servers = selected
            .map(|service| {
                tracing::debug!("found service {service:?}");
                build_servers(
                    &service,
                    self.service.port_name.as_deref(),
                    &self.settings.cluster_domain,
                )
            })
            .unwrap_or_default();

        if servers.is_empty() {
            let scope = self.search_scope();
            tracing::warn!(
                "did not find any service in namespace [{scope}] for name [{name}] and port name [{}]",
                self.service.port_name.as_deref().unwrap_or_default()
            );

            return Ok(Resolution::Empty);
        }

        tracing::debug!("resolved {} servers for {name}", servers.len());
        Ok(Resolution::Resolved(servers))
    }
}

impl<R> Resolver<R> {
    /// Describes where the service was looked up, for log messages.
    fn search_scope(&self) -> &str {
        if self.settings.all_namespaces {
            "ALL"
        } else {
            self.service
                .scoped_namespace()
                .unwrap_or(CLIENT_DEFAULT_NAMESPACE)
        }
    }
}

/// Result of filtering a cluster-wide listing by service name.
#[derive(Debug, PartialEq, Eq)]
enum Selection {
    None,
    One(ServiceObject),
    Many(usize),
}

/// Picks the only service named `name`, if there is exactly one.
fn select_unique(services: Vec<ServiceObject>, name: &str) -> Selection {
    let mut matches: Vec<ServiceObject> = services.into_iter().filter(|s| s.name == name).collect();

    tracing::debug!("services matching {name} across namespaces: {matches:?}");

    if matches.len() > 1 {
        return Selection::Many(matches.len());
    }

    matches.pop().map_or(Selection::None, Selection::One)
}

/// Selects the ports to expose for a service.
///
/// A single port is always selected. With several ports, a port is selected
/// when the hint is non-blank or when the hint ends with the port's name; a
/// non-blank hint therefore selects every port.
fn select_ports<'a>(ports: &'a [PortEntry], port_name: Option<&str>) -> Vec<&'a PortEntry> {
    if let [port] = ports {
        return vec![port];
    }

    let has_hint = non_blank(port_name).is_some();
    let hint = port_name.unwrap_or_default();

    ports
        .iter()
        .filter(|p| has_hint || hint.ends_with(p.name.as_deref().unwrap_or_default()))
        .collect()
}

/// Builds the fully qualified host name of a service.
fn service_host(service: &ServiceObject, cluster_domain: &str) -> String {
    let namespace = non_blank(service.namespace.as_deref()).unwrap_or(DEFAULT_NAMESPACE);
    format!("{}.{namespace}.svc.{cluster_domain}", service.name)
}

/// Converts the selected ports of a service into servers, in port order.
fn build_servers(
    service: &ServiceObject,
    port_name: Option<&str>,
    cluster_domain: &str,
) -> Vec<ResolvedServer> {
    let host = service_host(service, cluster_domain);

    select_ports(&service.ports, port_name)
        .into_iter()
        .filter_map(|p| match u16::try_from(p.port) {
            Ok(port) if port > 0 => Some(ResolvedServer::new(host.clone(), port)),
            _ => {
                tracing::warn!("skipping unusable port {} of service {host}", p.port);
                None
            }
        })
        .collect()
}
