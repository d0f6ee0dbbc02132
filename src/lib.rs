#![deny(missing_docs)]
#![deny(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

//! Kubernetes Service discovery for [Tonic](https://docs.rs/tonic) gRPC load balancing.
//!
//! Client-side load balancers need a list of servers to route to. This crate
//! looks up Kubernetes `Service` objects by name and turns them into
//! `<name>.<namespace>.svc.<cluster-domain>:<port>` servers, either on demand
//! through a [`Resolver`] or continuously through [`discover`], which feeds a
//! user-provided Tonic balance channel.
//!
//! # Features
//!
//! - **Namespace-aware lookup**: Services are looked up in a given namespace or the
//!   client's default one, optionally falling back to a search of every namespace
//! - **Explicit ambiguity**: A service name found in several namespaces yields
//!   [`Resolution::Ambiguous`] instead of an arbitrary pick
//! - **User-controlled channels**: You create the channel and endpoints however you want
//!
//! # Usage
//!
//! ```ignore
//! use std::time::Duration;
//! use tonic::transport::{Channel, Endpoint};
//! use tonic_lb_k8s_services::{
//!     KubeRegistry, ResolutionSettings, ResolvedServer, Resolver, ServiceRef, discover,
//! };
//!
//! // Create your own balance channel
//! let (channel, tx) = Channel::balance_channel::<ResolvedServer>(1024);
//!
//! // Resolve "my-grpc-service" in the current namespace, falling back to any namespace
//! let registry = KubeRegistry::try_default().await?;
//! let resolver = Resolver::new(
//!     registry,
//!     ServiceRef::new("my-grpc-service").port_name("grpc"),
//!     ResolutionSettings::default().all_namespaces(true),
//! );
//!
//! // Start discovery - build function returns Endpoint for each server
//! let refresh = discover(resolver, tx, |server| {
//!     Endpoint::from_shared(format!("http://{server}"))
//!         .unwrap()
//!         .connect_timeout(Duration::from_secs(5))
//! });
//!
//! // Use with your generated gRPC client
//! // let client = MyServiceClient::new(channel);
//! ```

mod config;
mod discovery;
mod registry;
mod resolver;

pub use config::{DEFAULT_CLUSTER_DOMAIN, DEFAULT_REFRESH_INTERVAL, ResolutionSettings, ServiceRef};
pub use discovery::discover;
pub use registry::{KubeRegistry, PortEntry, ServiceObject, ServiceRegistry};
pub use resolver::{Resolution, ResolvedServer, Resolver};

/// Error type for resolution failures.
///
/// Errors raised by the Kubernetes client are boxed unchanged and can be
/// recovered with `downcast_ref::<kube::Error>()`.
pub type Error = Box<dyn std::error::Error + Send + Sync>;

/// Result type for resolution operations.
pub type Result<T> = std::result::Result<T, Error>;
