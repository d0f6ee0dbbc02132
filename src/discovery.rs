//! Feeding resolved servers into a Tonic balance channel.
//!
//! Tonic's balance channel consumes a stream of `Change` events rather than
//! polling a server list, so this module runs a [`Resolver`] on a fixed
//! interval and translates each resolution into inserts and removals.
//!
//! # How It Works
//!
//! 1. Resolves the service immediately, then every `refresh_interval`
//! 2. Inserts servers that were not sent before and removes servers that
//!    disappeared
//! 3. Removes every server when the service is missing or ambiguous
//! 4. Keeps the previous servers when the Kubernetes API cannot be reached
//!
//! # Example
//!
//! ```ignore
//! use std::time::Duration;
//! use tonic::transport::{Channel, Endpoint};
//! use tonic_lb_k8s_services::{
//!     KubeRegistry, ResolutionSettings, ResolvedServer, Resolver, ServiceRef, discover,
//! };
//!
//! let (channel, tx) = Channel::balance_channel::<ResolvedServer>(1024);
//!
//! let registry = KubeRegistry::try_default().await?;
//! let resolver = Resolver::new(
//!     registry,
//!     ServiceRef::new("my-grpc-service").port_name("grpc"),
//!     ResolutionSettings::default(),
//! );
//!
//! let refresh = discover(resolver, tx, |server| {
//!     Endpoint::from_shared(format!("http://{server}"))
//!         .unwrap()
//!         .connect_timeout(Duration::from_secs(5))
//! });
//!
//! let client = MyServiceClient::new(channel);
//! ```

use std::collections::HashSet;

use tokio::sync::mpsc::Sender;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tonic::transport::Endpoint;
use tonic::transport::channel::Change;

use crate::config::DEFAULT_REFRESH_INTERVAL;
use crate::registry::ServiceRegistry;
use crate::resolver::{Resolution, ResolvedServer, Resolver};

/// Starts refreshing the server list and sends changes to the provided sender.
///
/// This function spawns a background task that resolves the service every
/// `refresh_interval` of the resolver's settings and sends
/// `Change` events to the provided sender. The task ends when the receiving
/// side of the channel is dropped.
///
/// # Arguments
///
/// * `resolver` - Resolver for the service to track
/// * `tx` - Sender for server changes (from `Channel::balance_channel()`)
/// * `build` - Function to build an `Endpoint` for a resolved server
///
/// Dropping the returned handle detaches the task; abort it to stop refreshing
/// while the channel is still open.
#[must_use = "the handle is the only way to stop or await the refresh task"]
pub fn discover<R, F>(
    resolver: Resolver<R>,
    tx: Sender<Change<ResolvedServer, Endpoint>>,
    build: F,
) -> JoinHandle<()>
where
    R: ServiceRegistry + 'static,
    F: Fn(&ResolvedServer) -> Endpoint + Send + 'static,
{
    tokio::spawn(refresh_loop(resolver, tx, build))
}

/// Background task that periodically resolves the service and sends changes.
async fn refresh_loop<R, F>(
    resolver: Resolver<R>,
    tx: Sender<Change<ResolvedServer, Endpoint>>,
    build: F,
) where
    R: ServiceRegistry,
    F: Fn(&ResolvedServer) -> Endpoint,
{
    let period = match resolver.settings().refresh_interval {
        p if p.is_zero() => DEFAULT_REFRESH_INTERVAL,
        p => p,
    };

    let mut ticker = time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let mut known: HashSet<ResolvedServer> = HashSet::new();
    let service = resolver.service().service_id.clone();

    tracing::debug!("Starting Kubernetes service refresh for {service} every {period:?}");

    loop {
        tokio::select! {
            biased;

            () = tx.closed() => {
                tracing::debug!("channel closed, stopping Kubernetes service refresh");
                return;
            }

            _ = ticker.tick() => {}
        }

        let resolution = match resolver.resolve().await {
            Ok(resolution) => resolution,
            Err(e) => {
                tracing::warn!(
                    "failed to resolve {service}, keeping {} known servers: {e}",
                    known.len()
                );
                continue;
            }
        };

        for action in process_resolution(&resolution, &mut known) {
            let change = match action {
                ServerAction::Insert(server) => {
                    let endpoint = build(&server);
                    Change::Insert(server, endpoint)
                }
                ServerAction::Remove(server) => Change::Remove(server),
            };

            if tx.send(change).await.is_err() {
                tracing::warn!("channel closed, stopping Kubernetes service refresh");
                return;
            }
        }

        tracing::debug!("Kubernetes discovery: {} servers for {service}", known.len());
    }
}

/// Represents a server change action.
#[derive(Debug, Clone, PartialEq, Eq)]
enum ServerAction {
    Insert(ResolvedServer),
    Remove(ResolvedServer),
}

/// Compares a resolution with the servers already sent and returns the actions.
///
/// Inserts come first, in resolution order, so the channel never drops to zero
/// servers while a service moves between ports. Removals follow in sorted order.
fn process_resolution(
    resolution: &Resolution,
    known: &mut HashSet<ResolvedServer>,
) -> Vec<ServerAction> {
    let current: HashSet<&ResolvedServer> = resolution.servers().iter().collect();
    let mut actions = Vec::new();

    for server in resolution.servers() {
        if known.insert(server.clone()) {
            tracing::debug!("adding server: {server}");
            actions.push(ServerAction::Insert(server.clone()));
        }
    }

    let mut removed: Vec<ResolvedServer> = known
        .iter()
        .filter(|server| !current.contains(server))
        .cloned()
        .collect();
    removed.sort();

    for server in removed {
        known.remove(&server);
        tracing::debug!("removing server: {server}");
        actions.push(ServerAction::Remove(server));
    }

    actions
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::sync::mpsc;

    use super::*;
    use crate::config::{ResolutionSettings, ServiceRef};
    use crate::registry::{MockServiceRegistry, PortEntry, ServiceObject};

    fn server(host: &str, port: u16) -> ResolvedServer {
        ResolvedServer::new(host, port)
    }

    fn orders(ports: &[i32]) -> ServiceObject {
        ServiceObject::new(
            "orders",
            Some("ns1"),
            ports.iter().map(|p| PortEntry::new(None, *p)).collect(),
        )
    }

    fn build(server: &ResolvedServer) -> Endpoint {
        Endpoint::from_shared(format!("http://{server}")).unwrap()
    }

    // process_resolution tests

    #[test]
    fn process_resolution_inserts_new_servers() {
        let resolution = Resolution::Resolved(vec![server("a", 80), server("a", 81)]);

        let mut known = HashSet::new();
        let actions = process_resolution(&resolution, &mut known);

        assert_eq!(
            actions,
            vec![
                ServerAction::Insert(server("a", 80)),
                ServerAction::Insert(server("a", 81)),
            ]
        );
        assert_eq!(known.len(), 2);
    }

    #[test]
    fn process_resolution_skips_known_servers() {
        let resolution = Resolution::Resolved(vec![server("a", 80), server("a", 81)]);

        let mut known = HashSet::new();
        known.insert(server("a", 80));

        let actions = process_resolution(&resolution, &mut known);

        assert_eq!(actions, vec![ServerAction::Insert(server("a", 81))]);
        assert_eq!(known.len(), 2);
    }

    #[test]
    fn process_resolution_removes_missing_servers() {
        let resolution = Resolution::Resolved(vec![server("a", 81)]);

        let mut known = HashSet::new();
        known.insert(server("a", 80));

        let actions = process_resolution(&resolution, &mut known);

        assert_eq!(
            actions,
            vec![
                ServerAction::Insert(server("a", 81)),
                ServerAction::Remove(server("a", 80)),
            ]
        );
        assert_eq!(known.len(), 1);
        assert!(known.contains(&server("a", 81)));
    }

    #[test]
    fn process_resolution_empty_removes_everything() {
        let mut known = HashSet::new();
        known.insert(server("b", 80));
        known.insert(server("a", 80));

        let actions = process_resolution(&Resolution::Empty, &mut known);

        assert_eq!(
            actions,
            vec![
                ServerAction::Remove(server("a", 80)),
                ServerAction::Remove(server("b", 80)),
            ]
        );
        assert!(known.is_empty());
    }

    #[test]
    fn process_resolution_ambiguous_removes_everything() {
        let mut known = HashSet::new();
        known.insert(server("a", 80));

        let actions = process_resolution(&Resolution::Ambiguous, &mut known);

        assert_eq!(actions, vec![ServerAction::Remove(server("a", 80))]);
        assert!(known.is_empty());
    }

    #[test]
    fn process_resolution_unchanged_returns_empty() {
        let resolution = Resolution::Resolved(vec![server("a", 80)]);

        let mut known = HashSet::new();
        known.insert(server("a", 80));

        assert!(process_resolution(&resolution, &mut known).is_empty());
    }

    // discover tests

    #[tokio::test(start_paused = true)]
    async fn discover_sends_inserts_then_removals() {
        let mut registry = MockServiceRegistry::new();
        registry
            .expect_get_service()
            .times(1)
            .returning(|_| Ok(Some(orders(&[8080]))));
        registry
            .expect_get_service()
            .times(1)
            .returning(|_| Err("connection refused".into()));
        registry.expect_get_service().returning(|_| Ok(None));

        let resolver = Resolver::new(
            registry,
            ServiceRef::new("orders"),
            ResolutionSettings::default().refresh_interval(Duration::from_secs(1)),
        );

        let (tx, mut rx) = mpsc::channel(16);
        let handle = discover(resolver, tx, build);

        let Some(Change::Insert(inserted, _)) = rx.recv().await else {
            panic!("expected insert");
        };
        assert_eq!(inserted, server("orders.ns1.svc.cluster.local", 8080));

        // the failed refresh keeps the server; the next one removes it
        let Some(Change::Remove(removed)) = rx.recv().await else {
            panic!("expected remove");
        };
        assert_eq!(removed, server("orders.ns1.svc.cluster.local", 8080));

        drop(rx);
        handle.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn discover_stops_when_channel_closes() {
        let mut registry = MockServiceRegistry::new();
        registry
            .expect_get_service()
            .returning(|_| Ok(Some(orders(&[8080, 9090]))));

        let resolver = Resolver::new(
            registry,
            ServiceRef::new("orders").port_name("grpc"),
            ResolutionSettings::default(),
        );

        let (tx, rx) = mpsc::channel(1);
        drop(rx);

        let handle = discover(resolver, tx, build);
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn discover_stops_when_channel_closes_without_changes() {
        // an absent service never produces a change to send
        let mut registry = MockServiceRegistry::new();
        registry.expect_get_service().times(1).returning(|_| Ok(None));

        let resolver = Resolver::new(
            registry,
            ServiceRef::new("ghost"),
            ResolutionSettings::default(),
        );

        let (tx, rx) = mpsc::channel(1);
        let handle = discover(resolver, tx, build);

        // let the first refresh run before the receiver goes away
        time::sleep(Duration::from_secs(1)).await;
        drop(rx);

        time::timeout(Duration::from_secs(3600), handle)
            .await
            .expect("refresh task should stop once the receiver is dropped")
            .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn discover_does_not_resolve_for_closed_channel() {
        let mut registry = MockServiceRegistry::new();
        registry.expect_get_service().never();

        let resolver = Resolver::new(
            registry,
            ServiceRef::new("ghost"),
            ResolutionSettings::default(),
        );

        let (tx, rx) = mpsc::channel(1);
        drop(rx);

        let handle = discover(resolver, tx, build);
        time::timeout(Duration::from_secs(3600), handle)
            .await
            .expect("refresh task should stop immediately")
            .unwrap();
    }
}
