//! Source routing and network paths for the networking-node overlay
//!
//! A [`SourceRouting`] tells relays where a message should go; a
//! [`NetworkPath`] records where it has been. Relays append themselves to the
//! path when forwarding and refuse to forward a message that has already
//! passed through them.

use serde_json::Value;
use std::collections::HashMap;
use thiserror::Error;
use tracing::{debug, warn};

use super::codec::{CustomSerializers, FromJson, ParseError, ToJson};
use super::identifiers::NetworkingNodeId;

pub const DEFAULT_MAX_PATH_LENGTH: usize = 8;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RoutingError {
    #[error("routing loop: {hop} already appears in the network path")]
    Cycle { hop: NetworkingNodeId },

    #[error("network path would grow to {length} hops (maximum {max})")]
    PathTooLong { length: usize, max: usize },

    #[error("no route to {destination}")]
    UnknownDestination { destination: NetworkingNodeId },

    #[error("{node} is not on the explicit route of this message")]
    NotOnRoute { node: NetworkingNodeId },
}

/// Ordered record of the relays a message has passed through
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct NetworkPath(Vec<NetworkingNodeId>);

impl NetworkPath {
    /// Path of a message received over a direct link.
    pub fn direct() -> Self {
        Self::default()
    }

    pub fn from_hops(hops: impl IntoIterator<Item = NetworkingNodeId>) -> Result<Self, RoutingError> {
        hops.into_iter()
            .try_fold(Self::direct(), |path, hop| path.appended(hop))
    }

    pub fn hops(&self) -> &[NetworkingNodeId] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn contains(&self, hop: &NetworkingNodeId) -> bool {
        self.0.contains(hop)
    }

    /// New path with `hop` appended; a repeated hop is a routing loop.
    pub fn appended(&self, hop: NetworkingNodeId) -> Result<Self, RoutingError> {
        if self.contains(&hop) {
            return Err(RoutingError::Cycle { hop });
        }
        let mut hops = self.0.clone();
        hops.push(hop);
        Ok(Self(hops))
    }

    /// Routing for a reply: retrace the relays in reverse order, then hand
    /// the message to the link peer of the last of them.
    pub fn reply_routing(&self) -> SourceRouting {
        SourceRouting {
            destination: None,
            hops: self.0.iter().rev().cloned().collect(),
        }
    }
}

impl FromJson for NetworkPath {
    fn from_json(value: &Value) -> Result<Self, ParseError> {
        let items = value
            .as_array()
            .ok_or_else(|| ParseError::value("expected an array"))?;
        let hops = items
            .iter()
            .enumerate()
            .map(|(i, item)| NetworkingNodeId::from_json(item).map_err(|e| e.within(&format!("[{i}]"))))
            .collect::<Result<Vec<_>, _>>()?;
        Self::from_hops(hops).map_err(|e| ParseError::value(e.to_string()))
    }
}

impl ToJson for NetworkPath {
    fn to_json(&self, custom: &CustomSerializers) -> Value {
        Value::Array(self.0.iter().map(|hop| hop.to_json(custom)).collect())
    }
}

/// Addressing instruction for an outgoing message.
///
/// Without a destination the message is meant for whoever sits at the other
/// end of the link it is delivered over (after the explicit hops, if any).
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct SourceRouting {
    destination: Option<NetworkingNodeId>,
    hops: Vec<NetworkingNodeId>,
}

impl SourceRouting {
    pub fn link_peer() -> Self {
        Self::default()
    }

    pub fn to(destination: NetworkingNodeId) -> Self {
        Self {
            destination: Some(destination),
            hops: Vec::new(),
        }
    }

    /// Explicit route: hops in order, then the destination.
    pub fn via(
        destination: NetworkingNodeId,
        hops: impl IntoIterator<Item = NetworkingNodeId>,
    ) -> Result<Self, RoutingError> {
        let path = NetworkPath::from_hops(hops)?;
        if path.contains(&destination) {
            return Err(RoutingError::Cycle { hop: destination });
        }
        Ok(Self {
            destination: Some(destination),
            hops: path.0,
        })
    }

    pub fn destination(&self) -> Option<&NetworkingNodeId> {
        self.destination.as_ref()
    }

    pub fn hops(&self) -> &[NetworkingNodeId] {
        &self.hops
    }

    /// Where the originator hands the message first.
    pub fn first_hop(&self) -> NextHop {
        match (self.hops.first(), &self.destination) {
            (Some(hop), _) => NextHop::Node(hop.clone()),
            (None, Some(destination)) => NextHop::Node(destination.clone()),
            (None, None) => NextHop::LinkPeer,
        }
    }
}

/// Messages carrying routing metadata
pub trait Routable: Sized {
    fn destination(&self) -> &SourceRouting;

    fn network_path(&self) -> &NetworkPath;

    /// Copy of the message carrying a different path.
    fn with_network_path(&self, network_path: NetworkPath) -> Self;
}

/// Relay-local view of the overlay topology
pub trait Topology: Send + Sync {
    /// Neighbour to hand a message for `destination` to.
    fn next_hop(&self, destination: &NetworkingNodeId) -> Option<NetworkingNodeId>;
}

/// Fixed next-hop table
#[derive(Debug, Clone, Default)]
pub struct StaticTopology {
    routes: HashMap<NetworkingNodeId, NetworkingNodeId>,
}

impl StaticTopology {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_neighbour(self, neighbour: NetworkingNodeId) -> Self {
        self.with_route(neighbour.clone(), neighbour)
    }

    pub fn with_route(mut self, destination: NetworkingNodeId, via: NetworkingNodeId) -> Self {
        self.routes.insert(destination, via);
        self
    }
}

impl Topology for StaticTopology {
    fn next_hop(&self, destination: &NetworkingNodeId) -> Option<NetworkingNodeId> {
        self.routes.get(destination).cloned()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NextHop {
    Node(NetworkingNodeId),
    /// The peer at the other end of the link the message belongs to
    LinkPeer,
}

/// What a relay does with a message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Relayed<M> {
    /// This node is the destination.
    Deliver(M),
    /// Pass on; the message already carries the extended path.
    Forward { next_hop: NextHop, message: M },
}

/// Networking node that forwards messages on behalf of others
#[derive(Debug, Clone)]
pub struct Relay<T> {
    node_id: NetworkingNodeId,
    max_path_length: usize,
    topology: T,
}

impl<T: Topology> Relay<T> {
    pub fn new(node_id: NetworkingNodeId, topology: T) -> Self {
        Self {
            node_id,
            max_path_length: DEFAULT_MAX_PATH_LENGTH,
            topology,
        }
    }

    pub fn with_max_path_length(mut self, max_path_length: usize) -> Self {
        self.max_path_length = max_path_length;
        self
    }

    fn next_hop(&self, routing: &SourceRouting, path: &NetworkPath) -> Result<Option<NextHop>, RoutingError> {
        if routing.destination() == Some(&self.node_id) {
            return Ok(None);
        }
        if let Some(position) = routing.hops().iter().position(|hop| hop == &self.node_id) {
            let next = match (routing.hops().get(position + 1), routing.destination()) {
                (Some(hop), _) => NextHop::Node(hop.clone()),
                (None, Some(destination)) => NextHop::Node(destination.clone()),
                (None, None) => NextHop::LinkPeer,
            };
            return Ok(Some(next));
        }
        // an explicit route is finished once every hop has been traversed
        if !routing.hops().iter().all(|hop| path.contains(hop)) {
            return Err(RoutingError::NotOnRoute {
                node: self.node_id.clone(),
            });
        }
        match routing.destination() {
            None => Ok(None),
            Some(destination) => self
                .topology
                .next_hop(destination)
                .map(|hop| Some(NextHop::Node(hop)))
                .ok_or_else(|| RoutingError::UnknownDestination {
                    destination: destination.clone(),
                }),
        }
    }

    /// Decides whether to deliver or forward `message`.
    pub fn route<M: Routable>(&self, message: &M) -> Result<Relayed<M>, RoutingError> {
        let path = message.network_path();
        if path.contains(&self.node_id) {
            warn!(node = %self.node_id, hops = path.len(), "refusing to forward looping message");
            return Err(RoutingError::Cycle {
                hop: self.node_id.clone(),
            });
        }

        let Some(next_hop) = self.next_hop(message.destination(), path).inspect_err(|error| {
            warn!(node = %self.node_id, %error, "cannot route message");
        })?
        else {
            debug!(node = %self.node_id, "delivering message locally");
            return Ok(Relayed::Deliver(message.with_network_path(path.clone())));
        };

        let extended = path.appended(self.node_id.clone())?;
        if extended.len() > self.max_path_length {
            warn!(node = %self.node_id, length = extended.len(), max = self.max_path_length, "network path too long");
            return Err(RoutingError::PathTooLong {
                length: extended.len(),
                max: self.max_path_length,
            });
        }
        debug!(node = %self.node_id, next = ?next_hop, hops = extended.len(), "forwarding message");
        Ok(Relayed::Forward {
            next_hop,
            message: message.with_network_path(extended),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(id: &str) -> NetworkingNodeId {
        NetworkingNodeId::parse(id).unwrap()
    }

    #[derive(Debug, Clone, PartialEq, Eq)]
    struct Parcel {
        routing: SourceRouting,
        path: NetworkPath,
    }

    impl Routable for Parcel {
        fn destination(&self) -> &SourceRouting {
            &self.routing
        }

        fn network_path(&self) -> &NetworkPath {
            &self.path
        }

        fn with_network_path(&self, network_path: NetworkPath) -> Self {
            Self {
                routing: self.routing.clone(),
                path: network_path,
            }
        }
    }

    fn parcel(routing: SourceRouting, hops: &[&str]) -> Parcel {
        Parcel {
            routing,
            path: NetworkPath::from_hops(hops.iter().map(|h| node(h))).unwrap(),
        }
    }

    #[test]
    fn test_path_rejects_repeated_hop() {
        let path = NetworkPath::from_hops([node("a"), node("b")]).unwrap();
        assert_eq!(
            path.appended(node("A")),
            Err(RoutingError::Cycle { hop: node("a") })
        );
        assert!(NetworkPath::from_hops([node("a"), node("a")]).is_err());
    }

    #[test]
    fn test_reply_routing_reverses_path() {
        let path = NetworkPath::from_hops([node("r1"), node("r2")]).unwrap();
        let reply = path.reply_routing();
        assert_eq!(reply.hops(), &[node("r2"), node("r1")]);
        assert_eq!(reply.destination(), None);
        assert_eq!(reply.first_hop(), NextHop::Node(node("r2")));
    }

    #[test]
    fn test_relay_forwards_by_topology_and_appends_itself() {
        let relay = Relay::new(node("r1"), StaticTopology::new().with_route(node("csms"), node("r2")));
        let message = parcel(SourceRouting::to(node("csms")), &[]);

        match relay.route(&message).unwrap() {
            Relayed::Forward { next_hop, message } => {
                assert_eq!(next_hop, NextHop::Node(node("r2")));
                assert_eq!(message.path.hops(), &[node("r1")]);
            }
            other => panic!("expected forward, got {other:?}"),
        }
    }

    #[test]
    fn test_relay_refuses_cycle() {
        let relay = Relay::new(node("r1"), StaticTopology::new().with_neighbour(node("csms")));
        let message = parcel(SourceRouting::to(node("csms")), &["r0", "r1", "r2"]);
        assert_eq!(
            relay.route(&message),
            Err(RoutingError::Cycle { hop: node("r1") })
        );
    }

    #[test]
    fn test_relay_enforces_max_path_length() {
        let relay = Relay::new(node("r3"), StaticTopology::new().with_neighbour(node("csms")))
            .with_max_path_length(3);
        let message = parcel(SourceRouting::to(node("csms")), &["r0", "r1", "r2"]);
        assert_eq!(
            relay.route(&message),
            Err(RoutingError::PathTooLong { length: 4, max: 3 })
        );
    }

    #[test]
    fn test_unknown_destination() {
        let relay = Relay::new(node("r1"), StaticTopology::new());
        let message = parcel(SourceRouting::to(node("nowhere")), &[]);
        assert_eq!(
            relay.route(&message),
            Err(RoutingError::UnknownDestination { destination: node("nowhere") })
        );
    }

    #[test]
    fn test_explicit_route_is_followed() {
        let routing = SourceRouting::via(node("cs1"), [node("r1"), node("r2")]).unwrap();
        let relay = Relay::new(node("r1"), StaticTopology::new());

        match relay.route(&parcel(routing.clone(), &[])).unwrap() {
            Relayed::Forward { next_hop, .. } => assert_eq!(next_hop, NextHop::Node(node("r2"))),
            other => panic!("expected forward, got {other:?}"),
        }

        let last = Relay::new(node("r2"), StaticTopology::new());
        match last.route(&parcel(routing.clone(), &["r1"])).unwrap() {
            Relayed::Forward { next_hop, message } => {
                assert_eq!(next_hop, NextHop::Node(node("cs1")));
                assert_eq!(message.path.hops(), &[node("r1"), node("r2")]);
            }
            other => panic!("expected forward, got {other:?}"),
        }

        let stranger = Relay::new(node("r9"), StaticTopology::new());
        assert_eq!(
            stranger.route(&parcel(routing, &[])),
            Err(RoutingError::NotOnRoute { node: node("r9") })
        );
    }

    #[test]
    fn test_destination_delivers_locally_without_growing_path() {
        let relay = Relay::new(node("csms"), StaticTopology::new());
        let message = parcel(SourceRouting::to(node("CSMS")), &["r1"]);
        assert_eq!(relay.route(&message), Ok(Relayed::Deliver(message.clone())));
    }

    #[test]
    fn test_reply_reaches_link_peer_after_last_hop() {
        let reply = NetworkPath::from_hops([node("r1")]).unwrap().reply_routing();
        let relay = Relay::new(node("r1"), StaticTopology::new());
        match relay.route(&parcel(reply, &[])).unwrap() {
            Relayed::Forward { next_hop, .. } => assert_eq!(next_hop, NextHop::LinkPeer),
            other => panic!("expected forward, got {other:?}"),
        }
    }

    #[test]
    fn test_reply_is_delivered_at_originator() {
        let reply = NetworkPath::from_hops([node("r1"), node("r2")]).unwrap().reply_routing();
        let originator = Relay::new(node("csms"), StaticTopology::new());
        let arrived = parcel(reply.clone(), &["r2", "r1"]);
        assert_eq!(originator.route(&arrived), Ok(Relayed::Deliver(arrived.clone())));

        // halfway along the return leg the route is not finished yet
        assert_eq!(
            originator.route(&parcel(reply, &["r2"])),
            Err(RoutingError::NotOnRoute { node: node("csms") })
        );
    }

    #[test]
    fn test_finished_explicit_route_falls_back_to_topology() {
        let routing = SourceRouting::via(node("cs1"), [node("r1")]).unwrap();
        let relay = Relay::new(node("r2"), StaticTopology::new().with_neighbour(node("cs1")));
        match relay.route(&parcel(routing, &["r1"])).unwrap() {
            Relayed::Forward { next_hop, message } => {
                assert_eq!(next_hop, NextHop::Node(node("cs1")));
                assert_eq!(message.path.hops(), &[node("r1"), node("r2")]);
            }
            other => panic!("expected forward, got {other:?}"),
        }
    }

    #[test]
    fn test_via_rejects_destination_in_hops() {
        assert!(SourceRouting::via(node("a"), [node("b"), node("a")]).is_err());
    }

    #[test]
    fn test_path_json() {
        let path = NetworkPath::from_hops([node("r1"), node("r2")]).unwrap();
        let json = path.to_json(&CustomSerializers::default());
        assert_eq!(json, serde_json::json!(["r1", "r2"]));
        assert_eq!(NetworkPath::from_json(&json).unwrap(), path);
        assert!(NetworkPath::from_json(&serde_json::json!(["r1", "R1"])).is_err());
    }
}
