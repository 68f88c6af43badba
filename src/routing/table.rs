//! Shortest-path routing table.

use std::cmp::Reverse;
use std::collections::{BTreeMap, BinaryHeap, HashMap};
use std::fmt;

use tracing::trace;

use crate::protocol::LinkStateAdvertisement;
use crate::{Node, NodeAddr};

/// One shortest-path result.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RouteEntry {
    /// Destination node.
    pub destination: Node,
    /// Hop count from the local node.
    pub distance: u32,
    /// First hop out of the local node; `None` for the local node itself.
    pub next_hop: Option<Node>,
}

impl RouteEntry {
    /// Check whether this is the local node's own entry.
    pub fn is_local(&self) -> bool {
        self.distance == 0
    }
}

impl fmt::Display for RouteEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.next_hop {
            Some(hop) => write!(f, "{} dist={} via {}", self.destination, self.distance, hop),
            None => write!(f, "{} dist={} (local)", self.destination, self.distance),
        }
    }
}

/// Exploration candidate.
///
/// Field order defines the total order used by the priority queue:
/// distance, then destination address, then next-hop address. This makes
/// tie-breaks between equal-length paths reproducible on every peer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
struct Candidate {
    distance: u32,
    node: NodeAddr,
    next_hop: Option<NodeAddr>,
}

/// Routing table computed from a link-state database.
///
/// Always replaced wholesale; there is no incremental update path.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RoutingTable {
    local: NodeAddr,
    routes: BTreeMap<NodeAddr, RouteEntry>,
}

impl RoutingTable {
    /// Run a unit-weight Dijkstra from `local` over `graph`.
    ///
    /// An edge u → v is only expanded when u's advertisement lists v *and*
    /// v's advertisement lists u. One-sided or stale claims never produce
    /// a route.
    pub fn compute(local: &Node, graph: &HashMap<NodeAddr, LinkStateAdvertisement>) -> Self {
        let local_addr = *local.addr();
        let mut routes: BTreeMap<NodeAddr, RouteEntry> = BTreeMap::new();
        let mut queue = BinaryHeap::new();

        queue.push(Reverse(Candidate {
            distance: 0,
            node: local_addr,
            next_hop: None,
        }));

        while let Some(Reverse(candidate)) = queue.pop() {
            if let Some(done) = routes.get(&candidate.node)
                && done.distance <= candidate.distance
            {
                continue;
            }

            let destination = if candidate.node == local_addr {
                local.clone()
            } else {
                match graph.get(&candidate.node) {
                    Some(lsa) => lsa.origin.clone(),
                    None => continue,
                }
            };
            let next_hop = candidate.next_hop.map(|hop| {
                graph
                    .get(&hop)
                    .map(|lsa| lsa.origin.clone())
                    .unwrap_or_else(|| Node::anonymous(hop))
            });
            routes.insert(
                candidate.node,
                RouteEntry {
                    destination,
                    distance: candidate.distance,
                    next_hop,
                },
            );

            let Some(lsa) = graph.get(&candidate.node) else {
                continue;
            };

            for neighbor in &lsa.neighbors {
                let addr = *neighbor.addr();
                let confirmed = graph
                    .get(&addr)
                    .is_some_and(|other| other.lists(&candidate.node));
                if !confirmed {
                    trace!(from = %candidate.node, to = %addr, "Skipping unconfirmed adjacency");
                    continue;
                }
                if routes.contains_key(&addr) {
                    continue;
                }

                let next_hop = if candidate.node == local_addr {
                    Some(addr)
                } else {
                    candidate.next_hop
                };
                queue.push(Reverse(Candidate {
                    distance: candidate.distance + 1,
                    node: addr,
                    next_hop,
                }));
            }
        }

        Self {
            local: local_addr,
            routes,
        }
    }

    /// The node this table was computed for.
    pub fn local(&self) -> &NodeAddr {
        &self.local
    }

    /// Look up the route to a destination.
    pub fn get(&self, dest: &NodeAddr) -> Option<&RouteEntry> {
        self.routes.get(dest)
    }

    /// First hop toward a destination (`None` if unreachable or local).
    pub fn next_hop(&self, dest: &NodeAddr) -> Option<&Node> {
        self.routes.get(dest).and_then(|r| r.next_hop.as_ref())
    }

    /// Hop distance to a destination.
    pub fn distance(&self, dest: &NodeAddr) -> Option<u32> {
        self.routes.get(dest).map(|r| r.distance)
    }

    /// Check whether a destination is reachable (or local).
    pub fn contains(&self, dest: &NodeAddr) -> bool {
        self.routes.contains_key(dest)
    }

    /// Number of entries, including the local node.
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    /// Check if the table is empty.
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Iterate over all entries in address order.
    pub fn iter(&self) -> impl Iterator<Item = &RouteEntry> {
        self.routes.values()
    }

    /// Iterate over reachable remote destinations.
    pub fn remote(&self) -> impl Iterator<Item = &RouteEntry> {
        self.routes.values().filter(|r| !r.is_local())
    }
}
