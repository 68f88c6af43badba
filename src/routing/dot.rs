//! Graphviz export of the link-state database for diagnostics.

use std::collections::BTreeSet;
use std::fmt::Write;

use super::{LinkState, RoutingEngine};
use crate::NodeAddr;

impl LinkState {
    fn fill_color(self) -> &'static str {
        match self {
            LinkState::None => "salmon2",
            LinkState::HelloSent => "yellow",
            LinkState::HandshakeCompleted => "blue",
            LinkState::FullyConnected => "green",
        }
    }
}

impl RoutingEngine {
    /// Render the advertised topology as a Graphviz digraph.
    ///
    /// Nodes are colored by our link state toward them; the local node is
    /// drawn as a double circle. Edges follow advertisement neighbor lists,
    /// so a one-sided claim shows up as a single arrow.
    pub fn render_dot(&self) -> String {
        let mut nodes: BTreeSet<NodeAddr> = BTreeSet::new();
        for lsa in self.database.values() {
            nodes.insert(*lsa.origin.addr());
            nodes.extend(lsa.neighbors.iter().map(|n| *n.addr()));
        }

        let mut out = String::from("digraph mesh {\n\tnode [style=filled];\n");
        for addr in &nodes {
            if addr == self.local.addr() {
                let _ = writeln!(out, "\t\"{}\" [shape=doublecircle, fillcolor=white];", addr);
            } else {
                let color = self.link_state(addr).fill_color();
                let _ = writeln!(out, "\t\"{}\" [fillcolor={}];", addr, color);
            }
        }

        let mut origins: Vec<_> = self.database.values().collect();
        origins.sort_by_key(|lsa| *lsa.origin.addr());
        for lsa in origins {
            for neighbor in &lsa.neighbors {
                let _ = writeln!(out, "\t\"{}\" -> \"{}\";", lsa.origin, neighbor);
            }
        }
        out.push_str("}\n");
        out
    }
}
