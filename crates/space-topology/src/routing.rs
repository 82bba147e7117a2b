//! All-pairs shortest-path routing over the constellation graph
//!
//! The routing table is rebuilt from scratch whenever the topology changes.
//! Floyd-Warshall keeps next-hop reconstruction trivial and is fine for
//! constellations under ~100 nodes; larger deployments would want
//! incremental single-source updates instead.

use crate::{TopologyLink, TopologyNode};
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use std::collections::HashMap;

/// Next-hop table for every reachable (source, target) pair
#[derive(Debug, Clone, Default)]
pub struct RoutingTable {
    /// source -> target -> next hop after source
    next_hop: HashMap<String, HashMap<String, String>>,
}

impl RoutingTable {
    /// Recompute the full table with Floyd-Warshall.
    ///
    /// Edge weight is `latency_ms * (2 - quality_score)`: a perfect link
    /// costs its latency, a dead one costs double.
    pub fn rebuild(
        graph: &DiGraph<TopologyNode, TopologyLink>,
        node_index: &HashMap<String, NodeIndex>,
    ) -> Self {
        let ids: Vec<&String> = node_index.keys().collect();
        let n = ids.len();
        let pos: HashMap<&String, usize> = ids.iter().enumerate().map(|(i, id)| (*id, i)).collect();

        let mut dist = vec![vec![f64::INFINITY; n]; n];
        let mut next: Vec<Vec<Option<usize>>> = vec![vec![None; n]; n];
        for i in 0..n {
            dist[i][i] = 0.0;
        }

        // Direct links; parallel edges keep the cheapest
        for edge in graph.edge_references() {
            let link = edge.weight();
            let i = pos[&graph[edge.source()].id];
            let j = pos[&graph[edge.target()].id];
            let weight = link.cost();
            if weight < dist[i][j] {
                dist[i][j] = weight;
                next[i][j] = Some(j);
            }
        }

        for k in 0..n {
            for i in 0..n {
                if dist[i][k].is_infinite() {
                    continue;
                }
                for j in 0..n {
                    let through = dist[i][k] + dist[k][j];
                    if through < dist[i][j] {
                        dist[i][j] = through;
                        next[i][j] = next[i][k];
                    }
                }
            }
        }

        let mut next_hop: HashMap<String, HashMap<String, String>> = HashMap::new();
        for (i, src) in ids.iter().enumerate() {
            let entry = next_hop.entry((*src).clone()).or_default();
            for (j, dst) in ids.iter().enumerate() {
                if i != j {
                    if let Some(hop) = next[i][j] {
                        entry.insert((*dst).clone(), ids[hop].clone());
                    }
                }
            }
        }

        Self { next_hop }
    }

    /// Next hop after `source` on the way to `target`
    pub fn next_hop(&self, source: &str, target: &str) -> Option<&str> {
        self.next_hop
            .get(source)
            .and_then(|m| m.get(target))
            .map(|s| s.as_str())
    }

    /// Full path from `source` to `target`, empty when unreachable
    pub fn path(&self, source: &str, target: &str) -> Vec<String> {
        if source == target {
            return vec![source.to_string()];
        }

        let mut path = vec![source.to_string()];
        let mut current = source.to_string();
        while current != target {
            match self.next_hop(&current, target) {
                Some(hop) => {
                    current = hop.to_string();
                    path.push(current.clone());
                }
                None => return Vec::new(),
            }
            // A well-formed table never cycles; cap anyway
            if path.len() > self.next_hop.len() + 1 {
                return Vec::new();
            }
        }
        path
    }

    /// Reachable destinations from `source` with their next hop
    pub fn routes_from(&self, source: &str) -> HashMap<String, String> {
        self.next_hop.get(source).cloned().unwrap_or_default()
    }
}
