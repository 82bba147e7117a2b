//! Space Topology - constellation topology and routing manager
//!
//! Owns the abstract network graph for a spacecraft constellation:
//!
//! - Node and link registry (spacecraft, satellites, ground stations)
//! - Free-space-path-loss link model (signal strength, bandwidth, latency)
//! - All-pairs shortest-path routing over variable-quality links
//! - Emergency beacon fan-out
//! - Network health aggregation and global status state machine

use chrono::{DateTime, Utc};
use petgraph::graph::{DiGraph, EdgeIndex, NodeIndex};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;
use tracing::{debug, info, warn};

pub mod health;
pub mod routing;

pub use health::NetworkHealth;
pub use routing::RoutingTable;

/// Topology errors
#[derive(Error, Debug)]
pub enum TopologyError {
    #[error("Node not found: {0}")]
    NodeNotFound(String),
    #[error("Link not found: {0}")]
    LinkNotFound(String),
}

pub type Result<T> = std::result::Result<T, TopologyError>;

/// Global network status
///
/// Only this crate mutates the status: Active/Degraded/Offline transitions
/// are driven by availability thresholds in [`SpaceTopology::monitor_network_health`],
/// Emergency only by [`SpaceTopology::activate_emergency_protocol`].
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum NetworkStatus {
    Active,
    Degraded,
    Offline,
    Emergency,
}

/// Physical realization class of a link
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum LinkMode {
    DeepSpace,
    InterSatellite,
    GroundStation,
    EmergencyBeacon,
}

impl LinkMode {
    /// Baseline signal strength before path loss
    pub fn base_strength(&self) -> f64 {
        match self {
            LinkMode::DeepSpace => 0.6,
            LinkMode::InterSatellite => 0.9,
            LinkMode::GroundStation => 0.8,
            LinkMode::EmergencyBeacon => 0.7,
        }
    }

    /// Maximum bandwidth at full signal strength (Mbps)
    pub fn max_bandwidth_mbps(&self) -> f64 {
        match self {
            LinkMode::DeepSpace => 10.0,
            LinkMode::InterSatellite => 100.0,
            LinkMode::GroundStation => 50.0,
            LinkMode::EmergencyBeacon => 5.0,
        }
    }

    /// Fixed processing delay added on top of propagation (ms)
    pub fn processing_delay_ms(&self) -> f64 {
        match self {
            LinkMode::DeepSpace => 100.0,
            LinkMode::InterSatellite => 10.0,
            LinkMode::GroundStation => 50.0,
            LinkMode::EmergencyBeacon => 20.0,
        }
    }
}

/// A node in the constellation topology
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopologyNode {
    pub id: String,
    pub name: String,
    /// "spacecraft", "satellite" or "ground_station"
    pub node_type: String,
    /// ECI position in meters
    pub position: [f64; 3],
    /// Velocity in m/s
    pub velocity: [f64; 3],
    pub status: NetworkStatus,
    pub communication_modes: Vec<LinkMode>,
    pub last_contact: Option<DateTime<Utc>>,
    pub signal_strength: f64,
    /// Mbps
    pub bandwidth_capacity: f64,
    /// Accumulated transmission load (MB)
    pub current_load: f64,
    /// 1-10, higher is more critical
    pub priority_level: u8,
}

impl TopologyNode {
    pub fn new(id: impl Into<String>, name: impl Into<String>, node_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            node_type: node_type.into(),
            position: [0.0; 3],
            velocity: [0.0; 3],
            status: NetworkStatus::Active,
            communication_modes: Vec::new(),
            last_contact: None,
            signal_strength: 0.0,
            bandwidth_capacity: 0.0,
            current_load: 0.0,
            priority_level: 1,
        }
    }

    pub fn with_position(mut self, position: [f64; 3]) -> Self {
        self.position = position;
        self
    }

    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority_level = priority.clamp(1, 10);
        self
    }

    fn distance_to(&self, other: &TopologyNode) -> f64 {
        let dx = self.position[0] - other.position[0];
        let dy = self.position[1] - other.position[1];
        let dz = self.position[2] - other.position[2];
        (dx * dx + dy * dy + dz * dz).sqrt()
    }
}

/// A directed communication link between two nodes
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopologyLink {
    pub id: String,
    pub source: String,
    pub target: String,
    pub mode: LinkMode,
    pub established_at: DateTime<Utc>,
    pub signal_strength: f64,
    pub bandwidth_mbps: f64,
    pub latency_ms: f64,
    /// Fraction of packets lost on this link (0-0.1)
    pub packet_loss: f64,
    pub is_encrypted: bool,
    /// Composite quality (0-1), decays slightly with use
    pub quality_score: f64,
}

impl TopologyLink {
    /// Routing weight (lower = better)
    pub fn cost(&self) -> f64 {
        self.latency_ms * (2.0 - self.quality_score)
    }
}

/// Tunable topology parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopologyConfig {
    pub max_hop_count: usize,
    /// A link older than this counts as stale for health reporting
    pub link_timeout_secs: i64,
    /// Node availability below this degrades the network
    pub degraded_threshold: f64,
    /// Node availability at or below this takes the network offline
    pub offline_threshold: f64,
}

impl Default for TopologyConfig {
    fn default() -> Self {
        Self {
            max_hop_count: 5,
            link_timeout_secs: 30 * 60,
            degraded_threshold: 0.5,
            offline_threshold: 0.0,
        }
    }
}

// Carrier frequency assumed by the path-loss model (Hz)
const CARRIER_FREQ_HZ: f64 = 2.4e9;
const LIGHT_SPEED_M_S: f64 = 3.0e8;

/// The constellation topology manager
pub struct SpaceTopology {
    network_name: String,
    graph: DiGraph<TopologyNode, TopologyLink>,
    node_index: HashMap<String, NodeIndex>,
    link_index: HashMap<String, EdgeIndex>,
    routing: RoutingTable,
    routing_dirty: bool,
    status: NetworkStatus,
    emergency_active: bool,
    /// Cumulative payload volume moved through the network (MB)
    total_data_transmitted_mb: f64,
    started_at: DateTime<Utc>,
    config: TopologyConfig,
}

impl SpaceTopology {
    pub fn new(network_name: impl Into<String>) -> Self {
        Self::with_config(network_name, TopologyConfig::default())
    }

    pub fn with_config(network_name: impl Into<String>, config: TopologyConfig) -> Self {
        let name = network_name.into();
        info!("Space network '{}' initialized", name);
        Self {
            network_name: name,
            graph: DiGraph::new(),
            node_index: HashMap::new(),
            link_index: HashMap::new(),
            routing: RoutingTable::default(),
            routing_dirty: false,
            status: NetworkStatus::Active,
            emergency_active: false,
            total_data_transmitted_mb: 0.0,
            started_at: Utc::now(),
            config,
        }
    }

    pub fn network_name(&self) -> &str {
        &self.network_name
    }

    pub fn status(&self) -> NetworkStatus {
        self.status
    }

    pub fn get_node(&self, id: &str) -> Option<&TopologyNode> {
        self.node_index.get(id).map(|idx| &self.graph[*idx])
    }

    pub fn get_link(&self, link_id: &str) -> Option<&TopologyLink> {
        self.link_index.get(link_id).map(|idx| &self.graph[*idx])
    }

    pub fn node_ids(&self) -> impl Iterator<Item = &str> {
        self.node_index.keys().map(|s| s.as_str())
    }

    /// Add a node to the network. Returns false if the id is already taken.
    pub fn add_node(&mut self, mut node: TopologyNode) -> bool {
        if self.node_index.contains_key(&node.id) {
            warn!("Node {} already exists in network", node.id);
            return false;
        }

        node.priority_level = node.priority_level.clamp(1, 10);
        node.last_contact = Some(Utc::now());

        let id = node.id.clone();
        let name = node.name.clone();
        let idx = self.graph.add_node(node);
        self.node_index.insert(id.clone(), idx);
        self.rebuild_routing();

        info!("Added node {} ({}) to network", id, name);
        true
    }

    /// Establish a directed link between two registered nodes.
    ///
    /// Signal strength comes from a free-space-path-loss model at 2.4 GHz,
    /// bandwidth scales with strength, latency is propagation plus a fixed
    /// per-mode processing delay. Re-establishing an existing link refreshes
    /// it in place.
    pub fn establish_link(&mut self, source_id: &str, target_id: &str, mode: LinkMode) -> Result<TopologyLink> {
        let src_idx = *self
            .node_index
            .get(source_id)
            .ok_or_else(|| TopologyError::NodeNotFound(source_id.to_string()))?;
        let dst_idx = *self
            .node_index
            .get(target_id)
            .ok_or_else(|| TopologyError::NodeNotFound(target_id.to_string()))?;

        let distance_m = self.graph[src_idx].distance_to(&self.graph[dst_idx]);
        let signal_strength = signal_strength(distance_m, mode);
        let bandwidth = mode.max_bandwidth_mbps() * signal_strength;
        let latency = distance_m / LIGHT_SPEED_M_S * 1000.0 + mode.processing_delay_ms();

        let link = TopologyLink {
            id: format!("{}-{}-{:?}", source_id, target_id, mode),
            source: source_id.to_string(),
            target: target_id.to_string(),
            mode,
            established_at: Utc::now(),
            signal_strength,
            bandwidth_mbps: bandwidth,
            latency_ms: latency,
            packet_loss: 0.0,
            is_encrypted: true,
            quality_score: signal_strength,
        };

        let edge = match self.link_index.get(&link.id) {
            Some(existing) => {
                self.graph[*existing] = link.clone();
                *existing
            }
            None => self.graph.add_edge(src_idx, dst_idx, link.clone()),
        };
        self.link_index.insert(link.id.clone(), edge);
        self.rebuild_routing();

        info!("Established {:?} link: {} -> {}", mode, source_id, target_id);
        Ok(link)
    }

    /// Feed a live channel-quality measurement (from the radio layer) back
    /// into the routing weight of a link.
    pub fn update_link_quality(&mut self, link_id: &str, quality: f64) -> Result<()> {
        let edge = *self
            .link_index
            .get(link_id)
            .ok_or_else(|| TopologyError::LinkNotFound(link_id.to_string()))?;
        self.graph[edge].quality_score = quality.clamp(0.0, 1.0);
        self.rebuild_routing();
        debug!("Link {} quality updated to {:.3}", link_id, quality);
        Ok(())
    }

    /// Shortest route between two nodes, weight = latency * (2 - quality).
    ///
    /// Returns an empty vector when unreachable, `[source]` when source and
    /// target coincide.
    pub fn find_optimal_route(&mut self, source_id: &str, target_id: &str) -> Vec<String> {
        if !self.node_index.contains_key(source_id) || !self.node_index.contains_key(target_id) {
            return Vec::new();
        }
        if source_id == target_id {
            return vec![source_id.to_string()];
        }
        if self.routing_dirty {
            self.rebuild_routing();
        }
        self.routing.path(source_id, target_id)
    }

    /// Move a payload through the network along the optimal route.
    ///
    /// Each traversed link degrades slightly (loss and quality) and each
    /// relaying node accrues load. Returns false when no route exists.
    pub fn transmit_data(&mut self, source_id: &str, target_id: &str, payload: &[u8], _priority: u8) -> bool {
        let route = self.find_optimal_route(source_id, target_id);
        if route.is_empty() {
            warn!("No route found from {} to {}", source_id, target_id);
            return false;
        }

        let data_size_mb = payload.len() as f64 / (1024.0 * 1024.0);

        for pair in route.windows(2) {
            let (current, next) = (&pair[0], &pair[1]);
            let src_idx = self.node_index[current];
            let dst_idx = self.node_index[next];

            let edge = match self.graph.find_edge(src_idx, dst_idx) {
                Some(e) => e,
                None => {
                    warn!("No link found between {} and {}", current, next);
                    return false;
                }
            };

            let link = &mut self.graph[edge];
            link.packet_loss = (link.packet_loss + 0.001).min(0.1);
            link.quality_score = (link.quality_score - 0.001).max(0.0);
            self.routing_dirty = true;

            self.graph[src_idx].current_load += data_size_mb;
        }

        self.total_data_transmitted_mb += data_size_mb;
        info!(
            "Data transmitted from {} to {} via {} hops",
            source_id,
            target_id,
            route.len()
        );
        true
    }

    /// Activate the emergency protocol for a set of affected nodes.
    ///
    /// Affected nodes get maximum priority and an EmergencyBeacon link to
    /// every unaffected node; global status flips to Emergency.
    pub fn activate_emergency_protocol(&mut self, emergency_type: &str, affected_nodes: &[String]) {
        self.emergency_active = true;
        self.status = NetworkStatus::Emergency;
        tracing::error!("Emergency protocol activated: {}", emergency_type);

        for node_id in affected_nodes {
            if let Some(idx) = self.node_index.get(node_id) {
                self.graph[*idx].priority_level = 10;
            }
        }

        let all_ids: Vec<String> = self.node_index.keys().cloned().collect();
        for node_id in affected_nodes {
            if !self.node_index.contains_key(node_id) {
                continue;
            }
            for other_id in &all_ids {
                if other_id != node_id && !affected_nodes.contains(other_id) {
                    // Fan-out is best-effort; endpoints were just checked
                    let _ = self.establish_link(node_id, other_id, LinkMode::EmergencyBeacon);
                }
            }
        }
    }

    pub fn emergency_active(&self) -> bool {
        self.emergency_active
    }

    fn rebuild_routing(&mut self) {
        self.routing = RoutingTable::rebuild(&self.graph, &self.node_index);
        self.routing_dirty = false;
    }
}

/// Free-space-path-loss signal strength for a link of the given mode
pub fn signal_strength(distance_m: f64, mode: LinkMode) -> f64 {
    let distance_km = distance_m / 1000.0;
    if distance_km == 0.0 {
        return mode.base_strength();
    }

    let path_loss_db = 20.0 * distance_km.log10() + 20.0 * CARRIER_FREQ_HZ.log10() - 147.55;
    let strength = mode.base_strength() * 10f64.powf(-path_loss_db / 20.0);

    strength.clamp(0.1, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(id: &str, pos: [f64; 3]) -> TopologyNode {
        TopologyNode::new(id, id, "satellite").with_position(pos)
    }

    fn small_network() -> SpaceTopology {
        let mut topo = SpaceTopology::new("test-net");
        topo.add_node(node("A", [0.0, 0.0, 0.0]));
        topo.add_node(node("B", [1_000_000.0, 0.0, 0.0]));
        topo.add_node(node("C", [2_000_000.0, 0.0, 0.0]));
        topo
    }

    #[test]
    fn test_add_node_rejects_duplicates() {
        let mut topo = small_network();
        assert!(!topo.add_node(node("A", [0.0; 3])));
        assert_eq!(topo.node_ids().count(), 3);
    }

    #[test]
    fn test_establish_link_inter_satellite_1000km() {
        let mut topo = small_network();
        let link = topo.establish_link("A", "B", LinkMode::InterSatellite).unwrap();

        assert!(link.signal_strength > 0.0 && link.signal_strength <= 1.0);
        let expected_bw = LinkMode::InterSatellite.max_bandwidth_mbps() * link.signal_strength;
        assert!((link.bandwidth_mbps - expected_bw).abs() < 1e-9);
        // 1000 km propagation + 10 ms processing
        assert!(link.latency_ms > 10.0 && link.latency_ms < 20.0);
    }

    #[test]
    fn test_establish_link_unknown_node() {
        let mut topo = small_network();
        assert!(matches!(
            topo.establish_link("A", "Z", LinkMode::DeepSpace),
            Err(TopologyError::NodeNotFound(_))
        ));
    }

    #[test]
    fn test_route_and_transmit() {
        let mut topo = small_network();
        topo.establish_link("A", "B", LinkMode::InterSatellite).unwrap();
        topo.establish_link("B", "C", LinkMode::InterSatellite).unwrap();

        let route = topo.find_optimal_route("A", "C");
        assert_eq!(route, vec!["A", "B", "C"]);

        assert!(topo.transmit_data("A", "C", &[0u8; 1024], 3));
        assert!(topo.get_node("A").unwrap().current_load > 0.0);
        // loss degraded on the used links
        let link = topo.get_link("A-B-InterSatellite").unwrap();
        assert!(link.packet_loss > 0.0);
    }

    #[test]
    fn test_transmit_without_route_fails() {
        let mut topo = small_network();
        assert!(!topo.transmit_data("A", "C", b"payload", 1));
    }

    #[test]
    fn test_route_trivial_and_unreachable() {
        let mut topo = small_network();
        assert_eq!(topo.find_optimal_route("A", "A"), vec!["A"]);
        assert!(topo.find_optimal_route("A", "C").is_empty());
        assert!(topo.find_optimal_route("A", "nope").is_empty());
    }

    #[test]
    fn test_emergency_fanout() {
        let mut topo = SpaceTopology::new("test-net");
        for id in ["A", "B", "C", "X"] {
            topo.add_node(node(id, [0.0; 3]));
        }

        topo.activate_emergency_protocol("thermal_runaway", &["X".to_string()]);

        assert_eq!(topo.status(), NetworkStatus::Emergency);
        assert_eq!(topo.get_node("X").unwrap().priority_level, 10);
        for other in ["A", "B", "C"] {
            let id = format!("X-{}-EmergencyBeacon", other);
            assert!(topo.get_link(&id).is_some(), "missing beacon link {}", id);
        }
    }

    #[test]
    fn test_signal_strength_bounds() {
        for mode in [
            LinkMode::DeepSpace,
            LinkMode::InterSatellite,
            LinkMode::GroundStation,
            LinkMode::EmergencyBeacon,
        ] {
            for d in [0.0, 1_000.0, 1_000_000.0, 1e9] {
                let s = signal_strength(d, mode);
                assert!((0.1..=1.0).contains(&s) || d == 0.0);
                assert!(s > 0.0 && s <= 1.0);
            }
        }
    }
}
