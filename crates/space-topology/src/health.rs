//! Network health aggregation and the global status state machine

use crate::{NetworkStatus, SpaceTopology};
use chrono::{Duration, Utc};
use petgraph::visit::EdgeRef;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Point-in-time health snapshot of the whole network
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkHealth {
    pub network_status: NetworkStatus,
    pub active_nodes: usize,
    pub total_nodes: usize,
    pub node_availability: f64,
    pub active_links: usize,
    pub total_links: usize,
    /// Active = established within `link_timeout`. Note this keys off
    /// establishment time, not last successful use, so an old but busy
    /// link reports stale.
    pub link_availability: f64,
    pub avg_signal_strength: f64,
    pub avg_latency_ms: f64,
    pub total_bandwidth_mbps: f64,
    pub data_transmitted_gb: f64,
    pub uptime_hours: f64,
    pub emergency_active: bool,
}

impl SpaceTopology {
    /// Aggregate node/link health and advance the global status.
    ///
    /// Active/Degraded/Offline follow node availability; Emergency is
    /// entered only through `activate_emergency_protocol` and is sticky
    /// until the emergency is stood down.
    pub fn monitor_network_health(&mut self) -> NetworkHealth {
        let now = Utc::now();
        let link_timeout = Duration::seconds(self.config.link_timeout_secs);

        let total_nodes = self.graph.node_count();
        let active_nodes = self
            .graph
            .node_weights()
            .filter(|n| n.status == NetworkStatus::Active)
            .count();

        let total_links = self.graph.edge_count();
        let active_links = self
            .graph
            .edge_references()
            .filter(|e| now - e.weight().established_at < link_timeout)
            .count();

        let (mut signal_sum, mut latency_sum, mut bandwidth_sum) = (0.0, 0.0, 0.0);
        for edge in self.graph.edge_references() {
            signal_sum += edge.weight().signal_strength;
            latency_sum += edge.weight().latency_ms;
            bandwidth_sum += edge.weight().bandwidth_mbps;
        }

        let node_availability = if total_nodes > 0 {
            active_nodes as f64 / total_nodes as f64
        } else {
            0.0
        };
        let link_availability = if total_links > 0 {
            active_links as f64 / total_links as f64
        } else {
            0.0
        };

        self.advance_status(node_availability, total_nodes);

        NetworkHealth {
            network_status: self.status,
            active_nodes,
            total_nodes,
            node_availability,
            active_links,
            total_links,
            link_availability,
            avg_signal_strength: if total_links > 0 { signal_sum / total_links as f64 } else { 0.0 },
            avg_latency_ms: if total_links > 0 { latency_sum / total_links as f64 } else { 0.0 },
            total_bandwidth_mbps: bandwidth_sum,
            data_transmitted_gb: self.total_data_transmitted_mb / 1024.0,
            uptime_hours: (now - self.started_at).num_seconds() as f64 / 3600.0,
            emergency_active: self.emergency_active,
        }
    }

    /// Mark a node's operational status (health monitor / ops input).
    pub fn set_node_status(&mut self, node_id: &str, status: NetworkStatus) -> crate::Result<()> {
        let idx = *self
            .node_index
            .get(node_id)
            .ok_or_else(|| crate::TopologyError::NodeNotFound(node_id.to_string()))?;
        self.graph[idx].status = status;
        self.graph[idx].last_contact = Some(Utc::now());
        Ok(())
    }

    /// Leave the Emergency state; availability thresholds take over again
    /// at the next health pass.
    pub fn stand_down_emergency(&mut self) {
        if self.emergency_active {
            self.emergency_active = false;
            self.status = NetworkStatus::Degraded;
            warn!("Emergency protocol stood down");
        }
    }

    fn advance_status(&mut self, node_availability: f64, total_nodes: usize) {
        if self.emergency_active {
            return;
        }

        let next = if total_nodes == 0 || node_availability <= self.config.offline_threshold {
            NetworkStatus::Offline
        } else if node_availability < self.config.degraded_threshold {
            NetworkStatus::Degraded
        } else {
            NetworkStatus::Active
        };

        if next != self.status {
            warn!("Network status {:?} -> {:?}", self.status, next);
            self.status = next;
        }
    }
}
