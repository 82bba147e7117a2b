// Constellation Simulation
// Exercises the full stack end to end: topology + routing, adaptive
// multiband radio with channel-quality feedback into link weights, and
// a reliable transport round trip over a relay.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use tracing::{info, warn};

use deep_space_transport::{
    DeepSpaceProtocol, NeighborLink, PacketType, Priority, RoutingUpdate,
};
use multiband_radio::{
    ChannelModel, FrequencyBand, MultibandRadio, QosRequirements, SimulatedChannel,
    TransmissionRequest,
};
use space_topology::{LinkMode, SpaceTopology, TopologyNode};

const EARTH_GS: &str = "earth-gs";
const RELAY_1: &str = "relay-1";
const RELAY_2: &str = "relay-2";
const MARS_ORBITER: &str = "mars-orbiter";

/// In-memory neighbor link: frames queue up per target node and the
/// simulation loop pumps them into the destination engine.
struct QueueLink {
    outbox: Mutex<VecDeque<(String, Vec<u8>)>>,
}

impl QueueLink {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            outbox: Mutex::new(VecDeque::new()),
        })
    }

    fn drain(&self) -> Vec<(String, Vec<u8>)> {
        self.outbox.lock().unwrap().drain(..).collect()
    }
}

impl NeighborLink for QueueLink {
    fn transmit(&self, neighbor_id: &str, frame: &[u8]) -> bool {
        self.outbox
            .lock()
            .unwrap()
            .push_back((neighbor_id.to_string(), frame.to_vec()));
        true
    }
}

type Node = (DeepSpaceProtocol, Arc<QueueLink>);

/// Shuttle queued frames between engines until the network goes quiet.
async fn pump(nodes: &HashMap<String, Node>) {
    loop {
        let mut moved = false;
        for (_, (_, link)) in nodes.iter() {
            for (target, frame) in link.drain() {
                if let Some((engine, _)) = nodes.get(&target) {
                    engine.receive_packet(&frame).await;
                    moved = true;
                } else {
                    warn!("Frame addressed to unknown node {}", target);
                }
            }
        }
        if !moved {
            break;
        }
    }
}

fn build_topology() -> Result<SpaceTopology> {
    let mut topology = SpaceTopology::new("iost-demo");

    topology.add_node(
        TopologyNode::new(EARTH_GS, "Earth Ground Station", "ground_station")
            .with_position([0.0, 0.0, 0.0])
            .with_priority(10),
    );
    topology.add_node(
        TopologyNode::new(RELAY_1, "GEO Relay 1", "satellite")
            .with_position([4.2e7, 0.0, 0.0])
            .with_priority(7),
    );
    topology.add_node(
        TopologyNode::new(RELAY_2, "Lunar Relay", "satellite")
            .with_position([3.8e8, 1.0e7, 0.0])
            .with_priority(7),
    );
    topology.add_node(
        TopologyNode::new(MARS_ORBITER, "Mars Orbiter", "orbiter")
            .with_position([2.2e11, 0.0, 0.0])
            .with_priority(8),
    );

    // Links in both directions so routing works for the ACK path too.
    for (a, b, mode) in [
        (EARTH_GS, RELAY_1, LinkMode::GroundStation),
        (RELAY_1, RELAY_2, LinkMode::InterSatellite),
        (RELAY_2, MARS_ORBITER, LinkMode::DeepSpace),
    ] {
        topology.establish_link(a, b, mode)?;
        topology.establish_link(b, a, mode)?;
    }

    Ok(topology)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "constellation_sim=info".to_string()),
        )
        .init();

    // --- Topology & routing ---
    let mut topology = build_topology()?;
    let route = topology.find_optimal_route(EARTH_GS, MARS_ORBITER);
    info!("Optimal route {} -> {}: {:?}", EARTH_GS, MARS_ORBITER, route);

    // --- Adaptive radio on the inter-satellite hop ---
    let channel = Arc::new(SimulatedChannel::new());
    let radio = MultibandRadio::new(
        "relay-1-radio",
        FrequencyBand::ALL.to_vec(),
        channel.clone(),
    );

    let request = TransmissionRequest {
        request_id: "sim-xfer-1".into(),
        source: RELAY_1.into(),
        destination: RELAY_2.into(),
        data_size: 16 * 1024,
        qos: QosRequirements::default(),
        priority: 7,
        deadline: None,
        preferred_bands: Vec::new(),
    };
    let band = radio
        .select_optimal_band(&request, &HashMap::new())
        .await
        .unwrap_or(FrequencyBand::Microwave);
    info!("Selected {} band for inter-satellite hop", band.name());

    // The simulated channel is stochastic; a few assessments may fall
    // below the quality gate before one passes.
    let mut radio_link = None;
    for _ in 0..200 {
        if let Some(link) = radio.establish_link(RELAY_1, RELAY_2, band, &request.qos) {
            radio_link = Some(link);
            break;
        }
    }

    let isl_id = format!("{}-{}-{:?}", RELAY_1, RELAY_2, LinkMode::InterSatellite);
    match &radio_link {
        Some(link) => {
            let report = radio
                .adaptive_transmission(&link.link_id, &vec![0u8; request.data_size])
                .await?;
            info!(
                "Radio transfer: success={} bytes={} retransmissions={}",
                report.success, report.bytes_transmitted, report.retransmissions
            );

            // Feed measured channel quality back into routing weights.
            let quality = channel.assess(band).link_quality_score;
            topology.update_link_quality(&isl_id, quality)?;
            info!("Fed radio quality {:.2} back into {}", quality, isl_id);

            let mitigation = radio
                .cognitive_interference_mitigation(&[link.link_id.clone()])
                .await;
            info!("Interference mitigation: {:?}", mitigation);
        }
        None => warn!("Channel never cleared the quality gate, keeping static weights"),
    }

    // --- Reliable transport round trip over the relay ---
    let mut nodes: HashMap<String, Node> = HashMap::new();
    for id in [EARTH_GS, RELAY_1, MARS_ORBITER] {
        let link = QueueLink::new();
        nodes.insert(id.to_string(), (DeepSpaceProtocol::new(id, link.clone()), link));
    }

    let updates = vec![
        (EARTH_GS, vec![RELAY_1], vec![(MARS_ORBITER, RELAY_1)]),
        (
            RELAY_1,
            vec![EARTH_GS, MARS_ORBITER],
            vec![(MARS_ORBITER, MARS_ORBITER), (EARTH_GS, EARTH_GS)],
        ),
        (MARS_ORBITER, vec![RELAY_1], vec![(EARTH_GS, RELAY_1)]),
    ];
    for (id, neighbors, routes) in updates {
        let update = RoutingUpdate {
            neighbors: neighbors.into_iter().map(String::from).collect(),
            routes: routes
                .iter()
                .map(|(d, h)| (d.to_string(), h.to_string()))
                .collect(),
        };
        nodes[id].0.update_routing_table(&update);
    }

    // Reliable DATA to a direct neighbor: the relay's ACK clears the
    // pending entry on the ground station.
    let sent = nodes[EARTH_GS]
        .0
        .send_packet(
            RELAY_1,
            b"uplink schedule: pass window 0420-0435Z",
            PacketType::Data,
            Priority::High,
        )
        .await;
    info!("DATA packet dispatched to relay: {}", sent);

    // Emergency traffic is forwarded hop by hop all the way to Mars.
    let sent = nodes[EARTH_GS]
        .0
        .send_packet(
            MARS_ORBITER,
            b"solar flare warning: safe-mode all instruments",
            PacketType::Emergency,
            Priority::Emergency,
        )
        .await;
    info!("EMERGENCY packet dispatched to Mars: {}", sent);

    pump(&nodes).await;

    for packet in nodes[RELAY_1].0.take_delivered() {
        info!(
            "Relay received packet {} ({} bytes)",
            packet.packet_id,
            packet.payload.len()
        );
    }
    for packet in nodes[MARS_ORBITER].0.take_delivered() {
        info!(
            "Mars orbiter received packet {} ({} bytes) via {:?}",
            packet.packet_id,
            packet.payload.len(),
            packet.route_history
        );
    }

    // Give the ACK bookkeeping a beat, then confirm nothing is pending.
    tokio::time::sleep(Duration::from_millis(50)).await;
    let earth_stats = nodes[EARTH_GS].0.get_statistics();
    info!(
        "Earth stats: sent={} received={} pending_acks={}",
        earth_stats.packets_sent, earth_stats.packets_received, earth_stats.pending_acks
    );

    // --- Emergency fan-out and health report ---
    topology.activate_emergency_protocol("solar_flare", &[RELAY_2.to_string()]);
    let health = topology.monitor_network_health();
    println!("{}", serde_json::to_string_pretty(&health)?);
    println!("{}", serde_json::to_string_pretty(&radio.get_radio_status())?);
    println!("{}", serde_json::to_string_pretty(&earth_stats)?);

    for (_, (engine, _)) in nodes.iter() {
        engine.shutdown();
    }

    Ok(())
}
