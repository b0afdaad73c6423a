//! An in-process overlay for tests and demos. Packets are delivered by spawned tokio tasks,
//!  with configurable loss, duplication and latency, so they can arrive out of order.

use std::collections::BTreeMap;
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use rustc_hash::FxHashMap;
use tokio::sync::{broadcast, RwLock};
use tokio::time;
use tracing::trace;

use crate::overlay::address::Address;
use crate::overlay::overlay::{Overlay, PacketHandler};
use crate::overlay::overlay_events::{OverlayEvent, OverlayEventNotifier};
use crate::overlay::packet::{Packet, RoutingMode};
use crate::overlay::protocol_id::ProtocolId;
use crate::util::random::{Random, RngRandom};

#[derive(Debug, Clone)]
pub struct NetworkConditions {
    /// probability that a packet is dropped
    pub loss_probability: f64,
    /// probability that a packet that is not dropped is delivered twice
    pub duplication_probability: f64,
    pub min_latency: Duration,
    pub max_latency: Duration,
}
impl Default for NetworkConditions {
    fn default() -> Self {
        NetworkConditions {
            loss_probability: 0.0,
            duplication_probability: 0.0,
            min_latency: Duration::from_millis(5),
            max_latency: Duration::from_millis(20),
        }
    }
}

pub struct SimulatedNetwork {
    conditions: NetworkConditions,
    nodes: RwLock<BTreeMap<Address, Arc<SimulatedNode>>>,
}

impl SimulatedNetwork {
    pub fn new(conditions: NetworkConditions) -> Arc<SimulatedNetwork> {
        Arc::new(SimulatedNetwork {
            conditions,
            nodes: Default::default(),
        })
    }

    pub async fn add_node(self: &Arc<Self>, address: Address) -> Arc<SimulatedNode> {
        let node = Arc::new(SimulatedNode {
            address,
            network: Arc::downgrade(self),
            handlers: Default::default(),
            events: OverlayEventNotifier::new(),
        });
        self.nodes.write().await
            .insert(address, node.clone());
        node
    }

    pub async fn remove_node(&self, address: &Address) {
        self.nodes.write().await
            .remove(address);
    }

    fn transmit(self: Arc<Self>, packet: Packet) {
        if packet.ttl == 0 {
            trace!("dropping packet to {:?}: ttl exhausted", packet.destination);
            return;
        }
        if RngRandom::chance(self.conditions.loss_probability) {
            trace!("simulated loss of packet from {:?} to {:?}", packet.source, packet.destination);
            return;
        }

        let num_copies = if RngRandom::chance(self.conditions.duplication_probability) { 2 } else { 1 };
        for _ in 0..num_copies {
            let network = self.clone();
            let packet = packet.clone();
            let latency = self.random_latency();
            tokio::spawn(async move {
                time::sleep(latency).await;
                network.deliver(packet).await;
            });
        }
    }

    fn random_latency(&self) -> Duration {
        RngRandom::duration_between(self.conditions.min_latency, self.conditions.max_latency)
    }

    async fn deliver(&self, packet: Packet) {
        let target = {
            let nodes = self.nodes.read().await;
            match packet.routing {
                RoutingMode::Exact => nodes.get(&packet.destination).cloned(),
                RoutingMode::Greedy => nodes.values()
                    .min_by_key(|n| n.address.distance(&packet.destination))
                    .cloned(),
            }
        };

        match target {
            Some(node) => node.on_packet(packet).await,
            None => trace!("no node for packet to {:?} - dropping", packet.destination),
        }
    }
}

/// A node's view of the simulated network
pub struct SimulatedNode {
    address: Address,
    network: Weak<SimulatedNetwork>,
    handlers: RwLock<FxHashMap<ProtocolId, Arc<dyn PacketHandler>>>,
    events: OverlayEventNotifier,
}

impl SimulatedNode {
    pub async fn register_handler(&self, handler: Arc<dyn PacketHandler>) {
        self.handlers.write().await
            .insert(handler.protocol(), handler);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<OverlayEvent> {
        self.events.subscribe()
    }

    pub fn attach(&self) {
        self.events.send_event(OverlayEvent::Attached);
    }

    pub fn detach(&self) {
        self.events.send_event(OverlayEvent::Detached);
    }

    async fn on_packet(&self, packet: Packet) {
        let handler = self.handlers.read().await
            .get(&packet.protocol)
            .cloned();

        match handler {
            Some(handler) => handler.on_packet(packet).await,
            None => trace!("no handler for protocol {:?} on {:?}", packet.protocol, self.address),
        }
    }
}

#[async_trait]
impl Overlay for SimulatedNode {
    fn local_addr(&self) -> Address {
        self.address
    }

    fn default_ttl_for(&self, _destination: &Address) -> u16 {
        16
    }

    async fn send(&self, packet: Packet) {
        if let Some(network) = self.network.upgrade() {
            network.transmit(packet);
        }
    }
}
