use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::overlay::address::Address;
use crate::overlay::overlay::Overlay;
use crate::overlay::packet::{Packet, RoutingMode};
use crate::reqrep::frame::Frame;

/// An [Overlay] that delivers nothing and records every packet that is sent through it.
#[derive(Debug)]
pub struct TrackingOverlay {
    myself: Address,
    tracker: Arc<RwLock<Vec<Packet>>>,
}
impl TrackingOverlay {
    pub const DEFAULT_TTL: u16 = 7;

    pub fn new(myself: Address) -> Self {
        TrackingOverlay {
            myself,
            tracker: Default::default(),
        }
    }

    /// removes and returns all packets that were sent so far
    pub async fn take_sent_packets(&self) -> Vec<Packet> {
        std::mem::take(&mut *self.tracker.write().await)
    }

    /// Checks the oldest packet that was not checked yet, decoding its payload as a frame.
    pub async fn assert_frame_sent(&self, to: Address, routing: RoutingMode, frame: Frame) {
        let mut lock = self.tracker.write().await;
        if lock.is_empty() {
            panic!("no packet was sent");
        }

        let actual = lock.remove(0);
        assert_eq!(actual.source, self.myself);
        assert_eq!(actual.destination, to);
        assert_eq!(actual.routing, routing);
        assert_eq!(actual.ttl, Self::DEFAULT_TTL);

        match Frame::deser(&actual.payload) {
            Ok(actual_frame) => assert_eq!(actual_frame, frame),
            Err(e) => panic!("expected frame {:?}, packet payload could not be decoded: {}", frame, e),
        }
    }

    pub async fn assert_no_remaining_packets(&self) {
        let lock = self.tracker.read().await;
        assert!(lock.is_empty(), "unexpected packets: {:?}", lock);
    }
}

#[async_trait]
impl Overlay for TrackingOverlay {
    fn local_addr(&self) -> Address {
        self.myself
    }

    fn default_ttl_for(&self, _destination: &Address) -> u16 {
        Self::DEFAULT_TTL
    }

    async fn send(&self, packet: Packet) {
        self.tracker.write().await.push(packet);
    }
}
