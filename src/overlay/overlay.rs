use async_trait::async_trait;
#[cfg(test)] use mockall::automock;

use crate::overlay::address::Address;
use crate::overlay::packet::Packet;
use crate::overlay::protocol_id::ProtocolId;

/// This is the part of an overlay node that protocol layers on top of it consume: packet
///  transmission without any delivery guarantees.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait Overlay: Send + Sync + 'static {
    fn local_addr(&self) -> Address;

    /// hop budget for packets sent to a given destination
    fn default_ttl_for(&self, destination: &Address) -> u16;

    /// Fire-and-forget: the packet may be dropped, duplicated, delayed or reordered, and there
    ///  is no notification either way.
    async fn send(&self, packet: Packet);
}

/// Packets are dispatched to handlers based on the [ProtocolId] in the packet. There is a single
///  handler per protocol id on a node.
#[async_trait]
pub trait PacketHandler: Send + Sync + 'static {
    fn protocol(&self) -> ProtocolId;

    /// This is called from the overlay's delivery context. Implementations must not block
    ///  indefinitely.
    async fn on_packet(&self, packet: Packet);
}
