use bytes::Bytes;

use crate::overlay::address::Address;
use crate::overlay::protocol_id::ProtocolId;

/// Routing options the overlay honors for a packet. The request / reply layer does not
///  interpret them, it just forwards the caller's choice.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub enum RoutingMode {
    /// best effort: deliver to the node closest to the destination address
    Greedy,
    /// deliver only to the node that owns the destination address, drop otherwise
    Exact,
}

/// A packet as the overlay delivers it. The payload is opaque to the overlay.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Packet {
    pub source: Address,
    pub destination: Address,
    /// hop budget, see [crate::overlay::overlay::Overlay::default_ttl_for]
    pub ttl: u16,
    pub routing: RoutingMode,
    pub protocol: ProtocolId,
    pub payload: Bytes,
}
