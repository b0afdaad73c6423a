use std::fmt::{Debug, Formatter};

pub const ADDRESS_LEN: usize = 20;

/// An [Address] identifies a node in the overlay's 160 bit address space. Addresses are
///  opaque to the request / reply layer except for equality checks: it only needs to know
///  whether it was the exact destination of a packet, and whether an error frame came from the
///  node a request was sent to.
///
/// The XOR distance is what the (simulated) overlay uses for greedy delivery.
#[derive(Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct Address(pub [u8; ADDRESS_LEN]);

impl Debug for Address {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "[")?;
        for b in &self.0 {
            write!(f, "{:02x}", b)?;
        }
        write!(f, "]")
    }
}

impl Address {
    pub fn from_u64(value: u64) -> Address {
        let mut raw = [0u8; ADDRESS_LEN];
        raw[ADDRESS_LEN - 8..].copy_from_slice(&value.to_be_bytes());
        Address(raw)
    }

    /// XOR distance, compared lexicographically (i.e. as a big-endian 160 bit number)
    pub fn distance(&self, other: &Address) -> [u8; ADDRESS_LEN] {
        let mut result = [0u8; ADDRESS_LEN];
        for (i, r) in result.iter_mut().enumerate() {
            *r = self.0[i] ^ other.0[i];
        }
        result
    }
}
