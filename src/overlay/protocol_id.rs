use std::fmt::{Debug, Formatter};

/// A [ProtocolId] is carried in every overlay packet to identify the [PacketHandler] that
///  receives it on the destination node.
///
/// An id is technically a u64, but it is intended to be used as a sequence of up to eight ASCII
///  characters to give it a human-readable name, both for uniqueness and for debugging at the
///  wire level.
///
/// [PacketHandler]: crate::overlay::overlay::PacketHandler
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct ProtocolId(pub u64);

impl ProtocolId {
    /// request / reply frames, see [ReqrepManager](crate::reqrep::manager::ReqrepManager)
    pub const REQREP: ProtocolId = ProtocolId::new(b"ReqRep\0\0");

    pub const fn new(value: &[u8; 8]) -> ProtocolId {
        Self(u64::from_be_bytes(*value))
    }
}

impl Debug for ProtocolId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let bytes = self.0.to_be_bytes();
        let used = bytes.iter()
            .position(|&b| b == 0)
            .map(|len| &bytes[..len])
            .unwrap_or(&bytes);

        let string_repr = std::str::from_utf8(used).unwrap_or("???");

        write!(f, "0x{:016X}({:?})", self.0, string_repr)
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;
    use super::*;

    #[rstest]
    #[case::reqrep(ProtocolId::REQREP, "0x5265715265700000(\"ReqRep\")")]
    #[case::full(ProtocolId::new(b"abcdefgh"), "0x6162636465666768(\"abcdefgh\")")]
    #[case::empty(ProtocolId::new(b"\0\0\0\0\0\0\0\0"), "0x0000000000000000(\"\")")]
    fn test_id_debug(#[case] id: ProtocolId, #[case] expected: &str) {
        let formatted = format!("{:?}", id);
        assert_eq!(&formatted, expected);
    }

    #[test]
    fn test_reqrep_id_is_distinct() {
        assert_ne!(ProtocolId::REQREP, ProtocolId::new(b"ReqRep\0\x01"));
        assert_eq!(ProtocolId::REQREP.0.to_be_bytes(), *b"ReqRep\0\0");
    }
}
