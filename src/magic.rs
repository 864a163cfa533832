use crate::common::{MacAddress, BROADCAST_MAC, MAC_ADDRESS_LEN};

const MAC_REPEAT: usize = 16;

/// Sync stream plus sixteen copies of the target address.
pub const MAGIC_PACKET_LEN: usize = (1 + MAC_REPEAT) * MAC_ADDRESS_LEN;

/// Reference Wake-on-LAN payload for one target, built once and compared
/// against every captured frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MagicPacket {
    target: MacAddress,
    pattern: [u8; MAGIC_PACKET_LEN],
}

impl MagicPacket {
    pub fn new(target: MacAddress) -> Self {
        let mut pattern = [0u8; MAGIC_PACKET_LEN];
        pattern[..MAC_ADDRESS_LEN].copy_from_slice(&BROADCAST_MAC);
        for k in 1..=MAC_REPEAT {
            let at = k * MAC_ADDRESS_LEN;
            pattern[at..at + MAC_ADDRESS_LEN].copy_from_slice(target.as_bytes());
        }

        Self { target, pattern }
    }

    pub fn target(&self) -> MacAddress {
        self.target
    }

    pub fn as_bytes(&self) -> &[u8; MAGIC_PACKET_LEN] {
        &self.pattern
    }

    /// Returns true if any contiguous window of `frame` is the magic packet.
    ///
    /// The payload is searched for at every offset rather than at a fixed one
    /// because VLAN tags and L3/L4 headers (UDP port 7/9 WOL) move it around.
    /// Windows not starting with the sync stream are rejected before the full
    /// compare.
    pub fn matches(&self, frame: &[u8]) -> bool {
        self.find(frame).is_some()
    }

    /// Offset of the first matching window, if any.
    pub fn find(&self, frame: &[u8]) -> Option<usize> {
        if frame.len() < MAGIC_PACKET_LEN { return None; }

        frame
            .windows(MAGIC_PACKET_LEN)
            .position(|w| w[..MAC_ADDRESS_LEN] == BROADCAST_MAC && w == self.as_bytes())
    }
}
