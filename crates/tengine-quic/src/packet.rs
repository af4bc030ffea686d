//! Packet metadata consumed by the path manager.

use std::net::SocketAddr;

/// Packet number space a packet belongs to.
///
/// 0-RTT packets share the application space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EncryptionLevel {
    Initial,
    Handshake,
    Application,
}

impl EncryptionLevel {
    pub(crate) fn index(self) -> usize {
        match self {
            EncryptionLevel::Initial => 0,
            EncryptionLevel::Handshake => 1,
            EncryptionLevel::Application => 2,
        }
    }
}

/// What the path manager needs to know about a decrypted packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IncomingPacket {
    pub level: EncryptionLevel,
    /// Full packet number.
    pub pn: u64,
    /// Datagram bytes attributed to this packet.
    pub len: usize,
    /// Peer address the datagram came from.
    pub remote: SocketAddr,
    /// Sequence number of the local connection id it was addressed to.
    pub dcid_seq: u64,
    /// Whether every frame in the packet is a probing frame.
    pub probing: bool,
}

/// Recovers a full packet number from its truncated encoding
/// (RFC 9000, A.3).
pub fn decode_packet_number(largest: Option<u64>, truncated: u64, pn_len: usize) -> u64 {
    let bits = (pn_len.clamp(1, 4) * 8) as u32;
    let expected = largest.map_or(0, |l| l + 1);
    let win = 1u64 << bits;
    let hwin = win / 2;
    let mask = win - 1;

    let candidate = (expected & !mask) | (truncated & mask);
    if candidate + hwin <= expected && candidate < (1u64 << 62) - win {
        candidate + win
    } else if candidate > expected + hwin && candidate >= win {
        candidate - win
    } else {
        candidate
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_rfc_example() {
        assert_eq!(
            decode_packet_number(Some(0xa82f_30ea), 0x9b32, 2),
            0xa82f_9b32
        );
    }

    #[test]
    fn test_first_packet() {
        assert_eq!(decode_packet_number(None, 0, 1), 0);
        assert_eq!(decode_packet_number(None, 5, 1), 5);
    }

    #[test]
    fn test_wraps_backwards() {
        // expected 0x101, truncated 0xff is closer as 0xff than 0x1ff
        assert_eq!(decode_packet_number(Some(0x100), 0xff, 1), 0xff);
    }

    #[test]
    fn test_wraps_forwards() {
        assert_eq!(decode_packet_number(Some(0x1fe), 0x01, 1), 0x201);
    }

    #[test]
    fn test_level_indices_distinct() {
        let idx = [
            EncryptionLevel::Initial.index(),
            EncryptionLevel::Handshake.index(),
            EncryptionLevel::Application.index(),
        ];
        assert_eq!(idx, [0, 1, 2]);
    }

    proptest! {
        #[test]
        fn prop_recovers_pn_near_expected(
            largest in 0u64..(1 << 40),
            pn_len in 1usize..=4,
            offset in any::<u32>(),
        ) {
            let win = 1u64 << (pn_len * 8);
            let hwin = win / 2;
            let expected = largest + 1;
            // any pn in (expected - hwin, expected + hwin] is recoverable
            let low = expected.saturating_sub(hwin - 1);
            let high = expected + hwin;
            let pn = low + u64::from(offset) % (high - low + 1);
            prop_assert_eq!(decode_packet_number(Some(largest), pn & (win - 1), pn_len), pn);
        }
    }
}
