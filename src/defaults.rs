/// Compiled-in deployment tables.
///
/// Addresses are in over-the-air byte order (least significant byte first),
/// the order the radio hands them to the scan callback.
///
/// Slots 0 and 1 are the range-capable anchors. Their addresses are not known
/// ahead of time, so they are left zero and matched by the board id in their
/// range marker instead.
use crate::config::{AnchorConfig, PeerConfig};

const fn anchor(index: u8, address: [u8; 6]) -> AnchorConfig {
    AnchorConfig {
        index,
        address,
        has_range_sensor: false,
        board_id: None,
    }
}

const fn ranged_anchor(index: u8, board_id: u8) -> AnchorConfig {
    AnchorConfig {
        index,
        address: [0; 6],
        has_range_sensor: true,
        board_id: Some(board_id),
    }
}

/// Anchor slots, in broadcast order.
pub static ANCHORS: &[AnchorConfig] = &[
    // === Range-capable anchors (board ids 1, 2) ===
    ranged_anchor(0, 1),
    ranged_anchor(1, 2),
    // === Passive beacons ===
    anchor(2, [0x8A, 0x14, 0x8F, 0x07, 0xFA, 0xF7]),
    anchor(3, [0x80, 0x17, 0xF3, 0x5A, 0x73, 0xD8]),
    anchor(4, [0x78, 0x8B, 0x23, 0xD3, 0x34, 0xF0]),
    anchor(5, [0x68, 0x70, 0x89, 0x63, 0xB1, 0xF4]),
    anchor(6, [0xFE, 0xFF, 0x82, 0x89, 0x1B, 0xCB]),
    anchor(7, [0x60, 0xCE, 0xDB, 0xE0, 0x0C, 0xCA]),
    anchor(8, [0x4A, 0x3E, 0xFA, 0x8D, 0xE0, 0xFD]),
    anchor(9, [0x04, 0x25, 0xFF, 0x57, 0xBD, 0xF9]),
    anchor(10, [0x58, 0xC4, 0x30, 0xDA, 0xEB, 0xEC]),
    anchor(11, [0x13, 0x20, 0x7C, 0xD4, 0x7F, 0xD4]),
    anchor(12, [0x0A, 0x80, 0x5C, 0xBA, 0x59, 0xE6]),
];

pub const MOBILE_WEARABLE: [u8; 6] = [0xAF, 0xDE, 0xCD, 0xD4, 0x38, 0xE1];
pub const MOBILE_DEVKIT: [u8; 6] = [0x4D, 0x5F, 0x62, 0xD7, 0x95, 0xCF];
pub const MOBILE_DONGLE: [u8; 6] = [0x1A, 0xDA, 0x64, 0xAA, 0x6C, 0xDC];

/// Mobile nodes known to each other and to the base node.
pub static MOBILES: &[PeerConfig] = &[
    PeerConfig { id: 0, address: MOBILE_WEARABLE },
    PeerConfig { id: 1, address: MOBILE_DEVKIT },
    PeerConfig { id: 2, address: MOBILE_DONGLE },
];

/// Households registered at boot: (id, residents).
pub static HOUSEHOLDS: &[(u16, &[[u8; 6]])] = &[(0, &[MOBILE_WEARABLE, MOBILE_DEVKIT])];

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::MAX_ANCHORS;

    #[test]
    fn anchor_table_is_dense_and_within_capacity() {
        assert!(ANCHORS.len() <= MAX_ANCHORS);
        for (i, a) in ANCHORS.iter().enumerate() {
            assert_eq!(a.index as usize, i);
        }
    }

    #[test]
    fn unknown_addresses_carry_board_ids() {
        for a in ANCHORS.iter().filter(|a| a.address == [0; 6]) {
            assert!(a.has_range_sensor);
            assert!(a.board_id.is_some());
        }
    }

    #[test]
    fn anchor_addresses_unique() {
        for (i, a) in ANCHORS.iter().enumerate() {
            if a.address == [0; 6] {
                continue;
            }
            for b in &ANCHORS[i + 1..] {
                assert_ne!(a.address, b.address);
            }
        }
    }

    #[test]
    fn household_members_are_known_mobiles() {
        for (_, residents) in HOUSEHOLDS {
            for r in residents.iter() {
                assert!(MOBILES.iter().any(|m| m.address == *r));
            }
        }
    }
}
