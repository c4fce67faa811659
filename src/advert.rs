/// Advertisement codec: what a node broadcasts and how a scanner reads it.
///
/// Every telemetry advertisement is three AD structures:
///
/// ```text
/// 02 01 06                 flags
/// 03 03 AA FE              complete 16-bit UUID list
/// 15 16 AA FE 00 00 <16>   service data: tag, frame type, power, payload
/// ```
///
/// so the 16-byte application payload always starts at offset 13 of the raw
/// AD buffer. Payloads are purely positional; there is no versioning.
use heapless::Vec;
use serde::Deserialize;

use crate::config::{AnchorConfig, PeerConfig};
use crate::error::{Error, Result};
use crate::registry::{AnchorRecord, MAX_ANCHORS};

/// Service tag carried in both the UUID list and the service data, wire order.
pub const SERVICE_TAG: [u8; 2] = [0xAA, 0xFE];

/// Frame type byte of the service-data header.
pub const FRAME_TYPE: u8 = 0x00;

/// Calibrated TX power byte of the service-data header.
pub const CALIBRATED_POWER: u8 = 0x00;

/// Service-data header length.
pub const HEADER_LEN: usize = 4;

/// Application bytes after the header.
pub const APP_PAYLOAD_LEN: usize = 16;

/// Full service-data length.
pub const FRAME_LEN: usize = HEADER_LEN + APP_PAYLOAD_LEN;

/// First two payload bytes of a range-reporting anchor.
pub const RANGE_MARKER: [u8; 2] = [0xF0, 0xBA];

/// Offset of the application payload inside the raw AD buffer.
pub const PAYLOAD_OFFSET: usize = 13;

/// Raw AD buffer length for one telemetry advertisement.
pub const AD_LEN: usize = 3 + 4 + 2 + FRAME_LEN;

const AD_FLAGS: u8 = 0x01;
const AD_UUID16_COMPLETE: u8 = 0x03;
const AD_SERVICE_DATA16: u8 = 0x16;
/// LE General Discoverable, BR/EDR not supported.
const FLAGS_GENERAL_NO_BREDR: u8 = 0x06;

/// Bytes per range value in a mobile node's payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RangeWidth {
    /// One byte, saturating at 255.
    #[default]
    Byte,
    /// Big-endian u16.
    Word,
}

impl RangeWidth {
    pub const fn bytes(self) -> usize {
        match self {
            RangeWidth::Byte => 1,
            RangeWidth::Word => 2,
        }
    }
}

/// Payload bytes a mobile node needs for this anchor table.
pub fn layout_len(anchors: &[AnchorConfig], width: RangeWidth) -> usize {
    let ranged = anchors.iter().filter(|a| a.has_range_sensor).count();
    anchors.len() + ranged * width.bytes()
}

/// 20 bytes of service data: header plus zero-padded application payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdvertisementFrame {
    payload: [u8; APP_PAYLOAD_LEN],
}

impl AdvertisementFrame {
    pub fn new(payload: &[u8]) -> Result<Self> {
        if payload.len() > APP_PAYLOAD_LEN {
            return Err(Error::PayloadOverflow);
        }
        let mut padded = [0u8; APP_PAYLOAD_LEN];
        padded[..payload.len()].copy_from_slice(payload);
        Ok(Self { payload: padded })
    }

    pub fn payload(&self) -> &[u8; APP_PAYLOAD_LEN] {
        &self.payload
    }

    /// Service-data bytes, header included.
    pub fn to_bytes(&self) -> [u8; FRAME_LEN] {
        let mut bytes = [0u8; FRAME_LEN];
        bytes[..2].copy_from_slice(&SERVICE_TAG);
        bytes[2] = FRAME_TYPE;
        bytes[3] = CALIBRATED_POWER;
        bytes[HEADER_LEN..].copy_from_slice(&self.payload);
        bytes
    }

    /// Raw AD structures for the radio.
    pub fn to_ad(&self) -> [u8; AD_LEN] {
        let mut ad = [0u8; AD_LEN];
        ad[..3].copy_from_slice(&[0x02, AD_FLAGS, FLAGS_GENERAL_NO_BREDR]);
        ad[3..5].copy_from_slice(&[0x03, AD_UUID16_COMPLETE]);
        ad[5..7].copy_from_slice(&SERVICE_TAG);
        ad[7] = (1 + FRAME_LEN) as u8;
        ad[8] = AD_SERVICE_DATA16;
        ad[9..].copy_from_slice(&self.to_bytes());
        ad
    }

    /// Find our service data in raw AD structures.
    ///
    /// Walks `[len][type][data..]` entries; a malformed entry ends the walk.
    /// Service data that is not ours, or shorter than a full frame, is
    /// ignored.
    pub fn from_ad(ad: &[u8]) -> Option<Self> {
        let mut pos = 0;
        while pos < ad.len() {
            let len = ad[pos] as usize;
            if len == 0 || pos + 1 + len > ad.len() {
                break;
            }

            let ad_type = ad[pos + 1];
            let data = &ad[pos + 2..pos + 1 + len];

            if ad_type == AD_SERVICE_DATA16 && data.len() >= FRAME_LEN && data[..2] == SERVICE_TAG {
                let mut payload = [0u8; APP_PAYLOAD_LEN];
                payload.copy_from_slice(&data[HEADER_LEN..FRAME_LEN]);
                return Some(Self { payload });
            }

            pos += 1 + len;
        }
        None
    }
}

// ── Encoding ──────────────────────────────────────────────────────────

/// What a node has to say this cycle.
#[derive(Debug, Clone, Copy)]
pub enum Telemetry<'a> {
    /// Mobile node: every anchor's RSSI in slot order, then the range of
    /// every range-capable anchor in slot order.
    Mobile {
        records: &'a [AnchorRecord],
        width: RangeWidth,
    },
    /// Range-capable anchor relaying its sensor reading.
    RangeReport { board_id: u8, range: u16 },
    /// Anchor without a sensor: presence only.
    Idle,
}

pub fn encode(telemetry: &Telemetry<'_>) -> Result<AdvertisementFrame> {
    let mut payload: Vec<u8, APP_PAYLOAD_LEN> = Vec::new();
    match *telemetry {
        Telemetry::Mobile { records, width } => {
            for r in records {
                payload
                    .push(r.last_rssi() as u8)
                    .map_err(|_| Error::PayloadOverflow)?;
            }
            for r in records.iter().filter(|r| r.has_range_sensor()) {
                let range = r.last_range();
                match width {
                    RangeWidth::Byte => payload
                        .push(range.min(u8::MAX as u16) as u8)
                        .map_err(|_| Error::PayloadOverflow)?,
                    RangeWidth::Word => payload
                        .extend_from_slice(&range.to_be_bytes())
                        .map_err(|_| Error::PayloadOverflow)?,
                }
            }
        }
        Telemetry::RangeReport { board_id, range } => {
            let [hi, lo] = range.to_be_bytes();
            // 5 bytes always fit
            let _ = payload.extend_from_slice(&[RANGE_MARKER[0], RANGE_MARKER[1], board_id, hi, lo]);
        }
        Telemetry::Idle => {}
    }
    AdvertisementFrame::new(&payload)
}

// ── Decoding ──────────────────────────────────────────────────────────

/// How a scanner should treat a sender.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SenderKind {
    /// Address matches a configured anchor; carries its slot.
    KnownAnchorByAddress(u8),
    /// Payload starts with the range marker; carries the board id.
    MarkerTaggedAnchor(u8),
    /// Address matches a configured mobile peer; carries its id.
    KnownPeerMobile(u8),
    Unrecognized,
}

/// Classify a sender: anchor address first, then range marker, then peers.
///
/// All-zero addresses in the anchor table mean "unknown" and never match.
pub fn classify(
    payload: Option<&[u8; APP_PAYLOAD_LEN]>,
    sender: &[u8; 6],
    anchors: &[AnchorConfig],
    peers: &[PeerConfig],
) -> SenderKind {
    if let Some(a) = anchors
        .iter()
        .find(|a| a.address != [0u8; 6] && a.address == *sender)
    {
        return SenderKind::KnownAnchorByAddress(a.index);
    }

    if let Some(report) = payload.and_then(decode_range_report) {
        return SenderKind::MarkerTaggedAnchor(report.board_id);
    }

    if let Some(p) = peers.iter().find(|p| p.address == *sender) {
        return SenderKind::KnownPeerMobile(p.id);
    }

    SenderKind::Unrecognized
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RangeReport {
    pub board_id: u8,
    pub range: u16,
}

/// Parse a range-reporting anchor's payload.
pub fn decode_range_report(payload: &[u8; APP_PAYLOAD_LEN]) -> Option<RangeReport> {
    if payload[..2] != RANGE_MARKER {
        return None;
    }
    Some(RangeReport {
        board_id: payload[2],
        range: u16::from_be_bytes([payload[3], payload[4]]),
    })
}

/// One anchor as reported by a mobile node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TelemetryEntry {
    pub index: u8,
    pub rssi: i8,
    /// `None` for anchors without a sensor.
    pub range: Option<u16>,
}

/// Recover a mobile node's per-anchor readings, given the same anchor table
/// and range width the mobile was configured with.
pub fn decode_telemetry(
    payload: &[u8; APP_PAYLOAD_LEN],
    anchors: &[AnchorConfig],
    width: RangeWidth,
) -> Result<Vec<TelemetryEntry, MAX_ANCHORS>> {
    if anchors.len() > MAX_ANCHORS || layout_len(anchors, width) > APP_PAYLOAD_LEN {
        return Err(Error::PayloadOverflow);
    }

    let mut entries = Vec::new();
    let mut pos = anchors.len();
    for (slot, anchor) in anchors.iter().enumerate() {
        let range = if anchor.has_range_sensor {
            let value = match width {
                RangeWidth::Byte => payload[pos] as u16,
                RangeWidth::Word => u16::from_be_bytes([payload[pos], payload[pos + 1]]),
            };
            pos += width.bytes();
            Some(value)
        } else {
            None
        };
        let _ = entries.push(TelemetryEntry {
            index: anchor.index,
            rssi: payload[slot] as i8,
            range,
        });
    }
    Ok(entries)
}
