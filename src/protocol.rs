/// JSON messages a node writes to its serial console.
///
/// All messages are newline-delimited JSON (NDJSON), one object per line, so
/// a host script can follow a base node's output with `jq`.
/// Uses `heapless` types for no_std/no-alloc operation.
use core::fmt::Write;

use heapless::{String, Vec};
use serde::Serialize;

/// Maximum length for MAC address strings ("AA:BB:CC:DD:EE:FF")
pub type MacString = String<18>;

/// Messages emitted by a node
#[derive(Debug, Serialize)]
#[serde(tag = "type")]
pub enum DeviceMessage<'a> {
    /// Mobile telemetry harvested by the base node
    #[serde(rename = "telemetry")]
    Telemetry {
        /// Configured mobile id
        mobile: u8,
        mac: &'a MacString,
        /// RSSI of the mobile as heard by the base
        link_rssi: i8,
        /// Per-anchor RSSI, slot order
        rssi: &'a [i8],
        /// Range counts of the range-capable anchors, slot order
        range: &'a [u16],
        /// Uptime in milliseconds when captured
        ts: u32,
    },
    /// Distancing alert edge on a mobile node
    #[serde(rename = "alert")]
    Alert { active: bool, ts: u32 },
    /// Node status report
    #[serde(rename = "status")]
    Status {
        role: &'static str,
        /// Uptime in seconds
        uptime: u32,
        violation: bool,
        /// Anchors heard at least once
        anchors_heard: u8,
        /// Scan queue purges since boot
        overflows: u32,
        /// Board identifier
        board: &'static str,
        /// Firmware version
        version: &'static str,
    },
}

/// Firmware version string
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Maximum size of a serialized JSON message
pub const MAX_MSG_LEN: usize = 256;

/// Buffer type for serialized JSON messages
pub type MsgBuffer = Vec<u8, MAX_MSG_LEN>;

/// Render an address as "AA:BB:CC:DD:EE:FF", most significant byte first.
///
/// Addresses are stored in over-the-air order, so the bytes are reversed.
pub fn format_mac(addr: &[u8; 6]) -> MacString {
    let mut s = MacString::new();
    for (i, b) in addr.iter().rev().enumerate() {
        if i > 0 {
            let _ = s.push(':');
        }
        let _ = write!(s, "{:02X}", b);
    }
    s
}
