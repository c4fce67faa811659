/// Console output: NDJSON lines for telemetry, alerts and status.
///
/// Lines are built into fixed-size buffers without blocking or allocating,
/// so the radio callback can produce them; the firmware hands them to its
/// output thread.
use embassy_sync::blocking_mutex::raw::RawMutex;
use heapless::Vec;

use crate::advert::SenderKind;
use crate::node::{NodeContext, ScanOutcome};
use crate::protocol::{format_mac, DeviceMessage, MsgBuffer, MAX_MSG_LEN, VERSION};
use crate::registry::MAX_ANCHORS;

/// Advertised device name (scan response)
pub const BLE_ADV_NAME: &str = "proxtrack";

/// Serialize a DeviceMessage to JSON bytes and write to the output buffer.
/// Returns the number of bytes written, or None if serialization failed.
pub fn serialize_message(msg: &DeviceMessage, buf: &mut [u8]) -> Option<usize> {
    match serde_json_core::to_slice(msg, buf) {
        Ok(len) => {
            // Append newline for NDJSON
            if len < buf.len() {
                buf[len] = b'\n';
                Some(len + 1)
            } else {
                Some(len)
            }
        }
        Err(_) => None,
    }
}

/// Serialize into an owned line buffer.
pub fn to_line(msg: &DeviceMessage) -> Option<MsgBuffer> {
    let mut buf = [0u8; MAX_MSG_LEN];
    let len = serialize_message(msg, &mut buf)?;
    Vec::from_slice(&buf[..len]).ok()
}

/// Telemetry line for a mobile's advertisement, as harvested by a base node.
///
/// Returns `None` for anything that is not a decodable mobile frame.
pub fn telemetry_line<M>(
    ctx: &NodeContext<M>,
    outcome: &ScanOutcome,
    sender: &[u8; 6],
    link_rssi: i8,
    ts: u32,
) -> Option<MsgBuffer>
where
    M: RawMutex,
{
    let SenderKind::KnownPeerMobile(mobile) = outcome.kind else {
        return None;
    };
    let entries = ctx.harvest(outcome.frame.as_ref()?).ok()?;

    let mut rssi: Vec<i8, MAX_ANCHORS> = Vec::new();
    let mut range: Vec<u16, MAX_ANCHORS> = Vec::new();
    for e in &entries {
        let _ = rssi.push(e.rssi);
        if let Some(r) = e.range {
            let _ = range.push(r);
        }
    }

    let mac = format_mac(sender);
    to_line(&DeviceMessage::Telemetry {
        mobile,
        mac: &mac,
        link_rssi,
        rssi: &rssi,
        range: &range,
        ts,
    })
}

/// Periodic status line.
pub fn status_line<M>(ctx: &NodeContext<M>, uptime_s: u32, board: &'static str) -> Option<MsgBuffer>
where
    M: RawMutex,
{
    to_line(&DeviceMessage::Status {
        role: ctx.config().role.as_str(),
        uptime: uptime_s,
        violation: ctx.is_violating(),
        anchors_heard: ctx.heard_count() as u8,
        overflows: ctx.overflow_count(),
        board,
        version: VERSION,
    })
}
