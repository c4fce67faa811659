/// Sensor link: fixed 10-byte frames over a synchronous full-duplex transport.
///
/// Frame layout: `0xAA | type | length | sid | data[0..6]`.
/// `type` is 1 for a request and 2 for a response. `length` counts the sid
/// byte plus the meaningful data bytes.
///
/// The transport clocks bytes in both directions at once, so the peer cannot
/// answer inside the transaction that carries the request. A master request is
/// therefore two transactions: the first carries the request, the second
/// carries dummy bytes and captures the answer the peer prepared in between.
use embedded_hal::delay::DelayNs;
use embedded_hal::spi::SpiDevice;
use serde::Deserialize;

use crate::error::{Error, Result};
use crate::ranging::RangeSource;

/// Bytes in every link transaction.
pub const FRAME_SIZE: usize = 10;

/// Sentinel first byte of a valid frame.
pub const PREAMBLE: u8 = 0xAA;

/// Payload bytes after the 4-byte frame header.
pub const MAX_DATA: usize = FRAME_SIZE - 4;

/// Sensor id of the ultrasonic sub-protocol.
pub const ULTRASONIC_SID: u8 = 6;

/// Settle delay between request and response transactions on the cyclic path.
pub const CYCLE_SETTLE_MS: u32 = 30;

/// Settle delay used by interactive, one-shot requests.
pub const SHELL_SETTLE_MS: u32 = 500;

/// Frame direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FrameType {
    Request = 1,
    Response = 2,
}

impl FrameType {
    fn from_byte(b: u8) -> Option<Self> {
        match b {
            1 => Some(FrameType::Request),
            2 => Some(FrameType::Response),
            _ => None,
        }
    }
}

/// What an ultrasonic frame asks for or carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    /// Master → peer: take a measurement.
    Trigger,
    /// Peer → master: here is the pulse-width count.
    Report,
}

/// A decoded link frame. The preamble is implicit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkFrame {
    pub frame_type: FrameType,
    pub length: u8,
    pub sid: u8,
    pub data: [u8; MAX_DATA],
}

impl LinkFrame {
    /// Build an ultrasonic sub-protocol frame.
    ///
    /// `Trigger` ignores `value` (the data bytes are don't-care zeros).
    /// `Report` splits `value` big-endian into `data[0]`, `data[1]`.
    pub fn request(sid: u8, kind: RequestKind, value: u16) -> Self {
        let mut data = [0u8; MAX_DATA];
        let frame_type = match kind {
            RequestKind::Trigger => FrameType::Request,
            RequestKind::Report => {
                data[..2].copy_from_slice(&value.to_be_bytes());
                FrameType::Response
            }
        };
        Self {
            frame_type,
            // sid + two value bytes
            length: 3,
            sid,
            data,
        }
    }

    /// Serialize to the fixed wire frame.
    pub fn encode(&self) -> [u8; FRAME_SIZE] {
        let mut buf = [0u8; FRAME_SIZE];
        buf[0] = PREAMBLE;
        buf[1] = self.frame_type as u8;
        buf[2] = self.length;
        buf[3] = self.sid;
        buf[4..].copy_from_slice(&self.data);
        buf
    }

    /// Parse a wire frame.
    ///
    /// A failed decode means "no valid data this cycle"; callers keep going.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let first = bytes.first().copied().unwrap_or(0);
        if first != PREAMBLE {
            return Err(Error::CorruptFrame(first));
        }
        if bytes.len() < FRAME_SIZE {
            return Err(Error::BadFrameLength(bytes.len() as u8));
        }
        let frame_type = FrameType::from_byte(bytes[1]).ok_or(Error::UnexpectedResponse)?;
        let length = bytes[2];
        if length == 0 || length as usize > MAX_DATA + 1 {
            return Err(Error::BadFrameLength(length));
        }
        let mut data = [0u8; MAX_DATA];
        data.copy_from_slice(&bytes[4..FRAME_SIZE]);
        Ok(Self {
            frame_type,
            length,
            sid: bytes[3],
            data,
        })
    }

    /// 16-bit value carried in `data[0..2]`, big-endian.
    pub fn value(&self) -> u16 {
        u16::from_be_bytes([self.data[0], self.data[1]])
    }

    /// True if this is a range report for `sid`.
    pub fn is_report_for(&self, sid: u8) -> bool {
        self.frame_type == FrameType::Response && self.sid == sid
    }
}

// ── Transport ─────────────────────────────────────────────────────────

/// Raw synchronous byte exchange: transmit exactly one frame while capturing
/// exactly one frame.
pub trait LinkTransport {
    fn exchange(&mut self, tx: &[u8; FRAME_SIZE], rx: &mut [u8; FRAME_SIZE]) -> Result<()>;
}

impl<T: LinkTransport + ?Sized> LinkTransport for &mut T {
    fn exchange(&mut self, tx: &[u8; FRAME_SIZE], rx: &mut [u8; FRAME_SIZE]) -> Result<()> {
        (**self).exchange(tx, rx)
    }
}

/// Master-side transport over any `embedded-hal` SPI device.
pub struct SpiLink<S>(pub S);

impl<S: SpiDevice> LinkTransport for SpiLink<S> {
    fn exchange(&mut self, tx: &[u8; FRAME_SIZE], rx: &mut [u8; FRAME_SIZE]) -> Result<()> {
        self.0.transfer(rx, tx).map_err(|_| Error::Transport)
    }
}

/// Link timing and retry budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct LinkConfig {
    /// Sensor id this link polls (or answers, on the peer side).
    #[serde(default = "default_sid")]
    pub sid: u8,
    /// Delay between the request and response transactions.
    #[serde(default = "default_settle_ms")]
    pub settle_ms: u32,
    /// Request attempts per cycle. 1 means no retry.
    #[serde(default = "default_attempts")]
    pub attempts: u8,
}

fn default_sid() -> u8 {
    ULTRASONIC_SID
}
fn default_settle_ms() -> u32 {
    CYCLE_SETTLE_MS
}
fn default_attempts() -> u8 {
    1
}

impl LinkConfig {
    pub const fn new() -> Self {
        Self {
            sid: ULTRASONIC_SID,
            settle_ms: CYCLE_SETTLE_MS,
            attempts: 1,
        }
    }

    /// Interactive one-shot requests: longer settle, no retry.
    pub const fn one_shot() -> Self {
        Self {
            settle_ms: SHELL_SETTLE_MS,
            ..Self::new()
        }
    }
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self::new()
    }
}

// ── Master ────────────────────────────────────────────────────────────

/// Polls the range peer over the link.
pub struct LinkMaster<T, D> {
    transport: T,
    delay: D,
    config: LinkConfig,
}

impl<T: LinkTransport, D: DelayNs> LinkMaster<T, D> {
    /// Bind a transport. Fails with `TransportUnavailable` when none was
    /// provided, so a missing device shows up at startup rather than as a
    /// silent link that never answers.
    pub fn bind(transport: Option<T>, delay: D, config: LinkConfig) -> Result<Self> {
        let transport = transport.ok_or(Error::TransportUnavailable)?;
        log::info!(
            "Sensor link bound (sid {}, settle {}ms, {} attempt(s))",
            config.sid,
            config.settle_ms,
            config.attempts.max(1)
        );
        Ok(Self {
            transport,
            delay,
            config,
        })
    }

    /// One request/response interaction: request transaction, settle delay,
    /// dummy transaction that captures the deferred answer.
    pub fn transact(&mut self, request: &LinkFrame) -> Result<LinkFrame> {
        let mut discard = [0u8; FRAME_SIZE];
        self.transport.exchange(&request.encode(), &mut discard)?;

        self.delay.delay_ms(self.config.settle_ms);

        let mut rx = [0u8; FRAME_SIZE];
        self.transport.exchange(&[0u8; FRAME_SIZE], &mut rx)?;
        LinkFrame::decode(&rx)
    }

    /// Ask the peer for a range reading, within the configured attempt budget.
    pub fn poll_range(&mut self) -> Result<u16> {
        let sid = self.config.sid;
        let request = LinkFrame::request(sid, RequestKind::Trigger, 0);
        let mut last = Error::UnexpectedResponse;

        for attempt in 1..=self.config.attempts.max(1) {
            match self.transact(&request) {
                Ok(frame) if frame.is_report_for(sid) => return Ok(frame.value()),
                Ok(_) => last = Error::UnexpectedResponse,
                Err(e) => last = e,
            }
            log::debug!("Range poll attempt {} failed: {}", attempt, last);
        }

        Err(last)
    }

    pub fn config(&self) -> &LinkConfig {
        &self.config
    }
}

impl<T: LinkTransport, D: DelayNs> RangeSource for LinkMaster<T, D> {
    fn acquire(&mut self) -> Result<u16> {
        self.poll_range()
    }
}

// ── Peer ──────────────────────────────────────────────────────────────

/// The range-peer side of the link.
///
/// Every transaction clocks out whatever answer was prepared after the
/// previous request, and captures the next request.
pub struct LinkPeer<T, S> {
    transport: T,
    sensor: S,
    sid: u8,
    pending: [u8; FRAME_SIZE],
}

impl<T: LinkTransport, S: RangeSource> LinkPeer<T, S> {
    pub fn new(transport: T, sensor: S, sid: u8) -> Self {
        Self {
            transport,
            sensor,
            sid,
            pending: [0u8; FRAME_SIZE],
        }
    }

    /// Serve one transaction. Returns the count measured for a trigger
    /// addressed to us, `None` for dummy or foreign frames.
    ///
    /// A sensor error leaves nothing pending, so the master decodes a corrupt
    /// frame and keeps its stale value.
    pub fn serve_once(&mut self) -> Result<Option<u16>> {
        let tx = core::mem::replace(&mut self.pending, [0u8; FRAME_SIZE]);
        let mut rx = [0u8; FRAME_SIZE];
        self.transport.exchange(&tx, &mut rx)?;

        let frame = match LinkFrame::decode(&rx) {
            Ok(frame) => frame,
            // Dummy bytes of the master's response transaction
            Err(Error::CorruptFrame(_)) => return Ok(None),
            Err(e) => return Err(e),
        };

        if frame.frame_type != FrameType::Request || frame.sid != self.sid {
            return Ok(None);
        }

        let count = self.sensor.acquire()?;
        self.pending = LinkFrame::request(self.sid, RequestKind::Report, count).encode();
        Ok(Some(count))
    }

    /// Serve forever.
    pub fn run(&mut self) -> ! {
        loop {
            match self.serve_once() {
                Ok(Some(count)) => log::debug!("Range report queued: {}", count),
                Ok(None) => {}
                Err(e) => log::warn!("Link peer: {}", e),
            }
        }
    }
}
