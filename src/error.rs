/// Error taxonomy shared by every node role.
///
/// Nothing here is fatal at runtime: loops log the error and carry on with
/// stale or zeroed data. The only error surfaced at initialization is
/// `TransportUnavailable`.

/// Library-wide result alias.
pub type Result<T> = core::result::Result<T, Error>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// No synchronous transport is bound (SPI driver missing or failed to init).
    #[error("sensor link transport unavailable")]
    TransportUnavailable,
    /// The transport reported a bus fault during a transaction.
    #[error("sensor link transport fault")]
    Transport,
    /// First byte of a link frame was not the 0xAA preamble.
    #[error("corrupt link frame (preamble {0:#04x})")]
    CorruptFrame(u8),
    /// Link frame length field does not fit the fixed frame.
    #[error("link frame length {0} out of range")]
    BadFrameLength(u8),
    /// Peer answered, but not with a range report for our sensor id.
    #[error("unexpected link response")]
    UnexpectedResponse,
    /// Scan queue was full and had to be purged.
    #[error("scan queue overflow")]
    QueueOverflow,
    /// Radio refused to start the new advertisement.
    #[error("advertising start failed")]
    AdvertisingStartFailure,
    /// Echo edge did not arrive within the configured bound.
    #[error("range sensor timeout")]
    SensorTimeout,
    /// A sensor or indicator pin reported an error.
    #[error("GPIO fault")]
    Sensor,
    /// Telemetry does not fit the application payload.
    #[error("telemetry does not fit advertisement payload")]
    PayloadOverflow,
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
}

/// Reasons a [`crate::config::NodeConfig`] is rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("anchor slots must be dense 0..N-1 (slot {0} out of order)")]
    SparseIndex(u8),
    #[error("anchor table exceeds capacity")]
    TooManyAnchors,
    #[error("range-capable anchor {0} has no board id")]
    MissingBoardId(u8),
    #[error("range reporting enabled without a board id")]
    RangeWithoutBoardId,
    #[error("telemetry layout needs {0} bytes")]
    LayoutTooLarge(usize),
    #[error("role needs its own address")]
    MissingOwnAddress,
    #[error("malformed JSON")]
    Json,
}
