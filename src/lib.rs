//! proxtrack: proximity-tracking core for anchor/mobile BLE networks.
//!
//! Mobile nodes scan a fixed set of anchors and passive beacons, keep the
//! last RSSI (and, for range-capable anchors, the last ultrasonic count) of
//! each, and rebroadcast the lot in a single advertisement every cycle. The
//! same scan decides whether a non-household peer is too close and drives an
//! alert output. A base node harvests mobile advertisements to its console.
//!
//! This crate holds all of that logic with no platform dependencies,
//! testable on any host with `cargo test`. Hardware is reached through
//! `embedded-hal` traits plus [`scheduler::Advertiser`] and
//! [`link::LinkTransport`]; the ESP32 firmware in `firmware-std/` is a thin
//! consumer that binds them to the radio, SPI and GPIO drivers.
//!
//! Modules:
//! - `link`, `ranging`: sensor link framing and ultrasonic measurement
//! - `advert`: advertisement build/parse and sender classification
//! - `registry`, `ingest`, `node`: shared node state and scan ingestion
//! - `proximity`, `scheduler`: distancing decision, broadcast and alert loops
//! - `config`, `defaults`, `board`: role configuration and deployment tables
//! - `protocol`, `comm`: NDJSON console output

#![cfg_attr(not(test), no_std)]

pub mod advert;
pub mod board;
pub mod comm;
pub mod config;
pub mod defaults;
pub mod error;
pub mod ingest;
pub mod link;
pub mod node;
pub mod protocol;
pub mod proximity;
pub mod ranging;
pub mod registry;
pub mod scheduler;

pub use error::{ConfigError, Error, Result};
