/// Node configuration: one parametrized description for every role.
///
/// A node starts from the compiled-in tables in [`crate::defaults`] for its
/// role. Any field can be overridden by a JSON document (stored in NVS on the
/// firmware side); omitted fields keep their defaults.
use heapless::Vec;
use serde::Deserialize;

use crate::advert::{layout_len, RangeWidth, APP_PAYLOAD_LEN};
use crate::defaults;
use crate::error::ConfigError;
use crate::link::LinkConfig;
use crate::proximity::{Household, ProximityConfig, MAX_HOUSEHOLDS};
use crate::ranging::RangingConfig;
use crate::registry::{NodeRegistry, MAX_ANCHORS};

/// Mobile peers a node can recognize.
pub const MAX_PEERS: usize = 8;

/// Broadcast cycle of telemetry nodes.
pub const BROADCAST_TICK_MS: u32 = 30;

/// Idle sleep of pure scanners.
pub const SCAN_IDLE_MS: u32 = 1;

/// Alert indicator tick.
pub const ALERT_TICK_MS: u32 = 100;

/// Status report interval.
pub const STATUS_INTERVAL_S: u32 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Wearable: scans anchors and peers, rebroadcasts telemetry, drives the alert.
    Mobile,
    /// Fixed beacon, optionally relaying a range reading.
    Anchor,
    /// Passive collector of mobile telemetry.
    Base,
    /// Secondary MCU next to the ultrasonic sensor, answering link requests.
    RangePeer,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Mobile => "mobile",
            Role::Anchor => "anchor",
            Role::Base => "base",
            Role::RangePeer => "range_peer",
        }
    }

    pub fn scans(&self) -> bool {
        matches!(self, Role::Mobile | Role::Base)
    }

    pub fn broadcasts(&self) -> bool {
        matches!(self, Role::Mobile | Role::Anchor)
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "mobile" => Some(Role::Mobile),
            "anchor" => Some(Role::Anchor),
            "base" => Some(Role::Base),
            "range_peer" => Some(Role::RangePeer),
            _ => None,
        }
    }
}

/// One slot of the anchor table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct AnchorConfig {
    pub index: u8,
    /// All zeros when unknown; such anchors are matched by `board_id`.
    pub address: [u8; 6],
    #[serde(default)]
    pub has_range_sensor: bool,
    /// Board id carried in the anchor's range marker.
    #[serde(default)]
    pub board_id: Option<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct PeerConfig {
    pub id: u8,
    pub address: [u8; 6],
}

/// Where an anchor gets its range reading from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RangeMode {
    #[default]
    None,
    /// Sensor wired to this MCU.
    Direct,
    /// Sensor on a range peer across the link.
    Link,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct Timing {
    #[serde(default = "default_broadcast_tick_ms")]
    pub broadcast_tick_ms: u32,
    #[serde(default = "default_scan_idle_ms")]
    pub scan_idle_ms: u32,
    #[serde(default = "default_alert_tick_ms")]
    pub alert_tick_ms: u32,
    #[serde(default = "default_status_interval_s")]
    pub status_interval_s: u32,
}

fn default_broadcast_tick_ms() -> u32 {
    BROADCAST_TICK_MS
}
fn default_scan_idle_ms() -> u32 {
    SCAN_IDLE_MS
}
fn default_alert_tick_ms() -> u32 {
    ALERT_TICK_MS
}
fn default_status_interval_s() -> u32 {
    STATUS_INTERVAL_S
}

impl Timing {
    /// Main-loop period for `role`: the broadcast tick for broadcasting
    /// roles, the scan idle tick otherwise.
    pub fn cycle_ms(&self, role: Role) -> u32 {
        if role.broadcasts() {
            self.broadcast_tick_ms
        } else {
            self.scan_idle_ms
        }
    }
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            broadcast_tick_ms: BROADCAST_TICK_MS,
            scan_idle_ms: SCAN_IDLE_MS,
            alert_tick_ms: ALERT_TICK_MS,
            status_interval_s: STATUS_INTERVAL_S,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct NodeConfig {
    pub role: Role,
    /// Own radio address, filled in from the radio at boot when absent.
    #[serde(default)]
    pub own_address: Option<[u8; 6]>,
    /// Board id this node reports under when it relays a range reading.
    #[serde(default)]
    pub board_id: Option<u8>,
    #[serde(default)]
    pub range_mode: RangeMode,
    #[serde(default)]
    pub range_width: RangeWidth,
    #[serde(default = "default_anchors")]
    pub anchors: Vec<AnchorConfig, MAX_ANCHORS>,
    #[serde(default = "default_peers")]
    pub peers: Vec<PeerConfig, MAX_PEERS>,
    #[serde(default = "default_households")]
    pub households: Vec<Household, MAX_HOUSEHOLDS>,
    #[serde(default)]
    pub timing: Timing,
    #[serde(default)]
    pub proximity: ProximityConfig,
    #[serde(default)]
    pub link: LinkConfig,
    #[serde(default)]
    pub ranging: RangingConfig,
}

fn default_anchors() -> Vec<AnchorConfig, MAX_ANCHORS> {
    defaults::ANCHORS.iter().copied().take(MAX_ANCHORS).collect()
}

fn default_peers() -> Vec<PeerConfig, MAX_PEERS> {
    defaults::MOBILES.iter().copied().take(MAX_PEERS).collect()
}

fn default_households() -> Vec<Household, MAX_HOUSEHOLDS> {
    defaults::HOUSEHOLDS
        .iter()
        .take(MAX_HOUSEHOLDS)
        .map(|(id, residents)| Household::new(*id, residents))
        .collect()
}

impl NodeConfig {
    /// Defaults for `role` from the compiled-in tables.
    pub fn for_role(role: Role) -> Self {
        Self {
            role,
            own_address: None,
            board_id: None,
            range_mode: RangeMode::None,
            range_width: RangeWidth::default(),
            anchors: default_anchors(),
            peers: default_peers(),
            households: default_households(),
            timing: Timing::default(),
            proximity: ProximityConfig::default(),
            link: LinkConfig::default(),
            ranging: RangingConfig::default(),
        }
    }

    /// Parse a JSON override without validating it.
    ///
    /// Lets the caller fill in fields only known at runtime (the radio
    /// address) before [`validate`](Self::validate).
    pub fn parse(json: &[u8]) -> Result<Self, ConfigError> {
        serde_json_core::from_slice::<NodeConfig>(json)
            .map(|(config, _)| config)
            .map_err(|_| ConfigError::Json)
    }

    /// Parse and validate a JSON override.
    pub fn from_json(json: &[u8]) -> Result<Self, ConfigError> {
        let config = Self::parse(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        NodeRegistry::new(&self.anchors)?;

        for a in &self.anchors {
            if a.has_range_sensor && a.address == [0u8; 6] && a.board_id.is_none() {
                return Err(ConfigError::MissingBoardId(a.index));
            }
        }

        if self.role.scans() {
            let needed = layout_len(&self.anchors, self.range_width);
            if needed > APP_PAYLOAD_LEN {
                return Err(ConfigError::LayoutTooLarge(needed));
            }
        }

        match self.role {
            Role::Anchor if self.range_mode != RangeMode::None && self.board_id.is_none() => {
                return Err(ConfigError::RangeWithoutBoardId)
            }
            Role::Mobile if !self.households.is_empty() && self.own_address.is_none() => {
                return Err(ConfigError::MissingOwnAddress)
            }
            _ => {}
        }

        self.warn_shared_residents();
        Ok(())
    }

    /// Registry slot of the range-capable anchor reporting as `board_id`.
    pub fn anchor_for_board(&self, board_id: u8) -> Option<u8> {
        self.anchors
            .iter()
            .find(|a| a.has_range_sensor && a.board_id == Some(board_id))
            .map(|a| a.index)
    }

    /// Whether this anchor relays a range reading.
    pub fn reports_range(&self) -> bool {
        self.role == Role::Anchor && self.range_mode != RangeMode::None
    }

    fn warn_shared_residents(&self) {
        for (i, h) in self.households.iter().enumerate() {
            for other in &self.households[i + 1..] {
                for member in h.members.iter().filter(|m| other.contains(m)) {
                    log::warn!(
                        "Resident {:02X?} listed in households {} and {}",
                        member,
                        h.id,
                        other.id
                    );
                }
            }
        }
    }
}
