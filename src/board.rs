/// Hardware abstraction for supported boards.
///
/// Each board module defines pin assignments and capabilities
/// selected at compile time via feature flags.

#[cfg(feature = "board-xiao")]
mod hw {
    pub const ALERT_LED_PIN: u8 = 21; // User LED, active-low
    pub const ALERT_ACTIVE_LOW: bool = true;
    pub const TRIGGER_PIN: u8 = 1;
    pub const ECHO_PIN: u8 = 2;
    pub const LINK_SCLK_PIN: u8 = 7;
    pub const LINK_MOSI_PIN: u8 = 9;
    pub const LINK_MISO_PIN: u8 = 8;
    pub const LINK_CS_PIN: u8 = 4;
    pub const HAS_RANGE_HEADER: bool = true;
    pub const BOARD_NAME: &str = "xiao_esp32s3";
}

#[cfg(feature = "board-m5stickc")]
mod hw {
    pub const ALERT_LED_PIN: u8 = 19; // Built-in red LED
    pub const ALERT_ACTIVE_LOW: bool = false;
    pub const TRIGGER_PIN: u8 = 32; // Grove port
    pub const ECHO_PIN: u8 = 33;
    pub const LINK_SCLK_PIN: u8 = 0;
    pub const LINK_MOSI_PIN: u8 = 26;
    pub const LINK_MISO_PIN: u8 = 36;
    pub const LINK_CS_PIN: u8 = 25;
    pub const HAS_RANGE_HEADER: bool = true;
    pub const BOARD_NAME: &str = "m5stickc_plus2";
}

#[cfg(not(any(feature = "board-xiao", feature = "board-m5stickc")))]
mod hw {
    pub const ALERT_ACTIVE_LOW: bool = false;
    pub const HAS_RANGE_HEADER: bool = false;
    pub const BOARD_NAME: &str = "unknown";
}

pub use hw::*;

/// Clock rate of the sensor link.
pub const LINK_BAUD_HZ: u32 = 2_000_000;
