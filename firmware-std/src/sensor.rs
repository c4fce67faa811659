//! Range sensor wiring for anchors and range peers.

use esp_idf_svc::hal::delay::{Ets, FreeRtos};
use esp_idf_svc::hal::gpio::{AnyIOPin, AnyInputPin, AnyOutputPin, Input, Output, PinDriver};
use esp_idf_svc::hal::interrupt;
use esp_idf_svc::hal::peripheral::Peripheral;
use esp_idf_svc::hal::spi::{config::Config as SpiConfig, SpiAnyPins, SpiDeviceDriver, SpiDriver, SpiDriverConfig};
use esp_idf_svc::hal::units::Hertz;

use proxtrack::board;
use proxtrack::link::{LinkConfig, LinkMaster, SpiLink};
use proxtrack::ranging::{RangeSource, RangingConfig, Ultrasonic};

pub type DirectSensor =
    Ultrasonic<PinDriver<'static, AnyOutputPin, Output>, PinDriver<'static, AnyInputPin, Input>, Ets>;

pub type LinkSensor = LinkMaster<SpiLink<SpiDeviceDriver<'static, SpiDriver<'static>>>, FreeRtos>;

/// Measures with interrupts masked; the echo count is busy-waited.
pub struct Masked<S>(pub S);

impl<S: RangeSource> RangeSource for Masked<S> {
    fn acquire(&mut self) -> proxtrack::Result<u16> {
        interrupt::free(|| self.0.acquire())
    }
}

/// Sensor on the board's trigger/echo header.
pub fn direct(config: &RangingConfig) -> anyhow::Result<Masked<DirectSensor>> {
    // SAFETY: the pin numbers come from the board table and are not claimed
    // elsewhere in the ranging roles.
    let (trigger, echo) = unsafe {
        (
            AnyOutputPin::new(board::TRIGGER_PIN as i32),
            AnyInputPin::new(board::ECHO_PIN as i32),
        )
    };
    let trigger = PinDriver::output(trigger)?;
    let echo = PinDriver::input(echo)?;
    log::info!("Ultrasonic sensor on GPIO{}/GPIO{}", board::TRIGGER_PIN, board::ECHO_PIN);
    Ok(Masked(Ultrasonic::new(trigger, echo, Ets, config)?))
}

/// Sensor behind a range peer on the SPI link header.
pub fn linked<SPI: SpiAnyPins>(
    spi: impl Peripheral<P = SPI> + 'static,
    config: LinkConfig,
) -> anyhow::Result<LinkSensor> {
    // SAFETY: link header pins, used by nothing else on an anchor.
    let (sclk, mosi, miso, cs) = unsafe {
        (
            AnyIOPin::new(board::LINK_SCLK_PIN as i32),
            AnyIOPin::new(board::LINK_MOSI_PIN as i32),
            AnyIOPin::new(board::LINK_MISO_PIN as i32),
            AnyIOPin::new(board::LINK_CS_PIN as i32),
        )
    };
    let driver = SpiDriver::new(spi, sclk, mosi, Some(miso), &SpiDriverConfig::new())?;
    let device = SpiDeviceDriver::new(
        driver,
        Some(cs),
        &SpiConfig::new().baudrate(Hertz(board::LINK_BAUD_HZ)),
    )
    .map_err(|e| log::error!("SPI device init failed: {:?}", e))
    .ok();
    Ok(LinkMaster::bind(device.map(SpiLink), FreeRtos, config)?)
}
