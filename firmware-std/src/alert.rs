//! Distancing alert LED.
//!
//! Pulses the board LED every tick while the violation flag is set and
//! emits an `alert` line on every edge.

use std::sync::mpsc::SyncSender;

use esp_idf_svc::hal::delay::FreeRtos;
use esp_idf_svc::hal::gpio::{AnyOutputPin, PinDriver};

use proxtrack::board;
use proxtrack::comm;
use proxtrack::proximity::AlertIndicator;
use proxtrack::protocol::{DeviceMessage, MsgBuffer};
use proxtrack::scheduler;

use crate::Ctx;

pub fn alert_thread(ctx: &'static Ctx, pin: AnyOutputPin, output_tx: SyncSender<MsgBuffer>) {
    let driver = match PinDriver::output(pin) {
        Ok(d) => d,
        Err(e) => {
            log::error!("Alert LED init failed: {:?}", e);
            return;
        }
    };

    let tick_ms = ctx.config().timing.alert_tick_ms;
    let mut indicator = match AlertIndicator::new(driver, FreeRtos, tick_ms, board::ALERT_ACTIVE_LOW) {
        Ok(i) => i,
        Err(e) => {
            log::error!("Alert LED init failed: {}", e);
            return;
        }
    };
    log::info!("Alert LED ready on GPIO{} ({}ms tick)", board::ALERT_LED_PIN, tick_ms);

    scheduler::run_alert_loop(ctx, &mut indicator, |active| {
        let msg = DeviceMessage::Alert {
            active,
            ts: crate::uptime_millis_u32(),
        };
        if let Some(line) = comm::to_line(&msg) {
            let _ = output_tx.try_send(line);
        }
    })
}
