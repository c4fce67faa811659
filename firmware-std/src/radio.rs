//! NimBLE bindings: the advertiser the broadcaster drives, and the scan
//! thread that feeds the node context.

use std::sync::mpsc::SyncSender;

use esp32_nimble::{BLEDevice, BLEError, BLEScan};
use esp_idf_svc::hal::task::block_on;

use proxtrack::comm;
use proxtrack::protocol::MsgBuffer;
use proxtrack::scheduler::Advertiser;

use crate::Ctx;

/// Scan round length; rounds restart back to back.
const SCAN_ROUND_MS: i32 = 5000;

pub struct NimbleAdvertiser {
    device: &'static BLEDevice,
}

impl NimbleAdvertiser {
    pub fn new(device: &'static BLEDevice) -> Result<Self, BLEError> {
        // Scan response carries the device name
        let name = comm::BLE_ADV_NAME.as_bytes();
        let mut response = heapless::Vec::<u8, 31>::new();
        let _ = response.push(name.len() as u8 + 1);
        let _ = response.push(0x09);
        let _ = response.extend_from_slice(name);
        device
            .get_advertising()
            .lock()
            .set_raw_scan_response_data(&response)?;
        Ok(Self { device })
    }
}

impl Advertiser for NimbleAdvertiser {
    type Error = BLEError;

    fn stop(&mut self) -> Result<(), BLEError> {
        self.device.get_advertising().lock().stop()
    }

    fn start(&mut self, ad: &[u8]) -> Result<(), BLEError> {
        let mut advertising = self.device.get_advertising().lock();
        advertising.set_raw_data(ad)?;
        advertising.start()
    }
}

/// Scan forever, handing every report to the node context.
///
/// Mobile nodes only need the context side effects. Base nodes also turn
/// mobile telemetry into NDJSON lines for the output thread.
pub fn scan_thread(ctx: &'static Ctx, output_tx: Option<SyncSender<MsgBuffer>>) {
    log::info!("BLE scan thread started");

    let ble_device = BLEDevice::take();
    let mut scan = BLEScan::new();
    scan.active_scan(false)
        .filter_duplicates(false)
        .interval(5)
        .window(5);

    loop {
        let _ = block_on(scan.start(ble_device, SCAN_ROUND_MS, |device, data| {
            let addr = device.addr().as_le_bytes();
            let rssi = device.rssi();
            let outcome = ctx.on_advertisement(&addr, rssi, data.payload());

            if let Some(tx) = &output_tx {
                if let Some(line) = comm::telemetry_line(ctx, &outcome, &addr, rssi, crate::uptime_millis_u32()) {
                    let _ = tx.try_send(line);
                }
            }
            None::<()> // Continue scanning
        }));
    }
}
