//! proxtrack: ESP-IDF std firmware
//!
//! Thread-based node runtime: FreeRTOS threads and std::sync::mpsc channels
//! around the shared node context. One image serves every role; the role and
//! any table overrides come from NVS.

mod alert;
mod radio;
mod sensor;
mod spi_slave;

use std::sync::mpsc::{self, SyncSender};
use std::sync::Mutex;
use std::thread;
use std::time::{Duration, Instant};

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use esp_idf_svc::hal::delay::FreeRtos;
use esp_idf_svc::hal::gpio::AnyOutputPin;
use esp_idf_svc::hal::peripherals::Peripherals;
use esp_idf_svc::hal::task::block_on;
use esp_idf_svc::nvs::{EspDefaultNvsPartition, EspNvs, NvsDefault};
use esp_idf_svc::sys::esp_get_free_heap_size;

use esp32_nimble::BLEDevice;

use proxtrack::config::{NodeConfig, RangeMode, Role};
use proxtrack::link::LinkPeer;
use proxtrack::node::NodeContext;
use proxtrack::protocol::{MsgBuffer, VERSION};
use proxtrack::ranging::RangeSource;
use proxtrack::scheduler::Broadcaster;
use proxtrack::{board, comm};

use radio::NimbleAdvertiser;
use sensor::{DirectSensor, LinkSensor, Masked};
use spi_slave::SpiSlaveLink;

pub(crate) type Ctx = NodeContext<CriticalSectionRawMutex>;

/// NVS namespace holding the node configuration.
const NVS_NAMESPACE: &str = "proxtrack";

/// Role used when NVS holds neither a config blob nor a role name.
const FALLBACK_ROLE: Role = Role::Mobile;

/// Boot time: captured once in main, used for uptime calculation.
static BOOT_INSTANT: Mutex<Option<Instant>> = Mutex::new(None);

pub(crate) fn uptime_secs() -> u32 {
    BOOT_INSTANT
        .lock()
        .ok()
        .and_then(|i| i.map(|boot| boot.elapsed().as_secs() as u32))
        .unwrap_or(0)
}

pub(crate) fn uptime_millis_u32() -> u32 {
    BOOT_INSTANT
        .lock()
        .ok()
        .and_then(|i| i.map(|boot| (boot.elapsed().as_millis() & 0xFFFF_FFFF) as u32))
        .unwrap_or(0)
}

fn main() -> anyhow::Result<()> {
    // Bind the ESP-IDF logger to the `log` facade
    esp_idf_svc::log::EspLogger::initialize_default();

    if let Ok(mut boot) = BOOT_INSTANT.lock() {
        *boot = Some(Instant::now());
    }

    log::info!("proxtrack v{} starting on {} (std)", VERSION, board::BOARD_NAME);

    let peripherals = Peripherals::take()?;
    let nvs = EspDefaultNvsPartition::take()?;

    let mut config = load_config(nvs)?;
    log::info!("Role: {}", config.role.as_str());

    // ── Range peer: no radio, just the link ──────────────────────────

    if config.role == Role::RangePeer {
        let sensor = sensor::direct(&config.ranging)?;
        let transport = SpiSlaveLink::new(
            board::LINK_SCLK_PIN,
            board::LINK_MOSI_PIN,
            board::LINK_MISO_PIN,
            board::LINK_CS_PIN,
        )?;
        LinkPeer::new(transport, sensor, config.link.sid).run();
    }

    // ── Radio and context ────────────────────────────────────────────

    let ble_device = BLEDevice::take();
    if config.own_address.is_none() {
        let addr = ble_device
            .get_addr()
            .map_err(|e| anyhow::anyhow!("BLE address unavailable: {:?}", e))?;
        config.own_address = Some(addr.as_le_bytes());
    }

    let ctx: &'static Ctx = Box::leak(Box::new(NodeContext::new(config)?));
    let role = ctx.config().role;

    // ── Output thread ────────────────────────────────────────────────

    let (output_tx, output_rx) = mpsc::sync_channel::<MsgBuffer>(8);
    thread::Builder::new()
        .name("output".into())
        .stack_size(4096)
        .spawn(move || output_thread(output_rx))?;
    log::info!("Output thread spawned");

    // ── Status thread ────────────────────────────────────────────────

    let status_output_tx = output_tx.clone();
    thread::Builder::new()
        .name("status".into())
        .stack_size(4096)
        .spawn(move || status_thread(ctx, status_output_tx))?;
    log::info!("Status thread spawned");

    // ── Scanning roles: scan thread + registry writer ────────────────

    if role.scans() {
        let scan_output_tx = (role == Role::Base).then(|| output_tx.clone());
        thread::Builder::new()
            .name("blescan".into())
            .stack_size(4096)
            .spawn(move || radio::scan_thread(ctx, scan_output_tx))?;
        log::info!("BLE scan thread spawned");

        thread::Builder::new()
            .name("registry".into())
            .stack_size(4096)
            .spawn(move || block_on(ctx.run_registry_writer()))?;
        log::info!("Registry writer thread spawned");
    }

    // ── Alert thread (mobile) ────────────────────────────────────────

    if role == Role::Mobile {
        // SAFETY: the LED pin is not used by any other driver.
        let pin = unsafe { AnyOutputPin::new(board::ALERT_LED_PIN as i32) };
        let alert_output_tx = output_tx.clone();
        thread::Builder::new()
            .name("alert".into())
            .stack_size(2048)
            .spawn(move || alert::alert_thread(ctx, pin, alert_output_tx))?;
        log::info!("Alert thread spawned");
    }

    // ── Broadcast cycle or idle, on the main thread ──────────────────

    if !role.broadcasts() {
        let idle_ms = ctx.config().timing.cycle_ms(role);
        log::info!("Idling every {}ms", idle_ms);
        loop {
            FreeRtos::delay_ms(idle_ms);
        }
    }

    let advertiser = NimbleAdvertiser::new(ble_device)
        .map_err(|e| anyhow::anyhow!("BLE advertising setup failed: {:?}", e))?;

    let range = match (role, ctx.config().range_mode) {
        (Role::Anchor, RangeMode::Direct) => Some(AnchorRange::Direct(sensor::direct(&ctx.config().ranging)?)),
        (Role::Anchor, RangeMode::Link) => {
            Some(AnchorRange::Link(sensor::linked(peripherals.spi2, ctx.config().link)?))
        }
        _ => None,
    };

    log::info!("Broadcasting every {}ms", ctx.config().timing.cycle_ms(role));
    Broadcaster::new(ctx, advertiser, range, FreeRtos).run();
}

// ── Anchor range source ──────────────────────────────────────────────

enum AnchorRange {
    Direct(Masked<DirectSensor>),
    Link(LinkSensor),
}

impl RangeSource for AnchorRange {
    fn acquire(&mut self) -> proxtrack::Result<u16> {
        match self {
            AnchorRange::Direct(s) => s.acquire(),
            AnchorRange::Link(s) => s.acquire(),
        }
    }
}

// ── Configuration ────────────────────────────────────────────────────

/// Config blob from NVS, else a bare role name, else the fallback role.
///
/// The blob is only parsed here; validation happens once the radio address
/// is known.
fn load_config(partition: EspDefaultNvsPartition) -> anyhow::Result<NodeConfig> {
    let nvs: EspNvs<NvsDefault> = EspNvs::new(partition, NVS_NAMESPACE, true)?;

    let mut blob = [0u8; 1024];
    if let Some(json) = nvs.get_raw("config", &mut blob)? {
        match NodeConfig::parse(json) {
            Ok(config) => {
                log::info!("Config loaded from NVS ({} bytes)", json.len());
                return Ok(config);
            }
            Err(e) => log::warn!("Ignoring NVS config: {}", e),
        }
    }

    let mut name = [0u8; 16];
    let role = match nvs.get_str("role", &mut name)? {
        Some(s) => Role::from_name(s).unwrap_or_else(|| {
            log::warn!("Unknown role '{}' in NVS", s);
            FALLBACK_ROLE
        }),
        None => FALLBACK_ROLE,
    };
    Ok(NodeConfig::for_role(role))
}

// ── Output thread ────────────────────────────────────────────────────

fn output_thread(output_rx: mpsc::Receiver<MsgBuffer>) {
    log::info!("Output thread started");

    while let Ok(msg) = output_rx.recv() {
        if let Ok(s) = std::str::from_utf8(&msg) {
            log::info!("{}", s.trim_end());
        }
    }
}

// ── Status thread ────────────────────────────────────────────────────

fn status_thread(ctx: &'static Ctx, output_tx: SyncSender<MsgBuffer>) {
    let interval = Duration::from_secs(ctx.config().timing.status_interval_s as u64);
    loop {
        thread::sleep(interval);

        let heap_free = unsafe { esp_get_free_heap_size() };
        log::debug!("Heap free: {} bytes, dropped sightings: {}", heap_free, ctx.dropped_count());

        if let Some(line) = comm::status_line(ctx, uptime_secs(), board::BOARD_NAME) {
            let _ = output_tx.try_send(line);
        }
    }
}
