/// Node context: everything the concurrent contexts of one node share.
///
/// One value owns the configuration, the registry and its lock, the scan
/// queue and the violation flag. Each context borrows it: the radio callback
/// calls [`NodeContext::on_advertisement`], the registry writer runs
/// [`NodeContext::run_registry_writer`], and the broadcaster and alert loop
/// read snapshots and the flag.
use core::sync::atomic::{AtomicU32, Ordering};

use embassy_sync::blocking_mutex::raw::RawMutex;
use heapless::Vec;

use crate::advert::{self, AdvertisementFrame, SenderKind, TelemetryEntry, APP_PAYLOAD_LEN};
use crate::config::{NodeConfig, Role};
use crate::error::Result;
use crate::ingest::{Enqueued, ScanMessage, ScanQueue};
use crate::proximity::ProximityEvaluator;
use crate::registry::{NodeRegistry, SharedRegistry, Snapshot, MAX_ANCHORS};

/// What the radio callback made of one advertisement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanOutcome {
    pub kind: SenderKind,
    pub frame: Option<AdvertisementFrame>,
}

pub struct NodeContext<M: RawMutex> {
    config: NodeConfig,
    registry: SharedRegistry<M>,
    queue: ScanQueue<M>,
    proximity: ProximityEvaluator<M>,
    overflows: AtomicU32,
    dropped: AtomicU32,
}

impl<M: RawMutex> NodeContext<M> {
    pub fn new(config: NodeConfig) -> Result<Self> {
        config.validate()?;
        let registry = NodeRegistry::new(&config.anchors)?;
        log::info!(
            "Node context: role={} anchors={} peers={} households={}",
            config.role.as_str(),
            config.anchors.len(),
            config.peers.len(),
            config.households.len()
        );
        Ok(Self {
            proximity: ProximityEvaluator::new(config.proximity),
            registry: SharedRegistry::new(registry),
            queue: ScanQueue::new(),
            config,
            overflows: AtomicU32::new(0),
            dropped: AtomicU32::new(0),
        })
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    /// Radio callback entry point. Never blocks and never logs.
    ///
    /// Anchor sightings are queued for the registry writer; peer sightings
    /// are evaluated for proximity on the spot (mobile role only).
    pub fn on_advertisement(&self, sender: &[u8; 6], rssi: i8, ad: &[u8]) -> ScanOutcome {
        let frame = AdvertisementFrame::from_ad(ad);
        let kind = advert::classify(
            frame.as_ref().map(|f| f.payload()),
            sender,
            &self.config.anchors,
            &self.config.peers,
        );

        match kind {
            SenderKind::KnownAnchorByAddress(index) => self.ingest(index, rssi, frame.as_ref()),
            SenderKind::MarkerTaggedAnchor(board_id) => match self.config.anchor_for_board(board_id) {
                Some(index) => self.ingest(index, rssi, frame.as_ref()),
                None => {
                    self.dropped.fetch_add(1, Ordering::Relaxed);
                }
            },
            SenderKind::KnownPeerMobile(_) if self.config.role == Role::Mobile => {
                self.proximity.evaluate(
                    &self.config.households,
                    self.config.own_address.as_ref(),
                    sender,
                    rssi,
                );
            }
            SenderKind::KnownPeerMobile(_) | SenderKind::Unrecognized => {}
        }

        ScanOutcome { kind, frame }
    }

    fn ingest(&self, index: u8, rssi: i8, frame: Option<&AdvertisementFrame>) {
        let msg = ScanMessage {
            index,
            rssi,
            payload: frame.map_or([0u8; APP_PAYLOAD_LEN], |f| *f.payload()),
        };
        if self.queue.enqueue(msg) == Enqueued::Purged {
            self.overflows.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Apply one queued sighting to the registry.
    ///
    /// The range is taken from the sighting's range marker, if it has one.
    pub fn apply(&self, msg: &ScanMessage) -> bool {
        let range = advert::decode_range_report(&msg.payload).map(|r| r.range);
        self.registry.write(msg.index, msg.rssi, range)
    }

    /// Registry writer loop: sole writer of the registry.
    pub async fn run_registry_writer(&self) -> ! {
        log::info!("Registry writer started");
        let mut reported = 0;
        loop {
            let msg = self.queue.dequeue().await;
            if !self.apply(&msg) {
                log::debug!("Sighting for unknown slot {}", msg.index);
            }

            let overflows = self.overflow_count();
            if overflows != reported {
                log::warn!("{}", crate::error::Error::QueueOverflow);
                reported = overflows;
            }
        }
    }

    /// Decode a mobile's telemetry against our anchor table.
    pub fn harvest(&self, frame: &AdvertisementFrame) -> Result<Vec<TelemetryEntry, MAX_ANCHORS>> {
        advert::decode_telemetry(frame.payload(), &self.config.anchors, self.config.range_width)
    }

    pub fn snapshot(&self) -> Snapshot {
        self.registry.snapshot()
    }

    pub fn heard_count(&self) -> usize {
        self.registry.heard_count()
    }

    pub fn is_violating(&self) -> bool {
        self.proximity.is_violating()
    }

    pub fn queue(&self) -> &ScanQueue<M> {
        &self.queue
    }

    /// Queue purges since boot.
    pub fn overflow_count(&self) -> u32 {
        self.overflows.load(Ordering::Relaxed)
    }

    /// Marker-tagged sightings with no matching slot.
    pub fn dropped_count(&self) -> u32 {
        self.dropped.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::advert::{encode, RangeWidth, Telemetry};
    use crate::config::AnchorConfig;
    use crate::defaults::{MOBILE_DEVKIT, MOBILE_DONGLE, MOBILE_WEARABLE};
    use crate::ingest::SCAN_QUEUE_DEPTH;
    use crate::registry::RSSI_UNHEARD;
    use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;

    type Ctx = NodeContext<CriticalSectionRawMutex>;

    fn mobile() -> Ctx {
        NodeContext::new(NodeConfig {
            own_address: Some(MOBILE_WEARABLE),
            ..NodeConfig::for_role(Role::Mobile)
        })
        .unwrap()
    }

    fn drain(ctx: &Ctx) {
        while let Some(msg) = ctx.queue().try_dequeue() {
            ctx.apply(&msg);
        }
    }

    fn ad_for(telemetry: Telemetry<'_>) -> [u8; advert::AD_LEN] {
        encode(&telemetry).unwrap().to_ad()
    }

    const BEACON_2: [u8; 6] = [0x8A, 0x14, 0x8F, 0x07, 0xFA, 0xF7];

    #[test]
    fn invalid_config_rejected() {
        // Mobile with households but no own address
        assert!(Ctx::new(NodeConfig::for_role(Role::Mobile)).is_err());
    }

    #[test]
    fn passive_beacon_recorded_by_address() {
        let ctx = mobile();
        // Commercial beacon: flags only, no service data
        let outcome = ctx.on_advertisement(&BEACON_2, -66, &[0x02, 0x01, 0x06]);
        assert_eq!(outcome.kind, SenderKind::KnownAnchorByAddress(2));
        assert_eq!(outcome.frame, None);

        drain(&ctx);
        let snap = ctx.snapshot();
        assert_eq!(snap[2].last_rssi(), -66);
        assert_eq!(ctx.heard_count(), 1);
    }

    #[test]
    fn marker_anchor_updates_rssi_and_range() {
        let ctx = mobile();
        let ad = ad_for(Telemetry::RangeReport { board_id: 2, range: 0x01F4 });
        let outcome = ctx.on_advertisement(&[0x42; 6], -55, &ad);
        assert_eq!(outcome.kind, SenderKind::MarkerTaggedAnchor(2));

        drain(&ctx);
        let snap = ctx.snapshot();
        assert_eq!(snap[1].last_rssi(), -55);
        assert_eq!(snap[1].last_range(), 500);
        assert_eq!(snap[0].last_rssi(), RSSI_UNHEARD);
    }

    #[test]
    fn unknown_board_id_is_dropped() {
        let ctx = mobile();
        let ad = ad_for(Telemetry::RangeReport { board_id: 7, range: 1 });
        ctx.on_advertisement(&[0x42; 6], -55, &ad);
        assert_eq!(ctx.queue().try_dequeue(), None);
        assert_eq!(ctx.dropped_count(), 1);
    }

    #[test]
    fn peer_sighting_drives_violation_flag() {
        let ctx = mobile();
        ctx.on_advertisement(&MOBILE_DONGLE, -40, &[]);
        assert!(ctx.is_violating());
        ctx.on_advertisement(&MOBILE_DONGLE, -70, &[]);
        assert!(!ctx.is_violating());
        // Housemate never violates
        ctx.on_advertisement(&MOBILE_DEVKIT, -30, &[]);
        assert!(!ctx.is_violating());
        // Peers never reach the registry
        assert_eq!(ctx.queue().try_dequeue(), None);
    }

    #[test]
    fn base_does_not_evaluate_proximity() {
        let ctx: Ctx = NodeContext::new(NodeConfig::for_role(Role::Base)).unwrap();
        let outcome = ctx.on_advertisement(&MOBILE_DONGLE, -20, &[]);
        assert_eq!(outcome.kind, SenderKind::KnownPeerMobile(2));
        assert!(!ctx.is_violating());
    }

    #[test]
    fn queue_overflow_is_counted_and_recovers() {
        let ctx = mobile();
        for _ in 0..SCAN_QUEUE_DEPTH {
            ctx.on_advertisement(&BEACON_2, -60, &[]);
        }
        assert_eq!(ctx.overflow_count(), 0);
        ctx.on_advertisement(&BEACON_2, -45, &[]);
        assert_eq!(ctx.overflow_count(), 1);

        drain(&ctx);
        assert_eq!(ctx.snapshot()[2].last_rssi(), -45);
    }

    #[test]
    fn writer_task_applies_queued_sightings() {
        use embassy_futures::select::{select, Either};

        let ctx = mobile();
        ctx.on_advertisement(&BEACON_2, -61, &[]);
        // Writer never returns; poll it once alongside a ready future
        let r = embassy_futures::block_on(select(ctx.run_registry_writer(), async {
            embassy_futures::yield_now().await;
        }));
        assert!(matches!(r, Either::Second(())));
        assert_eq!(ctx.snapshot()[2].last_rssi(), -61);
    }

    #[test]
    fn three_anchor_mobile_to_base() {
        let anchors = [
            AnchorConfig { index: 0, address: [0xA0; 6], has_range_sensor: true, board_id: None },
            AnchorConfig { index: 1, address: [0xA1; 6], has_range_sensor: false, board_id: None },
            AnchorConfig { index: 2, address: [0xA2; 6], has_range_sensor: false, board_id: None },
        ];
        let config = |role| NodeConfig {
            anchors: anchors.iter().copied().collect(),
            range_width: RangeWidth::Word,
            own_address: Some(MOBILE_WEARABLE),
            ..NodeConfig::for_role(role)
        };
        let m: Ctx = NodeContext::new(config(Role::Mobile)).unwrap();
        let base: Ctx = NodeContext::new(config(Role::Base)).unwrap();

        // Anchor 0 relays its own range reading
        let ranged = ad_for(Telemetry::RangeReport { board_id: 9, range: 120 });
        m.on_advertisement(&[0xA0; 6], -50, &ranged);
        m.on_advertisement(&[0xA2; 6], -70, &[]);
        drain(&m);

        let snap = m.snapshot();
        let ad = ad_for(Telemetry::Mobile { records: &snap, width: RangeWidth::Word });
        let outcome = base.on_advertisement(&MOBILE_WEARABLE, -80, &ad);
        assert_eq!(outcome.kind, SenderKind::KnownPeerMobile(0));

        let entries = base.harvest(&outcome.frame.unwrap()).unwrap();
        let got: std::vec::Vec<_> = entries.iter().map(|e| (e.rssi, e.range)).collect();
        assert_eq!(got, vec![(-50, Some(120)), (-128, None), (-70, None)]);
    }
}
