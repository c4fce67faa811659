/// Anchor registry: last RSSI and range heard from each configured anchor.
///
/// Slots are dense (`index == position`) and fixed at construction.
/// The registry writer task is the only writer; the broadcaster reads
/// snapshots. Both go through [`SharedRegistry`], which holds the lock for a
/// bounded copy and nothing else.
use core::cell::RefCell;

use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_sync::blocking_mutex::Mutex;
use heapless::Vec;

use crate::config::AnchorConfig;
use crate::error::ConfigError;

/// Maximum anchors a deployment can configure.
pub const MAX_ANCHORS: usize = 13;

/// RSSI of an anchor that has not been heard yet.
pub const RSSI_UNHEARD: i8 = -128;

/// Copy of every record, taken under the lock.
pub type Snapshot = Vec<AnchorRecord, MAX_ANCHORS>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AnchorRecord {
    index: u8,
    address: [u8; 6],
    has_range_sensor: bool,
    last_rssi: i8,
    last_range: u16,
}

impl AnchorRecord {
    fn new(config: &AnchorConfig) -> Self {
        Self {
            index: config.index,
            address: config.address,
            has_range_sensor: config.has_range_sensor,
            last_rssi: RSSI_UNHEARD,
            last_range: 0,
        }
    }

    pub fn index(&self) -> u8 {
        self.index
    }

    pub fn address(&self) -> &[u8; 6] {
        &self.address
    }

    pub fn has_range_sensor(&self) -> bool {
        self.has_range_sensor
    }

    pub fn last_rssi(&self) -> i8 {
        self.last_rssi
    }

    pub fn last_range(&self) -> u16 {
        self.last_range
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeRegistry {
    records: Vec<AnchorRecord, MAX_ANCHORS>,
}

impl NodeRegistry {
    /// Build the registry from the anchor table. Slot `i` must carry index `i`.
    pub fn new(anchors: &[AnchorConfig]) -> Result<Self, ConfigError> {
        let mut records = Vec::new();
        for (position, anchor) in anchors.iter().enumerate() {
            if anchor.index as usize != position {
                return Err(ConfigError::SparseIndex(anchor.index));
            }
            records
                .push(AnchorRecord::new(anchor))
                .map_err(|_| ConfigError::TooManyAnchors)?;
        }
        Ok(Self { records })
    }

    /// Record a sighting. `range` is applied only to slots with a sensor.
    ///
    /// Returns `false` for an index with no slot.
    pub fn write(&mut self, index: u8, rssi: i8, range: Option<u16>) -> bool {
        let Some(record) = self.records.iter_mut().find(|r| r.index == index) else {
            return false;
        };
        record.last_rssi = rssi;
        if record.has_range_sensor {
            if let Some(range) = range {
                record.last_range = range;
            }
        }
        true
    }

    pub fn records(&self) -> &[AnchorRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Anchors heard at least once.
    pub fn heard_count(&self) -> usize {
        self.records
            .iter()
            .filter(|r| r.last_rssi != RSSI_UNHEARD)
            .count()
    }
}

/// Registry behind a blocking mutex, shareable across contexts.
pub struct SharedRegistry<M: RawMutex> {
    inner: Mutex<M, RefCell<NodeRegistry>>,
}

impl<M: RawMutex> SharedRegistry<M> {
    pub fn new(registry: NodeRegistry) -> Self {
        Self {
            inner: Mutex::new(RefCell::new(registry)),
        }
    }

    pub fn write(&self, index: u8, rssi: i8, range: Option<u16>) -> bool {
        self.inner
            .lock(|cell| cell.borrow_mut().write(index, rssi, range))
    }

    pub fn snapshot(&self) -> Snapshot {
        self.inner.lock(|cell| cell.borrow().records.clone())
    }

    pub fn heard_count(&self) -> usize {
        self.inner.lock(|cell| cell.borrow().heard_count())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;

    fn anchor(index: u8, has_range_sensor: bool) -> AnchorConfig {
        AnchorConfig {
            index,
            address: [0x10, 0, 0, 0, 0, index],
            has_range_sensor,
            board_id: None,
        }
    }

    fn three() -> [AnchorConfig; 3] {
        [anchor(0, true), anchor(1, false), anchor(2, false)]
    }

    #[test]
    fn starts_unheard() {
        let reg = NodeRegistry::new(&three()).unwrap();
        assert_eq!(reg.len(), 3);
        for (i, r) in reg.records().iter().enumerate() {
            assert_eq!(r.index() as usize, i);
            assert_eq!(r.last_rssi(), RSSI_UNHEARD);
            assert_eq!(r.last_range(), 0);
        }
        assert_eq!(reg.heard_count(), 0);
    }

    #[test]
    fn three_anchor_scenario() {
        let mut reg = NodeRegistry::new(&three()).unwrap();
        assert!(reg.write(0, -55, Some(120)));
        assert!(reg.write(1, -80, None));

        let r = reg.records();
        assert_eq!((r[0].last_rssi(), r[0].last_range()), (-55, 120));
        assert_eq!((r[1].last_rssi(), r[1].last_range()), (-80, 0));
        assert_eq!((r[2].last_rssi(), r[2].last_range()), (RSSI_UNHEARD, 0));
        assert_eq!(reg.heard_count(), 2);
    }

    #[test]
    fn range_ignored_without_sensor() {
        let mut reg = NodeRegistry::new(&three()).unwrap();
        assert!(reg.write(1, -40, Some(999)));
        assert_eq!(reg.records()[1].last_range(), 0);
        assert_eq!(reg.records()[1].last_rssi(), -40);
    }

    #[test]
    fn missing_range_keeps_last_value() {
        let mut reg = NodeRegistry::new(&three()).unwrap();
        reg.write(0, -50, Some(120));
        reg.write(0, -55, None);
        assert_eq!(reg.records()[0].last_range(), 120);
        assert_eq!(reg.records()[0].last_rssi(), -55);
    }

    #[test]
    fn unknown_index_is_a_no_op() {
        let mut reg = NodeRegistry::new(&three()).unwrap();
        let before = reg.clone();
        assert!(!reg.write(7, -30, Some(5)));
        assert_eq!(reg, before);
    }

    #[test]
    fn rejects_sparse_or_reordered_slots() {
        assert_eq!(
            NodeRegistry::new(&[anchor(0, false), anchor(2, false)]),
            Err(ConfigError::SparseIndex(2))
        );
        assert_eq!(
            NodeRegistry::new(&[anchor(1, false), anchor(0, false)]),
            Err(ConfigError::SparseIndex(1))
        );
        // Duplicate index collapses to the same check
        assert_eq!(
            NodeRegistry::new(&[anchor(0, false), anchor(0, false)]),
            Err(ConfigError::SparseIndex(0))
        );
    }

    #[test]
    fn rejects_over_capacity() {
        let table: std::vec::Vec<AnchorConfig> =
            (0..=MAX_ANCHORS as u8).map(|i| anchor(i, false)).collect();
        assert_eq!(NodeRegistry::new(&table), Err(ConfigError::TooManyAnchors));
        assert!(NodeRegistry::new(&table[..MAX_ANCHORS]).is_ok());
    }

    #[test]
    fn shared_snapshot_sees_writes() {
        let shared: SharedRegistry<CriticalSectionRawMutex> =
            SharedRegistry::new(NodeRegistry::new(&three()).unwrap());
        assert!(shared.write(0, -50, Some(120)));
        assert!(shared.write(2, -70, None));

        let snap = shared.snapshot();
        assert_eq!(snap.len(), 3);
        assert_eq!(snap[0].last_range(), 120);
        assert_eq!(snap[2].last_rssi(), -70);
        assert_eq!(shared.heard_count(), 2);
    }

    #[test]
    fn shared_registry_across_threads() {
        use std::sync::Arc;

        let shared: Arc<SharedRegistry<CriticalSectionRawMutex>> =
            Arc::new(SharedRegistry::new(NodeRegistry::new(&three()).unwrap()));

        let writer = {
            let shared = shared.clone();
            std::thread::spawn(move || {
                for rssi in -90..=-40i8 {
                    shared.write(0, rssi, Some(rssi.unsigned_abs() as u16));
                }
            })
        };
        for _ in 0..50 {
            let snap = shared.snapshot();
            // Every snapshot is internally consistent
            let r = snap[0];
            if r.last_rssi() != RSSI_UNHEARD {
                assert_eq!(r.last_range(), r.last_rssi().unsigned_abs() as u16);
            }
        }
        writer.join().unwrap();
        assert_eq!(shared.snapshot()[0].last_rssi(), -40);
    }
}
