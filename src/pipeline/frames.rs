//! In-flight frame bookkeeping and result correlation
//!
//! Every frame handed to the channel is registered here until the remote
//! service answers for it. The table is what the scheduler consults for
//! backpressure, and what turns an inbound result into a round-trip latency.

use std::collections::BTreeMap;

use super::types::{FrameRecord, Timestamp};

/// How an inbound result was matched to its frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CorrelationMode {
    /// The result carried the id of a pending frame
    Explicit,
    /// No usable id; attributed to the oldest pending frame
    Fifo,
}

/// A result matched to the frame that produced it
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Correlation {
    pub record: FrameRecord,
    pub mode: CorrelationMode,
    /// `arrival - sent_at + server_latency`, in milliseconds
    pub latency_ms: f64,
}

/// Ordered `frame_id -> FrameRecord` map
///
/// Frame ids grow monotonically, so key order is send order and the first
/// entry is always the oldest outstanding frame.
#[derive(Debug, Default)]
pub struct FrameTable {
    records: BTreeMap<u64, FrameRecord>,
    fifo_fallback: bool,
}

impl FrameTable {
    pub fn new() -> Self {
        Self {
            records: BTreeMap::new(),
            fifo_fallback: true,
        }
    }

    /// A table that only correlates on explicit ids
    pub fn strict() -> Self {
        Self {
            records: BTreeMap::new(),
            fifo_fallback: false,
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn contains(&self, frame_id: u64) -> bool {
        self.records.contains_key(&frame_id)
    }

    pub fn oldest(&self) -> Option<&FrameRecord> {
        self.records.values().next()
    }

    pub fn register(&mut self, record: FrameRecord) {
        debug_assert!(
            self.records
                .keys()
                .next_back()
                .is_none_or(|last| *last < record.frame_id),
            "frame ids must increase"
        );
        self.records.insert(record.frame_id, record);
    }

    /// Drop a record whose send failed. Returns `None` if it was already gone.
    pub fn remove(&mut self, frame_id: u64) -> Option<FrameRecord> {
        self.records.remove(&frame_id)
    }

    /// Match an inbound result against the pending frames and remove the match.
    ///
    /// `frame_id` is the id echoed by the service, if any. Returns `None` when
    /// nothing can be attributed; the caller renders the result anyway.
    pub fn correlate(
        &mut self,
        frame_id: Option<u64>,
        arrival: Timestamp,
        server_latency_ms: f64,
    ) -> Option<Correlation> {
        let explicit = frame_id.and_then(|id| self.records.remove(&id));
        let (record, mode) = match explicit {
            Some(record) => (record, CorrelationMode::Explicit),
            None if self.fifo_fallback => {
                let (_, record) = self.records.pop_first()?;
                (record, CorrelationMode::Fifo)
            }
            None => return None,
        };

        let round_trip = arrival.since(record.sent_at).as_millis() as f64;
        Some(Correlation {
            record,
            mode,
            latency_ms: round_trip + server_latency_ms,
        })
    }

    /// Forget every pending frame, returning how many were dropped.
    pub fn clear(&mut self) -> usize {
        let dropped = self.records.len();
        self.records.clear();
        dropped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn record(frame_id: u64, sent_at: u64) -> FrameRecord {
        FrameRecord {
            frame_id,
            capture_start: Timestamp::from_millis(sent_at.saturating_sub(20)),
            sent_at: Timestamp::from_millis(sent_at),
            capture_duration: Duration::from_millis(20),
        }
    }

    #[test]
    fn test_explicit_latency() {
        let mut table = FrameTable::new();
        table.register(record(7, 1000));

        let hit = table
            .correlate(Some(7), Timestamp::from_millis(1350), 40.0)
            .unwrap();

        assert_eq!(hit.mode, CorrelationMode::Explicit);
        assert_eq!(hit.latency_ms, 390.0);
        assert!(table.is_empty());
    }

    #[test]
    fn test_fractional_server_latency_kept() {
        let mut table = FrameTable::new();
        table.register(record(7, 1000));

        let hit = table
            .correlate(Some(7), Timestamp::from_millis(1350), 40.5)
            .unwrap();
        assert_eq!(hit.latency_ms, 390.5);
    }

    #[test]
    fn test_fifo_attributes_oldest() {
        let mut table = FrameTable::new();
        table.register(record(1, 1000));
        table.register(record(2, 1500));

        let hit = table
            .correlate(None, Timestamp::from_millis(1600), 0.0)
            .unwrap();

        assert_eq!(hit.mode, CorrelationMode::Fifo);
        assert_eq!(hit.record.frame_id, 1);
        assert_eq!(hit.latency_ms, 600.0);
        assert_eq!(table.len(), 1);
        assert!(table.contains(2));
    }

    #[test]
    fn test_out_of_order_explicit() {
        let mut table = FrameTable::new();
        table.register(record(1, 1000));
        table.register(record(2, 1500));

        let hit = table
            .correlate(Some(2), Timestamp::from_millis(1700), 0.0)
            .unwrap();
        assert_eq!(hit.record.frame_id, 2);
        assert_eq!(table.oldest().map(|r| r.frame_id), Some(1));
    }

    #[test]
    fn test_evicted_id_falls_back_to_fifo() {
        let mut table = FrameTable::new();
        table.register(record(1, 1000));
        table.register(record(2, 1500));
        assert!(table.remove(1).is_some());

        let hit = table
            .correlate(Some(1), Timestamp::from_millis(1800), 0.0)
            .unwrap();
        assert_eq!(hit.mode, CorrelationMode::Fifo);
        assert_eq!(hit.record.frame_id, 2);
    }

    #[test]
    fn test_empty_table_yields_nothing() {
        let mut table = FrameTable::new();
        assert!(table
            .correlate(None, Timestamp::from_millis(10), 0.0)
            .is_none());
        assert!(table
            .correlate(Some(3), Timestamp::from_millis(10), 0.0)
            .is_none());
    }

    #[test]
    fn test_strict_table_skips_fifo() {
        let mut table = FrameTable::strict();
        table.register(record(1, 1000));

        assert!(table
            .correlate(None, Timestamp::from_millis(1200), 0.0)
            .is_none());
        assert_eq!(table.len(), 1);

        let hit = table
            .correlate(Some(1), Timestamp::from_millis(1200), 0.0)
            .unwrap();
        assert_eq!(hit.mode, CorrelationMode::Explicit);
    }

    #[test]
    fn test_record_removed_once() {
        let mut table = FrameTable::new();
        table.register(record(1, 1000));

        assert!(table
            .correlate(Some(1), Timestamp::from_millis(1100), 0.0)
            .is_some());
        // the late send failure for the same frame finds nothing to remove
        assert!(table.remove(1).is_none());
        assert_eq!(table.clear(), 0);
    }
}
