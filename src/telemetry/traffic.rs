//! Per-plane traffic accounting.
//!
//! Counters accumulate in memory keyed by device identity, app type, and
//! client IP, and flush to the [`ReportSink`] on a fixed interval in
//! batches of at most [`FLUSH_BATCH_SIZE`] records. Delivery is
//! at-most-once: a failed batch is logged and dropped, never retried.

// ============================================================================
// Imports
// ============================================================================

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::identifiers::{AppType, DeviceIdentity, Plane};
use crate::telemetry::report::{ReportSink, TrafficRecord};

// ============================================================================
// Constants
// ============================================================================

/// Maximum records per flush batch.
pub const FLUSH_BATCH_SIZE: usize = 1000;

// ============================================================================
// TrafficKey
// ============================================================================

/// Accumulation key for one counter.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TrafficKey {
    /// Device the traffic belongs to.
    pub identity: DeviceIdentity,
    /// Application type reported at login.
    pub app_type: AppType,
    /// Client IP the traffic arrived from.
    pub client_ip: IpAddr,
}

// ============================================================================
// TrafficTracker
// ============================================================================

/// Accumulates byte counts for one plane and flushes them periodically.
pub struct TrafficTracker {
    plane: Plane,
    counters: DashMap<TrafficKey, i64>,
    sink: Arc<dyn ReportSink>,
}

impl TrafficTracker {
    /// Creates a tracker for one plane.
    #[must_use]
    pub fn new(plane: Plane, sink: Arc<dyn ReportSink>) -> Self {
        Self {
            plane,
            counters: DashMap::new(),
            sink,
        }
    }

    /// Returns the plane this tracker accounts for.
    #[inline]
    #[must_use]
    pub fn plane(&self) -> Plane {
        self.plane
    }

    /// Adds bytes to a counter, creating it on first use.
    pub fn add_data_size(&self, key: TrafficKey, bytes: i64) {
        *self.counters.entry(key).or_insert(0) += bytes;
    }

    /// Returns the current value of a counter, if any.
    #[must_use]
    pub fn current(&self, key: &TrafficKey) -> Option<i64> {
        self.counters.get(key).map(|e| *e)
    }

    /// Returns the number of live counters.
    #[must_use]
    pub fn len(&self) -> usize {
        self.counters.len()
    }

    /// Returns `true` if no counters exist.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.counters.is_empty()
    }

    /// Flushes all positive counters to the sink now.
    ///
    /// Counters are removed before delivery; zero or negative counters are
    /// left in place untouched. Returns the number of records handed to the
    /// sink, including records in batches whose delivery failed.
    pub async fn flush_now(&self) -> usize {
        // Collect candidate keys first, then remove each under the
        // positive-value re-check so concurrent writers are not lost.
        let candidates: Vec<TrafficKey> = self
            .counters
            .iter()
            .filter(|e| *e.value() > 0)
            .map(|e| e.key().clone())
            .collect();

        let mut records = Vec::with_capacity(candidates.len());
        for key in candidates {
            if let Some((key, bytes)) = self.counters.remove_if(&key, |_, v| *v > 0) {
                records.push(TrafficRecord {
                    imei: key.identity.imei,
                    imsi: key.identity.imsi,
                    app_type: key.app_type.0,
                    client_ip: key.client_ip.to_string(),
                    bytes,
                });
            }
        }

        if records.is_empty() {
            return 0;
        }

        let total = records.len();
        for batch in records.chunks(FLUSH_BATCH_SIZE) {
            match serde_json::to_value(batch) {
                Ok(payload) => {
                    if let Err(e) = self.sink.send_traffic(self.plane, payload).await {
                        // At-most-once delivery: the batch is gone.
                        error!(
                            plane = %self.plane,
                            records = batch.len(),
                            error = %e,
                            "Traffic batch delivery failed, dropping batch"
                        );
                    }
                }
                Err(e) => {
                    error!(
                        plane = %self.plane,
                        error = %e,
                        "Traffic batch serialization failed, dropping batch"
                    );
                }
            }
        }

        debug!(plane = %self.plane, records = total, "Flushed traffic counters");
        total
    }

    /// Spawns the periodic flush task. The handle must be aborted on
    /// shutdown after a final [`flush_now`](Self::flush_now).
    pub fn spawn_flusher(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let tracker = Arc::clone(self);
        info!(plane = %tracker.plane, interval_secs = interval.as_secs(), "Starting traffic flusher");

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick fires immediately; skip it.
            ticker.tick().await;

            loop {
                ticker.tick().await;
                tracker.flush_now().await;
            }
        })
    }
}

impl std::fmt::Debug for TrafficTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrafficTracker")
            .field("plane", &self.plane)
            .field("counters", &self.counters.len())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use parking_lot::Mutex;

    use super::*;
    use crate::error::{Error, Result};
    use crate::telemetry::report::GatewayEvent;

    #[derive(Default)]
    struct RecordingSink {
        batches: Mutex<Vec<serde_json::Value>>,
        fail: std::sync::atomic::AtomicBool,
    }

    #[async_trait]
    impl ReportSink for RecordingSink {
        async fn send_traffic(&self, _plane: Plane, batch: serde_json::Value) -> Result<()> {
            if self.fail.load(std::sync::atomic::Ordering::SeqCst) {
                return Err(Error::report_flush(Plane::Control, "sink down"));
            }
            self.batches.lock().push(batch);
            Ok(())
        }

        async fn report_event(&self, _event: GatewayEvent) -> Result<()> {
            Ok(())
        }
    }

    fn key(imei: &str) -> TrafficKey {
        TrafficKey {
            identity: DeviceIdentity::new(imei, "460001").unwrap(),
            app_type: AppType(2),
            client_ip: "10.0.0.7".parse().unwrap(),
        }
    }

    #[tokio::test]
    async fn test_accumulation_and_flush() {
        let sink = Arc::new(RecordingSink::default());
        let tracker = TrafficTracker::new(Plane::Control, Arc::clone(&sink) as _);

        tracker.add_data_size(key("860123"), 100);
        tracker.add_data_size(key("860123"), 50);
        tracker.add_data_size(key("860999"), 7);
        assert_eq!(tracker.current(&key("860123")), Some(150));

        let flushed = tracker.flush_now().await;
        assert_eq!(flushed, 2);
        assert!(tracker.is_empty());

        let batches = sink.batches.lock();
        assert_eq!(batches.len(), 1);
        let records = batches[0].as_array().unwrap();
        assert_eq!(records.len(), 2);
    }

    #[tokio::test]
    async fn test_flush_skips_nonpositive_counters() {
        let sink = Arc::new(RecordingSink::default());
        let tracker = TrafficTracker::new(Plane::Media, Arc::clone(&sink) as _);

        tracker.add_data_size(key("860123"), 0);
        tracker.add_data_size(key("860999"), -5);

        assert_eq!(tracker.flush_now().await, 0);
        // Non-positive counters survive the flush untouched.
        assert_eq!(tracker.len(), 2);
        assert!(sink.batches.lock().is_empty());
    }

    #[tokio::test]
    async fn test_failed_batch_is_dropped_not_retried() {
        let sink = Arc::new(RecordingSink::default());
        sink.fail.store(true, std::sync::atomic::Ordering::SeqCst);
        let tracker = TrafficTracker::new(Plane::Control, Arc::clone(&sink) as _);

        tracker.add_data_size(key("860123"), 4096);
        tracker.flush_now().await;

        // Counter consumed even though delivery failed.
        assert!(tracker.is_empty());

        sink.fail.store(false, std::sync::atomic::Ordering::SeqCst);
        assert_eq!(tracker.flush_now().await, 0);
        assert!(sink.batches.lock().is_empty());
    }

    #[tokio::test]
    async fn test_flush_batches_capped() {
        let sink = Arc::new(RecordingSink::default());
        let tracker = TrafficTracker::new(Plane::Control, Arc::clone(&sink) as _);

        for i in 0..(FLUSH_BATCH_SIZE + 5) {
            tracker.add_data_size(key(&format!("imei{i}")), 1);
        }

        assert_eq!(tracker.flush_now().await, FLUSH_BATCH_SIZE + 5);

        let batches = sink.batches.lock();
        assert_eq!(batches.len(), 2);
        let sizes: Vec<usize> = batches.iter().map(|b| b.as_array().unwrap().len()).collect();
        assert!(sizes.contains(&FLUSH_BATCH_SIZE));
        assert!(sizes.contains(&5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_flusher_task_flushes_on_interval() {
        let sink = Arc::new(RecordingSink::default());
        let tracker = Arc::new(TrafficTracker::new(Plane::Control, Arc::clone(&sink) as _));

        tracker.add_data_size(key("860123"), 64);
        let handle = tracker.spawn_flusher(Duration::from_secs(300));

        tokio::time::sleep(Duration::from_secs(301)).await;
        tokio::task::yield_now().await;

        assert!(tracker.is_empty());
        assert_eq!(sink.batches.lock().len(), 1);
        handle.abort();
    }
}
