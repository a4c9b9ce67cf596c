//! Runtime knobs for the ingest pipeline and claim protocol.
//!
//! These are shared with `sluice-config`, which deserializes them from the
//! server configuration file.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Ingest queue, watcher and scan settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    /// How long a discovered path must sit in the queue before it is acted on.
    pub settle_delay_ms: u64,
    /// Drain loop wake-up cadence.
    pub tick_interval_ms: u64,
    /// Bounded queue capacity per library; overflow schedules a rescan.
    pub queue_capacity: usize,
    /// Periodic full scan interval for libraries that don't set their own.
    pub default_scan_interval_seconds: u64,
    /// Timestamps closer than this are considered unchanged.
    pub timestamp_tolerance_seconds: u64,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            settle_delay_ms: 2_000,
            tick_interval_ms: 500,
            queue_capacity: 4_096,
            default_scan_interval_seconds: 3_600,
            timestamp_tolerance_seconds: 5,
        }
    }
}

impl IngestConfig {
    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms.max(1))
    }

    pub fn default_scan_interval(&self) -> Duration {
        Duration::from_secs(self.default_scan_interval_seconds.max(1))
    }

    pub fn timestamp_tolerance(&self) -> chrono::Duration {
        chrono::Duration::seconds(
            i64::try_from(self.timestamp_tolerance_seconds).unwrap_or(i64::MAX),
        )
    }
}

/// Claim selection settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClaimConfig {
    /// Selection rounds before giving up when every candidate was lost.
    pub max_rounds: usize,
    /// Candidates fetched per round.
    pub candidates_per_round: usize,
}

impl Default for ClaimConfig {
    fn default() -> Self {
        Self {
            max_rounds: 3,
            candidates_per_round: 25,
        }
    }
}
