//! Activity buckets

use std::time::Duration;

use tokio::time::Instant;

use crate::state::cache::DeviceRecord;

/// Recency-of-use class that sets a device's polling interval
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ActivityBucket {
    Low,
    Medium,
    High,
}

/// Bucket thresholds and intervals
#[derive(Debug, Clone)]
pub struct Options {
    /// Activity more recent than this is HIGH
    pub high_window: Duration,
    /// Activity more recent than this (and not HIGH) is MEDIUM
    pub medium_window: Duration,
    pub high_interval: Duration,
    pub medium_interval: Duration,
    pub low_interval: Duration,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            high_window: Duration::from_secs(60),
            medium_window: Duration::from_secs(300), // 5 minutes
            high_interval: Duration::from_secs(3),
            medium_interval: Duration::from_secs(8),
            low_interval: Duration::from_secs(20),
        }
    }
}

impl Options {
    pub fn interval(&self, bucket: ActivityBucket) -> Duration {
        match bucket {
            ActivityBucket::High => self.high_interval,
            ActivityBucket::Medium => self.medium_interval,
            ActivityBucket::Low => self.low_interval,
        }
    }

    /// Bucket for a given time since last activity
    pub fn bucket_for(&self, since_activity: Option<Duration>) -> ActivityBucket {
        match since_activity {
            Some(elapsed) if elapsed < self.high_window => ActivityBucket::High,
            Some(elapsed) if elapsed < self.medium_window => ActivityBucket::Medium,
            _ => ActivityBucket::Low,
        }
    }

    /// Bucket of a device. Devices with an unconfirmed prediction are HIGH.
    pub fn bucket(&self, record: &DeviceRecord, now: Instant) -> ActivityBucket {
        if record.pending_optimistic {
            return ActivityBucket::High;
        }
        self.bucket_for(last_activity(record).map(|t| now.saturating_duration_since(t)))
    }
}

/// Last command or observed state change, whichever is newer
pub fn last_activity(record: &DeviceRecord) -> Option<Instant> {
    match (record.last_command_at, record.last_changed_at) {
        (Some(a), Some(b)) => Some(a.max(b)),
        (a, b) => a.or(b),
    }
}
