//! Last-seen tracking and silence detection
//!
//! Every ingested metric overwrites the machine's [`LivenessRecord`]. Records
//! live in a bounded cache with a fixed time-to-live that is longer than the
//! silence threshold, so a machine that stops reporting is flagged by several
//! consecutive sweeps before its record expires. The sweep works on a
//! point-in-time view and never mutates the cache.

use std::time::Duration;

use chrono::{DateTime, Utc};
use moka::policy::EvictionPolicy;
use moka::sync::Cache;
use serde::Serialize;
use tracing::{debug, trace};

use crate::MachineType;
use crate::violations::ViolationReport;

/// How long a record survives without being refreshed
pub const LIVENESS_TTL: Duration = Duration::from_secs(120);

/// Silence after which a machine is reported as timed out
pub const SILENCE_THRESHOLD: Duration = Duration::from_secs(60);

pub const SWEEP_INTERVAL: Duration = Duration::from_secs(30);

pub const LIVENESS_CAPACITY: u64 = 50_000;

/// Metric name used when a timeout is reported as a violation
pub const TIMEOUT_METRIC: &str = "timeout";

#[derive(Debug, Clone, PartialEq)]
pub struct LivenessRecord {
    pub last_seen_at: DateTime<Utc>,
    pub display_name: String,
}

/// A machine that has been silent for at least the threshold
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeoutNotice {
    pub machine_type: MachineType,
    pub raw_id: String,
    pub display_name: String,
    pub last_seen_at: DateTime<Utc>,
    pub detected_at: DateTime<Utc>,
}

impl TimeoutNotice {
    pub fn silence(&self) -> chrono::Duration {
        self.detected_at - self.last_seen_at
    }

    /// Timeout expressed as a violation of the silence threshold, in seconds.
    pub fn to_report(&self, threshold: Duration) -> ViolationReport {
        ViolationReport {
            machine_type: self.machine_type,
            machine_id: self.raw_id.clone(),
            metric_name: TIMEOUT_METRIC.to_string(),
            value: self.silence().num_milliseconds() as f64 / 1000.0,
            timestamp: self.detected_at,
            threshold: Some(threshold.as_secs_f64()),
            display_name: Some(self.display_name.clone()),
        }
    }
}

pub struct LivenessMonitor {
    records: Cache<(MachineType, String), LivenessRecord>,
    silence_threshold: Duration,
}

impl Default for LivenessMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl LivenessMonitor {
    pub fn new() -> Self {
        Self::with_settings(LIVENESS_TTL, LIVENESS_CAPACITY, SILENCE_THRESHOLD)
    }

    pub fn with_settings(ttl: Duration, capacity: u64, silence_threshold: Duration) -> Self {
        let records = Cache::builder()
            .max_capacity(capacity)
            .time_to_live(ttl)
            .eviction_policy(EvictionPolicy::lru())
            .build();

        Self {
            records,
            silence_threshold,
        }
    }

    pub fn silence_threshold(&self) -> Duration {
        self.silence_threshold
    }

    pub fn touch(&self, machine_type: MachineType, raw_id: &str, display_name: &str) {
        self.touch_at(machine_type, raw_id, display_name, Utc::now());
    }

    pub fn touch_at(
        &self,
        machine_type: MachineType,
        raw_id: &str,
        display_name: &str,
        seen_at: DateTime<Utc>,
    ) {
        trace!("{machine_type} '{raw_id}' seen at {seen_at}");
        self.records.insert(
            (machine_type, raw_id.to_string()),
            LivenessRecord {
                last_seen_at: seen_at,
                display_name: display_name.to_string(),
            },
        );
    }

    pub fn last_seen(&self, machine_type: MachineType, raw_id: &str) -> Option<LivenessRecord> {
        self.records.get(&(machine_type, raw_id.to_string()))
    }

    /// Machines silent for at least the threshold as of `now`.
    pub fn sweep(&self, now: DateTime<Utc>) -> Vec<TimeoutNotice> {
        let threshold = chrono::Duration::from_std(self.silence_threshold)
            .unwrap_or_else(|_| chrono::Duration::seconds(60));

        let notices: Vec<TimeoutNotice> = self
            .records
            .iter()
            .filter(|(_, record)| now - record.last_seen_at >= threshold)
            .map(|(key, record)| TimeoutNotice {
                machine_type: key.0,
                raw_id: key.1.clone(),
                display_name: record.display_name,
                last_seen_at: record.last_seen_at,
                detected_at: now,
            })
            .collect();

        debug!(
            "liveness sweep: {} timed out of {} tracked",
            notices.len(),
            self.records.entry_count()
        );

        notices
    }

    pub fn tracked(&self) -> u64 {
        self.records.run_pending_tasks();
        self.records.entry_count()
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration as ChronoDuration;

    use super::*;

    #[test]
    fn test_sweep_before_threshold_is_quiet() {
        let monitor = LivenessMonitor::new();
        let t = Utc::now();
        monitor.touch_at(MachineType::Host, "m1", "box1", t);

        assert!(monitor.sweep(t + ChronoDuration::seconds(30)).is_empty());
    }

    #[test]
    fn test_sweep_after_threshold_fires() {
        let monitor = LivenessMonitor::new();
        let t = Utc::now();
        monitor.touch_at(MachineType::Host, "m1", "box1", t);

        let now = t + ChronoDuration::seconds(90);
        let notices = monitor.sweep(now);

        assert_eq!(notices.len(), 1);
        assert_eq!(notices[0].machine_type, MachineType::Host);
        assert_eq!(notices[0].raw_id, "m1");
        assert_eq!(notices[0].display_name, "box1");
        assert_eq!(notices[0].detected_at, now);
        assert_eq!(notices[0].silence(), ChronoDuration::seconds(90));
    }

    #[test]
    fn test_threshold_is_inclusive() {
        let monitor = LivenessMonitor::new();
        let t = Utc::now();
        monitor.touch_at(MachineType::Container, "c1", "web", t);

        assert_eq!(monitor.sweep(t + ChronoDuration::seconds(60)).len(), 1);
        assert!(monitor.sweep(t + ChronoDuration::milliseconds(59_999)).is_empty());
    }

    #[test]
    fn test_silent_machine_fires_on_every_sweep() {
        let monitor = LivenessMonitor::new();
        let t = Utc::now();
        monitor.touch_at(MachineType::Host, "m1", "box1", t);

        assert_eq!(monitor.sweep(t + ChronoDuration::seconds(60)).len(), 1);
        assert_eq!(monitor.sweep(t + ChronoDuration::seconds(90)).len(), 1);
        // still present, sweeps do not consume records
        assert!(monitor.last_seen(MachineType::Host, "m1").is_some());
    }

    #[test]
    fn test_touch_resets_silence() {
        let monitor = LivenessMonitor::new();
        let t = Utc::now();
        monitor.touch_at(MachineType::Host, "m1", "box1", t);
        monitor.touch_at(MachineType::Host, "m1", "box1-renamed", t + ChronoDuration::seconds(80));

        assert!(monitor.sweep(t + ChronoDuration::seconds(90)).is_empty());
        assert_eq!(
            monitor.last_seen(MachineType::Host, "m1").unwrap().display_name,
            "box1-renamed"
        );
    }

    #[test]
    fn test_records_expire_after_ttl() {
        let monitor = LivenessMonitor::with_settings(
            Duration::from_millis(50),
            100,
            SILENCE_THRESHOLD,
        );
        monitor.touch(MachineType::Host, "m1", "box1");
        assert_eq!(monitor.tracked(), 1);

        std::thread::sleep(Duration::from_millis(120));

        assert!(monitor.last_seen(MachineType::Host, "m1").is_none());
        let far_future = Utc::now() + ChronoDuration::seconds(600);
        assert!(monitor.sweep(far_future).is_empty());
    }

    #[test]
    fn test_capacity_evicts_least_recently_written() {
        let monitor = LivenessMonitor::with_settings(LIVENESS_TTL, 2, SILENCE_THRESHOLD);

        for raw_id in ["m1", "m2", "m3"] {
            monitor.touch(MachineType::Host, raw_id, raw_id);
            monitor.tracked();
        }

        assert_eq!(monitor.tracked(), 2);
        assert!(monitor.last_seen(MachineType::Host, "m1").is_none());
        assert!(monitor.last_seen(MachineType::Host, "m2").is_some());
        assert!(monitor.last_seen(MachineType::Host, "m3").is_some());
    }

    #[test]
    fn test_timeout_report() {
        let t = Utc::now();
        let notice = TimeoutNotice {
            machine_type: MachineType::Host,
            raw_id: "m1".to_string(),
            display_name: "box1".to_string(),
            last_seen_at: t,
            detected_at: t + ChronoDuration::seconds(90),
        };

        let report = notice.to_report(SILENCE_THRESHOLD);
        assert_eq!(report.metric_name, TIMEOUT_METRIC);
        assert_eq!(report.value, 90.0);
        assert_eq!(report.threshold, Some(60.0));
        assert_eq!(report.machine_id, "m1");
    }
}
