// Gateway counters and latency tracking

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Keep this many latency samples for percentile calculation
const MAX_SAMPLES: usize = 1000;

/// Running latency statistics
#[derive(Debug)]
pub struct LatencyStats {
    count: AtomicU64,
    total_ms: AtomicU64,
    min_ms: AtomicU64,
    max_ms: AtomicU64,
    samples: Mutex<Vec<u64>>,
}

impl LatencyStats {
    pub fn new() -> Self {
        Self {
            count: AtomicU64::new(0),
            total_ms: AtomicU64::new(0),
            min_ms: AtomicU64::new(u64::MAX),
            max_ms: AtomicU64::new(0),
            samples: Mutex::new(Vec::new()),
        }
    }

    pub fn record(&self, latency_ms: u64) {
        self.count.fetch_add(1, Ordering::Relaxed);
        self.total_ms.fetch_add(latency_ms, Ordering::Relaxed);
        self.min_ms.fetch_min(latency_ms, Ordering::Relaxed);
        self.max_ms.fetch_max(latency_ms, Ordering::Relaxed);

        if let Ok(mut samples) = self.samples.lock() {
            samples.push(latency_ms);
            if samples.len() > MAX_SAMPLES {
                samples.remove(0);
            }
        }
    }

    pub fn avg_ms(&self) -> f64 {
        let count = self.count.load(Ordering::Relaxed);
        if count == 0 {
            return 0.0;
        }
        self.total_ms.load(Ordering::Relaxed) as f64 / count as f64
    }

    fn percentile(&self, p: u8) -> u64 {
        let Ok(samples) = self.samples.lock() else {
            return 0;
        };
        if samples.is_empty() {
            return 0;
        }
        let mut sorted = samples.clone();
        sorted.sort_unstable();
        let index = (sorted.len() * p as usize / 100).min(sorted.len() - 1);
        sorted[index]
    }

    pub fn snapshot(&self) -> LatencySnapshot {
        let count = self.count.load(Ordering::Relaxed);
        LatencySnapshot {
            count,
            avg_ms: self.avg_ms(),
            min_ms: if count == 0 { 0 } else { self.min_ms.load(Ordering::Relaxed) },
            max_ms: self.max_ms.load(Ordering::Relaxed),
            p50_ms: self.percentile(50),
            p95_ms: self.percentile(95),
        }
    }
}

impl Default for LatencyStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Process-wide gateway counters, shared by every session
#[derive(Debug, Default)]
pub struct GatewayMetrics {
    sessions_opened: AtomicU64,
    sessions_active: AtomicU64,
    auth_refusals: AtomicU64,
    utterances: AtomicU64,
    sentences_synthesized: AtomicU64,
    synthesis_failures: AtomicU64,
    generation_failures: AtomicU64,
    aborts: AtomicU64,
    recognitions: AtomicU64,
    recognition_failures: AtomicU64,
    units_sent: AtomicU64,
    bytes_sent: AtomicU64,
    stale_units_dropped: AtomicU64,
    synthesis_latency: LatencyStats,
}

impl GatewayMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn session_opened(&self) {
        self.sessions_opened.fetch_add(1, Ordering::Relaxed);
        self.sessions_active.fetch_add(1, Ordering::Relaxed);
    }

    pub fn session_closed(&self) {
        let _ = self
            .sessions_active
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1));
    }

    pub fn auth_refused(&self) {
        self.auth_refusals.fetch_add(1, Ordering::Relaxed);
    }

    pub fn utterance_started(&self) {
        self.utterances.fetch_add(1, Ordering::Relaxed);
    }

    pub fn sentence_synthesized(&self, latency_ms: u64) {
        self.sentences_synthesized.fetch_add(1, Ordering::Relaxed);
        self.synthesis_latency.record(latency_ms);
    }

    pub fn synthesis_failed(&self) {
        self.synthesis_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn generation_failed(&self) {
        self.generation_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn aborted(&self) {
        self.aborts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn recognized(&self) {
        self.recognitions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn recognition_failed(&self) {
        self.recognition_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn unit_sent(&self, bytes: usize) {
        self.units_sent.fetch_add(1, Ordering::Relaxed);
        self.bytes_sent.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    /// A unit reached the writer after an abort and was not written.
    pub fn stale_unit_dropped(&self) {
        self.stale_units_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> GatewaySnapshot {
        GatewaySnapshot {
            sessions_opened: self.sessions_opened.load(Ordering::Relaxed),
            sessions_active: self.sessions_active.load(Ordering::Relaxed),
            auth_refusals: self.auth_refusals.load(Ordering::Relaxed),
            utterances: self.utterances.load(Ordering::Relaxed),
            sentences_synthesized: self.sentences_synthesized.load(Ordering::Relaxed),
            synthesis_failures: self.synthesis_failures.load(Ordering::Relaxed),
            generation_failures: self.generation_failures.load(Ordering::Relaxed),
            aborts: self.aborts.load(Ordering::Relaxed),
            recognitions: self.recognitions.load(Ordering::Relaxed),
            recognition_failures: self.recognition_failures.load(Ordering::Relaxed),
            units_sent: self.units_sent.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            stale_units_dropped: self.stale_units_dropped.load(Ordering::Relaxed),
            synthesis_latency: self.synthesis_latency.snapshot(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct LatencySnapshot {
    pub count: u64,
    pub avg_ms: f64,
    pub min_ms: u64,
    pub max_ms: u64,
    pub p50_ms: u64,
    pub p95_ms: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct GatewaySnapshot {
    pub sessions_opened: u64,
    pub sessions_active: u64,
    pub auth_refusals: u64,
    pub utterances: u64,
    pub sentences_synthesized: u64,
    pub synthesis_failures: u64,
    pub generation_failures: u64,
    pub aborts: u64,
    pub recognitions: u64,
    pub recognition_failures: u64,
    pub units_sent: u64,
    pub bytes_sent: u64,
    pub stale_units_dropped: u64,
    pub synthesis_latency: LatencySnapshot,
}

#[derive(Serialize)]
pub struct SystemMetrics {
    pub cpu_usage_percent: f32,
    pub memory_used_mb: u64,
    pub memory_total_mb: u64,
    pub memory_usage_percent: f32,
    pub uptime_seconds: u64,
    pub system_load: Option<f64>,
}

impl SystemMetrics {
    pub fn collect(started: Instant) -> Self {
        let mut system = sysinfo::System::new();
        system.refresh_cpu();
        system.refresh_memory();

        let memory_used = system.used_memory();
        let memory_total = system.total_memory();
        let memory_usage_percent = if memory_total > 0 {
            (memory_used as f64 / memory_total as f64 * 100.0) as f32
        } else {
            0.0
        };

        Self {
            cpu_usage_percent: system.global_cpu_info().cpu_usage(),
            memory_used_mb: memory_used / 1024 / 1024,
            memory_total_mb: memory_total / 1024 / 1024,
            memory_usage_percent,
            uptime_seconds: started.elapsed().as_secs(),
            system_load: load_average(),
        }
    }
}

#[cfg(unix)]
fn load_average() -> Option<f64> {
    std::fs::read_to_string("/proc/loadavg")
        .ok()?
        .split_whitespace()
        .next()?
        .parse()
        .ok()
}

#[cfg(not(unix))]
fn load_average() -> Option<f64> {
    None
}

#[derive(Serialize)]
pub struct MetricsResponse {
    pub timestamp: DateTime<Utc>,
    pub system: SystemMetrics,
    pub gateway: GatewaySnapshot,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_latency_stats() {
        let stats = LatencyStats::new();
        assert_eq!(stats.snapshot().min_ms, 0);

        for ms in [30, 10, 20, 40] {
            stats.record(ms);
        }
        let snap = stats.snapshot();
        assert_eq!(snap.count, 4);
        assert_eq!(snap.avg_ms, 25.0);
        assert_eq!(snap.min_ms, 10);
        assert_eq!(snap.max_ms, 40);
        assert_eq!(snap.p50_ms, 30);
        assert_eq!(snap.p95_ms, 40);
    }

    #[test]
    fn test_session_gauge_never_underflows() {
        let metrics = GatewayMetrics::new();
        metrics.session_closed();
        metrics.session_opened();
        metrics.session_opened();
        metrics.session_closed();

        let snap = metrics.snapshot();
        assert_eq!(snap.sessions_opened, 2);
        assert_eq!(snap.sessions_active, 1);
    }

    #[test]
    fn test_units_and_bytes() {
        let metrics = GatewayMetrics::new();
        metrics.unit_sent(8192);
        metrics.unit_sent(100);
        let snap = metrics.snapshot();
        assert_eq!(snap.units_sent, 2);
        assert_eq!(snap.bytes_sent, 8292);
    }
}
