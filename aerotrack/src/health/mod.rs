//! System health sampling.
//!
//! Every ten seconds the monitor samples CPU, memory, and temperature
//! through a platform provider and keeps the latest snapshot for the
//! API. When thresholds are configured, breaches are pushed to the
//! webhook dispatcher (debounced there by alert type).
//!
//! The Linux provider reads `/proc/stat`, `/proc/meminfo`, and the
//! thermal sysfs; other platforms get a null provider that reports
//! zeros, which keeps tests and non-Linux hosts working.

mod readiness;

pub use readiness::{ComponentState, Readiness};

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::webhook::{HealthData, HealthThresholds, WebhookDispatcher};

const SAMPLE_INTERVAL: Duration = Duration::from_secs(10);

/// Latest sampled system metrics, served by `/api/v1/receiver/health`.
#[derive(Debug, Clone, Default, Serialize)]
pub struct HealthSnapshot {
    pub cpu_percent: f64,
    pub memory_percent: f64,
    pub memory_used_mb: u64,
    pub memory_total_mb: u64,
    pub temp_celsius: f64,
    pub uptime_secs: u64,
    pub uptime: String,
    pub threads: usize,
    pub platform: String,
}

/// Platform metrics source. Implementations may keep state between
/// samples (the CPU percentage is a delta over `/proc/stat` readings).
pub trait PlatformMetrics: Send {
    fn cpu_percent(&mut self) -> f64;
    /// (used percent, used MB, total MB)
    fn memory(&mut self) -> (f64, u64, u64);
    fn temperature(&mut self) -> f64;
    fn thread_count(&mut self) -> usize;
}

/// Provider for the current platform.
pub fn platform_metrics() -> Box<dyn PlatformMetrics> {
    #[cfg(target_os = "linux")]
    {
        Box::new(linux::LinuxMetrics::default())
    }
    #[cfg(not(target_os = "linux"))]
    {
        Box::new(NullMetrics)
    }
}

/// Fallback provider reporting zeros.
pub struct NullMetrics;

impl PlatformMetrics for NullMetrics {
    fn cpu_percent(&mut self) -> f64 {
        0.0
    }
    fn memory(&mut self) -> (f64, u64, u64) {
        (0.0, 0, 0)
    }
    fn temperature(&mut self) -> f64 {
        0.0
    }
    fn thread_count(&mut self) -> usize {
        0
    }
}

/// Periodic health sampler.
pub struct HealthMonitor {
    start: Instant,
    thresholds: HealthThresholds,
    dispatcher: Option<Arc<WebhookDispatcher>>,
    metrics: Mutex<Box<dyn PlatformMetrics>>,
    latest: Mutex<HealthSnapshot>,
}

impl HealthMonitor {
    pub fn new(thresholds: HealthThresholds, dispatcher: Option<Arc<WebhookDispatcher>>) -> Self {
        Self::with_metrics(thresholds, dispatcher, platform_metrics())
    }

    /// Construct with an explicit provider; used by tests.
    pub fn with_metrics(
        thresholds: HealthThresholds,
        dispatcher: Option<Arc<WebhookDispatcher>>,
        metrics: Box<dyn PlatformMetrics>,
    ) -> Self {
        Self {
            start: Instant::now(),
            thresholds,
            dispatcher,
            metrics: Mutex::new(metrics),
            latest: Mutex::new(HealthSnapshot {
                platform: platform_name(),
                ..Default::default()
            }),
        }
    }

    /// Sample on a fixed cadence until cancelled.
    pub async fn run(&self, shutdown: CancellationToken) {
        info!("Health monitor started");
        let mut interval = tokio::time::interval(SAMPLE_INTERVAL);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = interval.tick() => self.collect(),
            }
        }
        info!("Health monitor stopped");
    }

    /// Latest snapshot with a fresh uptime.
    pub fn snapshot(&self) -> HealthSnapshot {
        let mut snapshot = self.latest.lock().unwrap().clone();
        let uptime = self.start.elapsed().as_secs();
        snapshot.uptime_secs = uptime;
        snapshot.uptime = format_uptime(uptime);
        snapshot
    }

    pub fn uptime(&self) -> Duration {
        self.start.elapsed()
    }

    fn collect(&self) {
        let snapshot = {
            let mut metrics = self.metrics.lock().unwrap();
            let (memory_percent, memory_used_mb, memory_total_mb) = metrics.memory();
            let uptime = self.start.elapsed().as_secs();
            HealthSnapshot {
                cpu_percent: metrics.cpu_percent(),
                memory_percent,
                memory_used_mb,
                memory_total_mb,
                temp_celsius: metrics.temperature(),
                uptime_secs: uptime,
                uptime: format_uptime(uptime),
                threads: metrics.thread_count(),
                platform: platform_name(),
            }
        };

        debug!(
            cpu = format!("{:.1}", snapshot.cpu_percent),
            mem = format!("{:.1}", snapshot.memory_percent),
            temp = format!("{:.1}", snapshot.temp_celsius),
            "Health sample"
        );

        self.check_thresholds(&snapshot);
        *self.latest.lock().unwrap() = snapshot;
    }

    fn check_thresholds(&self, snapshot: &HealthSnapshot) {
        let Some(dispatcher) = &self.dispatcher else {
            return;
        };

        let health = HealthData {
            cpu_percent: snapshot.cpu_percent,
            memory_percent: snapshot.memory_percent,
            temp_celsius: snapshot.temp_celsius,
            uptime_secs: snapshot.uptime_secs,
        };

        if self.thresholds.cpu_percent > 0.0 && snapshot.cpu_percent > self.thresholds.cpu_percent {
            dispatcher.send_health_alert(
                health.clone(),
                &format!("High CPU usage: {:.1}%", snapshot.cpu_percent),
            );
        }
        if self.thresholds.memory_percent > 0.0
            && snapshot.memory_percent > self.thresholds.memory_percent
        {
            dispatcher.send_health_alert(
                health.clone(),
                &format!("High memory usage: {:.1}%", snapshot.memory_percent),
            );
        }
        if self.thresholds.temp_celsius > 0.0
            && snapshot.temp_celsius > self.thresholds.temp_celsius
        {
            dispatcher.send_health_alert(
                health,
                &format!("High temperature: {:.1}C", snapshot.temp_celsius),
            );
        }
    }
}

fn platform_name() -> String {
    format!("{}/{}", std::env::consts::OS, std::env::consts::ARCH)
}

/// Render seconds as `1h2m3s`, the way uptimes read in logs.
fn format_uptime(secs: u64) -> String {
    let hours = secs / 3600;
    let minutes = (secs % 3600) / 60;
    let seconds = secs % 60;
    if hours > 0 {
        format!("{}h{}m{}s", hours, minutes, seconds)
    } else if minutes > 0 {
        format!("{}m{}s", minutes, seconds)
    } else {
        format!("{}s", seconds)
    }
}

#[cfg(target_os = "linux")]
mod linux {
    use super::PlatformMetrics;

    /// Provider backed by procfs and the thermal sysfs.
    #[derive(Default)]
    pub struct LinuxMetrics {
        prev_idle: u64,
        prev_total: u64,
    }

    impl PlatformMetrics for LinuxMetrics {
        fn cpu_percent(&mut self) -> f64 {
            let Ok(stat) = std::fs::read_to_string("/proc/stat") else {
                return 0.0;
            };
            let Some((idle, total)) = parse_cpu_line(&stat) else {
                return 0.0;
            };

            // First sample has no baseline to diff against.
            if self.prev_total == 0 {
                self.prev_idle = idle;
                self.prev_total = total;
                return 0.0;
            }

            let total_delta = total.saturating_sub(self.prev_total);
            let idle_delta = idle.saturating_sub(self.prev_idle);
            self.prev_idle = idle;
            self.prev_total = total;

            if total_delta == 0 {
                return 0.0;
            }
            (1.0 - idle_delta as f64 / total_delta as f64) * 100.0
        }

        fn memory(&mut self) -> (f64, u64, u64) {
            let Ok(meminfo) = std::fs::read_to_string("/proc/meminfo") else {
                return (0.0, 0, 0);
            };
            parse_meminfo(&meminfo)
        }

        fn temperature(&mut self) -> f64 {
            const PATHS: [&str; 2] = [
                "/sys/class/thermal/thermal_zone0/temp",
                "/sys/class/hwmon/hwmon0/temp1_input",
            ];
            for path in PATHS {
                if let Ok(raw) = std::fs::read_to_string(path) {
                    if let Ok(temp) = raw.trim().parse::<f64>() {
                        return normalize_temp(temp);
                    }
                }
            }
            0.0
        }

        fn thread_count(&mut self) -> usize {
            // Field 20 of /proc/self/stat is num_threads. The comm field
            // (2) is parenthesized and may contain spaces, so split after
            // the closing paren.
            let Ok(stat) = std::fs::read_to_string("/proc/self/stat") else {
                return 0;
            };
            let Some(rest) = stat.rsplit(") ").next() else {
                return 0;
            };
            rest.split_whitespace()
                .nth(17)
                .and_then(|v| v.parse().ok())
                .unwrap_or(0)
        }
    }

    /// Extract (idle, total) jiffies from the aggregate `cpu ` line.
    pub(super) fn parse_cpu_line(stat: &str) -> Option<(u64, u64)> {
        let line = stat.lines().find(|l| l.starts_with("cpu "))?;
        let fields: Vec<u64> = line
            .split_whitespace()
            .skip(1)
            .filter_map(|v| v.parse().ok())
            .collect();
        if fields.len() < 5 {
            return None;
        }
        let total: u64 = fields.iter().sum();
        Some((fields[3], total))
    }

    /// (used percent, used MB, total MB) from /proc/meminfo contents.
    pub(super) fn parse_meminfo(meminfo: &str) -> (f64, u64, u64) {
        let mut total_kb = 0u64;
        let mut available_kb = 0u64;
        for line in meminfo.lines() {
            let mut fields = line.split_whitespace();
            match fields.next() {
                Some("MemTotal:") => total_kb = fields.next().and_then(|v| v.parse().ok()).unwrap_or(0),
                Some("MemAvailable:") => {
                    available_kb = fields.next().and_then(|v| v.parse().ok()).unwrap_or(0)
                }
                _ => {}
            }
        }
        if total_kb == 0 {
            return (0.0, 0, 0);
        }
        let used_kb = total_kb.saturating_sub(available_kb);
        (
            used_kb as f64 / total_kb as f64 * 100.0,
            used_kb / 1024,
            total_kb / 1024,
        )
    }

    /// Thermal zones report millidegrees; hwmon sometimes reports degrees.
    pub(super) fn normalize_temp(temp: f64) -> f64 {
        if temp > 1000.0 {
            temp / 1000.0
        } else {
            temp
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Provider with canned values for threshold tests.
    struct FakeMetrics {
        cpu: f64,
        mem: (f64, u64, u64),
        temp: f64,
    }

    impl PlatformMetrics for FakeMetrics {
        fn cpu_percent(&mut self) -> f64 {
            self.cpu
        }
        fn memory(&mut self) -> (f64, u64, u64) {
            self.mem
        }
        fn temperature(&mut self) -> f64 {
            self.temp
        }
        fn thread_count(&mut self) -> usize {
            8
        }
    }

    #[test]
    fn test_collect_updates_snapshot() {
        let monitor = HealthMonitor::with_metrics(
            HealthThresholds::default(),
            None,
            Box::new(FakeMetrics {
                cpu: 12.5,
                mem: (40.0, 2048, 5120),
                temp: 55.0,
            }),
        );

        monitor.collect();

        let snap = monitor.snapshot();
        assert_eq!(snap.cpu_percent, 12.5);
        assert_eq!(snap.memory_used_mb, 2048);
        assert_eq!(snap.memory_total_mb, 5120);
        assert_eq!(snap.temp_celsius, 55.0);
        assert_eq!(snap.threads, 8);
        assert!(!snap.platform.is_empty());
    }

    #[test]
    fn test_thresholds_without_dispatcher_are_harmless() {
        let monitor = HealthMonitor::with_metrics(
            HealthThresholds {
                cpu_percent: 1.0,
                memory_percent: 1.0,
                temp_celsius: 1.0,
            },
            None,
            Box::new(FakeMetrics {
                cpu: 99.0,
                mem: (99.0, 1, 1),
                temp: 99.0,
            }),
        );
        monitor.collect();
    }

    #[test]
    fn test_format_uptime() {
        assert_eq!(format_uptime(5), "5s");
        assert_eq!(format_uptime(65), "1m5s");
        assert_eq!(format_uptime(3600), "1h0m0s");
        assert_eq!(format_uptime(3725), "1h2m5s");
    }

    #[cfg(target_os = "linux")]
    mod linux_parsers {
        use super::super::linux::{normalize_temp, parse_cpu_line, parse_meminfo};

        #[test]
        fn test_parse_cpu_line() {
            let stat = "cpu  100 0 50 800 20 0 10 0 0 0\ncpu0 50 0 25 400 10 0 5 0 0 0\n";
            let (idle, total) = parse_cpu_line(stat).unwrap();
            assert_eq!(idle, 800);
            assert_eq!(total, 980);
        }

        #[test]
        fn test_parse_cpu_line_missing() {
            assert!(parse_cpu_line("intr 12345\n").is_none());
        }

        #[test]
        fn test_parse_meminfo() {
            let meminfo = "MemTotal:       8192000 kB\nMemFree:        1000000 kB\nMemAvailable:   4096000 kB\n";
            let (percent, used_mb, total_mb) = parse_meminfo(meminfo);
            assert!((percent - 50.0).abs() < 0.01);
            assert_eq!(used_mb, 4000);
            assert_eq!(total_mb, 8000);
        }

        #[test]
        fn test_normalize_temp_millidegrees() {
            assert_eq!(normalize_temp(52000.0), 52.0);
            assert_eq!(normalize_temp(52.0), 52.0);
        }
    }
}
