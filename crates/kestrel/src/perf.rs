// perf.rs - Timing instrumentation for Kestrel
//
// Controlled via the KESTREL_PERF environment variable.
//
// Usage:
//   KESTREL_PERF=1 kestrel signature script.R --offset 10      # timing logs
//   KESTREL_PERF=verbose kestrel analysis-stats ./pkg          # plus threshold warnings

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, OnceLock};
use std::time::{Duration, Instant};

static PERF_ENABLED: OnceLock<bool> = OnceLock::new();
static PERF_VERBOSE: OnceLock<bool> = OnceLock::new();

pub fn is_enabled() -> bool {
    *PERF_ENABLED.get_or_init(|| {
        std::env::var("KESTREL_PERF")
            .map(|v| !v.is_empty() && v != "0" && v.to_lowercase() != "false")
            .unwrap_or(false)
    })
}

pub fn is_verbose() -> bool {
    *PERF_VERBOSE.get_or_init(|| {
        std::env::var("KESTREL_PERF")
            .map(|v| v.to_lowercase() == "verbose")
            .unwrap_or(false)
    })
}

/// RAII timing guard that logs duration on drop
///
/// ```
/// use kestrel::perf::TimingGuard;
///
/// let _guard = TimingGuard::new("operation_name");
/// // ... do work ...
/// // Duration logged when _guard goes out of scope
/// ```
pub struct TimingGuard {
    start: Instant,
    name: &'static str,
    threshold_warn_ms: Option<u64>,
    enabled: bool,
}

impl TimingGuard {
    pub fn new(name: &'static str) -> Self {
        Self {
            start: Instant::now(),
            name,
            threshold_warn_ms: None,
            enabled: is_enabled(),
        }
    }

    /// Like [`TimingGuard::new`], additionally warning in verbose mode when
    /// the scope takes longer than `threshold_ms`.
    pub fn with_threshold(name: &'static str, threshold_ms: u64) -> Self {
        Self {
            threshold_warn_ms: Some(threshold_ms),
            ..Self::new(name)
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Stop timing without logging and return the duration.
    pub fn finish(self) -> Duration {
        let elapsed = self.start.elapsed();
        std::mem::forget(self);
        elapsed
    }
}

impl Drop for TimingGuard {
    fn drop(&mut self) {
        if !self.enabled {
            return;
        }

        let elapsed = self.start.elapsed();
        log::info!("[PERF] {} completed in {:?}", self.name, elapsed);

        if let Some(threshold) = self.threshold_warn_ms {
            if elapsed.as_millis() > threshold as u128 && is_verbose() {
                log::warn!(
                    "[PERF] {} exceeded threshold ({}ms > {}ms)",
                    self.name,
                    elapsed.as_millis(),
                    threshold
                );
            }
        }
    }
}

/// Aggregated package index metrics.
#[derive(Debug, Default, Clone)]
pub struct PerfMetrics {
    pub package_scan_duration: Option<Duration>,
    pub packages_found: usize,
    /// Number of packages whose metadata was loaded from disk.
    pub metadata_loads: usize,
    pub metadata_load_total_duration: Duration,
}

impl PerfMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn log_summary(&self) {
        if !is_enabled() {
            return;
        }

        log::info!("[PERF] === Package Index Summary ===");
        if let Some(d) = self.package_scan_duration {
            log::info!(
                "[PERF] Library scan: {:?} ({} packages)",
                d,
                self.packages_found
            );
        }
        if self.metadata_loads > 0 {
            log::info!(
                "[PERF] Metadata loads: {} in {:?}",
                self.metadata_loads,
                self.metadata_load_total_duration
            );
        }
    }
}

static INDEX_METRICS: OnceLock<Mutex<PerfMetrics>> = OnceLock::new();

pub fn index_metrics() -> &'static Mutex<PerfMetrics> {
    INDEX_METRICS.get_or_init(|| Mutex::new(PerfMetrics::new()))
}

pub fn record_package_scan(duration: Duration, packages_found: usize) {
    if !is_enabled() {
        return;
    }
    if let Ok(mut metrics) = index_metrics().lock() {
        metrics.package_scan_duration = Some(duration);
        metrics.packages_found = packages_found;
    }
}

static METADATA_LOADS: AtomicUsize = AtomicUsize::new(0);

/// Count a package metadata load. The counter is always maintained; the
/// duration is aggregated only when timing is enabled.
pub fn record_metadata_load(duration: Duration) {
    METADATA_LOADS.fetch_add(1, Ordering::Relaxed);
    if !is_enabled() {
        return;
    }
    if let Ok(mut metrics) = index_metrics().lock() {
        metrics.metadata_loads += 1;
        metrics.metadata_load_total_duration += duration;
    }
}

pub fn metadata_load_count() -> usize {
    METADATA_LOADS.load(Ordering::Relaxed)
}

/// Returns the peak resident set size (RSS) of the current process in bytes.
///
/// - **macOS**: Uses `libc::getrusage` (`ru_maxrss`, which is in bytes on macOS).
/// - **Linux**: Reads `/proc/self/status` and parses the `VmHWM` field (reported in kB).
/// - **Other platforms**: Returns `None`.
pub fn peak_rss_bytes() -> Option<u64> {
    #[cfg(target_os = "macos")]
    {
        peak_rss_macos()
    }
    #[cfg(target_os = "linux")]
    {
        peak_rss_linux()
    }
    #[cfg(not(any(target_os = "macos", target_os = "linux")))]
    {
        None
    }
}

#[cfg(target_os = "macos")]
fn peak_rss_macos() -> Option<u64> {
    use std::mem::MaybeUninit;
    let mut usage = MaybeUninit::<libc::rusage>::uninit();
    // SAFETY: getrusage writes into the provided pointer; we check the return value.
    let ret = unsafe { libc::getrusage(libc::RUSAGE_SELF, usage.as_mut_ptr()) };
    if ret == 0 {
        // SAFETY: getrusage succeeded, so the struct is fully initialized.
        let usage = unsafe { usage.assume_init() };
        Some(usage.ru_maxrss as u64)
    } else {
        None
    }
}

#[cfg(target_os = "linux")]
fn peak_rss_linux() -> Option<u64> {
    let status = std::fs::read_to_string("/proc/self/status").ok()?;
    status.lines().find_map(|line| {
        let rest = line.strip_prefix("VmHWM:")?.trim();
        let kb: u64 = rest.strip_suffix("kB").unwrap_or(rest).trim().parse().ok()?;
        Some(kb * 1024)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timing_guard_finish() {
        let guard = TimingGuard::with_threshold("test", 1);
        std::thread::sleep(Duration::from_millis(10));
        assert!(guard.elapsed().as_millis() >= 10);
        assert!(guard.finish().as_millis() >= 10);
    }

    #[test]
    fn test_metadata_load_counter_increases() {
        let before = metadata_load_count();
        record_metadata_load(Duration::from_millis(1));
        assert!(metadata_load_count() > before);
    }

    #[test]
    fn test_peak_rss_bytes_returns_value_on_supported_platforms() {
        let rss = peak_rss_bytes();
        if cfg!(any(target_os = "macos", target_os = "linux")) {
            assert!(rss.is_some_and(|bytes| bytes > 0));
        } else {
            assert!(rss.is_none());
        }
    }
}
