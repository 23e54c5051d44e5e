//! Resident-memory sampling with edge-triggered threshold events.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::Serialize;
use tracing::{info, warn};

/// Threshold transition reported by [`MemoryMonitor::check_threshold`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum MemoryEvent {
    /// Usage crossed above the limit since the previous check.
    Exceeded { usage_bytes: u64, limit_bytes: u64 },
    /// Usage fell back to or below the limit since the previous check.
    Recovered { usage_bytes: u64, limit_bytes: u64 },
    /// No crossing happened.
    Steady,
}

type Sampler = Box<dyn Fn() -> Option<u64> + Send + Sync>;

/// Watches process memory. Purely observational: it never evicts anything itself.
pub struct MemoryMonitor {
    sampler: Sampler,
    above: AtomicBool,
}

impl fmt::Debug for MemoryMonitor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryMonitor").field("above", &self.above.load(Ordering::Relaxed)).finish()
    }
}

impl Default for MemoryMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryMonitor {
    /// Monitor backed by the operating system's view of this process.
    pub fn new() -> Self {
        Self::with_sampler(current_rss_bytes)
    }

    /// Monitor with a custom usage sampler.
    pub fn with_sampler(sampler: impl Fn() -> Option<u64> + Send + Sync + 'static) -> Self {
        Self { sampler: Box::new(sampler), above: AtomicBool::new(false) }
    }

    /// Resident memory of the process in bytes, or 0 when the platform cannot report it.
    pub fn get_current_usage(&self) -> u64 {
        (self.sampler)().unwrap_or(0)
    }

    /// Emit `Exceeded` once per upward crossing of `limit` and `Recovered` once per downward
    /// crossing. Repeated checks on the same side report `Steady`.
    pub fn check_threshold(&self, limit: u64) -> MemoryEvent {
        let usage_bytes = self.get_current_usage();
        let is_above = usage_bytes > limit;
        let was_above = self.above.swap(is_above, Ordering::AcqRel);

        match (was_above, is_above) {
            (false, true) => {
                warn!(target: "memory", usage_bytes, limit_bytes = limit, "memory limit exceeded");
                MemoryEvent::Exceeded { usage_bytes, limit_bytes: limit }
            }
            (true, false) => {
                info!(target: "memory", usage_bytes, limit_bytes = limit, "memory usage recovered");
                MemoryEvent::Recovered { usage_bytes, limit_bytes: limit }
            }
            _ => MemoryEvent::Steady,
        }
    }
}

#[cfg(target_os = "linux")]
pub fn current_rss_bytes() -> Option<u64> {
    let statm = std::fs::read_to_string("/proc/self/statm").ok()?;
    let mut fields = statm.split_whitespace();
    let _size_pages = fields.next()?;
    let rss_pages = fields.next()?.parse::<u64>().ok()?;
    let page_size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    if page_size <= 0 {
        return None;
    }
    Some(rss_pages.saturating_mul(page_size as u64))
}

#[cfg(target_os = "macos")]
pub fn current_rss_bytes() -> Option<u64> {
    let mut info = libc::mach_task_basic_info {
        virtual_size: 0,
        resident_size: 0,
        resident_size_max: 0,
        user_time: libc::time_value_t { seconds: 0, microseconds: 0 },
        system_time: libc::time_value_t { seconds: 0, microseconds: 0 },
        policy: 0,
        suspend_count: 0,
    };

    let mut count = libc::MACH_TASK_BASIC_INFO_COUNT;
    #[allow(deprecated)]
    let kr = unsafe {
        libc::task_info(
            libc::mach_task_self(),
            libc::MACH_TASK_BASIC_INFO,
            (&mut info as *mut libc::mach_task_basic_info).cast(),
            &mut count,
        )
    };
    if kr == libc::KERN_SUCCESS { Some(info.resident_size) } else { None }
}

#[cfg(not(any(target_os = "linux", target_os = "macos")))]
pub fn current_rss_bytes() -> Option<u64> {
    None
}
