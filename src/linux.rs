//! Linux `/proc`, `/sys` and `sysconf` readers.
//!
//! Every reader degrades to an empty result (`None` or an empty `Vec`) when
//! its file cannot be read, so callers can print `<unknown>` instead of
//! failing.

use std::fs;
use std::io;
use std::path::Path;

use crate::cpuid::NativeCpuid;
use crate::{CpuArchitecture, CpuInfo, Vendor};

pub const CPU_INFO: &str = "/proc/cpuinfo";
pub const CPU_SYSFS: &str = "/sys/devices/system/cpu";
pub const OS_RELEASE: &str = "/etc/os-release";
pub const UPTIME: &str = "/proc/uptime";
pub const STAT: &str = "/proc/stat";
pub const POWER_SUPPLY: &str = "/sys/class/power_supply";

#[cfg(feature = "linux")]
impl CpuInfo {
    /// Probes the running processor.
    ///
    /// On x86 everything comes from CPUID. Where CPUID is unavailable or
    /// silent, the model name is taken from `/proc/cpuinfo` and the logical
    /// core count from `/sys/devices/system/cpu`.
    ///
    /// ```no_run
    /// use cube::CpuInfo;
    ///
    /// let cpu = CpuInfo::new();
    /// println!("{} ({})", cpu.model, cpu.vendor);
    /// println!("{:?} logical / {:?} physical", cpu.total_logical_cores, cpu.total_physical_cores);
    /// ```
    pub fn new() -> Self {
        let mut info = if NativeCpuid::is_supported() {
            Self::from_cpuid(&NativeCpuid)
        } else {
            log::info!(target: "cube::linux", "CPUID unavailable on {}, using procfs", std::env::consts::ARCH);
            Self {
                architecture: CpuArchitecture::current(),
                vendor: Vendor::Unknown,
                model: String::new(),
                total_logical_cores: None,
                total_physical_cores: None,
                hyper_threading: false,
                features: None,
            }
        };

        if info.model.is_empty() {
            info.model = read_model_name(CPU_INFO).unwrap_or_else(|| "Unknown".to_string());
        }
        if info.total_logical_cores.is_none() {
            info.total_logical_cores = count_logical_cores(CPU_SYSFS);
        }

        info
    }
}

#[cfg(feature = "linux")]
impl Default for CpuInfo {
    fn default() -> Self {
        Self::new()
    }
}

/// `model name` from a `/proc/cpuinfo`-formatted file.
pub fn read_model_name(path: impl AsRef<Path>) -> Option<String> {
    read_logged(path.as_ref()).and_then(|content| parse_model_name(&content))
}

/// Case-insensitive on the key, since some kernels capitalise it.
pub fn parse_model_name(content: &str) -> Option<String> {
    content.lines().find_map(|line| {
        let (key, value) = line.split_once(':')?;
        key.trim()
            .eq_ignore_ascii_case("model name")
            .then(|| value.trim().to_string())
            .filter(|model| !model.is_empty())
    })
}

/// Counts `cpuN` directories under `/sys/devices/system/cpu`.
pub fn count_logical_cores(path: impl AsRef<Path>) -> Option<usize> {
    let count = fs::read_dir(path)
        .ok()?
        .flatten()
        .filter(|entry| {
            entry
                .file_name()
                .to_str()
                .and_then(|s| s.strip_prefix("cpu"))
                .is_some_and(|rest| rest.parse::<u32>().is_ok())
        })
        .count();

    (count > 0).then_some(count)
}

/// `PRETTY_NAME` from an os-release file.
pub fn read_distro(path: impl AsRef<Path>) -> Option<String> {
    read_logged(path.as_ref()).and_then(|content| parse_pretty_name(&content))
}

pub fn parse_pretty_name(content: &str) -> Option<String> {
    content.lines().find_map(|line| {
        let value = line.trim().strip_prefix("PRETTY_NAME=")?;
        let value = value.trim_matches(|c| c == '"' || c == '\'');
        (!value.is_empty()).then(|| value.to_string())
    })
}

/// System uptime in whole seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Uptime(pub u64);

impl Uptime {
    pub fn hours(&self) -> u64 {
        self.0 / 3600
    }

    pub fn minutes(&self) -> u64 {
        (self.0 / 60) % 60
    }

    pub fn seconds(&self) -> u64 {
        self.0 % 60
    }
}

impl std::fmt::Display for Uptime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:02}:{:02}:{:02}", self.hours(), self.minutes(), self.seconds())
    }
}

pub fn read_uptime(path: impl AsRef<Path>) -> Option<Uptime> {
    read_logged(path.as_ref()).and_then(|content| parse_uptime(&content))
}

/// First field of `/proc/uptime`, fractional part dropped.
pub fn parse_uptime(content: &str) -> Option<Uptime> {
    let first = content.split_whitespace().next()?;
    let seconds: f64 = first.parse().ok()?;
    (seconds.is_finite() && seconds >= 0.0).then(|| Uptime(seconds as u64))
}

/// Aggregate jiffies from the `cpu` line of `/proc/stat`.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CpuTimes {
    pub idle: u64,
    pub total: u64,
}

impl CpuTimes {
    /// Busy share of the interval between `earlier` and `self`, in percent.
    pub fn usage_since(&self, earlier: &CpuTimes) -> f32 {
        let total = self.total.saturating_sub(earlier.total);
        if total == 0 {
            return 0.0;
        }
        let idle = self.idle.saturating_sub(earlier.idle).min(total);
        ((total - idle) as f64 * 100.0 / total as f64) as f32
    }
}

pub fn read_cpu_times(path: impl AsRef<Path>) -> Option<CpuTimes> {
    read_logged(path.as_ref()).and_then(|content| parse_cpu_times(&content))
}

/// Idle time includes iowait; guest time is already part of user time and is
/// not added twice.
pub fn parse_cpu_times(content: &str) -> Option<CpuTimes> {
    let line = content.lines().find(|line| line.starts_with("cpu "))?;
    let fields = line
        .split_whitespace()
        .skip(1)
        .map(|field| field.parse::<u64>().ok())
        .collect::<Option<Vec<_>>>()?;
    if fields.len() < 4 {
        return None;
    }

    // user nice system idle iowait irq softirq steal guest guest_nice
    let idle = fields[3] + fields.get(4).copied().unwrap_or(0);
    let total = fields.iter().take(8).sum();
    Some(CpuTimes { idle, total })
}

/// Manufacturers of `BAT0`, `BAT1`, ... up to the first missing index.
///
/// Returns an empty list as soon as one manufacturer file is unreadable.
pub fn read_battery_vendors(base: impl AsRef<Path>) -> Vec<String> {
    let base = base.as_ref();
    let mut vendors = Vec::new();

    for id in 0.. {
        let battery = base.join(format!("BAT{id}"));
        if !battery.exists() {
            break;
        }
        match fs::read_to_string(battery.join("manufacturer")) {
            Ok(content) => vendors.extend(
                content
                    .lines()
                    .map(str::trim)
                    .filter(|line| !line.is_empty())
                    .map(str::to_string),
            ),
            Err(e) => {
                log::warn!(target: "cube::linux", "could not read manufacturer of {}: {e}", battery.display());
                return Vec::new();
            }
        }
    }

    vendors
}

/// Physical memory in kilobytes (10^3 bytes).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Memory {
    pub total_kb: u64,
    pub available_kb: u64,
}

impl Memory {
    /// `None` when `sysconf` cannot report page counts.
    pub fn read() -> Option<Self> {
        Self::from_pages(
            sysconf(libc::_SC_PAGESIZE),
            sysconf(libc::_SC_PHYS_PAGES),
            sysconf(libc::_SC_AVPHYS_PAGES),
        )
    }

    /// Builds the record from raw `sysconf` results. Page size and total must
    /// be positive; zero available pages is a valid reading.
    pub fn from_pages(page_size: libc::c_long, total: libc::c_long, available: libc::c_long) -> Option<Self> {
        let page_size = u64::try_from(page_size).ok().filter(|&v| v > 0)?;
        let total = u64::try_from(total).ok().filter(|&v| v > 0)?;
        let available = u64::try_from(available).ok()?;

        Some(Self {
            total_kb: total.saturating_mul(page_size) / 1000,
            available_kb: available.saturating_mul(page_size) / 1000,
        })
    }

    pub fn used_percent(&self) -> f32 {
        if self.total_kb == 0 {
            return 0.0;
        }
        let used = self.total_kb.saturating_sub(self.available_kb);
        (used as f64 * 100.0 / self.total_kb as f64) as f32
    }
}

fn sysconf(name: libc::c_int) -> libc::c_long {
    // SAFETY: sysconf has no preconditions.
    unsafe { libc::sysconf(name) }
}

fn read_logged(path: &Path) -> Option<String> {
    match fs::read_to_string(path) {
        Ok(content) => Some(content),
        Err(e) => {
            log_read_failure(path, &e);
            None
        }
    }
}

fn log_read_failure(path: &Path, e: &io::Error) {
    if e.kind() == io::ErrorKind::NotFound {
        log::debug!(target: "cube::linux", "{} does not exist", path.display());
    } else {
        log::warn!(target: "cube::linux", "could not read {}: {e}", path.display());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn model_name_from_cpuinfo() {
        let content = "processor\t: 0\nvendor_id\t: GenuineIntel\nModel Name\t: Intel(R) Core(TM) i5-8250U CPU @ 1.60GHz\n";
        assert_eq!(
            parse_model_name(content).as_deref(),
            Some("Intel(R) Core(TM) i5-8250U CPU @ 1.60GHz")
        );
        assert_eq!(parse_model_name("processor\t: 0\n"), None);
    }

    #[test]
    fn pretty_name_from_os_release() {
        let content = "NAME=\"Arch Linux\"\nPRETTY_NAME=\"Arch Linux\"\nID=arch\n";
        assert_eq!(parse_pretty_name(content).as_deref(), Some("Arch Linux"));
        assert_eq!(parse_pretty_name("PRETTY_NAME=\"\"\n"), None);
        assert_eq!(parse_pretty_name("ID=arch\n"), None);
    }

    #[test]
    fn uptime_formats_as_clock() {
        let uptime = parse_uptime("90061.53 351234.12\n").unwrap();
        assert_eq!(uptime, Uptime(90061));
        assert_eq!(uptime.to_string(), "25:01:01");
        assert_eq!(parse_uptime(""), None);
        assert_eq!(parse_uptime("abc 1"), None);
    }

    #[test]
    fn cpu_times_and_usage() {
        let before = parse_cpu_times("cpu  100 0 100 700 100 0 0 0 0 0\ncpu0 1 2 3 4\n").unwrap();
        assert_eq!(before, CpuTimes { idle: 800, total: 1000 });

        let after = parse_cpu_times("cpu  200 0 200 1400 200 0 0 0 0 0\n").unwrap();
        assert_eq!(after.usage_since(&before), 20.0);
        assert_eq!(before.usage_since(&before), 0.0);
        assert_eq!(parse_cpu_times("cpu0 1 2 3 4\n"), None);
    }

    #[test]
    fn memory_usage_percent() {
        let memory = Memory { total_kb: 8_000, available_kb: 2_000 };
        assert_eq!(memory.used_percent(), 75.0);
        assert_eq!(Memory { total_kb: 0, available_kb: 0 }.used_percent(), 0.0);
    }

    #[test]
    fn memory_from_page_counts() {
        assert_eq!(
            Memory::from_pages(4096, 2_000_000, 500_000),
            Some(Memory { total_kb: 8_192_000, available_kb: 2_048_000 })
        );
        // fully used memory still reports
        let full = Memory::from_pages(4096, 1_000, 0);
        assert_eq!(full, Some(Memory { total_kb: 4_096, available_kb: 0 }));
        assert_eq!(full.map(|m| m.used_percent()), Some(100.0));

        assert_eq!(Memory::from_pages(-1, 1_000, 0), None);
        assert_eq!(Memory::from_pages(4096, 0, 0), None);
        assert_eq!(Memory::from_pages(4096, 1_000, -1), None);
    }

    #[test]
    fn missing_files_are_empty_results() {
        assert_eq!(read_distro("/nonexistent/os-release"), None);
        assert_eq!(read_uptime("/nonexistent/uptime"), None);
        assert_eq!(read_model_name("/nonexistent/cpuinfo"), None);
        assert_eq!(count_logical_cores("/nonexistent/cpu"), None);
        assert!(read_battery_vendors("/nonexistent/power_supply").is_empty());
    }
}
