//! CPU identification and timing probe, plus the small Linux readers the
//! `cube` utility reports alongside it.
//!
//! The probe decodes CPUID output into vendor, brand string, feature flags and
//! core topology, and resolves the duration of one time stamp counter tick.
//! All decoding goes through the [`cpuid::Cpuid`] trait, so recorded register
//! dumps decode exactly like the live processor.

pub mod cpuid;
mod error;
pub mod features;
pub mod identity;
pub mod si;
pub mod topology;
pub mod tsc;

#[cfg(feature = "linux")]
pub mod linux;

pub use cpuid::{Cpuid, NativeCpuid, RecordedCpuid, Registers};
pub use error::{Error, Result};
pub use features::FeatureFlags;
pub use identity::{Vendor, VendorId, brand_string, vendor_identity};
pub use topology::Topology;
pub use tsc::{TickDuration, TickSource, TscResolver};

/// Comprehensive CPU information structure.
///
/// Everything CPUID can tell about the processor in one place. Fields that
/// could not be determined are `None`, empty or `false`.
///
/// # Examples
///
/// ```
/// use cube::{CpuInfo, RecordedCpuid, Registers, Vendor};
///
/// let cpuid = RecordedCpuid::new()
///     .with_vendor(0x16, b"AuthenticAMD")
///     .with(0x1, Registers::new(0, 16 << 16, 0, 1 << 28))
///     .with(0x8000_0000, Registers::new(0x8000_0008, 0, 0, 0))
///     .with(0x8000_0008, Registers::new(0, 0, 7, 0));
///
/// let cpu = CpuInfo::from_cpuid(&cpuid);
/// assert_eq!(cpu.vendor, Vendor::Amd);
/// assert_eq!(cpu.total_logical_cores, Some(16));
/// assert_eq!(cpu.total_physical_cores, Some(8));
/// assert!(cpu.hyper_threading);
/// ```
#[derive(Debug, Clone)]
pub struct CpuInfo {
    /// CPU architecture type (x86, x86_64, ARM, ARM64, etc.)
    pub architecture: CpuArchitecture,
    /// CPU manufacturer/vendor
    pub vendor: Vendor,
    /// CPU model name (brand string)
    pub model: String,
    /// Total number of logical cores (threads)
    pub total_logical_cores: Option<usize>,
    /// Total number of physical cores
    pub total_physical_cores: Option<usize>,
    /// Whether more than one thread runs per physical core
    pub hyper_threading: bool,
    /// CPUID(1) feature flags, `None` without CPUID
    pub features: Option<FeatureFlags>,
}

impl CpuInfo {
    /// Builds the CPUID-derived part of the record from any register source.
    pub fn from_cpuid(cpuid: &dyn Cpuid) -> Self {
        let vendor = Vendor::from_id(&vendor_identity(cpuid));
        let topology = topology::resolve(cpuid, &vendor);

        Self {
            architecture: CpuArchitecture::current(),
            model: brand_string(cpuid).unwrap_or_default(),
            total_logical_cores: Some(topology.logical as usize),
            total_physical_cores: Some(topology.physical as usize),
            hyper_threading: topology.hyper_threading(),
            features: Some(FeatureFlags::read(cpuid)),
            vendor,
        }
    }
}

/// CPU architecture type.
///
/// Represents the instruction set architecture of the CPU.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CpuArchitecture {
    /// 32-bit x86
    X86,
    /// 64-bit x86 (AMD64/Intel 64)
    X86_64,
    /// 32-bit ARM
    ARM,
    /// 64-bit ARM (AArch64)
    ARM64,
    /// Unknown or unsupported architecture
    Unknown,
}

impl CpuArchitecture {
    /// Architecture this binary was compiled for.
    pub fn current() -> Self {
        match std::env::consts::ARCH {
            "x86_64" => CpuArchitecture::X86_64,
            "aarch64" => CpuArchitecture::ARM64,
            "arm" => CpuArchitecture::ARM,
            "x86" => CpuArchitecture::X86,
            _ => CpuArchitecture::Unknown,
        }
    }

    pub fn has_cpuid(&self) -> bool {
        matches!(self, CpuArchitecture::X86 | CpuArchitecture::X86_64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_cpuid_gives_conservative_record() {
        let cpu = CpuInfo::from_cpuid(&RecordedCpuid::new());
        assert_eq!(cpu.vendor, Vendor::Unknown);
        assert!(cpu.model.is_empty());
        assert_eq!(cpu.total_logical_cores, Some(1));
        assert_eq!(cpu.total_physical_cores, Some(1));
        assert!(!cpu.hyper_threading);
        assert_eq!(cpu.features.map(|f| f.supported().count()), Some(0));
    }

    #[test]
    fn architecture_matches_cpuid_support() {
        assert_eq!(CpuArchitecture::current().has_cpuid(), NativeCpuid::is_supported());
    }
}
