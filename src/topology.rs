//! Logical/physical core counts and hyper-threading state.

use crate::cpuid::{Cpuid, bit, bits, leaf, max_basic_leaf, max_extended_leaf};
use crate::identity::Vendor;

/// Core counts derived from CPUID.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Topology {
    /// Logical processors per package, CPUID(1).EBX[23:16]
    pub logical: u32,
    /// Physical cores per package, vendor specific
    pub physical: u32,
    /// HTT capability bit, CPUID(1).EDX[28]
    pub htt: bool,
}

impl Topology {
    /// Hyper-threading is active only when the capability bit is set *and*
    /// there are fewer physical cores than logical processors.
    pub fn hyper_threading(&self) -> bool {
        self.htt && self.physical < self.logical
    }
}

/// Vendor-specific way of counting physical cores.
pub trait PhysicalCoreStrategy {
    fn physical_cores(&self, cpuid: &dyn Cpuid, logical: u32) -> u32;
}

/// Deterministic cache parameters leaf, CPUID(4) subleaf 0, EAX[31:26] + 1.
pub struct IntelCores;

impl PhysicalCoreStrategy for IntelCores {
    fn physical_cores(&self, cpuid: &dyn Cpuid, logical: u32) -> u32 {
        if max_basic_leaf(cpuid) < leaf::CACHE_PARAMS {
            log::warn!(target: "cube::topology", "leaf 4 not implemented, assuming one core per thread");
            return logical;
        }
        bits(cpuid.query(leaf::CACHE_PARAMS, 0).eax, 26, 31) + 1
    }
}

/// Extended address sizes leaf, CPUID(0x80000008).ECX[7:0] + 1.
pub struct AmdCores;

impl PhysicalCoreStrategy for AmdCores {
    fn physical_cores(&self, cpuid: &dyn Cpuid, logical: u32) -> u32 {
        if max_extended_leaf(cpuid) < leaf::EXT_ADDR_SIZES {
            log::warn!(target: "cube::topology", "leaf 0x80000008 not implemented, assuming one core per thread");
            return logical;
        }
        bits(cpuid.query(leaf::EXT_ADDR_SIZES, 0).ecx, 0, 7) + 1
    }
}

/// No decomposition available: one core per logical processor.
pub struct LogicalCores;

impl PhysicalCoreStrategy for LogicalCores {
    fn physical_cores(&self, _cpuid: &dyn Cpuid, logical: u32) -> u32 {
        logical
    }
}

impl Vendor {
    pub fn core_strategy(&self) -> &'static dyn PhysicalCoreStrategy {
        match self {
            Vendor::Intel => &IntelCores,
            Vendor::Amd => &AmdCores,
            Vendor::Other(_) | Vendor::Unknown => &LogicalCores,
        }
    }
}

/// Resolves the core topology for `vendor`.
///
/// EBX[23:16] is only meaningful with HTT set; a zero count is reported as 1.
pub fn resolve(cpuid: &dyn Cpuid, vendor: &Vendor) -> Topology {
    let regs = cpuid.query(leaf::FEATURES, 0);
    let logical = bits(regs.ebx, 16, 23).max(1);
    let htt = bit(regs.edx, 28);

    let physical = vendor.core_strategy().physical_cores(cpuid, logical);
    log::debug!(
        target: "cube::topology",
        "{vendor}: logical={logical} physical={physical} htt={htt}"
    );

    Topology { logical, physical, htt }
}
