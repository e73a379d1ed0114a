//! Register issuer.
//!
//! Everything that decodes CPUID output goes through the [`Cpuid`] trait, so
//! the decoders never touch the instruction directly and can be fed recorded
//! register dumps in tests.

use std::collections::HashMap;

use crate::{Error, Result};

/// Well-known CPUID input selectors.
pub mod leaf {
    pub const VENDOR: u32 = 0x00;
    pub const FEATURES: u32 = 0x01;
    pub const CACHE_PARAMS: u32 = 0x04;
    pub const TSC_FREQ: u32 = 0x15;

    pub const EXT_MAX: u32 = 0x8000_0000;
    pub const BRAND_1: u32 = 0x8000_0002;
    pub const BRAND_2: u32 = 0x8000_0003;
    pub const BRAND_3: u32 = 0x8000_0004;
    pub const EXT_POWER: u32 = 0x8000_0007;
    pub const EXT_ADDR_SIZES: u32 = 0x8000_0008;
}

/// One CPUID snapshot: the four output registers for a single input.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Registers {
    pub eax: u32,
    pub ebx: u32,
    pub ecx: u32,
    pub edx: u32,
}

impl Registers {
    pub const fn new(eax: u32, ebx: u32, ecx: u32, edx: u32) -> Self {
        Self { eax, ebx, ecx, edx }
    }
}

/// The CPUID capability.
///
/// `query` never fails. Leaves the processor does not implement come back as
/// whatever the hardware returns for them (usually zeros), and callers treat a
/// clear bit as "feature absent".
pub trait Cpuid {
    fn query(&self, leaf: u32, subleaf: u32) -> Registers;
}

impl<T: Cpuid + ?Sized> Cpuid for &T {
    fn query(&self, leaf: u32, subleaf: u32) -> Registers {
        (**self).query(leaf, subleaf)
    }
}

/// CPUID issued on the running processor.
#[derive(Debug, Default, Clone, Copy)]
pub struct NativeCpuid;

impl NativeCpuid {
    pub const fn new() -> Self {
        Self
    }

    /// Whether the instruction exists on this architecture at all.
    pub const fn is_supported() -> bool {
        cfg!(any(target_arch = "x86", target_arch = "x86_64"))
    }
}

impl Cpuid for NativeCpuid {
    #[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
    #[allow(unused_unsafe)]
    fn query(&self, leaf: u32, subleaf: u32) -> Registers {
        #[cfg(target_arch = "x86")]
        use core::arch::x86::__cpuid_count;
        #[cfg(target_arch = "x86_64")]
        use core::arch::x86_64::__cpuid_count;

        // SAFETY: CPUID is available on every x86-64 processor and on every
        // 32-bit target Rust supports.
        let result = unsafe { __cpuid_count(leaf, subleaf) };
        Registers::new(result.eax, result.ebx, result.ecx, result.edx)
    }

    #[cfg(not(any(target_arch = "x86", target_arch = "x86_64")))]
    fn query(&self, _leaf: u32, _subleaf: u32) -> Registers {
        Registers::default()
    }
}

/// Highest basic leaf, CPUID(0).EAX.
pub fn max_basic_leaf(cpuid: &dyn Cpuid) -> u32 {
    cpuid.query(leaf::VENDOR, 0).eax
}

/// Highest extended leaf, CPUID(0x80000000).EAX.
///
/// Processors without extended leaves may echo garbage here; anything below
/// 0x80000000 is reported as 0.
pub fn max_extended_leaf(cpuid: &dyn Cpuid) -> u32 {
    let max = cpuid.query(leaf::EXT_MAX, 0).eax;
    if max & leaf::EXT_MAX == 0 { 0 } else { max }
}

#[inline(always)]
pub fn bit(value: u32, position: u32) -> bool {
    (value & (1 << position)) != 0
}

/// Bits `start..=end` of `value`, shifted down.
#[inline(always)]
pub fn bits(value: u32, start: u32, end: u32) -> u32 {
    let length = end - start + 1;
    let mask = if length == 32 { u32::MAX } else { (1 << length) - 1 };
    (value >> start) & mask
}

/// Little-endian bytes of `regs`, in the given register order.
pub fn registers_to_bytes<const N: usize>(regs: [u32; N], out: &mut [u8]) {
    for (chunk, reg) in out.chunks_exact_mut(4).zip(regs) {
        chunk.copy_from_slice(&reg.to_le_bytes());
    }
}

/// Replays recorded CPUID output instead of issuing the instruction.
///
/// Inputs that were never recorded return zeros, which is what most
/// processors do for unimplemented leaves.
#[derive(Debug, Default, Clone)]
pub struct RecordedCpuid {
    leaves: HashMap<(u32, u32), Registers>,
}

impl RecordedCpuid {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(self, leaf: u32, regs: Registers) -> Self {
        self.with_subleaf(leaf, 0, regs)
    }

    pub fn with_subleaf(mut self, leaf: u32, subleaf: u32, regs: Registers) -> Self {
        self.leaves.insert((leaf, subleaf), regs);
        self
    }

    /// Leaf 0 carrying `max_leaf` and a vendor identity.
    pub fn with_vendor(self, max_leaf: u32, vendor: &[u8; 12]) -> Self {
        let word = |i: usize| u32::from_le_bytes([vendor[i], vendor[i + 1], vendor[i + 2], vendor[i + 3]]);
        self.with(leaf::VENDOR, Registers::new(max_leaf, word(0), word(8), word(4)))
    }

    /// Parses a raw dump in the format printed by `cpuid -r`:
    ///
    /// ```text
    ///    0x00000000 0x00: eax=0x00000016 ebx=0x756e6547 ecx=0x6c65746e edx=0x49656e69
    /// ```
    ///
    /// Lines that do not start with a hex selector (headers such as
    /// `CPU 0:`) are skipped. Only the first CPU block is kept.
    pub fn parse(dump: &str) -> Result<Self> {
        let mut recorded = Self::new();
        let mut seen_cpu = false;

        for (index, line) in dump.lines().enumerate() {
            let line = line.trim();
            if line.starts_with("CPU ") {
                if seen_cpu {
                    break;
                }
                seen_cpu = true;
                continue;
            }
            if !line.starts_with("0x") {
                continue;
            }

            let malformed = || Error::MalformedDump { line: index + 1 };

            let (selector, values) = line.split_once(':').ok_or_else(malformed)?;
            let mut selector = selector.split_whitespace();
            let leaf = selector.next().and_then(parse_hex).ok_or_else(malformed)?;
            let subleaf = selector.next().and_then(parse_hex).ok_or_else(malformed)?;

            let mut regs = Registers::default();
            for field in values.split_whitespace() {
                let (name, value) = field.split_once('=').ok_or_else(malformed)?;
                let value = parse_hex(value).ok_or_else(malformed)?;
                match name {
                    "eax" => regs.eax = value,
                    "ebx" => regs.ebx = value,
                    "ecx" => regs.ecx = value,
                    "edx" => regs.edx = value,
                    _ => return Err(malformed()),
                }
            }

            recorded.leaves.insert((leaf, subleaf), regs);
        }

        log::debug!(target: "cube::cpuid", "replaying {} recorded leaves", recorded.leaves.len());
        Ok(recorded)
    }

    pub fn is_empty(&self) -> bool {
        self.leaves.is_empty()
    }
}

fn parse_hex(text: &str) -> Option<u32> {
    let digits = text.strip_prefix("0x").unwrap_or(text);
    u32::from_str_radix(digits, 16).ok()
}

impl Cpuid for RecordedCpuid {
    fn query(&self, leaf: u32, subleaf: u32) -> Registers {
        self.leaves.get(&(leaf, subleaf)).copied().unwrap_or_default()
    }
}
