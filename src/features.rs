//! Instruction-set and capability flags from CPUID(1) ECX/EDX.

use std::collections::BTreeMap;

use crate::cpuid::{Cpuid, bit, leaf};

/// Which CPUID(1) output register a flag lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FlagRegister {
    Ecx,
    Edx,
}

/// A named, architecturally defined bit of CPUID(1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlagBit {
    pub register: FlagRegister,
    pub bit: u32,
    pub name: &'static str,
}

const fn ecx(bit: u32, name: &'static str) -> FlagBit {
    FlagBit { register: FlagRegister::Ecx, bit, name }
}

const fn edx(bit: u32, name: &'static str) -> FlagBit {
    FlagBit { register: FlagRegister::Edx, bit, name }
}

/// Every defined bit of CPUID(1) ECX and EDX. Reserved positions
/// (ECX 16, EDX 10, EDX 20) are not listed.
pub const FLAG_TABLE: &[FlagBit] = &[
    ecx(0, "SSE3"),
    ecx(1, "PCLMUL"),
    ecx(2, "DTES64"),
    ecx(3, "MONITOR"),
    ecx(4, "DS_CPL"),
    ecx(5, "VMX"),
    ecx(6, "SMX"),
    ecx(7, "EST"),
    ecx(8, "TM2"),
    ecx(9, "SSSE3"),
    ecx(10, "CNXT_ID"),
    ecx(11, "SDBG"),
    ecx(12, "FMA"),
    ecx(13, "CX16"),
    ecx(14, "XTPR"),
    ecx(15, "PDCM"),
    ecx(17, "PCID"),
    ecx(18, "DCA"),
    ecx(19, "SSE4_1"),
    ecx(20, "SSE4_2"),
    ecx(21, "X2APIC"),
    ecx(22, "MOVBE"),
    ecx(23, "POPCNT"),
    ecx(24, "TSC_DEADLINE"),
    ecx(25, "AES"),
    ecx(26, "XSAVE"),
    ecx(27, "OSXSAVE"),
    ecx(28, "AVX"),
    ecx(29, "F16C"),
    ecx(30, "RDRAND"),
    ecx(31, "HYPERVISOR"),
    edx(0, "FPU"),
    edx(1, "VME"),
    edx(2, "DE"),
    edx(3, "PSE"),
    edx(4, "TSC"),
    edx(5, "MSR"),
    edx(6, "PAE"),
    edx(7, "MCE"),
    edx(8, "CX8"),
    edx(9, "APIC"),
    edx(11, "SEP"),
    edx(12, "MTRR"),
    edx(13, "PGE"),
    edx(14, "MCA"),
    edx(15, "CMOV"),
    edx(16, "PAT"),
    edx(17, "PSE36"),
    edx(18, "PSN"),
    edx(19, "CLFSH"),
    edx(21, "DS"),
    edx(22, "ACPI"),
    edx(23, "MMX"),
    edx(24, "FXSR"),
    edx(25, "SSE"),
    edx(26, "SSE2"),
    edx(27, "SS"),
    edx(28, "HTT"),
    edx(29, "TM"),
    edx(30, "IA64"),
    edx(31, "PBE"),
];

/// Decoded CPUID(1) feature flags.
///
/// Only names in [`FLAG_TABLE`] are reported. Asking for anything else yields
/// `None`, never `false`, so "not tested" cannot be mistaken for "absent".
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FeatureFlags {
    ecx: u32,
    edx: u32,
}

impl FeatureFlags {
    pub const fn decode(ecx: u32, edx: u32) -> Self {
        Self { ecx, edx }
    }

    pub fn read(cpuid: &dyn Cpuid) -> Self {
        let regs = cpuid.query(leaf::FEATURES, 0);
        Self::decode(regs.ecx, regs.edx)
    }

    fn test(&self, flag: &FlagBit) -> bool {
        match flag.register {
            FlagRegister::Ecx => bit(self.ecx, flag.bit),
            FlagRegister::Edx => bit(self.edx, flag.bit),
        }
    }

    /// Looks a flag up by name (case-sensitive, as listed in [`FLAG_TABLE`]).
    pub fn get(&self, name: &str) -> Option<bool> {
        FLAG_TABLE
            .iter()
            .find(|flag| flag.name == name)
            .map(|flag| self.test(flag))
    }

    /// All known flags in table order, ECX first.
    pub fn iter(&self) -> impl Iterator<Item = (&'static str, bool)> + '_ {
        FLAG_TABLE.iter().map(move |flag| (flag.name, self.test(flag)))
    }

    /// Names of the flags that are set.
    pub fn supported(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.iter().filter_map(|(name, set)| set.then_some(name))
    }

    pub fn to_map(&self) -> BTreeMap<&'static str, bool> {
        self.iter().collect()
    }

    pub fn has_htt(&self) -> bool {
        bit(self.edx, 28)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cpuid::{RecordedCpuid, Registers};
    use rstest::rstest;
    use std::collections::HashSet;

    #[test]
    fn table_has_unique_names_and_positions() {
        let names: HashSet<_> = FLAG_TABLE.iter().map(|f| f.name).collect();
        assert_eq!(names.len(), FLAG_TABLE.len());

        let positions: HashSet<_> = FLAG_TABLE.iter().map(|f| (f.register, f.bit)).collect();
        assert_eq!(positions.len(), FLAG_TABLE.len());
        assert!(FLAG_TABLE.iter().all(|f| f.bit < 32));
    }

    #[test]
    fn zero_registers_report_every_flag_false() {
        let flags = FeatureFlags::decode(0, 0);
        assert_eq!(flags.iter().count(), FLAG_TABLE.len());
        assert!(flags.iter().all(|(_, set)| !set));
    }

    #[test]
    fn only_fpu_from_edx_bit_zero() {
        let flags = FeatureFlags::decode(0, 1);
        let set: Vec<_> = flags.supported().collect();
        assert_eq!(set, vec!["FPU"]);
    }

    #[rstest]
    #[case(FlagRegister::Ecx, 28, "AVX")]
    #[case(FlagRegister::Ecx, 23, "POPCNT")]
    #[case(FlagRegister::Ecx, 25, "AES")]
    #[case(FlagRegister::Edx, 26, "SSE2")]
    #[case(FlagRegister::Edx, 28, "HTT")]
    fn single_bit_maps_to_name(#[case] register: FlagRegister, #[case] position: u32, #[case] name: &str) {
        let value = 1u32 << position;
        let flags = match register {
            FlagRegister::Ecx => FeatureFlags::decode(value, 0),
            FlagRegister::Edx => FeatureFlags::decode(0, value),
        };
        assert_eq!(flags.get(name), Some(true));
        assert_eq!(flags.supported().count(), 1);
    }

    #[test]
    fn reserved_bits_are_not_surfaced() {
        let flags = FeatureFlags::decode(1 << 16, (1 << 10) | (1 << 20));
        assert_eq!(flags.supported().count(), 0);
        assert_eq!(flags.get("RESERVED"), None);
        assert_eq!(flags.get("avx"), None);
    }

    #[test]
    fn reads_leaf_one() {
        let cpuid = RecordedCpuid::new().with(1, Registers::new(0, 0, 1 << 30, 1 << 25));
        let flags = FeatureFlags::read(&cpuid);
        let map = flags.to_map();
        assert_eq!(map.get("RDRAND"), Some(&true));
        assert_eq!(map.get("SSE"), Some(&true));
        assert_eq!(map.get("MMX"), Some(&false));
        assert!(!flags.has_htt());
    }
}
