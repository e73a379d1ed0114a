//! Vendor identity and brand string decoding.

use std::fmt;

use crate::cpuid::{Cpuid, leaf, max_extended_leaf, registers_to_bytes};

/// Length of the CPUID(0) vendor identity in bytes.
pub const VENDOR_ID_LEN: usize = 12;

/// Maximum length of the brand string: three leaves of four 4-byte registers.
pub const BRAND_STRING_LEN: usize = 48;

/// Raw vendor identity from CPUID(0), assembled EBX‖EDX‖ECX.
///
/// Always exactly 12 bytes. [`VendorId::as_str`] stops at the first NUL, so a
/// zeroed identity (no CPUID) reads as an empty string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VendorId([u8; VENDOR_ID_LEN]);

impl VendorId {
    pub const fn from_bytes(bytes: [u8; VENDOR_ID_LEN]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; VENDOR_ID_LEN] {
        &self.0
    }

    pub fn as_str(&self) -> &str {
        str_until_nul(&self.0)
    }
}

impl fmt::Display for VendorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// CPU manufacturer, resolved once from the vendor identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Vendor {
    /// Intel Corporation (`GenuineIntel`)
    Intel,
    /// Advanced Micro Devices (`AuthenticAMD`)
    Amd,
    /// Any other vendor identity, kept verbatim
    Other(String),
    /// CPUID not available
    Unknown,
}

impl Vendor {
    pub fn from_id(id: &VendorId) -> Self {
        match id.as_bytes() {
            b"GenuineIntel" => Vendor::Intel,
            b"AuthenticAMD" => Vendor::Amd,
            _ if id.as_str().is_empty() => Vendor::Unknown,
            _ => Vendor::Other(id.as_str().to_string()),
        }
    }
}

impl fmt::Display for Vendor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Vendor::Intel => f.write_str("Intel"),
            Vendor::Amd => f.write_str("AMD"),
            Vendor::Other(id) => f.write_str(id),
            Vendor::Unknown => f.write_str("<unknown>"),
        }
    }
}

/// Reads the 12-byte vendor identity from CPUID(0).
///
/// The register order is EBX, EDX, ECX (not alphabetical).
pub fn vendor_identity(cpuid: &dyn Cpuid) -> VendorId {
    let regs = cpuid.query(leaf::VENDOR, 0);

    let mut bytes = [0u8; VENDOR_ID_LEN];
    registers_to_bytes([regs.ebx, regs.edx, regs.ecx], &mut bytes);
    VendorId(bytes)
}

/// Reads the processor brand string from CPUID(0x80000002..=0x80000004).
///
/// Returns `None` when the extended leaves are not implemented or the string
/// is blank. The result is cut at the first NUL and trimmed.
pub fn brand_string(cpuid: &dyn Cpuid) -> Option<String> {
    if max_extended_leaf(cpuid) < leaf::BRAND_3 {
        log::debug!(target: "cube::identity", "brand string leaves not implemented");
        return None;
    }

    let mut buffer = [0u8; BRAND_STRING_LEN];
    for (block, selector) in buffer
        .chunks_exact_mut(16)
        .zip([leaf::BRAND_1, leaf::BRAND_2, leaf::BRAND_3])
    {
        let regs = cpuid.query(selector, 0);
        registers_to_bytes([regs.eax, regs.ebx, regs.ecx, regs.edx], block);
    }

    let brand = str_until_nul(&buffer).trim();
    if brand.is_empty() {
        None
    } else {
        Some(brand.to_string())
    }
}

/// Interprets `bytes` up to the first NUL. Non-UTF-8 content is cut at the
/// first invalid byte.
fn str_until_nul(bytes: &[u8]) -> &str {
    let len = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    let bytes = &bytes[..len];
    match std::str::from_utf8(bytes) {
        Ok(s) => s,
        Err(e) => std::str::from_utf8(&bytes[..e.valid_up_to()]).unwrap_or_default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cpuid::{RecordedCpuid, Registers};
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    #[rstest]
    #[case(b"GenuineIntel", Vendor::Intel)]
    #[case(b"AuthenticAMD", Vendor::Amd)]
    #[case(b"HygonGenuine", Vendor::Other("HygonGenuine".to_string()))]
    #[case(b"  Shanghai  ", Vendor::Other("  Shanghai  ".to_string()))]
    fn vendor_round_trips_through_leaf_zero(#[case] raw: &[u8; 12], #[case] expected: Vendor) {
        let cpuid = RecordedCpuid::new().with_vendor(0x16, raw);
        let id = vendor_identity(&cpuid);

        assert_eq!(id.as_bytes(), raw);
        assert_eq!(id.as_str().len(), VENDOR_ID_LEN);
        assert_eq!(Vendor::from_id(&id), expected);
    }

    #[test]
    fn vendor_uses_ebx_edx_ecx_order() {
        // "Genu" "ineI" "ntel"
        let cpuid = RecordedCpuid::new().with(0, Registers::new(0xD, 0x756E_6547, 0x6C65_746E, 0x4965_6E69));
        assert_eq!(vendor_identity(&cpuid).as_str(), "GenuineIntel");
    }

    #[test]
    fn zeroed_leaf_is_unknown_vendor() {
        let id = vendor_identity(&RecordedCpuid::new());
        assert_eq!(id.as_bytes().len(), VENDOR_ID_LEN);
        assert_eq!(id.as_str(), "");
        assert_eq!(Vendor::from_id(&id), Vendor::Unknown);
    }

    #[test]
    fn brand_requires_extended_leaves() {
        let cpuid = RecordedCpuid::new()
            .with(leaf::EXT_MAX, Registers::new(0x8000_0001, 0, 0, 0))
            .with(leaf::BRAND_1, Registers::new(0x6574_6E49, 0, 0, 0));
        assert_eq!(brand_string(&cpuid), None);
    }

    #[test]
    fn blank_brand_is_none() {
        let spaces = u32::from_le_bytes(*b"    ");
        let cpuid = RecordedCpuid::new()
            .with(leaf::EXT_MAX, Registers::new(0x8000_0008, 0, 0, 0))
            .with(leaf::BRAND_1, Registers::new(spaces, spaces, 0, 0));
        assert_eq!(brand_string(&cpuid), None);
    }

    #[test]
    fn nul_truncation() {
        assert_eq!(str_until_nul(b"abc\0def"), "abc");
        assert_eq!(str_until_nul(b"abc"), "abc");
        assert_eq!(str_until_nul(b"ab\xFFc"), "ab");
    }
}
