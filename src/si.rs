//! SI-prefixed number formatting.

const PREFIXES: [&str; 17] = [
    "y", "z", "a", "f", "p", "n", "u", "m", "", "k", "M", "G", "T", "P", "E", "Z", "Y",
];
const UNPREFIXED: usize = 8;

/// Renders `value` with an SI prefix chosen so the mantissa lies in
/// `[1, 1000)`, two decimals, right-aligned to `width`.
///
/// ```
/// use cube::si::format_si;
///
/// assert_eq!(format_si(0.0000015, 9, "s"), "     1.50 us");
/// assert_eq!(format_si(3_700_000_000.0, 0, "Hz"), "3.70 GHz");
/// assert_eq!(format_si(0.0, 4, "s"), "0.00 s");
/// ```
///
/// Magnitudes beyond the prefix table keep the outermost prefix.
#[must_use]
pub fn format_si(value: f64, width: usize, unit: &str) -> String {
    if value == 0.0 || !value.is_finite() {
        let text = if value.is_finite() { "0.00".to_string() } else { value.to_string() };
        return format!("{text:>width$} {unit}");
    }

    let mut mantissa = value.abs();
    let mut index = UNPREFIXED;
    while mantissa >= 1000.0 && index < PREFIXES.len() - 1 {
        mantissa /= 1000.0;
        index += 1;
    }
    while mantissa < 1.0 && index > 0 {
        mantissa *= 1000.0;
        index -= 1;
    }
    // 999.999 would print as 1000.00
    if (mantissa * 100.0).round() >= 100_000.0 && index < PREFIXES.len() - 1 {
        mantissa /= 1000.0;
        index += 1;
    }

    let mantissa = mantissa.copysign(value);
    format!("{mantissa:>width$.2} {}{unit}", PREFIXES[index])
}
