//! Time stamp counter frequency discovery.
//!
//! The duration of one TSC tick is resolved from the first source that works:
//!
//! 1. CPUID leaf 0x15 (TSC / crystal clock ratio and crystal frequency),
//! 2. the frequency suffix of the brand string (`... @ 3.70GHz`),
//! 3. counting ticks across a 5 ms busy-wait on the monotonic clock.
//!
//! None of this is attempted unless the processor reports an invariant TSC.

use std::fmt;
use std::time::{Duration, Instant};

use crate::cpuid::{Cpuid, bit, leaf, max_basic_leaf, max_extended_leaf};
use crate::identity::brand_string;
use crate::{Error, Result};

/// Interval the empirical tier spins for.
pub const MEASUREMENT_INTERVAL: Duration = Duration::from_millis(5);

/// Readings taken by [`estimate_granularity`] by default.
pub const GRANULARITY_SAMPLES: usize = 50;

/// A free-running cycle counter.
pub trait TickCounter {
    fn ticks(&self) -> u64;
}

/// The processor's time stamp counter, read with RDTSC.
#[derive(Debug, Default, Clone, Copy)]
pub struct Rdtsc;

impl TickCounter for Rdtsc {
    #[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
    #[allow(unused_unsafe)]
    #[inline]
    fn ticks(&self) -> u64 {
        #[cfg(target_arch = "x86")]
        use core::arch::x86::_rdtsc;
        #[cfg(target_arch = "x86_64")]
        use core::arch::x86_64::_rdtsc;

        // SAFETY: RDTSC is unprivileged unless CR4.TSD is set, which Linux
        // does not do for ordinary processes.
        unsafe { _rdtsc() }
    }

    #[cfg(not(any(target_arch = "x86", target_arch = "x86_64")))]
    fn ticks(&self) -> u64 {
        0
    }
}

/// Where a tick duration came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickSource {
    Leaf15,
    BrandString,
    Measurement,
}

impl TickSource {
    pub const fn label(&self) -> &'static str {
        match self {
            TickSource::Leaf15 => "leaf 15H",
            TickSource::BrandString => "model name string",
            TickSource::Measurement => "measurement",
        }
    }
}

impl fmt::Display for TickSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Seconds per TSC tick, tagged with its source.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TickDuration {
    pub seconds_per_tick: f64,
    pub source: TickSource,
}

impl TickDuration {
    pub fn frequency_hz(&self) -> f64 {
        1.0 / self.seconds_per_tick
    }

    /// Tick duration scaled by the counter's observed update step.
    pub fn effective_resolution(&self, granularity: Option<u64>) -> f64 {
        self.seconds_per_tick * granularity.unwrap_or(1) as f64
    }
}

impl From<TickDuration> for (f64, &'static str) {
    fn from(tick: TickDuration) -> Self {
        (tick.seconds_per_tick, tick.source.label())
    }
}

/// CPUID(0x80000007).EDX bit 8.
pub fn has_invariant_tsc(cpuid: &dyn Cpuid) -> bool {
    max_extended_leaf(cpuid) >= leaf::EXT_POWER && bit(cpuid.query(leaf::EXT_POWER, 0).edx, 8)
}

/// Resolves the tick duration of the time stamp counter.
pub struct TscResolver<'a> {
    cpuid: &'a dyn Cpuid,
    counter: &'a dyn TickCounter,
}

impl<'a> TscResolver<'a> {
    pub fn new(cpuid: &'a dyn Cpuid, counter: &'a dyn TickCounter) -> Self {
        Self { cpuid, counter }
    }

    /// Fails only when the TSC is not invariant; otherwise the measurement
    /// tier always produces a value.
    pub fn resolve(&self) -> Result<TickDuration> {
        if !has_invariant_tsc(self.cpuid) {
            log::error!(target: "cube::tsc", "invariant TSC not reported, refusing to use it as a timebase");
            return Err(Error::InvariantTscUnsupported);
        }

        if let Some(seconds_per_tick) = self.from_leaf_15() {
            return Ok(TickDuration { seconds_per_tick, source: TickSource::Leaf15 });
        }
        if let Some(seconds_per_tick) = self.from_brand_string() {
            return Ok(TickDuration { seconds_per_tick, source: TickSource::BrandString });
        }
        Ok(TickDuration {
            seconds_per_tick: measure(self.counter),
            source: TickSource::Measurement,
        })
    }

    /// EAX is the ratio denominator, EBX the numerator, ECX the crystal
    /// clock in Hz.
    fn from_leaf_15(&self) -> Option<f64> {
        if max_basic_leaf(self.cpuid) < leaf::TSC_FREQ {
            log::debug!(target: "cube::tsc", "leaf 0x15 not implemented");
            return None;
        }

        let regs = self.cpuid.query(leaf::TSC_FREQ, 0);
        if regs.eax == 0 || regs.ebx == 0 || regs.ecx == 0 {
            log::debug!(target: "cube::tsc", "leaf 0x15 does not enumerate the TSC frequency");
            return None;
        }

        Some(regs.eax as f64 / (regs.ebx as f64 * regs.ecx as f64))
    }

    fn from_brand_string(&self) -> Option<f64> {
        let brand = brand_string(self.cpuid)?;
        let hz = parse_brand_frequency(&brand);
        if hz.is_none() {
            log::debug!(target: "cube::tsc", "no frequency in brand string {brand:?}");
        }
        hz.map(|hz| 1.0 / hz)
    }
}

/// Frequency in Hz encoded at the end of a brand string, e.g.
/// `Intel(R) Core(TM) i7-8700K CPU @ 3.70GHz`.
///
/// Apple brand strings never carry the frequency this way and are rejected.
pub fn parse_brand_frequency(brand: &str) -> Option<f64> {
    if brand.contains("Apple") {
        return None;
    }

    let brand = brand.trim_end();
    let head = brand.strip_suffix("Hz")?;
    let scale = match head.chars().last()? {
        'M' => 1e6,
        'G' => 1e9,
        'T' => 1e12,
        _ => return None,
    };
    let head = &head[..head.len() - 1];

    let token = match head.rfind(' ') {
        Some(space) => &head[space + 1..],
        None => head,
    };
    let frequency: f64 = token.parse().ok()?;
    if !frequency.is_finite() || frequency <= 0.0 {
        return None;
    }

    Some(frequency * scale)
}

/// Counts ticks across [`MEASUREMENT_INTERVAL`] of monotonic wall-clock time.
///
/// Spins rather than sleeps: scheduler wakeup jitter is far coarser than
/// the counter.
pub fn measure(counter: &dyn TickCounter) -> f64 {
    let start = Instant::now();
    let first = counter.ticks();
    while start.elapsed() < MEASUREMENT_INTERVAL {
        std::hint::spin_loop();
    }
    let last = counter.ticks();

    let elapsed = last.wrapping_sub(first).max(1);
    log::debug!(target: "cube::tsc", "{elapsed} ticks in {MEASUREMENT_INTERVAL:?}");
    MEASUREMENT_INTERVAL.as_secs_f64() / elapsed as f64
}

/// Smallest non-zero step between `samples` back-to-back counter readings.
///
/// `None` when the counter never advanced.
pub fn estimate_granularity(counter: &dyn TickCounter, samples: usize) -> Option<u64> {
    let mut readings = Vec::with_capacity(samples);
    for _ in 0..samples {
        readings.push(counter.ticks());
    }

    readings
        .windows(2)
        .map(|pair| pair[1].wrapping_sub(pair[0]))
        .filter(|&delta| delta != 0)
        .min()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cpuid::{RecordedCpuid, Registers};
    use rstest::rstest;
    use std::cell::Cell;

    /// Advances by a fixed step on every read.
    struct SteppingCounter {
        next: Cell<u64>,
        step: u64,
    }

    impl SteppingCounter {
        fn new(step: u64) -> Self {
            Self { next: Cell::new(0), step }
        }
    }

    impl TickCounter for SteppingCounter {
        fn ticks(&self) -> u64 {
            let value = self.next.get();
            self.next.set(value + self.step);
            value
        }
    }

    fn invariant() -> RecordedCpuid {
        RecordedCpuid::new()
            .with(leaf::EXT_MAX, Registers::new(0x8000_0008, 0, 0, 0))
            .with(leaf::EXT_POWER, Registers::new(0, 0, 0, 1 << 8))
    }

    fn brand(cpuid: RecordedCpuid, text: &str) -> RecordedCpuid {
        let mut bytes = [0u8; 48];
        bytes[..text.len()].copy_from_slice(text.as_bytes());
        let word = |i: usize| u32::from_le_bytes([bytes[i], bytes[i + 1], bytes[i + 2], bytes[i + 3]]);
        let block = |b: usize| Registers::new(word(b), word(b + 4), word(b + 8), word(b + 12));
        cpuid
            .with(leaf::BRAND_1, block(0))
            .with(leaf::BRAND_2, block(16))
            .with(leaf::BRAND_3, block(32))
    }

    #[test]
    fn refuses_without_invariant_tsc() {
        let cpuid = RecordedCpuid::new().with(leaf::EXT_MAX, Registers::new(0x8000_0008, 0, 0, 0));
        let resolver = TscResolver::new(&cpuid, &Rdtsc);
        assert_eq!(resolver.resolve(), Err(Error::InvariantTscUnsupported));
    }

    #[test]
    fn leaf_15_ratio() {
        let cpuid = invariant()
            .with_vendor(0x16, b"GenuineIntel")
            .with(leaf::TSC_FREQ, Registers::new(1, 2, 3, 0));
        let tick = TscResolver::new(&cpuid, &Rdtsc).resolve().unwrap();

        assert_eq!(tick.source, TickSource::Leaf15);
        assert!((tick.seconds_per_tick - 1.0 / 6.0).abs() < 1e-12);
    }

    #[test]
    fn leaf_15_below_max_leaf_falls_through_to_brand() {
        let cpuid = brand(
            invariant()
                .with_vendor(0x14, b"GenuineIntel")
                .with(leaf::TSC_FREQ, Registers::new(1, 2, 3, 0)),
            "Intel(R) Core(TM) i7-8700K CPU @ 3.70GHz",
        );
        let tick = TscResolver::new(&cpuid, &Rdtsc).resolve().unwrap();

        assert_eq!(tick.source, TickSource::BrandString);
        assert!((tick.frequency_hz() - 3.7e9).abs() < 1.0);
    }

    #[test]
    fn unenumerated_leaf_15_falls_through() {
        let cpuid = brand(
            invariant()
                .with_vendor(0x16, b"GenuineIntel")
                .with(leaf::TSC_FREQ, Registers::new(2, 0, 0, 0)),
            "Intel(R) Xeon(R) CPU E5-2680 v4 @ 2.40GHz",
        );
        let tick = TscResolver::new(&cpuid, &Rdtsc).resolve().unwrap();
        assert_eq!(tick.source, TickSource::BrandString);
    }

    #[test]
    fn measurement_is_the_last_resort() {
        let cpuid = brand(invariant(), "AMD Ryzen 7 5800X 8-Core Processor");
        let counter = SteppingCounter::new(1_000);
        let tick = TscResolver::new(&cpuid, &counter).resolve().unwrap();

        assert_eq!(tick.source, TickSource::Measurement);
        // two reads, one step apart
        assert!((tick.seconds_per_tick - 0.005 / 1_000.0).abs() < 1e-15);
    }

    #[test]
    fn frozen_counter_still_measures() {
        struct Frozen;
        impl TickCounter for Frozen {
            fn ticks(&self) -> u64 {
                42
            }
        }
        assert_eq!(measure(&Frozen), 0.005);
    }

    #[rstest]
    #[case("Intel(R) Core(TM) i7-8700K CPU @ 3.70GHz", Some(3.7e9))]
    #[case("Intel(R) Pentium(R) 4 CPU 1500MHz", Some(1.5e9))]
    #[case("Hypothetical CPU @ 1.5THz  ", Some(1.5e12))]
    #[case("2.0GHz", Some(2.0e9))]
    #[case("AMD Ryzen 9 7950X 16-Core Processor", None)]
    #[case("Apple M1 @ 3.2GHz", None)]
    #[case("Weird CPU @ 3.70KHz", None)]
    #[case("Broken CPU @ GHz", None)]
    #[case("Zero CPU @ 0.00GHz", None)]
    fn brand_frequency(#[case] brand: &str, #[case] expected: Option<f64>) {
        match (parse_brand_frequency(brand), expected) {
            (Some(got), Some(want)) => assert!((got - want).abs() < 1.0, "{got} != {want}"),
            (got, want) => assert_eq!(got, want),
        }
    }

    #[test]
    fn granularity_is_minimum_step() {
        let counter = SteppingCounter::new(36);
        assert_eq!(estimate_granularity(&counter, GRANULARITY_SAMPLES), Some(36));
    }

    #[test]
    fn granularity_ignores_repeated_readings() {
        struct Coarse(Cell<u64>);
        impl TickCounter for Coarse {
            fn ticks(&self) -> u64 {
                let n = self.0.get();
                self.0.set(n + 1);
                (n / 3) * 100
            }
        }
        assert_eq!(estimate_granularity(&Coarse(Cell::new(0)), 50), Some(100));
    }

    #[test]
    fn granularity_of_frozen_counter_is_unknown() {
        let counter = SteppingCounter::new(0);
        assert_eq!(estimate_granularity(&counter, 50), None);
    }

    #[test]
    fn effective_resolution_scales_by_granularity() {
        let tick = TickDuration { seconds_per_tick: 1e-9, source: TickSource::Measurement };
        assert!((tick.effective_resolution(Some(20)) - 2e-8).abs() < 1e-20);
        assert_eq!(tick.effective_resolution(None), 1e-9);
    }

    #[test]
    fn converts_to_value_and_label() {
        let tick = TickDuration { seconds_per_tick: 0.25, source: TickSource::Leaf15 };
        let (value, label): (f64, &str) = tick.into();
        assert_eq!((value, label), (0.25, "leaf 15H"));
    }

    #[test]
    fn source_labels() {
        assert_eq!(TickSource::Leaf15.to_string(), "leaf 15H");
        assert_eq!(TickSource::BrandString.to_string(), "model name string");
        assert_eq!(TickSource::Measurement.to_string(), "measurement");
    }
}
