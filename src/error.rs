use thiserror::Error;

/// Errors surfaced by the probe.
///
/// Most missing capabilities are not errors: absent leaves decode to empty or
/// default values. Only conditions that would make a result misleading end up
/// here.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    /// The time stamp counter does not run at a constant rate
    /// (CPUID 0x80000007 EDX bit 8 clear), so it cannot be used as a timebase.
    #[error("processor does not report an invariant TSC; the cycle counter is not a valid timebase")]
    InvariantTscUnsupported,
    /// CPUID/RDTSC are not available on this architecture.
    #[error("CPUID is not available on the {0} architecture")]
    UnsupportedArchitecture(&'static str),
    /// A recorded CPUID dump line could not be parsed.
    #[error("malformed CPUID dump at line {line}")]
    MalformedDump { line: usize },
}

pub type Result<T> = std::result::Result<T, Error>;
