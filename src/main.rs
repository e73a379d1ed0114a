use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;

use cube::linux::{self, Memory};
use cube::si::format_si;
use cube::tsc::{self, Rdtsc, TscResolver};
use cube::{CpuInfo, Cpuid, NativeCpuid, RecordedCpuid, Vendor, brand_string, vendor_identity};

mod logging;

const UNKNOWN: &str = "<unknown>";
const BAR_CELLS: usize = 50;
const MIN_INTERVAL: f64 = 0.1;

/// Prints CPU, memory, distro, battery and uptime information.
///
/// With no section flags every section except the TSC probe and the
/// `--watch` bar is printed.
#[derive(Debug, Parser)]
#[command(name = "cube", version, about)]
struct Args {
    /// CPU vendor, model, core counts and hyper-threading
    #[arg(long)]
    cpu: bool,

    /// Instruction-set flags from CPUID leaf 1
    #[arg(long)]
    features: bool,

    /// Time stamp counter tick duration and granularity
    #[arg(long)]
    tsc: bool,

    /// Distribution name from /etc/os-release
    #[arg(long)]
    distro: bool,

    /// Battery manufacturers from /sys/class/power_supply
    #[arg(long = "battery-manufacturer")]
    battery_manufacturer: bool,

    /// Total and available RAM
    #[arg(long)]
    ram: bool,

    /// Time since boot
    #[arg(long)]
    uptime: bool,

    /// Redraw a CPU usage bar until interrupted
    #[arg(long)]
    watch: bool,

    /// Seconds between redraws with --watch (at least 0.1)
    #[arg(long, default_value = "1", value_parser = parse_interval, requires = "watch")]
    interval: Duration,

    /// Decode a raw `cpuid -r` dump instead of the running processor
    #[arg(long, value_name = "FILE")]
    replay: Option<PathBuf>,

    /// More log output (repeatable); CUBE_LOG sets the base level
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

impl Args {
    fn nothing_selected(&self) -> bool {
        !(self.cpu
            || self.features
            || self.tsc
            || self.distro
            || self.battery_manufacturer
            || self.ram
            || self.uptime
            || self.watch)
    }
}

fn main() -> ExitCode {
    let args = Args::parse();
    logging::Logger::init(args.verbose);

    let replay = match &args.replay {
        Some(path) => match load_dump(path) {
            Some(recorded) => Some(recorded),
            None => return ExitCode::FAILURE,
        },
        None => None,
    };

    let all = args.nothing_selected();
    let mut status = ExitCode::SUCCESS;

    if all || args.cpu || args.features {
        let (cpu, cpuid): (CpuInfo, &dyn Cpuid) = match &replay {
            Some(recorded) => (CpuInfo::from_cpuid(recorded), recorded as &dyn Cpuid),
            None => (CpuInfo::new(), &NativeCpuid as &dyn Cpuid),
        };
        if all || args.cpu {
            print_cpu(&cpu, cpuid);
        }
        if all || args.features {
            print_features(&cpu);
        }
    }
    if args.tsc {
        let result = match &replay {
            Some(recorded) => print_tsc(recorded),
            None => print_tsc(&NativeCpuid),
        };
        if let Err(e) = result {
            eprintln!("error: {e}");
            status = ExitCode::FAILURE;
        }
    }
    if all || args.ram {
        print_ram();
    }
    if all || args.distro {
        println!("Distro:     {}", linux::read_distro(linux::OS_RELEASE).as_deref().unwrap_or(UNKNOWN));
    }
    if all || args.battery_manufacturer {
        let vendors = linux::read_battery_vendors(linux::POWER_SUPPLY);
        if vendors.is_empty() {
            println!("Battery:    {UNKNOWN}");
        }
        for vendor in vendors {
            println!("Battery:    {vendor}");
        }
    }
    if all || args.uptime {
        match linux::read_uptime(linux::UPTIME) {
            Some(uptime) => println!("Uptime:     {uptime}"),
            None => println!("Uptime:     {UNKNOWN}"),
        }
    }
    if args.watch {
        watch(args.interval);
    }

    status
}

fn parse_interval(value: &str) -> Result<Duration, String> {
    let seconds: f64 = value.parse().map_err(|e| format!("{e}"))?;
    if !seconds.is_finite() || seconds < 0.0 {
        return Err(format!("{value} is not a finite, non-negative number of seconds"));
    }
    Duration::try_from_secs_f64(seconds.max(MIN_INTERVAL))
        .map_err(|e| format!("{value}: {e}"))
}

fn load_dump(path: &Path) -> Option<RecordedCpuid> {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) => {
            eprintln!("error: could not read {}: {e}", path.display());
            return None;
        }
    };
    match RecordedCpuid::parse(&content) {
        Ok(recorded) if !recorded.is_empty() => Some(recorded),
        Ok(_) => {
            eprintln!("error: {} contains no CPUID leaves", path.display());
            None
        }
        Err(e) => {
            eprintln!("error: {}: {e}", path.display());
            None
        }
    }
}

fn print_cpu(cpu: &CpuInfo, cpuid: &dyn Cpuid) {
    let count = |n: Option<usize>| n.map_or_else(|| UNKNOWN.to_string(), |n| n.to_string());

    match cpu.vendor {
        Vendor::Unknown => println!("Vendor:     {UNKNOWN}"),
        _ => println!("Vendor:     {} ({})", vendor_identity(cpuid), cpu.vendor),
    }
    println!("Model:      {}", cpu.model);
    println!("Arch:       {:?}", cpu.architecture);
    println!("Threads:    {}", count(cpu.total_logical_cores));
    println!("Cores:      {}", count(cpu.total_physical_cores));
    println!("HT active:  {}", if cpu.hyper_threading { "yes" } else { "no" });
}

fn print_features(cpu: &CpuInfo) {
    let Some(features) = cpu.features else {
        println!("Features:   {UNKNOWN}");
        return;
    };
    let supported: Vec<_> = features.supported().map(str::to_lowercase).collect();
    println!("Features:   {}", supported.join(" "));
}

fn print_tsc(cpuid: &dyn Cpuid) -> cube::Result<()> {
    if !NativeCpuid::is_supported() {
        return Err(cube::Error::UnsupportedArchitecture(std::env::consts::ARCH));
    }

    let tick = TscResolver::new(cpuid, &Rdtsc).resolve()?;
    let granularity = tsc::estimate_granularity(&Rdtsc, tsc::GRANULARITY_SAMPLES);

    if let Some(brand) = brand_string(cpuid) {
        println!("Brand:      {brand}");
    }
    println!("TSC tick:   {} ({})", format_si(tick.seconds_per_tick, 7, "s").trim_start(), tick.source);
    println!("TSC freq:   {}", format_si(tick.frequency_hz(), 7, "Hz").trim_start());
    match granularity {
        Some(step) => {
            println!("Step:       {step} ticks");
            println!(
                "Resolution: {}",
                format_si(tick.effective_resolution(granularity), 7, "s").trim_start()
            );
        }
        None => println!("Step:       {UNKNOWN}"),
    }
    Ok(())
}

fn print_ram() {
    match Memory::read() {
        Some(memory) => {
            println!("RAM total:  {} kB", memory.total_kb);
            println!("RAM avail:  {} kB ({:.1}% used)", memory.available_kb, memory.used_percent());
        }
        None => println!("RAM:        {UNKNOWN}"),
    }
}

/// `CPU [|||||       12.5%]`, one bar cell per 2%.
fn progress_bar(percent: f32) -> String {
    let filled = ((percent.clamp(0.0, 100.0) / 100.0) * BAR_CELLS as f32).round() as usize;
    format!(
        "CPU [{}{}{:>5.1}%]",
        "|".repeat(filled),
        " ".repeat(BAR_CELLS - filled),
        percent
    )
}

/// Samples /proc/stat every `interval` and redraws the bar in place. Runs
/// until the process is interrupted.
fn watch(interval: Duration) {
    let Some(mut previous) = linux::read_cpu_times(linux::STAT) else {
        println!("CPU usage:  {UNKNOWN}");
        return;
    };

    let mut stdout = std::io::stdout();
    loop {
        std::thread::sleep(interval);
        let Some(current) = linux::read_cpu_times(linux::STAT) else {
            log::warn!(target: "cube", "lost /proc/stat, stopping");
            println!();
            return;
        };

        let bar = progress_bar(current.usage_since(&previous));
        if write!(stdout, "\r{bar}").and_then(|()| stdout.flush()).is_err() {
            return;
        }
        previous = current;
    }
}
