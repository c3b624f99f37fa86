//! memsnoop - working set tracer for a running process.
//!
//! Samples which pages of a process were touched between rounds using
//! Linux idle page tracking, prints the working set size per round and
//! optionally writes the full trace as JSON. Needs root.

use tikv_jemallocator::Jemalloc;
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use clap::Parser;
use tracing::{Level, debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use memsnoop_core::collector::counters::{ProcessIo, Statm, Timestamp, Uptime};
use memsnoop_core::collector::{IdlePageTracker, RealFs, Series};
use memsnoop_core::fmt::{FmtStyle, format_bytes, format_duration, format_pages};
use memsnoop_core::hugepages;
use memsnoop_core::model::Vma;
use memsnoop_core::{Iterations, RealSignals, SnoopedProcess, TraceData, TraceEnd, Tracer, util};

/// Name of the idle page series in the trace.
const IDLE_SERIES: &str = "idle_pages";

/// Working set tracer based on Linux idle page tracking.
#[derive(Parser)]
#[command(name = "memsnoop", about = "Working set tracer for a running process", version)]
struct Args {
    /// Process to trace.
    pid: u32,

    /// Sampling interval in seconds (fractions allowed).
    #[arg(short, long, default_value = "2", value_parser = parse_interval)]
    interval: Duration,

    /// Number of rounds to take. Default: until the process exits.
    #[arg(short = 'n', long)]
    rounds: Option<usize>,

    /// Do not stop the process while it is measured.
    /// Samples may then be inconsistent.
    #[arg(long)]
    no_pause: bool,

    /// Only trace the heap.
    #[arg(long)]
    heap: bool,

    /// Only trace readable mappings.
    #[arg(long)]
    readable: bool,

    /// Only trace writable mappings.
    #[arg(long)]
    writable: bool,

    /// Only trace executable mappings.
    #[arg(long)]
    executable: bool,

    /// Only trace mappings longer than this many pages.
    #[arg(long, value_name = "PAGES")]
    min_pages: Option<u64>,

    /// Also record timestamp, /proc/[pid]/io, statm and uptime each round.
    #[arg(long)]
    counters: bool,

    /// Write the trace as JSON to this file.
    #[arg(short, long, value_name = "PATH")]
    output: Option<PathBuf>,

    /// Refuse to start while transparent huge pages are enabled.
    #[arg(long)]
    check_thp: bool,

    /// Path to /proc filesystem.
    #[arg(long, default_value = "/proc")]
    proc_path: PathBuf,

    /// Path to the idle page bitmap.
    #[arg(long, default_value = memsnoop_core::collector::idle::DEFAULT_BITMAP_PATH)]
    bitmap_path: PathBuf,

    /// Increase logging verbosity (-v for debug, -vv for trace). Default is info level.
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Quiet mode - only show errors.
    #[arg(short, long)]
    quiet: bool,
}

/// Parses a non-negative number of seconds.
fn parse_interval(s: &str) -> Result<Duration, String> {
    let secs: f64 = s
        .trim()
        .parse()
        .map_err(|e| format!("invalid interval '{}': {}", s, e))?;
    Duration::try_from_secs_f64(secs).map_err(|e| format!("invalid interval '{}': {}", s, e))
}

/// Initializes the tracing subscriber with the appropriate log level.
/// Default level is INFO. Use -q for quiet mode (errors only).
fn init_logging(verbose: u8, quiet: bool) {
    let level = if quiet {
        Level::ERROR
    } else {
        match verbose {
            0 => Level::INFO,
            1 => Level::DEBUG,
            _ => Level::TRACE,
        }
    };

    let mut filter = EnvFilter::from_default_env();
    for target in ["memsnoop", "memsnoop_core"] {
        if let Ok(directive) = format!("{}={}", target, level).parse() {
            filter = filter.add_directive(directive);
        }
    }

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

/// Builds the VMA predicate from the filter flags. All given flags must hold.
fn vma_filter(args: &Args) -> impl Fn(&Vma) -> bool + Send + Sync + 'static {
    let (heap, readable, writable, executable) =
        (args.heap, args.readable, args.writable, args.executable);
    let min_pages = args.min_pages;
    move |vma: &Vma| {
        (!heap || vma.is_heap())
            && (!readable || vma.is_readable())
            && (!writable || vma.is_writable())
            && (!executable || vma.is_executable())
            && min_pages.is_none_or(|n| vma.longer_than(n))
    }
}

/// Prints one line for the round just committed.
fn print_round(round: usize, series: &[Series], page_size: u64) {
    let sample = series
        .iter()
        .find(|s| s.name == IDLE_SERIES)
        .and_then(|s| s.readings.last())
        .and_then(|r| r.as_sample());
    if let Some(sample) = sample {
        println!(
            "round {:>5}  vmas {:>4}  wss {}",
            round + 1,
            sample.vmas().len(),
            format_pages(sample.wss(), page_size, FmtStyle::Compact)
        );
    }
}

/// Prints totals over the whole trace.
fn print_summary(data: &TraceData, page_size: u64) {
    let end = match &data.end {
        TraceEnd::Completed => "completed".to_string(),
        TraceEnd::ProcessExited => "process exited".to_string(),
        TraceEnd::Shutdown => "interrupted".to_string(),
        TraceEnd::Aborted(msg) => format!("aborted: {}", msg),
    };
    let elapsed = (data.finished_at - data.started_at).num_seconds().max(0) as u64;

    println!();
    println!(
        "pid {}: {} rounds in {} ({})",
        data.pid,
        data.rounds,
        format_duration(elapsed, FmtStyle::Detail),
        end
    );

    let Some(trace) = data.trace(IDLE_SERIES) else {
        return;
    };
    let mapped: u64 = trace.vma_union().iter().map(|v| v.len()).sum();
    let touched = trace.active_pages().len() as u64;
    let peak = trace.wss().into_iter().max().unwrap_or(0);

    println!("  mapped:       {}", format_pages(mapped, page_size, FmtStyle::Detail));
    println!("  ever touched: {}", format_pages(touched, page_size, FmtStyle::Detail));
    println!("  peak wss:     {}", format_pages(peak, page_size, FmtStyle::Detail));
}

fn write_json(path: &Path, data: &TraceData) -> Result<(), String> {
    let file =
        File::create(path).map_err(|e| format!("cannot create {}: {}", path.display(), e))?;
    serde_json::to_writer(BufWriter::new(file), data)
        .map_err(|e| format!("cannot write {}: {}", path.display(), e))
}

fn main() -> ExitCode {
    let args = Args::parse();

    init_logging(args.verbose, args.quiet);

    info!("memsnoop {} starting", env!("CARGO_PKG_VERSION"));

    let fs = RealFs::new();
    if !hugepages::check_hugepages(&fs) && args.check_thp {
        error!("transparent huge pages are enabled; refusing to trace");
        return ExitCode::FAILURE;
    }

    let page_size = util::page_size();
    let process = if args.no_pause {
        SnoopedProcess::unpausable(args.pid)
    } else {
        SnoopedProcess::pausable(args.pid)
    };
    if process.pid() == std::process::id() && !args.no_pause {
        error!("cannot pause ourselves; use --no-pause to trace memsnoop itself");
        return ExitCode::FAILURE;
    }

    let iterations = args.rounds.map_or(Iterations::UntilExit, Iterations::Count);
    info!(
        "Config: pid={}, interval={:?}, rounds={:?}, pause={}, page_size={}",
        args.pid,
        args.interval,
        iterations,
        !args.no_pause,
        format_bytes(page_size, FmtStyle::Compact)
    );

    // Setup graceful shutdown
    let shutdown = Arc::new(AtomicBool::new(false));
    let s = shutdown.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        info!("Received shutdown signal");
        s.store(true, Ordering::SeqCst);
    }) {
        warn!("Failed to set Ctrl-C handler: {}", e);
    }

    let tracker = IdlePageTracker::new(fs)
        .with_filter(vma_filter(&args))
        .with_proc_path(&args.proc_path)
        .with_bitmap_path(&args.bitmap_path)
        .with_page_size(page_size);

    let mut tracer = Tracer::new(RealSignals::new().with_proc_path(&args.proc_path))
        .interval(args.interval)
        .iterations(iterations)
        .with_shutdown(shutdown)
        .measure(Box::new(tracker));
    if args.counters {
        debug!("Counters enabled");
        tracer = tracer
            .measure(Box::new(Timestamp))
            .measure(Box::new(ProcessIo::new(RealFs::new()).with_proc_path(&args.proc_path)))
            .measure(Box::new(Statm::new(RealFs::new()).with_proc_path(&args.proc_path)))
            .measure(Box::new(Uptime::new(RealFs::new()).with_proc_path(&args.proc_path)));
    }

    let data = match tracer.run_with(&process, |round, series| {
        print_round(round, series, page_size)
    }) {
        Ok(data) => data,
        Err(e) => {
            error!("{}", e);
            return ExitCode::FAILURE;
        }
    };

    print_summary(&data, page_size);

    if let Some(path) = &args.output {
        if let Err(e) = write_json(path, &data) {
            error!("{}", e);
            return ExitCode::FAILURE;
        }
        info!("Trace written to {}", path.display());
    }

    match data.end {
        TraceEnd::Aborted(_) => ExitCode::FAILURE,
        _ => ExitCode::SUCCESS,
    }
}
