//! Real-kernel scenarios.
//!
//! Need root and a kernel with CONFIG_IDLE_PAGE_TRACKING; run with
//! `cargo test -p memsnoop-core -- --ignored`.

use std::hint::black_box;
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use memsnoop_core::collector::{IdlePageTracker, RealFs};
use memsnoop_core::model::Vma;
use memsnoop_core::{Iterations, RealSignals, SnoopedProcess, TraceEnd, Tracer, util};

const BUFFER_BYTES: usize = 16 * 1024 * 1024;

/// Writes one byte per page of `buf` repeatedly until `until`.
fn touch_until(buf: &mut [u8], page_size: usize, until: Instant) {
    let mut value = 0u8;
    while Instant::now() < until {
        value = value.wrapping_add(1);
        for page in buf.chunks_mut(page_size) {
            page[0] = value;
        }
        black_box(&mut *buf);
    }
}

#[test]
#[ignore = "needs root and idle page tracking"]
fn test_working_set_of_bursty_workload() {
    let page_size = util::page_size();
    let mut buffer = vec![1u8; BUFFER_BYTES];
    let first_page = buffer.as_ptr() as u64 / page_size;
    let last_page = (buffer.as_ptr() as u64 + BUFFER_BYTES as u64 - 1) / page_size;

    // Idle 4s, touch the buffer for 4s, idle 8s.
    let start = Instant::now();
    let worker = thread::spawn(move || {
        thread::sleep(Duration::from_secs(4));
        touch_until(&mut buffer, page_size as usize, start + Duration::from_secs(8));
        thread::sleep(Duration::from_secs(8));
        drop(buffer);
    });

    let tracker = IdlePageTracker::new(RealFs::new())
        .with_filter(move |v: &Vma| v.start() <= last_page && first_page <= v.stop());
    let mut tracer = Tracer::new(RealSignals::new())
        .interval(Duration::from_secs(2))
        .iterations(Iterations::Count(8))
        .measure(Box::new(tracker));

    // Pausing ourselves would deadlock.
    let data = tracer.run(&SnoopedProcess::current()).unwrap();
    worker.join().unwrap();

    assert_eq!(data.end, TraceEnd::Completed);
    let wss = data.trace("idle_pages").unwrap().wss();
    assert_eq!(wss.len(), 8);

    let pages = BUFFER_BYTES as u64 / page_size;
    assert!(wss[0] < pages / 10, "idle start: {:?}", wss);
    assert!(wss[2].max(wss[3]) > pages * 3 / 4, "touch window: {:?}", wss);
    assert!(wss[6] < pages / 10 && wss[7] < pages / 10, "idle end: {:?}", wss);
}

#[test]
#[ignore = "needs root and idle page tracking"]
fn test_target_killed_between_rounds() {
    let mut child = Command::new("sleep")
        .arg("60")
        .stdout(Stdio::null())
        .spawn()
        .unwrap();
    let pid = child.id();

    let mut tracer = Tracer::new(RealSignals::new())
        .interval(Duration::from_millis(200))
        .iterations(Iterations::Count(10))
        .measure(Box::new(IdlePageTracker::new(RealFs::new())));

    let data = tracer
        .run_with(&SnoopedProcess::pausable(pid), |round, _| {
            if round == 1 {
                child.kill().unwrap();
                child.wait().unwrap();
            }
        })
        .unwrap();

    assert_eq!(data.end, TraceEnd::ProcessExited);
    assert_eq!(data.rounds, 2);
    assert_eq!(data.trace("idle_pages").unwrap().len(), 2);
}
