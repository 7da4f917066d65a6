//! Lane runtime: thread-per-core workers entering one shared loop.
//!
//! The main (winit) thread is lane 0; `init` spawns the remaining lanes.
//! All coordination is a full two-sided barrier: a lane that reaches
//! `lane_sync` blocks until every lane has arrived. The main loop is split
//! into phases bracketed by syncs; today only lane 0 does useful work
//! inside a phase, the others rendezvous and go around again. Operations
//! reserved for lane 0 (Vulkan, window polling, module calls) are never
//! executed elsewhere.
//!
//! Cancellation is cooperative: lane 0 raises the quit flag during its
//! phase, and every lane observes it after the end-of-phase barrier, so
//! all lanes leave the loop in the same iteration.

use std::cell::Cell;
use std::ops::Range;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Barrier, OnceLock};
use std::thread::JoinHandle;

use parking_lot::Mutex;

/// Lanes spawned by default. Lane 0 is the main thread.
pub const MAX_LANES: usize = 4;

static BARRIER: OnceLock<Barrier> = OnceLock::new();
static LANE_COUNT: AtomicUsize = AtomicUsize::new(1);
static QUIT: AtomicBool = AtomicBool::new(false);
static WORKERS: Mutex<Vec<JoinHandle<()>>> = Mutex::new(Vec::new());

thread_local! {
    static LANE_IDX: Cell<usize> = const { Cell::new(0) };
}

/// Install the barrier for `count` lanes and spawn `count - 1` workers.
/// The calling thread becomes lane 0. Call once, before the first
/// `lane_sync`. `init(1)` is the single-threaded specialization used by
/// the headless exporter.
pub fn init(count: usize) {
    let count = count.max(1);
    if BARRIER.set(Barrier::new(count)).is_err() {
        log::warn!("lanes: init called twice, keeping the first configuration");
        return;
    }
    LANE_COUNT.store(count, Ordering::Release);
    LANE_IDX.with(|l| l.set(0));

    let mut workers = WORKERS.lock();
    for idx in 1..count {
        let handle = std::thread::Builder::new()
            .name(format!("pyre-lane-{}", idx))
            .spawn(move || worker_main(idx))
            .expect("lanes: failed to spawn worker thread");
        workers.push(handle);
    }
    log::debug!("lanes: {} lanes up", count);
}

fn worker_main(idx: usize) {
    LANE_IDX.with(|l| l.set(idx));
    loop {
        // Phase start: wait for lane 0 to open the frame.
        lane_sync();
        // Go-wide phases would run here; nothing is parallelized yet, so a
        // worker's phase body is empty.
        lane_sync();
        // The quit flag is only read after the final barrier so every lane
        // exits in the same iteration.
        if quit_requested() {
            break;
        }
    }
}

/// This thread's lane index in `[0, lane_count())`.
pub fn lane_idx() -> usize {
    LANE_IDX.with(|l| l.get())
}

pub fn lane_count() -> usize {
    LANE_COUNT.load(Ordering::Acquire)
}

/// Block until every lane has arrived.
pub fn lane_sync() {
    BARRIER.get_or_init(|| Barrier::new(1)).wait();
}

/// The slice of `[0, total)` this lane owns. Even split, remainder
/// distributed to low-index lanes.
pub fn lane_range(total: usize) -> Range<usize> {
    lane_span(lane_idx(), lane_count(), total)
}

pub(crate) fn lane_span(idx: usize, lanes: usize, total: usize) -> Range<usize> {
    let base = total / lanes;
    let rem = total % lanes;
    let lo = idx * base + idx.min(rem);
    let hi = lo + base + usize::from(idx < rem);
    lo..hi
}

/// Raise the quit flag. Lane 0 only; observed by all lanes after the next
/// end-of-phase barrier.
pub fn request_quit() {
    QUIT.store(true, Ordering::Release);
}

pub fn quit_requested() -> bool {
    QUIT.load(Ordering::Acquire)
}

/// Join all worker lanes. Call after the final synced iteration, once the
/// quit flag has been observed everywhere.
pub fn join() {
    let mut workers = WORKERS.lock();
    for handle in workers.drain(..) {
        let _ = handle.join();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_span_even_split() {
        assert_eq!(lane_span(0, 4, 8), 0..2);
        assert_eq!(lane_span(1, 4, 8), 2..4);
        assert_eq!(lane_span(3, 4, 8), 6..8);
    }

    #[test]
    fn test_span_remainder_goes_low() {
        // 10 across 4 lanes: 3, 3, 2, 2.
        assert_eq!(lane_span(0, 4, 10), 0..3);
        assert_eq!(lane_span(1, 4, 10), 3..6);
        assert_eq!(lane_span(2, 4, 10), 6..8);
        assert_eq!(lane_span(3, 4, 10), 8..10);
    }

    #[test]
    fn test_span_fewer_items_than_lanes() {
        assert_eq!(lane_span(0, 4, 2), 0..1);
        assert_eq!(lane_span(1, 4, 2), 1..2);
        assert_eq!(lane_span(2, 4, 2), 2..2);
        assert_eq!(lane_span(3, 4, 2), 2..2);
    }

    #[test]
    fn test_span_covers_total() {
        for total in 0..50 {
            let mut covered = 0;
            for idx in 0..4 {
                let r = lane_span(idx, 4, total);
                assert!(r.start <= r.end);
                covered += r.len();
            }
            assert_eq!(covered, total);
        }
    }

    #[test]
    fn test_quit_flag_round_trip() {
        QUIT.store(false, Ordering::Release);
        request_quit();
        assert!(quit_requested());
        QUIT.store(false, Ordering::Release);
    }
}
