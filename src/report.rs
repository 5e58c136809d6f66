//! Runtime reporting — deadline misses, clock anomalies, profiling results
//!
//! The scheduler and the profiler never swallow a runtime fault: each one
//! becomes an [`Event`] handed to a [`Reporter`]. Two sinks ship with the
//! crate: [`LogReporter`] forwards to the `log` facade, [`EventRing`] queues
//! events in a fixed-size lock-free ring for a lower-priority consumer.

use core::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use core::time::Duration;

use log::{info, warn};

use crate::clock::{Tick, Ticks, Timestamp};
use crate::task::TaskId;

/// Where a non-monotonic reading was observed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnomalyContext {
    /// Scheduler step saw the tick counter move backwards
    Dispatch { last: Tick, observed: Tick },
    /// Profiling sample ended before it started
    Sample {
        task: Option<TaskId>,
        iteration: u32,
        start: Timestamp,
        end: Timestamp,
    },
}

/// Result of profiling one task body
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProfileReport {
    pub task: Option<TaskId>,
    /// Largest elapsed time over all valid samples
    pub max_elapsed: Duration,
    /// `max_elapsed` in whole ticks, truncated
    pub tick_equivalent: Ticks,
    /// Samples kept (iterations minus anomalies)
    pub samples: u32,
    /// `tick_equivalent <= period`; always true for aperiodic tasks
    pub feasible: bool,
}

/// Runtime event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    /// A periodic job was still pending when the boundary at `tick` passed
    DeadlineMiss { task: TaskId, tick: Tick },
    /// Timestamp went backwards; the affected reading was discarded
    ClockAnomaly { context: AnomalyContext },
    /// A profiling run finished
    Profile(ProfileReport),
    /// Profiled WCET exceeds the declared period
    InfeasibleTask { task: TaskId, wcet_ticks: Ticks, period: Ticks },
}

/// Sink for runtime events
pub trait Reporter {
    fn report(&mut self, event: Event);
}

impl<R: Reporter + ?Sized> Reporter for &mut R {
    fn report(&mut self, event: Event) {
        (**self).report(event)
    }
}

/// Forwards every event to the `log` facade
#[derive(Debug, Clone, Copy, Default)]
pub struct LogReporter;

impl Reporter for LogReporter {
    fn report(&mut self, event: Event) {
        match event {
            Event::DeadlineMiss { task, tick } => {
                warn!("deadline miss: {task} still pending at {tick}");
            }
            Event::ClockAnomaly { context } => {
                warn!("clock anomaly: {context:?}");
            }
            Event::Profile(r) => {
                info!(
                    "wcet {:?}: {} ns, {} ticks over {} samples, feasible={}",
                    r.task,
                    r.max_elapsed.as_nanos(),
                    r.tick_equivalent,
                    r.samples,
                    r.feasible
                );
            }
            Event::InfeasibleTask { task, wcet_ticks, period } => {
                warn!("infeasible: {task} wcet {wcet_ticks} ticks exceeds period {period} ticks");
            }
        }
    }
}

/// Lock-free SPSC ring buffer
///
/// Fixed-size, no-alloc, interrupt-safe. One slot is reserved to tell full
/// from empty. Used as a [`Reporter`] it never blocks the dispatch loop: when
/// full, the newest event is dropped and counted in [`dropped`](Self::dropped).
pub struct EventRing<T: Copy, const N: usize> {
    /// Ring buffer storage
    buffer: [Option<T>; N],
    /// Write index (owned by producer)
    write_idx: AtomicUsize,
    /// Read index (owned by consumer)
    read_idx: AtomicUsize,
    /// Pushes rejected because the ring was full
    dropped: AtomicU32,
}

impl<T: Copy, const N: usize> EventRing<T, N> {
    /// Create a new empty ring buffer
    pub const fn new() -> Self {
        Self {
            buffer: [None; N],
            write_idx: AtomicUsize::new(0),
            read_idx: AtomicUsize::new(0),
            dropped: AtomicU32::new(0),
        }
    }

    /// Push a value (producer side)
    ///
    /// Returns false if buffer is full.
    pub fn push(&mut self, value: T) -> bool {
        let write = self.write_idx.load(Ordering::Relaxed);
        let read = self.read_idx.load(Ordering::Acquire);
        let next_write = (write + 1) % N;

        if next_write == read {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            return false;
        }

        self.buffer[write] = Some(value);
        self.write_idx.store(next_write, Ordering::Release);
        true
    }

    /// Pop a value (consumer side)
    pub fn pop(&mut self) -> Option<T> {
        let read = self.read_idx.load(Ordering::Relaxed);
        let write = self.write_idx.load(Ordering::Acquire);

        if read == write {
            return None;
        }

        let value = self.buffer[read].take();
        self.read_idx.store((read + 1) % N, Ordering::Release);
        value
    }

    /// Number of items in the buffer
    pub fn len(&self) -> usize {
        let write = self.write_idx.load(Ordering::Relaxed);
        let read = self.read_idx.load(Ordering::Relaxed);
        if write >= read {
            write - read
        } else {
            N - read + write
        }
    }

    pub fn is_empty(&self) -> bool {
        self.write_idx.load(Ordering::Relaxed) == self.read_idx.load(Ordering::Relaxed)
    }

    /// Available capacity
    pub fn capacity(&self) -> usize {
        N - 1
    }

    /// Pushes rejected since creation
    pub fn dropped(&self) -> u32 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Iterate queued values oldest first without consuming them
    pub fn iter(&self) -> impl Iterator<Item = T> + '_ {
        let read = self.read_idx.load(Ordering::Acquire);
        (0..self.len()).filter_map(move |i| self.buffer[(read + i) % N])
    }
}

impl<T: Copy, const N: usize> Default for EventRing<T, N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> EventRing<Event, N> {
    /// Deadline misses currently queued
    pub fn deadline_misses(&self) -> impl Iterator<Item = (TaskId, Tick)> + '_ {
        self.iter().filter_map(|e| match e {
            Event::DeadlineMiss { task, tick } => Some((task, tick)),
            _ => None,
        })
    }

    /// Clock anomalies currently queued
    pub fn anomalies(&self) -> impl Iterator<Item = AnomalyContext> + '_ {
        self.iter().filter_map(|e| match e {
            Event::ClockAnomaly { context } => Some(context),
            _ => None,
        })
    }
}

impl<const N: usize> Reporter for EventRing<Event, N> {
    fn report(&mut self, event: Event) {
        if !self.push(event) {
            warn!("event ring full, dropped {event:?}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::thread::{self, ThreadId};

    use log::{Level, LevelFilter, Log, Metadata, Record};

    #[test]
    fn test_push_pop() {
        let mut ring = EventRing::<u32, 8>::new();
        assert!(ring.is_empty());

        ring.push(42);
        assert_eq!(ring.len(), 1);
        assert_eq!(ring.pop(), Some(42));
        assert!(ring.is_empty());
    }

    #[test]
    fn test_full_ring_counts_drops() {
        let mut ring = EventRing::<u32, 4>::new();
        assert!(ring.push(1));
        assert!(ring.push(2));
        assert!(ring.push(3));
        assert!(!ring.push(4));
        assert_eq!(ring.capacity(), 3);
        assert_eq!(ring.dropped(), 1);
    }

    #[test]
    fn test_wraparound_fifo() {
        let mut ring = EventRing::<u32, 4>::new();
        for round in 0..3 {
            for i in 0..3 {
                assert!(ring.push(round * 10 + i));
            }
            let seen: heapless::Vec<u32, 4> = ring.iter().collect();
            assert_eq!(seen.as_slice(), &[round * 10, round * 10 + 1, round * 10 + 2]);
            for i in 0..3 {
                assert_eq!(ring.pop(), Some(round * 10 + i));
            }
        }
    }

    #[test]
    fn test_reporter_filters() {
        let mut ring = EventRing::<Event, 8>::new();
        ring.report(Event::DeadlineMiss { task: TaskId(1), tick: Tick(20) });
        ring.report(Event::ClockAnomaly {
            context: AnomalyContext::Dispatch { last: Tick(5), observed: Tick(4) },
        });
        ring.report(Event::DeadlineMiss { task: TaskId(1), tick: Tick(30) });

        let misses: heapless::Vec<(TaskId, Tick), 4> = ring.deadline_misses().collect();
        assert_eq!(misses.as_slice(), &[(TaskId(1), Tick(20)), (TaskId(1), Tick(30))]);
        assert_eq!(ring.anomalies().count(), 1);
    }

    /// Logger keeping warn/info records emitted by one watched thread
    struct Capture {
        owner: Mutex<Option<ThreadId>>,
        records: Mutex<std::vec::Vec<(Level, std::string::String)>>,
    }

    impl Log for Capture {
        fn enabled(&self, metadata: &Metadata) -> bool {
            metadata.level() <= Level::Info
        }

        fn log(&self, record: &Record) {
            let watched = self.owner.lock().map_or(false, |o| *o == Some(thread::current().id()));
            if watched && self.enabled(record.metadata()) {
                if let Ok(mut records) = self.records.lock() {
                    records.push((record.level(), std::format!("{}", record.args())));
                }
            }
        }

        fn flush(&self) {}
    }

    static CAPTURE: Capture = Capture {
        owner: Mutex::new(None),
        records: Mutex::new(std::vec::Vec::new()),
    };

    #[test]
    fn test_log_reporter_levels_and_messages() {
        *CAPTURE.owner.lock().unwrap() = Some(thread::current().id());
        let _ = log::set_logger(&CAPTURE);
        log::set_max_level(LevelFilter::Info);

        let mut reporter = LogReporter;
        reporter.report(Event::DeadlineMiss { task: TaskId(1), tick: Tick(20) });
        reporter.report(Event::ClockAnomaly {
            context: AnomalyContext::Dispatch { last: Tick(5), observed: Tick(4) },
        });
        reporter.report(Event::Profile(ProfileReport {
            task: Some(TaskId(2)),
            max_elapsed: Duration::from_micros(2_500),
            tick_equivalent: 2,
            samples: 10,
            feasible: true,
        }));
        reporter.report(Event::InfeasibleTask { task: TaskId(3), wcet_ticks: 12, period: 10 });

        let records = CAPTURE.records.lock().unwrap().clone();
        assert_eq!(records.len(), 4, "{records:?}");

        let (level, msg) = &records[0];
        assert_eq!(*level, Level::Warn);
        assert_eq!(msg, "deadline miss: task#1 still pending at tick 20");

        let (level, msg) = &records[1];
        assert_eq!(*level, Level::Warn);
        assert!(msg.starts_with("clock anomaly: "), "{msg}");
        assert!(msg.contains("Dispatch"), "{msg}");

        let (level, msg) = &records[2];
        assert_eq!(*level, Level::Info);
        assert!(msg.contains("2500000 ns, 2 ticks over 10 samples, feasible=true"), "{msg}");

        let (level, msg) = &records[3];
        assert_eq!(*level, Level::Warn);
        assert_eq!(msg, "infeasible: task#3 wcet 12 ticks exceeds period 10 ticks");
    }

    #[test]
    fn test_full_ring_as_reporter_does_not_panic() {
        let mut ring = EventRing::<Event, 2>::new();
        for t in 0..5 {
            ring.report(Event::DeadlineMiss { task: TaskId(0), tick: Tick(t) });
        }
        assert_eq!(ring.len(), 1);
        assert_eq!(ring.dropped(), 4);
    }
}
