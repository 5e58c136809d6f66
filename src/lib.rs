//! tick-rtos — fixed-priority preemptive tick scheduler
//!
//! Periodic and aperiodic tasks on a single logical processor, dispatched
//! one tick at a time:
//! - Static task table (no heap, no allocation)
//! - Highest priority wins, strict preemption, FIFO among equals
//! - Drift-free periodic release and per-boundary deadline-miss reporting
//! - Empirical WCET profiling with feasibility and Liu & Layland checks
//! - Pluggable time source: a logical clock for tests, the wall clock with `std`
//!
//! ```
//! use tick_rtos::{Event, EventRing, LogicalClock, Scheduler, TaskDescriptor, TaskPriority};
//!
//! let clock = LogicalClock::new();
//! let (mut sensor, mut logger) = (|| {}, || {});
//! let mut sched = Scheduler::new(&clock, EventRing::<Event, 16>::new());
//! let hi = sched.register(TaskDescriptor::periodic("sensor", TaskPriority::HIGH, 10, &mut sensor)).unwrap();
//! sched.register(TaskDescriptor::periodic("logger", TaskPriority::LOW, 50, &mut logger)).unwrap();
//!
//! assert_eq!(sched.advance_one_tick().unwrap(), Some(hi));
//! assert!(sched.is_schedulable());
//! ```

#![cfg_attr(not(any(test, feature = "std")), no_std)]

pub mod clock;
pub mod config;
pub mod error;
pub mod kernel;
pub mod profiler;
pub mod report;
pub mod scheduler;
pub mod task;

pub use clock::{Clock, LogicalClock, Tick, Ticks, Timestamp};
#[cfg(feature = "std")]
pub use clock::StdClock;
pub use config::TaskConfig;
pub use error::{ConfigError, Error, InvalidArgument};
pub use kernel::{Admission, Kernel, KernelStats};
pub use profiler::Profiler;
pub use report::{Event, EventRing, LogReporter, ProfileReport, Reporter};
pub use scheduler::{Scheduler, TieBreak};
pub use task::{Period, Runnable, TaskDescriptor, TaskId, TaskPriority, TaskState};
