//! Task definition — static, no-alloc task descriptors
//!
//! Each task is a unit of work with a fixed priority and either a fixed
//! period or an on-demand (aperiodic) release.
//!
//! Priority direction: a numerically higher [`TaskPriority`] is more urgent,
//! and [`TaskPriority::IDLE`] (0) is the least urgent.

use crate::clock::{Tick, Ticks};

/// Maximum tasks the scheduler can manage
pub const MAX_TASKS: usize = 16;

/// Longest period or wait, in ticks
///
/// Ticks compare by signed wrapping distance, so anything past half the
/// counter's range would read as already elapsed.
pub const MAX_PERIOD: Ticks = i32::MAX as Ticks;

/// Task name capacity (bytes); longer names are truncated
pub const NAME_LEN: usize = 16;

/// Fixed-capacity task name
pub type TaskName = heapless::String<NAME_LEN>;

/// Work invoked once per release
///
/// Bodies take no arguments and return nothing the scheduler consumes. Any
/// `FnMut()` closure is a `Runnable`.
pub trait Runnable {
    /// Execute one job
    fn run(&mut self);

    /// Ticks of processor time the job just run occupies
    ///
    /// `None` falls back to the descriptor's fixed cost. Fake bodies in
    /// tests override this to script overruns.
    fn cost(&self) -> Option<Ticks> {
        None
    }
}

impl<F: FnMut()> Runnable for F {
    fn run(&mut self) {
        self()
    }
}

/// Task priority (higher number = more urgent)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[derive(serde::Deserialize)]
#[serde(transparent)]
pub struct TaskPriority(pub u8);

impl TaskPriority {
    /// Background work, runs only when nothing else is ready
    pub const IDLE: TaskPriority = TaskPriority(0);
    /// Logging, telemetry
    pub const LOW: TaskPriority = TaskPriority(1);
    /// Sensor processing
    pub const NORMAL: TaskPriority = TaskPriority(2);
    /// Control loops
    pub const HIGH: TaskPriority = TaskPriority(3);
    /// Most urgent
    pub const CRITICAL: TaskPriority = TaskPriority(u8::MAX);
}

/// Release discipline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Period {
    /// Released every `n` ticks, anchored to the start tick
    Periodic(Ticks),
    /// Released once at start, then on [`release`] or after `rearm` ticks
    ///
    /// [`release`]: crate::Scheduler::release
    Aperiodic { rearm: Option<Ticks> },
}

impl Period {
    /// Zero ticks means aperiodic
    pub const fn from_ticks(ticks: Ticks) -> Period {
        if ticks == 0 {
            Period::Aperiodic { rearm: None }
        } else {
            Period::Periodic(ticks)
        }
    }

    /// Period length, if periodic
    pub const fn ticks(&self) -> Option<Ticks> {
        match *self {
            Period::Periodic(ticks) => Some(ticks),
            Period::Aperiodic { .. } => None,
        }
    }

    pub const fn is_periodic(&self) -> bool {
        matches!(self, Period::Periodic(_))
    }
}

/// Task execution state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    /// Registered, scheduler not started yet
    Suspended,
    /// Released, waiting for the processor
    Ready,
    /// Currently executing
    Running,
    /// Waiting for the next release
    Blocked,
}

/// Index of a registered task, handed out by the scheduler
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TaskId(pub(crate) u8);

impl TaskId {
    /// Registration index
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl core::fmt::Display for TaskId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "task#{}", self.0)
    }
}

/// Static task descriptor
pub struct TaskDescriptor<'a> {
    /// Task name
    pub name: TaskName,
    /// Priority (higher = more urgent)
    pub priority: TaskPriority,
    /// Release discipline
    pub period: Period,
    /// Stack the substrate reserves for this task (bytes)
    pub stack_budget: usize,
    /// Ticks one job occupies unless the body says otherwise
    pub cost: Ticks,
    /// Task body
    pub work: &'a mut dyn Runnable,
}

/// Default stack budget, the usual `configMINIMAL_STACK_SIZE` in bytes
pub const DEFAULT_STACK_BUDGET: usize = 512;

impl<'a> TaskDescriptor<'a> {
    /// Periodic task with a one-tick cost
    pub fn periodic(
        name: &str,
        priority: TaskPriority,
        period: Ticks,
        work: &'a mut dyn Runnable,
    ) -> Self {
        Self::new(name, priority, Period::from_ticks(period), work)
    }

    /// Aperiodic task released once at start and then on demand
    pub fn aperiodic(name: &str, priority: TaskPriority, work: &'a mut dyn Runnable) -> Self {
        Self::new(name, priority, Period::Aperiodic { rearm: None }, work)
    }

    pub fn new(name: &str, priority: TaskPriority, period: Period, work: &'a mut dyn Runnable) -> Self {
        Self {
            name: truncated_name(name),
            priority,
            period,
            stack_budget: DEFAULT_STACK_BUDGET,
            cost: 1,
            work,
        }
    }

    /// Override the per-job cost
    pub fn with_cost(mut self, cost: Ticks) -> Self {
        self.cost = cost;
        self
    }

    /// Override the stack budget
    pub fn with_stack_budget(mut self, bytes: usize) -> Self {
        self.stack_budget = bytes;
        self
    }
}

/// Copy as many whole characters of `name` as fit
pub(crate) fn truncated_name(name: &str) -> TaskName {
    let mut out = TaskName::new();
    for c in name.chars() {
        if out.push(c).is_err() {
            break;
        }
    }
    out
}

/// Per-task counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TaskStats {
    /// Jobs released
    pub releases: u32,
    /// Jobs completed
    pub completions: u32,
    /// Period boundaries missed
    pub deadline_misses: u32,
    /// Times displaced by a more urgent task
    pub preemptions: u32,
}

/// Read-only view of a task, as seen from outside the scheduler
#[derive(Debug, Clone, Copy)]
pub struct TaskView<'t> {
    pub id: TaskId,
    pub name: &'t str,
    pub priority: TaskPriority,
    pub period: Period,
    pub stack_budget: usize,
    pub state: TaskState,
    /// Release tick of the current (or last) job
    pub release_tick: Tick,
    /// Next period boundary (periodic tasks)
    pub next_release: Tick,
    pub stats: TaskStats,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_descriptor_creation() {
        let mut body = || {};
        let desc = TaskDescriptor::periodic("convert", TaskPriority::HIGH, 330, &mut body);
        assert_eq!(desc.name.as_str(), "convert");
        assert_eq!(desc.priority, TaskPriority::HIGH);
        assert_eq!(desc.period, Period::Periodic(330));
        assert_eq!(desc.cost, 1);
        assert_eq!(desc.stack_budget, DEFAULT_STACK_BUDGET);
    }

    #[test]
    fn test_zero_period_is_aperiodic() {
        assert_eq!(Period::from_ticks(0), Period::Aperiodic { rearm: None });
        assert!(!Period::from_ticks(0).is_periodic());
        assert_eq!(Period::from_ticks(7).ticks(), Some(7));
    }

    #[test]
    fn test_name_truncated() {
        let mut body = || {};
        let desc = TaskDescriptor::aperiodic("a-very-long-task-name", TaskPriority::LOW, &mut body);
        assert_eq!(desc.name.as_str(), "a-very-long-task");
    }

    #[test]
    fn test_priority_ordering() {
        assert!(TaskPriority::IDLE < TaskPriority::LOW);
        assert!(TaskPriority::LOW < TaskPriority::NORMAL);
        assert!(TaskPriority::NORMAL < TaskPriority::HIGH);
        assert!(TaskPriority::HIGH < TaskPriority::CRITICAL);
    }

    #[test]
    fn test_closure_is_runnable() {
        let mut count = 0;
        {
            let mut body = || count += 1;
            let work: &mut dyn Runnable = &mut body;
            work.run();
            work.run();
            assert_eq!(work.cost(), None);
        }
        assert_eq!(count, 2);
    }
}
