//! Error types
//!
//! Only setup mistakes and API misuse are errors. Deadline misses, clock
//! anomalies and infeasible tasks are runtime events and travel through
//! [`Reporter`](crate::report::Reporter) instead.

use core::fmt;

use crate::task::{TaskId, TaskPriority};

/// Invalid static setup; fatal before the dispatch loop starts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigError {
    /// `register` after the scheduler started
    AlreadyStarted,
    /// Priority already taken and the tie-break policy rejects collisions
    PriorityCollision { priority: TaskPriority, existing: TaskId },
    /// `Period::Periodic(0)`
    ZeroPeriod,
    /// Configured period below zero
    NegativePeriod { period_ms: i64 },
    /// Positive period shorter than one tick
    PeriodBelowTick { period_ms: i64 },
    /// Period or re-arm wait beyond half the tick counter's range
    PeriodTooLong { ticks: u64 },
    /// Stack budget of zero bytes
    ZeroStackBudget,
    /// More tasks than the static table holds
    TableFull { capacity: usize },
    /// Nothing registered
    NoTasks,
    /// Configuration table and body list differ in length
    BodyCountMismatch { tasks: usize, bodies: usize },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::AlreadyStarted => write!(f, "cannot register after the scheduler started"),
            ConfigError::PriorityCollision { priority, existing } => {
                write!(f, "priority {} already used by {}", priority.0, existing)
            }
            ConfigError::ZeroPeriod => write!(f, "periodic task with a zero period"),
            ConfigError::NegativePeriod { period_ms } => write!(f, "negative period: {period_ms} ms"),
            ConfigError::PeriodBelowTick { period_ms } => {
                write!(f, "period of {period_ms} ms is shorter than one tick")
            }
            ConfigError::PeriodTooLong { ticks } => {
                write!(f, "period of {ticks} ticks exceeds {}", crate::task::MAX_PERIOD)
            }
            ConfigError::ZeroStackBudget => write!(f, "stack budget must be non-zero"),
            ConfigError::TableFull { capacity } => write!(f, "task table full ({capacity} tasks)"),
            ConfigError::NoTasks => write!(f, "no tasks registered"),
            ConfigError::BodyCountMismatch { tasks, bodies } => {
                write!(f, "{tasks} configured tasks but {bodies} bodies")
            }
        }
    }
}

impl core::error::Error for ConfigError {}

/// API misuse, rejected at the call site
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvalidArgument {
    /// Profiling with zero iterations
    ZeroIterations,
    /// Handle not issued by this scheduler
    UnknownTask(TaskId),
    /// Yield requested by a task that is not running
    NotRunning(TaskId),
    /// Aperiodic-only operation on a periodic task
    NotAperiodic(TaskId),
    /// Wait longer than the tick counter can compare
    WaitTooLong { task: TaskId, wait: u32 },
}

impl fmt::Display for InvalidArgument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InvalidArgument::ZeroIterations => write!(f, "iterations must be at least 1"),
            InvalidArgument::UnknownTask(id) => write!(f, "unknown {id}"),
            InvalidArgument::NotRunning(id) => write!(f, "{id} is not running"),
            InvalidArgument::NotAperiodic(id) => write!(f, "{id} is periodic"),
            InvalidArgument::WaitTooLong { task, wait } => {
                write!(f, "{task}: wait of {wait} ticks exceeds {}", crate::task::MAX_PERIOD)
            }
        }
    }
}

impl core::error::Error for InvalidArgument {}

/// Crate error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    Configuration(ConfigError),
    InvalidArgument(InvalidArgument),
    /// Every profiling sample was discarded as a clock anomaly
    NoValidSamples,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Configuration(e) => write!(f, "configuration error: {e}"),
            Error::InvalidArgument(e) => write!(f, "invalid argument: {e}"),
            Error::NoValidSamples => write!(f, "no valid samples: clock was not monotonic"),
        }
    }
}

impl core::error::Error for Error {
    fn source(&self) -> Option<&(dyn core::error::Error + 'static)> {
        match self {
            Error::Configuration(e) => Some(e),
            _ => None,
        }
    }
}

impl From<ConfigError> for Error {
    fn from(e: ConfigError) -> Self {
        Error::Configuration(e)
    }
}

impl From<InvalidArgument> for Error {
    fn from(e: InvalidArgument) -> Self {
        Error::InvalidArgument(e)
    }
}
