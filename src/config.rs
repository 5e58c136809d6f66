//! Static task configuration
//!
//! Tasks are described once, at build time or from a TOML file, as
//! [`TaskConfig`] records: priority, period in milliseconds (or
//! `"aperiodic"`), stack budget. They are turned into descriptors against
//! the clock's tick length, truncating milliseconds to whole ticks the same
//! way `pdMS_TO_TICKS` does.

use core::fmt;
use core::time::Duration;

use serde::de::{self, Deserializer, Visitor};
use serde::Deserialize;

use crate::clock::Ticks;
use crate::error::ConfigError;
use crate::task::{
    truncated_name, Period, Runnable, TaskDescriptor, TaskName, TaskPriority, DEFAULT_STACK_BUDGET,
    MAX_PERIOD,
};

/// Configured period: whole milliseconds, or no period at all
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeriodSpec {
    /// Milliseconds between releases; zero means aperiodic
    Millis(i64),
    Aperiodic,
}

impl<'de> Deserialize<'de> for PeriodSpec {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct PeriodVisitor;

        impl Visitor<'_> for PeriodVisitor {
            type Value = PeriodSpec;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a period in milliseconds or \"aperiodic\"")
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> Result<PeriodSpec, E> {
                Ok(PeriodSpec::Millis(v))
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<PeriodSpec, E> {
                i64::try_from(v)
                    .map(PeriodSpec::Millis)
                    .map_err(|_| E::invalid_value(de::Unexpected::Unsigned(v), &self))
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<PeriodSpec, E> {
                if v.eq_ignore_ascii_case("aperiodic") {
                    Ok(PeriodSpec::Aperiodic)
                } else {
                    Err(E::invalid_value(de::Unexpected::Str(v), &self))
                }
            }
        }

        deserializer.deserialize_any(PeriodVisitor)
    }
}

fn default_stack_budget() -> usize {
    DEFAULT_STACK_BUDGET
}

/// One task, as configured
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TaskConfig {
    pub name: TaskName,
    /// Higher = more urgent
    pub priority: TaskPriority,
    pub period_ms: PeriodSpec,
    /// Aperiodic only: wait after each job before the next release
    #[serde(default)]
    pub wait_ms: Option<u32>,
    #[serde(default = "default_stack_budget")]
    pub stack_budget: usize,
    /// Ticks one job occupies; one if absent
    #[serde(default)]
    pub cost_ticks: Option<Ticks>,
}

impl TaskConfig {
    pub fn periodic(name: &str, priority: u8, period_ms: i64) -> Self {
        Self {
            name: truncated_name(name),
            priority: TaskPriority(priority),
            period_ms: PeriodSpec::Millis(period_ms),
            wait_ms: None,
            stack_budget: DEFAULT_STACK_BUDGET,
            cost_ticks: None,
        }
    }

    pub fn aperiodic(name: &str, priority: u8, wait_ms: Option<u32>) -> Self {
        Self {
            name: truncated_name(name),
            priority: TaskPriority(priority),
            period_ms: PeriodSpec::Aperiodic,
            wait_ms,
            stack_budget: DEFAULT_STACK_BUDGET,
            cost_ticks: None,
        }
    }

    /// Release discipline at the given tick length
    pub fn period(&self, tick: Duration) -> Result<Period, ConfigError> {
        match self.period_ms {
            PeriodSpec::Aperiodic | PeriodSpec::Millis(0) => {
                let rearm = self
                    .wait_ms
                    .map(|ms| bounded_ticks(ms_to_ticks(ms as u64, tick)))
                    .transpose()?;
                Ok(Period::Aperiodic { rearm })
            }
            PeriodSpec::Millis(ms) if ms < 0 => Err(ConfigError::NegativePeriod { period_ms: ms }),
            PeriodSpec::Millis(ms) => match bounded_ticks(ms_to_ticks(ms as u64, tick))? {
                0 => Err(ConfigError::PeriodBelowTick { period_ms: ms }),
                ticks => Ok(Period::Periodic(ticks)),
            },
        }
    }

    /// Descriptor for this task with `work` as its body
    pub fn descriptor<'a>(
        &self,
        tick: Duration,
        work: &'a mut dyn Runnable,
    ) -> Result<TaskDescriptor<'a>, ConfigError> {
        if self.stack_budget == 0 {
            return Err(ConfigError::ZeroStackBudget);
        }
        let mut desc = TaskDescriptor::new(self.name.as_str(), self.priority, self.period(tick)?, work)
            .with_stack_budget(self.stack_budget);
        if let Some(cost) = self.cost_ticks {
            desc = desc.with_cost(cost);
        }
        Ok(desc)
    }
}

/// Milliseconds to whole ticks, truncating
pub fn ms_to_ticks(ms: u64, tick: Duration) -> u64 {
    let ticks = ms as u128 * 1_000_000 / tick.as_nanos().max(1);
    ticks.min(u64::MAX as u128) as u64
}

fn bounded_ticks(ticks: u64) -> Result<Ticks, ConfigError> {
    if ticks > MAX_PERIOD as u64 {
        return Err(ConfigError::PeriodTooLong { ticks });
    }
    Ok(ticks as Ticks)
}

/// The reference five-task set
///
/// Four periodic jobs (print, temperature conversion, multiplication,
/// binary search) and one aperiodic job that waits 100 ms after each run.
pub fn demo_tasks() -> [TaskConfig; 5] {
    [
        TaskConfig::periodic("print_working", 0, 400),
        TaskConfig::periodic("convert_temp", 3, 330),
        TaskConfig::periodic("multiply", 2, 330),
        TaskConfig::periodic("binary_search", 1, 350),
        TaskConfig::aperiodic("aperiodic", 4, Some(100)),
    ]
}

/// Whole-system configuration file
#[cfg(feature = "std")]
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SystemConfig {
    /// Tick length in microseconds
    #[serde(default = "default_tick_us")]
    pub tick_us: u64,
    #[serde(default, rename = "task")]
    pub tasks: std::vec::Vec<TaskConfig>,
}

#[cfg(feature = "std")]
fn default_tick_us() -> u64 {
    crate::clock::DEFAULT_TICK.as_micros() as u64
}

#[cfg(feature = "std")]
impl SystemConfig {
    /// Parse and validate a TOML document
    pub fn from_toml(text: &str) -> Result<Self, LoadError> {
        let config: SystemConfig = toml::from_str(text).map_err(LoadError::Parse)?;
        config.validate()?;
        Ok(config)
    }

    pub fn tick(&self) -> Duration {
        Duration::from_micros(self.tick_us)
    }

    /// Check every task converts at this tick length
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tasks.is_empty() {
            return Err(ConfigError::NoTasks);
        }
        if self.tasks.len() > crate::task::MAX_TASKS {
            return Err(ConfigError::TableFull { capacity: crate::task::MAX_TASKS });
        }
        for task in &self.tasks {
            task.period(self.tick())?;
            if task.stack_budget == 0 {
                return Err(ConfigError::ZeroStackBudget);
            }
        }
        Ok(())
    }
}

/// Failure to load a configuration file
#[cfg(feature = "std")]
#[derive(Debug)]
pub enum LoadError {
    Parse(toml::de::Error),
    Config(ConfigError),
}

#[cfg(feature = "std")]
impl From<ConfigError> for LoadError {
    fn from(e: ConfigError) -> Self {
        LoadError::Config(e)
    }
}

#[cfg(feature = "std")]
impl fmt::Display for LoadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoadError::Parse(e) => write!(f, "cannot parse configuration: {e}"),
            LoadError::Config(e) => write!(f, "invalid configuration: {e}"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for LoadError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            LoadError::Parse(e) => Some(e),
            LoadError::Config(e) => Some(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MS: Duration = Duration::from_millis(1);

    #[test]
    fn test_demo_periods() {
        let tasks = demo_tasks();
        let periods: heapless::Vec<Period, 5> = tasks.iter().map(|t| t.period(MS).unwrap()).collect();
        assert_eq!(
            periods.as_slice(),
            &[
                Period::Periodic(400),
                Period::Periodic(330),
                Period::Periodic(330),
                Period::Periodic(350),
                Period::Aperiodic { rearm: Some(100) },
            ]
        );
        assert_eq!(tasks[1].priority, TaskPriority(3));
    }

    #[test]
    fn test_ms_to_ticks_truncates() {
        assert_eq!(ms_to_ticks(330, MS), 330);
        assert_eq!(ms_to_ticks(330, Duration::from_millis(10)), 33);
        assert_eq!(ms_to_ticks(335, Duration::from_millis(10)), 33);
        assert_eq!(ms_to_ticks(5, Duration::from_millis(10)), 0);
    }

    #[test]
    fn test_period_validation() {
        assert_eq!(
            TaskConfig::periodic("neg", 1, -5).period(MS),
            Err(ConfigError::NegativePeriod { period_ms: -5 })
        );
        assert_eq!(
            TaskConfig::periodic("fast", 1, 5).period(Duration::from_millis(10)),
            Err(ConfigError::PeriodBelowTick { period_ms: 5 })
        );
        assert_eq!(
            TaskConfig::periodic("zero", 1, 0).period(MS),
            Ok(Period::Aperiodic { rearm: None })
        );
    }

    #[test]
    fn test_oversized_period_rejected_not_saturated() {
        assert_eq!(
            TaskConfig::periodic("x", 1, 5_000_000_000_000).period(MS),
            Err(ConfigError::PeriodTooLong { ticks: 5_000_000_000_000 })
        );
        assert_eq!(
            TaskConfig::periodic("edge", 1, MAX_PERIOD as i64 + 1).period(MS),
            Err(ConfigError::PeriodTooLong { ticks: MAX_PERIOD as u64 + 1 })
        );
        assert_eq!(
            TaskConfig::periodic("edge", 1, MAX_PERIOD as i64).period(MS),
            Ok(Period::Periodic(MAX_PERIOD))
        );
        // 4e9 ms at 1 ms per tick overflows the comparable range.
        assert_eq!(
            TaskConfig::aperiodic("ap", 4, Some(4_000_000_000)).period(MS),
            Err(ConfigError::PeriodTooLong { ticks: 4_000_000_000 })
        );
        // A wait on a periodic task is ignored, so it cannot fail.
        let mut periodic = TaskConfig::periodic("p", 1, 10);
        periodic.wait_ms = Some(u32::MAX);
        assert_eq!(periodic.period(MS), Ok(Period::Periodic(10)));
    }

    #[test]
    fn test_descriptor_from_config() {
        let mut body = || {};
        let mut config = TaskConfig::periodic("search", 1, 350);
        config.cost_ticks = Some(4);
        config.stack_budget = 1024;
        let desc = config.descriptor(MS, &mut body).unwrap();
        assert_eq!(desc.name.as_str(), "search");
        assert_eq!(desc.period, Period::Periodic(350));
        assert_eq!(desc.cost, 4);
        assert_eq!(desc.stack_budget, 1024);

        config.stack_budget = 0;
        assert_eq!(config.descriptor(MS, &mut body).err(), Some(ConfigError::ZeroStackBudget));
    }

    #[cfg(feature = "std")]
    #[test]
    fn test_load_toml() {
        let text = r#"
            tick_us = 1000

            [[task]]
            name = "convert_temp"
            priority = 3
            period_ms = 330

            [[task]]
            name = "aperiodic"
            priority = 4
            period_ms = "aperiodic"
            wait_ms = 100
            stack_budget = 256
        "#;
        let config = SystemConfig::from_toml(text).unwrap();
        assert_eq!(config.tick(), MS);
        assert_eq!(config.tasks.len(), 2);
        assert_eq!(config.tasks[0], TaskConfig::periodic("convert_temp", 3, 330));
        assert_eq!(config.tasks[1].period_ms, PeriodSpec::Aperiodic);
        assert_eq!(config.tasks[1].stack_budget, 256);
        assert_eq!(config.tasks[1].period(config.tick()), Ok(Period::Aperiodic { rearm: Some(100) }));
    }

    #[cfg(feature = "std")]
    #[test]
    fn test_load_rejects_negative_period() {
        let text = r#"
            [[task]]
            name = "bad"
            priority = 1
            period_ms = -10
        "#;
        assert!(matches!(
            SystemConfig::from_toml(text),
            Err(LoadError::Config(ConfigError::NegativePeriod { period_ms: -10 }))
        ));
    }

    #[cfg(feature = "std")]
    #[test]
    fn test_load_rejects_bad_period_keyword() {
        let text = r#"
            [[task]]
            name = "bad"
            priority = 1
            period_ms = "sometimes"
        "#;
        assert!(matches!(SystemConfig::from_toml(text), Err(LoadError::Parse(_))));
    }

    #[cfg(feature = "std")]
    #[test]
    fn test_load_rejects_empty() {
        assert!(matches!(
            SystemConfig::from_toml("tick_us = 1000"),
            Err(LoadError::Config(ConfigError::NoTasks))
        ));
    }
}
