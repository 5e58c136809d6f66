//! Kernel — configuration table to running scheduler
//!
//! Builds a [`Scheduler`] from a static [`TaskConfig`] table and the bodies
//! that go with it, profiles every body for admission, then drives the
//! dispatch loop for a bounded number of ticks or forever.

use core::convert::Infallible;

use heapless::Vec;
use log::info;

use crate::clock::{Clock, Ticks};
use crate::config::TaskConfig;
use crate::error::{ConfigError, Error};
use crate::report::{ProfileReport, Reporter};
use crate::scheduler::{liu_layland_bound, Scheduler};
use crate::task::{Runnable, TaskDescriptor, TaskId, MAX_TASKS};

/// Scheduler plus run bookkeeping
pub struct Kernel<'a, C: Clock, R: Reporter> {
    /// Task scheduler
    pub scheduler: Scheduler<'a, C, R>,
    /// Total ticks stepped through this kernel
    pub total_ticks: u64,
    /// Ticks on which some task ran
    busy_ticks: u64,
}

impl<'a, C: Clock, R: Reporter> Kernel<'a, C, R> {
    /// Kernel with an empty task table
    pub fn new(clock: C, reporter: R) -> Self {
        Self {
            scheduler: Scheduler::new(clock, reporter),
            total_ticks: 0,
            busy_ticks: 0,
        }
    }

    /// Register one task per configuration record, pairing records and
    /// bodies in order
    pub fn from_configs<I>(
        clock: C,
        reporter: R,
        configs: &[TaskConfig],
        bodies: I,
    ) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = &'a mut dyn Runnable>,
    {
        let tick = clock.tick_period();
        let mut kernel = Self::new(clock, reporter);
        let mut bodies = bodies.into_iter();
        let mut supplied = 0;

        for config in configs {
            let Some(work) = bodies.next() else {
                return Err(ConfigError::BodyCountMismatch { tasks: configs.len(), bodies: supplied });
            };
            supplied += 1;
            kernel.scheduler.register(config.descriptor(tick, work)?)?;
        }

        let extra = bodies.count();
        if extra > 0 {
            return Err(ConfigError::BodyCountMismatch {
                tasks: configs.len(),
                bodies: supplied + extra,
            });
        }
        Ok(kernel)
    }

    /// Register a task
    pub fn add_task(&mut self, desc: TaskDescriptor<'a>) -> Result<TaskId, ConfigError> {
        self.scheduler.register(desc)
    }

    /// Profile every body, one report per task
    pub fn profile_tasks(&mut self, iterations: u32) -> Result<Vec<ProfileReport, MAX_TASKS>, Error> {
        self.scheduler.profile_tasks(iterations)
    }

    /// Profile every body and judge the task set on its measured WCETs
    ///
    /// Declared costs are left alone; an infeasible or unschedulable set is
    /// reported, not refused.
    pub fn admit(&mut self, iterations: u32) -> Result<Admission, Error> {
        let reports = self.profile_tasks(iterations)?;

        let mut utilization = 0.0;
        let mut periodic = 0;
        for report in reports.iter() {
            let period = report
                .task
                .and_then(|id| self.scheduler.task(id))
                .and_then(|view| view.period.ticks());
            if let Some(period) = period {
                utilization += report.tick_equivalent as f32 / period as f32;
                periodic += 1;
            }
        }

        let admission = Admission {
            all_feasible: reports.iter().all(|r| r.feasible),
            utilization,
            schedulable: periodic == 0 || utilization <= liu_layland_bound(periodic),
            reports,
        };
        info!(
            "admission: {} tasks, utilization {:.3}, feasible={}, schedulable={}",
            admission.reports.len(),
            admission.utilization,
            admission.all_feasible,
            admission.schedulable
        );
        Ok(admission)
    }

    /// Run one scheduler tick
    ///
    /// Returns the task that ran, if any.
    pub fn tick(&mut self) -> Result<Option<TaskId>, ConfigError> {
        let ran = self.scheduler.advance_one_tick()?;
        self.total_ticks += 1;
        if ran.is_some() {
            self.busy_ticks += 1;
        }
        Ok(ran)
    }

    /// Run the dispatch loop for `ticks` ticks
    pub fn run_for(&mut self, ticks: Ticks) -> Result<KernelStats, ConfigError> {
        for _ in 0..ticks {
            self.tick()?;
        }
        let stats = self.stats();
        info!(
            "ran {} ticks: busy={} idle={} switches={} releases={} misses={}",
            stats.ticks,
            stats.tasks_executed,
            stats.idle_ticks,
            stats.context_switches,
            stats.releases,
            stats.deadline_misses
        );
        Ok(stats)
    }

    /// Hand the thread of control to the scheduler
    pub fn run_forever(&mut self) -> Result<Infallible, ConfigError> {
        info!("kernel entering dispatch loop with {} tasks", self.scheduler.len());
        self.scheduler.run_forever()
    }

    /// Check RMS schedulability
    pub fn is_schedulable(&self) -> bool {
        self.scheduler.is_schedulable()
    }

    /// Counters accumulated since creation
    pub fn stats(&self) -> KernelStats {
        let (releases, deadline_misses) = self
            .scheduler
            .tasks()
            .fold((0u64, 0u64), |(r, m), t| {
                (r + t.stats.releases as u64, m + t.stats.deadline_misses as u64)
            });
        KernelStats {
            ticks: self.total_ticks,
            tasks_executed: self.busy_ticks,
            idle_ticks: self.scheduler.idle_ticks(),
            context_switches: self.scheduler.context_switches() as u64,
            releases,
            deadline_misses,
            utilization: self.scheduler.total_utilization(),
            schedulable: self.scheduler.is_schedulable(),
        }
    }
}

/// Outcome of admission profiling
#[derive(Debug, Clone)]
pub struct Admission {
    /// One report per task, registration order
    pub reports: Vec<ProfileReport, MAX_TASKS>,
    /// Every task's WCET fits its period
    pub all_feasible: bool,
    /// Sum of WCET / period over periodic tasks
    pub utilization: f32,
    /// Measured utilization within the Liu & Layland bound
    pub schedulable: bool,
}

/// Kernel execution statistics
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KernelStats {
    /// Total scheduler ticks
    pub ticks: u64,
    /// Ticks on which a task ran
    pub tasks_executed: u64,
    pub idle_ticks: u64,
    /// Context switches
    pub context_switches: u64,
    /// Jobs released, all tasks
    pub releases: u64,
    /// Period boundaries missed, all tasks
    pub deadline_misses: u64,
    /// CPU utilization
    pub utilization: f32,
    /// RMS schedulable
    pub schedulable: bool,
}
