//! Fixed-priority preemptive scheduler
//!
//! Static task table, no dynamic allocation. Each call to
//! [`Scheduler::advance_one_tick`] is one tick of the dispatch loop:
//!
//! 1. read the tick counter from the [`Clock`]
//! 2. release Blocked tasks whose release is due, and detect overruns
//! 3. pick the Ready task with the highest priority (earliest registration
//!    on ties); it preempts the Running task only if strictly more urgent
//! 4. run one tick of that task's job, calling its body when the job starts
//! 5. block on the clock until the next tick
//!
//! There is no priority aging. A low-priority task can be delayed
//! indefinitely if more urgent tasks always have work pending; this is the
//! accepted price of static fixed-priority scheduling.

use core::convert::Infallible;
use core::iter::Enumerate;
use core::slice;

use heapless::Vec;
use log::{debug, trace};

use crate::clock::{Clock, Tick, Ticks};
use crate::error::{ConfigError, Error, InvalidArgument};
use crate::profiler::Profiler;
use crate::report::{AnomalyContext, Event, ProfileReport, Reporter};
use crate::task::{
    Period, Runnable, TaskDescriptor, TaskId, TaskName, TaskPriority, TaskState, TaskStats, TaskView,
    MAX_PERIOD, MAX_TASKS,
};

/// What to do when two tasks share a priority
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TieBreak {
    /// Earlier registration wins
    #[default]
    Fifo,
    /// Refuse the second registration
    Reject,
}

/// Scheduler-owned state of one task
struct ControlBlock<'a> {
    name: TaskName,
    priority: TaskPriority,
    period: Period,
    stack_budget: usize,
    cost: Ticks,
    work: &'a mut dyn Runnable,
    state: TaskState,
    /// Release tick of the current job
    release_tick: Tick,
    /// Next period boundary (periodic)
    next_release: Tick,
    /// Ticks left in the current job
    remaining: Ticks,
    /// Body already called for the current job
    started: bool,
    /// Boundary of the release owed after an overrun
    coalesced: Option<Tick>,
    /// Timed wake (aperiodic)
    wake: Option<Tick>,
    /// External release pending (aperiodic)
    signalled: bool,
    stats: TaskStats,
}

impl ControlBlock<'_> {
    fn view(&self, idx: usize) -> TaskView<'_> {
        TaskView {
            id: TaskId(idx as u8),
            name: self.name.as_str(),
            priority: self.priority,
            period: self.period,
            stack_budget: self.stack_budget,
            state: self.state,
            release_tick: self.release_tick,
            next_release: self.next_release,
            stats: self.stats,
        }
    }

    fn has_pending_job(&self) -> bool {
        matches!(self.state, TaskState::Ready | TaskState::Running)
    }

    fn make_ready(&mut self, release_tick: Tick) {
        self.state = TaskState::Ready;
        self.release_tick = release_tick;
        self.remaining = 0;
        self.started = false;
        self.stats.releases += 1;
    }
}

/// Views of every registered task, registration order
pub struct Tasks<'s, 'a> {
    inner: Enumerate<slice::Iter<'s, ControlBlock<'a>>>,
}

impl<'s> Iterator for Tasks<'s, '_> {
    type Item = TaskView<'s>;

    fn next(&mut self) -> Option<TaskView<'s>> {
        self.inner.next().map(|(i, t)| t.view(i))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

/// Fixed-priority preemptive scheduler
///
/// Generic over its time source and its event sink, so a test can drive it
/// with a [`LogicalClock`](crate::LogicalClock) and inspect an
/// [`EventRing`](crate::EventRing).
pub struct Scheduler<'a, C: Clock, R: Reporter> {
    clock: C,
    reporter: R,
    /// Static task table, registration order
    tasks: Vec<ControlBlock<'a>, MAX_TASKS>,
    tie_break: TieBreak,
    started: bool,
    /// Index of the Running task
    current: Option<usize>,
    /// Task that executed the previous tick
    last_ran: Option<usize>,
    /// Tick of the latest step
    last_tick: Tick,
    context_switches: u32,
    idle_ticks: u64,
}

impl<'a, C: Clock, R: Reporter> Scheduler<'a, C, R> {
    /// Empty scheduler with FIFO tie-breaking
    pub fn new(clock: C, reporter: R) -> Self {
        Self {
            clock,
            reporter,
            tasks: Vec::new(),
            tie_break: TieBreak::Fifo,
            started: false,
            current: None,
            last_ran: None,
            last_tick: Tick::ZERO,
            context_switches: 0,
            idle_ticks: 0,
        }
    }

    /// Choose the equal-priority policy
    pub fn with_tie_break(mut self, tie_break: TieBreak) -> Self {
        self.tie_break = tie_break;
        self
    }

    /// Register a task, returns its handle
    pub fn register(&mut self, desc: TaskDescriptor<'a>) -> Result<TaskId, ConfigError> {
        if self.started {
            return Err(ConfigError::AlreadyStarted);
        }
        match desc.period {
            Period::Periodic(0) => return Err(ConfigError::ZeroPeriod),
            Period::Periodic(ticks) | Period::Aperiodic { rearm: Some(ticks) } if ticks > MAX_PERIOD => {
                return Err(ConfigError::PeriodTooLong { ticks: ticks as u64 });
            }
            _ => {}
        }
        if desc.stack_budget == 0 {
            return Err(ConfigError::ZeroStackBudget);
        }
        if self.tie_break == TieBreak::Reject {
            if let Some(existing) = self.tasks.iter().position(|t| t.priority == desc.priority) {
                return Err(ConfigError::PriorityCollision {
                    priority: desc.priority,
                    existing: TaskId(existing as u8),
                });
            }
        }

        let idx = self.tasks.len();
        let block = ControlBlock {
            name: desc.name,
            priority: desc.priority,
            period: desc.period,
            stack_budget: desc.stack_budget,
            cost: desc.cost.max(1),
            work: desc.work,
            state: TaskState::Suspended,
            release_tick: Tick::ZERO,
            next_release: Tick::ZERO,
            remaining: 0,
            started: false,
            coalesced: None,
            wake: None,
            signalled: false,
            stats: TaskStats::default(),
        };
        self.tasks
            .push(block)
            .map_err(|_| ConfigError::TableFull { capacity: MAX_TASKS })?;

        let task = &self.tasks[idx];
        debug!(
            "registered task#{idx} {:?} priority={} period={:?}",
            task.name.as_str(),
            task.priority.0,
            task.period
        );
        Ok(TaskId(idx as u8))
    }

    /// Override a task's per-job cost, e.g. with its profiled WCET
    pub fn set_cost(&mut self, id: TaskId, cost: Ticks) -> Result<(), Error> {
        if self.started {
            return Err(ConfigError::AlreadyStarted.into());
        }
        let idx = self.index(id)?;
        self.tasks[idx].cost = cost.max(1);
        Ok(())
    }

    /// Profile every registered body back to back, registration order
    ///
    /// Only before start: a live scheduler owns its bodies.
    pub fn profile_tasks(&mut self, iterations: u32) -> Result<Vec<ProfileReport, MAX_TASKS>, Error> {
        if self.started {
            return Err(ConfigError::AlreadyStarted.into());
        }
        let mut profiler = Profiler::new(&self.clock, &mut self.reporter);
        let mut reports = Vec::new();
        for (idx, task) in self.tasks.iter_mut().enumerate() {
            let report = profiler.profile_task(TaskId(idx as u8), &mut *task.work, task.period, iterations)?;
            // Capacity equals the task table's.
            let _ = reports.push(report);
        }
        Ok(reports)
    }

    /// Release every task at the current tick
    ///
    /// Called by the first [`advance_one_tick`](Self::advance_one_tick);
    /// calling it again is a no-op.
    pub fn start(&mut self) -> Result<(), ConfigError> {
        if self.started {
            return Ok(());
        }
        if self.tasks.is_empty() {
            return Err(ConfigError::NoTasks);
        }

        let now = self.clock.ticks();
        self.last_tick = now;
        for task in self.tasks.iter_mut() {
            task.next_release = match task.period {
                Period::Periodic(ticks) => now.wrapping_add(ticks),
                Period::Aperiodic { .. } => now,
            };
            task.signalled = false;
            task.make_ready(now);
        }
        self.started = true;
        debug!("scheduler started at {now} with {} tasks", self.tasks.len());
        Ok(())
    }

    /// One step of the dispatch loop; returns the task that ran this tick
    pub fn advance_one_tick(&mut self) -> Result<Option<TaskId>, ConfigError> {
        self.start()?;

        let now = self.observe_tick();
        self.release_due(now);
        self.dispatch();
        let ran = self.execute(now);
        self.clock.wait_until(now.wrapping_add(1));
        Ok(ran)
    }

    /// Take over the thread of control
    ///
    /// Only returns if the task table is unusable.
    pub fn run_forever(&mut self) -> Result<Infallible, ConfigError> {
        self.start()?;
        loop {
            self.advance_one_tick()?;
        }
    }

    /// Finish the running task's current job
    ///
    /// A periodic task sleeps until `release_tick + period`. An aperiodic
    /// task sleeps until [`release`](Self::release), or for its `rearm` wait
    /// if it has one.
    pub fn delay_until_next_period(&mut self, id: TaskId) -> Result<(), InvalidArgument> {
        let idx = self.running_index(id)?;
        self.complete(idx, self.last_tick);
        Ok(())
    }

    /// Finish the running aperiodic task's job and sleep for `wait` ticks
    pub fn delay_for(&mut self, id: TaskId, wait: Ticks) -> Result<(), InvalidArgument> {
        let idx = self.running_index(id)?;
        if self.tasks[idx].period.is_periodic() {
            return Err(InvalidArgument::NotAperiodic(id));
        }
        if wait > MAX_PERIOD {
            return Err(InvalidArgument::WaitTooLong { task: id, wait });
        }
        self.complete(idx, self.last_tick);
        let task = &mut self.tasks[idx];
        if task.state == TaskState::Blocked {
            task.wake = Some(self.last_tick.wrapping_add(wait));
        }
        Ok(())
    }

    /// External release signal for an aperiodic task
    ///
    /// Signals arriving while a job is already pending collapse into one
    /// release after it completes.
    pub fn release(&mut self, id: TaskId) -> Result<(), InvalidArgument> {
        let idx = self.index(id)?;
        let task = &mut self.tasks[idx];
        if task.period.is_periodic() {
            return Err(InvalidArgument::NotAperiodic(id));
        }
        task.signalled = true;
        Ok(())
    }

    /// Read the tick counter, refusing to move backwards
    fn observe_tick(&mut self) -> Tick {
        let observed = self.clock.ticks();
        if observed.since(self.last_tick) < 0 {
            self.reporter.report(Event::ClockAnomaly {
                context: AnomalyContext::Dispatch { last: self.last_tick, observed },
            });
            return self.last_tick;
        }
        self.last_tick = observed;
        observed
    }

    /// Blocked → Ready for every due task; overrun check for pending jobs
    fn release_due(&mut self, now: Tick) {
        for idx in 0..self.tasks.len() {
            let task = &mut self.tasks[idx];
            match (task.state, task.period) {
                (TaskState::Blocked, Period::Periodic(ticks)) => {
                    if now.reached(task.next_release) {
                        let boundary = task.next_release;
                        task.next_release = boundary.wrapping_add(ticks);
                        task.make_ready(boundary);
                        trace!("release task#{idx} at {boundary}");
                        // Boundaries skipped while the clock jumped are misses too.
                        self.detect_overrun(idx, now);
                    }
                }
                (TaskState::Blocked, Period::Aperiodic { .. }) => {
                    let woke = task.wake.is_some_and(|at| now.reached(at));
                    if task.signalled || woke {
                        task.signalled = false;
                        task.wake = None;
                        task.make_ready(now);
                        trace!("release aperiodic task#{idx} at {now}");
                    }
                }
                (TaskState::Ready | TaskState::Running, Period::Periodic(_)) => {
                    self.detect_overrun(idx, now);
                }
                _ => {}
            }
        }
    }

    /// Report one miss per period boundary the pending job has passed
    fn detect_overrun(&mut self, idx: usize, at: Tick) {
        let task = &mut self.tasks[idx];
        let Period::Periodic(ticks) = task.period else {
            return;
        };
        if !task.has_pending_job() {
            return;
        }
        while at.reached(task.next_release) {
            let boundary = task.next_release;
            task.stats.deadline_misses += 1;
            task.coalesced = Some(boundary);
            task.next_release = boundary.wrapping_add(ticks);
            self.reporter.report(Event::DeadlineMiss { task: TaskId(idx as u8), tick: boundary });
        }
    }

    /// Find highest-priority ready task, earliest registration on ties
    fn find_highest_priority_ready(&self) -> Option<usize> {
        let mut best: Option<usize> = None;
        for (i, task) in self.tasks.iter().enumerate() {
            if task.state != TaskState::Ready {
                continue;
            }
            match best {
                Some(b) if self.tasks[b].priority >= task.priority => {}
                _ => best = Some(i),
            }
        }
        best
    }

    fn dispatch(&mut self) {
        let Some(next) = self.find_highest_priority_ready() else {
            return;
        };
        if let Some(current) = self.current {
            if self.tasks[next].priority <= self.tasks[current].priority {
                return;
            }
            let preempted = &mut self.tasks[current];
            preempted.state = TaskState::Ready;
            preempted.stats.preemptions += 1;
            trace!("task#{next} preempts task#{current}");
        }
        self.tasks[next].state = TaskState::Running;
        self.current = Some(next);
    }

    /// Run one tick of the current job
    fn execute(&mut self, now: Tick) -> Option<TaskId> {
        let Some(idx) = self.current else {
            self.idle_ticks += 1;
            self.last_ran = None;
            return None;
        };

        if self.last_ran != Some(idx) {
            self.context_switches += 1;
        }
        self.last_ran = Some(idx);

        let mut finished_at = now;
        let task = &mut self.tasks[idx];
        if !task.started {
            task.started = true;
            trace!("task#{idx} job start at {now}");
            task.work.run();
            task.remaining = task.work.cost().unwrap_or(task.cost).max(1);

            // A body that blocked past its boundary overran even if it
            // completes this tick.
            let after = self.clock.ticks();
            if after.since(now) > 0 {
                self.detect_overrun(idx, after);
                finished_at = after;
            }
        }

        let task = &mut self.tasks[idx];
        task.remaining -= 1;
        if task.remaining == 0 {
            self.complete(idx, finished_at);
        }
        Some(TaskId(idx as u8))
    }

    /// Job done: Blocked until the next release, or straight back to Ready
    /// if a release is owed
    fn complete(&mut self, idx: usize, now: Tick) {
        if self.current == Some(idx) {
            self.current = None;
        }
        let task = &mut self.tasks[idx];
        task.stats.completions += 1;
        task.remaining = 0;
        match task.period {
            Period::Periodic(_) => match task.coalesced.take() {
                Some(boundary) => {
                    task.make_ready(boundary);
                    trace!("task#{idx} coalesced release for {boundary}");
                }
                None => task.state = TaskState::Blocked,
            },
            Period::Aperiodic { rearm } => {
                if task.signalled {
                    task.signalled = false;
                    task.make_ready(now);
                } else {
                    task.state = TaskState::Blocked;
                    task.wake = rearm.map(|wait| now.wrapping_add(wait));
                }
            }
        }
    }

    fn index(&self, id: TaskId) -> Result<usize, InvalidArgument> {
        if id.index() < self.tasks.len() {
            Ok(id.index())
        } else {
            Err(InvalidArgument::UnknownTask(id))
        }
    }

    fn running_index(&self, id: TaskId) -> Result<usize, InvalidArgument> {
        let idx = self.index(id)?;
        if self.current == Some(idx) {
            Ok(idx)
        } else {
            Err(InvalidArgument::NotRunning(id))
        }
    }

    /// Tick of the latest step
    pub fn now(&self) -> Tick {
        self.last_tick
    }

    /// Task holding the processor
    pub fn running(&self) -> Option<TaskId> {
        self.current.map(|idx| TaskId(idx as u8))
    }

    /// Get task by handle
    pub fn task(&self, id: TaskId) -> Option<TaskView<'_>> {
        self.tasks.get(id.index()).map(|t| t.view(id.index()))
    }

    /// All tasks, registration order
    pub fn tasks(&self) -> Tasks<'_, 'a> {
        Tasks { inner: self.tasks.iter().enumerate() }
    }

    /// Number of registered tasks
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn is_started(&self) -> bool {
        self.started
    }

    /// Ticks on which a different task ran than on the tick before
    pub fn context_switches(&self) -> u32 {
        self.context_switches
    }

    /// Ticks with nothing to run
    pub fn idle_ticks(&self) -> u64 {
        self.idle_ticks
    }

    pub fn reporter(&self) -> &R {
        &self.reporter
    }

    /// Number of periodic tasks
    pub fn periodic_task_count(&self) -> usize {
        self.tasks.iter().filter(|t| t.period.is_periodic()).count()
    }

    /// Total CPU utilization (sum of cost / period over periodic tasks)
    pub fn total_utilization(&self) -> f32 {
        self.tasks
            .iter()
            .filter_map(|t| t.period.ticks().map(|p| t.cost as f32 / p as f32))
            .sum()
    }

    /// Rate-monotonic schedulability test
    ///
    /// Liu & Layland bound: U ≤ n(2^(1/n) - 1). Sufficient, not necessary:
    /// a task set above the bound may still meet every deadline.
    pub fn is_schedulable(&self) -> bool {
        let n = self.periodic_task_count();
        if n == 0 {
            return true;
        }
        self.total_utilization() <= liu_layland_bound(n)
    }
}

/// Liu & Layland bound: n(2^(1/n) - 1)
///
/// Uses precomputed table for small n, approximation for large n.
pub fn liu_layland_bound(n: usize) -> f32 {
    const BOUNDS: [f32; 10] = [
        1.000, // n=0: unused (returns early)
        1.000, // n=1
        0.828, // n=2
        0.780, // n=3
        0.757, // n=4
        0.743, // n=5
        0.735, // n=6
        0.729, // n=7
        0.724, // n=8
        0.693, // n≥9: ln(2)
    ];
    if n == 0 {
        return 1.0;
    }
    BOUNDS[n.min(9)]
}
