//! WCET profiler — empirical worst-case execution time
//!
//! Runs a task body back to back, times every call with the [`Clock`] and
//! keeps the largest elapsed time. The maximum, not the mean: feasibility
//! analysis needs the worst case.
//!
//! The profiler is a measurement harness, independent of the live
//! scheduler. Profiling a body that the running scheduler also holds, when
//! that body has side effects unsafe under tight repetition, is the
//! caller's mistake to avoid. The borrow rules already forbid it for bodies
//! registered by reference; [`Kernel::profile_tasks`](crate::Kernel::profile_tasks)
//! only profiles before start.

use core::time::Duration;

use crate::clock::{Clock, Ticks};
use crate::error::{Error, InvalidArgument};
use crate::report::{AnomalyContext, Event, ProfileReport, Reporter};
use crate::task::{Period, Runnable, TaskId};

/// One timed call, folded into the maximum and dropped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutionSample {
    pub task: Option<TaskId>,
    pub elapsed_ns: u64,
}

/// Running maximum over valid samples
#[derive(Debug, Clone, Copy, Default)]
struct Maximum {
    max_ns: Option<u64>,
    kept: u32,
}

impl Maximum {
    fn fold(&mut self, sample: ExecutionSample) {
        self.kept += 1;
        self.max_ns = Some(self.max_ns.map_or(sample.elapsed_ns, |m| m.max(sample.elapsed_ns)));
    }
}

/// Convert a duration to whole ticks, truncating toward zero
pub fn to_ticks(elapsed: Duration, tick: Duration) -> Ticks {
    let ticks = elapsed.as_nanos() / tick.as_nanos().max(1);
    ticks.min(Ticks::MAX as u128) as Ticks
}

/// WCET measurement harness
pub struct Profiler<C: Clock, R: Reporter> {
    clock: C,
    reporter: R,
}

impl<C: Clock, R: Reporter> Profiler<C, R> {
    pub fn new(clock: C, reporter: R) -> Self {
        Self { clock, reporter }
    }

    /// Run `work` `iterations` times and return the largest elapsed time
    ///
    /// A sample whose end timestamp precedes its start is discarded and
    /// reported as a clock anomaly; profiling carries on.
    pub fn profile(&mut self, work: &mut dyn Runnable, iterations: u32) -> Result<Duration, Error> {
        let max = self.sample(None, work, iterations)?;
        Ok(Duration::from_nanos(max.max_ns.unwrap_or(0)))
    }

    /// Profile a task body and judge it against the task's period
    ///
    /// The report (and, when the WCET exceeds the period, an
    /// [`Event::InfeasibleTask`]) goes to the reporter. Nothing is
    /// corrected: what to do with an infeasible task is the operator's call.
    pub fn profile_task(
        &mut self,
        task: TaskId,
        work: &mut dyn Runnable,
        period: Period,
        iterations: u32,
    ) -> Result<ProfileReport, Error> {
        let max = self.sample(Some(task), work, iterations)?;
        let max_elapsed = Duration::from_nanos(max.max_ns.unwrap_or(0));
        let tick_equivalent = to_ticks(max_elapsed, self.clock.tick_period());
        let feasible = period.ticks().map_or(true, |p| tick_equivalent <= p);

        let report = ProfileReport {
            task: Some(task),
            max_elapsed,
            tick_equivalent,
            samples: max.kept,
            feasible,
        };
        self.reporter.report(Event::Profile(report));
        if let (false, Some(period)) = (feasible, period.ticks()) {
            self.reporter.report(Event::InfeasibleTask {
                task,
                wcet_ticks: tick_equivalent,
                period,
            });
        }
        Ok(report)
    }

    fn sample(
        &mut self,
        task: Option<TaskId>,
        work: &mut dyn Runnable,
        iterations: u32,
    ) -> Result<Maximum, Error> {
        if iterations == 0 {
            return Err(InvalidArgument::ZeroIterations.into());
        }

        let mut max = Maximum::default();
        for iteration in 0..iterations {
            let start = self.clock.now();
            work.run();
            let end = self.clock.now();

            match end.checked_duration_since(start) {
                Some(elapsed) => max.fold(ExecutionSample {
                    task,
                    elapsed_ns: elapsed.as_nanos() as u64,
                }),
                None => self.reporter.report(Event::ClockAnomaly {
                    context: AnomalyContext::Sample { task, iteration, start, end },
                }),
            }
        }

        if max.kept == 0 {
            return Err(Error::NoValidSamples);
        }
        Ok(max)
    }

    pub fn reporter(&self) -> &R {
        &self.reporter
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::cell::Cell;

    use crate::clock::{LogicalClock, Tick, Timestamp};
    use crate::report::EventRing;

    type Ring = EventRing<Event, 16>;

    /// Clock replaying timestamps, one per `now` call
    struct Replay {
        script: &'static [u64],
        pos: Cell<usize>,
    }

    impl Clock for Replay {
        fn now(&self) -> Timestamp {
            let pos = self.pos.get();
            self.pos.set(pos + 1);
            Timestamp(self.script[pos.min(self.script.len() - 1)])
        }

        fn tick_period(&self) -> Duration {
            Duration::from_millis(1)
        }

        fn wait_until(&self, _tick: Tick) {}
    }

    #[test]
    fn test_zero_iterations_rejected() {
        let clock = LogicalClock::new();
        let mut profiler = Profiler::new(&clock, Ring::new());
        let mut body = || {};
        assert_eq!(
            profiler.profile(&mut body, 0),
            Err(Error::InvalidArgument(InvalidArgument::ZeroIterations))
        );
    }

    #[test]
    fn test_constant_time_body() {
        let clock = LogicalClock::new();
        let mut calls = 0u32;
        let mut body = || {
            calls += 1;
            clock.advance(Duration::from_micros(250));
        };
        let mut profiler = Profiler::new(&clock, Ring::new());
        let max = profiler.profile(&mut body, 1000).unwrap();
        // Every sample took exactly 250 µs, so the maximum equals each one.
        assert_eq!(max, Duration::from_micros(250));
        assert!(profiler.reporter().is_empty());
        drop(profiler);
        assert_eq!(calls, 1000);
    }

    #[test]
    fn test_max_not_mean() {
        let clock = LogicalClock::new();
        let pattern = [100u64, 300, 200, 50];
        let mut i = 0;
        let mut body = || {
            clock.advance(Duration::from_micros(pattern[i % pattern.len()]));
            i += 1;
        };
        let mut profiler = Profiler::new(&clock, Ring::new());
        let max = profiler.profile(&mut body, 40).unwrap();
        assert_eq!(max, Duration::from_micros(300));
        for us in pattern {
            assert!(max >= Duration::from_micros(us));
        }
    }

    #[test]
    fn test_backwards_sample_discarded() {
        static SCRIPT: [u64; 6] = [0, 10, 20, 15, 30, 35];
        let clock = Replay { script: &SCRIPT, pos: Cell::new(0) };
        let mut profiler = Profiler::new(&clock, Ring::new());
        let mut body = || {};

        let report = profiler.profile_task(TaskId(2), &mut body, Period::Periodic(5), 3).unwrap();
        assert_eq!(report.max_elapsed, Duration::from_nanos(10));
        assert_eq!(report.samples, 2);

        let anomalies: heapless::Vec<AnomalyContext, 2> = profiler.reporter().anomalies().collect();
        assert_eq!(
            anomalies.as_slice(),
            &[AnomalyContext::Sample {
                task: Some(TaskId(2)),
                iteration: 1,
                start: Timestamp(20),
                end: Timestamp(15),
            }]
        );
    }

    #[test]
    fn test_all_samples_anomalous() {
        static SCRIPT: [u64; 4] = [50, 40, 30, 20];
        let clock = Replay { script: &SCRIPT, pos: Cell::new(0) };
        let mut profiler = Profiler::new(&clock, Ring::new());
        let mut body = || {};
        assert_eq!(profiler.profile(&mut body, 2), Err(Error::NoValidSamples));
        assert_eq!(profiler.reporter().anomalies().count(), 2);
    }

    #[test]
    fn test_wcet_over_period_is_infeasible() {
        let clock = LogicalClock::new();
        let mut body = || clock.advance_ticks(12);
        let mut profiler = Profiler::new(&clock, Ring::new());

        let report = profiler.profile_task(TaskId(0), &mut body, Period::Periodic(10), 5).unwrap();
        assert_eq!(report.tick_equivalent, 12);
        assert!(!report.feasible);

        let events: heapless::Vec<Event, 4> = profiler.reporter().iter().collect();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0], Event::Profile(report));
        assert_eq!(
            events[1],
            Event::InfeasibleTask { task: TaskId(0), wcet_ticks: 12, period: 10 }
        );
    }

    #[test]
    fn test_tick_conversion_truncates() {
        let clock = LogicalClock::new();
        let mut body = || clock.advance(Duration::from_micros(9_900));
        let mut profiler = Profiler::new(&clock, Ring::new());

        let report = profiler.profile_task(TaskId(1), &mut body, Period::Periodic(9), 3).unwrap();
        assert_eq!(report.tick_equivalent, 9);
        assert!(report.feasible);
        assert_eq!(profiler.reporter().len(), 1);
        assert_eq!(to_ticks(Duration::from_micros(999), Duration::from_millis(1)), 0);
    }

    #[test]
    fn test_aperiodic_always_feasible() {
        let clock = LogicalClock::new();
        let mut body = || clock.advance_ticks(100);
        let mut profiler = Profiler::new(&clock, Ring::new());
        let report = profiler
            .profile_task(TaskId(4), &mut body, Period::Aperiodic { rearm: None }, 2)
            .unwrap();
        assert_eq!(report.tick_equivalent, 100);
        assert!(report.feasible);
    }

    #[cfg(feature = "std")]
    #[test]
    fn test_wall_clock_profile() {
        let clock = crate::clock::StdClock::default();
        let mut acc = 0u64;
        let mut body = || {
            for i in 0..1000u64 {
                acc = acc.wrapping_add(core::hint::black_box(i));
            }
        };
        let mut profiler = Profiler::new(&clock, Ring::new());
        let max = profiler.profile(&mut body, 50).unwrap();
        assert!(max < Duration::from_secs(1));
    }
}
