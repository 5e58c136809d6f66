//! Clock source — monotonic time and the tick counter
//!
//! The scheduler never keeps its own notion of time: it reads ticks from a
//! [`Clock`] and blocks on it between steps. On hardware the clock wraps
//! SysTick (Cortex-M) or MTIME (RISC-V); tests and simulation use the
//! deterministic [`LogicalClock`]; hosted builds can use `StdClock`.

use core::cell::Cell;
use core::time::Duration;

/// Length of a span, in ticks
pub type Ticks = u32;

/// Absolute tick count
///
/// Wraps at `u32::MAX`. Ordering between two ticks is only meaningful when
/// they are less than 2^31 ticks apart, which holds for every period the
/// scheduler accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Tick(pub u32);

impl Tick {
    pub const ZERO: Tick = Tick(0);

    /// Tick `span` ticks later, wrapping
    #[inline]
    pub const fn wrapping_add(self, span: Ticks) -> Tick {
        Tick(self.0.wrapping_add(span))
    }

    /// Signed distance from `earlier` to `self`
    #[inline]
    pub const fn since(self, earlier: Tick) -> i32 {
        self.0.wrapping_sub(earlier.0) as i32
    }

    /// Has `deadline` been reached at `self`?
    #[inline]
    pub const fn reached(self, deadline: Tick) -> bool {
        self.since(deadline) >= 0
    }

    /// Tick containing `timestamp` for a clock of the given tick period
    pub fn from_timestamp(timestamp: Timestamp, tick_period: Duration) -> Tick {
        let period_ns = tick_period.as_nanos().max(1) as u64;
        // Truncation to u32 is the wrap.
        Tick((timestamp.0 / period_ns) as u32)
    }
}

impl core::fmt::Display for Tick {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "tick {}", self.0)
    }
}

/// Monotonic timestamp, nanoseconds since the clock's origin
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Timestamp(pub u64);

impl Timestamp {
    /// Elapsed time since `earlier`, or `None` if `earlier` is later
    pub fn checked_duration_since(self, earlier: Timestamp) -> Option<Duration> {
        self.0.checked_sub(earlier.0).map(Duration::from_nanos)
    }
}

/// Source of time for the scheduler and the profiler
///
/// Implementations must never report a timestamp earlier than one already
/// reported. Both consumers still check, and report violations rather than
/// trusting them.
pub trait Clock {
    /// Current monotonic time
    fn now(&self) -> Timestamp;

    /// Length of one tick
    fn tick_period(&self) -> Duration;

    /// Current tick
    fn ticks(&self) -> Tick {
        Tick::from_timestamp(self.now(), self.tick_period())
    }

    /// Block until `tick` has been reached. Returns at once if it already has.
    fn wait_until(&self, tick: Tick);
}

impl<C: Clock + ?Sized> Clock for &C {
    fn now(&self) -> Timestamp {
        (**self).now()
    }

    fn tick_period(&self) -> Duration {
        (**self).tick_period()
    }

    fn ticks(&self) -> Tick {
        (**self).ticks()
    }

    fn wait_until(&self, tick: Tick) {
        (**self).wait_until(tick)
    }
}

/// Default tick length: 1 ms, the usual `portTICK_PERIOD_MS`
pub const DEFAULT_TICK: Duration = Duration::from_millis(1);

/// Deterministic software clock
///
/// Time only moves when someone moves it: [`advance`](Self::advance) from a
/// test or a fake task body, or [`wait_until`](Clock::wait_until) from the
/// scheduler, which jumps straight to the requested tick. Interior
/// mutability lets task bodies hold a shared reference to the same clock
/// the scheduler reads.
pub struct LogicalClock {
    /// Current time (nanoseconds)
    now_ns: Cell<u64>,
    /// Tick length (nanoseconds)
    tick_ns: u64,
}

impl LogicalClock {
    /// Logical clock at time zero with a 1 ms tick
    pub const fn new() -> Self {
        Self::with_tick(DEFAULT_TICK)
    }

    /// Logical clock at time zero with a custom tick length
    pub const fn with_tick(tick: Duration) -> Self {
        let tick_ns = tick.as_nanos() as u64;
        Self {
            now_ns: Cell::new(0),
            tick_ns: if tick_ns == 0 { 1 } else { tick_ns },
        }
    }

    /// Logical clock (1 ms tick) whose counter starts at `tick`
    pub fn starting_at(tick: Tick) -> Self {
        let clock = Self::new();
        clock.now_ns.set(tick.0 as u64 * clock.tick_ns);
        clock
    }

    /// Advance time by `span`
    pub fn advance(&self, span: Duration) {
        let ns = span.as_nanos() as u64;
        self.now_ns.set(self.now_ns.get().wrapping_add(ns));
    }

    /// Advance time by whole ticks
    pub fn advance_ticks(&self, ticks: Ticks) {
        self.now_ns
            .set(self.now_ns.get().wrapping_add(ticks as u64 * self.tick_ns));
    }
}

impl Default for LogicalClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for LogicalClock {
    fn now(&self) -> Timestamp {
        Timestamp(self.now_ns.get())
    }

    fn tick_period(&self) -> Duration {
        Duration::from_nanos(self.tick_ns)
    }

    fn wait_until(&self, tick: Tick) {
        let ahead = tick.since(self.ticks());
        if ahead > 0 {
            // Land on the tick boundary, not somewhere inside the tick.
            let into_tick = self.now_ns.get() % self.tick_ns;
            let ns = ahead as u64 * self.tick_ns - into_tick;
            self.now_ns.set(self.now_ns.get().wrapping_add(ns));
        }
    }
}

/// Wall-clock source for hosted builds
#[cfg(feature = "std")]
pub struct StdClock {
    origin: std::time::Instant,
    tick: Duration,
}

#[cfg(feature = "std")]
impl StdClock {
    /// Clock whose tick zero is now
    pub fn new(tick: Duration) -> Self {
        Self {
            origin: std::time::Instant::now(),
            tick: tick.max(Duration::from_nanos(1)),
        }
    }
}

#[cfg(feature = "std")]
impl Default for StdClock {
    fn default() -> Self {
        Self::new(DEFAULT_TICK)
    }
}

#[cfg(feature = "std")]
impl Clock for StdClock {
    fn now(&self) -> Timestamp {
        Timestamp(self.origin.elapsed().as_nanos() as u64)
    }

    fn tick_period(&self) -> Duration {
        self.tick
    }

    fn wait_until(&self, tick: Tick) {
        let ahead = tick.since(self.ticks());
        if ahead > 0 {
            let now = self.origin.elapsed();
            let target = self.tick * ahead as u32;
            let into_tick = Duration::from_nanos((now.as_nanos() % self.tick.as_nanos()) as u64);
            std::thread::sleep(target.saturating_sub(into_tick));
        }
    }
}
