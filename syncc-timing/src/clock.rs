use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Monotonic time source shared by the scheduler, the presentation surface
/// and the marker transports. Timestamps are seconds on the clock's own
/// timeline, so values from clones of one clock are directly comparable.
pub trait Clock: Clone + Send + Sync {
    fn now(&self) -> f64;
    fn sleep(&self, d: Duration);

    fn sleep_until(&self, deadline: f64) {
        let now = self.now();
        if deadline > now {
            self.sleep(Duration::from_secs_f64(deadline - now));
        }
    }
}

/// Wall clock backed by `Instant`.
#[derive(Debug, Clone, Copy)]
pub struct MonotonicClock {
    start: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn high_precision_sleep(&self, duration: Duration) {
        #[cfg(target_os = "linux")]
        self.linux_sleep(duration);
        #[cfg(not(target_os = "linux"))]
        std::thread::sleep(duration);
    }

    #[cfg(target_os = "linux")]
    fn linux_sleep(&self, duration: Duration) {
        use libc::{clock_nanosleep, timespec, CLOCK_MONOTONIC};

        let req = timespec {
            tv_sec: duration.as_secs() as libc::time_t,
            tv_nsec: duration.subsec_nanos() as libc::c_long,
        };

        // SAFETY: `req` outlives the call and a null remainder pointer is allowed.
        unsafe {
            clock_nanosleep(CLOCK_MONOTONIC, 0, &req, std::ptr::null_mut());
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now(&self) -> f64 {
        self.start.elapsed().as_secs_f64()
    }

    fn sleep(&self, d: Duration) {
        self.high_precision_sleep(d)
    }
}

/// Simulated clock. Time only moves when someone sleeps on it or calls
/// [`ManualClock::advance`]; clones share the same timeline.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    nanos: Arc<AtomicU64>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance(&self, d: Duration) {
        self.nanos.fetch_add(d.as_nanos() as u64, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> f64 {
        self.nanos.load(Ordering::SeqCst) as f64 / 1e9
    }

    fn sleep(&self, d: Duration) {
        self.advance(d)
    }
}

/// Resettable stopwatch over a shared [`Clock`], one per routine.
#[derive(Debug, Clone)]
pub struct RoutineClock<C: Clock> {
    clock: C,
    origin: f64,
}

impl<C: Clock> RoutineClock<C> {
    pub fn new(clock: C) -> Self {
        let origin = clock.now();
        Self { clock, origin }
    }

    pub fn reset(&mut self) {
        self.origin = self.clock.now();
    }

    /// Seconds since the last reset.
    pub fn elapsed(&self) -> f64 {
        self.clock.now() - self.origin
    }

    /// Absolute clock time of the last reset.
    pub fn origin(&self) -> f64 {
        self.origin
    }

    /// Converts an absolute timestamp to this routine's timeline.
    pub fn relative(&self, absolute: f64) -> f64 {
        absolute - self.origin
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }
}
