use serde::{Deserialize, Serialize};
use syncc_core::PatchState;

/// Bright/dark patch read by a light sensor on each acquisition unit. It
/// toggles on a fixed cadence a bounded number of times, so the number of
/// transitions identifies what was on screen.
#[derive(Debug, Clone)]
pub struct PhotodiodeSignal {
    state: PatchState,
    last_toggle: Option<f64>,
    count: u32,
    target: u32,
    interval: f64,
}

impl PhotodiodeSignal {
    pub fn new(target: u32, interval: f64) -> Self {
        Self {
            state: PatchState::Off,
            last_toggle: None,
            count: 0,
            target,
            interval,
        }
    }

    /// Movie identity code: two transitions per ordinal, so movie 1 toggles
    /// twice, movie 2 four times and movie 3 six times. Offline decoders
    /// depend on this exact law.
    pub fn for_movie(ordinal: u32, interval: f64) -> Self {
        Self::new(2 * ordinal, interval)
    }

    /// First toggle happens on the first tick.
    pub fn reset_leading(&mut self) {
        self.state = PatchState::Off;
        self.count = 0;
        self.last_toggle = None;
    }

    /// First toggle happens one interval after `at`.
    pub fn reset(&mut self, at: f64) {
        self.reset_leading();
        self.last_toggle = Some(at);
    }

    /// Toggles when an interval has elapsed since the last toggle and the
    /// target is not yet reached. Returns whether the state changed.
    pub fn tick(&mut self, now: f64) -> bool {
        if self.count >= self.target {
            return false;
        }
        let due = self.last_toggle.is_none_or(|last| now >= last + self.interval);
        if due {
            self.state = self.state.toggled();
            self.count += 1;
            self.last_toggle = Some(now);
        }
        due
    }

    /// Back to the dark resting patch shown between stimuli. The count is
    /// kept for reporting.
    pub fn rest(&mut self) {
        self.state = PatchState::Off;
    }

    pub fn state(&self) -> PatchState {
        self.state
    }

    pub fn count(&self) -> u32 {
        self.count
    }

    pub fn target(&self) -> u32 {
        self.target
    }

    pub fn interval(&self) -> f64 {
        self.interval
    }

    pub fn is_complete(&self) -> bool {
        self.count >= self.target
    }
}

/// What a photodiode sequence actually did, for the session record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhotodiodeReport {
    pub label: String,
    pub toggles: u32,
    pub target: u32,
    pub started: f64,
    pub finished: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn movie_signal_toggles_exactly_twice_the_ordinal() {
        for ordinal in 1..=3 {
            let mut signal = PhotodiodeSignal::for_movie(ordinal, 0.5);
            signal.reset_leading();
            let mut t = 100.0;
            while t < 110.0 {
                signal.tick(t);
                t += 0.01;
            }
            assert_eq!(signal.count(), 2 * ordinal);
            assert!(signal.is_complete());
        }
    }

    #[test]
    fn leading_edge_toggles_on_first_tick() {
        let mut signal = PhotodiodeSignal::for_movie(1, 0.5);
        signal.reset_leading();
        assert!(signal.tick(42.0));
        assert_eq!(signal.state(), PatchState::On);
        assert!(!signal.tick(42.2));
        assert!(signal.tick(42.5));
        assert_eq!(signal.state(), PatchState::Off);
    }

    #[test]
    fn trailing_reset_waits_one_interval() {
        let mut signal = PhotodiodeSignal::new(4, 1.0);
        signal.reset(0.0);
        assert!(!signal.tick(0.0));
        assert!(!signal.tick(0.99));
        assert!(signal.tick(1.0));
        assert_eq!(signal.count(), 1);
    }

    #[test]
    fn rest_forces_off_whatever_the_phase() {
        let mut signal = PhotodiodeSignal::for_movie(2, 0.5);
        signal.reset_leading();
        signal.tick(0.0);
        assert!(signal.state().is_on());
        signal.rest();
        assert_eq!(signal.state(), PatchState::Off);
        assert_eq!(signal.count(), 1);
    }
}
