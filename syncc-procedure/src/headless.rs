use std::collections::VecDeque;
use syncc_core::{PatchState, Scene, Surface};
use syncc_timing::Clock;
use tracing::trace;

/// Presentation surface paced by the clock alone: flips land on a fixed
/// refresh grid and key presses are scripted ahead of time. Runs the whole
/// procedure without a display, in real time on a `MonotonicClock` or
/// instantly on a `ManualClock`.
#[derive(Debug)]
pub struct HeadlessSurface<C: Clock> {
    clock: C,
    period: f64,
    last_flip: Option<f64>,
    scripted: VecDeque<(f64, String)>,
    patch: Option<PatchState>,
    patch_changes: Vec<(f64, PatchState)>,
    cues: Vec<f64>,
    flips: u64,
}

impl<C: Clock> HeadlessSurface<C> {
    pub fn new(clock: C, period: f64) -> Self {
        Self {
            clock,
            period,
            last_flip: None,
            scripted: VecDeque::new(),
            patch: None,
            patch_changes: Vec::new(),
            cues: Vec::new(),
            flips: 0,
        }
    }

    /// Queues `key` to be delivered by the first poll at or after `at`.
    pub fn press_at(&mut self, at: f64, key: impl Into<String>) {
        let key = key.into();
        let idx = self.scripted.partition_point(|(t, _)| *t <= at);
        self.scripted.insert(idx, (at, key));
    }

    pub fn flips(&self) -> u64 {
        self.flips
    }

    /// Flip times at which the photodiode patch changed, with the new state.
    pub fn patch_changes(&self) -> &[(f64, PatchState)] {
        &self.patch_changes
    }

    /// Number of On/Off transitions shown between `from` and `to`, ignoring
    /// the first appearance of the patch.
    pub fn toggles_between(&self, from: f64, to: f64) -> usize {
        self.patch_changes
            .windows(2)
            .filter(|w| w[1].0 >= from && w[1].0 <= to)
            .filter(|w| w[0].1 != PatchState::Hidden && w[1].1 != PatchState::Hidden)
            .count()
    }

    pub fn cues(&self) -> &[f64] {
        &self.cues
    }
}

impl<C: Clock> Surface for HeadlessSurface<C> {
    fn next_flip_time(&self) -> f64 {
        let now = self.clock.now();
        match self.last_flip {
            None => now + self.period,
            Some(last) => {
                let mut next = last + self.period;
                while next <= now {
                    next += self.period;
                }
                next
            }
        }
    }

    fn flip(&mut self, scene: &Scene) -> f64 {
        let at = self.next_flip_time();
        self.clock.sleep_until(at);
        self.last_flip = Some(at);
        self.flips += 1;
        if self.patch != Some(scene.patch) {
            trace!(at, patch = ?scene.patch, "patch changed");
            self.patch = Some(scene.patch);
            self.patch_changes.push((at, scene.patch));
        }
        at
    }

    fn poll_keys(&mut self) -> Vec<String> {
        let now = self.clock.now();
        let mut keys = Vec::new();
        while self.scripted.front().is_some_and(|(t, _)| *t <= now) {
            if let Some((_, key)) = self.scripted.pop_front() {
                keys.push(key);
            }
        }
        keys
    }

    fn cue(&mut self) {
        self.cues.push(self.clock.now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use syncc_timing::ManualClock;

    #[test]
    fn flips_land_on_the_refresh_grid() {
        let clock = ManualClock::new();
        let mut surface = HeadlessSurface::new(clock.clone(), 0.01);
        let first = surface.flip(&Scene::default());
        let second = surface.flip(&Scene::default());
        assert!((second - first - 0.01).abs() < 1e-9);
        assert!((clock.now() - second).abs() < 1e-6);

        clock.sleep(std::time::Duration::from_millis(25));
        let late = surface.flip(&Scene::default());
        assert!((late - second - 0.03).abs() < 1e-9);
    }

    #[test]
    fn scripted_keys_arrive_in_time_order() {
        let clock = ManualClock::new();
        let mut surface = HeadlessSurface::new(clock.clone(), 0.01);
        surface.press_at(2.0, "escape");
        surface.press_at(1.0, "x");
        assert!(surface.poll_keys().is_empty());

        clock.sleep(std::time::Duration::from_secs_f64(1.5));
        assert_eq!(surface.poll_keys(), vec!["x"]);
        clock.sleep(std::time::Duration::from_secs(1));
        assert_eq!(surface.poll_keys(), vec!["escape"]);
    }

    #[test]
    fn only_patch_transitions_are_kept() {
        let clock = ManualClock::new();
        let mut surface = HeadlessSurface::new(clock, 0.01);
        for patch in [PatchState::Off, PatchState::Off, PatchState::On, PatchState::On, PatchState::Off] {
            surface.flip(&Scene::blank(patch));
        }
        assert_eq!(surface.patch_changes().len(), 3);
        assert_eq!(surface.toggles_between(0.0, 1.0), 2);
    }
}
