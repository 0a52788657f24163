use crate::error::{ProcedureError, Result};
use serde::{Deserialize, Serialize};
use syncc_core::{ComponentStatus, ComponentTiming, PatchState, Scene, StimulusComponent, Surface};
use syncc_timing::{Clock, RoutineClock};
use tracing::{debug, info, warn};

/// Timing of one loop iteration, handed to per-frame hooks.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameInfo {
    pub frame: u64,
    /// Routine time when the iteration began.
    pub t: f64,
    /// Projected time of the coming flip on the routine clock.
    pub flip_routine: f64,
    /// Projected time of the coming flip on the shared clock.
    pub flip_global: f64,
}

/// Final timestamps of one routine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutineReport {
    pub name: String,
    /// Shared-clock time the routine clock was reset to zero.
    pub origin: f64,
    pub frames: u64,
    pub components: Vec<ComponentTiming>,
}

impl RoutineReport {
    pub fn component(&self, name: &str) -> Option<&ComponentTiming> {
        self.components.iter().find(|c| c.name == name)
    }
}

/// The frame loop. Owns the presentation surface, so every flip of the
/// session goes through here, along with the patch state shown on it.
pub struct RoutineScheduler<S: Surface, C: Clock> {
    surface: S,
    clock: RoutineClock<C>,
    tolerance: f64,
    abort_key: String,
    patch: PatchState,
}

impl<S: Surface, C: Clock> RoutineScheduler<S, C> {
    pub fn new(surface: S, clock: C, tolerance: f64, abort_key: impl Into<String>) -> Self {
        Self {
            surface,
            clock: RoutineClock::new(clock),
            tolerance,
            abort_key: abort_key.into(),
            patch: PatchState::Hidden,
        }
    }

    pub fn tolerance(&self) -> f64 {
        self.tolerance
    }

    pub fn abort_key(&self) -> &str {
        &self.abort_key
    }

    pub fn clock(&self) -> &C {
        self.clock.clock()
    }

    pub fn routine_clock(&self) -> &RoutineClock<C> {
        &self.clock
    }

    pub fn routine_clock_mut(&mut self) -> &mut RoutineClock<C> {
        &mut self.clock
    }

    pub fn surface(&self) -> &S {
        &self.surface
    }

    pub fn surface_mut(&mut self) -> &mut S {
        &mut self.surface
    }

    pub fn into_surface(self) -> S {
        self.surface
    }

    /// Patch state drawn on flips that do not set their own.
    pub fn patch(&self) -> PatchState {
        self.patch
    }

    pub fn set_patch(&mut self, patch: PatchState) {
        self.patch = patch;
    }

    /// Flips a scene with nothing but the current patch.
    pub fn flip_rest(&mut self) -> f64 {
        self.surface.flip(&Scene::blank(self.patch))
    }

    pub fn flip(&mut self, scene: &Scene) -> f64 {
        self.surface.flip(scene)
    }

    /// Drains pending keys. The abort key anywhere in the batch aborts.
    pub fn poll_keys(&mut self) -> Result<Vec<String>> {
        let keys = self.surface.poll_keys();
        if keys.iter().any(|k| *k == self.abort_key) {
            warn!(key = %self.abort_key, "abort key pressed");
            return Err(ProcedureError::Aborted);
        }
        Ok(keys)
    }

    pub fn run(
        &mut self,
        name: &str,
        components: &mut [StimulusComponent],
        duration: Option<f64>,
    ) -> Result<RoutineReport> {
        self.run_with(name, components, duration, |_, _| {})
    }

    /// Runs one routine to completion.
    ///
    /// Each iteration projects the coming flip, starts components once that
    /// flip is at or after routine time zero (less the tolerance) and
    /// finishes them once it passes start + duration (less the tolerance).
    /// Components without a duration end when their resource reports
    /// completion. The loop ends on the first iteration where nothing is
    /// running; that iteration does not flip. `on_frame` sees the scene
    /// before each flip and may change it.
    pub fn run_with<F>(
        &mut self,
        name: &str,
        components: &mut [StimulusComponent],
        duration: Option<f64>,
        mut on_frame: F,
    ) -> Result<RoutineReport>
    where
        F: FnMut(&FrameInfo, &mut Scene),
    {
        if let Some(comp) = components.iter().find(|c| !c.can_finish(duration)) {
            return Err(ProcedureError::MissingDuration {
                routine: name.to_string(),
                component: comp.name().to_string(),
            });
        }
        for comp in components.iter_mut() {
            comp.reset();
        }

        info!(routine = name, components = components.len(), "routine started");
        self.clock.reset();
        let result = self.frame_loop(components, duration, &mut on_frame);

        for comp in components.iter_mut() {
            comp.stop_drawing();
        }

        let frames = result?;
        info!(routine = name, frames, "routine finished");
        Ok(RoutineReport {
            name: name.to_string(),
            origin: self.clock.origin(),
            frames,
            components: components.iter().map(|c| c.timing().clone()).collect(),
        })
    }

    fn frame_loop<F>(
        &mut self,
        components: &mut [StimulusComponent],
        duration: Option<f64>,
        on_frame: &mut F,
    ) -> Result<u64>
    where
        F: FnMut(&FrameInfo, &mut Scene),
    {
        let tol = self.tolerance;
        let mut frame = 0u64;
        let mut flips = 0u64;

        loop {
            let t = self.clock.elapsed();
            let flip_global = self.surface.next_flip_time();
            let info = FrameInfo {
                frame,
                t,
                flip_routine: self.clock.relative(flip_global),
                flip_global,
            };

            for comp in components.iter_mut() {
                if comp.status() == ComponentStatus::NotStarted && info.flip_routine >= -tol {
                    comp.start(t, frame, flip_global);
                    debug!(component = comp.name(), frame, flip_global, "component started");
                }
                if comp.status() == ComponentStatus::Started {
                    let ended = match comp.effective_duration(duration) {
                        Some(d) => comp
                            .timing()
                            .t_start_refresh
                            .is_some_and(|start| flip_global > start + d - tol),
                        None => comp.resource().is_finished(flip_global),
                    };
                    if ended {
                        comp.finish(t, frame, flip_global);
                        debug!(component = comp.name(), frame, flip_global, "component finished");
                    }
                }
            }

            self.poll_keys()?;

            let running = components
                .iter()
                .any(|c| c.status() == ComponentStatus::Started);
            if !running {
                return Ok(flips);
            }

            let mut scene = Scene {
                visuals: components
                    .iter()
                    .filter(|c| c.is_drawing())
                    .map(|c| c.visual(flip_global))
                    .collect(),
                patch: self.patch,
            };
            on_frame(&info, &mut scene);
            self.surface.flip(&scene);
            flips += 1;
            frame += 1;
        }
    }
}

impl<S: Surface + std::fmt::Debug, C: Clock + std::fmt::Debug> std::fmt::Debug for RoutineScheduler<S, C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RoutineScheduler")
            .field("surface", &self.surface)
            .field("tolerance", &self.tolerance)
            .field("abort_key", &self.abort_key)
            .field("patch", &self.patch)
            .finish_non_exhaustive()
    }
}
