use crate::scene::Visual;
use crate::stimulus::Presentable;
use serde::{Deserialize, Serialize};

/// Lifecycle of a component within one routine. Only ever moves forward.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ComponentStatus {
    #[default]
    NotStarted,
    Started,
    Finished,
}

/// Timestamps recorded by the frame loop. `t_*` are routine-relative,
/// `*_refresh` are absolute predicted flip times.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ComponentTiming {
    pub name: String,
    pub t_start: Option<f64>,
    pub t_start_refresh: Option<f64>,
    pub frame_start: Option<u64>,
    pub t_stop: Option<f64>,
    pub t_stop_refresh: Option<f64>,
    pub frame_stop: Option<u64>,
}

impl ComponentTiming {
    fn cleared(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Self::default()
        }
    }

    /// Presented length measured between the start and stop flips.
    pub fn presented_for(&self) -> Option<f64> {
        Some(self.t_stop_refresh? - self.t_start_refresh?)
    }
}

/// A presentable resource plus the bookkeeping the frame loop keeps for it.
#[derive(Debug)]
pub struct StimulusComponent {
    resource: Box<dyn Presentable>,
    status: ComponentStatus,
    timing: ComponentTiming,
    duration: Option<f64>,
}

impl StimulusComponent {
    pub fn new(resource: impl Presentable + 'static) -> Self {
        Self::from_boxed(Box::new(resource))
    }

    pub fn from_boxed(resource: Box<dyn Presentable>) -> Self {
        let timing = ComponentTiming::cleared(resource.name());
        Self {
            resource,
            status: ComponentStatus::NotStarted,
            timing,
            duration: None,
        }
    }

    /// Fixed presentation length overriding the resource's own length.
    pub fn with_duration(mut self, secs: f64) -> Self {
        self.duration = Some(secs);
        self
    }

    pub fn name(&self) -> &str {
        self.resource.name()
    }

    pub fn status(&self) -> ComponentStatus {
        self.status
    }

    pub fn timing(&self) -> &ComponentTiming {
        &self.timing
    }

    pub fn duration(&self) -> Option<f64> {
        self.duration
    }

    pub fn resource(&self) -> &dyn Presentable {
        self.resource.as_ref()
    }

    /// Clears all timing fields so the component can be run by a new routine.
    pub fn reset(&mut self) {
        self.status = ComponentStatus::NotStarted;
        self.timing = ComponentTiming::cleared(self.resource.name());
        self.resource.reset();
    }

    /// Length the frame loop should enforce: the component's own override,
    /// else the routine-wide duration.
    pub fn effective_duration(&self, routine: Option<f64>) -> Option<f64> {
        self.duration.or(routine)
    }

    /// Whether the component can ever reach `Finished` under `routine`.
    pub fn can_finish(&self, routine: Option<f64>) -> bool {
        self.effective_duration(routine).is_some() || self.resource.has_intrinsic_end()
    }

    /// NotStarted -> Started. Returns false if the component already started.
    pub fn start(&mut self, t: f64, frame: u64, flip_at: f64) -> bool {
        if self.status != ComponentStatus::NotStarted {
            return false;
        }
        self.timing.t_start = Some(t);
        self.timing.frame_start = Some(frame);
        self.timing.t_start_refresh = Some(flip_at);
        self.resource.activate(flip_at);
        self.status = ComponentStatus::Started;
        true
    }

    /// Started -> Finished. Returns false unless the component is running.
    pub fn finish(&mut self, t: f64, frame: u64, flip_at: f64) -> bool {
        if self.status != ComponentStatus::Started {
            return false;
        }
        let t_start = self.timing.t_start.unwrap_or(t);
        let start_refresh = self.timing.t_start_refresh.unwrap_or(flip_at);
        self.timing.t_stop = Some(t.max(t_start));
        self.timing.frame_stop = Some(frame);
        self.timing.t_stop_refresh = Some(flip_at.max(start_refresh));
        self.resource.deactivate();
        self.status = ComponentStatus::Finished;
        true
    }

    /// Stops drawing without touching lifecycle bookkeeping.
    pub fn stop_drawing(&mut self) {
        self.resource.deactivate();
    }

    pub fn is_drawing(&self) -> bool {
        self.resource.is_drawing()
    }

    pub fn visual(&self, at: f64) -> Visual {
        self.resource.visual(at)
    }
}
