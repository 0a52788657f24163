use serde::{Deserialize, Serialize};

/// What a drawing component contributes to a frame. Sizes are in normalised
/// window units (height of the window is 2.0).
#[derive(Debug, Clone, PartialEq)]
pub enum Visual {
    Movie { name: String, position: f64 },
    Cross { size: f32, color: [u8; 4] },
    Rect { width: f32, height: f32, color: [u8; 4] },
    Text { content: String, height: f32, color: [u8; 4] },
}

/// Photodiode patch drawn in the bottom-right corner of the subject display.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum PatchState {
    #[default]
    Hidden,
    /// Black rest state shown between stimuli.
    Off,
    On,
}

impl PatchState {
    pub fn toggled(self) -> Self {
        match self {
            PatchState::On => PatchState::Off,
            PatchState::Off | PatchState::Hidden => PatchState::On,
        }
    }

    pub fn is_on(self) -> bool {
        self == PatchState::On
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Scene {
    pub visuals: Vec<Visual>,
    pub patch: PatchState,
}

impl Scene {
    pub fn blank(patch: PatchState) -> Self {
        Self {
            visuals: Vec::new(),
            patch,
        }
    }
}

/// The presentation surface the frame loop drives.
///
/// `flip` blocks until the next display refresh boundary; that wait is the
/// only pacing the scheduler has.
pub trait Surface {
    /// Predicted absolute time (on the shared clock) of the next flip.
    fn next_flip_time(&self) -> f64;

    /// Presents `scene` and returns the absolute time of the flip.
    fn flip(&mut self, scene: &Scene) -> f64;

    /// Key names pressed since the previous call, oldest first.
    fn poll_keys(&mut self) -> Vec<String>;

    /// Audible cue for the dyad. Surfaces without audio ignore it.
    fn cue(&mut self) {}
}
