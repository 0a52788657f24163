pub mod component;
pub mod scene;
pub mod stage;
pub mod stimulus;

pub use component::{ComponentStatus, ComponentTiming, StimulusComponent};
pub use scene::{PatchState, Scene, Surface, Visual};
pub use stage::Stage;
pub use stimulus::{MovieStim, Presentable, Shape, ShapeStim, TextStim};
