pub mod render;

pub use render::{RenderStats, SceneRenderer, BACKGROUND};
