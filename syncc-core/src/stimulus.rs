use crate::scene::Visual;
use std::path::PathBuf;

/// Capability set every presentable resource exposes to the frame loop.
pub trait Presentable: Send + std::fmt::Debug {
    fn name(&self) -> &str;

    /// Rewinds the resource so it can be presented again.
    fn reset(&mut self) {
        self.deactivate();
    }

    /// Begins drawing on every flip from `at` (absolute flip time) onwards.
    fn activate(&mut self, at: f64);

    fn deactivate(&mut self);

    fn is_drawing(&self) -> bool;

    /// Whether the resource can report its own completion.
    fn has_intrinsic_end(&self) -> bool {
        false
    }

    /// The resource's completion signal, evaluated at absolute time `at`.
    fn is_finished(&self, _at: f64) -> bool {
        false
    }

    fn visual(&self, at: f64) -> Visual;
}

/// A movie treated as an opaque timed resource: only its length matters here.
#[derive(Debug, Clone)]
pub struct MovieStim {
    name: String,
    source: PathBuf,
    duration: f64,
    started_at: Option<f64>,
    drawing: bool,
}

impl MovieStim {
    pub fn new(name: impl Into<String>, source: impl Into<PathBuf>, duration: f64) -> Self {
        Self {
            name: name.into(),
            source: source.into(),
            duration,
            started_at: None,
            drawing: false,
        }
    }

    pub fn source(&self) -> &PathBuf {
        &self.source
    }

    /// Seconds of content played at `at`, clamped to the movie length.
    pub fn position(&self, at: f64) -> f64 {
        self.started_at
            .map_or(0.0, |s| (at - s).clamp(0.0, self.duration))
    }
}

impl Presentable for MovieStim {
    fn name(&self) -> &str {
        &self.name
    }

    fn reset(&mut self) {
        self.started_at = None;
        self.drawing = false;
    }

    fn activate(&mut self, at: f64) {
        self.started_at.get_or_insert(at);
        self.drawing = true;
    }

    fn deactivate(&mut self) {
        self.drawing = false;
    }

    fn is_drawing(&self) -> bool {
        self.drawing
    }

    fn has_intrinsic_end(&self) -> bool {
        true
    }

    fn is_finished(&self, at: f64) -> bool {
        self.started_at.is_some_and(|s| at >= s + self.duration)
    }

    fn visual(&self, at: f64) -> Visual {
        Visual::Movie {
            name: self.name.clone(),
            position: self.position(at),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Shape {
    FixationCross { size: f32, color: [u8; 4] },
    Rect { width: f32, height: f32, color: [u8; 4] },
}

/// Static shape with no end of its own; routines give it a duration.
#[derive(Debug, Clone)]
pub struct ShapeStim {
    name: String,
    shape: Shape,
    drawing: bool,
}

impl ShapeStim {
    pub fn new(name: impl Into<String>, shape: Shape) -> Self {
        Self {
            name: name.into(),
            shape,
            drawing: false,
        }
    }

    pub fn fixation_cross() -> Self {
        Self::new(
            "cross",
            Shape::FixationCross {
                size: 0.1,
                color: [0, 0, 0, 255],
            },
        )
    }
}

impl Presentable for ShapeStim {
    fn name(&self) -> &str {
        &self.name
    }

    fn activate(&mut self, _at: f64) {
        self.drawing = true;
    }

    fn deactivate(&mut self) {
        self.drawing = false;
    }

    fn is_drawing(&self) -> bool {
        self.drawing
    }

    fn visual(&self, _at: f64) -> Visual {
        match &self.shape {
            Shape::FixationCross { size, color } => Visual::Cross {
                size: *size,
                color: *color,
            },
            Shape::Rect {
                width,
                height,
                color,
            } => Visual::Rect {
                width: *width,
                height: *height,
                color: *color,
            },
        }
    }
}

#[derive(Debug, Clone)]
pub struct TextStim {
    name: String,
    content: String,
    height: f32,
    color: [u8; 4],
    drawing: bool,
}

impl TextStim {
    pub fn new(name: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            content: content.into(),
            height: 0.1,
            color: [255, 255, 255, 255],
            drawing: false,
        }
    }

    pub fn set_text(&mut self, content: impl Into<String>) {
        self.content = content.into();
    }
}

impl Presentable for TextStim {
    fn name(&self) -> &str {
        &self.name
    }

    fn activate(&mut self, _at: f64) {
        self.drawing = true;
    }

    fn deactivate(&mut self) {
        self.drawing = false;
    }

    fn is_drawing(&self) -> bool {
        self.drawing
    }

    fn visual(&self, _at: f64) -> Visual {
        Visual::Text {
            content: self.content.clone(),
            height: self.height,
            color: self.color,
        }
    }
}
