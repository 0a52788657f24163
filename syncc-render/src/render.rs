use ab_glyph::{point, Font, FontVec, Glyph, PxScale, ScaleFont};
use anyhow::{anyhow, bail, Context, Result};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use syncc_core::{PatchState, Scene, Visual};
use syncc_timing::{CalibrationStats, FrameIntervals};
use tiny_skia::{Color, Paint, Pixmap, PixmapPaint, Rect, Transform};
use tracing::debug;

/// Window background: mid grey, so both patch states stand out from it.
pub const BACKGROUND: [u8; 4] = [128, 128, 128, 255];

/// Photodiode patch height in normalised units (the window is 2.0 tall).
const PATCH_SIZE: f32 = 0.1;
const PATCH_ASPECT: f32 = 9.0 / 16.0;

/// Movie placeholder: a dark 16:9 panel filling most of the window height.
const MOVIE_HEIGHT: f32 = 1.6;
const MOVIE_COLOR: [u8; 4] = [24, 24, 24, 255];

fn color(c: [u8; 4]) -> Color {
    Color::from_rgba8(c[0], c[1], c[2], c[3])
}

fn paint(c: [u8; 4]) -> Paint<'static> {
    let mut p = Paint::default();
    p.anti_alias = false;
    p.set_color(color(c));
    p
}

/// Rasterises `text` into a tight transparent pixmap. Returns `None` for text
/// with no visible glyphs.
fn render_text_pixmap<F: Font>(text: &str, font_size: f32, font: &F, c: [u8; 4]) -> Option<Pixmap> {
    let scale = PxScale::from(font_size);
    let sf = font.as_scaled(scale);

    let mut pen_x = 0.0f32;
    let mut glyphs = Vec::<Glyph>::new();
    for ch in text.chars() {
        let id = font.glyph_id(ch);
        if let Some(prev) = glyphs.last() {
            pen_x += sf.kern(prev.id, id);
        }
        glyphs.push(Glyph {
            id,
            scale,
            position: point(pen_x, sf.ascent()),
        });
        pen_x += sf.h_advance(id);
    }

    let outlines: Vec<_> = glyphs
        .into_iter()
        .filter_map(|g| font.outline_glyph(g))
        .collect();
    let (min_x, min_y, max_x, max_y) = outlines.iter().map(|o| o.px_bounds()).fold(
        (f32::INFINITY, f32::INFINITY, f32::NEG_INFINITY, f32::NEG_INFINITY),
        |(x0, y0, x1, y1), b| (x0.min(b.min.x), y0.min(b.min.y), x1.max(b.max.x), y1.max(b.max.y)),
    );
    if outlines.is_empty() {
        return None;
    }

    let w = (max_x.ceil() - min_x.floor()).max(1.0) as u32;
    let h = (max_y.ceil() - min_y.floor()).max(1.0) as u32;
    let mut pm = Pixmap::new(w, h)?;
    let dst = pm.pixels_mut();

    for out in &outlines {
        let b = out.px_bounds();
        out.draw(|x, y, cov| {
            if cov <= f32::EPSILON {
                return;
            }
            let ix = (x as f32 + b.min.x - min_x).floor() as i64;
            let iy = (y as f32 + b.min.y - min_y).floor() as i64;
            if ix < 0 || iy < 0 || ix >= w as i64 || iy >= h as i64 {
                return;
            }
            let i = iy as usize * w as usize + ix as usize;

            // Premultiplied source over whatever overlapping glyphs left.
            let a = (cov * c[3] as f32 / 255.0).clamp(0.0, 1.0);
            let inv = 1.0 - a;
            let bg = dst[i];
            let mix = |s: u8, d: u8| ((s as f32 * a) as u8).saturating_add((d as f32 * inv) as u8);
            let r = mix(c[0], bg.red());
            let g = mix(c[1], bg.green());
            let bl = mix(c[2], bg.blue());
            let al = ((a * 255.0) as u8).saturating_add((bg.alpha() as f32 * inv) as u8);
            if let Some(px) = tiny_skia::PremultipliedColorU8::from_rgba(r, g, bl, al) {
                dst[i] = px;
            }
        });
    }
    Some(pm)
}

/// Text, pixel size and colour of a rendered string.
type TextKey = (String, u32, [u8; 4]);

#[derive(Default)]
struct PixmapCache {
    map: HashMap<TextKey, Arc<Pixmap>>,
}

impl PixmapCache {
    fn get_or_insert_with(
        &mut self,
        key: TextKey,
        render: impl FnOnce() -> Option<Pixmap>,
    ) -> Option<Arc<Pixmap>> {
        if let Some(p) = self.map.get(&key) {
            return Some(Arc::clone(p));
        }
        let pm = Arc::new(render()?);
        self.map.insert(key, Arc::clone(&pm));
        Some(pm)
    }
}

struct TextCache {
    font: FontVec,
    pixmaps: PixmapCache,
}

impl TextCache {
    fn get_or_render(&mut self, text: &str, size_px: u32, c: [u8; 4]) -> Option<Arc<Pixmap>> {
        let font = &self.font;
        self.pixmaps
            .get_or_insert_with((text.to_string(), size_px, c), || {
                render_text_pixmap(text, size_px as f32, font, c)
            })
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RenderStats {
    pub draw: Duration,
    pub copy: Duration,
    pub total: Duration,
}

/// Software rasteriser for the subject display. Draws one [`Scene`] per
/// frame into an RGBA framebuffer of the window's size.
pub struct SceneRenderer {
    width: u32,
    height: u32,
    canvas: Pixmap,
    text: Option<TextCache>,
    draw_times: FrameIntervals,
}

impl SceneRenderer {
    pub fn new(width: u32, height: u32) -> Result<Self> {
        let mut canvas = Pixmap::new(width, height)
            .ok_or_else(|| anyhow!("cannot allocate a {width}x{height} canvas"))?;
        canvas.fill(color(BACKGROUND));
        Ok(Self {
            width,
            height,
            canvas,
            text: None,
            draw_times: FrameIntervals::new(600),
        })
    }

    /// Enables text drawing with the TrueType/OpenType font at `path`.
    /// Without a font, text visuals are skipped.
    pub fn with_font_file(mut self, path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path).with_context(|| format!("reading font {}", path.display()))?;
        let font = FontVec::try_from_vec(bytes)
            .map_err(|e| anyhow!("invalid font {}: {e}", path.display()))?;
        self.text = Some(TextCache {
            font,
            pixmaps: PixmapCache::default(),
        });
        Ok(self)
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn canvas(&self) -> &Pixmap {
        &self.canvas
    }

    pub fn resize(&mut self, width: u32, height: u32) -> Result<()> {
        let mut canvas = Pixmap::new(width, height)
            .ok_or_else(|| anyhow!("cannot allocate a {width}x{height} canvas"))?;
        canvas.fill(color(BACKGROUND));
        self.canvas = canvas;
        self.width = width;
        self.height = height;
        if let Some(text) = &mut self.text {
            text.pixmaps.map.clear();
        }
        debug!(width, height, "renderer resized");
        Ok(())
    }

    /// Pixels per normalised unit.
    fn unit(&self) -> f32 {
        self.height as f32 / 2.0
    }

    fn centred(&self, w: f32, h: f32) -> Option<Rect> {
        let (cx, cy) = (self.width as f32 / 2.0, self.height as f32 / 2.0);
        Rect::from_xywh(cx - w / 2.0, cy - h / 2.0, w.max(1.0), h.max(1.0))
    }

    /// Where the photodiode patch sits: flush with the bottom-right corner.
    pub fn patch_rect(&self) -> Option<Rect> {
        let h = (PATCH_SIZE * self.unit()).round().max(1.0);
        let w = (PATCH_SIZE * PATCH_ASPECT * self.width as f32 / 2.0).round().max(1.0);
        Rect::from_xywh(self.width as f32 - w, self.height as f32 - h, w, h)
    }

    fn draw_visual(&mut self, visual: &Visual) {
        let unit = self.unit();
        match visual {
            Visual::Movie { name, .. } => {
                let h = MOVIE_HEIGHT * unit;
                if let Some(r) = self.centred(h * 16.0 / 9.0, h) {
                    self.canvas.fill_rect(r, &paint(MOVIE_COLOR), Transform::identity(), None);
                }
                self.draw_text(name, 0.08, [200, 200, 200, 255]);
            }
            Visual::Cross { size, color } => {
                let extent = size * unit;
                let thickness = (extent / 20.0).max(2.0);
                let p = paint(*color);
                if let Some(r) = self.centred(extent, thickness) {
                    self.canvas.fill_rect(r, &p, Transform::identity(), None);
                }
                if let Some(r) = self.centred(thickness, extent) {
                    self.canvas.fill_rect(r, &p, Transform::identity(), None);
                }
            }
            Visual::Rect {
                width,
                height,
                color,
            } => {
                if let Some(r) = self.centred(width * unit, height * unit) {
                    self.canvas.fill_rect(r, &paint(*color), Transform::identity(), None);
                }
            }
            Visual::Text {
                content,
                height,
                color,
            } => self.draw_text(content, *height, *color),
        }
    }

    fn draw_text(&mut self, content: &str, height: f32, c: [u8; 4]) {
        let size_px = (height * self.unit()).round().max(1.0) as u32;
        let Some(cache) = &mut self.text else {
            return;
        };
        let Some(pm) = cache.get_or_render(content, size_px, c) else {
            return;
        };
        let x = (self.width as i32 - pm.width() as i32) / 2;
        let y = (self.height as i32 - pm.height() as i32) / 2;
        self.canvas.draw_pixmap(
            x,
            y,
            Pixmap::as_ref(&pm),
            &PixmapPaint::default(),
            Transform::identity(),
            None,
        );
    }

    fn draw_patch(&mut self, patch: PatchState) {
        let c = match patch {
            PatchState::Hidden => return,
            PatchState::Off => [0, 0, 0, 255],
            PatchState::On => [255, 255, 255, 255],
        };
        if let Some(r) = self.patch_rect() {
            self.canvas.fill_rect(r, &paint(c), Transform::identity(), None);
        }
    }

    /// Draws `scene` and copies it into `frame`, which must be
    /// `width * height * 4` bytes of RGBA.
    pub fn render(&mut self, scene: &Scene, frame: &mut [u8]) -> Result<RenderStats> {
        let expected = self.width as usize * self.height as usize * 4;
        if frame.len() != expected {
            bail!(
                "framebuffer is {} bytes, expected {expected} for {}x{}",
                frame.len(),
                self.width,
                self.height
            );
        }

        let start = Instant::now();
        self.canvas.fill(color(BACKGROUND));
        for visual in &scene.visuals {
            self.draw_visual(visual);
        }
        self.draw_patch(scene.patch);
        let draw = start.elapsed();

        // The canvas is opaque, so premultiplied and straight RGBA coincide.
        let copy_start = Instant::now();
        frame.copy_from_slice(self.canvas.data());
        let copy = copy_start.elapsed();

        self.draw_times.record_frame(draw);
        Ok(RenderStats {
            draw,
            copy,
            total: start.elapsed(),
        })
    }

    /// Draw-time statistics over the most recent frames.
    pub fn draw_stats(&self) -> CalibrationStats {
        self.draw_times.calibration_stats()
    }
}
