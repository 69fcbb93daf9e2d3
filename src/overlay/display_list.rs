use super::{Color, DrawingSurface, Font};
use crate::types::Resolution;
use serde::Serialize;

/// Advance of one glyph as a fraction of the font size.
const GLYPH_ADVANCE: f32 = 0.6;

/// One recorded drawing operation, with the style that was active for it.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum DrawCommand {
    StrokeRect {
        x: f32,
        y: f32,
        width: f32,
        height: f32,
        color: Color,
        line_width: f32,
    },
    FillRect {
        x: f32,
        y: f32,
        width: f32,
        height: f32,
        color: Color,
    },
    FillText {
        text: String,
        x: f32,
        y: f32,
        color: Color,
        font: String,
    },
}

/// A surface that records draw commands instead of rasterizing them.
///
/// Only the commands drawn since the last clear are kept, so the list never
/// holds more than one frame. The presentation layer replays
/// [`DisplayList::visible`] onto whatever it actually paints with. Text is
/// measured with a fixed per-glyph advance.
#[derive(Debug, Clone)]
pub struct DisplayList {
    size: Resolution,
    commands: Vec<DrawCommand>,
    clears: usize,
    stroke: (Color, f32),
    fill: Color,
    font: Font,
}

impl DisplayList {
    pub fn new(size: Resolution) -> Self {
        Self {
            size,
            commands: Vec::new(),
            clears: 0,
            stroke: (Color::rgb(0, 0, 0), 1.0),
            fill: Color::rgb(0, 0, 0),
            font: Font {
                size_px: 10.0,
                family: "sans-serif".to_string(),
            },
        }
    }

    /// Commands drawn since the last clear; what is on screen now.
    pub fn visible(&self) -> &[DrawCommand] {
        &self.commands
    }

    /// Number of box outlines currently on screen.
    pub fn visible_boxes(&self) -> usize {
        self.count(|c| matches!(c, DrawCommand::StrokeRect { .. }))
    }

    /// Number of times the surface has been cleared, one per rendered frame.
    pub fn clear_count(&self) -> usize {
        self.clears
    }

    /// Count on-screen commands matching `predicate`.
    pub fn count(&self, predicate: impl Fn(&DrawCommand) -> bool) -> usize {
        self.commands.iter().filter(|c| predicate(c)).count()
    }
}

impl DrawingSurface for DisplayList {
    fn size(&self) -> Resolution {
        self.size
    }

    fn resize(&mut self, size: Resolution) {
        self.size = size;
    }

    fn clear(&mut self) {
        self.commands.clear();
        self.clears += 1;
    }

    fn set_stroke_style(&mut self, color: Color, line_width: f32) {
        self.stroke = (color, line_width);
    }

    fn set_fill_style(&mut self, color: Color) {
        self.fill = color;
    }

    fn set_font(&mut self, font: &Font) {
        self.font = font.clone();
    }

    fn stroke_rect(&mut self, x: f32, y: f32, width: f32, height: f32) {
        let (color, line_width) = self.stroke;
        self.commands.push(DrawCommand::StrokeRect {
            x,
            y,
            width,
            height,
            color,
            line_width,
        });
    }

    fn fill_rect(&mut self, x: f32, y: f32, width: f32, height: f32) {
        self.commands.push(DrawCommand::FillRect {
            x,
            y,
            width,
            height,
            color: self.fill,
        });
    }

    fn measure_text_width(&self, text: &str) -> f32 {
        text.chars().count() as f32 * self.font.size_px * GLYPH_ADVANCE
    }

    fn fill_text(&mut self, text: &str, x: f32, y: f32) {
        self.commands.push(DrawCommand::FillText {
            text: text.to_string(),
            x,
            y,
            color: self.fill,
            font: self.font.to_string(),
        });
    }
}
