//! Bounding box overlay
//!
//! [`OverlayRenderer`] paints one frame's predictions onto a
//! [`DrawingSurface`]. Each call clears the whole surface first, so boxes
//! from a previous frame never survive into the next one. Predictions are
//! painted in list order; later boxes land on top of earlier ones.
//!
//! For every prediction the renderer draws:
//! 1. a stroked rectangle at the prediction's box
//! 2. a filled label background as wide as the measured label plus padding
//! 3. the label text, anchored at the box's top-left corner

use crate::types::{Prediction, Resolution};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing::trace;

mod display_list;

pub use display_list::{DisplayList, DrawCommand};

/// An RGBA color, parsed from and printed as `#rrggbb` or `#rrggbbaa`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl Color {
    pub const fn rgb(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b, a: 255 }
    }

    pub const WHITE: Color = Color::rgb(0xff, 0xff, 0xff);
    pub const INDIGO: Color = Color::rgb(0x81, 0x8c, 0xf8);
}

impl FromStr for Color {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let hex = s
            .strip_prefix('#')
            .ok_or_else(|| format!("color must start with '#': {s}"))?;
        if !hex.is_ascii() || (hex.len() != 6 && hex.len() != 8) {
            return Err(format!("color must be #rrggbb or #rrggbbaa: {s}"));
        }
        let channel = |i: usize| {
            u8::from_str_radix(&hex[i..i + 2], 16).map_err(|e| format!("invalid color {s}: {e}"))
        };
        let a = if hex.len() == 8 { channel(6)? } else { 255 };
        Ok(Color {
            r: channel(0)?,
            g: channel(2)?,
            b: channel(4)?,
            a,
        })
    }
}

impl TryFrom<String> for Color {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Color> for String {
    fn from(color: Color) -> Self {
        color.to_string()
    }
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{:02x}{:02x}{:02x}", self.r, self.g, self.b)?;
        if self.a != 255 {
            write!(f, "{:02x}", self.a)?;
        }
        Ok(())
    }
}

/// Font used for labels.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Font {
    pub size_px: f32,
    pub family: String,
}

impl fmt::Display for Font {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}px {}", self.size_px, self.family)
    }
}

/// Fixed look of the overlay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OverlayStyle {
    /// Box outline and label background color
    pub color: Color,
    /// Box outline width in pixels
    pub line_width: f32,
    /// Label font size in pixels
    pub font_px: f32,
    pub font_family: String,
    pub text_color: Color,
    /// Added to the measured label width
    pub label_padding_x: f32,
    /// Added to the font size for the label background height
    pub label_padding_y: f32,
}

impl Default for OverlayStyle {
    fn default() -> Self {
        Self {
            color: Color::INDIGO,
            line_width: 4.0,
            font_px: 16.0,
            font_family: "sans-serif".to_string(),
            text_color: Color::WHITE,
            label_padding_x: 7.0,
            label_padding_y: 4.0,
        }
    }
}

impl OverlayStyle {
    pub fn font(&self) -> Font {
        Font {
            size_px: self.font_px,
            family: self.font_family.clone(),
        }
    }
}

/// A 2D drawing target laid over the video.
///
/// Text is positioned by its top-left corner.
pub trait DrawingSurface: Send {
    fn size(&self) -> Resolution;
    fn resize(&mut self, size: Resolution);

    /// Erase the whole surface.
    fn clear(&mut self);

    fn set_stroke_style(&mut self, color: Color, line_width: f32);
    fn set_fill_style(&mut self, color: Color);
    fn set_font(&mut self, font: &Font);

    fn stroke_rect(&mut self, x: f32, y: f32, width: f32, height: f32);
    fn fill_rect(&mut self, x: f32, y: f32, width: f32, height: f32);
    fn measure_text_width(&self, text: &str) -> f32;
    fn fill_text(&mut self, text: &str, x: f32, y: f32);
}

/// Paints predictions onto a surface. Holds no per-frame state.
#[derive(Debug, Clone, Default)]
pub struct OverlayRenderer {
    style: OverlayStyle,
}

impl OverlayRenderer {
    pub fn new(style: OverlayStyle) -> Self {
        Self { style }
    }

    pub fn style(&self) -> &OverlayStyle {
        &self.style
    }

    /// Size the surface to match the video frames it will be laid over.
    pub fn fit(&self, surface: &mut dyn DrawingSurface, resolution: Resolution) {
        if surface.size() != resolution {
            surface.resize(resolution);
        }
    }

    /// Clear the surface and draw every prediction in order.
    pub fn draw(&self, surface: &mut dyn DrawingSurface, predictions: &[Prediction]) {
        surface.clear();
        surface.set_font(&self.style.font());

        for prediction in predictions {
            let b = &prediction.bbox;
            trace!(
                "Drawing {} ({:.2}) at {},{} {}x{}",
                prediction.label,
                prediction.confidence,
                b.x,
                b.y,
                b.width,
                b.height
            );

            surface.set_stroke_style(self.style.color, self.style.line_width);
            surface.stroke_rect(b.x, b.y, b.width, b.height);

            surface.set_fill_style(self.style.color);
            let text_width = surface.measure_text_width(&prediction.label);
            surface.fill_rect(
                b.x,
                b.y,
                text_width + self.style.label_padding_x,
                self.style.font_px + self.style.label_padding_y,
            );

            surface.set_fill_style(self.style.text_color);
            surface.fill_text(&prediction.label, b.x, b.y);
        }
    }
}
