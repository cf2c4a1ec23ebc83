//! Font loading and text rasterization for viewport labels.
//!
//! Labels are laid out with `rusttype` and rasterized into an RGBA image on
//! the CPU; the image is then drawn through an
//! [`ImagePrimitive`](crate::renderer::ImagePrimitive).

use crate::color::{self, Color};
use crate::error::{RenderError, Result};
use glamx::Vec2;
use image::RgbaImage;
use std::path::Path;
use std::sync::Arc;

bitflags! {
    /// Where a label sits relative to its anchor point.
    ///
    /// Horizontal and vertical flags combine; a missing axis defaults to
    /// left or top.
    #[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Default)]
    #[cfg_attr(feature = "serde-types", derive(serde::Serialize, serde::Deserialize))]
    pub struct TextAlignment: u32 {
        const LEFT = 0x01;
        const RIGHT = 0x02;
        const HCENTER = 0x04;
        const TOP = 0x20;
        const BOTTOM = 0x40;
        const VCENTER = 0x80;
    }
}

impl TextAlignment {
    /// Top-left corner of a `size` box placed at `anchor`, in window
    /// coordinates (y pointing down).
    pub fn top_left(self, anchor: Vec2, size: Vec2) -> Vec2 {
        let x = if self.contains(TextAlignment::RIGHT) {
            anchor.x - size.x
        } else if self.contains(TextAlignment::HCENTER) {
            anchor.x - size.x * 0.5
        } else {
            anchor.x
        };
        let y = if self.contains(TextAlignment::BOTTOM) {
            anchor.y - size.y
        } else if self.contains(TextAlignment::VCENTER) {
            anchor.y - size.y * 0.5
        } else {
            anchor.y
        };
        Vec2::new(x, y)
    }
}

/// A TrueType font.
pub struct Font {
    font: rusttype::Font<'static>,
}

impl Font {
    /// Parses a font from the raw contents of a `.ttf` or `.otf` file.
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Arc<Font>> {
        rusttype::Font::try_from_vec(bytes)
            .map(|font| Arc::new(Font { font }))
            .ok_or_else(|| RenderError::ResourceCreation("font data could not be parsed".to_string()))
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Arc<Font>> {
        let path = path.as_ref();
        let bytes = std::fs::read(path).map_err(|e| {
            RenderError::ResourceCreation(format!("cannot read font `{}`: {}", path.display(), e))
        })?;
        Self::from_bytes(bytes)
    }

    #[inline]
    pub fn font(&self) -> &rusttype::Font<'static> {
        &self.font
    }
}

/// Blends `src` with coverage `coverage` over `dst`.
pub fn blend_over(dst: [u8; 4], src: Color, coverage: f32) -> [u8; 4] {
    let d = [dst[0], dst[1], dst[2], dst[3]].map(|v| v as f32 / 255.0);
    let sa = (src.a * coverage).clamp(0.0, 1.0);
    let out_a = sa + d[3] * (1.0 - sa);
    if out_a <= 0.0 {
        return [0; 4];
    }
    let channel = |s: f32, d_c: f32| (s * sa + d_c * d[3] * (1.0 - sa)) / out_a;
    color::to_rgba8(Color::new(
        channel(src.r, d[0]),
        channel(src.g, d[1]),
        channel(src.b, d[2]),
        out_a,
    ))
}

/// Rasterizes `text` at `px` pixels per em. Lines are separated by `\n`.
///
/// The image is at least one pixel in each direction; pixels not covered by a
/// glyph keep `background`.
pub fn rasterize(font: &Font, px: f32, text: &str, color: Color, background: Color) -> RgbaImage {
    let scale = rusttype::Scale::uniform(px);
    let vmetrics = font.font().v_metrics(scale);
    let line_height = vmetrics.ascent - vmetrics.descent + vmetrics.line_gap;

    let mut glyphs = Vec::new();
    let mut width = 0.0f32;
    let mut vshift = 0.0;
    let mut lines = 0;
    for line in text.lines() {
        let origin = rusttype::point(0.0, vmetrics.ascent + vshift);
        vshift += line_height;
        lines += 1;
        for glyph in font.font().layout(line, scale, origin) {
            let right = glyph.position().x + glyph.unpositioned().h_metrics().advance_width;
            width = width.max(right);
            if let Some(bb) = glyph.pixel_bounding_box() {
                width = width.max(bb.max.x as f32);
            }
            glyphs.push(glyph);
        }
    }

    let w = (width.ceil() as u32).max(1);
    let h = ((line_height * lines as f32).ceil() as u32).max(1);
    let mut image = RgbaImage::from_pixel(w, h, image::Rgba(color::to_rgba8(background)));
    for glyph in &glyphs {
        let Some(bb) = glyph.pixel_bounding_box() else {
            continue;
        };
        glyph.draw(|x, y, coverage| {
            let px = x as i32 + bb.min.x;
            let py = y as i32 + bb.min.y;
            if px < 0 || py < 0 || px >= w as i32 || py >= h as i32 {
                return;
            }
            let pixel = image.get_pixel_mut(px as u32, py as u32);
            pixel.0 = blend_over(pixel.0, color, coverage);
        });
    }
    image
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alignment_moves_the_box() {
        let anchor = Vec2::new(100.0, 50.0);
        let size = Vec2::new(40.0, 10.0);
        assert_eq!(TextAlignment::default().top_left(anchor, size), anchor);
        assert_eq!(
            (TextAlignment::RIGHT | TextAlignment::BOTTOM).top_left(anchor, size),
            Vec2::new(60.0, 40.0)
        );
        assert_eq!(
            (TextAlignment::HCENTER | TextAlignment::VCENTER).top_left(anchor, size),
            Vec2::new(80.0, 45.0)
        );
    }

    #[test]
    fn blending() {
        let white = Color::new(1.0, 1.0, 1.0, 1.0);
        assert_eq!(blend_over([0, 0, 0, 255], white, 1.0), [255, 255, 255, 255]);
        assert_eq!(blend_over([0, 0, 0, 255], white, 0.0), [0, 0, 0, 255]);
        // Over a transparent background the color stays, only alpha drops.
        assert_eq!(blend_over([0, 0, 0, 0], white, 0.5), [255, 255, 255, 128]);
    }

    #[test]
    fn invalid_font_data_is_rejected() {
        assert!(Font::from_bytes(vec![0, 1, 2, 3]).is_err());
    }

    #[test]
    fn rasterized_text_has_ink() {
        let Ok(font) = Font::from_file("/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf") else {
            eprintln!("no system font available, skipping");
            return;
        };
        let one = rasterize(&font, 16.0, "Ag", color::WHITE, color::TRANSPARENT);
        let two = rasterize(&font, 16.0, "Ag\nAg", color::WHITE, color::TRANSPARENT);
        assert!(one.width() > 8);
        assert!(two.height() > one.height());
        assert!(one.pixels().any(|p| p.0[3] > 200));
    }
}
