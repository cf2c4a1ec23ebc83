//! Color types and the few named colors the renderer uses.
//!
//! Colors are RGBA with `f32` components in [0.0, 1.0]. Per-element colors
//! handed to the primitive encoders carry alpha; an alpha below one makes the
//! element translucent.

pub use rgb::{Rgb, Rgba};

/// The color type used throughout the renderer. RGBA with f32 components in [0.0, 1.0].
pub type Color = Rgba<f32>;

/// An opaque color without alpha channel.
pub type ColorRgb = Rgb<f32>;

/// Black (0, 0, 0)
pub const BLACK: Color = Color::new(0.0, 0.0, 0.0, 1.0);

/// White (255, 255, 255)
pub const WHITE: Color = Color::new(1.0, 1.0, 1.0, 1.0);

/// Red (255, 0, 0)
pub const RED: Color = Color::new(1.0, 0.0, 0.0, 1.0);

/// Green (0, 255, 0)
pub const GREEN: Color = Color::new(0.0, 1.0, 0.0, 1.0);

/// Blue (0, 0, 255)
pub const BLUE: Color = Color::new(0.0, 0.0, 1.0, 1.0);

/// Fully transparent black, used as the "no background" color of text labels.
pub const TRANSPARENT: Color = Color::new(0.0, 0.0, 0.0, 0.0);

/// Converts a color to the `[f32; 4]` layout of the vertex buffers.
#[inline]
pub fn to_array(c: Color) -> [f32; 4] {
    [c.r, c.g, c.b, c.a]
}

/// Promotes an RGB color to an opaque RGBA color.
#[inline]
pub fn with_alpha(c: ColorRgb, alpha: f32) -> Color {
    Color::new(c.r, c.g, c.b, alpha)
}

/// Converts a color to 8-bit RGBA, clamping each channel.
pub fn to_rgba8(c: Color) -> [u8; 4] {
    let q = |v: f32| (v.clamp(0.0, 1.0) * 255.0).round() as u8;
    [q(c.r), q(c.g), q(c.b), q(c.a)]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rgba8_conversion_clamps() {
        assert_eq!(to_rgba8(Color::new(2.0, -1.0, 0.5, 1.0)), [255, 0, 128, 255]);
    }
}
