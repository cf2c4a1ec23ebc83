//! The interface shared by all primitive encoders and the settings they are
//! created with.

use crate::error::Result;
use crate::renderer::ViewportSceneRenderer;

/// A buffer of renderable elements owned by a display object.
///
/// Implementors keep their GPU buffers between frames and are asked to draw
/// them once per frame. A primitive that needs blending defers itself to the
/// translucent pass of the renderer instead of drawing right away.
pub trait Primitive {
    /// Returns `true` if the buffers are filled and belong to the device
    /// session of `renderer`.
    fn is_valid(&self, renderer: &ViewportSceneRenderer) -> bool;

    /// Records the draw calls of this primitive into the current frame.
    fn render(&mut self, renderer: &mut ViewportSceneRenderer) -> Result<()>;

    /// Number of logical elements held by the primitive.
    fn element_count(&self) -> usize;
}

/// How the surfaces of particles and arrows are lit.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde-types", derive(serde::Serialize, serde::Deserialize))]
pub enum ShadingMode {
    /// Lit with a headlight.
    #[default]
    Normal,
    /// Uniformly colored, no lighting.
    Flat,
}

/// Trade-off between drawing speed and visual fidelity.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[cfg_attr(feature = "serde-types", derive(serde::Serialize, serde::Deserialize))]
pub enum RenderingQuality {
    Low,
    #[default]
    Medium,
    High,
}

/// Geometric shape of particles.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde-types", derive(serde::Serialize, serde::Deserialize))]
pub enum ParticleShape {
    #[default]
    Spherical,
    Square,
    /// Axis-aligned boxes with per-particle half extents.
    Box,
}

/// Geometric shape of arrow elements.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde-types", derive(serde::Serialize, serde::Deserialize))]
pub enum ArrowShape {
    /// A cylindrical shaft capped by a cone.
    #[default]
    Arrow,
    Cylinder,
}

#[cfg(all(test, feature = "serde-types"))]
mod tests {
    use super::*;

    #[derive(serde::Deserialize)]
    struct Settings {
        shading: ShadingMode,
        quality: RenderingQuality,
        shape: ParticleShape,
    }

    #[test]
    fn settings_deserialize_by_variant_name() {
        let s: Settings = toml::from_str("shading = \"Flat\"\nquality = \"High\"\nshape = \"Box\"\n").unwrap();
        assert_eq!(s.shading, ShadingMode::Flat);
        assert_eq!(s.quality, RenderingQuality::High);
        assert_eq!(s.shape, ParticleShape::Box);
    }
}
