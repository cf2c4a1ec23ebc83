//! Turns particle properties into a particle primitive.

use crate::color::{self, Color};
use crate::display::CacheHelper;
use crate::error::Result;
use crate::renderer::{
    ParticlePrimitive, ParticleShape, Primitive, RenderingQuality, ShadingMode, ViewportSceneRenderer,
};
use glamx::Vec3;
use std::cell::RefCell;
use std::rc::Rc;

/// A per-particle property together with a revision counter that changes
/// whenever its contents change.
#[derive(Copy, Clone, Debug)]
pub struct Property<'a, T> {
    pub data: &'a [T],
    pub revision: u64,
}

impl<'a, T> Property<'a, T> {
    pub fn new(data: &'a [T], revision: u64) -> Self {
        Property { data, revision }
    }
}

/// Particle data handed to [`ParticleDisplay::render`].
#[derive(Copy, Clone, Debug)]
pub struct ParticleData<'a> {
    pub positions: Property<'a, Vec3>,
    pub radii: Option<Property<'a, f32>>,
    pub colors: Option<Property<'a, Color>>,
    /// Per-particle transparency in [0, 1]; makes the primitive translucent.
    pub transparency: Option<Property<'a, f32>>,
    /// Half extents of aspherical particles.
    pub shapes: Option<Property<'a, Vec3>>,
}

impl<'a> ParticleData<'a> {
    pub fn new(positions: &'a [Vec3], revision: u64) -> Self {
        ParticleData {
            positions: Property::new(positions, revision),
            radii: None,
            colors: None,
            transparency: None,
            shapes: None,
        }
    }
}

fn revision<T>(p: &Option<Property<'_, T>>) -> Option<u64> {
    p.as_ref().map(|p| p.revision)
}

/// Quality picked for `count` particles when none is set explicitly.
pub fn automatic_quality(count: usize, interactive: bool) -> RenderingQuality {
    if count < 2000 || !interactive {
        RenderingQuality::High
    } else if count < 100_000 {
        RenderingQuality::Medium
    } else {
        RenderingQuality::Low
    }
}

/// Keeps a particle primitive in sync with particle data.
pub struct ParticleDisplay {
    pub shading: ShadingMode,
    /// `None` picks the quality from the particle count.
    pub quality: Option<RenderingQuality>,
    pub shape: ParticleShape,
    pub default_radius: f32,
    pub default_color: Color,
    /// Identifies this display in picking records.
    pub owner: u64,
    primitive: Option<Rc<RefCell<ParticlePrimitive>>>,
    positions_cache: CacheHelper<u64>,
    radii_cache: CacheHelper<(Option<u64>, u32)>,
    colors_cache: CacheHelper<(Option<u64>, Option<u64>, [u32; 4])>,
    shapes_cache: CacheHelper<Option<u64>>,
}

impl ParticleDisplay {
    pub fn new(owner: u64) -> Self {
        ParticleDisplay {
            shading: ShadingMode::Normal,
            quality: None,
            shape: ParticleShape::Spherical,
            default_radius: 0.5,
            default_color: Color::new(0.97, 0.97, 0.97, 1.0),
            owner,
            primitive: None,
            positions_cache: CacheHelper::new(),
            radii_cache: CacheHelper::new(),
            colors_cache: CacheHelper::new(),
            shapes_cache: CacheHelper::new(),
        }
    }

    /// The primitive built by the last call to [`render`](Self::render).
    pub fn primitive(&self) -> Option<&Rc<RefCell<ParticlePrimitive>>> {
        self.primitive.as_ref()
    }

    /// Shape actually rendered: squares with shape data become boxes.
    fn effective_shape(&self, data: &ParticleData<'_>) -> ParticleShape {
        if self.shape == ParticleShape::Square && data.shapes.is_some() && self.shading == ShadingMode::Normal {
            ParticleShape::Box
        } else {
            self.shape
        }
    }

    /// Updates what changed since the last call and draws the particles.
    pub fn render(&mut self, renderer: &mut ViewportSceneRenderer, data: &ParticleData<'_>) -> Result<()> {
        let count = data.positions.data.len();
        let quality = self
            .quality
            .unwrap_or_else(|| automatic_quality(count, renderer.is_interactive()));
        let shape = self.effective_shape(data);
        let translucent = data.transparency.is_some();

        let mut recreate = true;
        if let Some(primitive) = &self.primitive {
            let mut p = primitive.borrow_mut();
            recreate = !p.is_valid(renderer)
                || !p.set_shading_mode(self.shading)
                || !p.set_rendering_quality(quality)
                || !p.set_particle_shape(shape)
                || p.is_translucent() != translucent;
        }
        let resize = recreate
            || self
                .primitive
                .as_ref()
                .is_some_and(|p| p.borrow().element_count() != count);

        let update_positions = self.positions_cache.update_state(data.positions.revision) || resize;
        let update_radii = self
            .radii_cache
            .update_state((revision(&data.radii), self.default_radius.to_bits()))
            || resize;
        let update_colors = self.colors_cache.update_state((
            revision(&data.colors),
            revision(&data.transparency),
            color::to_array(self.default_color).map(f32::to_bits),
        )) || resize;
        let shapes = if shape == ParticleShape::Box { data.shapes } else { None };
        let update_shapes = self.shapes_cache.update_state(revision(&shapes)) || resize;

        if recreate {
            log::debug!("creating particle primitive for {} particles", count);
            self.primitive = Some(renderer.create_particle_primitive(self.shading, quality, shape, translucent)?);
        }
        let Some(primitive) = self.primitive.clone() else {
            return Ok(());
        };

        {
            let mut p = primitive.borrow_mut();
            if resize {
                p.set_size(count)?;
            }
            if count > 0 {
                if update_positions {
                    p.set_positions(data.positions.data)?;
                }
                if update_radii {
                    match &data.radii {
                        Some(radii) => p.set_radii(radii.data)?,
                        None => p.set_radius(self.default_radius)?,
                    }
                }
                if update_colors {
                    p.set_colors(&particle_colors(data, self.default_color, count))?;
                }
                if update_shapes {
                    if let Some(shapes) = &shapes {
                        p.set_shapes(shapes.data)?;
                    }
                }
            }
        }

        renderer.begin_pick_object(self.owner);
        let result = primitive.borrow_mut().render(renderer);
        renderer.end_pick_object();
        result
    }
}

/// Effective colors: explicit colors or the default color, with alpha taken
/// from the transparency property.
pub fn particle_colors(data: &ParticleData<'_>, default_color: Color, count: usize) -> Vec<Color> {
    let mut colors: Vec<Color> = match &data.colors {
        Some(c) => (0..count)
            .map(|i| c.data.get(i).copied().unwrap_or(default_color))
            .collect(),
        None => vec![default_color; count],
    };
    if let Some(t) = &data.transparency {
        for (c, t) in colors.iter_mut().zip(t.data) {
            c.a = 1.0 - t.clamp(0.0, 1.0);
        }
    }
    colors
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn automatic_quality_thresholds() {
        assert_eq!(automatic_quality(10, true), RenderingQuality::High);
        assert_eq!(automatic_quality(5_000, true), RenderingQuality::Medium);
        assert_eq!(automatic_quality(500_000, true), RenderingQuality::Low);
        assert_eq!(automatic_quality(500_000, false), RenderingQuality::High);
    }

    #[test]
    fn transparency_sets_alpha() {
        let positions = [Vec3::ZERO; 3];
        let transparency = [0.0, 0.25, 1.0];
        let mut data = ParticleData::new(&positions, 1);
        data.transparency = Some(Property::new(&transparency, 1));
        let colors = particle_colors(&data, color::RED, 3);
        assert_eq!(colors.iter().map(|c| c.a).collect::<Vec<_>>(), vec![1.0, 0.75, 0.0]);
        assert_eq!(colors[1].r, 1.0);
    }

    #[test]
    fn squares_with_shapes_become_boxes() {
        let positions = [Vec3::ZERO];
        let shapes = [Vec3::ONE];
        let mut display = ParticleDisplay::new(1);
        display.shape = ParticleShape::Square;
        let mut data = ParticleData::new(&positions, 1);
        assert_eq!(display.effective_shape(&data), ParticleShape::Square);
        data.shapes = Some(Property::new(&shapes, 1));
        assert_eq!(display.effective_shape(&data), ParticleShape::Box);
        display.shading = ShadingMode::Flat;
        assert_eq!(display.effective_shape(&data), ParticleShape::Square);
    }
}
