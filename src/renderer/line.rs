//! Line segment primitive.

use crate::color::{self, Color};
use crate::context::DeviceSession;
use crate::error::Result;
use crate::renderer::frame_state::DrawCall;
use crate::renderer::pipeline::{BlendMode, DepthMode, ProgramPaths};
use crate::renderer::{Primitive, ViewportSceneRenderer};
use crate::resource::{GeometryBuffer, OwnedVertexLayout};
use glamx::Vec3;
use std::cell::RefCell;
use std::rc::Rc;

/// Index pattern of the quad expanded from segment `s`.
pub fn thick_segment_indices(s: u32) -> [u32; 6] {
    let b = 4 * s;
    [b, b + 1, b + 2, b, b + 2, b + 3]
}

/// Per-vertex advance vectors of a thick segment from `p0` to `p1`. The
/// vertex shader offsets each corner perpendicular to this vector.
pub fn thick_segment_advance(p0: Vec3, p1: Vec3) -> [Vec3; 4] {
    let d = p1 - p0;
    [d, -d, -d, d]
}

struct ThinBuffers {
    positions: GeometryBuffer<Vec3>,
    colors: GeometryBuffer<[f32; 4]>,
}

struct ThickBuffers {
    positions: GeometryBuffer<Vec3>,
    advance: GeometryBuffer<Vec3>,
    colors: GeometryBuffer<[f32; 4]>,
    indices: GeometryBuffer<u32>,
}

/// A set of line segments, each made of two consecutive vertices.
///
/// Lines one pixel wide are drawn as hardware lines. Wider lines, and all
/// lines drawn for picking, are expanded into camera-facing quads.
pub struct LinePrimitive {
    session: Rc<DeviceSession>,
    thin_program: ProgramPaths,
    thick_program: ProgramPaths,
    thick_picking_program: ProgramPaths,
    width: f32,
    depth_test: bool,
    positions: Vec<Vec3>,
    colors: Vec<[f32; 4]>,
    thin: Option<ThinBuffers>,
    thick: Option<ThickBuffers>,
}

impl LinePrimitive {
    pub fn create(session: &Rc<DeviceSession>) -> Result<Rc<RefCell<Self>>> {
        let file = "lines/line.wgsl";
        let thin_program = ProgramPaths::new(file, "vs_thin", "fs_main", None);
        let thick_program = ProgramPaths::new(file, "vs_thick", "fs_main", None);
        let thick_picking_program = ProgramPaths::new(file, "vs_thick", "fs_picking", None);
        for program in [&thin_program, &thick_program, &thick_picking_program] {
            program.load(session)?;
        }
        Ok(Rc::new(RefCell::new(LinePrimitive {
            session: session.clone(),
            thin_program,
            thick_program,
            thick_picking_program,
            width: 1.0,
            depth_test: true,
            positions: Vec::new(),
            colors: Vec::new(),
            thin: None,
            thick: None,
        })))
    }

    /// Allocates `count` vertices drawn `width` pixels wide. The count must be
    /// even.
    pub fn set_vertex_count(&mut self, count: usize, width: f32) -> Result<()> {
        debug_assert!(count % 2 == 0, "line vertex count must be even");
        let count = count - count % 2;
        self.width = width.max(1.0);
        self.positions = vec![Vec3::ZERO; count];
        self.colors = vec![[1.0; 4]; count];
        self.thin = None;
        self.thick = None;
        Ok(())
    }

    #[inline]
    pub fn vertex_count(&self) -> usize {
        self.positions.len()
    }

    #[inline]
    pub fn line_width(&self) -> f32 {
        self.width
    }

    #[inline]
    pub fn segment_count(&self) -> usize {
        self.positions.len() / 2
    }

    /// Whether segments are drawn as quads outside picking frames.
    #[inline]
    pub fn is_thick(&self) -> bool {
        self.width > 1.0
    }

    pub fn set_vertex_positions(&mut self, positions: &[Vec3]) -> Result<()> {
        let n = self.positions.len().min(positions.len());
        self.positions[..n].copy_from_slice(&positions[..n]);
        self.thin = None;
        self.thick = None;
        Ok(())
    }

    pub fn set_vertex_colors(&mut self, colors: &[Color]) -> Result<()> {
        for (dst, c) in self.colors.iter_mut().zip(colors) {
            *dst = color::to_array(*c);
        }
        self.thin = None;
        self.thick = None;
        Ok(())
    }

    /// Gives all vertices the same color.
    pub fn set_line_color(&mut self, color: Color) -> Result<()> {
        self.colors.fill(color::to_array(color));
        self.thin = None;
        self.thick = None;
        Ok(())
    }

    /// Lines without depth test are drawn over everything else.
    pub fn set_depth_test(&mut self, enabled: bool) {
        self.depth_test = enabled;
    }

    fn has_alpha(&self) -> bool {
        self.colors.iter().any(|c| c[3] < 1.0)
    }

    fn thin_buffers(&mut self) -> Result<&ThinBuffers> {
        let buffers = match self.thin.take() {
            Some(buffers) => buffers,
            None => {
                let n = self.positions.len();
                let mut positions = GeometryBuffer::new("line_positions");
                positions.create(&self.session, n, 1)?;
                positions.fill(&self.positions)?;
                let mut colors = GeometryBuffer::new("line_colors");
                colors.create(&self.session, n, 1)?;
                colors.fill(&self.colors)?;
                ThinBuffers { positions, colors }
            }
        };
        Ok(self.thin.insert(buffers))
    }

    fn thick_buffers(&mut self) -> Result<&ThickBuffers> {
        let buffers = match self.thick.take() {
            Some(buffers) => buffers,
            None => self.build_thick_buffers()?,
        };
        Ok(self.thick.insert(buffers))
    }

    fn build_thick_buffers(&self) -> Result<ThickBuffers> {
        let n = self.positions.len();
        let segments = n / 2;

        // Every vertex becomes two quad corners.
        let mut positions = GeometryBuffer::new("thick_line_positions");
        positions.create(&self.session, n, 2)?;
        positions.fill(&self.positions)?;
        let mut colors = GeometryBuffer::new("thick_line_colors");
        colors.create(&self.session, n, 2)?;
        colors.fill(&self.colors)?;

        let mut advance = GeometryBuffer::new("thick_line_advance");
        advance.create(&self.session, segments, 4)?;
        {
            let mut out = advance.map()?;
            for (s, quad) in out.chunks_exact_mut(4).enumerate() {
                quad.copy_from_slice(&thick_segment_advance(self.positions[2 * s], self.positions[2 * s + 1]));
            }
        }

        let mut indices = GeometryBuffer::with_usage("thick_line_indices", wgpu::BufferUsages::INDEX);
        indices.create(&self.session, segments, 6)?;
        {
            let mut out = indices.map()?;
            for (s, quad) in out.chunks_exact_mut(6).enumerate() {
                quad.copy_from_slice(&thick_segment_indices(s as u32));
            }
        }
        Ok(ThickBuffers {
            positions,
            advance,
            colors,
            indices,
        })
    }
}

impl Primitive for LinePrimitive {
    fn is_valid(&self, renderer: &ViewportSceneRenderer) -> bool {
        let group = self.session.group();
        Rc::ptr_eq(group, renderer.session().group()) && !group.is_torn_down()
    }

    fn render(&mut self, renderer: &mut ViewportSceneRenderer) -> Result<()> {
        let segments = self.segment_count() as u32;
        if segments == 0 {
            return Ok(());
        }
        let picking = renderer.is_picking();
        let blend = if self.has_alpha() && !picking {
            BlendMode::Translucent
        } else {
            BlendMode::Opaque
        };
        let depth = if self.depth_test {
            DepthMode::Test
        } else {
            DepthMode::Disabled
        };
        let base_id = if picking {
            renderer.register_sub_object_ids(segments)
        } else {
            0
        };
        let uniforms = renderer.draw_uniforms();

        if !picking && !self.is_thick() {
            let program = self.thin_program.id.clone();
            let layouts = vec![
                OwnedVertexLayout::positions(0, wgpu::VertexStepMode::Vertex),
                OwnedVertexLayout::colors(1, 4, wgpu::VertexStepMode::Vertex),
            ];
            let key = renderer
                .pipeline_key(&program, layouts, true)?
                .topology(wgpu::PrimitiveTopology::LineList)
                .blend(blend)
                .depth(depth);
            let pipeline = renderer.pipeline(&key)?;
            let buffers = self.thin_buffers()?;
            let (Some(positions), Some(colors)) = (buffers.positions.slice(), buffers.colors.slice()) else {
                return Ok(());
            };
            let call = DrawCall::new(pipeline, 0..2 * segments)
                .vertex_buffer(positions)
                .vertex_buffer(colors)
                .ordinals(2 * segments);
            return renderer.draw(&uniforms.with_ids(base_id, 2, false, 0), call);
        }

        let width = if picking {
            renderer.default_line_picking_width().max(self.width)
        } else {
            self.width
        };
        let program = if picking {
            self.thick_picking_program.id.clone()
        } else {
            self.thick_program.id.clone()
        };
        let layouts = vec![
            OwnedVertexLayout::positions(0, wgpu::VertexStepMode::Vertex),
            OwnedVertexLayout::single(wgpu::VertexFormat::Float32x3, 1, wgpu::VertexStepMode::Vertex),
            OwnedVertexLayout::colors(2, 4, wgpu::VertexStepMode::Vertex),
        ];
        let key = renderer
            .pipeline_key(&program, layouts, true)?
            .blend(blend)
            .depth(depth);
        let pipeline = renderer.pipeline(&key)?;
        let buffers = self.thick_buffers()?;
        let (Some(positions), Some(advance), Some(colors), Some(indices)) = (
            buffers.positions.slice(),
            buffers.advance.slice(),
            buffers.colors.slice(),
            buffers.indices.slice(),
        ) else {
            return Ok(());
        };
        let call = DrawCall::new(pipeline, 0..0)
            .vertex_buffer(positions)
            .vertex_buffer(advance)
            .vertex_buffer(colors)
            .indexed(indices, 0..6 * segments)
            .ordinals(4 * segments);
        renderer.draw(&uniforms.with_ids(base_id, 4, false, 0).with_line_width(width), call)
    }

    fn element_count(&self) -> usize {
        self.segment_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn thick_index_pattern() {
        assert_eq!(thick_segment_indices(0), [0, 1, 2, 0, 2, 3]);
        assert_eq!(thick_segment_indices(3), [12, 13, 14, 12, 14, 15]);
    }

    #[test]
    fn advance_flips_on_lower_edge() {
        let a = thick_segment_advance(Vec3::ZERO, Vec3::new(1.0, 2.0, 0.0));
        assert_eq!(a[0], Vec3::new(1.0, 2.0, 0.0));
        assert_eq!(a[3], a[0]);
        assert_eq!(a[1], -a[0]);
        assert_eq!(a[2], a[1]);
    }

    #[test]
    fn quad_covers_both_endpoints() {
        // Corners 4s, 4s+1 duplicate the first endpoint, 4s+2, 4s+3 the second.
        let idx = thick_segment_indices(0);
        let first = idx.iter().filter(|i| **i < 2).count();
        let second = idx.iter().filter(|i| **i >= 2).count();
        assert_eq!((first, second), (3, 3));
    }
}
