//! Particle primitive: spheres, squares and boxes.

use crate::color::{self, Color, ColorRgb};
use crate::context::{Capabilities, DeviceSession};
use crate::error::{RenderError, Result};
use crate::renderer::frame_state::DrawCall;
use crate::renderer::pipeline::{BlendMode, ProgramPaths};
use crate::renderer::uniforms::{back_to_front_order, sort_direction};
use crate::renderer::{ParticleShape, Primitive, RenderingQuality, ShadingMode, ViewportSceneRenderer};
use crate::resource::{ChunkLayout, ElementTopology, GeometryBuffer, OwnedVertexLayout, PrimitiveRun, Texture};
use glamx::Vec3;
use std::cell::RefCell;
use std::rc::{Rc, Weak};

/// Bytes per vertex assumed when splitting particles into chunks: the size
/// of the widest attribute.
const CHUNK_VERTEX_SIZE: usize = 16;

/// How particle elements reach the screen.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum ParticleTechnique {
    /// Screen-aligned quads sized after the projected radius.
    Sprite,
    /// Camera-facing quads in view space.
    Imposter,
    /// The bounding cube, shaded as a cube or box or raytraced as a sphere.
    Cube,
}

impl ParticleTechnique {
    /// Chooses the technique for a particle set.
    ///
    /// Translucent particles never use sprites since their draw order is
    /// permuted through an index buffer.
    pub fn select(
        shading: ShadingMode,
        quality: RenderingQuality,
        shape: ParticleShape,
        translucent: bool,
        caps: &Capabilities,
    ) -> Self {
        let quad = if caps.point_sprites && !translucent {
            ParticleTechnique::Sprite
        } else {
            ParticleTechnique::Imposter
        };
        match shading {
            ShadingMode::Flat => quad,
            ShadingMode::Normal if shape == ParticleShape::Spherical && quality < RenderingQuality::High => quad,
            ShadingMode::Normal => ParticleTechnique::Cube,
        }
    }

    /// Corner vertices drawn per element.
    pub fn corners(self) -> u32 {
        match self {
            ParticleTechnique::Sprite | ParticleTechnique::Imposter => 6,
            ParticleTechnique::Cube => 14,
        }
    }

    /// The corner topology of a CPU-expanded element.
    pub fn topology(self) -> ElementTopology {
        match self {
            ParticleTechnique::Sprite | ParticleTechnique::Imposter => {
                ElementTopology::new(&[PrimitiveRun::List(6)])
            }
            ParticleTechnique::Cube => ElementTopology::new(&[PrimitiveRun::Strip(14)]),
        }
    }
}

/// The resolved rendering configuration of a particle primitive.
#[derive(Clone, Debug, PartialEq, Eq)]
struct ParticleSetup {
    technique: ParticleTechnique,
    /// One instance per element instead of CPU-replicated corners.
    instanced: bool,
    /// Whether the shader reads per-particle half extents.
    uses_shapes: bool,
    textured: bool,
    program: ProgramPaths,
    picking_program: ProgramPaths,
}

impl ParticleSetup {
    fn new(
        shading: ShadingMode,
        quality: RenderingQuality,
        shape: ParticleShape,
        translucent: bool,
        caps: &Capabilities,
    ) -> Self {
        let technique = ParticleTechnique::select(shading, quality, shape, translucent, caps);
        let expanded = caps.gpu_expansion && !translucent;

        match technique {
            ParticleTechnique::Sprite | ParticleTechnique::Imposter => {
                let file = "particles/imposter.wgsl";
                let round = shape == ParticleShape::Spherical;
                let textured = shading == ShadingMode::Normal && round;
                let fragment = match (shading, round) {
                    (ShadingMode::Flat, true) => "fs_flat",
                    (ShadingMode::Flat, false) => "fs_square",
                    (ShadingMode::Normal, _) if quality == RenderingQuality::Low => "fs_shaded",
                    (ShadingMode::Normal, _) => "fs_shaded_depth",
                };
                let picking = if round { "fs_picking" } else { "fs_picking_square" };
                let (expansion, instanced) = match technique {
                    ParticleTechnique::Sprite => (Some("vs_sprite"), true),
                    _ if expanded => (Some("vs_expanded"), true),
                    _ => (None, false),
                };
                ParticleSetup {
                    technique,
                    instanced,
                    uses_shapes: false,
                    textured,
                    program: ProgramPaths::new(file, "vs_main", fragment, expansion),
                    picking_program: ProgramPaths::new(file, "vs_main", picking, expansion),
                }
            }
            ParticleTechnique::Cube => {
                let file = "particles/cube.wgsl";
                let boxed = shape == ParticleShape::Box;
                let (vertex, expansion) = if boxed {
                    ("vs_box", "vs_box_expanded")
                } else {
                    ("vs_cube", "vs_cube_expanded")
                };
                let (fragment, picking) = if shape == ParticleShape::Spherical {
                    ("fs_sphere", "fs_sphere_picking")
                } else {
                    ("fs_cube", "fs_cube_picking")
                };
                let expansion = expanded.then_some(expansion);
                ParticleSetup {
                    technique,
                    instanced: expanded,
                    uses_shapes: boxed,
                    textured: false,
                    program: ProgramPaths::new(file, vertex, fragment, expansion),
                    picking_program: ProgramPaths::new(file, vertex, picking, expansion),
                }
            }
        }
    }

    /// Vertex records stored per particle.
    fn vertices_per_element(&self) -> usize {
        if self.instanced {
            1
        } else {
            self.technique.corners() as usize
        }
    }

    /// Corner topology of the draw. Instanced cubes are drawn as strips.
    fn draw_topology(&self) -> wgpu::PrimitiveTopology {
        if self.instanced && self.technique == ParticleTechnique::Cube {
            wgpu::PrimitiveTopology::TriangleStrip
        } else {
            wgpu::PrimitiveTopology::TriangleList
        }
    }

    fn layouts(&self) -> Vec<OwnedVertexLayout> {
        let step = if self.instanced {
            wgpu::VertexStepMode::Instance
        } else {
            wgpu::VertexStepMode::Vertex
        };
        let mut layouts = vec![OwnedVertexLayout::positions(0, step)];
        if !self.uses_shapes {
            layouts.push(OwnedVertexLayout::single(wgpu::VertexFormat::Float32, 1, step));
        }
        layouts.push(OwnedVertexLayout::colors(2, 4, step));
        if self.uses_shapes {
            layouts.push(OwnedVertexLayout::single(wgpu::VertexFormat::Float32x3, 3, step));
        }
        layouts
    }
}

/// The per-chunk attribute buffers.
struct ParticleChunk {
    positions: GeometryBuffer<Vec3>,
    radii: GeometryBuffer<f32>,
    colors: GeometryBuffer<[f32; 4]>,
    shapes: Option<GeometryBuffer<Vec3>>,
}

impl ParticleChunk {
    /// Vertex buffer slices in the slot order of the pipeline layouts.
    fn slices(&self) -> Option<Vec<wgpu::BufferSlice<'_>>> {
        let mut slices = vec![self.positions.buffer()?.slice(..)];
        if self.shapes.is_none() {
            slices.push(self.radii.buffer()?.slice(..));
        }
        slices.push(self.colors.buffer()?.slice(..));
        if let Some(shapes) = &self.shapes {
            slices.push(shapes.buffer()?.slice(..));
        }
        Some(slices)
    }
}

/// A set of particles with per-particle position, radius, color and
/// (for boxes) half extents.
///
/// The rendering technique is fixed at creation. Settings that would need a
/// different technique are refused by the `set_*` methods returning `false`,
/// and the caller is expected to create a new primitive.
pub struct ParticlePrimitive {
    session: Rc<DeviceSession>,
    self_ref: Weak<RefCell<ParticlePrimitive>>,
    shading: ShadingMode,
    quality: RenderingQuality,
    shape: ParticleShape,
    translucent: bool,
    setup: ParticleSetup,
    billboard: Option<Texture>,
    particle_count: usize,
    chunks: ChunkLayout,
    buffers: Vec<ParticleChunk>,
    chunk_indices: Option<GeometryBuffer<u32>>,
    default_radius: f32,
    sort_positions: Vec<Vec3>,
}

impl ParticlePrimitive {
    /// Creates an empty particle primitive and loads its shader programs.
    pub fn create(
        session: &Rc<DeviceSession>,
        shading: ShadingMode,
        quality: RenderingQuality,
        shape: ParticleShape,
        translucent: bool,
    ) -> Result<Rc<RefCell<Self>>> {
        let setup = ParticleSetup::new(shading, quality, shape, translucent, session.capabilities());
        setup.program.load(session)?;
        setup.picking_program.load(session)?;
        let billboard = if setup.textured {
            Some(Texture::billboard(session)?)
        } else {
            None
        };
        log::debug!("particle primitive uses {:?} (instanced: {})", setup.technique, setup.instanced);

        Ok(Rc::new_cyclic(|self_ref| {
            RefCell::new(ParticlePrimitive {
                session: session.clone(),
                self_ref: self_ref.clone(),
                shading,
                quality,
                shape,
                translucent,
                setup,
                billboard,
                particle_count: 0,
                chunks: ChunkLayout::single(0),
                buffers: Vec::new(),
                chunk_indices: None,
                default_radius: 0.5,
                sort_positions: Vec::new(),
            })
        }))
    }

    #[inline]
    pub fn technique(&self) -> ParticleTechnique {
        self.setup.technique
    }

    /// Whether elements are drawn as instances.
    #[inline]
    pub fn is_instanced(&self) -> bool {
        self.setup.instanced
    }

    #[inline]
    pub fn chunk_layout(&self) -> &ChunkLayout {
        &self.chunks
    }

    #[inline]
    pub fn is_translucent(&self) -> bool {
        self.translucent
    }

    /// Allocates storage for `particle_count` particles.
    pub fn set_size(&mut self, particle_count: usize) -> Result<()> {
        let vpe = self.setup.vertices_per_element();
        self.chunks = if self.translucent {
            ChunkLayout::single(particle_count)
        } else {
            ChunkLayout::new(
                particle_count,
                vpe,
                CHUNK_VERTEX_SIZE,
                self.session.config().max_particle_buffer_bytes,
            )
        };
        self.particle_count = particle_count;
        self.sort_positions.clear();

        let mut buffers = Vec::with_capacity(self.chunks.chunk_count());
        for (_, _, len) in self.chunks.chunks() {
            let mut chunk = ParticleChunk {
                positions: GeometryBuffer::new("particle_positions"),
                radii: GeometryBuffer::new("particle_radii"),
                colors: GeometryBuffer::new("particle_colors"),
                shapes: self.setup.uses_shapes.then(|| GeometryBuffer::new("particle_shapes")),
            };
            chunk.positions.create(&self.session, len, vpe)?;
            chunk.radii.create(&self.session, len, vpe)?;
            chunk.colors.create(&self.session, len, vpe)?;
            if let Some(shapes) = &mut chunk.shapes {
                shapes.create(&self.session, len, vpe)?;
            }
            chunk.radii.fill_constant(self.default_radius)?;
            buffers.push(chunk);
        }
        self.buffers = buffers;

        // Indexed cubes share one index pattern across chunks.
        self.chunk_indices = None;
        if !self.setup.instanced && self.setup.technique == ParticleTechnique::Cube {
            let topology = self.setup.technique.topology();
            let mut indices = GeometryBuffer::with_usage("particle_cube_indices", wgpu::BufferUsages::INDEX);
            let chunk_size = self.chunks.chunk_size();
            indices.create(&self.session, chunk_size, topology.indices_per_element() as usize)?;
            indices.map()?.copy_from_slice(&topology.indices_for(chunk_size));
            self.chunk_indices = Some(indices);
        }

        log::debug!(
            "particle buffer sized for {} particles in {} chunks",
            particle_count,
            self.chunks.chunk_count()
        );
        Ok(())
    }

    fn check_len(&self, what: &str, len: usize) -> Result<()> {
        if len < self.particle_count {
            return Err(RenderError::ResourceCreation(format!(
                "{} {} given for {} particles",
                len, what, self.particle_count
            )));
        }
        Ok(())
    }

    pub fn set_positions(&mut self, positions: &[Vec3]) -> Result<()> {
        self.check_len("positions", positions.len())?;
        for (c, start, len) in self.chunks.chunks() {
            self.buffers[c].positions.fill(&positions[start..start + len])?;
        }
        if self.translucent {
            self.sort_positions = positions[..self.particle_count].to_vec();
        }
        Ok(())
    }

    pub fn set_radii(&mut self, radii: &[f32]) -> Result<()> {
        self.check_len("radii", radii.len())?;
        for (c, start, len) in self.chunks.chunks() {
            self.buffers[c].radii.fill(&radii[start..start + len])?;
        }
        Ok(())
    }

    /// Gives every particle the same radius.
    pub fn set_radius(&mut self, radius: f32) -> Result<()> {
        self.default_radius = radius;
        for chunk in &mut self.buffers {
            chunk.radii.fill_constant(radius)?;
        }
        Ok(())
    }

    pub fn set_colors(&mut self, colors: &[Color]) -> Result<()> {
        self.check_len("colors", colors.len())?;
        let colors: Vec<[f32; 4]> = colors.iter().map(|c| color::to_array(*c)).collect();
        for (c, start, len) in self.chunks.chunks() {
            self.buffers[c].colors.fill(&colors[start..start + len])?;
        }
        Ok(())
    }

    /// Sets opaque colors.
    pub fn set_colors_rgb(&mut self, colors: &[ColorRgb]) -> Result<()> {
        let colors: Vec<Color> = colors.iter().map(|c| color::with_alpha(*c, 1.0)).collect();
        self.set_colors(&colors)
    }

    /// Gives every particle the same color.
    pub fn set_color(&mut self, color: Color) -> Result<()> {
        let value = color::to_array(color);
        for chunk in &mut self.buffers {
            chunk.colors.fill_constant(value)?;
        }
        Ok(())
    }

    /// Sets the half extents of box particles. A zero vector falls back to
    /// the particle's radius. Techniques without box geometry take the mean
    /// extent as radius instead.
    pub fn set_shapes(&mut self, shapes: &[Vec3]) -> Result<()> {
        self.check_len("shapes", shapes.len())?;
        for (c, start, len) in self.chunks.chunks() {
            let chunk = &mut self.buffers[c];
            let vpe = chunk.radii.vertices_per_element();
            let radii: Vec<f32> = (0..len).map(|i| chunk.radii.data()[i * vpe]).collect();
            let src = &shapes[start..start + len];
            match &mut chunk.shapes {
                Some(buffer) => {
                    let extents: Vec<Vec3> = src
                        .iter()
                        .zip(&radii)
                        .map(|(s, r)| if *s == Vec3::ZERO { Vec3::splat(*r) } else { *s })
                        .collect();
                    buffer.fill(&extents)?;
                }
                None => {
                    let means: Vec<f32> = src
                        .iter()
                        .zip(&radii)
                        .map(|(s, r)| if *s == Vec3::ZERO { *r } else { (s.x + s.y + s.z) / 3.0 })
                        .collect();
                    chunk.radii.fill(&means)?;
                }
            }
        }
        Ok(())
    }

    /// Returns `true` if the primitive already renders with `shading`.
    pub fn set_shading_mode(&mut self, shading: ShadingMode) -> bool {
        shading == self.shading
    }

    /// Returns `true` if the primitive already renders at `quality`.
    pub fn set_rendering_quality(&mut self, quality: RenderingQuality) -> bool {
        quality == self.quality
    }

    /// Returns `true` if the primitive already renders `shape`.
    pub fn set_particle_shape(&mut self, shape: ParticleShape) -> bool {
        shape == self.shape
    }

    #[inline]
    pub fn shading_mode(&self) -> ShadingMode {
        self.shading
    }

    #[inline]
    pub fn rendering_quality(&self) -> RenderingQuality {
        self.quality
    }

    #[inline]
    pub fn particle_shape(&self) -> ParticleShape {
        self.shape
    }
}

impl Primitive for ParticlePrimitive {
    fn is_valid(&self, renderer: &ViewportSceneRenderer) -> bool {
        let group = self.session.group();
        Rc::ptr_eq(group, renderer.session().group()) && !group.is_torn_down()
    }

    fn render(&mut self, renderer: &mut ViewportSceneRenderer) -> Result<()> {
        if self.particle_count == 0 {
            return Ok(());
        }
        if self.translucent && renderer.defer_translucent(self.self_ref.clone()) {
            return Ok(());
        }

        let picking = renderer.is_picking();
        let program = if picking {
            &self.setup.picking_program
        } else {
            &self.setup.program
        };
        let textured = self.setup.textured && !picking;
        let blend = if self.translucent && !picking {
            BlendMode::Translucent
        } else {
            BlendMode::Opaque
        };
        let key = renderer
            .pipeline_key(&program.id, self.setup.layouts(), !self.setup.instanced)?
            .topology(self.setup.draw_topology())
            .blend(blend)
            .textured(textured);
        let pipeline = renderer.pipeline(&key)?;

        let base_id = if picking {
            renderer.register_sub_object_ids(self.particle_count as u32)
        } else {
            0
        };
        let corners = self.setup.technique.corners();
        let vpe = self.setup.vertices_per_element() as u32;
        let uniforms = renderer.draw_uniforms();

        // Translucent particles live in one chunk and are drawn in sorted order.
        if self.translucent && !picking {
            let Some(buffers) = self.buffers.first().and_then(|c| c.slices()) else {
                return Ok(());
            };
            let order = if self.sort_positions.len() == self.particle_count {
                back_to_front_order(&self.sort_positions, sort_direction(&renderer.model_view_tm()))
            } else {
                (0..self.particle_count).collect()
            };
            let indices = self.setup.technique.topology().indices_in_order(order);
            let index_buffer = self.session.create_buffer_init(
                Some("particle_sorted_indices"),
                bytemuck::cast_slice(&indices),
                wgpu::BufferUsages::INDEX,
            )?;
            let mut call = DrawCall::new(pipeline, 0..0)
                .indexed(index_buffer.slice(..), 0..indices.len() as u32)
                .ordinals(self.particle_count as u32 * vpe);
            call.vertex_buffers = buffers;
            if let (true, Some(texture)) = (textured, &self.billboard) {
                call = call.texture(&texture.bind_group);
            }
            renderer.draw(&uniforms.with_ids(base_id, vpe, false, 0), call)?;
            renderer.retain_for_frame(Box::new(index_buffer));
            return Ok(());
        }

        for (c, start, len) in self.chunks.chunks() {
            let Some(buffers) = self.buffers[c].slices() else {
                continue;
            };
            let len = len as u32;
            let mut call = if self.setup.instanced {
                DrawCall::new(pipeline.clone(), 0..corners).instanced(0..len)
            } else {
                DrawCall::new(pipeline.clone(), 0..len * vpe).ordinals(len * vpe)
            };
            if let Some(indices) = self.chunk_indices.as_ref().and_then(|b| b.buffer()) {
                let per_element = self.setup.technique.topology().indices_per_element();
                call = call.indexed(indices.slice(..), 0..len * per_element);
            }
            call.vertex_buffers = buffers;
            if let (true, Some(texture)) = (textured, &self.billboard) {
                call = call.texture(&texture.bind_group);
            }
            let ids = uniforms.with_ids(base_id, vpe, self.setup.instanced, start as u32);
            renderer.draw(&ids, call)?;
        }
        Ok(())
    }

    fn element_count(&self) -> usize {
        self.particle_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builtin;

    fn caps(sprites: bool, expansion: bool) -> Capabilities {
        Capabilities {
            shader_tier: 150,
            core_profile: true,
            gpu_expansion: expansion,
            point_sprites: sprites,
            vertex_index_builtin: true,
            max_buffer_bytes: u64::MAX,
        }
    }

    #[test]
    fn technique_selection() {
        use ParticleShape::*;
        use RenderingQuality::*;
        use ShadingMode::*;
        let with_sprites = caps(true, true);
        let without = caps(false, true);

        assert_eq!(ParticleTechnique::select(Flat, High, Box, false, &with_sprites), ParticleTechnique::Sprite);
        assert_eq!(ParticleTechnique::select(Flat, High, Box, false, &without), ParticleTechnique::Imposter);
        assert_eq!(ParticleTechnique::select(Normal, Medium, Spherical, false, &with_sprites), ParticleTechnique::Sprite);
        assert_eq!(ParticleTechnique::select(Normal, High, Spherical, false, &with_sprites), ParticleTechnique::Cube);
        assert_eq!(ParticleTechnique::select(Normal, Low, Square, false, &with_sprites), ParticleTechnique::Cube);
        assert_eq!(ParticleTechnique::select(Normal, Low, Spherical, true, &with_sprites), ParticleTechnique::Imposter);
    }

    #[test]
    fn vertices_per_element_follow_technique() {
        use ParticleShape::*;
        let cpu = ParticleSetup::new(ShadingMode::Normal, RenderingQuality::Medium, Spherical, false, &caps(false, false));
        assert_eq!(cpu.vertices_per_element(), 6);
        assert!(cpu.textured);
        assert_eq!(cpu.program.fragment, builtin::path("particles/imposter.wgsl", "fs_shaded_depth"));

        let cube = ParticleSetup::new(ShadingMode::Normal, RenderingQuality::High, Spherical, false, &caps(false, false));
        assert_eq!(cube.vertices_per_element(), 14);
        assert_eq!(cube.draw_topology(), wgpu::PrimitiveTopology::TriangleList);

        let expanded = ParticleSetup::new(ShadingMode::Normal, RenderingQuality::High, Box, false, &caps(false, true));
        assert_eq!(expanded.vertices_per_element(), 1);
        assert!(expanded.uses_shapes);
        assert_eq!(expanded.draw_topology(), wgpu::PrimitiveTopology::TriangleStrip);
        assert_eq!(expanded.layouts().len(), 3);

        let sprite = ParticleSetup::new(ShadingMode::Flat, RenderingQuality::Low, Spherical, false, &caps(true, false));
        assert!(sprite.instanced);
        assert_eq!(sprite.vertices_per_element(), 1);
        assert!(!sprite.textured);
    }

    #[test]
    fn translucent_particles_are_not_instanced() {
        let setup = ParticleSetup::new(
            ShadingMode::Normal,
            RenderingQuality::High,
            ParticleShape::Spherical,
            true,
            &caps(true, true),
        );
        assert!(!setup.instanced);
        assert!(setup.program.expansion.is_none());
    }

    #[test]
    fn program_ids_distinguish_stages() {
        let a = ProgramPaths::new("particles/cube.wgsl", "vs_cube", "fs_cube", None);
        let b = ProgramPaths::new("particles/cube.wgsl", "vs_cube", "fs_cube", Some("vs_cube_expanded"));
        assert_ne!(a.id, b.id);
        assert!(builtin::has_entry(&a.vertex));
        assert!(builtin::has_entry(b.expansion.as_deref().unwrap()));
    }

    #[test]
    fn particle_chunking_scenario() {
        let layout = ChunkLayout::new(100_000, 6, 32, 4 * 1024 * 1024);
        let capacity = 4 * 1024 * 1024 / (32 * 6);
        assert_eq!(layout.chunk_count(), 100_000usize.div_ceil(capacity));
        assert!(layout.chunks().all(|(_, _, len)| len <= capacity));
    }
}
