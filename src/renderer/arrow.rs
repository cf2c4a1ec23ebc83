//! Arrow and cylinder primitive.

use crate::color::{self, Color};
use crate::context::{Capabilities, DeviceSession};
use crate::error::Result;
use crate::renderer::frame_state::DrawCall;
use crate::renderer::pipeline::{BlendMode, ProgramPaths};
use crate::renderer::{ArrowShape, Primitive, RenderingQuality, ShadingMode, ViewportSceneRenderer};
use crate::resource::{ChunkLayout, ElementTopology, GeometryBuffer, OwnedVertexLayout, PrimitiveRun};
use bytemuck::{Pod, Zeroable};
use glamx::Vec3;
use std::cell::RefCell;
use std::f32::consts::PI;
use std::rc::{Rc, Weak};

/// Ratio between the cone radius and the shaft radius.
pub const ARROW_HEAD_RADIUS_FACTOR: f32 = 2.5;
/// Ratio between the cone length and the cone radius.
pub const ARROW_HEAD_LENGTH_FACTOR: f32 = 1.8;

/// Corner order of the raytraced bounding box as a triangle strip.
const BOX_STRIP: [usize; 14] = [3, 2, 6, 7, 4, 2, 0, 3, 1, 6, 5, 4, 1, 0];

/// An orthonormal frame around an element axis.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct LocalFrame {
    /// Unit vector along the axis.
    pub t: Vec3,
    pub u: Vec3,
    pub v: Vec3,
    pub length: f32,
}

/// Builds the frame of an element pointing along `dir`.
///
/// A zero direction yields an all-zero frame.
pub fn local_frame(dir: Vec3) -> LocalFrame {
    let length = dir.length();
    if length == 0.0 {
        return LocalFrame {
            t: Vec3::ZERO,
            u: Vec3::ZERO,
            v: Vec3::ZERO,
            length,
        };
    }
    let t = dir / length;
    let mut u = if dir.x.abs() < 1e-6 && dir.y.abs() < 1e-6 {
        Vec3::new(-dir.z, 0.0, dir.x)
    } else {
        Vec3::new(dir.y, -dir.x, 0.0)
    };
    u = u.normalize_or_zero();
    let v = u.cross(t);
    LocalFrame { t, u, v, length }
}

/// Geometry of an arrow of the given length and shaft width.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct ArrowHead {
    /// Length of the cylindrical shaft.
    pub shaft_length: f32,
    pub shaft_radius: f32,
    pub head_length: f32,
    pub head_radius: f32,
}

/// Splits an arrow into shaft and cone. Arrows shorter than the cone shrink
/// to a scaled-down cone.
pub fn arrow_head(length: f32, width: f32) -> ArrowHead {
    let head_radius = width * ARROW_HEAD_RADIUS_FACTOR;
    let head_length = head_radius * ARROW_HEAD_LENGTH_FACTOR;
    if length > head_length {
        ArrowHead {
            shaft_length: length - head_length,
            shaft_radius: width,
            head_length,
            head_radius,
        }
    } else {
        let scale = if head_length > 0.0 { length / head_length } else { 0.0 };
        ArrowHead {
            shaft_length: 0.0,
            shaft_radius: width * scale,
            head_length: length,
            head_radius: head_radius * scale,
        }
    }
}

/// Vertex of the tessellated mesh.
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct ShadedVertex {
    pub position: [f32; 3],
    pub normal: [f32; 3],
    pub color: [f32; 4],
}

/// Vertex of a flat outline, expanded against the view direction.
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct FlatVertex {
    /// x: distance along the axis, y: across it.
    pub position: [f32; 3],
    pub base: [f32; 3],
    pub dir: [f32; 3],
    pub color: [f32; 4],
}

/// Corner of the bounding box of a raytraced cylinder.
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct BoxVertex {
    pub position: [f32; 3],
    pub base: [f32; 3],
    pub dir: [f32; 3],
    pub color: [f32; 4],
    pub radius: f32,
}

/// How arrow elements are turned into triangles.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum ArrowTechnique {
    /// Tessellated cylinders and cones with per-vertex normals.
    Shaded,
    /// A 2D outline facing the viewer.
    Flat,
    /// A bounding box whose fragments raytrace the cylinder.
    Raytraced,
}

impl ArrowTechnique {
    pub fn select(shape: ArrowShape, shading: ShadingMode, quality: RenderingQuality) -> Self {
        match (shading, shape) {
            (ShadingMode::Flat, _) => ArrowTechnique::Flat,
            (ShadingMode::Normal, ArrowShape::Cylinder) if quality == RenderingQuality::High => {
                ArrowTechnique::Raytraced
            }
            (ShadingMode::Normal, _) => ArrowTechnique::Shaded,
        }
    }
}

/// The runs making up one element.
pub fn element_runs(technique: ArrowTechnique, shape: ArrowShape, segments: u32) -> Vec<PrimitiveRun> {
    let ring = 2 * (segments + 1);
    match (technique, shape) {
        (ArrowTechnique::Shaded, ArrowShape::Arrow) => vec![
            PrimitiveRun::Strip(ring),
            PrimitiveRun::Strip(ring),
            PrimitiveRun::Fan(segments),
            PrimitiveRun::Fan(segments),
        ],
        (ArrowTechnique::Shaded, ArrowShape::Cylinder) => vec![
            PrimitiveRun::Strip(ring),
            PrimitiveRun::Fan(segments),
            PrimitiveRun::Fan(segments),
        ],
        (ArrowTechnique::Flat, ArrowShape::Arrow) => vec![PrimitiveRun::Fan(7)],
        (ArrowTechnique::Flat, ArrowShape::Cylinder) => vec![PrimitiveRun::Fan(4)],
        (ArrowTechnique::Raytraced, _) => vec![PrimitiveRun::Strip(14)],
    }
}

/// Unit circle samples, `segments + 1` entries so the last equals the first.
pub fn circle_tables(segments: u32) -> (Vec<f32>, Vec<f32>) {
    (0..=segments)
        .map(|i| {
            let angle = 2.0 * PI * i as f32 / segments as f32;
            (angle.cos(), angle.sin())
        })
        .unzip()
}

enum ArrowBuffers {
    Shaded(Vec<GeometryBuffer<ShadedVertex>>),
    Flat(Vec<GeometryBuffer<FlatVertex>>),
    Raytraced(Vec<GeometryBuffer<BoxVertex>>),
}

impl ArrowBuffers {
    fn upload(&self, chunk: usize) {
        match self {
            ArrowBuffers::Shaded(b) => b[chunk].upload(),
            ArrowBuffers::Flat(b) => b[chunk].upload(),
            ArrowBuffers::Raytraced(b) => b[chunk].upload(),
        }
    }

    fn bytes(&self, chunk: usize) -> Option<&[u8]> {
        match self {
            ArrowBuffers::Shaded(b) => b.get(chunk).map(|b| bytemuck::cast_slice(b.data())),
            ArrowBuffers::Flat(b) => b.get(chunk).map(|b| bytemuck::cast_slice(b.data())),
            ArrowBuffers::Raytraced(b) => b.get(chunk).map(|b| bytemuck::cast_slice(b.data())),
        }
    }

    fn slice(&self, chunk: usize) -> Option<wgpu::BufferSlice<'_>> {
        match self {
            ArrowBuffers::Shaded(b) => b[chunk].slice(),
            ArrowBuffers::Flat(b) => b[chunk].slice(),
            ArrowBuffers::Raytraced(b) => b[chunk].slice(),
        }
    }
}

/// A set of arrows or cylinders, one per element.
///
/// Elements are written between [`start_set_elements`](Self::start_set_elements)
/// and [`ArrowElements::end_set_elements`]. Oversized sets are split into
/// chunks; only the chunk being written is held for upload at any time.
pub struct ArrowPrimitive {
    session: Rc<DeviceSession>,
    self_ref: Weak<RefCell<ArrowPrimitive>>,
    shape: ArrowShape,
    shading: ShadingMode,
    quality: RenderingQuality,
    technique: ArrowTechnique,
    instanced: bool,
    program: ProgramPaths,
    picking_program: ProgramPaths,
    segments: u32,
    element_count: usize,
    chunks: ChunkLayout,
    buffers: ArrowBuffers,
    topology: ElementTopology,
    indices: Option<GeometryBuffer<u32>>,
    cos_table: Vec<f32>,
    sin_table: Vec<f32>,
    has_alpha: bool,
}

fn arrow_programs(technique: ArrowTechnique, instanced: bool) -> (ProgramPaths, ProgramPaths) {
    match technique {
        ArrowTechnique::Shaded => (
            ProgramPaths::new("arrows/shaded.wgsl", "vs_main", "fs_main", None),
            ProgramPaths::new("arrows/shaded.wgsl", "vs_main", "fs_picking", None),
        ),
        ArrowTechnique::Flat => (
            ProgramPaths::new("arrows/flat.wgsl", "vs_main", "fs_main", None),
            ProgramPaths::new("arrows/flat.wgsl", "vs_main", "fs_picking", None),
        ),
        ArrowTechnique::Raytraced => {
            let expansion = instanced.then_some("vs_expanded");
            (
                ProgramPaths::new("cylinder/raytraced.wgsl", "vs_main", "fs_main", expansion),
                ProgramPaths::new("cylinder/raytraced.wgsl", "vs_main", "fs_picking", expansion),
            )
        }
    }
}

impl ArrowPrimitive {
    /// Creates an empty primitive and loads its shader programs.
    pub fn create(
        session: &Rc<DeviceSession>,
        shape: ArrowShape,
        shading: ShadingMode,
        quality: RenderingQuality,
    ) -> Result<Rc<RefCell<Self>>> {
        let technique = ArrowTechnique::select(shape, shading, quality);
        let instanced = Self::uses_instancing(technique, session.capabilities());
        let (program, picking_program) = arrow_programs(technique, instanced);
        program.load(session)?;
        picking_program.load(session)?;

        let segments = session.config().cylinder_segments;
        let topology = ElementTopology::new(&element_runs(technique, shape, segments));
        let buffers = match technique {
            ArrowTechnique::Shaded => ArrowBuffers::Shaded(Vec::new()),
            ArrowTechnique::Flat => ArrowBuffers::Flat(Vec::new()),
            ArrowTechnique::Raytraced => ArrowBuffers::Raytraced(Vec::new()),
        };

        Ok(Rc::new_cyclic(|self_ref| {
            RefCell::new(ArrowPrimitive {
                session: session.clone(),
                self_ref: self_ref.clone(),
                shape,
                shading,
                quality,
                technique,
                instanced,
                program,
                picking_program,
                segments,
                element_count: 0,
                chunks: ChunkLayout::single(0),
                buffers,
                topology,
                indices: None,
                cos_table: Vec::new(),
                sin_table: Vec::new(),
                has_alpha: false,
            })
        }))
    }

    fn uses_instancing(technique: ArrowTechnique, caps: &Capabilities) -> bool {
        technique == ArrowTechnique::Raytraced && caps.gpu_expansion
    }

    #[inline]
    pub fn technique(&self) -> ArrowTechnique {
        self.technique
    }

    #[inline]
    pub fn chunk_layout(&self) -> &ChunkLayout {
        &self.chunks
    }

    /// Host copy of the vertex records of `chunk`, as last written. The
    /// record type follows the technique: [`ShadedVertex`], [`FlatVertex`]
    /// or [`BoxVertex`].
    pub fn chunk_bytes(&self, chunk: usize) -> Option<&[u8]> {
        self.buffers.bytes(chunk)
    }

    /// Vertex records stored per element.
    pub fn vertices_per_element(&self) -> usize {
        if self.instanced {
            1
        } else {
            self.topology.vertices_per_element() as usize
        }
    }

    fn vertex_size(&self) -> usize {
        match self.technique {
            ArrowTechnique::Shaded => std::mem::size_of::<ShadedVertex>(),
            ArrowTechnique::Flat => std::mem::size_of::<FlatVertex>(),
            ArrowTechnique::Raytraced => std::mem::size_of::<BoxVertex>(),
        }
    }

    /// Allocates storage for `count` elements and returns the writer filling
    /// them.
    pub fn start_set_elements(&mut self, count: usize) -> Result<ArrowElements<'_>> {
        let vpe = self.vertices_per_element();
        self.chunks = ChunkLayout::new(
            count,
            vpe,
            self.vertex_size(),
            self.session.config().max_arrow_buffer_bytes,
        );
        self.element_count = count;
        self.has_alpha = false;
        let (cos_table, sin_table) = circle_tables(self.segments);
        self.cos_table = cos_table;
        self.sin_table = sin_table;

        fn allocate<V: Pod>(
            session: &DeviceSession,
            chunks: &ChunkLayout,
            vpe: usize,
            label: &'static str,
        ) -> Result<Vec<GeometryBuffer<V>>> {
            chunks
                .chunks()
                .map(|(_, _, len)| {
                    let mut buffer = GeometryBuffer::new(label);
                    buffer.create(session, len, vpe)?;
                    Ok(buffer)
                })
                .collect()
        }
        self.buffers = match self.technique {
            ArrowTechnique::Shaded => {
                ArrowBuffers::Shaded(allocate(&self.session, &self.chunks, vpe, "arrow_mesh_vertices")?)
            }
            ArrowTechnique::Flat => {
                ArrowBuffers::Flat(allocate(&self.session, &self.chunks, vpe, "arrow_flat_vertices")?)
            }
            ArrowTechnique::Raytraced => {
                ArrowBuffers::Raytraced(allocate(&self.session, &self.chunks, vpe, "cylinder_box_vertices")?)
            }
        };

        self.indices = None;
        if !self.instanced && count > 0 {
            let chunk_size = self.chunks.chunk_size();
            let mut indices = GeometryBuffer::with_usage("arrow_indices", wgpu::BufferUsages::INDEX);
            indices.create(&self.session, chunk_size, self.topology.indices_per_element() as usize)?;
            indices.map()?.copy_from_slice(&self.topology.indices_for(chunk_size));
            self.indices = Some(indices);
        }

        log::debug!(
            "arrow buffer sized for {} elements ({:?}, {} vertices each, {} chunks)",
            count,
            self.technique,
            vpe,
            self.chunks.chunk_count()
        );
        Ok(ArrowElements {
            primitive: self,
            mapped: None,
        })
    }

    /// Returns `true` if the primitive already renders with `shading`.
    pub fn set_shading_mode(&mut self, shading: ShadingMode) -> bool {
        shading == self.shading
    }

    /// Returns `true` if the new quality needs no other technique. Only
    /// cylinders switch technique with the quality.
    pub fn set_rendering_quality(&mut self, quality: RenderingQuality) -> bool {
        if quality == self.quality {
            return true;
        }
        if ArrowTechnique::select(self.shape, self.shading, quality) != self.technique {
            return false;
        }
        self.quality = quality;
        true
    }

    #[inline]
    pub fn shape(&self) -> ArrowShape {
        self.shape
    }

    #[inline]
    pub fn shading_mode(&self) -> ShadingMode {
        self.shading
    }

    #[inline]
    pub fn rendering_quality(&self) -> RenderingQuality {
        self.quality
    }

    fn write_element(&mut self, chunk: usize, offset: usize, pos: Vec3, dir: Vec3, color: Color, width: f32) {
        let vpe = self.vertices_per_element();
        let range = offset * vpe..(offset + 1) * vpe;
        let color = color::to_array(color);
        let frame = local_frame(dir);
        match &mut self.buffers {
            ArrowBuffers::Shaded(buffers) => {
                let out = &mut buffers[chunk].host_mut()[range];
                match self.shape {
                    ArrowShape::Arrow => {
                        shaded_arrow(out, pos, &frame, color, width, &self.cos_table, &self.sin_table)
                    }
                    ArrowShape::Cylinder => {
                        shaded_cylinder(out, pos, &frame, color, width, &self.cos_table, &self.sin_table)
                    }
                }
            }
            ArrowBuffers::Flat(buffers) => {
                let out = &mut buffers[chunk].host_mut()[range];
                flat_outline(out, self.shape, pos, &frame, color, width);
            }
            ArrowBuffers::Raytraced(buffers) => {
                let out = &mut buffers[chunk].host_mut()[range];
                if self.instanced {
                    out[0] = BoxVertex {
                        position: pos.into(),
                        base: pos.into(),
                        dir: dir.into(),
                        color,
                        radius: width,
                    };
                } else {
                    bounding_box(out, pos, dir, &frame, color, width);
                }
            }
        }
    }

    fn layouts(&self) -> Vec<OwnedVertexLayout> {
        use wgpu::VertexFormat::*;
        match self.technique {
            ArrowTechnique::Shaded => vec![OwnedVertexLayout::interleaved(
                &[Float32x3, Float32x3, Float32x4],
                0,
                wgpu::VertexStepMode::Vertex,
            )],
            ArrowTechnique::Flat => vec![OwnedVertexLayout::interleaved(
                &[Float32x3, Float32x3, Float32x3, Float32x4],
                0,
                wgpu::VertexStepMode::Vertex,
            )],
            ArrowTechnique::Raytraced if self.instanced => {
                // The expansion stage builds the corners itself.
                let mut layout = OwnedVertexLayout::interleaved(
                    &[Float32x3, Float32x3, Float32x3, Float32x4, Float32],
                    0,
                    wgpu::VertexStepMode::Instance,
                );
                layout.attributes.retain(|a| a.shader_location != 0);
                vec![layout]
            }
            ArrowTechnique::Raytraced => vec![OwnedVertexLayout::interleaved(
                &[Float32x3, Float32x3, Float32x3, Float32x4, Float32],
                0,
                wgpu::VertexStepMode::Vertex,
            )],
        }
    }

    fn cull_mode(&self) -> Option<wgpu::Face> {
        match self.technique {
            ArrowTechnique::Shaded => Some(wgpu::Face::Back),
            ArrowTechnique::Flat | ArrowTechnique::Raytraced => None,
        }
    }
}

/// Writes the tessellated arrow: shaft mantle, cone mantle, shaft cap and
/// cone base.
fn shaded_arrow(
    out: &mut [ShadedVertex],
    pos: Vec3,
    frame: &LocalFrame,
    color: [f32; 4],
    width: f32,
    cos: &[f32],
    sin: &[f32],
) {
    let head = arrow_head(frame.length, width);
    let v1 = pos;
    let v2 = v1 + frame.t * head.shaft_length;
    let v3 = v1 + frame.t * frame.length;
    let segments = cos.len() - 1;
    let ring = 2 * (segments + 1);
    let vertex = |p: Vec3, n: Vec3| ShadedVertex {
        position: p.into(),
        normal: n.into(),
        color,
    };

    let (shaft, rest) = out.split_at_mut(ring);
    let (cone, caps) = rest.split_at_mut(ring);
    let (shaft_cap, cone_cap) = caps.split_at_mut(segments);

    for i in 0..=segments {
        let n = frame.u * cos[i] + frame.v * sin[i];
        let d = n * head.shaft_radius;
        shaft[2 * i] = vertex(v1 + d, n);
        shaft[2 * i + 1] = vertex(v2 + d, n);

        let cone_normal = (n * head.head_length + frame.t * head.head_radius).normalize_or_zero();
        cone[2 * i] = vertex(v2 + n * head.head_radius, cone_normal);
        cone[2 * i + 1] = vertex(v3, cone_normal);
    }
    for i in 0..segments {
        let n = frame.u * cos[i] + frame.v * sin[i];
        shaft_cap[i] = vertex(v1 + n * head.shaft_radius, -frame.t);
        cone_cap[i] = vertex(v2 + n * head.head_radius, -frame.t);
    }
}

/// Writes the tessellated cylinder: mantle and both caps, the far one in
/// reverse order so it faces outwards.
fn shaded_cylinder(
    out: &mut [ShadedVertex],
    pos: Vec3,
    frame: &LocalFrame,
    color: [f32; 4],
    width: f32,
    cos: &[f32],
    sin: &[f32],
) {
    let v1 = pos;
    let v2 = v1 + frame.t * frame.length;
    let segments = cos.len() - 1;
    let ring = 2 * (segments + 1);
    let vertex = |p: Vec3, n: Vec3| ShadedVertex {
        position: p.into(),
        normal: n.into(),
        color,
    };

    let (mantle, caps) = out.split_at_mut(ring);
    let (near_cap, far_cap) = caps.split_at_mut(segments);
    for i in 0..=segments {
        let n = frame.u * cos[i] + frame.v * sin[i];
        let d = n * width;
        mantle[2 * i] = vertex(v1 + d, n);
        mantle[2 * i + 1] = vertex(v2 + d, n);
    }
    for i in 0..segments {
        let n = frame.u * cos[i] + frame.v * sin[i];
        near_cap[i] = vertex(v1 + n * width, -frame.t);
        let j = segments - 1 - i;
        let m = frame.u * cos[j] + frame.v * sin[j];
        far_cap[i] = vertex(v2 + m * width, frame.t);
    }
}

/// Writes the flat outline in the (length, width) plane.
fn flat_outline(out: &mut [FlatVertex], shape: ArrowShape, pos: Vec3, frame: &LocalFrame, color: [f32; 4], width: f32) {
    let length = frame.length;
    let outline: Vec<[f32; 2]> = match shape {
        ArrowShape::Arrow => {
            let head = arrow_head(length, width);
            let w = head.shaft_radius;
            let s = head.shaft_length;
            vec![
                [length, 0.0],
                [s, head.head_radius],
                [s, w],
                [0.0, w],
                [0.0, -w],
                [s, -w],
                [s, -head.head_radius],
            ]
        }
        ArrowShape::Cylinder => vec![[0.0, width], [0.0, -width], [length, -width], [length, width]],
    };
    for (dst, [x, y]) in out.iter_mut().zip(outline) {
        *dst = FlatVertex {
            position: [x, y, 0.0],
            base: pos.into(),
            dir: frame.t.into(),
            color,
        };
    }
}

/// Writes the 14 strip corners of the box enclosing a cylinder.
fn bounding_box(out: &mut [BoxVertex], pos: Vec3, dir: Vec3, frame: &LocalFrame, color: [f32; 4], width: f32) {
    let u = frame.u * width;
    let v = frame.v * width;
    let v1 = pos;
    let v2 = pos + dir;
    let corners = [
        v1 - u - v,
        v1 - u + v,
        v1 + u - v,
        v1 + u + v,
        v2 - u - v,
        v2 - u + v,
        v2 + u + v,
        v2 + u - v,
    ];
    for (dst, corner) in out.iter_mut().zip(BOX_STRIP) {
        *dst = BoxVertex {
            position: corners[corner].into(),
            base: v1.into(),
            dir: dir.into(),
            color,
            radius: width,
        };
    }
}

/// Writes elements into an [`ArrowPrimitive`].
///
/// The chunk holding the element being written stays on the host until an
/// element of another chunk is written or the writer is finished.
pub struct ArrowElements<'a> {
    primitive: &'a mut ArrowPrimitive,
    mapped: Option<usize>,
}

impl ArrowElements<'_> {
    /// Writes element `index`.
    ///
    /// # Arguments
    /// * `pos` - Base point
    /// * `dir` - Axis vector; its length is the element length
    /// * `color` - Color, alpha below one makes the primitive translucent
    /// * `width` - Shaft radius
    pub fn set_element(&mut self, index: usize, pos: Vec3, dir: Vec3, color: Color, width: f32) {
        debug_assert!(index < self.primitive.element_count, "arrow element {index} out of range");
        let (chunk, offset) = self.primitive.chunks.locate(index);
        if self.mapped != Some(chunk) {
            if let Some(previous) = self.mapped {
                self.primitive.buffers.upload(previous);
            }
            self.mapped = Some(chunk);
        }
        if color.a < 1.0 {
            self.primitive.has_alpha = true;
        }
        self.primitive.write_element(chunk, offset, pos, dir, color, width);
    }

    /// Uploads the last chunk written.
    pub fn end_set_elements(self) {}
}

impl Drop for ArrowElements<'_> {
    fn drop(&mut self) {
        if let Some(chunk) = self.mapped.take() {
            self.primitive.buffers.upload(chunk);
        }
    }
}

impl Primitive for ArrowPrimitive {
    fn is_valid(&self, renderer: &ViewportSceneRenderer) -> bool {
        let group = self.session.group();
        Rc::ptr_eq(group, renderer.session().group()) && !group.is_torn_down()
    }

    fn render(&mut self, renderer: &mut ViewportSceneRenderer) -> Result<()> {
        if self.element_count == 0 {
            return Ok(());
        }
        if self.has_alpha && renderer.defer_translucent(self.self_ref.clone()) {
            return Ok(());
        }

        let picking = renderer.is_picking();
        let program = if picking {
            &self.picking_program
        } else {
            &self.program
        };
        let blend = if self.has_alpha && !picking {
            BlendMode::Translucent
        } else {
            BlendMode::Opaque
        };
        let topology = if self.instanced {
            wgpu::PrimitiveTopology::TriangleStrip
        } else {
            wgpu::PrimitiveTopology::TriangleList
        };
        let key = renderer
            .pipeline_key(&program.id, self.layouts(), !self.instanced)?
            .topology(topology)
            .blend(blend)
            .cull(self.cull_mode());
        let pipeline = renderer.pipeline(&key)?;

        let base_id = if picking {
            renderer.register_sub_object_ids(self.element_count as u32)
        } else {
            0
        };
        let vpe = self.vertices_per_element() as u32;
        let uniforms = renderer.draw_uniforms();

        for (c, start, len) in self.chunks.chunks() {
            let Some(vertices) = self.buffers.slice(c) else {
                continue;
            };
            let len = len as u32;
            let call = if self.instanced {
                DrawCall::new(pipeline.clone(), 0..BOX_STRIP.len() as u32).instanced(0..len)
            } else {
                let Some(indices) = self.indices.as_ref().and_then(|b| b.slice()) else {
                    continue;
                };
                DrawCall::new(pipeline.clone(), 0..0)
                    .indexed(indices, 0..len * self.topology.indices_per_element())
                    .ordinals(len * vpe)
            };
            let ids = uniforms.with_ids(base_id, vpe, self.instanced, start as u32);
            renderer.draw(&ids, call.vertex_buffer(vertices))?;
        }
        Ok(())
    }

    fn element_count(&self) -> usize {
        self.element_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;

    #[test]
    fn frames_are_orthonormal() {
        let mut rng = rand::rng();
        for _ in 0..500 {
            let dir = Vec3::new(
                rng.random_range(-10.0..10.0),
                rng.random_range(-10.0..10.0),
                rng.random_range(-10.0..10.0),
            );
            if dir.length() < 1e-3 {
                continue;
            }
            let f = local_frame(dir);
            for axis in [f.t, f.u, f.v] {
                assert!((axis.length() - 1.0).abs() < 1e-4);
            }
            assert!(f.t.dot(f.u).abs() < 1e-4);
            assert!(f.t.dot(f.v).abs() < 1e-4);
            assert!(f.u.dot(f.v).abs() < 1e-4);
        }
        let along_z = local_frame(Vec3::new(0.0, 0.0, 3.0));
        assert!((along_z.u.length() - 1.0).abs() < 1e-6);
    }

    #[test]
    fn zero_direction_gives_zero_frame() {
        let f = local_frame(Vec3::ZERO);
        assert_eq!((f.t, f.u, f.v), (Vec3::ZERO, Vec3::ZERO, Vec3::ZERO));
    }

    #[test]
    fn arrow_head_is_continuous_at_cone_length() {
        let width = 0.4;
        let cone = width * ARROW_HEAD_RADIUS_FACTOR * ARROW_HEAD_LENGTH_FACTOR;
        let eps = 1e-4;
        let below = arrow_head(cone - eps, width);
        let above = arrow_head(cone + eps, width);
        assert!((below.head_radius - above.head_radius).abs() < 1e-3);
        assert!((below.shaft_radius - above.shaft_radius).abs() < 1e-3);
        assert!((below.shaft_length - above.shaft_length).abs() < 1e-3);
        assert_eq!(below.shaft_length, 0.0);
    }

    #[test]
    fn cylinder_vertex_count() {
        let runs = element_runs(ArrowTechnique::Shaded, ArrowShape::Cylinder, 20);
        let topology = ElementTopology::new(&runs);
        assert_eq!(topology.vertices_per_element(), 2 * (20 + 1) + 20 + 20);
        assert_eq!(runs[1], PrimitiveRun::Fan(20));
        assert_eq!(runs[2], PrimitiveRun::Fan(20));
    }

    #[test]
    fn cylinder_geometry() {
        let segments = 20;
        let (cos, sin) = circle_tables(segments);
        assert_eq!(cos.len(), segments as usize + 1);
        let dir = Vec3::new(0.0, 0.0, 10.0);
        let frame = local_frame(dir);
        let mut out = vec![ShadedVertex::default(); 82];
        shaded_cylinder(&mut out, Vec3::ZERO, &frame, [1.0; 4], 0.5, &cos, &sin);

        for v in &out[..42] {
            let p = Vec3::from(v.position);
            assert!(((p.x * p.x + p.y * p.y).sqrt() - 0.5).abs() < 1e-5);
        }
        assert!(out[42..62].iter().all(|v| v.position[2] == 0.0 && v.normal == [0.0, 0.0, -1.0]));
        assert!(out[62..82].iter().all(|v| v.position[2] == 10.0 && v.normal == [0.0, 0.0, 1.0]));
    }

    #[test]
    fn mantle_triangles_face_outwards() {
        let (cos, sin) = circle_tables(8);
        let frame = local_frame(Vec3::new(1.0, 2.0, 3.0));
        let mut out = vec![ShadedVertex::default(); 2 * 9 + 16];
        shaded_cylinder(&mut out, Vec3::ZERO, &frame, [1.0; 4], 0.5, &cos, &sin);
        let topology = ElementTopology::new(&element_runs(ArrowTechnique::Shaded, ArrowShape::Cylinder, 8));
        for tri in topology.pattern().chunks(3) {
            let [a, b, c] = [0, 1, 2].map(|k| Vec3::from(out[tri[k] as usize].position));
            let face = (b - a).cross(c - a);
            let normal = Vec3::from(out[tri[0] as usize].normal);
            assert!(face.dot(normal) >= -1e-5);
        }
    }

    #[test]
    fn box_corners_enclose_axis() {
        let dir = Vec3::new(0.0, 2.0, 0.0);
        let frame = local_frame(dir);
        let mut out = [BoxVertex::default(); 14];
        bounding_box(&mut out, Vec3::ZERO, dir, &frame, [1.0; 4], 0.25);
        for v in &out {
            assert!(v.position[1] == 0.0 || (v.position[1] - 2.0).abs() < 1e-6);
            assert!((v.position[0].abs() - 0.25).abs() < 1e-6);
            assert_eq!(v.radius, 0.25);
        }
    }

    #[test]
    fn flat_arrow_outline() {
        let frame = local_frame(Vec3::new(10.0, 0.0, 0.0));
        let mut out = [FlatVertex::default(); 7];
        flat_outline(&mut out, ArrowShape::Arrow, Vec3::ZERO, &frame, [1.0; 4], 0.5);
        assert_eq!(out[0].position, [10.0, 0.0, 0.0]);
        let head = arrow_head(10.0, 0.5);
        assert_eq!(out[1].position, [head.shaft_length, head.head_radius, 0.0]);
        assert_eq!(out[3].position, [0.0, 0.5, 0.0]);
    }

    #[test]
    fn technique_selection() {
        use ArrowShape::*;
        assert_eq!(ArrowTechnique::select(Cylinder, ShadingMode::Normal, RenderingQuality::High), ArrowTechnique::Raytraced);
        assert_eq!(ArrowTechnique::select(Arrow, ShadingMode::Normal, RenderingQuality::High), ArrowTechnique::Shaded);
        assert_eq!(ArrowTechnique::select(Cylinder, ShadingMode::Flat, RenderingQuality::High), ArrowTechnique::Flat);
    }
}
