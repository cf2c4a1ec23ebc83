//! The renderer driving one viewport frame.

use crate::color::Color;
use crate::context::{ContextId, DeviceSession};
use crate::error::{RenderError, Result};
use crate::renderer::frame_state::{DrawCall, FrameState, FrameTarget};
use crate::renderer::picking::{PickHit, PickingRecords};
use crate::renderer::pipeline::PipelineKey;
use crate::renderer::uniforms::{DrawUniforms, ProjParams, Viewport};
use crate::renderer::{
    ArrowPrimitive, ArrowShape, ImagePrimitive, LinePrimitive, MeshPrimitive, ParticlePrimitive,
    ParticleShape, Primitive, RenderingQuality, ShadingMode, TextPrimitive,
};
use crate::resource::{DynamicUniformBuffer, OwnedVertexLayout, VertexIdBuffer};
use glamx::{Mat4, Vec2, Vec3};
use std::any::Any;
use std::cell::RefCell;
use std::rc::{Rc, Weak};

/// Number of uniform entries per block of the per-draw uniform buffer.
const UNIFORM_BLOCK_ENTRIES: usize = 256;

/// Renders the primitives of one viewport.
///
/// A renderer is bound to a context of its session's group. Each frame is
/// bracketed by [`begin_frame`](Self::begin_frame) and
/// [`end_frame`](Self::end_frame); display objects record their primitives
/// inside [`render_frame`](Self::render_frame). Translucent primitives ask to
/// be deferred instead of drawing right away and are drawn in a second pass
/// once the closure returns.
///
/// Primitives must stay alive until the frame they were drawn in has ended:
/// their buffers are referenced by the recorded commands.
pub struct ViewportSceneRenderer {
    session: Rc<DeviceSession>,
    context: ContextId,
    proj: ProjParams,
    world_tm: Mat4,
    modelview: Mat4,
    viewport: Viewport,
    interactive: bool,
    device_pixel_ratio: f32,
    frame: Option<FrameState>,
    uniforms: DynamicUniformBuffer<DrawUniforms>,
    vertex_ids: VertexIdBuffer,
    picking: PickingRecords,
    translucent_queue: Vec<(Mat4, Weak<RefCell<dyn Primitive>>)>,
    translucent_pass: bool,
}

impl ViewportSceneRenderer {
    /// Creates a renderer drawing through `context`.
    pub fn new(session: Rc<DeviceSession>, context: ContextId) -> Self {
        let uniforms = DynamicUniformBuffer::new(&session, "draw_uniforms", UNIFORM_BLOCK_ENTRIES);
        ViewportSceneRenderer {
            session,
            context,
            proj: ProjParams::default(),
            world_tm: Mat4::IDENTITY,
            modelview: Mat4::IDENTITY,
            viewport: Viewport::new(1, 1),
            interactive: true,
            device_pixel_ratio: 1.0,
            frame: None,
            uniforms,
            vertex_ids: VertexIdBuffer::new(),
            picking: PickingRecords::new(),
            translucent_queue: Vec::new(),
            translucent_pass: false,
        }
    }

    #[inline]
    pub fn session(&self) -> &Rc<DeviceSession> {
        &self.session
    }

    #[inline]
    pub fn context(&self) -> ContextId {
        self.context
    }

    /*
     * Primitive factories.
     */
    pub fn create_particle_primitive(
        &self,
        shading: ShadingMode,
        quality: RenderingQuality,
        shape: ParticleShape,
        translucent: bool,
    ) -> Result<Rc<RefCell<ParticlePrimitive>>> {
        ParticlePrimitive::create(&self.session, shading, quality, shape, translucent)
    }

    pub fn create_arrow_primitive(
        &self,
        shape: ArrowShape,
        shading: ShadingMode,
        quality: RenderingQuality,
    ) -> Result<Rc<RefCell<ArrowPrimitive>>> {
        ArrowPrimitive::create(&self.session, shape, shading, quality)
    }

    pub fn create_line_primitive(&self) -> Result<Rc<RefCell<LinePrimitive>>> {
        LinePrimitive::create(&self.session)
    }

    pub fn create_mesh_primitive(&self) -> Result<Rc<RefCell<MeshPrimitive>>> {
        MeshPrimitive::create(&self.session)
    }

    pub fn create_image_primitive(&self) -> Result<Rc<RefCell<ImagePrimitive>>> {
        ImagePrimitive::create(&self.session)
    }

    pub fn create_text_primitive(&self) -> Result<Rc<RefCell<TextPrimitive>>> {
        TextPrimitive::create(&self.session)
    }

    /*
     * Frame lifecycle.
     */
    /// Makes the context current and starts recording a frame into `target`.
    pub fn begin_frame(&mut self, target: FrameTarget, viewport: Viewport) -> Result<()> {
        let group = self.session.group();
        if group.is_torn_down() || !group.owns(self.context) {
            return Err(RenderError::ContextLost);
        }
        if self.frame.is_some() {
            log::warn!("a new frame was begun before the previous one ended; discarding it");
            self.frame = None;
        }
        group.make_current(self.context);

        if target.picking {
            self.picking.reset();
        }
        self.uniforms.clear();
        self.translucent_queue.clear();
        self.translucent_pass = false;
        self.viewport = viewport;
        self.frame = Some(FrameState::begin(&self.session, target, &viewport));
        Ok(())
    }

    /// Runs `draw_scene`, then the translucent pass.
    ///
    /// An error returned by the closure or by a deferred primitive is logged
    /// and the frame keeps what was drawn so far.
    pub fn render_frame<F>(&mut self, draw_scene: F) -> Result<()>
    where
        F: FnOnce(&mut Self) -> Result<()>,
    {
        if self.frame.is_none() {
            return Err(RenderError::NoActiveFrame);
        }
        if let Err(e) = draw_scene(self) {
            log::error!("error while rendering the scene: {e}");
        }
        self.render_translucent_pass();
        Ok(())
    }

    fn render_translucent_pass(&mut self) {
        if self.translucent_queue.is_empty() {
            return;
        }
        let queue = std::mem::take(&mut self.translucent_queue);
        let saved_tm = self.world_tm;
        self.translucent_pass = true;
        for (tm, primitive) in queue {
            let Some(primitive) = primitive.upgrade() else {
                continue;
            };
            self.set_world_transform(tm);
            // A primitive already borrowed elsewhere cannot be drawn now.
            let result = match primitive.try_borrow_mut() {
                Ok(mut p) => p.render(self),
                Err(_) => {
                    log::warn!("skipping a translucent primitive that is still borrowed");
                    Ok(())
                }
            };
            if let Err(e) = result {
                log::error!("error while rendering a translucent primitive: {e}");
            }
        }
        self.translucent_pass = false;
        self.set_world_transform(saved_tm);
    }

    /// Finishes the frame and submits its commands.
    pub fn end_frame(&mut self) -> Result<()> {
        let mut frame = self.frame.take().ok_or(RenderError::NoActiveFrame)?;
        if !self.translucent_queue.is_empty() {
            log::debug!(
                "{} translucent primitives were queued outside render_frame and are dropped",
                self.translucent_queue.len()
            );
            self.translucent_queue.clear();
        }

        let commands = frame.finish();
        self.uniforms.flush(&self.session);
        if let Some(commands) = commands {
            self.session.submit(std::iter::once(commands));
        }
        self.vertex_ids.release_retired();
        frame.retained.clear();

        if frame.error_scope {
            if let Some(err) = pollster::block_on(self.session.device().pop_error_scope()) {
                log::error!("GPU error during the frame: {err}");
            }
        }
        self.session.group().done_current();
        Ok(())
    }

    /// Returns `true` between `begin_frame` and `end_frame`.
    #[inline]
    pub fn is_frame_active(&self) -> bool {
        self.frame.is_some()
    }

    /*
     * Transformations.
     */
    /// Sets the object-to-world transformation of subsequent draws.
    pub fn set_world_transform(&mut self, tm: Mat4) {
        self.world_tm = tm;
        self.modelview = self.proj.view_matrix * tm;
    }

    /// Sets the camera.
    pub fn set_view_projection(&mut self, proj: ProjParams) {
        self.proj = proj;
        self.modelview = proj.view_matrix * self.world_tm;
    }

    #[inline]
    pub fn world_transform(&self) -> Mat4 {
        self.world_tm
    }

    /// Object-to-view transformation of the current draw.
    #[inline]
    pub fn model_view_tm(&self) -> Mat4 {
        self.modelview
    }

    #[inline]
    pub fn proj_params(&self) -> &ProjParams {
        &self.proj
    }

    #[inline]
    pub fn viewport(&self) -> Viewport {
        self.viewport
    }

    /// Uniforms of a draw at the current transformation.
    pub fn draw_uniforms(&self) -> DrawUniforms {
        DrawUniforms::new(&self.proj, self.modelview, &self.viewport)
    }

    /*
     * Mode queries.
     */
    /// Returns `true` if the current frame renders picking identifiers.
    #[inline]
    pub fn is_picking(&self) -> bool {
        self.frame.as_ref().is_some_and(|f| f.target.picking)
    }

    #[inline]
    pub fn is_interactive(&self) -> bool {
        self.interactive
    }

    /// Interactive viewports may trade quality for speed; final renders are
    /// not interactive.
    pub fn set_interactive(&mut self, interactive: bool) {
        self.interactive = interactive;
    }

    /// Returns `true` while deferred translucent primitives are drawn.
    #[inline]
    pub fn is_translucent_pass(&self) -> bool {
        self.translucent_pass
    }

    /// Supersampling factor of the current target.
    pub fn antialiasing_level(&self) -> u32 {
        self.frame.as_ref().map_or(1, |f| f.target.antialiasing_level)
    }

    pub fn set_device_pixel_ratio(&mut self, ratio: f32) {
        self.device_pixel_ratio = ratio.max(f32::EPSILON);
    }

    #[inline]
    pub fn device_pixel_ratio(&self) -> f32 {
        self.device_pixel_ratio
    }

    /// Width in pixels of lines drawn into picking frames.
    pub fn default_line_picking_width(&self) -> f32 {
        self.session.config().default_line_picking_width * self.device_pixel_ratio
    }

    /// Color format of the current target.
    pub fn target_format(&self) -> Result<wgpu::TextureFormat> {
        self.frame
            .as_ref()
            .map(|f| f.target.format)
            .ok_or(RenderError::NoActiveFrame)
    }

    /*
     * Picking.
     */
    /// Allocates `count` consecutive picking identifiers.
    pub fn register_sub_object_ids(&mut self, count: u32) -> u32 {
        self.picking.register_sub_object_ids(count)
    }

    pub fn begin_pick_object(&mut self, owner: u64) {
        self.picking.begin_pick_object(owner);
    }

    pub fn end_pick_object(&mut self) {
        self.picking.end_pick_object();
    }

    pub fn picking_records(&self) -> &PickingRecords {
        &self.picking
    }

    /// Looks up an identifier read back from the last picking frame.
    pub fn object_at(&self, id: u32) -> Option<PickHit> {
        self.picking.object_at(id)
    }

    /*
     * Drawing.
     */
    /// Queues a translucent primitive for the translucent pass unless it is
    /// already running or the frame renders picking identifiers. Returns
    /// `true` if the primitive was queued and must not draw now.
    pub fn defer_translucent(&mut self, primitive: Weak<RefCell<dyn Primitive>>) -> bool {
        if self.is_picking() || self.translucent_pass {
            return false;
        }
        self.translucent_queue.push((self.world_tm, primitive));
        true
    }

    /// Number of primitives waiting for the translucent pass.
    #[inline]
    pub fn pending_translucent_count(&self) -> usize {
        self.translucent_queue.len()
    }

    /// Keeps `object` alive until the current frame has been submitted.
    pub fn retain_for_frame(&mut self, object: Box<dyn Any>) {
        if let Some(frame) = &mut self.frame {
            frame.retained.push(object);
        }
    }

    /// Builds the pipeline key of a program for the current target. Programs
    /// reading vertex ordinals get the fallback attribute appended when the
    /// builtin is unavailable.
    pub fn pipeline_key(
        &self,
        program: &str,
        mut layouts: Vec<OwnedVertexLayout>,
        ordinals: bool,
    ) -> Result<PipelineKey> {
        if ordinals && !self.session.capabilities().vertex_index_builtin {
            layouts.push(VertexIdBuffer::layout(wgpu::VertexStepMode::Vertex));
        }
        Ok(PipelineKey::new(program, self.target_format()?, layouts))
    }

    pub fn pipeline(&self, key: &PipelineKey) -> Result<wgpu::RenderPipeline> {
        self.session.pipeline(key)
    }

    /// Records one draw call with its uniforms.
    pub fn draw(&mut self, uniforms: &DrawUniforms, call: DrawCall<'_>) -> Result<()> {
        if self.frame.is_none() {
            return Err(RenderError::NoActiveFrame);
        }
        let slot = self.uniforms.push(&self.session, uniforms)?;
        let ordinal_buffer = if call.ordinals > 0 && !self.session.capabilities().vertex_index_builtin {
            self.vertex_ids
                .ensure(&self.session, call.ordinals as usize)?
                .cloned()
        } else {
            None
        };

        let pass = self
            .frame
            .as_mut()
            .and_then(|f| f.pass.as_mut())
            .ok_or(RenderError::NoActiveFrame)?;
        pass.set_pipeline(&call.pipeline);
        pass.set_bind_group(0, &slot.bind_group, &[slot.offset]);
        if let Some(texture) = call.texture {
            pass.set_bind_group(1, texture, &[]);
        }
        for (slot, slice) in call.vertex_buffers.iter().enumerate() {
            pass.set_vertex_buffer(slot as u32, *slice);
        }
        if let Some(ids) = &ordinal_buffer {
            pass.set_vertex_buffer(call.vertex_buffers.len() as u32, ids.slice(..));
        }
        match call.index_buffer {
            Some(indices) => {
                pass.set_index_buffer(indices, wgpu::IndexFormat::Uint32);
                pass.draw_indexed(call.elements, 0, call.instances);
            }
            None => pass.draw(call.elements, call.instances),
        }
        Ok(())
    }

    /// Draws a polyline given in normalized device coordinates on top of the
    /// scene. Nothing is drawn into picking frames.
    pub fn render_2d_polyline(&mut self, points: &[Vec2], color: Color, closed: bool) -> Result<()> {
        if self.is_picking() || points.len() < 2 {
            return Ok(());
        }
        let mut path: Vec<Vec3> = points.iter().map(|p| Vec3::new(p.x, p.y, 0.0)).collect();
        if closed {
            path.push(path[0]);
        }
        let segments: Vec<Vec3> = path
            .windows(2)
            .flat_map(|pair| [pair[0], pair[1]])
            .collect();

        let line = LinePrimitive::create(&self.session)?;
        {
            let mut l = line.borrow_mut();
            l.set_depth_test(false);
            l.set_vertex_count(segments.len(), 1.0)?;
            l.set_vertex_positions(&segments)?;
            l.set_line_color(color)?;
        }

        let saved_proj = self.proj;
        let saved_tm = self.world_tm;
        let aspect_ratio = self.viewport.aspect_ratio();
        self.set_view_projection(ProjParams {
            view_matrix: Mat4::IDENTITY,
            projection_matrix: Mat4::IDENTITY,
            inverse_projection_matrix: Mat4::IDENTITY,
            is_perspective: false,
            znear: -1.0,
            zfar: 1.0,
            fov: 1.0,
            aspect_ratio,
        });
        self.set_world_transform(Mat4::IDENTITY);
        let result = line.borrow_mut().render(self);
        self.set_view_projection(saved_proj);
        self.set_world_transform(saved_tm);

        self.retain_for_frame(Box::new(line));
        result
    }
}
