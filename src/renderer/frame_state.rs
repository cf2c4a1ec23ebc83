//! Render targets and the state of a frame being recorded.

use crate::color::{self, Color};
use crate::context::DeviceSession;
use crate::error::{RenderError, Result};
use crate::renderer::picking::decode_pick_id;
use crate::renderer::pipeline::{DEPTH_FORMAT, PICKING_FORMAT};
use crate::resource::{GpuObject, TrackedResource};
use std::any::Any;
use std::ops::Range;

/// The attachments a frame renders into.
#[derive(Clone, Debug)]
pub struct FrameTarget {
    pub color: wgpu::TextureView,
    pub depth: wgpu::TextureView,
    pub format: wgpu::TextureFormat,
    pub width: u32,
    pub height: u32,
    /// Whether the frame encodes picking identifiers instead of colors.
    pub picking: bool,
    /// Supersampling factor of the target relative to window pixels.
    pub antialiasing_level: u32,
    pub clear_color: Color,
}

/// A color and depth texture pair that can be read back.
pub struct OffscreenTarget {
    color: wgpu::Texture,
    color_view: wgpu::TextureView,
    depth_view: wgpu::TextureView,
    format: wgpu::TextureFormat,
    width: u32,
    height: u32,
    picking: bool,
    antialiasing_level: u32,
    clear_color: Color,
    _tracking: [TrackedResource; 2],
}

impl OffscreenTarget {
    /// Creates a target for regular rendering.
    pub fn new(session: &DeviceSession, width: u32, height: u32, format: wgpu::TextureFormat) -> Result<Self> {
        Self::create(session, width, height, format, false)
    }

    /// Creates a target for picking frames. Its pixels are identifiers, the
    /// cleared background reads as 0.
    pub fn picking(session: &DeviceSession, width: u32, height: u32) -> Result<Self> {
        Self::create(session, width, height, PICKING_FORMAT, true)
    }

    fn create(
        session: &DeviceSession,
        width: u32,
        height: u32,
        format: wgpu::TextureFormat,
        picking: bool,
    ) -> Result<Self> {
        let size = wgpu::Extent3d {
            width: width.max(1),
            height: height.max(1),
            depth_or_array_layers: 1,
        };
        let color = session.create_texture(&wgpu::TextureDescriptor {
            label: Some(if picking { "picking_target" } else { "offscreen_target" }),
            size,
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT
                | wgpu::TextureUsages::COPY_SRC
                | wgpu::TextureUsages::TEXTURE_BINDING,
            view_formats: &[],
        })?;
        let depth = session.create_texture(&wgpu::TextureDescriptor {
            label: Some("offscreen_depth"),
            size,
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: DEPTH_FORMAT,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            view_formats: &[],
        })?;
        let color_view = color.create_view(&wgpu::TextureViewDescriptor::default());
        let depth_view = depth.create_view(&wgpu::TextureViewDescriptor::default());
        let tracking = [
            session.track(GpuObject::Texture(color.clone())),
            session.track(GpuObject::Texture(depth)),
        ];

        Ok(OffscreenTarget {
            color,
            color_view,
            depth_view,
            format,
            width: size.width,
            height: size.height,
            picking,
            antialiasing_level: 1,
            clear_color: if picking { color::TRANSPARENT } else { color::BLACK },
            _tracking: tracking,
        })
    }

    /// Sets the background color of regular frames.
    pub fn set_clear_color(&mut self, color: Color) {
        if !self.picking {
            self.clear_color = color;
        }
    }

    pub fn set_antialiasing_level(&mut self, level: u32) {
        self.antialiasing_level = level.max(1);
    }

    #[inline]
    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    #[inline]
    pub fn format(&self) -> wgpu::TextureFormat {
        self.format
    }

    /// The attachments to pass to
    /// [`ViewportSceneRenderer::begin_frame`](crate::renderer::ViewportSceneRenderer::begin_frame).
    pub fn frame_target(&self) -> FrameTarget {
        FrameTarget {
            color: self.color_view.clone(),
            depth: self.depth_view.clone(),
            format: self.format,
            width: self.width,
            height: self.height,
            picking: self.picking,
            antialiasing_level: self.antialiasing_level,
            clear_color: self.clear_color,
        }
    }

    /// Copies the color texture to the host: tightly packed rows of four
    /// bytes per pixel, top row first.
    pub fn read_pixels(&self, session: &DeviceSession) -> Result<Vec<u8>> {
        let bytes_per_pixel = 4usize;
        let width = self.width as usize;
        let height = self.height as usize;
        let unpadded_bytes_per_row = width * bytes_per_pixel;
        let align = wgpu::COPY_BYTES_PER_ROW_ALIGNMENT as usize;
        let padded_bytes_per_row = unpadded_bytes_per_row.div_ceil(align) * align;

        let staging = session.create_buffer(&wgpu::BufferDescriptor {
            label: Some("readback_staging_buffer"),
            size: (padded_bytes_per_row * height) as u64,
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        })?;

        let mut encoder = session.create_command_encoder(Some("readback_encoder"));
        encoder.copy_texture_to_buffer(
            wgpu::TexelCopyTextureInfo {
                texture: &self.color,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::TexelCopyBufferInfo {
                buffer: &staging,
                layout: wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(padded_bytes_per_row as u32),
                    rows_per_image: Some(self.height),
                },
            },
            wgpu::Extent3d {
                width: self.width,
                height: self.height,
                depth_or_array_layers: 1,
            },
        );
        session.submit(std::iter::once(encoder.finish()));

        let slice = staging.slice(..);
        let (tx, rx) = std::sync::mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = tx.send(result);
        });
        let _ = session.device().poll(wgpu::PollType::wait_indefinitely());
        rx.recv()
            .map_err(|_| RenderError::ResourceCreation("readback was never completed".into()))?
            .map_err(|e| RenderError::ResourceCreation(format!("failed to map readback buffer: {e}")))?;

        let data = slice.get_mapped_range();
        let mut out = Vec::with_capacity(unpadded_bytes_per_row * height);
        for row in 0..height {
            let start = row * padded_bytes_per_row;
            out.extend_from_slice(&data[start..start + unpadded_bytes_per_row]);
        }
        drop(data);
        staging.unmap();
        Ok(out)
    }

    /// Reads the picking identifier at pixel `(x, y)`, counted from the top
    /// left corner. Returns 0 outside the target.
    pub fn pick_at(&self, session: &DeviceSession, x: u32, y: u32) -> Result<u32> {
        if x >= self.width || y >= self.height {
            return Ok(0);
        }
        let pixels = self.read_pixels(session)?;
        let offset = ((y * self.width + x) * 4) as usize;
        let mut rgba = [0u8; 4];
        rgba.copy_from_slice(&pixels[offset..offset + 4]);
        Ok(decode_pick_id(rgba))
    }
}

/// Vertex buffer, index buffer and range arguments of one draw.
pub struct DrawCall<'a> {
    pub pipeline: wgpu::RenderPipeline,
    /// Texture bind group for group 1, if the pipeline samples one.
    pub texture: Option<&'a wgpu::BindGroup>,
    pub vertex_buffers: Vec<wgpu::BufferSlice<'a>>,
    pub index_buffer: Option<wgpu::BufferSlice<'a>>,
    /// Vertex range, or index range when an index buffer is set.
    pub elements: Range<u32>,
    pub instances: Range<u32>,
    /// Number of vertex ordinals the draw may reference. Non-zero when the
    /// shader reads ordinals from the fallback attribute.
    pub ordinals: u32,
}

impl<'a> DrawCall<'a> {
    /// A non-indexed, non-instanced draw of `vertices`.
    pub fn new(pipeline: wgpu::RenderPipeline, vertices: Range<u32>) -> Self {
        DrawCall {
            pipeline,
            texture: None,
            vertex_buffers: Vec::new(),
            index_buffer: None,
            elements: vertices,
            instances: 0..1,
            ordinals: 0,
        }
    }

    pub fn vertex_buffer(mut self, slice: wgpu::BufferSlice<'a>) -> Self {
        self.vertex_buffers.push(slice);
        self
    }

    /// Draws `indices` from a `u32` index buffer.
    pub fn indexed(mut self, slice: wgpu::BufferSlice<'a>, indices: Range<u32>) -> Self {
        self.index_buffer = Some(slice);
        self.elements = indices;
        self
    }

    pub fn instanced(mut self, instances: Range<u32>) -> Self {
        self.instances = instances;
        self
    }

    pub fn texture(mut self, bind_group: &'a wgpu::BindGroup) -> Self {
        self.texture = Some(bind_group);
        self
    }

    /// Requests the fallback ordinal attribute for `count` vertices.
    pub fn ordinals(mut self, count: u32) -> Self {
        self.ordinals = count;
        self
    }
}

/// Everything recorded for the frame in progress.
pub(crate) struct FrameState {
    pub target: FrameTarget,
    // Declared before the encoder: the pass must end before the encoder is
    // finished.
    pub pass: Option<wgpu::RenderPass<'static>>,
    pub encoder: Option<wgpu::CommandEncoder>,
    /// Objects that must stay alive until the frame is submitted.
    pub retained: Vec<Box<dyn Any>>,
    pub error_scope: bool,
}

impl FrameState {
    /// Begins the frame's render pass, clearing color and depth.
    pub fn begin(session: &DeviceSession, target: FrameTarget, viewport: &crate::renderer::Viewport) -> Self {
        let error_scope = session.config().debug_gpu_error_checks;
        if error_scope {
            session.device().push_error_scope(wgpu::ErrorFilter::Validation);
        }

        let mut encoder = session.create_command_encoder(Some("viewport_frame_encoder"));
        let clear = color::to_array(target.clear_color);
        let pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("viewport_frame_pass"),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view: &target.color,
                resolve_target: None,
                ops: wgpu::Operations {
                    load: wgpu::LoadOp::Clear(wgpu::Color {
                        r: clear[0] as f64,
                        g: clear[1] as f64,
                        b: clear[2] as f64,
                        a: clear[3] as f64,
                    }),
                    store: wgpu::StoreOp::Store,
                },
                depth_slice: None,
            })],
            depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                view: &target.depth,
                depth_ops: Some(wgpu::Operations {
                    load: wgpu::LoadOp::Clear(1.0),
                    store: wgpu::StoreOp::Store,
                }),
                stencil_ops: None,
            }),
            timestamp_writes: None,
            occlusion_query_set: None,
        });
        // The pass is ended in `finish`, before the encoder is consumed.
        let mut pass = pass.forget_lifetime();
        let x = viewport.x.min(target.width.saturating_sub(1));
        let y = viewport.y.min(target.height.saturating_sub(1));
        pass.set_viewport(
            x as f32,
            y as f32,
            viewport.width.min(target.width - x) as f32,
            viewport.height.min(target.height - y) as f32,
            0.0,
            1.0,
        );

        FrameState {
            target,
            pass: Some(pass),
            encoder: Some(encoder),
            retained: Vec::new(),
            error_scope,
        }
    }

    /// Ends the render pass and returns the finished command buffer.
    pub fn finish(&mut self) -> Option<wgpu::CommandBuffer> {
        drop(self.pass.take());
        self.encoder.take().map(|e| e.finish())
    }
}
