//! Screen-space image and text overlays.

use crate::color::{self, Color};
use crate::context::DeviceSession;
use crate::error::Result;
use crate::renderer::frame_state::DrawCall;
use crate::renderer::pipeline::{BlendMode, DepthMode, ProgramPaths};
use crate::renderer::ViewportSceneRenderer;
use crate::resource::{OwnedVertexLayout, Texture};
use crate::text::{self, Font, TextAlignment};
use bytemuck::{Pod, Zeroable};
use glamx::Vec2;
use image::RgbaImage;
use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;

#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, Pod, Zeroable)]
pub struct QuadVertex {
    pub position: [f32; 2],
    pub uv: [f32; 2],
}

/// The two triangles of a quad whose lower-left corner is `pos`, both in
/// normalized device coordinates. Image row 0 maps to the top edge.
pub fn overlay_quad(pos: Vec2, size: Vec2) -> [QuadVertex; 6] {
    let (x0, y0) = (pos.x, pos.y);
    let (x1, y1) = (pos.x + size.x, pos.y + size.y);
    let v = |x: f32, y: f32, u: f32, w: f32| QuadVertex {
        position: [x, y],
        uv: [u, w],
    };
    [
        v(x0, y0, 0.0, 1.0),
        v(x1, y0, 1.0, 1.0),
        v(x1, y1, 1.0, 0.0),
        v(x0, y0, 0.0, 1.0),
        v(x1, y1, 1.0, 0.0),
        v(x0, y1, 0.0, 0.0),
    ]
}

/// Converts a rectangle given by its top-left corner in window pixels into
/// the lower-left corner and size in device coordinates.
///
/// Window pixels are logical; a target rendered with `antialiasing_level`
/// times the resolution scales them accordingly.
pub fn window_to_ndc(pos: Vec2, size: Vec2, viewport: (u32, u32), antialiasing_level: u32) -> (Vec2, Vec2) {
    let aa = antialiasing_level.max(1) as f32;
    let (w, h) = (viewport.0.max(1) as f32, viewport.1.max(1) as f32);
    let ndc_size = Vec2::new(size.x * aa * 2.0 / w, size.y * aa * 2.0 / h);
    let left = pos.x * aa * 2.0 / w - 1.0;
    let top = 1.0 - pos.y * aa * 2.0 / h;
    (Vec2::new(left, top - ndc_size.y), ndc_size)
}

/// An image drawn over the scene.
pub struct ImagePrimitive {
    session: Rc<DeviceSession>,
    program: ProgramPaths,
    image: RgbaImage,
    texture: Option<Texture>,
}

impl ImagePrimitive {
    pub fn new(session: &Rc<DeviceSession>) -> Result<Self> {
        let program = ProgramPaths::new("image/image.wgsl", "vs_main", "fs_main", None);
        program.load(session)?;
        Ok(ImagePrimitive {
            session: session.clone(),
            program,
            image: RgbaImage::new(0, 0),
            texture: None,
        })
    }

    pub fn create(session: &Rc<DeviceSession>) -> Result<Rc<RefCell<Self>>> {
        Ok(Rc::new(RefCell::new(Self::new(session)?)))
    }

    pub fn set_image(&mut self, image: RgbaImage) {
        self.image = image;
        self.texture = None;
    }

    #[inline]
    pub fn image(&self) -> &RgbaImage {
        &self.image
    }

    pub fn is_valid(&self, renderer: &ViewportSceneRenderer) -> bool {
        let group = self.session.group();
        Rc::ptr_eq(group, renderer.session().group()) && !group.is_torn_down()
    }

    /// Draws the image into the window rectangle whose top-left corner is
    /// `pos`, both in logical pixels.
    pub fn render_window(&mut self, renderer: &mut ViewportSceneRenderer, pos: Vec2, size: Vec2) -> Result<()> {
        let viewport = renderer.viewport();
        let (ndc_pos, ndc_size) = window_to_ndc(
            pos,
            size,
            (viewport.width, viewport.height),
            renderer.antialiasing_level(),
        );
        self.render_viewport(renderer, ndc_pos, ndc_size)
    }

    /// Draws the image into the rectangle whose lower-left corner is `pos`,
    /// both in normalized device coordinates.
    pub fn render_viewport(&mut self, renderer: &mut ViewportSceneRenderer, pos: Vec2, size: Vec2) -> Result<()> {
        if renderer.is_picking() || self.image.width() == 0 || self.image.height() == 0 {
            return Ok(());
        }
        if self.texture.is_none() {
            self.texture = Some(Texture::from_image(&self.session, "overlay_image", &self.image)?);
        }
        let Some(texture) = &self.texture else {
            return Ok(());
        };

        let layouts = vec![OwnedVertexLayout::interleaved(
            &[wgpu::VertexFormat::Float32x2, wgpu::VertexFormat::Float32x2],
            0,
            wgpu::VertexStepMode::Vertex,
        )];
        let key = renderer
            .pipeline_key(&self.program.id, layouts, false)?
            .blend(BlendMode::Translucent)
            .depth(DepthMode::Disabled)
            .textured(true);
        let pipeline = renderer.pipeline(&key)?;

        let quad = overlay_quad(pos, size);
        let vertices = self.session.create_buffer_init(
            Some("overlay_quad"),
            bytemuck::cast_slice(&quad),
            wgpu::BufferUsages::VERTEX,
        )?;
        let call = DrawCall::new(pipeline, 0..quad.len() as u32)
            .vertex_buffer(vertices.slice(..))
            .texture(&texture.bind_group);
        let uniforms = renderer.draw_uniforms();
        renderer.draw(&uniforms, call)?;
        renderer.retain_for_frame(Box::new(vertices));
        Ok(())
    }
}

/// A text label drawn over the scene.
///
/// The label is rasterized on first use and again whenever its text, colors,
/// font or the antialiasing level of the target change.
pub struct TextPrimitive {
    image: ImagePrimitive,
    text: String,
    color: Color,
    background: Color,
    font: Option<(Arc<Font>, f32)>,
    /// Antialiasing level the current image was rasterized for.
    rasterized_for: Option<u32>,
}

impl TextPrimitive {
    pub fn create(session: &Rc<DeviceSession>) -> Result<Rc<RefCell<Self>>> {
        Ok(Rc::new(RefCell::new(TextPrimitive {
            image: ImagePrimitive::new(session)?,
            text: String::new(),
            color: color::WHITE,
            background: color::TRANSPARENT,
            font: None,
            rasterized_for: None,
        })))
    }

    pub fn set_text(&mut self, text: &str) {
        if self.text != text {
            self.text = text.to_string();
            self.rasterized_for = None;
        }
    }

    #[inline]
    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn set_color(&mut self, color: Color) {
        if self.color != color {
            self.color = color;
            self.rasterized_for = None;
        }
    }

    /// A transparent background leaves only the glyphs visible.
    pub fn set_background_color(&mut self, color: Color) {
        if self.background != color {
            self.background = color;
            self.rasterized_for = None;
        }
    }

    /// Uses `font` at `px` logical pixels per em.
    pub fn set_font(&mut self, font: Arc<Font>, px: f32) {
        self.font = Some((font, px));
        self.rasterized_for = None;
    }

    pub fn is_valid(&self, renderer: &ViewportSceneRenderer) -> bool {
        self.image.is_valid(renderer)
    }

    /// Rasterizes the label for the current target. Returns its size in
    /// logical pixels, or `None` if there is nothing to draw.
    fn prepare(&mut self, antialiasing_level: u32) -> Option<Vec2> {
        let (font, px) = self.font.as_ref()?;
        if self.text.is_empty() {
            return None;
        }
        let aa = antialiasing_level.max(1);
        if self.rasterized_for != Some(aa) {
            let image = text::rasterize(font, px * aa as f32, &self.text, self.color, self.background);
            self.image.set_image(image);
            self.rasterized_for = Some(aa);
        }
        let image = self.image.image();
        Some(Vec2::new(image.width() as f32, image.height() as f32) / aa as f32)
    }

    /// Draws the label anchored at `pos` in logical window pixels.
    pub fn render_window(
        &mut self,
        renderer: &mut ViewportSceneRenderer,
        pos: Vec2,
        alignment: TextAlignment,
    ) -> Result<()> {
        if renderer.is_picking() {
            return Ok(());
        }
        let Some(size) = self.prepare(renderer.antialiasing_level()) else {
            return Ok(());
        };
        let top_left = alignment.top_left(pos, size);
        self.image.render_window(renderer, top_left.round(), size)
    }

    /// Draws the label anchored at `pos` in normalized device coordinates.
    pub fn render_viewport(
        &mut self,
        renderer: &mut ViewportSceneRenderer,
        pos: Vec2,
        alignment: TextAlignment,
    ) -> Result<()> {
        let viewport = renderer.viewport();
        let aa = renderer.antialiasing_level().max(1) as f32;
        let window = Vec2::new(
            (pos.x + 1.0) * 0.5 * viewport.width as f32 / aa,
            (1.0 - pos.y) * 0.5 * viewport.height as f32 / aa,
        );
        self.render_window(renderer, window, alignment)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_window_maps_to_full_viewport() {
        let (pos, size) = window_to_ndc(Vec2::ZERO, Vec2::new(800.0, 600.0), (800, 600), 1);
        assert_eq!(pos, Vec2::new(-1.0, -1.0));
        assert_eq!(size, Vec2::new(2.0, 2.0));
    }

    #[test]
    fn antialiasing_scales_window_coordinates() {
        // A 2x supersampled target of a 400x300 window.
        let (pos, size) = window_to_ndc(Vec2::new(200.0, 0.0), Vec2::new(200.0, 150.0), (800, 600), 2);
        assert_eq!(pos, Vec2::new(0.0, 0.0));
        assert_eq!(size, Vec2::new(1.0, 1.0));
    }

    #[test]
    fn quad_maps_top_row_to_top_edge() {
        let quad = overlay_quad(Vec2::new(-1.0, -1.0), Vec2::new(2.0, 2.0));
        let top_left = quad.iter().find(|v| v.position == [-1.0, 1.0]).map(|v| v.uv);
        assert_eq!(top_left, Some([0.0, 0.0]));
        let bottom_right = quad.iter().find(|v| v.position == [1.0, -1.0]).map(|v| v.uv);
        assert_eq!(bottom_right, Some([1.0, 1.0]));
    }
}
