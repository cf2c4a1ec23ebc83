/*!
# viewport-render

GPU primitive buffering and rendering for interactive particle viewports.

The crate turns per-element scene data (particle positions and radii, bond
cylinders, arrows, line segments, triangle meshes, text and image overlays)
into `wgpu` vertex buffers and draw calls. It selects a rendering technique per
primitive from the shading mode, the rendering quality and what the GPU
supports, splits oversized element sets into chunks that stay below a maximum
buffer size, defers translucent primitives to a second pass where their
elements are drawn back to front, and encodes sub-object identifiers into a
picking render target.

## Layout

* [`context`]: the [`DeviceSession`](context::DeviceSession) that owns the
  device, capability tier, shader program cache and the context group all GPU
  resources are registered with.
* [`resource`]: geometry buffers, chunking, the resource arena, the shader
  preprocessor and cache, and the textures shared by the primitives.
* [`renderer`]: the primitive encoders and the
  [`ViewportSceneRenderer`](renderer::ViewportSceneRenderer) driving a frame.
* [`display`]: glue converting particle and bond data into primitive calls,
  with change detection through [`CacheHelper`](display::CacheHelper).

A frame looks like this:

```no_run
use viewport_render::prelude::*;

# fn main() -> viewport_render::Result<()> {
let session = DeviceSession::request_headless(RendererConfig::default())?;
let context = session.group().create_context();
let mut renderer = ViewportSceneRenderer::new(session.clone(), context);

let particles = renderer.create_particle_primitive(
    ShadingMode::Normal,
    RenderingQuality::Medium,
    ParticleShape::Spherical,
    false,
)?;
particles.borrow_mut().set_size(2)?;
particles.borrow_mut().set_positions(&[Vec3::ZERO, Vec3::X])?;
particles.borrow_mut().set_radius(0.5)?;
particles.borrow_mut().set_color(color::RED)?;

let target = OffscreenTarget::new(&session, 640, 480, wgpu::TextureFormat::Rgba8Unorm)?;
renderer.begin_frame(target.frame_target(), Viewport::new(640, 480))?;
renderer.render_frame(|r| particles.borrow_mut().render(r))?;
renderer.end_frame()?;
# Ok(())
# }
```

Logging goes through the `log` facade; install any logger (for instance
`env_logger`) to see capability detection, shader builds and frame errors.
*/
#![allow(clippy::module_inception)]
#![allow(clippy::too_many_arguments)]
#![allow(clippy::type_complexity)]

#[macro_use]
extern crate bitflags;
extern crate rusttype;

pub use glamx;
#[doc(hidden)]
pub use pollster;
pub use wgpu;

pub use crate::error::{RenderError, Result};

pub mod builtin;
pub mod color;
pub mod config;
pub mod context;
pub mod display;
pub mod error;
pub mod renderer;
pub mod resource;
pub mod text;

pub mod prelude {
    pub use crate::color::{self, Color};
    pub use crate::config::{CapabilityRules, RendererConfig};
    pub use crate::context::*;
    pub use crate::display::*;
    pub use crate::error::{RenderError, Result};
    pub use crate::renderer::*;
    pub use crate::resource::*;
    pub use crate::text::*;
    pub use glamx::{Mat3, Mat4, Vec2, Vec3, Vec4};
    pub use std::cell::RefCell;
    pub use std::rc::Rc;
}
