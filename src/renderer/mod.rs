//! The primitive encoders and the scene renderer drawing them.

pub use self::arrow::{ArrowElements, ArrowPrimitive, ArrowTechnique};
pub use self::frame_state::{DrawCall, FrameTarget, OffscreenTarget};
pub use self::image::{ImagePrimitive, TextPrimitive};
pub use self::line::LinePrimitive;
pub use self::mesh::{MeshPrimitive, TriFace, TriMesh};
pub use self::particle::{ParticlePrimitive, ParticleTechnique};
pub use self::picking::{decode_pick_id, PickHit, PickRecord, PickingRecords};
pub use self::pipeline::{BlendMode, DepthMode, PipelineKey, DEPTH_FORMAT, PICKING_FORMAT};
pub use self::primitive::{ArrowShape, ParticleShape, Primitive, RenderingQuality, ShadingMode};
pub use self::scene_renderer::ViewportSceneRenderer;
pub use self::uniforms::{DrawUniforms, ProjParams, Viewport};

pub mod arrow;
mod frame_state;
mod image;
pub mod line;
pub mod mesh;
mod particle;
mod picking;
pub(crate) mod pipeline;
mod primitive;
mod scene_renderer;
pub mod uniforms;
