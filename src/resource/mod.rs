//! GPU resources: geometry buffers, textures, shaders and their lifetimes.

pub use crate::resource::chunking::ChunkLayout;
pub use crate::resource::dynamic_buffer::{DynamicUniformBuffer, UniformSlot};
pub use crate::resource::geometry_buffer::{replicate_into, GeometryBuffer, MappedBuffer, OwnedVertexLayout};
pub use crate::resource::shader_cache::{ProgramDesc, ShaderCache, ShaderProgram, ShaderStage};
pub use crate::resource::shader_preprocessor::preprocess;
pub use crate::resource::shared_resource::{
    FreeResources, GpuObject, ResourceArena, ResourceHandle, TrackedResource,
};
pub use crate::resource::texture::{Texture, BILLBOARD_TEXTURE_LEVELS};
pub use crate::resource::topology::{ElementTopology, PrimitiveRun};
pub use crate::resource::vertex_id_buffer::{VertexIdBuffer, VERTEX_ID_LOCATION};

mod chunking;
mod dynamic_buffer;
mod geometry_buffer;
pub mod shader_cache;
pub mod shader_preprocessor;
pub(crate) mod shared_resource;
pub mod texture;
mod topology;
mod vertex_id_buffer;
