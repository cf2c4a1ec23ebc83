//! Error type shared by every fallible rendering operation.

use thiserror::Error;

/// Errors raised while creating GPU resources, building shader programs or
/// driving a frame.
///
/// Contract violations (mapping a second chunk, writing an element out of
/// range, rendering while a chunk is mapped) are not represented here: they
/// are debug assertions.
#[derive(Debug, Error)]
pub enum RenderError {
    /// A buffer, texture, bind group or render target could not be created.
    #[error("failed to create GPU resource: {0}")]
    ResourceCreation(String),

    /// A shader stage failed to compile. `source` is the exact text handed to
    /// the compiler, after version preprocessing.
    #[error("failed to compile shader `{path}`:\n{log}\n\npreprocessed source:\n{source_text}")]
    ShaderCompile {
        path: String,
        log: String,
        source_text: String,
    },

    /// The stages of a shader program could not be assembled into a pipeline.
    #[error("failed to link shader program `{id}`:\n{log}")]
    ShaderLink { id: String, log: String },

    /// A virtual shader path or entry point does not exist.
    #[error("shader resource not found: {0}")]
    ShaderNotFound(String),

    /// The renderer configuration could not be parsed.
    #[error("invalid renderer configuration: {0}")]
    Config(String),

    /// A frame-bound operation was invoked outside `begin_frame`/`end_frame`.
    #[error("no frame is being rendered")]
    NoActiveFrame,

    /// The context group that owned the resource has been torn down.
    #[error("the GPU context group has been destroyed")]
    ContextLost,
}

/// Result alias used across the crate.
pub type Result<T> = std::result::Result<T, RenderError>;

impl From<toml::de::Error> for RenderError {
    fn from(err: toml::de::Error) -> Self {
        RenderError::Config(err.to_string())
    }
}

impl From<std::io::Error> for RenderError {
    fn from(err: std::io::Error) -> Self {
        RenderError::Config(err.to_string())
    }
}
