//! Render pipeline state and its cache key.

use crate::builtin;
use crate::context::DeviceSession;
use crate::error::{RenderError, Result};
use crate::resource::{OwnedVertexLayout, ShaderProgram};

/// Format of the depth attachment of every render target.
pub const DEPTH_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Depth32Float;

/// Color format of the picking target.
pub const PICKING_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;

/// Identifier and stages of one shader program.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct ProgramPaths {
    pub id: String,
    pub vertex: String,
    pub fragment: String,
    pub expansion: Option<String>,
}

impl ProgramPaths {
    pub fn new(file: &str, vertex: &str, fragment: &str, expansion: Option<&str>) -> Self {
        let id = match expansion {
            Some(e) => format!("{}:{}+{}", file, e, fragment),
            None => format!("{}:{}+{}", file, vertex, fragment),
        };
        ProgramPaths {
            id,
            vertex: builtin::path(file, vertex),
            fragment: builtin::path(file, fragment),
            expansion: expansion.map(|e| builtin::path(file, e)),
        }
    }

    pub fn load(&self, session: &DeviceSession) -> Result<()> {
        session.load_shader_program(&self.id, &self.vertex, &self.fragment, self.expansion.as_deref())?;
        Ok(())
    }
}

/// How fragments are combined with the color target.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum BlendMode {
    /// Replace the target color.
    Opaque,
    /// `src * a + dst * (1 - a)` for color, `src + dst` for alpha.
    Translucent,
}

impl BlendMode {
    fn state(self) -> Option<wgpu::BlendState> {
        match self {
            BlendMode::Opaque => None,
            BlendMode::Translucent => Some(wgpu::BlendState {
                color: wgpu::BlendComponent {
                    src_factor: wgpu::BlendFactor::SrcAlpha,
                    dst_factor: wgpu::BlendFactor::OneMinusSrcAlpha,
                    operation: wgpu::BlendOperation::Add,
                },
                alpha: wgpu::BlendComponent {
                    src_factor: wgpu::BlendFactor::One,
                    dst_factor: wgpu::BlendFactor::One,
                    operation: wgpu::BlendOperation::Add,
                },
            }),
        }
    }
}

/// Depth testing of a pipeline.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum DepthMode {
    /// Test against and write to the depth buffer.
    Test,
    /// Draw on top of everything, leaving the depth buffer untouched.
    Disabled,
}

/// Everything a render pipeline depends on.
///
/// Pipelines are cached per device session under this key.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct PipelineKey {
    pub program: String,
    pub color_format: wgpu::TextureFormat,
    pub topology: wgpu::PrimitiveTopology,
    pub blend: BlendMode,
    pub depth: DepthMode,
    pub cull: Option<wgpu::Face>,
    /// Whether a texture is bound at group 1.
    pub textured: bool,
    pub layouts: Vec<OwnedVertexLayout>,
}

impl PipelineKey {
    /// A key for an opaque, depth-tested triangle list without culling.
    pub fn new(program: &str, color_format: wgpu::TextureFormat, layouts: Vec<OwnedVertexLayout>) -> Self {
        PipelineKey {
            program: program.to_string(),
            color_format,
            topology: wgpu::PrimitiveTopology::TriangleList,
            blend: BlendMode::Opaque,
            depth: DepthMode::Test,
            cull: None,
            textured: false,
            layouts,
        }
    }

    pub fn topology(mut self, topology: wgpu::PrimitiveTopology) -> Self {
        self.topology = topology;
        self
    }

    pub fn blend(mut self, blend: BlendMode) -> Self {
        self.blend = blend;
        self
    }

    pub fn depth(mut self, depth: DepthMode) -> Self {
        self.depth = depth;
        self
    }

    pub fn cull(mut self, cull: Option<wgpu::Face>) -> Self {
        self.cull = cull;
        self
    }

    pub fn textured(mut self, textured: bool) -> Self {
        self.textured = textured;
        self
    }

    /// Creates the pipeline. Creation runs in a validation error scope; a
    /// rejected pipeline is reported as a link failure of the program.
    pub(crate) fn build(&self, session: &DeviceSession, program: &ShaderProgram) -> Result<wgpu::RenderPipeline> {
        let device = session.device();
        let layout = if self.textured {
            session.layouts().textured_pipeline()
        } else {
            session.layouts().plain_pipeline()
        };
        let buffers: Vec<wgpu::VertexBufferLayout> = self.layouts.iter().map(|l| l.as_wgpu()).collect();

        device.push_error_scope(wgpu::ErrorFilter::Validation);
        let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some(&self.program),
            layout: Some(layout),
            vertex: wgpu::VertexState {
                module: &program.vertex.module,
                entry_point: Some(&program.vertex.entry),
                buffers: &buffers,
                compilation_options: Default::default(),
            },
            fragment: Some(wgpu::FragmentState {
                module: &program.fragment.module,
                entry_point: Some(&program.fragment.entry),
                targets: &[Some(wgpu::ColorTargetState {
                    format: self.color_format,
                    blend: self.blend.state(),
                    write_mask: wgpu::ColorWrites::ALL,
                })],
                compilation_options: Default::default(),
            }),
            primitive: wgpu::PrimitiveState {
                topology: self.topology,
                strip_index_format: None,
                front_face: wgpu::FrontFace::Ccw,
                cull_mode: self.cull,
                polygon_mode: wgpu::PolygonMode::Fill,
                unclipped_depth: false,
                conservative: false,
            },
            depth_stencil: Some(wgpu::DepthStencilState {
                format: DEPTH_FORMAT,
                depth_write_enabled: self.depth == DepthMode::Test,
                depth_compare: match self.depth {
                    DepthMode::Test => wgpu::CompareFunction::LessEqual,
                    DepthMode::Disabled => wgpu::CompareFunction::Always,
                },
                stencil: wgpu::StencilState::default(),
                bias: wgpu::DepthBiasState::default(),
            }),
            multisample: wgpu::MultisampleState {
                count: 1,
                mask: !0,
                alpha_to_coverage_enabled: false,
            },
            multiview: None,
            cache: None,
        });
        if let Some(err) = pollster::block_on(device.pop_error_scope()) {
            return Err(RenderError::ShaderLink {
                id: self.program.clone(),
                log: err.to_string(),
            });
        }
        Ok(pipeline)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn keys_distinguish_state() {
        let base = PipelineKey::new("p", PICKING_FORMAT, vec![OwnedVertexLayout::positions(0, wgpu::VertexStepMode::Vertex)]);
        let mut set = HashSet::new();
        set.insert(base.clone());
        set.insert(base.clone());
        set.insert(base.clone().blend(BlendMode::Translucent));
        set.insert(base.clone().cull(Some(wgpu::Face::Back)));
        set.insert(base.clone().depth(DepthMode::Disabled));
        set.insert(base.clone().topology(wgpu::PrimitiveTopology::LineList));
        assert_eq!(set.len(), 5);
    }

    #[test]
    fn translucent_blending_adds_alpha() {
        let state = BlendMode::Translucent.state().unwrap();
        assert_eq!(state.color.src_factor, wgpu::BlendFactor::SrcAlpha);
        assert_eq!(state.color.dst_factor, wgpu::BlendFactor::OneMinusSrcAlpha);
        assert_eq!(state.alpha.src_factor, wgpu::BlendFactor::One);
        assert_eq!(state.alpha.dst_factor, wgpu::BlendFactor::One);
        assert!(BlendMode::Opaque.state().is_none());
    }
}
