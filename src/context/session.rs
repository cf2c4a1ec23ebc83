//! The device session: one wgpu device shared by all viewports.

use crate::config::RendererConfig;
use crate::context::{Capabilities, ContextGroup, ContextId, DriverInfo};
use crate::error::{RenderError, Result};
use crate::renderer::pipeline::PipelineKey;
use crate::renderer::uniforms::DrawUniforms;
use crate::resource::{GpuObject, ProgramDesc, ShaderCache, ShaderProgram, TrackedResource};
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use std::sync::Arc;

/// Bind group and pipeline layouts shared by all built-in programs.
///
/// Group 0 is the per-draw uniform block, addressed with a dynamic offset.
/// Group 1, when present, is a sampled 2D texture.
pub struct BindLayouts {
    uniforms: wgpu::BindGroupLayout,
    texture: wgpu::BindGroupLayout,
    plain: wgpu::PipelineLayout,
    textured: wgpu::PipelineLayout,
}

impl BindLayouts {
    fn new(device: &wgpu::Device) -> Self {
        let uniforms = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("draw_uniforms_layout"),
            entries: &[wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility: wgpu::ShaderStages::VERTEX_FRAGMENT,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: true,
                    min_binding_size: wgpu::BufferSize::new(std::mem::size_of::<DrawUniforms>() as u64),
                },
                count: None,
            }],
        });

        let texture = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("texture_layout"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Texture {
                        multisampled: false,
                        view_dimension: wgpu::TextureViewDimension::D2,
                        sample_type: wgpu::TextureSampleType::Float { filterable: true },
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                    count: None,
                },
            ],
        });

        let plain = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("plain_pipeline_layout"),
            bind_group_layouts: &[&uniforms],
            push_constant_ranges: &[],
        });
        let textured = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("textured_pipeline_layout"),
            bind_group_layouts: &[&uniforms, &texture],
            push_constant_ranges: &[],
        });

        BindLayouts {
            uniforms,
            texture,
            plain,
            textured,
        }
    }

    /// Layout of the per-draw uniform group.
    #[inline]
    pub fn uniforms(&self) -> &wgpu::BindGroupLayout {
        &self.uniforms
    }

    /// Layout of the texture group: view at binding 0, sampler at binding 1.
    #[inline]
    pub fn texture(&self) -> &wgpu::BindGroupLayout {
        &self.texture
    }

    /// Pipeline layout without a texture.
    #[inline]
    pub fn plain_pipeline(&self) -> &wgpu::PipelineLayout {
        &self.plain
    }

    /// Pipeline layout with a texture at group 1.
    #[inline]
    pub fn textured_pipeline(&self) -> &wgpu::PipelineLayout {
        &self.textured
    }
}

/// A wgpu device with everything the renderer derives from it.
///
/// The session owns the [`ContextGroup`] that all GPU objects are registered
/// with, the detected [`Capabilities`], and the caches of compiled shader
/// programs and render pipelines. It is shared through an `Rc` by every
/// renderer and primitive created from it.
pub struct DeviceSession {
    device: Arc<wgpu::Device>,
    queue: Arc<wgpu::Queue>,
    driver: DriverInfo,
    capabilities: Capabilities,
    config: RendererConfig,
    group: Rc<ContextGroup>,
    layouts: BindLayouts,
    shaders: RefCell<ShaderCache>,
    pipelines: RefCell<HashMap<PipelineKey, wgpu::RenderPipeline>>,
}

impl DeviceSession {
    /// Wraps an existing device.
    ///
    /// # Arguments
    /// * `device` - The wgpu device
    /// * `queue` - The queue of `device`
    /// * `driver` - Version information used for capability detection
    /// * `config` - Renderer configuration; validated here
    pub fn new(
        device: Arc<wgpu::Device>,
        queue: Arc<wgpu::Queue>,
        driver: DriverInfo,
        config: RendererConfig,
    ) -> Result<Rc<Self>> {
        config.validate()?;
        let capabilities = Capabilities::detect(
            &driver,
            &config.capabilities,
            device.limits().max_buffer_size,
        );
        let layouts = BindLayouts::new(&device);

        let group = ContextGroup::new();
        let hook_device = device.clone();
        group.set_teardown_hook(move || {
            log::info!("last viewport context destroyed, releasing the device");
            hook_device.destroy();
        });

        Ok(Rc::new(DeviceSession {
            device,
            queue,
            driver,
            capabilities,
            config,
            group,
            layouts,
            shaders: RefCell::new(ShaderCache::new(capabilities.shader_tier)),
            pipelines: RefCell::new(HashMap::new()),
        }))
    }

    /// Requests a device without a surface, blocking until it is ready.
    pub fn request_headless(config: RendererConfig) -> Result<Rc<Self>> {
        pollster::block_on(Self::request_headless_async(config))
    }

    /// Requests a device without a surface.
    pub async fn request_headless_async(config: RendererConfig) -> Result<Rc<Self>> {
        let instance = wgpu::Instance::default();
        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::default(),
                compatible_surface: None,
                force_fallback_adapter: false,
            })
            .await
            .map_err(|e| RenderError::ResourceCreation(format!("no suitable GPU adapter: {e}")))?;
        let driver = DriverInfo::from_adapter_info(&adapter.get_info());

        let (device, queue) = adapter
            .request_device(&wgpu::DeviceDescriptor {
                label: Some("viewport device"),
                required_features: wgpu::Features::empty(),
                required_limits: wgpu::Limits::downlevel_defaults().using_resolution(adapter.limits()),
                memory_hints: wgpu::MemoryHints::default(),
                trace: wgpu::Trace::Off,
                ..Default::default()
            })
            .await
            .map_err(|e| RenderError::ResourceCreation(format!("failed to create device: {e}")))?;

        Self::new(Arc::new(device), Arc::new(queue), driver, config)
    }

    #[inline]
    pub fn device(&self) -> &Arc<wgpu::Device> {
        &self.device
    }

    #[inline]
    pub fn queue(&self) -> &Arc<wgpu::Queue> {
        &self.queue
    }

    /// Driver information the capabilities were derived from.
    #[inline]
    pub fn driver(&self) -> &DriverInfo {
        &self.driver
    }

    #[inline]
    pub fn capabilities(&self) -> &Capabilities {
        &self.capabilities
    }

    #[inline]
    pub fn config(&self) -> &RendererConfig {
        &self.config
    }

    /// The context group owning every GPU object of this session.
    #[inline]
    pub fn group(&self) -> &Rc<ContextGroup> {
        &self.group
    }

    #[inline]
    pub fn layouts(&self) -> &BindLayouts {
        &self.layouts
    }

    /// Registers a new viewport context and makes it current.
    pub fn create_context(&self) -> ContextId {
        let context = self.group.create_context();
        self.group.make_current(context);
        context
    }

    /// Registers a GPU object with the context group.
    pub fn track(&self, object: GpuObject) -> TrackedResource {
        TrackedResource::attach(&self.group, object)
    }

    /// Creates a buffer, reporting allocation failures as errors.
    ///
    /// # Arguments
    /// * `desc` - Buffer descriptor
    pub fn create_buffer(&self, desc: &wgpu::BufferDescriptor) -> Result<wgpu::Buffer> {
        self.device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
        let buffer = self.device.create_buffer(desc);
        match pollster::block_on(self.device.pop_error_scope()) {
            Some(err) => Err(RenderError::ResourceCreation(format!(
                "buffer `{}` ({} bytes): {}",
                desc.label.unwrap_or("unnamed"),
                desc.size,
                err
            ))),
            None => Ok(buffer),
        }
    }

    /// Creates a buffer initialized with data.
    ///
    /// # Arguments
    /// * `label` - Debug label for the buffer
    /// * `contents` - The data to initialize the buffer with
    /// * `usage` - Buffer usage flags
    pub fn create_buffer_init(
        &self,
        label: Option<&str>,
        contents: &[u8],
        usage: wgpu::BufferUsages,
    ) -> Result<wgpu::Buffer> {
        use wgpu::util::DeviceExt;
        self.device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
        let buffer = self
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label,
                contents,
                usage,
            });
        match pollster::block_on(self.device.pop_error_scope()) {
            Some(err) => Err(RenderError::ResourceCreation(format!(
                "buffer `{}` ({} bytes): {}",
                label.unwrap_or("unnamed"),
                contents.len(),
                err
            ))),
            None => Ok(buffer),
        }
    }

    /// Writes data to a buffer.
    ///
    /// # Arguments
    /// * `buffer` - The buffer to write to
    /// * `offset` - Byte offset into the buffer
    /// * `data` - The data to write
    pub fn write_buffer(&self, buffer: &wgpu::Buffer, offset: u64, data: &[u8]) {
        self.queue.write_buffer(buffer, offset, data);
    }

    /// Creates a texture, reporting allocation failures as errors.
    pub fn create_texture(&self, desc: &wgpu::TextureDescriptor) -> Result<wgpu::Texture> {
        self.device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
        let texture = self.device.create_texture(desc);
        match pollster::block_on(self.device.pop_error_scope()) {
            Some(err) => Err(RenderError::ResourceCreation(format!(
                "texture `{}` ({}x{}): {}",
                desc.label.unwrap_or("unnamed"),
                desc.size.width,
                desc.size.height,
                err
            ))),
            None => Ok(texture),
        }
    }

    /// Writes texel data to a texture.
    pub fn write_texture(
        &self,
        texture: wgpu::TexelCopyTextureInfo,
        data: &[u8],
        data_layout: wgpu::TexelCopyBufferLayout,
        size: wgpu::Extent3d,
    ) {
        self.queue.write_texture(texture, data, data_layout, size);
    }

    pub fn create_sampler(&self, desc: &wgpu::SamplerDescriptor) -> wgpu::Sampler {
        self.device.create_sampler(desc)
    }

    pub fn create_bind_group(&self, desc: &wgpu::BindGroupDescriptor) -> wgpu::BindGroup {
        self.device.create_bind_group(desc)
    }

    pub fn create_command_encoder(&self, label: Option<&str>) -> wgpu::CommandEncoder {
        self.device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor { label })
    }

    /// Submits command buffers to the queue.
    pub fn submit<I: IntoIterator<Item = wgpu::CommandBuffer>>(&self, command_buffers: I) {
        self.queue.submit(command_buffers);
    }

    /// Loads a shader program, compiling it on first use.
    ///
    /// Programs are shared by all contexts of the session and identified by
    /// `id` alone: a second request with the same identifier returns the
    /// cached program.
    ///
    /// # Arguments
    /// * `id` - Program identifier
    /// * `vertex` - Virtual path of the vertex stage
    /// * `fragment` - Virtual path of the fragment stage
    /// * `expansion` - Optional expansion stage replacing the vertex stage
    pub fn load_shader_program(
        &self,
        id: &str,
        vertex: &str,
        fragment: &str,
        expansion: Option<&str>,
    ) -> Result<Rc<ShaderProgram>> {
        self.shaders.borrow_mut().load(
            &self.device,
            &ProgramDesc {
                id,
                vertex,
                fragment,
                expansion,
            },
        )
    }

    /// Number of shader programs compiled so far.
    pub fn shader_program_count(&self) -> usize {
        self.shaders.borrow().len()
    }

    /// Returns the pipeline for `key`, creating and caching it on first use.
    pub fn pipeline(&self, key: &PipelineKey) -> Result<wgpu::RenderPipeline> {
        if let Some(pipeline) = self.pipelines.borrow().get(key) {
            return Ok(pipeline.clone());
        }
        let program = self
            .shaders
            .borrow()
            .program(&key.program)
            .ok_or_else(|| RenderError::ShaderNotFound(key.program.clone()))?;
        let pipeline = key.build(self, &program)?;
        log::debug!("created pipeline for `{}` ({:?})", key.program, key.topology);
        self.pipelines
            .borrow_mut()
            .insert(key.clone(), pipeline.clone());
        Ok(pipeline)
    }
}
