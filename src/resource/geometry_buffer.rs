//! Typed vertex buffers with per-element replication.

use crate::context::DeviceSession;
use crate::error::{RenderError, Result};
use crate::resource::{GpuObject, TrackedResource};
use bytemuck::Pod;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;

struct GpuBuffer {
    buffer: wgpu::Buffer,
    _tracking: TrackedResource,
}

/// A GPU vertex buffer holding `element_count * vertices_per_element` records.
///
/// The buffer keeps a host copy of its contents. Writes go through
/// [`map`](Self::map), which hands out the host copy and uploads it when the
/// returned guard is dropped, or through the [`fill`](Self::fill) helpers that
/// replicate one value per element onto all of its vertices.
pub struct GeometryBuffer<T: Pod> {
    label: &'static str,
    usage: wgpu::BufferUsages,
    element_count: usize,
    vertices_per_element: usize,
    created: bool,
    host: Vec<T>,
    gpu: Option<GpuBuffer>,
    queue: Option<Arc<wgpu::Queue>>,
}

impl<T: Pod> GeometryBuffer<T> {
    /// Creates an unallocated vertex buffer.
    pub fn new(label: &'static str) -> Self {
        Self::with_usage(label, wgpu::BufferUsages::VERTEX)
    }

    /// Creates an unallocated buffer with the given usage.
    pub fn with_usage(label: &'static str, usage: wgpu::BufferUsages) -> Self {
        GeometryBuffer {
            label,
            usage,
            element_count: 0,
            vertices_per_element: 1,
            created: false,
            host: Vec::new(),
            gpu: None,
            queue: None,
        }
    }

    /// (Re)allocates storage for `element_count` elements of
    /// `vertices_per_element` vertices each. Does nothing if the buffer
    /// already has this size.
    pub fn create(
        &mut self,
        session: &DeviceSession,
        element_count: usize,
        vertices_per_element: usize,
    ) -> Result<()> {
        debug_assert!(vertices_per_element >= 1);
        if self.created
            && self.element_count == element_count
            && self.vertices_per_element == vertices_per_element
        {
            return Ok(());
        }

        let vertex_count = element_count * vertices_per_element;
        let bytes = (vertex_count * std::mem::size_of::<T>()) as u64;
        let max = session.capabilities().max_buffer_bytes;
        if bytes > max {
            return Err(RenderError::ResourceCreation(format!(
                "`{}` needs {} bytes, the device accepts at most {}",
                self.label, bytes, max
            )));
        }

        self.gpu = None;
        if bytes > 0 {
            let size = bytes.div_ceil(wgpu::COPY_BUFFER_ALIGNMENT) * wgpu::COPY_BUFFER_ALIGNMENT;
            let buffer = session.create_buffer(&wgpu::BufferDescriptor {
                label: Some(self.label),
                size,
                usage: self.usage | wgpu::BufferUsages::COPY_DST,
                mapped_at_creation: false,
            })?;
            let tracking = session.track(GpuObject::Buffer(buffer.clone()));
            self.gpu = Some(GpuBuffer {
                buffer,
                _tracking: tracking,
            });
        }

        self.host.clear();
        self.host.resize(vertex_count, T::zeroed());
        self.element_count = element_count;
        self.vertices_per_element = vertices_per_element;
        self.queue = Some(session.queue().clone());
        self.created = true;
        Ok(())
    }

    /// Releases the GPU storage.
    pub fn destroy(&mut self) {
        self.gpu = None;
        self.host = Vec::new();
        self.created = false;
        self.element_count = 0;
    }

    /// Returns `true` once [`create`](Self::create) succeeded.
    #[inline]
    pub fn is_created(&self) -> bool {
        self.created
    }

    /// Number of logical elements.
    #[inline]
    pub fn element_count(&self) -> usize {
        self.element_count
    }

    /// Number of vertices per logical element.
    #[inline]
    pub fn vertices_per_element(&self) -> usize {
        self.vertices_per_element
    }

    /// Total number of vertex records.
    #[inline]
    pub fn vertex_count(&self) -> usize {
        self.element_count * self.vertices_per_element
    }

    /// The GPU buffer, if any storage was allocated.
    #[inline]
    pub fn buffer(&self) -> Option<&wgpu::Buffer> {
        self.gpu.as_ref().map(|g| &g.buffer)
    }

    /// The host copy of the buffer contents.
    #[inline]
    pub fn data(&self) -> &[T] {
        &self.host
    }

    /// Maps the whole buffer for writing. The contents are uploaded when the
    /// guard is dropped.
    pub fn map(&mut self) -> Result<MappedBuffer<'_, T>> {
        if !self.created {
            return Err(RenderError::ResourceCreation(format!(
                "`{}` was mapped before being created",
                self.label
            )));
        }
        Ok(MappedBuffer { buffer: self })
    }

    /// Uploads one value per element, replicated onto each of its vertices.
    pub fn fill(&mut self, data: &[T]) -> Result<()> {
        debug_assert!(data.len() >= self.element_count);
        let vpe = self.vertices_per_element;
        let count = self.element_count;
        let mut mapped = self.map()?;
        replicate_into(&mut mapped, &data[..count.min(data.len())], vpe);
        Ok(())
    }

    /// Uploads the same value into every vertex.
    pub fn fill_constant(&mut self, value: T) -> Result<()> {
        let mut mapped = self.map()?;
        mapped.fill(value);
        Ok(())
    }

    /// The whole GPU buffer as a slice, if storage was allocated.
    pub fn slice(&self) -> Option<wgpu::BufferSlice<'_>> {
        self.gpu.as_ref().map(|g| g.buffer.slice(..))
    }

    /// Host copy for incremental writes. Nothing reaches the GPU until
    /// [`upload`](Self::upload) is called.
    pub fn host_mut(&mut self) -> &mut [T] {
        &mut self.host
    }

    /// Writes the host copy to the GPU buffer.
    pub fn upload(&self) {
        if let (Some(gpu), Some(queue)) = (&self.gpu, &self.queue) {
            queue.write_buffer(&gpu.buffer, 0, bytemuck::cast_slice(&self.host));
        }
    }
}

/// Write access to the contents of a [`GeometryBuffer`].
pub struct MappedBuffer<'a, T: Pod> {
    buffer: &'a mut GeometryBuffer<T>,
}

impl<T: Pod> Deref for MappedBuffer<'_, T> {
    type Target = [T];

    fn deref(&self) -> &[T] {
        &self.buffer.host
    }
}

impl<T: Pod> DerefMut for MappedBuffer<'_, T> {
    fn deref_mut(&mut self) -> &mut [T] {
        &mut self.buffer.host
    }
}

impl<T: Pod> Drop for MappedBuffer<'_, T> {
    fn drop(&mut self) {
        self.buffer.upload();
    }
}

/// Writes each value of `src` `vertices_per_element` times into `dst`.
pub fn replicate_into<T: Copy>(dst: &mut [T], src: &[T], vertices_per_element: usize) {
    for (chunk, value) in dst.chunks_exact_mut(vertices_per_element).zip(src) {
        chunk.fill(*value);
    }
}

/// Owned description of one vertex buffer slot.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct OwnedVertexLayout {
    pub array_stride: u64,
    pub step_mode: wgpu::VertexStepMode,
    pub attributes: Vec<wgpu::VertexAttribute>,
}

impl OwnedVertexLayout {
    /// A buffer holding a single attribute.
    pub fn single(format: wgpu::VertexFormat, location: u32, step_mode: wgpu::VertexStepMode) -> Self {
        OwnedVertexLayout {
            array_stride: format.size(),
            step_mode,
            attributes: vec![wgpu::VertexAttribute {
                format,
                offset: 0,
                shader_location: location,
            }],
        }
    }

    /// An interleaved buffer of `formats`, assigned to consecutive locations
    /// starting at `first_location`.
    pub fn interleaved(
        formats: &[wgpu::VertexFormat],
        first_location: u32,
        step_mode: wgpu::VertexStepMode,
    ) -> Self {
        let mut offset = 0;
        let attributes = formats
            .iter()
            .enumerate()
            .map(|(i, format)| {
                let attribute = wgpu::VertexAttribute {
                    format: *format,
                    offset,
                    shader_location: first_location + i as u32,
                };
                offset += format.size();
                attribute
            })
            .collect();
        OwnedVertexLayout {
            array_stride: offset,
            step_mode,
            attributes,
        }
    }

    /// Conventional position attribute: three floats.
    pub fn positions(location: u32, step_mode: wgpu::VertexStepMode) -> Self {
        Self::single(wgpu::VertexFormat::Float32x3, location, step_mode)
    }

    /// Conventional color attribute: three or four floats.
    pub fn colors(location: u32, components: u32, step_mode: wgpu::VertexStepMode) -> Self {
        let format = if components == 3 {
            wgpu::VertexFormat::Float32x3
        } else {
            wgpu::VertexFormat::Float32x4
        };
        Self::single(format, location, step_mode)
    }

    /// Conventional normal attribute: three floats.
    pub fn normals(location: u32, step_mode: wgpu::VertexStepMode) -> Self {
        Self::single(wgpu::VertexFormat::Float32x3, location, step_mode)
    }

    /// Borrowed form used in pipeline descriptors.
    pub fn as_wgpu(&self) -> wgpu::VertexBufferLayout<'_> {
        wgpu::VertexBufferLayout {
            array_stride: self.array_stride,
            step_mode: self.step_mode,
            attributes: &self.attributes,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replication_repeats_each_value() {
        let mut dst = [0.0f32; 6];
        replicate_into(&mut dst, &[1.0, 2.0], 3);
        assert_eq!(dst, [1.0, 1.0, 1.0, 2.0, 2.0, 2.0]);
    }

    #[test]
    fn interleaved_offsets_accumulate() {
        let layout = OwnedVertexLayout::interleaved(
            &[
                wgpu::VertexFormat::Float32x3,
                wgpu::VertexFormat::Float32x3,
                wgpu::VertexFormat::Float32x4,
            ],
            0,
            wgpu::VertexStepMode::Vertex,
        );
        assert_eq!(layout.array_stride, 40);
        let offsets: Vec<u64> = layout.attributes.iter().map(|a| a.offset).collect();
        assert_eq!(offsets, vec![0, 12, 24]);
        assert_eq!(layout.attributes[2].shader_location, 2);
    }

    #[test]
    fn color_layout_component_count() {
        let rgb = OwnedVertexLayout::colors(2, 3, wgpu::VertexStepMode::Vertex);
        let rgba = OwnedVertexLayout::colors(2, 4, wgpu::VertexStepMode::Vertex);
        assert_eq!(rgb.array_stride, 12);
        assert_eq!(rgba.array_stride, 16);
    }
}
