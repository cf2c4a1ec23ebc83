//! Vertex ordinals for drivers without a builtin vertex index.
//!
//! Shaders need the ordinal of the current vertex to find the corner of an
//! expanded element and to compute picking identifiers. When the shader tier
//! lacks the builtin, the ordinals come from a float vertex attribute instead.
//! The buffer is shared by all primitives of a renderer and only ever grows.

use crate::context::DeviceSession;
use crate::error::Result;
use crate::resource::{GpuObject, OwnedVertexLayout, TrackedResource};

/// Shader location of the vertex ordinal attribute.
pub const VERTEX_ID_LOCATION: u32 = 7;

/// Computes the new capacity for a request, or `None` if the current one
/// suffices. Capacity never shrinks.
pub fn grown_capacity(current: usize, requested: usize) -> Option<usize> {
    (requested > current).then_some(requested)
}

/// A float buffer holding `0, 1, 2, ...`.
pub struct VertexIdBuffer {
    buffer: Option<(wgpu::Buffer, TrackedResource)>,
    // Replaced buffers may still be referenced by the frame being recorded.
    retired: Vec<(wgpu::Buffer, TrackedResource)>,
    capacity: usize,
}

impl Default for VertexIdBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl VertexIdBuffer {
    /// Creates an empty buffer.
    pub fn new() -> Self {
        VertexIdBuffer {
            buffer: None,
            retired: Vec::new(),
            capacity: 0,
        }
    }

    /// Number of ordinals stored.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Makes sure at least `vertex_count` ordinals are available and returns
    /// the buffer.
    pub fn ensure(&mut self, session: &DeviceSession, vertex_count: usize) -> Result<Option<&wgpu::Buffer>> {
        if let Some(capacity) = grown_capacity(self.capacity, vertex_count) {
            let ordinals: Vec<f32> = (0..capacity).map(|i| i as f32).collect();
            let buffer = session.create_buffer_init(
                Some("vertex_id_buffer"),
                bytemuck::cast_slice(&ordinals),
                wgpu::BufferUsages::VERTEX,
            )?;
            let tracking = session.track(GpuObject::Buffer(buffer.clone()));
            log::debug!("vertex id buffer grown to {capacity} entries");
            if let Some(old) = self.buffer.replace((buffer, tracking)) {
                self.retired.push(old);
            }
            self.capacity = capacity;
        }
        Ok(self.buffer.as_ref().map(|(b, _)| b))
    }

    /// Frees buffers replaced during the frame. Called after submission.
    pub fn release_retired(&mut self) {
        self.retired.clear();
    }

    /// Vertex layout of the ordinal attribute.
    pub fn layout(step_mode: wgpu::VertexStepMode) -> OwnedVertexLayout {
        OwnedVertexLayout::single(wgpu::VertexFormat::Float32, VERTEX_ID_LOCATION, step_mode)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capacity_only_grows() {
        assert_eq!(grown_capacity(0, 10), Some(10));
        assert_eq!(grown_capacity(10, 4), None);
        assert_eq!(grown_capacity(10, 10), None);
        assert_eq!(grown_capacity(10, 11), Some(11));
    }
}
