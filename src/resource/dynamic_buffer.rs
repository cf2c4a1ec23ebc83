//! Per-draw uniform data with dynamic offsets.
//!
//! Each draw call pushes its uniform block into CPU memory and receives a
//! [`UniformSlot`] (bind group plus dynamic offset). The data is written to the
//! GPU in one `write_buffer` per block when the frame is flushed, before its
//! command buffer is submitted.
//!
//! Storage is a chain of fixed-size blocks rather than one growing buffer: a
//! bind group handed out earlier in the frame keeps pointing at valid storage
//! when later pushes need more room.

use crate::context::DeviceSession;
use crate::error::Result;
use bytemuck::Pod;
use std::marker::PhantomData;
use std::mem;

/// Where a pushed entry lives: the bind group to set and its dynamic offset.
#[derive(Clone, Debug)]
pub struct UniformSlot {
    pub bind_group: wgpu::BindGroup,
    pub offset: u32,
}

struct Block {
    buffer: wgpu::Buffer,
    bind_group: wgpu::BindGroup,
    data: Vec<u8>,
    count: usize,
}

/// A chain of uniform buffers addressed with dynamic offsets.
pub struct DynamicUniformBuffer<T: Pod> {
    blocks: Vec<Block>,
    current: usize,
    aligned_size: u64,
    entries_per_block: usize,
    label: &'static str,
    _marker: PhantomData<T>,
}

impl<T: Pod> DynamicUniformBuffer<T> {
    /// Creates an empty buffer; blocks are allocated on first use.
    ///
    /// # Arguments
    /// * `session` - Provides the offset alignment of the device
    /// * `label` - Debug label for the GPU buffers
    /// * `entries_per_block` - Number of entries each block can hold
    pub fn new(session: &DeviceSession, label: &'static str, entries_per_block: usize) -> Self {
        let alignment = session.device().limits().min_uniform_buffer_offset_alignment as u64;
        let unaligned = mem::size_of::<T>() as u64;
        Self {
            blocks: Vec::new(),
            current: 0,
            aligned_size: unaligned.div_ceil(alignment) * alignment,
            entries_per_block: entries_per_block.max(1),
            label,
            _marker: PhantomData,
        }
    }

    /// Returns the aligned size of each entry.
    #[inline]
    pub fn aligned_size(&self) -> u64 {
        self.aligned_size
    }

    /// Number of entries pushed since the last [`clear`](Self::clear).
    pub fn len(&self) -> usize {
        self.blocks.iter().map(|b| b.count).sum()
    }

    /// Returns true if nothing was pushed since the last clear.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of allocated blocks.
    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    /// Resets the buffer for the next frame, keeping the allocated blocks.
    pub fn clear(&mut self) {
        for block in &mut self.blocks {
            block.data.clear();
            block.count = 0;
        }
        self.current = 0;
    }

    /// Pushes a uniform entry and returns where it lives.
    ///
    /// [`flush`](Self::flush) must be called after all pushes and before the
    /// commands using the slot are submitted.
    pub fn push(&mut self, session: &DeviceSession, value: &T) -> Result<UniformSlot> {
        while self
            .blocks
            .get(self.current)
            .is_some_and(|b| b.count >= self.entries_per_block)
        {
            self.current += 1;
        }
        if self.current == self.blocks.len() {
            let block = self.allocate_block(session)?;
            self.blocks.push(block);
        }

        let aligned = self.aligned_size as usize;
        let block = &mut self.blocks[self.current];
        let offset = (block.count * aligned) as u32;
        let bytes = bytemuck::bytes_of(value);
        block.data.extend_from_slice(bytes);
        block.data.extend(std::iter::repeat_n(0u8, aligned - bytes.len()));
        block.count += 1;

        Ok(UniformSlot {
            bind_group: block.bind_group.clone(),
            offset,
        })
    }

    /// Writes the accumulated entries to the GPU.
    pub fn flush(&self, session: &DeviceSession) {
        for block in self.blocks.iter().filter(|b| !b.data.is_empty()) {
            session.write_buffer(&block.buffer, 0, &block.data);
        }
    }

    fn allocate_block(&self, session: &DeviceSession) -> Result<Block> {
        let size = self.aligned_size * self.entries_per_block as u64;
        let buffer = session.create_buffer(&wgpu::BufferDescriptor {
            label: Some(self.label),
            size,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        })?;
        let bind_group = session.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(self.label),
            layout: session.layouts().uniforms(),
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: wgpu::BindingResource::Buffer(wgpu::BufferBinding {
                    buffer: &buffer,
                    offset: 0,
                    size: wgpu::BufferSize::new(mem::size_of::<T>() as u64),
                }),
            }],
        });
        log::debug!(
            "allocated uniform block {} of `{}` ({} bytes)",
            self.blocks.len(),
            self.label,
            size
        );
        Ok(Block {
            buffer,
            bind_group,
            data: Vec::with_capacity(size as usize),
            count: 0,
        })
    }
}
