//! Splitting element sets into buffer chunks.

/// How a set of elements is split into same-sized GPU buffer chunks.
///
/// A chunk holds at most `max_bytes / (vertices_per_element * vertex_size)`
/// elements. Element `i` lives in chunk `i / chunk_size` at offset
/// `i % chunk_size`; only the last chunk may be partial.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ChunkLayout {
    element_count: usize,
    chunk_size: usize,
}

impl ChunkLayout {
    /// Computes the layout for `element_count` elements.
    ///
    /// The capacity is clamped to at least one element so that a single
    /// element larger than `max_bytes` still gets a chunk of its own.
    pub fn new(
        element_count: usize,
        vertices_per_element: usize,
        vertex_size: usize,
        max_bytes: usize,
    ) -> Self {
        let per_element = (vertices_per_element * vertex_size).max(1);
        let capacity = (max_bytes / per_element).max(1);
        ChunkLayout {
            element_count,
            chunk_size: capacity.min(element_count),
        }
    }

    /// A layout keeping all elements in one chunk.
    pub fn single(element_count: usize) -> Self {
        ChunkLayout {
            element_count,
            chunk_size: element_count,
        }
    }

    /// Total number of elements.
    #[inline]
    pub fn element_count(&self) -> usize {
        self.element_count
    }

    /// Number of elements in every chunk but the last.
    #[inline]
    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Number of chunks.
    pub fn chunk_count(&self) -> usize {
        if self.element_count == 0 {
            0
        } else {
            self.element_count.div_ceil(self.chunk_size)
        }
    }

    /// Number of elements in chunk `chunk`.
    pub fn chunk_len(&self, chunk: usize) -> usize {
        debug_assert!(chunk < self.chunk_count());
        self.chunk_size
            .min(self.element_count - chunk * self.chunk_size)
    }

    /// Index of the first element of chunk `chunk`.
    #[inline]
    pub fn chunk_start(&self, chunk: usize) -> usize {
        chunk * self.chunk_size
    }

    /// The chunk and intra-chunk offset of element `index`.
    #[inline]
    pub fn locate(&self, index: usize) -> (usize, usize) {
        debug_assert!(index < self.element_count, "element index {index} out of range");
        (index / self.chunk_size, index % self.chunk_size)
    }

    /// Iterates over `(chunk index, first element, element count)`.
    pub fn chunks(&self) -> impl Iterator<Item = (usize, usize, usize)> + '_ {
        (0..self.chunk_count()).map(move |c| (c, self.chunk_start(c), self.chunk_len(c)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;

    #[test]
    fn particle_scenario() {
        let max = 4 * 1024 * 1024;
        let layout = ChunkLayout::new(100_000, 6, 32, max);
        let capacity = max / (32 * 6);
        assert_eq!(layout.chunk_size(), capacity);
        assert_eq!(layout.chunk_count(), 100_000usize.div_ceil(capacity));
        assert!(layout.chunks().all(|(_, _, len)| len <= capacity));
    }

    #[test]
    fn empty_layout_has_no_chunks() {
        let layout = ChunkLayout::new(0, 14, 16, 1024);
        assert_eq!(layout.chunk_count(), 0);
        assert_eq!(layout.chunks().count(), 0);
    }

    #[test]
    fn oversized_element_gets_its_own_chunk() {
        let layout = ChunkLayout::new(3, 100, 100, 10);
        assert_eq!(layout.chunk_size(), 1);
        assert_eq!(layout.chunk_count(), 3);
    }

    #[test]
    fn random_layouts_cover_every_element() {
        let mut rng = rand::rng();
        for _ in 0..200 {
            let count = rng.random_range(0..5000);
            let vpe = rng.random_range(1..20);
            let size = rng.random_range(4..64);
            let max = rng.random_range(1..100_000);
            let layout = ChunkLayout::new(count, vpe, size, max);
            let capacity = (max / (vpe * size)).max(1);

            let total: usize = layout.chunks().map(|(_, _, len)| len).sum();
            assert_eq!(total, count);
            for (chunk, start, len) in layout.chunks() {
                assert!(len <= capacity);
                for i in [start, start + len - 1] {
                    assert_eq!(layout.locate(i), (chunk, i - start));
                }
            }
        }
    }
}
