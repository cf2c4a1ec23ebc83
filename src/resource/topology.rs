//! Element topologies expressed as triangle lists.
//!
//! Every element of a primitive is made of a fixed sequence of strips, fans
//! and plain triangle lists over its own vertices. The render pipeline draws
//! triangle lists only, so the sequence is flattened once into an index
//! pattern local to the element and then repeated for every element of a
//! chunk (or for every element in sorted order).

/// One run of vertices within an element.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum PrimitiveRun {
    /// A triangle strip over `n` vertices.
    Strip(u32),
    /// A triangle fan over `n` vertices, pivoting on the first one.
    Fan(u32),
    /// `n` vertices forming independent triangles.
    List(u32),
}

impl PrimitiveRun {
    /// Number of vertices consumed by the run.
    pub fn vertex_count(self) -> u32 {
        match self {
            PrimitiveRun::Strip(n) | PrimitiveRun::Fan(n) | PrimitiveRun::List(n) => n,
        }
    }
}

/// The triangle-list index pattern of one element.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ElementTopology {
    vertices_per_element: u32,
    pattern: Vec<u32>,
}

impl ElementTopology {
    /// Flattens a sequence of runs. Runs occupy consecutive vertices.
    pub fn new(runs: &[PrimitiveRun]) -> Self {
        let mut pattern = Vec::new();
        let mut base = 0u32;
        for run in runs {
            match *run {
                PrimitiveRun::Strip(n) => {
                    for k in 0..n.saturating_sub(2) {
                        // Odd triangles swap their first two vertices to keep the winding.
                        if k % 2 == 0 {
                            pattern.extend_from_slice(&[base + k, base + k + 1, base + k + 2]);
                        } else {
                            pattern.extend_from_slice(&[base + k + 1, base + k, base + k + 2]);
                        }
                    }
                }
                PrimitiveRun::Fan(n) => {
                    for k in 0..n.saturating_sub(2) {
                        pattern.extend_from_slice(&[base, base + k + 1, base + k + 2]);
                    }
                }
                PrimitiveRun::List(n) => pattern.extend(base..base + n),
            }
            base += run.vertex_count();
        }
        ElementTopology {
            vertices_per_element: base,
            pattern,
        }
    }

    /// Number of vertices per element.
    #[inline]
    pub fn vertices_per_element(&self) -> u32 {
        self.vertices_per_element
    }

    /// Number of indices per element.
    #[inline]
    pub fn indices_per_element(&self) -> u32 {
        self.pattern.len() as u32
    }

    /// The local index pattern of a single element.
    #[inline]
    pub fn pattern(&self) -> &[u32] {
        &self.pattern
    }

    /// Indices drawing `count` consecutive elements starting at element 0.
    pub fn indices_for(&self, count: usize) -> Vec<u32> {
        self.indices_in_order((0..count as u32).map(|e| e as usize))
    }

    /// Indices drawing the given elements in the given order.
    pub fn indices_in_order(&self, order: impl IntoIterator<Item = usize>) -> Vec<u32> {
        let order = order.into_iter();
        let mut out = Vec::with_capacity(order.size_hint().0 * self.pattern.len());
        for element in order {
            let first = element as u32 * self.vertices_per_element;
            out.extend(self.pattern.iter().map(|i| first + i));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strip_alternates_winding() {
        let t = ElementTopology::new(&[PrimitiveRun::Strip(5)]);
        assert_eq!(t.pattern(), &[0, 1, 2, 2, 1, 3, 2, 3, 4]);
    }

    #[test]
    fn fan_pivots_on_first_vertex() {
        let t = ElementTopology::new(&[PrimitiveRun::Fan(5)]);
        assert_eq!(t.pattern(), &[0, 1, 2, 0, 2, 3, 0, 3, 4]);
    }

    #[test]
    fn runs_are_offset() {
        let t = ElementTopology::new(&[PrimitiveRun::List(3), PrimitiveRun::Fan(4)]);
        assert_eq!(t.vertices_per_element(), 7);
        assert_eq!(t.pattern(), &[0, 1, 2, 3, 4, 5, 3, 5, 6]);
    }

    #[test]
    fn element_indices_are_shifted() {
        let t = ElementTopology::new(&[PrimitiveRun::List(3)]);
        assert_eq!(t.indices_in_order([2, 0]), vec![6, 7, 8, 0, 1, 2]);
        assert_eq!(t.indices_for(2), vec![0, 1, 2, 3, 4, 5]);
    }

    #[test]
    fn cylinder_mesh_counts() {
        let segments = 20;
        let t = ElementTopology::new(&[
            PrimitiveRun::Strip(2 * (segments + 1)),
            PrimitiveRun::Fan(segments),
            PrimitiveRun::Fan(segments),
        ]);
        assert_eq!(t.vertices_per_element(), 82);
        assert_eq!(t.indices_per_element(), 3 * (2 * segments + 2 * (segments - 2)));
    }
}
