//! Triangle mesh primitive.

use crate::color::{self, Color};
use crate::context::DeviceSession;
use crate::error::Result;
use crate::renderer::frame_state::DrawCall;
use crate::renderer::pipeline::{BlendMode, ProgramPaths};
use crate::renderer::uniforms::{back_to_front_order, sort_direction};
use crate::renderer::{Primitive, ViewportSceneRenderer};
use crate::resource::{ElementTopology, GeometryBuffer, OwnedVertexLayout, PrimitiveRun};
use bytemuck::{Pod, Zeroable};
use glamx::Vec3;
use std::cell::RefCell;
use std::rc::{Rc, Weak};

/// A triangle of a [`TriMesh`].
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde-types", derive(serde::Serialize, serde::Deserialize))]
pub struct TriFace {
    pub vertices: [u32; 3],
    /// Bit mask of smoothing groups. Faces sharing a group are shaded as one
    /// smooth surface; a face without any group is shaded flat.
    pub smoothing_groups: u32,
}

impl TriFace {
    pub fn new(a: u32, b: u32, c: u32) -> Self {
        TriFace {
            vertices: [a, b, c],
            smoothing_groups: 0,
        }
    }

    pub fn with_smoothing_groups(mut self, groups: u32) -> Self {
        self.smoothing_groups = groups;
        self
    }
}

/// Indexed triangle mesh with optional vertex or face colors.
#[derive(Clone, Debug, Default, PartialEq)]
#[cfg_attr(feature = "serde-types", derive(serde::Serialize, serde::Deserialize))]
pub struct TriMesh {
    pub vertices: Vec<Vec3>,
    pub faces: Vec<TriFace>,
    pub vertex_colors: Option<Vec<Color>>,
    pub face_colors: Option<Vec<Color>>,
}

impl TriMesh {
    pub fn new(vertices: Vec<Vec3>, faces: Vec<TriFace>) -> Self {
        TriMesh {
            vertices,
            faces,
            vertex_colors: None,
            face_colors: None,
        }
    }

    fn corner(&self, face: &TriFace, k: usize) -> Vec3 {
        self.vertices
            .get(face.vertices[k] as usize)
            .copied()
            .unwrap_or(Vec3::ZERO)
    }

    /// Unit normal of `face`, zero for degenerate faces.
    pub fn face_normal(&self, face: &TriFace) -> Vec3 {
        let [a, b, c] = [0, 1, 2].map(|k| self.corner(face, k));
        (b - a).cross(c - a).normalize_or_zero()
    }

    /// Normals of the three corners of every face.
    ///
    /// A face without smoothing groups is shaded flat. Otherwise, for every
    /// group the face belongs to, the corner receives the sum of the unit
    /// normals of all faces of that group around its vertex. The result is
    /// not renormalized.
    pub fn corner_normals(&self) -> Vec<[Vec3; 3]> {
        let face_normals: Vec<Vec3> = self.faces.iter().map(|f| self.face_normal(f)).collect();
        let mut corners: Vec<[Vec3; 3]> = self
            .faces
            .iter()
            .zip(&face_normals)
            .map(|(face, n)| if face.smoothing_groups == 0 { [*n; 3] } else { [Vec3::ZERO; 3] })
            .collect();

        let all_groups = self.faces.iter().fold(0u32, |acc, f| acc | f.smoothing_groups);
        let mut group_normals = vec![Vec3::ZERO; self.vertices.len()];
        for bit in 0..u32::BITS {
            let mask = 1u32 << bit;
            if all_groups & mask == 0 {
                continue;
            }
            group_normals.fill(Vec3::ZERO);
            for (face, n) in self.faces.iter().zip(&face_normals) {
                if face.smoothing_groups & mask == 0 {
                    continue;
                }
                for v in face.vertices {
                    if let Some(sum) = group_normals.get_mut(v as usize) {
                        *sum += *n;
                    }
                }
            }
            for (face, corner) in self.faces.iter().zip(corners.iter_mut()) {
                if face.smoothing_groups & mask == 0 {
                    continue;
                }
                for (k, v) in face.vertices.iter().enumerate() {
                    corner[k] += group_normals.get(*v as usize).copied().unwrap_or(Vec3::ZERO);
                }
            }
        }
        corners
    }

    /// Colors of the three corners of every face. Vertex colors win over face
    /// colors, which win over `default_color`.
    pub fn corner_colors(&self, default_color: Color) -> Vec<[Color; 3]> {
        self.faces
            .iter()
            .enumerate()
            .map(|(i, face)| {
                if let Some(vc) = &self.vertex_colors {
                    return face
                        .vertices
                        .map(|v| vc.get(v as usize).copied().unwrap_or(default_color));
                }
                let face_color = self.face_colors.as_ref().and_then(|fc| fc.get(i));
                [face_color.copied().unwrap_or(default_color); 3]
            })
            .collect()
    }

    pub fn face_centroid(&self, face: &TriFace) -> Vec3 {
        (self.corner(face, 0) + self.corner(face, 1) + self.corner(face, 2)) / 3.0
    }
}

#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct MeshVertex {
    pub position: [f32; 3],
    pub normal: [f32; 3],
    pub color: [f32; 4],
}

/// Expands `mesh` into three vertices per face.
pub fn expand_mesh(mesh: &TriMesh, default_color: Color) -> Vec<MeshVertex> {
    let normals = mesh.corner_normals();
    let colors = mesh.corner_colors(default_color);
    let mut out = Vec::with_capacity(mesh.faces.len() * 3);
    for ((face, normals), colors) in mesh.faces.iter().zip(normals).zip(colors) {
        for k in 0..3 {
            out.push(MeshVertex {
                position: mesh.corner(face, k).into(),
                normal: normals[k].into(),
                color: color::to_array(colors[k]),
            });
        }
    }
    out
}

/// A triangle mesh drawn with per-vertex normals and colors.
pub struct MeshPrimitive {
    session: Rc<DeviceSession>,
    self_ref: Weak<RefCell<MeshPrimitive>>,
    program: ProgramPaths,
    picking_program: ProgramPaths,
    vertices: GeometryBuffer<MeshVertex>,
    face_count: usize,
    has_alpha: bool,
    centroids: Vec<Vec3>,
}

impl MeshPrimitive {
    pub fn create(session: &Rc<DeviceSession>) -> Result<Rc<RefCell<Self>>> {
        let program = ProgramPaths::new("mesh/mesh.wgsl", "vs_main", "fs_main", None);
        let picking_program = ProgramPaths::new("mesh/mesh.wgsl", "vs_main", "fs_picking", None);
        program.load(session)?;
        picking_program.load(session)?;
        Ok(Rc::new_cyclic(|self_ref| {
            RefCell::new(MeshPrimitive {
                session: session.clone(),
                self_ref: self_ref.clone(),
                program,
                picking_program,
                vertices: GeometryBuffer::new("mesh_vertices"),
                face_count: 0,
                has_alpha: false,
                centroids: Vec::new(),
            })
        }))
    }

    /// Uploads `mesh`, using `color` where it carries no colors.
    pub fn set_mesh(&mut self, mesh: &TriMesh, color: Color) -> Result<()> {
        let expanded = expand_mesh(mesh, color);
        self.face_count = mesh.faces.len();
        self.has_alpha = expanded.iter().any(|v| v.color[3] < 1.0);
        self.centroids = if self.has_alpha {
            mesh.faces.iter().map(|f| mesh.face_centroid(f)).collect()
        } else {
            Vec::new()
        };
        self.vertices.create(&self.session, self.face_count, 3)?;
        if self.face_count > 0 {
            self.vertices.map()?.copy_from_slice(&expanded);
        }
        log::trace!("mesh uploaded with {} faces (translucent: {})", self.face_count, self.has_alpha);
        Ok(())
    }

    #[inline]
    pub fn face_count(&self) -> usize {
        self.face_count
    }

    #[inline]
    pub fn has_alpha(&self) -> bool {
        self.has_alpha
    }

    /// Expanded vertices as last uploaded.
    pub fn vertex_data(&self) -> &[MeshVertex] {
        self.vertices.data()
    }
}

impl Primitive for MeshPrimitive {
    fn is_valid(&self, renderer: &ViewportSceneRenderer) -> bool {
        let group = self.session.group();
        Rc::ptr_eq(group, renderer.session().group()) && !group.is_torn_down()
    }

    fn render(&mut self, renderer: &mut ViewportSceneRenderer) -> Result<()> {
        if self.face_count == 0 {
            return Ok(());
        }
        if self.has_alpha && renderer.defer_translucent(self.self_ref.clone()) {
            return Ok(());
        }
        let picking = renderer.is_picking();
        let program = if picking {
            &self.picking_program
        } else {
            &self.program
        };
        let translucent = self.has_alpha && !picking;
        let layouts = vec![OwnedVertexLayout::interleaved(
            &[
                wgpu::VertexFormat::Float32x3,
                wgpu::VertexFormat::Float32x3,
                wgpu::VertexFormat::Float32x4,
            ],
            0,
            wgpu::VertexStepMode::Vertex,
        )];
        let key = renderer
            .pipeline_key(&program.id, layouts, true)?
            .blend(if translucent {
                BlendMode::Translucent
            } else {
                BlendMode::Opaque
            });
        let pipeline = renderer.pipeline(&key)?;
        let base_id = if picking {
            renderer.register_sub_object_ids(self.face_count as u32)
        } else {
            0
        };
        let uniforms = renderer.draw_uniforms().with_ids(base_id, 3, false, 0);
        let Some(vertices) = self.vertices.slice() else {
            return Ok(());
        };
        let vertex_count = 3 * self.face_count as u32;

        if translucent && self.centroids.len() == self.face_count {
            let order = back_to_front_order(&self.centroids, sort_direction(&renderer.model_view_tm()));
            let indices = ElementTopology::new(&[PrimitiveRun::List(3)]).indices_in_order(order);
            let index_buffer = self.session.create_buffer_init(
                Some("mesh_sorted_indices"),
                bytemuck::cast_slice(&indices),
                wgpu::BufferUsages::INDEX,
            )?;
            let call = DrawCall::new(pipeline, 0..0)
                .vertex_buffer(vertices)
                .indexed(index_buffer.slice(..), 0..indices.len() as u32)
                .ordinals(vertex_count);
            renderer.draw(&uniforms, call)?;
            renderer.retain_for_frame(Box::new(index_buffer));
            return Ok(());
        }

        let call = DrawCall::new(pipeline, 0..vertex_count)
            .vertex_buffer(vertices)
            .ordinals(vertex_count);
        renderer.draw(&uniforms, call)
    }

    fn element_count(&self) -> usize {
        self.face_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Two triangles folded 90 degrees along the shared edge (0, 1).
    fn folded(groups_a: u32, groups_b: u32) -> TriMesh {
        TriMesh::new(
            vec![
                Vec3::new(0.0, 0.0, 0.0),
                Vec3::new(1.0, 0.0, 0.0),
                Vec3::new(0.0, 1.0, 0.0),
                Vec3::new(0.0, 0.0, 1.0),
            ],
            vec![
                TriFace::new(0, 1, 2).with_smoothing_groups(groups_a),
                TriFace::new(1, 0, 3).with_smoothing_groups(groups_b),
            ],
        )
    }

    #[test]
    fn faces_without_groups_are_flat() {
        let normals = folded(0, 0).corner_normals();
        assert_eq!(normals[0], [Vec3::Z; 3]);
        assert_eq!(normals[1], [Vec3::Y; 3]);
    }

    #[test]
    fn shared_group_smooths_the_edge() {
        let normals = folded(1, 1).corner_normals();
        let expected = Vec3::Z + Vec3::Y;
        assert!((normals[0][0] - expected).length() < 1e-6);
        assert!((normals[1][1] - expected).length() < 1e-6);
        // Vertex 2 belongs to one face only.
        assert!((normals[0][2] - Vec3::Z).length() < 1e-6);
    }

    #[test]
    fn face_area_does_not_weight_normals() {
        // The second face is a hundred times larger than the first.
        let mesh = TriMesh::new(
            vec![
                Vec3::ZERO,
                Vec3::new(0.1, 0.0, 0.0),
                Vec3::new(0.0, 0.1, 0.0),
                Vec3::new(0.0, 0.0, -1.0),
                Vec3::new(1.0, 0.0, 0.0),
            ],
            vec![
                TriFace::new(0, 1, 2).with_smoothing_groups(1),
                TriFace::new(0, 4, 3).with_smoothing_groups(1),
            ],
        );
        let normals = mesh.corner_normals();
        assert!((normals[0][0] - Vec3::new(0.0, 1.0, 1.0)).length() < 1e-5);
        assert!((normals[1][0] - Vec3::new(0.0, 1.0, 1.0)).length() < 1e-5);
    }

    #[test]
    fn every_group_of_a_face_contributes_once() {
        // Face 0 is in groups 1 and 2, face 1 only in group 2.
        let normals = folded(0b11, 0b10).corner_normals();
        // Group 1 holds face 0 alone, group 2 holds both faces.
        let expected = Vec3::Z + (Vec3::Z + Vec3::Y);
        assert!((normals[0][0] - expected).length() < 1e-6);
        assert!((normals[1][1] - (Vec3::Z + Vec3::Y)).length() < 1e-6);
    }

    #[test]
    fn disjoint_groups_keep_the_crease() {
        let normals = folded(1, 2).corner_normals();
        assert!((normals[0][0] - Vec3::Z).length() < 1e-6);
        assert!((normals[1][0] - Vec3::Y).length() < 1e-6);
    }

    #[test]
    fn color_precedence() {
        let red = Color::new(1.0, 0.0, 0.0, 1.0);
        let green = Color::new(0.0, 1.0, 0.0, 1.0);
        let grey = Color::new(0.5, 0.5, 0.5, 1.0);
        let mut mesh = folded(0, 0);
        assert_eq!(mesh.corner_colors(grey)[0], [grey; 3]);
        mesh.face_colors = Some(vec![red]);
        let colors = mesh.corner_colors(grey);
        assert_eq!(colors[0], [red; 3]);
        // Faces missing from the face color list fall back to the default.
        assert_eq!(colors[1], [grey; 3]);
        mesh.vertex_colors = Some(vec![green; 4]);
        let colors = mesh.corner_colors(grey);
        assert_eq!(colors[0], [green; 3]);
        assert_eq!(colors[1], [green; 3]);
    }

    #[test]
    fn expansion_is_deterministic() {
        let mesh = folded(1, 1);
        let color = Color::new(0.2, 0.4, 0.6, 0.5);
        let a = expand_mesh(&mesh, color);
        let b = expand_mesh(&mesh, color);
        assert_eq!(a, b);
        assert_eq!(a.len(), 6);
        assert_eq!(a[4].position, [0.0, 0.0, 0.0]);
        assert_eq!(a[0].color, [0.2, 0.4, 0.6, 0.5]);
    }

    #[test]
    fn degenerate_face_has_zero_normal() {
        let mesh = TriMesh::new(vec![Vec3::ZERO, Vec3::X, Vec3::X * 2.0], vec![TriFace::new(0, 1, 2)]);
        assert_eq!(mesh.corner_normals()[0], [Vec3::ZERO; 3]);
    }
}
