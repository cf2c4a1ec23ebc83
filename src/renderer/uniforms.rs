//! View and projection parameters and the per-draw uniform block.

use crate::color::{self, Color};
use bytemuck::{Pod, Zeroable};
use glamx::{Mat3, Mat4, Vec3, Vec4};

/// Projection of the viewport camera.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct ProjParams {
    /// World-to-view transformation.
    pub view_matrix: Mat4,
    /// View-to-clip transformation, depth mapped to `[0, 1]`.
    pub projection_matrix: Mat4,
    pub inverse_projection_matrix: Mat4,
    pub is_perspective: bool,
    pub znear: f32,
    pub zfar: f32,
    /// Vertical field of view (perspective) or half the visible height
    /// (parallel projection).
    pub fov: f32,
    pub aspect_ratio: f32,
}

impl ProjParams {
    /// A perspective camera.
    pub fn perspective(view_matrix: Mat4, fov_y: f32, aspect_ratio: f32, znear: f32, zfar: f32) -> Self {
        let projection_matrix = Mat4::perspective_rh(fov_y, aspect_ratio, znear, zfar);
        ProjParams {
            view_matrix,
            projection_matrix,
            inverse_projection_matrix: projection_matrix.inverse(),
            is_perspective: true,
            znear,
            zfar,
            fov: fov_y,
            aspect_ratio,
        }
    }

    /// A parallel camera showing `2 * half_height` world units vertically.
    pub fn orthographic(view_matrix: Mat4, half_height: f32, aspect_ratio: f32, znear: f32, zfar: f32) -> Self {
        let half_width = half_height * aspect_ratio;
        let projection_matrix =
            Mat4::orthographic_rh(-half_width, half_width, -half_height, half_height, znear, zfar);
        ProjParams {
            view_matrix,
            projection_matrix,
            inverse_projection_matrix: projection_matrix.inverse(),
            is_perspective: false,
            znear,
            zfar,
            fov: half_height,
            aspect_ratio,
        }
    }
}

impl Default for ProjParams {
    fn default() -> Self {
        Self::orthographic(Mat4::IDENTITY, 1.0, 1.0, -1.0, 1.0)
    }
}

/// Pixel rectangle of the render target being drawn to.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Viewport {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Viewport {
    /// A viewport covering a `width x height` target.
    pub fn new(width: u32, height: u32) -> Self {
        Viewport {
            x: 0,
            y: 0,
            width: width.max(1),
            height: height.max(1),
        }
    }

    #[inline]
    pub fn aspect_ratio(&self) -> f32 {
        self.width as f32 / self.height as f32
    }
}

/// The uniform block of every built-in program. Layout must match
/// `DrawUniforms` in `common.wgsl`.
#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
pub struct DrawUniforms {
    pub modelview: [[f32; 4]; 4],
    pub projection: [[f32; 4]; 4],
    pub inverse_projection: [[f32; 4]; 4],
    pub modelview_projection: [[f32; 4]; 4],
    pub normal_matrix: [[f32; 4]; 4],
    /// xy: origin, zw: 2 / size
    pub viewport: [f32; 4],
    /// xyz: eye position in object space, w: 1 for perspective
    pub eye_pos: [f32; 4],
    /// xyz: parallel viewing direction in object space, w: uniform scale
    pub view_dir: [f32; 4],
    /// x: base point size, y: line half width per unit depth
    pub params: [f32; 4],
    pub color: [f32; 4],
    /// picking base id, vertices per element, instanced, first element of the chunk
    pub ids: [u32; 4],
}

impl DrawUniforms {
    /// Derives the transformation uniforms of a draw.
    pub fn new(proj: &ProjParams, modelview: Mat4, viewport: &Viewport) -> Self {
        let inverse_modelview = modelview.inverse();
        let linear = Mat3::from_mat4(modelview);
        let normal = Mat4::from_mat3(linear.inverse().transpose());
        let eye = inverse_modelview * Vec4::new(0.0, 0.0, 0.0, 1.0);
        let dir = inverse_modelview * Vec4::new(0.0, 0.0, -1.0, 0.0);
        let uniform_scale = linear.determinant().abs().cbrt();
        let base_point_size = proj.projection_matrix.y_axis.y * viewport.height as f32;

        DrawUniforms {
            modelview: modelview.to_cols_array_2d(),
            projection: proj.projection_matrix.to_cols_array_2d(),
            inverse_projection: proj.inverse_projection_matrix.to_cols_array_2d(),
            modelview_projection: (proj.projection_matrix * modelview).to_cols_array_2d(),
            normal_matrix: normal.to_cols_array_2d(),
            viewport: [
                viewport.x as f32,
                viewport.y as f32,
                2.0 / viewport.width as f32,
                2.0 / viewport.height as f32,
            ],
            eye_pos: [eye.x, eye.y, eye.z, if proj.is_perspective { 1.0 } else { 0.0 }],
            view_dir: [dir.x, dir.y, dir.z, uniform_scale],
            params: [base_point_size, 0.0, 0.0, 0.0],
            color: [1.0; 4],
            ids: [0, 1, 0, 0],
        }
    }

    /// Sets the line half width per unit of view depth for a line `width`
    /// pixels wide.
    pub fn with_line_width(mut self, width: f32) -> Self {
        let base = self.params[0];
        self.params[1] = if base != 0.0 { width / base } else { 0.0 };
        self
    }

    pub fn with_color(mut self, color: Color) -> Self {
        self.color = color::to_array(color);
        self
    }

    /// Sets the picking base id and the addressing of sub-objects.
    pub fn with_ids(mut self, base_id: u32, vertices_per_element: u32, instanced: bool, first_element: u32) -> Self {
        self.ids = [base_id, vertices_per_element.max(1), instanced as u32, first_element];
        self
    }

    /// Direction the camera looks along, in object space.
    pub fn view_direction(&self) -> Vec3 {
        Vec3::new(self.view_dir[0], self.view_dir[1], self.view_dir[2])
    }
}

/// Object-space direction whose dot product with a position grows towards the
/// viewer: the third column of the inverse model-view matrix.
pub fn sort_direction(modelview: &Mat4) -> Vec3 {
    modelview.inverse().z_axis.truncate()
}

/// Indices of `positions` sorted by ascending distance along `direction`,
/// i.e. farthest first when `direction` points towards the viewer.
pub fn back_to_front_order(positions: &[Vec3], direction: Vec3) -> Vec<usize> {
    let depths: Vec<f32> = positions.iter().map(|p| p.dot(direction)).collect();
    let mut order: Vec<usize> = (0..positions.len()).collect();
    order.sort_by(|a, b| depths[*a].total_cmp(&depths[*b]));
    order
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uniform_block_size_matches_shader() {
        assert_eq!(std::mem::size_of::<DrawUniforms>(), 5 * 64 + 5 * 16 + 16);
        assert_eq!(std::mem::size_of::<DrawUniforms>() % 16, 0);
    }

    #[test]
    fn point_size_and_line_width() {
        let proj = ProjParams::perspective(Mat4::IDENTITY, 1.0, 1.0, 0.1, 100.0);
        let vp = Viewport::new(200, 100);
        let u = DrawUniforms::new(&proj, Mat4::IDENTITY, &vp).with_line_width(4.0);
        let p11 = proj.projection_matrix.y_axis.y;
        assert!((u.params[0] - p11 * 100.0).abs() < 1e-4);
        assert!((u.params[1] - 4.0 / (p11 * 100.0)).abs() < 1e-6);
        assert_eq!(u.eye_pos[3], 1.0);
    }

    #[test]
    fn uniform_scale_of_scaled_transform() {
        let proj = ProjParams::default();
        let mv = Mat4::from_scale(Vec3::splat(2.0));
        let u = DrawUniforms::new(&proj, mv, &Viewport::new(10, 10));
        assert!((u.view_dir[3] - 2.0).abs() < 1e-5);
        assert_eq!(u.eye_pos[3], 0.0);
    }

    #[test]
    fn sort_direction_points_to_viewer() {
        // Camera at z = 5 looking down -z.
        let view = Mat4::look_at_rh(Vec3::new(0.0, 0.0, 5.0), Vec3::ZERO, Vec3::Y);
        let d = sort_direction(&view);
        let near = Vec3::new(0.0, 0.0, 1.0);
        let far = Vec3::new(0.0, 0.0, -1.0);
        assert!(d.dot(near) > d.dot(far));
    }

    #[test]
    fn order_is_non_decreasing_along_direction() {
        use rand::Rng;
        let mut rng = rand::rng();
        let positions: Vec<Vec3> = (0..200)
            .map(|_| Vec3::new(rng.random_range(-5.0..5.0), rng.random_range(-5.0..5.0), rng.random_range(-5.0..5.0)))
            .collect();
        let dir = Vec3::new(0.3, -0.2, 0.9).normalize();
        let order = back_to_front_order(&positions, dir);
        assert_eq!(order.len(), positions.len());
        for pair in order.windows(2) {
            assert!(positions[pair[0]].dot(dir) <= positions[pair[1]].dot(dir));
        }
    }
}
