use serde::{Deserialize, Serialize};
use ultraviolet::{Mat4, Rotor3, Vec3};

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct Transform {
    pub position: Vec3,
    pub orientation: Rotor3,
    pub scale: Vec3,
}

impl Transform {
    /// `orientation` is a quaternion in `[x, y, z, w]` order.
    pub fn from_arrays(position: [f32; 3], orientation: [f32; 4], scale: [f32; 3]) -> Self {
        Self {
            position: Vec3::from(position),
            orientation: Rotor3::from_quaternion_array(orientation),
            scale: Vec3::from(scale),
        }
    }
}

impl Default for Transform {
    fn default() -> Self {
        Self {
            position: Vec3::zero(),
            orientation: Rotor3::identity(),
            scale: Vec3::one(),
        }
    }
}

impl From<Transform> for Mat4 {
    fn from(transform: Transform) -> Self {
        let isometry = ultraviolet::Isometry3::new(transform.position, transform.orientation);
        isometry.into_homogeneous_matrix() * Mat4::from_nonuniform_scale(transform.scale)
    }
}

/// Row-major 3x4 form of an affine matrix, the layout acceleration structure
/// instances expect. The last row `[0, 0, 0, 1]` is dropped, so projective
/// matrices lose information here.
pub fn affine_rows(matrix: &Mat4) -> [[f32; 4]; 3] {
    let c = &matrix.cols;
    [
        [c[0].x, c[1].x, c[2].x, c[3].x],
        [c[0].y, c[1].y, c[2].y, c[3].y],
        [c[0].z, c[1].z, c[2].z, c[3].z],
    ]
}
