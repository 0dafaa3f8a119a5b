//! Small conversions between cgmath types and GPU-facing arrays.

use cgmath::{Matrix2, Matrix3, Matrix4, Vector3};

/// Column-major floats of a 4x4 matrix.
pub fn mat4_array(m: &Matrix4<f32>) -> [f32; 16] {
    let columns: [[f32; 4]; 4] = (*m).into();
    bytemuck::cast(columns)
}

pub fn mat3_array(m: &Matrix3<f32>) -> [f32; 9] {
    let columns: [[f32; 3]; 3] = (*m).into();
    bytemuck::cast(columns)
}

pub fn mat2_array(m: &Matrix2<f32>) -> [f32; 4] {
    let columns: [[f32; 2]; 2] = (*m).into();
    bytemuck::cast(columns)
}

/// Reads native-endian `f32`s out of a byte slice of any alignment.
pub fn floats_from_bytes(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|c| f32::from_ne_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

/// Component-wise comparison within `eps`.
pub fn vec3_approx_eq(a: Vector3<f32>, b: Vector3<f32>, eps: f32) -> bool {
    (a.x - b.x).abs() <= eps && (a.y - b.y).abs() <= eps && (a.z - b.z).abs() <= eps
}

pub fn mat4_approx_eq(a: &Matrix4<f32>, b: &Matrix4<f32>, eps: f32) -> bool {
    mat4_array(a)
        .iter()
        .zip(mat4_array(b).iter())
        .all(|(x, y)| (x - y).abs() <= eps)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mat4_array_is_column_major() {
        let m = Matrix4::from_translation(Vector3::new(1.0f32, 2.0, 3.0));
        let a = mat4_array(&m);
        assert_eq!(&a[12..15], &[1.0, 2.0, 3.0]);
        assert_eq!(a[15], 1.0);
    }

    #[test]
    fn test_floats_from_bytes() {
        let bytes: Vec<u8> = [1.5f32, -2.0].iter().flat_map(|f| f.to_ne_bytes()).collect();
        assert_eq!(floats_from_bytes(&bytes), vec![1.5, -2.0]);
    }
}
