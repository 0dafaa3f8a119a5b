//! # Primitive Shape Generation
//!
//! Indexed generators for common shapes plus ready-made meshes. All shapes
//! are Y-up with counter-clockwise winding seen from outside.

use std::f32::consts::PI;

use cgmath::Vector3;

use super::GeometryData;
use crate::gfx::scene::mesh::Mesh;
use crate::gfx::scene::vertex::Vertex;

/// Indexed unit cube centered at the origin (corners at ±0.5), 24 vertices.
///
/// Each face has its own four vertices so normals stay flat.
pub fn generate_cube() -> GeometryData {
    let mut data = GeometryData::new();

    data.vertices = vec![
        // Front (+Z)
        [-0.5, -0.5, 0.5], [0.5, -0.5, 0.5], [0.5, 0.5, 0.5], [-0.5, 0.5, 0.5],
        // Back (-Z)
        [-0.5, -0.5, -0.5], [-0.5, 0.5, -0.5], [0.5, 0.5, -0.5], [0.5, -0.5, -0.5],
        // Left (-X)
        [-0.5, -0.5, -0.5], [-0.5, -0.5, 0.5], [-0.5, 0.5, 0.5], [-0.5, 0.5, -0.5],
        // Right (+X)
        [0.5, -0.5, 0.5], [0.5, -0.5, -0.5], [0.5, 0.5, -0.5], [0.5, 0.5, 0.5],
        // Top (+Y)
        [-0.5, 0.5, 0.5], [0.5, 0.5, 0.5], [0.5, 0.5, -0.5], [-0.5, 0.5, -0.5],
        // Bottom (-Y)
        [-0.5, -0.5, -0.5], [0.5, -0.5, -0.5], [0.5, -0.5, 0.5], [-0.5, -0.5, 0.5],
    ];

    data.tex_coords = vec![
        [0.0, 0.0], [1.0, 0.0], [1.0, 1.0], [0.0, 1.0],
        [1.0, 0.0], [1.0, 1.0], [0.0, 1.0], [0.0, 0.0],
        [0.0, 0.0], [1.0, 0.0], [1.0, 1.0], [0.0, 1.0],
        [0.0, 0.0], [1.0, 0.0], [1.0, 1.0], [0.0, 1.0],
        [0.0, 0.0], [1.0, 0.0], [1.0, 1.0], [0.0, 1.0],
        [0.0, 0.0], [1.0, 0.0], [1.0, 1.0], [0.0, 1.0],
    ];

    let face_normals = [
        [0.0, 0.0, 1.0],
        [0.0, 0.0, -1.0],
        [-1.0, 0.0, 0.0],
        [1.0, 0.0, 0.0],
        [0.0, 1.0, 0.0],
        [0.0, -1.0, 0.0],
    ];
    data.normals = face_normals.iter().flat_map(|n| [*n; 4]).collect();

    data.indices = (0..6u32)
        .flat_map(|face| {
            let b = face * 4;
            [b, b + 1, b + 2, b + 2, b + 3, b]
        })
        .collect();

    data
}

/// Indexed UV sphere of radius 1.
///
/// # Arguments
/// * `longitude_segments` - Segments around the Y axis (at least 3)
/// * `latitude_segments` - Segments from pole to pole (at least 2)
pub fn generate_sphere(longitude_segments: u32, latitude_segments: u32) -> GeometryData {
    let mut data = GeometryData::new();

    let long_segs = longitude_segments.max(3);
    let lat_segs = latitude_segments.max(2);

    for lat in 0..=lat_segs {
        let theta = lat as f32 * PI / lat_segs as f32;
        let (sin_theta, cos_theta) = theta.sin_cos();

        for long in 0..=long_segs {
            let phi = long as f32 * 2.0 * PI / long_segs as f32;
            let (sin_phi, cos_phi) = phi.sin_cos();

            let p = [sin_theta * cos_phi, cos_theta, sin_theta * sin_phi];
            data.vertices.push(p);
            data.normals.push(p);
            data.tex_coords
                .push([long as f32 / long_segs as f32, 1.0 - lat as f32 / lat_segs as f32]);
        }
    }

    for lat in 0..lat_segs {
        for long in 0..long_segs {
            let first = lat * (long_segs + 1) + long;
            let second = first + long_segs + 1;

            data.indices.extend_from_slice(&[first, first + 1, second]);
            data.indices.extend_from_slice(&[second, first + 1, second + 1]);
        }
    }

    data
}

/// Indexed plane in XZ facing +Y, centered at the origin.
///
/// # Arguments
/// * `width` - Extent along X
/// * `depth` - Extent along Z
/// * `width_segments`, `depth_segments` - Subdivisions (at least 1)
pub fn generate_plane(width: f32, depth: f32, width_segments: u32, depth_segments: u32) -> GeometryData {
    let mut data = GeometryData::new();

    let w_segs = width_segments.max(1);
    let d_segs = depth_segments.max(1);

    for z in 0..=d_segs {
        let v = z as f32 / d_segs as f32;
        for x in 0..=w_segs {
            let u = x as f32 / w_segs as f32;
            data.vertices.push([(u - 0.5) * width, 0.0, (v - 0.5) * depth]);
            data.normals.push([0.0, 1.0, 0.0]);
            data.tex_coords.push([u, 1.0 - v]);
        }
    }

    for z in 0..d_segs {
        for x in 0..w_segs {
            let i = z * (w_segs + 1) + x;
            let next_row = i + w_segs + 1;
            data.indices.extend_from_slice(&[i, next_row, i + 1]);
            data.indices.extend_from_slice(&[next_row, next_row + 1, i + 1]);
        }
    }

    data
}

/// Unit cube as a 36-vertex triangle list with flat normals.
pub fn cube() -> Mesh {
    Mesh::from_vertices(generate_cube().to_triangle_list(Vector3::new(1.0, 1.0, 1.0)))
}

/// Flat `width` x `depth` plane facing +Y, as a triangle list.
pub fn plane(width: f32, depth: f32) -> Mesh {
    Mesh::from_vertices(generate_plane(width, depth, 1, 1).to_triangle_list(Vector3::new(1.0, 1.0, 1.0)))
}

/// Single triangle in the XY plane facing +Z.
pub fn triangle() -> Mesh {
    let mut mesh = Mesh::new();
    mesh.add_face(
        Vertex::at(Vector3::new(-0.5, -0.5, 0.0)).with_color(Vector3::new(1.0, 0.0, 0.0)),
        Vertex::at(Vector3::new(0.5, -0.5, 0.0)).with_color(Vector3::new(0.0, 1.0, 0.0)),
        Vertex::at(Vector3::new(0.0, 0.5, 0.0)).with_color(Vector3::new(0.0, 0.0, 1.0)),
        true,
    );
    mesh
}

#[cfg(test)]
mod tests {
    use super::*;
    use cgmath::InnerSpace;

    /// Every triangle's winding normal must point away from the origin.
    fn assert_outward(vertices: &[Vertex]) {
        for tri in vertices.chunks_exact(3) {
            let p: Vec<Vector3<f32>> = tri.iter().map(|v| v.position()).collect();
            let normal = (p[0] - p[1]).cross(p[1] - p[2]);
            let centroid = (p[0] + p[1] + p[2]) / 3.0;
            if normal.magnitude2() > 1e-10 {
                assert!(normal.dot(centroid) > 0.0, "inward triangle {:?}", p);
            }
        }
    }

    #[test]
    fn test_cube_generation() {
        let cube = generate_cube();
        assert_eq!(cube.vertex_count(), 24);
        assert_eq!(cube.triangle_count(), 12);
    }

    #[test]
    fn test_cube_mesh_is_36_outward_vertices() {
        let mesh = cube();
        assert_eq!(mesh.vertices().len(), 36);
        assert_outward(mesh.vertices());

        for tri in mesh.vertices().chunks_exact(3) {
            let p: Vec<Vector3<f32>> = tri.iter().map(|v| v.position()).collect();
            let winding = (p[0] - p[1]).cross(p[1] - p[2]).normalize();
            assert!((winding - tri[0].normal()).magnitude() < 1e-6);
        }
    }

    #[test]
    fn test_sphere_winds_outward() {
        let sphere = generate_sphere(8, 6);
        assert_eq!(sphere.vertices.len(), sphere.normals.len());
        assert_eq!(sphere.vertices.len(), sphere.tex_coords.len());
        assert_outward(&sphere.to_triangle_list(Vector3::new(1.0, 1.0, 1.0)));
    }

    #[test]
    fn test_plane_generation() {
        let plane = generate_plane(2.0, 2.0, 2, 2);
        assert_eq!(plane.vertices.len(), 9);
        assert_eq!(plane.indices.len(), 24);

        let list = plane.to_triangle_list(Vector3::new(1.0, 1.0, 1.0));
        for tri in list.chunks_exact(3) {
            let p: Vec<Vector3<f32>> = tri.iter().map(|v| v.position()).collect();
            assert!((p[0] - p[1]).cross(p[1] - p[2]).y > 0.0);
        }
    }

    #[test]
    fn test_triangle_faces_z() {
        let mesh = triangle();
        assert_eq!(mesh.vertices()[0].normal, [0.0, 0.0, 1.0]);
    }
}
