use cgmath::{ortho, perspective, Deg, Matrix4};

/// Maps OpenGL clip space (z in -1..1) onto wgpu clip space (z in 0..1).
#[rustfmt::skip]
pub const OPENGL_TO_WGPU_MATRIX: Matrix4<f32> = Matrix4::new(
    1.0, 0.0, 0.0, 0.0,
    0.0, 1.0, 0.0, 0.0,
    0.0, 0.0, 0.5, 0.0,
    0.0, 0.0, 0.5, 1.0,
);

/// Camera lens.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Projection {
    Perspective {
        fov: Deg<f32>,
        aspect: f32,
        near: f32,
        far: f32,
    },
    Orthographic {
        left: f32,
        right: f32,
        bottom: f32,
        top: f32,
        near: f32,
        far: f32,
    },
}

impl Projection {
    pub fn matrix(&self) -> Matrix4<f32> {
        let gl = match *self {
            Projection::Perspective { fov, aspect, near, far } => perspective(fov, aspect, near, far),
            Projection::Orthographic { left, right, bottom, top, near, far } => {
                ortho(left, right, bottom, top, near, far)
            }
        };
        OPENGL_TO_WGPU_MATRIX * gl
    }

    /// Adapts the lens to a new viewport.
    ///
    /// Perspective lenses take the new aspect ratio. Orthographic lenses keep
    /// their horizontal extent and recompute the vertical one around its center.
    pub fn resize(&mut self, width: u32, height: u32) {
        if width == 0 || height == 0 {
            return;
        }
        let new_aspect = width as f32 / height as f32;
        match self {
            Projection::Perspective { aspect, .. } => *aspect = new_aspect,
            Projection::Orthographic { left, right, bottom, top, .. } => {
                let half_height = (*right - *left) / new_aspect / 2.0;
                let center = (*top + *bottom) / 2.0;
                *bottom = center - half_height;
                *top = center + half_height;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cgmath::Vector4;

    #[test]
    fn test_perspective_depth_range_is_zero_to_one() {
        let projection = Projection::Perspective {
            fov: Deg(60.0),
            aspect: 1.5,
            near: 0.1,
            far: 200.0,
        };
        let m = projection.matrix();

        let near = m * Vector4::new(0.0, 0.0, -0.1, 1.0);
        let far = m * Vector4::new(0.0, 0.0, -200.0, 1.0);
        assert!((near.z / near.w).abs() < 1e-5);
        assert!((far.z / far.w - 1.0).abs() < 1e-4);
    }

    #[test]
    fn test_orthographic_resize_keeps_width() {
        let mut projection = Projection::Orthographic {
            left: -10.0,
            right: 10.0,
            bottom: -5.0,
            top: 5.0,
            near: 0.1,
            far: 100.0,
        };
        projection.resize(400, 400);
        assert_eq!(
            projection,
            Projection::Orthographic {
                left: -10.0,
                right: 10.0,
                bottom: -10.0,
                top: 10.0,
                near: 0.1,
                far: 100.0,
            }
        );
    }
}
