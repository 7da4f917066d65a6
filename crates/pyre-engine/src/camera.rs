//! View and projection matrices for the mesh path.
//!
//! Projection starts from the standard symmetric perspective and is then
//! corrected for the clip-space convention: Y negated (clip Y points
//! down) and depth remapped from [-1, 1] to [0, 1].

use glam::{Mat4, Vec3};

pub const FOV_Y_RADIANS: f32 = std::f32::consts::FRAC_PI_4;
pub const NEAR_PLANE: f32 = 0.1;
pub const FAR_PLANE: f32 = 100.0;

/// Perspective projection for the current extent's aspect ratio.
pub fn projection(aspect: f32) -> Mat4 {
    let mut m = Mat4::perspective_rh_gl(FOV_Y_RADIANS, aspect, NEAR_PLANE, FAR_PLANE)
        .to_cols_array_2d();

    // Clip Y points down.
    m[1][1] = -m[1][1];

    // Depth [-1, 1] -> [0, 1].
    m[2][2] = 0.5 * (m[2][2] - 1.0);
    m[3][2] = 0.5 * m[3][2];

    Mat4::from_cols_array_2d(&m)
}

/// Right-handed look-at with up = +Y.
pub fn view(eye: Vec3, target: Vec3) -> Mat4 {
    Mat4::look_at_rh(eye, target, Vec3::Y)
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec4;

    fn project(m: Mat4, p: Vec3) -> Vec3 {
        let clip = m * Vec4::new(p.x, p.y, p.z, 1.0);
        Vec3::new(clip.x / clip.w, clip.y / clip.w, clip.z / clip.w)
    }

    #[test]
    fn test_near_plane_maps_to_zero_depth() {
        let m = projection(16.0 / 9.0);
        let ndc = project(m, Vec3::new(0.0, 0.0, -NEAR_PLANE));
        assert!(ndc.z.abs() < 1e-5, "near depth was {}", ndc.z);
    }

    #[test]
    fn test_far_plane_maps_to_one_depth() {
        let m = projection(16.0 / 9.0);
        let ndc = project(m, Vec3::new(0.0, 0.0, -FAR_PLANE));
        assert!((ndc.z - 1.0).abs() < 1e-4, "far depth was {}", ndc.z);
    }

    #[test]
    fn test_up_in_view_maps_to_negative_clip_y() {
        // A point above the view axis lands in the upper half of the
        // framebuffer, which is negative Y in this clip convention.
        let m = projection(1.0);
        let ndc = project(m, Vec3::new(0.0, 1.0, -5.0));
        assert!(ndc.y < 0.0);
    }

    #[test]
    fn test_view_looks_down_negative_z() {
        let v = view(Vec3::new(0.0, 0.0, 6.0), Vec3::ZERO);
        // The target sits on the view-space -Z axis.
        let t = v * Vec4::new(0.0, 0.0, 0.0, 1.0);
        assert!(t.z < 0.0);
        assert!(t.x.abs() < 1e-6 && t.y.abs() < 1e-6);
    }

    #[test]
    fn test_view_preserves_eye_at_origin() {
        let eye = Vec3::new(0.0, 3.0, 6.0);
        let v = view(eye, Vec3::ZERO);
        let e = v * Vec4::new(eye.x, eye.y, eye.z, 1.0);
        assert!(e.truncate().length() < 1e-5);
    }
}
