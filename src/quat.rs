//! Rotation helpers: euler angles in FBX rotation orders, and the X-mirror that moves
//! FBX's right handed data into the left handed output space.

use glam::{EulerRot, Mat4, Quat, Vec3};

/// Order in which the three axis rotations are applied, FBX's `RotationOrder` enum.
/// `Xyz` rotates about X first, then Y, then Z.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EulerOrder {
    #[default]
    Xyz,
    Xzy,
    Yzx,
    Yxz,
    Zxy,
    Zyx,
}

impl EulerOrder {
    /// From FBX's `RotationOrder` value. Spheric XYZ (6) is treated as XYZ.
    pub fn from_fbx(v: i64) -> Self {
        use EulerOrder::*;
        match v {
            1 => Xzy,
            2 => Yzx,
            3 => Yxz,
            4 => Zxy,
            5 => Zyx,
            _ => Xyz,
        }
    }

    /// Axis indices in application order.
    fn axes(self) -> [usize; 3] {
        use EulerOrder::*;
        match self {
            Xyz => [0, 1, 2],
            Xzy => [0, 2, 1],
            Yzx => [1, 2, 0],
            Yxz => [1, 0, 2],
            Zxy => [2, 0, 1],
            Zyx => [2, 1, 0],
        }
    }

    /// The same sequence about fixed axes, taking its angles in application order.
    fn euler_rot(self) -> EulerRot {
        use EulerOrder::*;
        match self {
            Xyz => EulerRot::XYZEx,
            Xzy => EulerRot::XZYEx,
            Yzx => EulerRot::YZXEx,
            Yxz => EulerRot::YXZEx,
            Zxy => EulerRot::ZXYEx,
            Zyx => EulerRot::ZYXEx,
        }
    }
}

/// Quaternion of euler angles (radians, indexed by axis) applied in `order`.
pub fn quat_from_euler(angles: Vec3, order: EulerOrder) -> Quat {
    let [a, b, c] = order.axes();
    let angles = angles.to_array();
    Quat::from_euler(order.euler_rot(), angles[a], angles[b], angles[c])
}

/// Inverse of [`quat_from_euler`] for angles away from gimbal lock.
pub fn euler_from_quat(q: Quat, order: EulerOrder) -> Vec3 {
    let [a, b, c] = order.axes();
    let mut out = [0.; 3];
    (out[a], out[b], out[c]) = q.normalize().to_euler(order.euler_rot());
    Vec3::from_array(out)
}

/// Degrees to radians, per component.
pub fn radians([x, y, z]: [f64; 3]) -> Vec3 {
    Vec3::new(x.to_radians() as f32, y.to_radians() as f32, z.to_radians() as f32)
}

/// Mirrors a rotation across the YZ plane: conjugation by `diag(-1, 1, 1)`.
#[inline]
pub fn mirror_x(q: Quat) -> Quat {
    Quat::from_xyzw(q.x, -q.y, -q.z, q.w)
}

/// Mirrors a point or direction across the YZ plane.
#[inline]
pub fn mirror_x_vec([x, y, z]: [f64; 3]) -> Vec3 {
    Vec3::new(-x as f32, y as f32, z as f32)
}

/// Mirrors an affine transform across the YZ plane: `S * m * S` with `S = diag(-1, 1, 1, 1)`.
pub fn mirror_x_mat(m: Mat4) -> Mat4 {
    let s = Mat4::from_scale(Vec3::new(-1., 1., 1.));
    s * m * s
}

/// Final rotation of a node: `pre * rotation * post^-1`, mirrored into output space.
/// `rotation` is in the node's euler order, pre and post rotations are always XYZ.
pub fn compose_rotation(
    pre: Option<Vec3>,
    rotation: Vec3,
    post: Option<Vec3>,
    order: EulerOrder,
) -> Quat {
    let pre = pre.map_or(Quat::IDENTITY, |p| quat_from_euler(p, EulerOrder::Xyz));
    let post = post.map_or(Quat::IDENTITY, |p| quat_from_euler(p, EulerOrder::Xyz));
    let q = pre * quat_from_euler(rotation, order) * post.inverse();
    mirror_x(q)
}

/// Inverse of [`compose_rotation`]: recovers the euler rotation from an output quaternion.
pub fn decompose_rotation(
    q: Quat,
    pre: Option<Vec3>,
    post: Option<Vec3>,
    order: EulerOrder,
) -> Vec3 {
    let pre = pre.map_or(Quat::IDENTITY, |p| quat_from_euler(p, EulerOrder::Xyz));
    let post = post.map_or(Quat::IDENTITY, |p| quat_from_euler(p, EulerOrder::Xyz));
    let local = pre.inverse() * mirror_x(q) * post;
    euler_from_quat(local, order)
}

#[test]
fn test_xyz_applies_x_first() {
    let q = quat_from_euler(
        Vec3::new(90f32.to_radians(), 90f32.to_radians(), 0.),
        EulerOrder::Xyz,
    );
    // X first sends +Y to +Z, then Y sends +Z to +X
    let v = q * Vec3::Y;
    assert!(v.abs_diff_eq(Vec3::X, 1e-5), "{v:?}");

    let z_last = quat_from_euler(Vec3::new(0.4, 0., 0.9), EulerOrder::Xyz);
    let expected = Quat::from_rotation_z(0.9) * Quat::from_rotation_x(0.4);
    assert!(z_last.abs_diff_eq(expected, 1e-6), "{z_last:?}");
}

#[test]
fn test_euler_roundtrip_all_orders() {
    use EulerOrder::*;
    let angles = Vec3::new(0.3, -0.7, 1.1);
    for order in [Xyz, Xzy, Yzx, Yxz, Zxy, Zyx] {
        let q = quat_from_euler(angles, order);
        let back = euler_from_quat(q, order);
        assert!(back.abs_diff_eq(angles, 1e-4), "{order:?}: {back:?}");
    }
}

#[test]
fn test_identity_pre_post_is_exact() {
    let r = Vec3::new(0.2, 0.4, -1.3);
    let composed = compose_rotation(Some(Vec3::ZERO), r, Some(Vec3::ZERO), EulerOrder::Zxy);
    assert_eq!(composed, mirror_x(quat_from_euler(r, EulerOrder::Zxy)));
    let composed = compose_rotation(None, r, None, EulerOrder::Zxy);
    assert_eq!(composed, mirror_x(quat_from_euler(r, EulerOrder::Zxy)));
}

#[test]
fn test_decompose_inverts_compose() {
    let pre = Some(Vec3::new(0.5, 0., 0.25));
    let post = Some(Vec3::new(0., -0.3, 0.));
    let r = Vec3::new(0.1, 0.2, 0.3);
    let q = compose_rotation(pre, r, post, EulerOrder::Yxz);
    let back = decompose_rotation(q, pre, post, EulerOrder::Yxz);
    assert!(back.abs_diff_eq(r, 1e-4), "{back:?}");
}

#[test]
fn test_mirror_matches_matrix_mirror() {
    let q = quat_from_euler(Vec3::new(0.3, 0.5, -0.2), EulerOrder::Xyz);
    let m = mirror_x_mat(Mat4::from_quat(q));
    let (_, r, _) = m.to_scale_rotation_translation();
    assert!(r.abs_diff_eq(mirror_x(q), 1e-5) || r.abs_diff_eq(-mirror_x(q), 1e-5));
}
