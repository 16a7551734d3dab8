//! 4x4 homogeneous transform algebra plus a save/restore transform stack.
//!
//! Matrices are 16-element column-major arrays, matching the layout OpenGL
//! expects for `uniform mat4` uploads. All free functions are pure; the only
//! stateful piece is [`MatrixStack`], which mirrors the classic scene-graph
//! push/pop discipline.

use tracing::warn;

/// Column-major 4x4 matrix.
pub type Mat4 = [f32; 16];

/// Returns the identity matrix.
pub fn identity() -> Mat4 {
    [
        1.0, 0.0, 0.0, 0.0, //
        0.0, 1.0, 0.0, 0.0, //
        0.0, 0.0, 1.0, 0.0, //
        0.0, 0.0, 0.0, 1.0,
    ]
}

/// Generalized 4x4 product `a * b` in column-major order.
pub fn multiply(a: &Mat4, b: &Mat4) -> Mat4 {
    let mut dst = [0.0f32; 16];
    for col in 0..4 {
        for row in 0..4 {
            let mut sum = 0.0;
            for k in 0..4 {
                sum += a[k * 4 + row] * b[col * 4 + k];
            }
            dst[col * 4 + row] = sum;
        }
    }
    dst
}

/// Swaps rows and columns.
pub fn transpose(a: &Mat4) -> Mat4 {
    let mut dst = [0.0f32; 16];
    for col in 0..4 {
        for row in 0..4 {
            dst[row * 4 + col] = a[col * 4 + row];
        }
    }
    dst
}

/// Inverse via cofactor expansion.
///
/// A singular input divides by a determinant of ~0 and the NaN/infinity
/// simply propagates, per IEEE semantics. Degenerate transforms are common
/// while a scene is mid-edit, so this is deliberately not an error path.
pub fn inverse(a: &Mat4) -> Mat4 {
    let sub = |c: usize, r: usize, i: usize, j: usize| a[((c + i) & 3) | (((r + j) & 3) << 2)];
    let cofactor = |c: usize, r: usize| {
        let s = |i: usize, j: usize| sub(c, r, i, j);
        let sign = if (c + r) & 1 == 1 { -1.0 } else { 1.0 };
        sign * (s(1, 1) * (s(2, 2) * s(3, 3) - s(3, 2) * s(2, 3))
            - s(2, 1) * (s(1, 2) * s(3, 3) - s(3, 2) * s(1, 3))
            + s(3, 1) * (s(1, 2) * s(2, 3) - s(2, 2) * s(1, 3)))
    };

    let mut dst = [0.0f32; 16];
    for (n, slot) in dst.iter_mut().enumerate() {
        *slot = cofactor(n >> 2, n & 3);
    }
    let mut det = 0.0;
    for n in 0..4 {
        det += a[n] * dst[n << 2];
    }
    for slot in &mut dst {
        *slot /= det;
    }
    dst
}

/// Translation by `t`.
pub fn translate(t: [f32; 3]) -> Mat4 {
    [
        1.0, 0.0, 0.0, 0.0, //
        0.0, 1.0, 0.0, 0.0, //
        0.0, 0.0, 1.0, 0.0, //
        t[0], t[1], t[2], 1.0,
    ]
}

/// Non-uniform scale by `s`.
pub fn scale(s: [f32; 3]) -> Mat4 {
    [
        s[0], 0.0, 0.0, 0.0, //
        0.0, s[1], 0.0, 0.0, //
        0.0, 0.0, s[2], 0.0, //
        0.0, 0.0, 0.0, 1.0,
    ]
}

/// Rotation about the x axis by `theta` radians.
pub fn rot_x(theta: f32) -> Mat4 {
    let (s, c) = theta.sin_cos();
    [
        1.0, 0.0, 0.0, 0.0, //
        0.0, c, s, 0.0, //
        0.0, -s, c, 0.0, //
        0.0, 0.0, 0.0, 1.0,
    ]
}

/// Rotation about the y axis by `theta` radians.
pub fn rot_y(theta: f32) -> Mat4 {
    let (s, c) = theta.sin_cos();
    [
        c, 0.0, -s, 0.0, //
        0.0, 1.0, 0.0, 0.0, //
        s, 0.0, c, 0.0, //
        0.0, 0.0, 0.0, 1.0,
    ]
}

/// Rotation about the z axis by `theta` radians.
pub fn rot_z(theta: f32) -> Mat4 {
    let (s, c) = theta.sin_cos();
    [
        c, s, 0.0, 0.0, //
        -s, c, 0.0, 0.0, //
        0.0, 0.0, 1.0, 0.0, //
        0.0, 0.0, 0.0, 1.0,
    ]
}

/// Applies `m` to a 3- or 4-component point.
///
/// A missing fourth component is treated as a homogeneous coordinate of 1.
pub fn transform(m: &Mat4, p: &[f32]) -> [f32; 4] {
    let x = p.first().copied().unwrap_or(0.0);
    let y = p.get(1).copied().unwrap_or(0.0);
    let z = p.get(2).copied().unwrap_or(0.0);
    let w = p.get(3).copied().unwrap_or(1.0);
    [
        m[0] * x + m[4] * y + m[8] * z + m[12] * w,
        m[1] * x + m[5] * y + m[9] * z + m[13] * w,
        m[2] * x + m[6] * y + m[10] * z + m[14] * w,
        m[3] * x + m[7] * y + m[11] * z + m[15] * w,
    ]
}

/// Perspective projection used to seed the aspect-correcting uniform.
pub fn perspective(fov_y_radians: f32, aspect: f32, near: f32, far: f32) -> Mat4 {
    let f = (std::f32::consts::FRAC_PI_2 - 0.5 * fov_y_radians).tan();
    let range_inv = 1.0 / (near - far);
    [
        f / aspect, 0.0, 0.0, 0.0, //
        0.0, f, 0.0, 0.0, //
        0.0, 0.0, (near + far) * range_inv, -1.0, //
        0.0, 0.0, near * far * range_inv * 2.0, 0.0,
    ]
}

/// Scene-graph style transform stack.
///
/// The mutating operations post-multiply the top matrix; `save`/`restore`
/// push and pop copies of it. Restoring past the root is a logged no-op
/// rather than an error so user scripts can be sloppy about balancing.
#[derive(Debug, Clone)]
pub struct MatrixStack {
    stack: Vec<Mat4>,
}

impl MatrixStack {
    pub fn new() -> Self {
        Self {
            stack: vec![identity()],
        }
    }

    /// Returns a copy of the top matrix.
    pub fn get(&self) -> Mat4 {
        *self.stack.last().expect("stack always holds a root matrix")
    }

    /// Replaces the top matrix.
    pub fn set(&mut self, m: Mat4) {
        *self.stack.last_mut().expect("stack always holds a root matrix") = m;
    }

    pub fn identity(&mut self) {
        self.set(identity());
    }

    pub fn translate(&mut self, t: [f32; 3]) {
        self.set(multiply(&self.get(), &translate(t)));
    }

    pub fn scale(&mut self, s: [f32; 3]) {
        self.set(multiply(&self.get(), &scale(s)));
    }

    pub fn rot_x(&mut self, theta: f32) {
        self.set(multiply(&self.get(), &rot_x(theta)));
    }

    pub fn rot_y(&mut self, theta: f32) {
        self.set(multiply(&self.get(), &rot_y(theta)));
    }

    pub fn rot_z(&mut self, theta: f32) {
        self.set(multiply(&self.get(), &rot_z(theta)));
    }

    /// Pushes a copy of the current top matrix.
    pub fn save(&mut self) {
        self.stack.push(self.get());
    }

    /// Pops the top matrix; popping the root is a logged no-op.
    pub fn restore(&mut self) {
        if self.stack.len() == 1 {
            warn!("matrix stack underflow");
        } else {
            self.stack.pop();
        }
    }
}

impl Default for MatrixStack {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_close(a: &Mat4, b: &Mat4, tolerance: f32) {
        for (index, (x, y)) in a.iter().zip(b.iter()).enumerate() {
            assert!(
                (x - y).abs() < tolerance,
                "element {index}: {x} vs {y}"
            );
        }
    }

    #[test]
    fn multiply_by_identity_is_identity_operation() {
        let m = multiply(&rot_y(0.7), &translate([1.0, -2.0, 3.0]));
        assert_close(&multiply(&m, &identity()), &m, 1e-6);
        assert_close(&multiply(&identity(), &m), &m, 1e-6);
    }

    #[test]
    fn inverse_times_matrix_is_identity() {
        let m = multiply(
            &multiply(&translate([0.5, -1.5, 2.0]), &rot_x(0.4)),
            &scale([2.0, 3.0, 0.5]),
        );
        assert_close(&multiply(&m, &inverse(&m)), &identity(), 1e-4);
    }

    #[test]
    fn singular_inverse_propagates_non_finite_values() {
        let m = scale([1.0, 1.0, 0.0]);
        let inv = inverse(&m);
        assert!(inv.iter().any(|v| !v.is_finite()));
    }

    #[test]
    fn transpose_is_an_involution() {
        let m = multiply(&rot_z(1.1), &translate([4.0, 5.0, 6.0]));
        assert_close(&transpose(&transpose(&m)), &m, 1e-6);
    }

    #[test]
    fn transform_defaults_homogeneous_coordinate_to_one() {
        let m = translate([1.0, 2.0, 3.0]);
        let moved = transform(&m, &[0.0, 0.0, 0.0]);
        assert_eq!(moved, [1.0, 2.0, 3.0, 1.0]);

        // An explicit w of 0 is a direction and ignores translation.
        let direction = transform(&m, &[1.0, 0.0, 0.0, 0.0]);
        assert_eq!(direction, [1.0, 0.0, 0.0, 0.0]);
    }

    #[test]
    fn rotation_preserves_length() {
        let p = transform(&rot_y(0.9), &[1.0, 2.0, 2.0]);
        let length = (p[0] * p[0] + p[1] * p[1] + p[2] * p[2]).sqrt();
        assert!((length - 3.0).abs() < 1e-5);
    }

    #[test]
    fn stack_save_restore_round_trips() {
        let mut stack = MatrixStack::new();
        stack.translate([1.0, 0.0, 0.0]);
        let before = stack.get();
        stack.save();
        stack.rot_z(0.5);
        assert!(stack.get() != before);
        stack.restore();
        assert_close(&stack.get(), &before, 1e-6);
    }

    #[test]
    fn restore_at_root_is_a_no_op() {
        let mut stack = MatrixStack::new();
        stack.scale([2.0, 2.0, 2.0]);
        let before = stack.get();
        stack.restore();
        assert_close(&stack.get(), &before, 1e-6);
        stack.restore();
        assert_close(&stack.get(), &before, 1e-6);
    }

    #[test]
    fn stack_operations_post_multiply_the_top() {
        let mut stack = MatrixStack::new();
        stack.translate([1.0, 0.0, 0.0]);
        stack.rot_z(0.3);
        let expected = multiply(&translate([1.0, 0.0, 0.0]), &rot_z(0.3));
        assert_close(&stack.get(), &expected, 1e-6);
    }
}
