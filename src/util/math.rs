/// Absolute tolerance used by [`approx_eq`]
pub const EPSILON: f32 = 1e-6;

/// Float equality within a fixed absolute tolerance.
///
/// Counters and death markers grow without bound, so the tolerance must not
/// scale with magnitude or whole steps would compare equal.
pub fn approx_eq(a: f32, b: f32) -> bool {
    a == b || (a - b).abs() < EPSILON
}

pub fn lerp(a: f32, b: f32, t: f32) -> f32 {
    a + (b - a) * t
}
