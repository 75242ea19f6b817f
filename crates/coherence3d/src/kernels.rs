//! Kernel functions: the coherence kernel and the quadratic B-spline used to
//! deposit particles onto the grid.

/// Coherence kernel weight at world distance `distance`.
///
/// Gaussian in distance only, so it is symmetric and isotropic by
/// construction, equals 1 at zero distance and decays monotonically.
#[inline]
pub fn coherence_weight(distance: f64, kernel_scale: f64) -> f64 {
    let s = distance / kernel_scale;
    (-0.5 * s * s).exp()
}

/// Continuum integral of [`coherence_weight`] over all of R^3: (2 pi l^2)^(3/2).
#[inline]
pub fn coherence_weight_integral(kernel_scale: f64) -> f64 {
    (2.0 * std::f64::consts::PI * kernel_scale * kernel_scale).powf(1.5)
}

/// Fourier response of the coherence kernel at wavenumber `k`.
///
/// This is what the eigenmode approximation weights each standing wave by;
/// it depends on |k| and the kernel scale only.
#[inline]
pub fn coherence_spectral_weight(wavenumber: f64, kernel_scale: f64) -> f64 {
    let s = wavenumber * kernel_scale;
    coherence_weight_integral(kernel_scale) * (-0.5 * s * s).exp()
}

/// 1D Quadratic B-spline weight.
/// Support: [-1.5, 1.5] (covers 3 grid nodes)
#[inline]
pub fn quadratic_bspline_1d(r: f64) -> f64 {
    use crate::constants::BSPLINE_SUPPORT_RADIUS;
    let r_abs = r.abs();
    if r_abs < 0.5 {
        0.75 - r_abs * r_abs
    } else if r_abs < BSPLINE_SUPPORT_RADIUS {
        let t = BSPLINE_SUPPORT_RADIUS - r_abs;
        0.5 * t * t
    } else {
        0.0
    }
}
