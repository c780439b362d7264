// src/interp.rs
//! Allocation-free linear interpolation over monotone knot vectors.
//!
//! Used by the astigmatic z-calibration to map z to per-axis PSF widths,
//! where the hot path evaluates one query point per emitter.

use num_traits::Float;

/// What to return for query points outside the knot range.
#[derive(Debug, PartialEq, Copy, Clone)]
pub enum InterpMode {
    /// Extend the first/last segment linearly.
    Extrapolate,
    /// Clamp to the first/last knot value.
    FirstLast,
}

/// Index of the knot starting the segment that contains `xp`.
///
/// Clamps to 0 below the range; the caller clamps the upper end.
#[inline]
fn segment_index<T: Float>(x: &[T], xp: T) -> usize {
    x.partition_point(|&probe| probe < xp).saturating_sub(1)
}

/// Linear interpolation of `(x, y)` at `xp` without allocating.
///
/// `x` must be monotonically increasing; slope and intercept are computed
/// on the fly for the one segment that matters. Empty input yields zero,
/// a single knot yields that knot's value.
pub fn interp<T: Float>(x: &[T], y: &[T], xp: T, mode: InterpMode) -> T {
    let n = x.len().min(y.len());
    if n == 0 {
        return T::zero();
    } else if n == 1 {
        return y[0];
    }

    // Clamping to n - 2 keeps i + 1 in bounds for queries past the last knot.
    let i = segment_index(x, xp).min(n - 2);
    let (x0, y0) = (x[i], y[i]);
    let (x1, y1) = (x[i + 1], y[i + 1]);

    let dx = x1 - x0;
    let inside = if dx == T::zero() {
        // Degenerate (vertical) segment: defined only exactly on the knot.
        if xp == x0 {
            y0
        } else {
            T::nan()
        }
    } else {
        y0 + (y1 - y0) / dx * (xp - x0)
    };

    if xp < x[0] {
        match mode {
            InterpMode::Extrapolate => inside,
            InterpMode::FirstLast => y[0],
        }
    } else if xp > x[n - 1] {
        match mode {
            InterpMode::Extrapolate => inside,
            InterpMode::FirstLast => y[n - 1],
        }
    } else {
        inside
    }
}
