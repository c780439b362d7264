// src/localize/cost.rs
//! Cost function for per-ROI maximum likelihood refinement using `argmin`.
//!
//! The optimizer works in unconstrained space; parameters map into their
//! physical ranges through a logistic transform (position, kept inside the
//! ROI) or an exponential (photons and background, kept positive).

use argmin::core::{CostFunction, Error};
use ndarray::ArrayView2;

use crate::psf::pixel_mass_1d;

/// Converts an unconstrained value to a bounded one via a logistic curve.
fn logistic_transform(val: f64, min: f64, max: f64) -> f64 {
    (val.exp() / (1.0 + val.exp())) * (max - min) + min
}

/// Inverse of [`logistic_transform`], for seeding the optimizer from a
/// physical initial guess. Clamps away from the boundaries.
fn unconstrain(val: f64, min: f64, max: f64) -> f64 {
    let t = ((val - min) / (max - min)).clamp(1e-6, 1.0 - 1e-6);
    (t / (1.0 - t)).ln()
}

/// Physical fit parameters of one ROI.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RoiParams {
    /// Lateral position in px.
    pub x: f64,
    pub y: f64,
    /// Total photons of the emitter.
    pub n: f64,
    /// Background photons per pixel.
    pub b: f64,
}

/// Shared data context for fitting a single ROI.
///
/// `pixels` are photon units with background included. `origin` is the
/// center coordinate of the ROI's (0, 0) pixel; pixel pitch is 1 px.
pub struct RoiContext<'a> {
    pub pixels: ArrayView2<'a, f64>,
    pub origin: (f64, f64),
    pub sigma: (f64, f64),
}

impl RoiContext<'_> {
    fn x_bounds(&self) -> (f64, f64) {
        let w = self.pixels.nrows() as f64;
        (self.origin.0 - 0.5, self.origin.0 + w - 0.5)
    }

    fn y_bounds(&self) -> (f64, f64) {
        let h = self.pixels.ncols() as f64;
        (self.origin.1 - 0.5, self.origin.1 + h - 0.5)
    }

    /// Unconstrained optimizer vector for a physical starting point.
    pub fn unconstrained_from(&self, guess: &RoiParams) -> Vec<f64> {
        let (xlo, xhi) = self.x_bounds();
        let (ylo, yhi) = self.y_bounds();
        vec![
            unconstrain(guess.x, xlo, xhi),
            unconstrain(guess.y, ylo, yhi),
            guess.n.max(1e-3).ln(),
            guess.b.max(1e-3).ln(),
        ]
    }

    /// Physical parameters for an optimizer vector.
    pub fn params_from(&self, p: &[f64]) -> RoiParams {
        let (xlo, xhi) = self.x_bounds();
        let (ylo, yhi) = self.y_bounds();
        RoiParams {
            x: logistic_transform(p[0], xlo, xhi),
            y: logistic_transform(p[1], ylo, yhi),
            n: p[2].exp(),
            b: p[3].exp(),
        }
    }
}

/// Negative Poisson log-likelihood of an integrated-Gaussian spot plus a
/// flat background, up to the parameter-free factorial term.
pub struct GaussianRoiCost<'a> {
    pub ctx: &'a RoiContext<'a>,
}

impl CostFunction for GaussianRoiCost<'_> {
    type Param = Vec<f64>;
    type Output = f64;

    fn cost(&self, p: &Self::Param) -> Result<Self::Output, Error> {
        let ctx = self.ctx;
        let RoiParams { x, y, n, b } = ctx.params_from(p);
        if !(x.is_finite() && y.is_finite() && n.is_finite() && b.is_finite()) {
            return Ok(f64::INFINITY);
        }

        let (ox, oy) = ctx.origin;
        let mass_x: Vec<f64> = (0..ctx.pixels.nrows())
            .map(|i| {
                let lo = ox + i as f64 - 0.5;
                pixel_mass_1d(x, ctx.sigma.0, lo, lo + 1.0)
            })
            .collect();
        let mass_y: Vec<f64> = (0..ctx.pixels.ncols())
            .map(|j| {
                let lo = oy + j as f64 - 0.5;
                pixel_mass_1d(y, ctx.sigma.1, lo, lo + 1.0)
            })
            .collect();

        let mut nll = 0.0;
        for (i, mx) in mass_x.iter().enumerate() {
            for (j, my) in mass_y.iter().enumerate() {
                let mu = (n * mx * my + b).max(1e-12);
                nll += mu - ctx.pixels[[i, j]] * mu.ln();
            }
        }
        if nll.is_finite() {
            Ok(nll)
        } else {
            Ok(f64::INFINITY)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;

    fn flat_roi(v: f64) -> Array2<f64> {
        Array2::from_elem((5, 5), v)
    }

    #[test]
    fn transforms_round_trip() {
        let roi = flat_roi(10.0);
        let ctx = RoiContext {
            pixels: roi.view(),
            origin: (10.0, 20.0),
            sigma: (1.3, 1.3),
        };
        let guess = RoiParams {
            x: 12.3,
            y: 21.7,
            n: 800.0,
            b: 15.0,
        };
        let back = ctx.params_from(&ctx.unconstrained_from(&guess));
        assert!((back.x - guess.x).abs() < 1e-6);
        assert!((back.y - guess.y).abs() < 1e-6);
        assert!((back.n - guess.n).abs() < 1e-6);
        assert!((back.b - guess.b).abs() < 1e-6);
    }

    #[test]
    fn positions_stay_inside_the_roi() {
        let roi = flat_roi(1.0);
        let ctx = RoiContext {
            pixels: roi.view(),
            origin: (0.0, 0.0),
            sigma: (1.0, 1.0),
        };
        for extreme in [-100.0, 100.0] {
            let p = ctx.params_from(&vec![extreme, extreme, 1.0, 1.0]);
            assert!((-0.5..=4.5).contains(&p.x));
            assert!((-0.5..=4.5).contains(&p.y));
        }
    }

    #[test]
    fn cost_prefers_the_true_position() {
        // Render a noiseless spot and check the likelihood landscape.
        let sigma = (1.2, 1.2);
        let (n_true, b_true) = (1000.0, 10.0);
        let (x_true, y_true) = (2.3, 1.8);
        let mut roi = Array2::zeros((5, 5));
        for i in 0..5 {
            for j in 0..5 {
                let mx = pixel_mass_1d(x_true, sigma.0, i as f64 - 0.5, i as f64 + 0.5);
                let my = pixel_mass_1d(y_true, sigma.1, j as f64 - 0.5, j as f64 + 0.5);
                roi[[i, j]] = n_true * mx * my + b_true;
            }
        }
        let ctx = RoiContext {
            pixels: roi.view(),
            origin: (0.0, 0.0),
            sigma,
        };
        let cost = GaussianRoiCost { ctx: &ctx };
        let at = |x: f64, y: f64| {
            cost.cost(&ctx.unconstrained_from(&RoiParams {
                x,
                y,
                n: n_true,
                b: b_true,
            }))
            .unwrap()
        };
        let truth = at(x_true, y_true);
        assert!(truth < at(x_true + 0.4, y_true));
        assert!(truth < at(x_true, y_true - 0.4));
        assert!(truth < at(1.0, 1.0));
    }
}
