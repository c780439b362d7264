// src/localize/fit.rs
//! Per-detection refinement: Nelder-Mead over the ROI likelihood.

use argmin::core::Executor;
use argmin::solver::neldermead::NelderMead;
use ndarray::{s, Array1, ArrayView2};
use rayon::prelude::*;
use tracing::debug;

use super::cost::{GaussianRoiCost, RoiContext, RoiParams};
use crate::emitter::EmitterSet;
use crate::error::DataError;
use crate::psf::PixelGrid;

/// Initial simplex for Nelder-Mead from a single starting point.
fn make_simplex(initial_point: &[f64]) -> Vec<Vec<f64>> {
    let n = initial_point.len();
    let mut simplex = Vec::with_capacity(n + 1);
    simplex.push(initial_point.to_vec());
    for i in 0..n {
        let mut next_point = initial_point.to_vec();
        let step = if next_point[i].abs() > 1e-9 {
            next_point[i] * 0.05
        } else {
            0.00025
        };
        next_point[i] += step;
        simplex.push(next_point);
    }
    simplex
}

/// Maximum-likelihood refinement of detected spots.
///
/// Works on photon-unit frames with unit pixel pitch (the native camera
/// frame convention). Each detection is fit independently and in parallel;
/// a fit that fails keeps the detection's initial values, z is carried
/// through untouched.
pub struct RoiFitter {
    pub roi_size: usize,
    /// PSF widths assumed during the fit, in px.
    pub sigma: (f64, f64),
    pub max_iters: u64,
}

impl RoiFitter {
    pub fn new(roi_size: usize, sigma: (f64, f64), max_iters: u64) -> Result<Self, DataError> {
        if roi_size % 2 == 0 || roi_size == 0 {
            return Err(DataError::InvalidValue {
                what: "roi_size",
                reason: format!("must be odd and positive, got {roi_size}"),
            });
        }
        Ok(Self {
            roi_size,
            sigma,
            max_iters,
        })
    }

    /// Refine all detections against one frame.
    pub fn refine(
        &self,
        photons: ArrayView2<f64>,
        grid: &PixelGrid,
        detections: &EmitterSet,
    ) -> Result<EmitterSet, DataError> {
        let fits: Vec<Option<RoiParams>> = (0..detections.len())
            .into_par_iter()
            .map(|i| {
                let guess_bg = detections
                    .bg
                    .as_ref()
                    .map(|b| b[i])
                    .filter(|b| b.is_finite())
                    .unwrap_or(1.0);
                self.fit_one(
                    photons,
                    grid,
                    detections.xyz[[i, 0]],
                    detections.xyz[[i, 1]],
                    detections.phot[i],
                    guess_bg,
                )
            })
            .collect();

        let mut out = detections.clone();
        let mut bg = match out.bg.take() {
            Some(b) => b,
            None => Array1::from_elem(out.len(), f64::NAN),
        };
        let mut n_ok = 0usize;
        for (i, fit) in fits.iter().enumerate() {
            if let Some(p) = fit {
                out.xyz[[i, 0]] = p.x;
                out.xyz[[i, 1]] = p.y;
                out.phot[i] = p.n;
                bg[i] = p.b;
                n_ok += 1;
            }
        }
        out.bg = Some(bg);
        debug!(
            n_detections = detections.len(),
            n_refined = n_ok,
            "roi refinement done"
        );
        Ok(out)
    }

    fn fit_one(
        &self,
        photons: ArrayView2<f64>,
        grid: &PixelGrid,
        x: f64,
        y: f64,
        phot_guess: f64,
        bg_guess: f64,
    ) -> Option<RoiParams> {
        let (w, h) = (photons.nrows(), photons.ncols());
        if w < self.roi_size || h < self.roi_size {
            return None;
        }
        let (bx, by) = grid.bin_of(x, y)?;
        let r = (self.roi_size / 2) as isize;
        let ix0 = (bx as isize - r).clamp(0, (w - self.roi_size) as isize) as usize;
        let iy0 = (by as isize - r).clamp(0, (h - self.roi_size) as isize) as usize;
        let roi = photons.slice(s![ix0..ix0 + self.roi_size, iy0..iy0 + self.roi_size]);

        let ctx = RoiContext {
            pixels: roi,
            origin: grid.center_of(ix0, iy0),
            sigma: self.sigma,
        };
        let p0 = ctx.unconstrained_from(&RoiParams {
            x,
            y,
            n: phot_guess.max(1.0),
            b: bg_guess.max(1e-3),
        });
        let solver = NelderMead::new(make_simplex(&p0));
        let res = Executor::new(GaussianRoiCost { ctx: &ctx }, solver)
            .configure(|s| s.max_iters(self.max_iters))
            .run()
            .ok()?;
        if !res.state.best_cost.is_finite() {
            return None;
        }
        res.state.best_param.as_ref().map(|p| ctx.params_from(p))
    }
}
