// src/localize/mod.rs
//! Localization: from recorded frames (or prediction maps) to emitter sets.

mod cost;
mod fit;
mod maps;

pub use cost::{GaussianRoiCost, RoiContext, RoiParams};
pub use fit::RoiFitter;
pub use maps::{MapPostprocessor, PredictionMaps};

use ndarray::{Array1, Array2, Array3, ArrayView2, Axis};
use rayon::prelude::*;
use tracing::info;

use crate::emitter::{CoordUnit, EmitterSet};
use crate::error::DataError;
use crate::psf::PixelGrid;
use crate::simulation::Camera;
use crate::utils::frame_median;

/// Pixels above `threshold` that are not exceeded by any 8-neighbor.
/// Plateau pixels all qualify.
pub(crate) fn local_maxima(img: ArrayView2<f64>, threshold: f64) -> Vec<(usize, usize)> {
    let (w, h) = (img.nrows(), img.ncols());
    let mut out = Vec::new();
    for i in 0..w {
        for j in 0..h {
            let v = img[[i, j]];
            if v <= threshold {
                continue;
            }
            let mut is_max = true;
            'neighbors: for di in -1i64..=1 {
                for dj in -1i64..=1 {
                    if di == 0 && dj == 0 {
                        continue;
                    }
                    let (ni, nj) = (i as i64 + di, j as i64 + dj);
                    if ni < 0 || nj < 0 || ni >= w as i64 || nj >= h as i64 {
                        continue;
                    }
                    if img[[ni as usize, nj as usize]] > v {
                        is_max = false;
                        break 'neighbors;
                    }
                }
            }
            if is_max {
                out.push((i, j));
            }
        }
    }
    out
}

/// Classical localization over raw frame stacks.
///
/// Per frame: camera counts go back to photons, the background is estimated
/// as the frame median, pixels above `bg + detect_k * sqrt(bg)` that are
/// local maxima become detections, and an optional [`RoiFitter`] refines
/// them to sub-pixel positions.
pub struct LocalizePipeline {
    pub camera: Camera,
    pub grid: PixelGrid,
    pub detect_k: f64,
    pub fitter: Option<RoiFitter>,
}

impl LocalizePipeline {
    /// Localize a whole stack; frames are processed in parallel.
    pub fn run(&self, frames: &Array3<f64>) -> Result<EmitterSet, DataError> {
        let shape = frames.shape();
        if (shape[1], shape[2]) != self.grid.shape {
            return Err(DataError::InvalidValue {
                what: "frame stack",
                reason: format!(
                    "frame shape ({}, {}) does not match the {:?} grid",
                    shape[1], shape[2], self.grid.shape
                ),
            });
        }
        let per_frame = (0..shape[0])
            .into_par_iter()
            .map(|t| self.run_frame(frames.index_axis(Axis(0), t), t as i64))
            .collect::<Result<Vec<_>, DataError>>()?;
        let out = EmitterSet::cat(&per_frame, None, None)?;
        info!(
            n_frames = shape[0],
            n_localizations = out.len(),
            "localization finished"
        );
        Ok(out)
    }

    /// Localize a single frame of raw counts.
    pub fn run_frame(&self, counts: ArrayView2<f64>, frame_ix: i64) -> Result<EmitterSet, DataError> {
        let photons = self.camera.backward_frame(counts);
        let bg = frame_median(photons.view());
        let threshold = bg + self.detect_k * bg.max(0.0).sqrt();
        let peaks = local_maxima(photons.view(), threshold);

        let n = peaks.len();
        let mut xyz = Array2::zeros((n, 3));
        let mut phot = Array1::zeros(n);
        for (k, &(ix, iy)) in peaks.iter().enumerate() {
            let (cx, cy) = self.grid.center_of(ix, iy);
            xyz[[k, 0]] = cx;
            xyz[[k, 1]] = cy;
            phot[k] = (window_sum(&photons, ix, iy) - 9.0 * bg).max(1.0);
        }
        let detections = EmitterSet::new(xyz, phot, Array1::from_elem(n, frame_ix))?
            .with_units(Some(CoordUnit::Px), None);
        let mut detections = detections;
        detections.bg = Some(Array1::from_elem(n, bg));

        match &self.fitter {
            Some(fitter) => fitter.refine(photons.view(), &self.grid, &detections),
            None => Ok(detections),
        }
    }
}

// Sum of the clamped 3x3 window around a pixel.
fn window_sum(img: &Array2<f64>, ix: usize, iy: usize) -> f64 {
    let (w, h) = (img.nrows(), img.ncols());
    let mut acc = 0.0;
    for i in ix.saturating_sub(1)..=(ix + 1).min(w - 1) {
        for j in iy.saturating_sub(1)..=(iy + 1).min(h - 1) {
            acc += img[[i, j]];
        }
    }
    acc
}
