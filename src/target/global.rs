// src/target/global.rs
//! Nearest-emitter target: every pixel is assigned to the closest emitter.

use ndarray::{Array2, Array3};

use super::{TargetGenerator, CH_DX, CH_DY, CH_PHOT, CH_PROB, CH_Z};
use crate::emitter::EmitterSet;
use crate::error::DataError;
use crate::psf::PixelGrid;

/// Target where pixels carry the values of their nearest emitter, rather
/// than only the emitter's own pixel.
///
/// With `max_dist` set, pixels farther than that from their assigned
/// emitter are zeroed out, leaving a disk of signal around each one.
#[derive(Debug, Clone)]
pub struct NearestTarget {
    pub grid: PixelGrid,
    pub max_dist: Option<f64>,
}

impl NearestTarget {
    pub fn new(grid: PixelGrid, max_dist: Option<f64>) -> Self {
        Self { grid, max_dist }
    }

    /// Index of the nearest emitter (lateral distance to the pixel center)
    /// for every pixel. Ties keep the lower emitter index.
    pub fn assign(&self, emitters: &EmitterSet) -> Result<Array2<usize>, DataError> {
        if emitters.is_empty() {
            return Err(DataError::EmptySet);
        }
        let xyz = emitters.grid_coords()?;
        let (nx, ny) = self.grid.shape;
        let mut out = Array2::zeros((nx, ny));
        for ix in 0..nx {
            for iy in 0..ny {
                let (cx, cy) = self.grid.center_of(ix, iy);
                let mut best = (f64::INFINITY, 0usize);
                for (i, row) in xyz.rows().into_iter().enumerate() {
                    let d2 = (row[0] - cx).powi(2) + (row[1] - cy).powi(2);
                    if d2 < best.0 {
                        best = (d2, i);
                    }
                }
                out[[ix, iy]] = best.1;
            }
        }
        Ok(out)
    }
}

impl TargetGenerator for NearestTarget {
    fn grid(&self) -> &PixelGrid {
        &self.grid
    }

    fn channels(&self) -> usize {
        5
    }

    fn forward(&self, emitters: &EmitterSet) -> Result<Array3<f64>, DataError> {
        let assignment = self.assign(emitters)?;
        let xyz = emitters.grid_coords()?;
        let (nx, ny) = self.grid.shape;
        let mut out = Array3::zeros((5, nx, ny));

        for ix in 0..nx {
            for iy in 0..ny {
                let i = assignment[[ix, iy]];
                let (cx, cy) = self.grid.center_of(ix, iy);
                let (dx, dy) = (xyz[[i, 0]] - cx, xyz[[i, 1]] - cy);
                if let Some(d) = self.max_dist {
                    if dx * dx + dy * dy > d * d {
                        continue;
                    }
                }
                out[[CH_PHOT, ix, iy]] = emitters.phot[i];
                out[[CH_DX, ix, iy]] = dx;
                out[[CH_DY, ix, iy]] = dy;
                out[[CH_Z, ix, iy]] = xyz[[i, 2]];
            }
        }
        for row in xyz.rows() {
            if let Some((ix, iy)) = self.grid.bin_of(row[0], row[1]) {
                out[[CH_PROB, ix, iy]] = 1.0;
            }
        }
        Ok(out)
    }
}
