// src/psf/delta.rs
//! Delta PSF: all photons of an emitter land in its containing pixel.

use ndarray::{Array2, ArrayView1, ArrayView2};

use super::{PixelGrid, Psf};

/// Ideal single-pixel PSF. Useful for target maps and as a debugging
/// stand-in for a real optical model.
#[derive(Debug, Clone)]
pub struct DeltaPsf {
    pub grid: PixelGrid,
    /// Value of pixels no emitter falls into.
    pub dark_value: f64,
}

impl DeltaPsf {
    pub fn new(grid: PixelGrid) -> Self {
        Self {
            grid,
            dark_value: 0.0,
        }
    }

    pub fn with_dark_value(grid: PixelGrid, dark_value: f64) -> Self {
        Self { grid, dark_value }
    }
}

impl Psf for DeltaPsf {
    fn grid(&self) -> &PixelGrid {
        &self.grid
    }

    /// When several emitters share a pixel, the brightest wins rather than
    /// accumulating; the map stays interpretable as "the" value there.
    fn forward(&self, xyz_px: ArrayView2<f64>, phot: ArrayView1<f64>) -> Array2<f64> {
        let mut out = Array2::from_elem(self.grid.shape, self.dark_value);
        let mut best = Array2::from_elem(self.grid.shape, f64::NEG_INFINITY);
        for (row, &p) in xyz_px.rows().into_iter().zip(phot.iter()) {
            if let Some(bin) = self.grid.bin_of(row[0], row[1]) {
                if p > best[bin] {
                    best[bin] = p;
                    out[bin] = p;
                }
            }
        }
        out
    }
}

/// Binary occupancy map: 1 where at least one emitter falls, 0 elsewhere.
pub fn unit_peak_map(grid: &PixelGrid, xyz_px: ArrayView2<f64>) -> Array2<f64> {
    let mut out = Array2::zeros(grid.shape);
    for row in xyz_px.rows() {
        if let Some(bin) = grid.bin_of(row[0], row[1]) {
            out[bin] = 1.0;
        }
    }
    out
}
