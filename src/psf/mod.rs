// src/psf/mod.rs
//! Point spread functions and the pixel grid they render onto.
//!
//! Frames are `Array2<f64>` indexed `[ix, iy]` with x as the leading axis.
//! The conventional extent for a W x H grid is `(-0.5, W - 0.5)` per axis,
//! which puts pixel centers at integer coordinates.

mod delta;
mod gaussian;

pub use delta::{unit_peak_map, DeltaPsf};
pub use gaussian::{GaussianPsf, ZCalibration};
pub(crate) use gaussian::pixel_mass_1d;

use ndarray::{Array2, ArrayView1, ArrayView2};

use crate::error::DataError;

/// Rectangular pixel grid tying continuous coordinates to pixel indices.
#[derive(Debug, Clone, PartialEq)]
pub struct PixelGrid {
    pub xextent: (f64, f64),
    pub yextent: (f64, f64),
    pub shape: (usize, usize),
}

impl PixelGrid {
    pub fn new(
        xextent: (f64, f64),
        yextent: (f64, f64),
        shape: (usize, usize),
    ) -> Result<Self, DataError> {
        if shape.0 == 0 || shape.1 == 0 {
            return Err(DataError::InvalidValue {
                what: "grid shape",
                reason: format!("must be non-zero, got {:?}", shape),
            });
        }
        if xextent.1 <= xextent.0 || yextent.1 <= yextent.0 {
            return Err(DataError::InvalidValue {
                what: "grid extent",
                reason: format!("upper bound must exceed lower, got x {:?} y {:?}", xextent, yextent),
            });
        }
        Ok(Self {
            xextent,
            yextent,
            shape,
        })
    }

    /// Grid with unit pixels and centers on integers: extent
    /// `(-0.5, W - 0.5)` x `(-0.5, H - 0.5)`.
    pub fn unit(shape: (usize, usize)) -> Self {
        Self {
            xextent: (-0.5, shape.0 as f64 - 0.5),
            yextent: (-0.5, shape.1 as f64 - 0.5),
            shape,
        }
    }

    pub fn bin_size(&self) -> (f64, f64) {
        (
            (self.xextent.1 - self.xextent.0) / self.shape.0 as f64,
            (self.yextent.1 - self.yextent.0) / self.shape.1 as f64,
        )
    }

    /// Pixel containing `(x, y)`, or `None` outside the extent. Bins are
    /// half-open: the lower extent edge is inside, the upper edge is not.
    pub fn bin_of(&self, x: f64, y: f64) -> Option<(usize, usize)> {
        let (bw, bh) = self.bin_size();
        let fx = (x - self.xextent.0) / bw;
        let fy = (y - self.yextent.0) / bh;
        if fx < 0.0 || fy < 0.0 {
            return None;
        }
        let (ix, iy) = (fx.floor() as usize, fy.floor() as usize);
        if ix >= self.shape.0 || iy >= self.shape.1 {
            return None;
        }
        Some((ix, iy))
    }

    /// Continuous coordinates of a pixel center.
    pub fn center_of(&self, ix: usize, iy: usize) -> (f64, f64) {
        let (bw, bh) = self.bin_size();
        (
            self.xextent.0 + (ix as f64 + 0.5) * bw,
            self.yextent.0 + (iy as f64 + 0.5) * bh,
        )
    }

    pub fn contains(&self, x: f64, y: f64) -> bool {
        x >= self.xextent.0 && x < self.xextent.1 && y >= self.yextent.0 && y < self.yextent.1
    }
}

/// A point spread function: renders emitters into one frame.
pub trait Psf {
    fn grid(&self) -> &PixelGrid;

    /// Render a frame from px coordinates (N x 3) and photon counts (N).
    /// Emitters outside the grid contribute nothing or only their tail.
    fn forward(&self, xyz_px: ArrayView2<f64>, phot: ArrayView1<f64>) -> Array2<f64>;
}
