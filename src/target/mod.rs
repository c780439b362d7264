// src/target/mod.rs
//! Target map generation: emitter sets rendered as dense per-pixel maps.
//!
//! All generators share the channel layout `[p, phot, dx, dy, z]` where it
//! applies: detection probability, photon count, sub-pixel offsets relative
//! to the receiving pixel center, and axial position. Maps have shape
//! `(channels, W, H)` with x leading, matching the frame convention.

mod global;
mod offset;

pub use global::NearestTarget;
pub use offset::{OffsetTarget, RoiOffsetTarget};

use ndarray::{Array3, Axis};

use crate::emitter::EmitterSet;
use crate::error::DataError;
use crate::psf::{unit_peak_map, PixelGrid};

/// Channel indices of the 5-channel offset layout.
pub const CH_PROB: usize = 0;
pub const CH_PHOT: usize = 1;
pub const CH_DX: usize = 2;
pub const CH_DY: usize = 3;
pub const CH_Z: usize = 4;

/// Renders an emitter set into a dense target map.
///
/// Generators ignore frame indices; callers hand in per-frame subsets.
pub trait TargetGenerator {
    fn grid(&self) -> &PixelGrid;
    fn channels(&self) -> usize;
    fn forward(&self, emitters: &EmitterSet) -> Result<Array3<f64>, DataError>;
}

/// Single-channel occupancy target: 1 at every pixel containing an emitter.
#[derive(Debug, Clone)]
pub struct PeakTarget {
    pub grid: PixelGrid,
}

impl PeakTarget {
    pub fn new(grid: PixelGrid) -> Self {
        Self { grid }
    }
}

impl TargetGenerator for PeakTarget {
    fn grid(&self) -> &PixelGrid {
        &self.grid
    }

    fn channels(&self) -> usize {
        1
    }

    fn forward(&self, emitters: &EmitterSet) -> Result<Array3<f64>, DataError> {
        let xyz = emitters.grid_coords()?;
        let map = unit_peak_map(&self.grid, xyz.view());
        let mut out = Array3::zeros((1, self.grid.shape.0, self.grid.shape.1));
        out.index_axis_mut(Axis(0), 0).assign(&map);
        Ok(out)
    }
}
