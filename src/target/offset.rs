// src/target/offset.rs
//! Offset targets: per-pixel probability, photons, sub-pixel offsets and z.

use ndarray::Array3;

use super::{TargetGenerator, CH_DX, CH_DY, CH_PHOT, CH_PROB, CH_Z};
use crate::emitter::EmitterSet;
use crate::error::DataError;
use crate::psf::PixelGrid;

// Emitter placements after resolving pixel collisions (brightest wins).
fn placements(
    grid: &PixelGrid,
    emitters: &EmitterSet,
) -> Result<Vec<(usize, (usize, usize))>, DataError> {
    let xyz = emitters.grid_coords()?;
    let mut winner: std::collections::HashMap<(usize, usize), usize> =
        std::collections::HashMap::new();
    for (i, row) in xyz.rows().into_iter().enumerate() {
        if let Some(bin) = grid.bin_of(row[0], row[1]) {
            match winner.get(&bin) {
                Some(&j) if emitters.phot[j] >= emitters.phot[i] => {}
                _ => {
                    winner.insert(bin, i);
                }
            }
        }
    }
    let mut out: Vec<_> = winner.into_iter().map(|(bin, i)| (i, bin)).collect();
    out.sort_by_key(|&(i, _)| i);
    Ok(out)
}

/// The 5-channel offset target.
///
/// The emitter's pixel gets p = 1, its photon count, its offsets from the
/// pixel center (within half a pixel) and its z. All other pixels stay zero.
#[derive(Debug, Clone)]
pub struct OffsetTarget {
    pub grid: PixelGrid,
}

impl OffsetTarget {
    pub fn new(grid: PixelGrid) -> Self {
        Self { grid }
    }
}

impl TargetGenerator for OffsetTarget {
    fn grid(&self) -> &PixelGrid {
        &self.grid
    }

    fn channels(&self) -> usize {
        5
    }

    fn forward(&self, emitters: &EmitterSet) -> Result<Array3<f64>, DataError> {
        let xyz = emitters.grid_coords()?;
        let mut out = Array3::zeros((5, self.grid.shape.0, self.grid.shape.1));
        for (i, (ix, iy)) in placements(&self.grid, emitters)? {
            let (cx, cy) = self.grid.center_of(ix, iy);
            out[[CH_PROB, ix, iy]] = 1.0;
            out[[CH_PHOT, ix, iy]] = emitters.phot[i];
            out[[CH_DX, ix, iy]] = xyz[[i, 0]] - cx;
            out[[CH_DY, ix, iy]] = xyz[[i, 1]] - cy;
            out[[CH_Z, ix, iy]] = xyz[[i, 2]];
        }
        Ok(out)
    }
}

/// Offset target spread over a square ROI around each emitter.
///
/// Every pixel of the ROI carries the emitter's photons, z and offsets
/// relative to that pixel's own center. Where ROIs overlap, the pixel goes
/// to the closest emitter (ties to the brighter one). p stays 1 only at the
/// emitter's own pixel, as in [`OffsetTarget`].
#[derive(Debug, Clone)]
pub struct RoiOffsetTarget {
    pub grid: PixelGrid,
    pub roi_size: usize,
}

impl RoiOffsetTarget {
    pub fn new(grid: PixelGrid, roi_size: usize) -> Result<Self, DataError> {
        if roi_size % 2 == 0 || roi_size == 0 {
            return Err(DataError::InvalidValue {
                what: "roi_size",
                reason: format!("must be odd and positive, got {roi_size}"),
            });
        }
        Ok(Self { grid, roi_size })
    }
}

impl TargetGenerator for RoiOffsetTarget {
    fn grid(&self) -> &PixelGrid {
        &self.grid
    }

    fn channels(&self) -> usize {
        5
    }

    fn forward(&self, emitters: &EmitterSet) -> Result<Array3<f64>, DataError> {
        let xyz = emitters.grid_coords()?;
        let (nx, ny) = self.grid.shape;
        let r = (self.roi_size / 2) as isize;
        let mut out = Array3::zeros((5, nx, ny));
        let mut owner_d2 = ndarray::Array2::from_elem((nx, ny), f64::INFINITY);
        let mut owner_phot = ndarray::Array2::from_elem((nx, ny), f64::NEG_INFINITY);

        let placed = placements(&self.grid, emitters)?;
        for &(i, (ix, iy)) in &placed {
            let (x, y, z) = (xyz[[i, 0]], xyz[[i, 1]], xyz[[i, 2]]);
            let phot = emitters.phot[i];
            for qx in (ix as isize - r).max(0)..=(ix as isize + r).min(nx as isize - 1) {
                for qy in (iy as isize - r).max(0)..=(iy as isize + r).min(ny as isize - 1) {
                    let q = (qx as usize, qy as usize);
                    let (qcx, qcy) = self.grid.center_of(q.0, q.1);
                    let d2 = (x - qcx).powi(2) + (y - qcy).powi(2);
                    let closer = d2 < owner_d2[q]
                        || (d2 == owner_d2[q] && phot > owner_phot[q]);
                    if closer {
                        owner_d2[q] = d2;
                        owner_phot[q] = phot;
                        out[[CH_PHOT, q.0, q.1]] = phot;
                        out[[CH_DX, q.0, q.1]] = x - qcx;
                        out[[CH_DY, q.0, q.1]] = y - qcy;
                        out[[CH_Z, q.0, q.1]] = z;
                    }
                }
            }
        }
        // Detection stays a single-pixel signal.
        for &(_, (ix, iy)) in &placed {
            out[[CH_PROB, ix, iy]] = 1.0;
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{arr1, arr2, Axis};
    use rand::SeedableRng;

    #[test]
    fn offset_channels_share_their_support() {
        let gen = OffsetTarget::new(PixelGrid::unit((32, 32)));
        let em = EmitterSet::new(
            arr2(&[[14.8, 9.2, -250.0], [4.0, 4.0, 100.0]]),
            arr1(&[900.0, 400.0]),
            arr1(&[0, 0]),
        )
        .unwrap();
        let t = gen.forward(&em).unwrap();

        assert_eq!(t[[CH_PROB, 15, 9]], 1.0);
        assert_eq!(t[[CH_PHOT, 15, 9]], 900.0);
        assert!((t[[CH_DX, 15, 9]] - (-0.2)).abs() < 1e-9);
        assert!((t[[CH_DY, 15, 9]] - 0.2).abs() < 1e-9);
        assert_eq!(t[[CH_Z, 15, 9]], -250.0);

        let n_p = t.index_axis(Axis(0), CH_PROB).iter().filter(|&&v| v != 0.0).count();
        let n_phot = t.index_axis(Axis(0), CH_PHOT).iter().filter(|&&v| v != 0.0).count();
        assert_eq!(n_p, 2);
        assert_eq!(n_p, n_phot);
    }

    #[test]
    fn offsets_stay_within_half_a_pixel() {
        let gen = OffsetTarget::new(PixelGrid::unit((32, 32)));
        let mut rng = rand::rngs::StdRng::seed_from_u64(5);
        let em = EmitterSet::random(
            50,
            (-0.5, 31.5),
            (-0.5, 31.5),
            (-300.0, 300.0),
            (0, 0),
            &mut rng,
        );
        let t = gen.forward(&em).unwrap();
        for ch in [CH_DX, CH_DY] {
            for &v in t.index_axis(Axis(0), ch).iter() {
                assert!((-0.5..=0.5).contains(&v), "offset {v} out of range");
            }
        }
    }

    #[test]
    fn shared_pixel_goes_to_the_brighter_emitter() {
        let gen = OffsetTarget::new(PixelGrid::unit((16, 16)));
        let em = EmitterSet::new(
            arr2(&[[8.1, 8.0, 0.0], [7.9, 8.1, 0.0]]),
            arr1(&[100.0, 900.0]),
            arr1(&[0, 0]),
        )
        .unwrap();
        let t = gen.forward(&em).unwrap();
        assert_eq!(t[[CH_PHOT, 8, 8]], 900.0);
        assert!((t[[CH_DX, 8, 8]] - (-0.1)).abs() < 1e-9);
    }

    #[test]
    fn roi_target_spreads_values_with_per_pixel_offsets() {
        let gen = RoiOffsetTarget::new(PixelGrid::unit((32, 32)), 3).unwrap();
        let em = EmitterSet::new(
            arr2(&[[14.8, 9.2, -250.0]]),
            arr1(&[900.0]),
            arr1(&[0]),
        )
        .unwrap();
        let t = gen.forward(&em).unwrap();

        // Center pixel (15, 9): same values as the plain offset target.
        assert_eq!(t[[CH_PROB, 15, 9]], 1.0);
        assert!((t[[CH_DX, 15, 9]] - (-0.2)).abs() < 1e-9);

        // Neighbor (14, 9): offsets relative to its own center.
        assert_eq!(t[[CH_PROB, 14, 9]], 0.0);
        assert_eq!(t[[CH_PHOT, 14, 9]], 900.0);
        assert!((t[[CH_DX, 14, 9]] - 0.8).abs() < 1e-9);
        assert!((t[[CH_DY, 14, 9]] - 0.2).abs() < 1e-9);
        assert_eq!(t[[CH_Z, 14, 9]], -250.0);

        // Full 3x3 block is populated, nothing outside it.
        let n_phot = t.index_axis(Axis(0), CH_PHOT).iter().filter(|&&v| v != 0.0).count();
        assert_eq!(n_phot, 9);
    }

    #[test]
    fn overlapping_rois_go_to_the_closer_emitter() {
        let gen = RoiOffsetTarget::new(PixelGrid::unit((32, 32)), 3).unwrap();
        let em = EmitterSet::new(
            arr2(&[[10.0, 10.0, 0.0], [12.0, 10.0, 0.0]]),
            arr1(&[100.0, 100.0]),
            arr1(&[0, 0]),
        )
        .unwrap();
        let t = gen.forward(&em).unwrap();
        // Pixel (11, 10) is equidistant; equal photons keep the first owner.
        // Pixels at x = 10 and x = 12 are unambiguous.
        assert_eq!(t[[CH_PHOT, 10, 10]], 100.0);
        assert!((t[[CH_DX, 10, 10]]).abs() < 1e-9);
        assert!((t[[CH_DX, 12, 10]]).abs() < 1e-9);
        // (13, 10) can only belong to the right emitter.
        assert!((t[[CH_DX, 13, 10]] - (-1.0)).abs() < 1e-9);
    }

    #[test]
    fn roi_size_must_be_odd() {
        assert!(RoiOffsetTarget::new(PixelGrid::unit((8, 8)), 4).is_err());
        assert!(RoiOffsetTarget::new(PixelGrid::unit((8, 8)), 0).is_err());
    }
}
