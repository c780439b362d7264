// src/localize/maps.rs
//! Dense prediction maps and their conversion back to sparse emitters.
//!
//! The inverse of target generation: given per-pixel probability, photon,
//! offset and z maps (e.g. from an external network or from a target
//! generator in tests), cluster probability around local maxima and read
//! the emitter parameters out as probability-weighted averages.

use ndarray::{Array1, Array2, Array3, Axis};

use super::local_maxima;
use crate::emitter::{CoordUnit, EmitterSet};
use crate::error::DataError;
use crate::psf::PixelGrid;
use crate::target::{CH_DX, CH_DY, CH_PHOT, CH_PROB, CH_Z};

/// Per-pixel predictions for one frame, required channels plus optional
/// uncertainty and background maps.
#[derive(Debug, Clone)]
pub struct PredictionMaps {
    pub p: Array2<f64>,
    pub phot: Array2<f64>,
    pub dx: Array2<f64>,
    pub dy: Array2<f64>,
    pub z: Array2<f64>,
    pub sigma: Option<(Array2<f64>, Array2<f64>, Array2<f64>)>,
    pub bg: Option<Array2<f64>>,
}

impl PredictionMaps {
    pub fn new(
        p: Array2<f64>,
        phot: Array2<f64>,
        dx: Array2<f64>,
        dy: Array2<f64>,
        z: Array2<f64>,
    ) -> Result<Self, DataError> {
        let dim = p.raw_dim();
        for (name, arr) in [("phot", &phot), ("dx", &dx), ("dy", &dy), ("z", &z)] {
            if arr.raw_dim() != dim {
                return Err(DataError::InvalidValue {
                    what: "prediction maps",
                    reason: format!(
                        "{name} map shape {:?} differs from p shape {:?}",
                        arr.shape(),
                        p.shape()
                    ),
                });
            }
        }
        Ok(Self {
            p,
            phot,
            dx,
            dy,
            z,
            sigma: None,
            bg: None,
        })
    }

    /// Split a `(channels, W, H)` target-layout array into maps.
    pub fn from_target(target: &Array3<f64>) -> Result<Self, DataError> {
        if target.shape()[0] < 5 {
            return Err(DataError::InvalidValue {
                what: "prediction maps",
                reason: format!("need 5 channels, got {}", target.shape()[0]),
            });
        }
        let ch = |c: usize| target.index_axis(Axis(0), c).to_owned();
        Self::new(ch(CH_PROB), ch(CH_PHOT), ch(CH_DX), ch(CH_DY), ch(CH_Z))
    }

    /// Attach per-axis uncertainty maps. Chainable.
    pub fn with_sigma(
        mut self,
        sx: Array2<f64>,
        sy: Array2<f64>,
        sz: Array2<f64>,
    ) -> Result<Self, DataError> {
        let dim = self.p.raw_dim();
        if sx.raw_dim() != dim || sy.raw_dim() != dim || sz.raw_dim() != dim {
            return Err(DataError::InvalidValue {
                what: "prediction maps",
                reason: "sigma map shapes differ from p".into(),
            });
        }
        self.sigma = Some((sx, sy, sz));
        Ok(self)
    }

    /// Attach a background map. Chainable.
    pub fn with_bg(mut self, bg: Array2<f64>) -> Result<Self, DataError> {
        if bg.raw_dim() != self.p.raw_dim() {
            return Err(DataError::InvalidValue {
                what: "prediction maps",
                reason: "bg map shape differs from p".into(),
            });
        }
        self.bg = Some(bg);
        Ok(self)
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.p.nrows(), self.p.ncols())
    }
}

/// Clusters probability mass into discrete emitters.
///
/// Candidate pixels are local maxima of the p map above `raw_threshold`.
/// Each candidate aggregates the probability of its 3x3 neighborhood; if
/// that clears `final_threshold` the emitter's parameters are read out as
/// p-weighted averages over the same window, with each pixel voting with
/// its own center plus offset. Close pairs of candidates may share border
/// pixels.
pub struct MapPostprocessor {
    pub grid: PixelGrid,
    pub raw_threshold: f64,
    pub final_threshold: f64,
}

impl MapPostprocessor {
    pub fn new(grid: PixelGrid) -> Self {
        Self {
            grid,
            raw_threshold: 0.1,
            final_threshold: 0.6,
        }
    }

    pub fn with_thresholds(grid: PixelGrid, raw_threshold: f64, final_threshold: f64) -> Self {
        Self {
            grid,
            raw_threshold,
            final_threshold,
        }
    }

    /// Emitters for one frame of maps.
    pub fn forward(&self, maps: &PredictionMaps, frame_ix: i64) -> Result<EmitterSet, DataError> {
        if maps.shape() != self.grid.shape {
            return Err(DataError::InvalidValue {
                what: "prediction maps",
                reason: format!(
                    "map shape {:?} does not match the {:?} grid",
                    maps.shape(),
                    self.grid.shape
                ),
            });
        }
        let (w, h) = maps.shape();

        let mut xyz = Vec::new();
        let mut phot = Vec::new();
        let mut prob = Vec::new();
        let mut bg = Vec::new();
        let mut sig = Vec::new();

        for (cx, cy) in local_maxima(maps.p.view(), self.raw_threshold) {
            let x_range = cx.saturating_sub(1)..=(cx + 1).min(w - 1);
            let y_range = cy.saturating_sub(1)..=(cy + 1).min(h - 1);

            let mut wsum = 0.0;
            let mut acc = [0.0f64; 4]; // x, y, z, phot
            let mut acc_bg = 0.0;
            let mut acc_sig = [0.0f64; 3];
            for ix in x_range.clone() {
                for iy in y_range.clone() {
                    let pw = maps.p[[ix, iy]];
                    if pw <= 0.0 {
                        continue;
                    }
                    let (ccx, ccy) = self.grid.center_of(ix, iy);
                    wsum += pw;
                    acc[0] += pw * (ccx + maps.dx[[ix, iy]]);
                    acc[1] += pw * (ccy + maps.dy[[ix, iy]]);
                    acc[2] += pw * maps.z[[ix, iy]];
                    acc[3] += pw * maps.phot[[ix, iy]];
                    if let Some(b) = &maps.bg {
                        acc_bg += pw * b[[ix, iy]];
                    }
                    if let Some((sx, sy, sz)) = &maps.sigma {
                        acc_sig[0] += pw * sx[[ix, iy]];
                        acc_sig[1] += pw * sy[[ix, iy]];
                        acc_sig[2] += pw * sz[[ix, iy]];
                    }
                }
            }
            if wsum < self.final_threshold {
                continue;
            }
            xyz.extend([acc[0] / wsum, acc[1] / wsum, acc[2] / wsum]);
            phot.push(acc[3] / wsum);
            prob.push(wsum.min(1.0));
            bg.push(acc_bg / wsum);
            sig.extend(acc_sig.map(|v| v / wsum));
        }

        let n = phot.len();
        let mut out = EmitterSet::new(
            Array2::from_shape_vec((n, 3), xyz).expect("three entries pushed per emitter"),
            Array1::from_vec(phot),
            Array1::from_elem(n, frame_ix),
        )?
        .with_units(Some(CoordUnit::Px), None);
        out.prob = Some(Array1::from_vec(prob));
        if maps.bg.is_some() {
            out.bg = Some(Array1::from_vec(bg));
        }
        if maps.sigma.is_some() {
            out = out.with_sigma(
                Array2::from_shape_vec((n, 3), sig).expect("three entries pushed per emitter"),
            )?;
        }
        Ok(out)
    }

    /// Emitters for a stack of per-frame maps, frames numbered from
    /// `first_frame`.
    pub fn forward_stack(
        &self,
        maps: &[PredictionMaps],
        first_frame: i64,
    ) -> Result<EmitterSet, DataError> {
        let sets = maps
            .iter()
            .enumerate()
            .map(|(i, m)| self.forward(m, first_frame + i as i64))
            .collect::<Result<Vec<_>, _>>()?;
        EmitterSet::cat(&sets, None, None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::target::{OffsetTarget, TargetGenerator};
    use ndarray::{arr1, arr2};

    #[test]
    fn inverts_a_perfect_offset_target() {
        let grid = PixelGrid::unit((32, 32));
        let em = EmitterSet::new(
            arr2(&[[14.8, 9.2, -250.0], [4.0, 4.0, 100.0]]),
            arr1(&[900.0, 400.0]),
            arr1(&[0, 0]),
        )
        .unwrap();
        let target = OffsetTarget::new(grid.clone()).forward(&em).unwrap();
        let maps = PredictionMaps::from_target(&target).unwrap();

        let rec = MapPostprocessor::new(grid).forward(&maps, 7).unwrap();
        assert_eq!(rec.len(), 2);
        assert!(rec.frame_ix.iter().all(|&f| f == 7));
        // Order follows the scan; emitter at (4, 4) comes first.
        assert!((rec.xyz[[0, 0]] - 4.0).abs() < 1e-9);
        assert!((rec.xyz[[1, 0]] - 14.8).abs() < 1e-9);
        assert!((rec.xyz[[1, 1]] - 9.2).abs() < 1e-9);
        assert!((rec.xyz[[1, 2]] - (-250.0)).abs() < 1e-9);
        assert!((rec.phot[1] - 900.0).abs() < 1e-9);
        assert_eq!(rec.prob.as_ref().unwrap()[0], 1.0);
        assert_eq!(rec.xy_unit, Some(CoordUnit::Px));
    }

    #[test]
    fn aggregates_spread_probability() {
        let (w, h) = (16, 16);
        let mut p = Array2::zeros((w, h));
        let mut dx = Array2::zeros((w, h));
        let phot = Array2::from_elem((w, h), 500.0);
        // True emitter at x = 5.2: the probability splits over two pixels,
        // each voting for the same position via its own offset.
        p[[5, 8]] = 0.5;
        dx[[5, 8]] = 0.2;
        p[[6, 8]] = 0.3;
        dx[[6, 8]] = -0.8;

        let maps =
            PredictionMaps::new(p, phot, dx, Array2::zeros((w, h)), Array2::zeros((w, h))).unwrap();
        let rec = MapPostprocessor::new(PixelGrid::unit((w, h)))
            .forward(&maps, 0)
            .unwrap();
        assert_eq!(rec.len(), 1);
        assert!((rec.xyz[[0, 0]] - 5.2).abs() < 1e-9);
        assert!((rec.xyz[[0, 1]] - 8.0).abs() < 1e-9);
        assert!((rec.phot[0] - 500.0).abs() < 1e-9);
        assert!((rec.prob.as_ref().unwrap()[0] - 0.8).abs() < 1e-9);
    }

    #[test]
    fn weak_candidates_are_dropped() {
        let (w, h) = (8, 8);
        let mut p = Array2::zeros((w, h));
        p[[3, 3]] = 0.4; // above raw, but aggregate stays below final
        let zeros = || Array2::zeros((w, h));
        let maps = PredictionMaps::new(p, zeros(), zeros(), zeros(), zeros()).unwrap();
        let rec = MapPostprocessor::new(PixelGrid::unit((w, h)))
            .forward(&maps, 0)
            .unwrap();
        assert!(rec.is_empty());

        let mut p2 = Array2::zeros((w, h));
        p2[[3, 3]] = 0.05; // below raw threshold entirely
        let maps2 = PredictionMaps::new(p2, zeros(), zeros(), zeros(), zeros()).unwrap();
        assert!(MapPostprocessor::new(PixelGrid::unit((w, h)))
            .forward(&maps2, 0)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn probability_clamps_at_one() {
        let (w, h) = (8, 8);
        let mut p = Array2::zeros((w, h));
        p[[4, 4]] = 0.9;
        p[[3, 4]] = 0.5;
        p[[5, 4]] = 0.5;
        let zeros = || Array2::zeros((w, h));
        let maps = PredictionMaps::new(p, zeros(), zeros(), zeros(), zeros()).unwrap();
        let rec = MapPostprocessor::new(PixelGrid::unit((w, h)))
            .forward(&maps, 0)
            .unwrap();
        assert_eq!(rec.len(), 1);
        assert_eq!(rec.prob.as_ref().unwrap()[0], 1.0);
    }

    #[test]
    fn optional_maps_flow_into_the_emitters() {
        let (w, h) = (8, 8);
        let mut p = Array2::zeros((w, h));
        p[[4, 4]] = 1.0;
        let zeros = || Array2::zeros((w, h));
        let maps = PredictionMaps::new(p, zeros(), zeros(), zeros(), zeros())
            .unwrap()
            .with_sigma(
                Array2::from_elem((w, h), 0.1),
                Array2::from_elem((w, h), 0.2),
                Array2::from_elem((w, h), 25.0),
            )
            .unwrap()
            .with_bg(Array2::from_elem((w, h), 42.0))
            .unwrap();
        let rec = MapPostprocessor::new(PixelGrid::unit((w, h)))
            .forward(&maps, 0)
            .unwrap();
        assert_eq!(rec.bg.as_ref().unwrap()[0], 42.0);
        let sig = rec.xyz_sig.as_ref().unwrap();
        assert!((sig[[0, 0]] - 0.1).abs() < 1e-12);
        assert!((sig[[0, 2]] - 25.0).abs() < 1e-12);
    }

    #[test]
    fn stack_processing_numbers_frames() {
        let (w, h) = (8, 8);
        let mut p = Array2::zeros((w, h));
        p[[4, 4]] = 1.0;
        let zeros = || Array2::zeros((w, h));
        let one = PredictionMaps::new(p, zeros(), zeros(), zeros(), zeros()).unwrap();
        let rec = MapPostprocessor::new(PixelGrid::unit((w, h)))
            .forward_stack(&[one.clone(), one], 5)
            .unwrap();
        assert_eq!(rec.frame_ix.to_vec(), vec![5, 6]);
    }

    #[test]
    fn mismatched_shapes_are_rejected() {
        let zeros = || Array2::zeros((8, 8));
        let maps = PredictionMaps::new(zeros(), zeros(), zeros(), zeros(), zeros()).unwrap();
        assert!(MapPostprocessor::new(PixelGrid::unit((16, 16)))
            .forward(&maps, 0)
            .is_err());
        assert!(
            PredictionMaps::new(zeros(), Array2::zeros((4, 4)), zeros(), zeros(), zeros())
                .is_err()
        );
    }
}
