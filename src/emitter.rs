// src/emitter.rs
//! Emitter sets: the central data structure tying localizations to frames.
//!
//! An [`EmitterSet`] is a column store over N emitters: coordinates, photon
//! counts and frame indices, plus optional per-emitter extras (id, detection
//! probability, background, coordinate uncertainties). Coordinates carry an
//! optional unit so px/nm conversions are explicit rather than implied.

use ndarray::{Array1, Array2};
use rand::Rng;

use crate::error::DataError;

/// Unit of the lateral (x, y) coordinates. z is always in nm.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoordUnit {
    Px,
    Nm,
}

impl std::fmt::Display for CoordUnit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CoordUnit::Px => write!(f, "px"),
            CoordUnit::Nm => write!(f, "nm"),
        }
    }
}

/// Set of emitters over one or more frames.
///
/// All columns have N rows. `xyz` is N x 3; 2-column input is padded with
/// z = 0 at construction. Comparison is exact element-wise equality.
#[derive(Debug, Clone, PartialEq)]
pub struct EmitterSet {
    pub xyz: Array2<f64>,
    pub phot: Array1<f64>,
    pub frame_ix: Array1<i64>,
    pub id: Option<Array1<i64>>,
    pub prob: Option<Array1<f64>>,
    pub bg: Option<Array1<f64>>,
    pub xyz_sig: Option<Array2<f64>>,
    pub xy_unit: Option<CoordUnit>,
    pub px_size: Option<[f64; 2]>,
}

impl EmitterSet {
    /// Build a set from coordinates, photon counts and frame indices.
    ///
    /// `xyz` must have 2 or 3 columns; 2 columns are padded with z = 0.
    /// `phot` and `frame_ix` must match the number of rows.
    pub fn new(
        xyz: Array2<f64>,
        phot: Array1<f64>,
        frame_ix: Array1<i64>,
    ) -> Result<Self, DataError> {
        let xyz = pad_z(xyz)?;
        let n = xyz.nrows();
        if phot.len() != n {
            return Err(DataError::LengthMismatch {
                field: "phot",
                got: phot.len(),
                expected: n,
            });
        }
        if frame_ix.len() != n {
            return Err(DataError::LengthMismatch {
                field: "frame_ix",
                got: frame_ix.len(),
                expected: n,
            });
        }
        Ok(Self {
            xyz,
            phot,
            frame_ix,
            id: None,
            prob: None,
            bg: None,
            xyz_sig: None,
            xy_unit: None,
            px_size: None,
        })
    }

    /// Set where only coordinates matter: unit photons, all on frame 0.
    pub fn coordinate_only(xyz: Array2<f64>) -> Result<Self, DataError> {
        let n = xyz.nrows();
        Self::new(xyz, Array1::ones(n), Array1::zeros(n))
    }

    /// The empty set.
    pub fn empty() -> Self {
        Self {
            xyz: Array2::zeros((0, 3)),
            phot: Array1::zeros(0),
            frame_ix: Array1::zeros(0),
            id: None,
            prob: None,
            bg: None,
            xyz_sig: None,
            xy_unit: None,
            px_size: None,
        }
    }

    /// Uniformly random emitters in the given extent, px unit, photon
    /// counts in [500, 5000). Intended for tests and demos.
    pub fn random<R: Rng>(
        n: usize,
        xextent: (f64, f64),
        yextent: (f64, f64),
        zextent: (f64, f64),
        frames: (i64, i64),
        rng: &mut R,
    ) -> Self {
        let mut xyz = Array2::zeros((n, 3));
        for mut row in xyz.rows_mut() {
            row[0] = rng.gen_range(xextent.0..xextent.1);
            row[1] = rng.gen_range(yextent.0..yextent.1);
            row[2] = rng.gen_range(zextent.0..zextent.1);
        }
        let phot = (0..n).map(|_| rng.gen_range(500.0..5000.0)).collect();
        let frame_ix = (0..n).map(|_| rng.gen_range(frames.0..=frames.1)).collect();
        Self {
            xyz,
            phot,
            frame_ix,
            id: None,
            prob: None,
            bg: None,
            xyz_sig: None,
            xy_unit: Some(CoordUnit::Px),
            px_size: None,
        }
    }

    /// Attach coordinate unit and pixel size. Chainable.
    pub fn with_units(mut self, unit: Option<CoordUnit>, px_size: Option<[f64; 2]>) -> Self {
        self.xy_unit = unit;
        self.px_size = px_size;
        self
    }

    /// Attach per-emitter ids. Chainable.
    pub fn with_id(mut self, id: Array1<i64>) -> Result<Self, DataError> {
        if id.len() != self.len() {
            return Err(DataError::LengthMismatch {
                field: "id",
                got: id.len(),
                expected: self.len(),
            });
        }
        self.id = Some(id);
        Ok(self)
    }

    /// Attach per-emitter coordinate uncertainties (N x 3, same unit rules
    /// as `xyz`). Chainable.
    pub fn with_sigma(mut self, xyz_sig: Array2<f64>) -> Result<Self, DataError> {
        let xyz_sig = pad_z(xyz_sig)?;
        if xyz_sig.nrows() != self.len() {
            return Err(DataError::LengthMismatch {
                field: "xyz_sig",
                got: xyz_sig.nrows(),
                expected: self.len(),
            });
        }
        self.xyz_sig = Some(xyz_sig);
        Ok(self)
    }

    pub fn len(&self) -> usize {
        self.xyz.nrows()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Coordinates in px. Errors when no unit is set, or when converting
    /// from nm without a pixel size.
    pub fn xyz_px(&self) -> Result<Array2<f64>, DataError> {
        self.scaled(&self.xyz, CoordUnit::Px)
    }

    /// Coordinates in nm. Errors when no unit is set, or when converting
    /// from px without a pixel size.
    pub fn xyz_nm(&self) -> Result<Array2<f64>, DataError> {
        self.scaled(&self.xyz, CoordUnit::Nm)
    }

    /// Coordinate uncertainties in px.
    pub fn xyz_sig_px(&self) -> Result<Array2<f64>, DataError> {
        let sig = self.xyz_sig.as_ref().ok_or(DataError::MissingField("xyz_sig"))?;
        self.scaled(sig, CoordUnit::Px)
    }

    /// Coordinate uncertainties in nm.
    pub fn xyz_sig_nm(&self) -> Result<Array2<f64>, DataError> {
        let sig = self.xyz_sig.as_ref().ok_or(DataError::MissingField("xyz_sig"))?;
        self.scaled(sig, CoordUnit::Nm)
    }

    /// Coordinates for rendering on a pixel grid. A set without a unit is
    /// taken to be in px already; a nm set is converted.
    pub fn grid_coords(&self) -> Result<Array2<f64>, DataError> {
        match self.xy_unit {
            None => Ok(self.xyz.clone()),
            Some(_) => self.xyz_px(),
        }
    }

    // Lateral scaling between px and nm. z passes through unchanged.
    fn scaled(&self, arr: &Array2<f64>, target: CoordUnit) -> Result<Array2<f64>, DataError> {
        let unit = self.xy_unit.ok_or(DataError::UnknownUnit)?;
        if unit == target {
            return Ok(arr.clone());
        }
        let [px, py] = self.px_size.ok_or(DataError::MissingPixelSize)?;
        let mut out = arr.clone();
        match target {
            CoordUnit::Nm => {
                out.column_mut(0).mapv_inplace(|v| v * px);
                out.column_mut(1).mapv_inplace(|v| v * py);
            }
            CoordUnit::Px => {
                out.column_mut(0).mapv_inplace(|v| v / px);
                out.column_mut(1).mapv_inplace(|v| v / py);
            }
        }
        Ok(out)
    }

    /// Rows at the given indices, metadata carried over.
    pub fn subset(&self, idx: &[usize]) -> EmitterSet {
        let take1 = |a: &Array1<f64>| idx.iter().map(|&i| a[i]).collect::<Array1<f64>>();
        let take2 =
            |a: &Array2<f64>| Array2::from_shape_fn((idx.len(), 3), |(r, c)| a[[idx[r], c]]);
        EmitterSet {
            xyz: take2(&self.xyz),
            phot: take1(&self.phot),
            frame_ix: idx.iter().map(|&i| self.frame_ix[i]).collect(),
            id: self
                .id
                .as_ref()
                .map(|a| idx.iter().map(|&i| a[i]).collect()),
            prob: self.prob.as_ref().map(take1),
            bg: self.bg.as_ref().map(take1),
            xyz_sig: self.xyz_sig.as_ref().map(take2),
            xy_unit: self.xy_unit,
            px_size: self.px_size,
        }
    }

    /// Emitters with `lo <= frame_ix <= hi`. Frame indices are preserved.
    pub fn subset_frame(&self, lo: i64, hi: i64) -> EmitterSet {
        let idx: Vec<usize> = self
            .frame_ix
            .iter()
            .enumerate()
            .filter(|(_, &f)| f >= lo && f <= hi)
            .map(|(i, _)| i)
            .collect();
        self.subset(&idx)
    }

    /// One set per frame over the inclusive range `[lo, hi]`.
    ///
    /// Bounds default to the extreme frame indices present. Frames without
    /// emitters yield empty sets, so the output length is always
    /// `hi - lo + 1`. An empty set without explicit bounds yields nothing.
    pub fn split_in_frames(&self, lo: Option<i64>, hi: Option<i64>) -> Vec<EmitterSet> {
        let lo = lo.or_else(|| self.frame_ix.iter().min().copied());
        let hi = hi.or_else(|| self.frame_ix.iter().max().copied());
        let (lo, hi) = match (lo, hi) {
            (Some(lo), Some(hi)) if lo <= hi => (lo, hi),
            _ => return Vec::new(),
        };
        let mut buckets: Vec<Vec<usize>> = vec![Vec::new(); (hi - lo + 1) as usize];
        for (i, &f) in self.frame_ix.iter().enumerate() {
            if f >= lo && f <= hi {
                buckets[(f - lo) as usize].push(i);
            }
        }
        buckets.into_iter().map(|idx| self.subset(&idx)).collect()
    }

    /// Concatenate sets, shifting each set's frame indices.
    ///
    /// Give either explicit per-set `frame_offsets` or a constant `step`
    /// (set i is shifted by `i * step`), not both. Optional columns survive
    /// only when present on every input set; units are taken from the first
    /// set that has them.
    pub fn cat(
        sets: &[EmitterSet],
        frame_offsets: Option<&[i64]>,
        step: Option<i64>,
    ) -> Result<EmitterSet, DataError> {
        if sets.is_empty() {
            return Ok(EmitterSet::empty());
        }
        let offsets: Vec<i64> = match (frame_offsets, step) {
            (Some(_), Some(_)) => {
                return Err(DataError::InvalidValue {
                    what: "frame offsets",
                    reason: "give explicit offsets or a step, not both".into(),
                })
            }
            (Some(o), None) => {
                if o.len() != sets.len() {
                    return Err(DataError::OffsetCount {
                        got: o.len(),
                        expected: sets.len(),
                    });
                }
                o.to_vec()
            }
            (None, Some(s)) => (0..sets.len() as i64).map(|i| i * s).collect(),
            (None, None) => vec![0; sets.len()],
        };

        let n: usize = sets.iter().map(|s| s.len()).sum();
        let mut xyz = Vec::with_capacity(n * 3);
        let mut phot = Vec::with_capacity(n);
        let mut frame_ix = Vec::with_capacity(n);
        for (set, off) in sets.iter().zip(&offsets) {
            xyz.extend(set.xyz.iter().copied());
            phot.extend(set.phot.iter().copied());
            frame_ix.extend(set.frame_ix.iter().map(|&f| f + off));
        }

        let all = |get: fn(&EmitterSet) -> bool| sets.iter().all(get);
        let cat1 = |get: fn(&EmitterSet) -> Option<&Array1<f64>>| {
            sets.iter()
                .flat_map(|s| get(s).map(|a| a.iter().copied()).into_iter().flatten())
                .collect::<Array1<f64>>()
        };

        let mut out = EmitterSet {
            xyz: Array2::from_shape_vec((n, 3), xyz).expect("row count summed above"),
            phot: Array1::from_vec(phot),
            frame_ix: Array1::from_vec(frame_ix),
            id: None,
            prob: None,
            bg: None,
            xyz_sig: None,
            xy_unit: sets.iter().find_map(|s| s.xy_unit),
            px_size: sets.iter().find_map(|s| s.px_size),
        };
        if all(|s| s.id.is_some()) {
            out.id = Some(
                sets.iter()
                    .flat_map(|s| s.id.iter().flat_map(|a| a.iter().copied()))
                    .collect(),
            );
        }
        if all(|s| s.prob.is_some()) {
            out.prob = Some(cat1(|s| s.prob.as_ref()));
        }
        if all(|s| s.bg.is_some()) {
            out.bg = Some(cat1(|s| s.bg.as_ref()));
        }
        if all(|s| s.xyz_sig.is_some()) {
            let mut sig = Vec::with_capacity(n * 3);
            for s in sets {
                if let Some(a) = s.xyz_sig.as_ref() {
                    sig.extend(a.iter().copied());
                }
            }
            out.xyz_sig =
                Some(Array2::from_shape_vec((n, 3), sig).expect("row count summed above"));
        }
        Ok(out)
    }
}

// Pad an N x 2 coordinate array to N x 3 with z = 0.
fn pad_z(arr: Array2<f64>) -> Result<Array2<f64>, DataError> {
    match arr.ncols() {
        3 => Ok(arr),
        2 => {
            let mut out = Array2::zeros((arr.nrows(), 3));
            out.slice_mut(ndarray::s![.., ..2]).assign(&arr);
            Ok(out)
        }
        c => Err(DataError::XyzColumns(c)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{arr1, arr2};
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn new_pads_two_column_coordinates() {
        let em = EmitterSet::new(
            arr2(&[[1.0, 2.0], [3.0, 4.0]]),
            arr1(&[100.0, 200.0]),
            arr1(&[0, 1]),
        )
        .unwrap();
        assert_eq!(em.xyz, arr2(&[[1.0, 2.0, 0.0], [3.0, 4.0, 0.0]]));
    }

    #[test]
    fn new_rejects_mismatched_columns() {
        let bad_cols = EmitterSet::new(Array2::zeros((2, 4)), Array1::zeros(2), Array1::zeros(2));
        assert!(matches!(bad_cols, Err(DataError::XyzColumns(4))));

        let bad_phot = EmitterSet::new(Array2::zeros((2, 3)), Array1::zeros(3), Array1::zeros(2));
        assert!(matches!(
            bad_phot,
            Err(DataError::LengthMismatch { field: "phot", .. })
        ));
    }

    #[test]
    fn unit_conversions_follow_the_pixel_size() {
        let base = || {
            EmitterSet::coordinate_only(arr2(&[[0.25, 0.25, 5.0]])).unwrap()
        };

        // No unit: both accessors refuse.
        assert!(matches!(base().xyz_px(), Err(DataError::UnknownUnit)));
        assert!(matches!(base().xyz_nm(), Err(DataError::UnknownUnit)));

        // px unit without pixel size: px works, nm refuses.
        let em = base().with_units(Some(CoordUnit::Px), None);
        assert_eq!(em.xyz_px().unwrap(), em.xyz);
        assert!(matches!(em.xyz_nm(), Err(DataError::MissingPixelSize)));

        // px unit with pixel size (50, 100): x and y scale, z stays nm.
        let em = base().with_units(Some(CoordUnit::Px), Some([50.0, 100.0]));
        assert_eq!(em.xyz_nm().unwrap(), arr2(&[[12.5, 25.0, 5.0]]));

        // nm unit with pixel size: division on the way back to px.
        let em = EmitterSet::coordinate_only(arr2(&[[25.0, 25.0, 5.0]]))
            .unwrap()
            .with_units(Some(CoordUnit::Nm), Some([50.0, 100.0]));
        assert_eq!(em.xyz_nm().unwrap(), em.xyz);
        assert_eq!(em.xyz_px().unwrap(), arr2(&[[0.5, 0.25, 5.0]]));
    }

    #[test]
    fn sigma_conversions_share_the_unit_rules() {
        let em = EmitterSet::coordinate_only(arr2(&[[1.0, 1.0, 0.0]]))
            .unwrap()
            .with_units(Some(CoordUnit::Px), Some([100.0, 100.0]))
            .with_sigma(arr2(&[[0.1, 0.2, 30.0]]))
            .unwrap();
        assert_eq!(em.xyz_sig_px().unwrap(), arr2(&[[0.1, 0.2, 30.0]]));
        assert_eq!(em.xyz_sig_nm().unwrap(), arr2(&[[10.0, 20.0, 30.0]]));

        let bare = EmitterSet::coordinate_only(arr2(&[[1.0, 1.0, 0.0]])).unwrap();
        assert!(matches!(
            bare.xyz_sig_px(),
            Err(DataError::MissingField("xyz_sig"))
        ));
    }

    #[test]
    fn split_in_frames_defaults_to_the_present_range() {
        let em = EmitterSet::new(
            Array2::zeros((3, 3)),
            Array1::ones(3),
            arr1(&[-1, 1, 1]),
        )
        .unwrap();
        let split = em.split_in_frames(None, None);
        assert_eq!(split.len(), 3);
        assert_eq!(split[0].len(), 1);
        assert_eq!(split[1].len(), 0);
        assert_eq!(split[2].len(), 2);
        // Frame indices are preserved, not rebased.
        assert_eq!(split[0].frame_ix, arr1(&[-1]));
        assert_eq!(split[2].frame_ix, arr1(&[1, 1]));
    }

    #[test]
    fn split_in_frames_with_explicit_bounds_pads_empties() {
        let em = EmitterSet::new(Array2::zeros((2, 3)), Array1::ones(2), arr1(&[1, 2])).unwrap();
        let split = em.split_in_frames(Some(0), Some(4));
        assert_eq!(split.len(), 5);
        assert_eq!(split[0].len(), 0);
        assert_eq!(split[1].len(), 1);
        assert_eq!(split[2].len(), 1);
        assert_eq!(split[3].len(), 0);

        // An empty set only splits when bounds are explicit.
        assert_eq!(EmitterSet::empty().split_in_frames(None, None).len(), 0);
        assert_eq!(
            EmitterSet::empty().split_in_frames(Some(0), Some(100)).len(),
            101
        );
    }

    #[test]
    fn subset_frame_is_inclusive() {
        let em = EmitterSet::new(
            Array2::zeros((4, 3)),
            Array1::ones(4),
            arr1(&[-1, 0, 1, 2]),
        )
        .unwrap();
        let sub = em.subset_frame(0, 1);
        assert_eq!(sub.frame_ix, arr1(&[0, 1]));
    }

    #[test]
    fn cat_applies_offsets_and_steps() {
        let a = EmitterSet::new(Array2::zeros((2, 3)), Array1::ones(2), arr1(&[0, 1])).unwrap();
        let b = EmitterSet::new(Array2::zeros((1, 3)), Array1::ones(1), arr1(&[0])).unwrap();

        let plain = EmitterSet::cat(&[a.clone(), b.clone()], None, None).unwrap();
        assert_eq!(plain.frame_ix, arr1(&[0, 1, 0]));

        let offs = EmitterSet::cat(&[a.clone(), b.clone()], Some(&[10, 20]), None).unwrap();
        assert_eq!(offs.frame_ix, arr1(&[10, 11, 20]));

        let stepped = EmitterSet::cat(&[a.clone(), b.clone()], None, Some(5)).unwrap();
        assert_eq!(stepped.frame_ix, arr1(&[0, 1, 5]));

        assert!(EmitterSet::cat(&[a.clone(), b.clone()], Some(&[1]), None).is_err());
        assert!(EmitterSet::cat(&[a, b], Some(&[1, 2]), Some(3)).is_err());
    }

    #[test]
    fn cat_keeps_optionals_only_when_universal() {
        let with_id = EmitterSet::new(Array2::zeros((1, 3)), Array1::ones(1), arr1(&[0]))
            .unwrap()
            .with_id(arr1(&[7]))
            .unwrap();
        let without = EmitterSet::new(Array2::zeros((1, 3)), Array1::ones(1), arr1(&[0])).unwrap();

        let mixed = EmitterSet::cat(&[with_id.clone(), without], None, None).unwrap();
        assert!(mixed.id.is_none());

        let both = EmitterSet::cat(&[with_id.clone(), with_id], None, None).unwrap();
        assert_eq!(both.id.unwrap(), arr1(&[7, 7]));
    }

    #[test]
    fn random_fills_the_extent() {
        let mut rng = StdRng::seed_from_u64(42);
        let em = EmitterSet::random(
            64,
            (0.0, 32.0),
            (0.0, 32.0),
            (-500.0, 500.0),
            (0, 9),
            &mut rng,
        );
        assert_eq!(em.len(), 64);
        assert_eq!(em.xy_unit, Some(CoordUnit::Px));
        assert!(em.xyz.column(0).iter().all(|&x| (0.0..32.0).contains(&x)));
        assert!(em.frame_ix.iter().all(|&f| (0..=9).contains(&f)));
        assert!(em.phot.iter().all(|&p| (500.0..5000.0).contains(&p)));
    }
}
