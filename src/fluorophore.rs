// src/fluorophore.rs
//! Blinking fluorophores: emitters described by on-time intervals rather
//! than per-frame rows.
//!
//! A fluorophore switches on at `t0` (in frame time units) and stays on for
//! `ontime`. [`LooseEmitterSet::distribute`] slices those intervals at frame
//! boundaries, so an emitter alive across a boundary shows up on both frames
//! with photons proportional to the overlap.

use ndarray::{Array1, Array2};

use crate::emitter::{CoordUnit, EmitterSet};
use crate::error::DataError;

/// Emitters in interval form: fixed position, on at `t0` for `ontime`
/// frames, emitting `intensity` photons per unit frame time.
#[derive(Debug, Clone)]
pub struct LooseEmitterSet {
    pub xyz: Array2<f64>,
    pub intensity: Array1<f64>,
    pub t0: Array1<f64>,
    pub ontime: Array1<f64>,
    pub id: Option<Array1<i64>>,
    pub xy_unit: Option<CoordUnit>,
    pub px_size: Option<[f64; 2]>,
}

impl LooseEmitterSet {
    pub fn new(
        xyz: Array2<f64>,
        intensity: Array1<f64>,
        t0: Array1<f64>,
        ontime: Array1<f64>,
    ) -> Result<Self, DataError> {
        if xyz.ncols() != 2 && xyz.ncols() != 3 {
            return Err(DataError::XyzColumns(xyz.ncols()));
        }
        let n = xyz.nrows();
        for (field, len) in [
            ("intensity", intensity.len()),
            ("t0", t0.len()),
            ("ontime", ontime.len()),
        ] {
            if len != n {
                return Err(DataError::LengthMismatch {
                    field,
                    got: len,
                    expected: n,
                });
            }
        }
        if ontime.iter().any(|&t| t < 0.0) {
            return Err(DataError::InvalidValue {
                what: "ontime",
                reason: "must be non-negative".into(),
            });
        }
        Ok(Self {
            xyz,
            intensity,
            t0,
            ontime,
            id: None,
            xy_unit: None,
            px_size: None,
        })
    }

    /// Attach coordinate unit and pixel size. Chainable.
    pub fn with_units(mut self, unit: Option<CoordUnit>, px_size: Option<[f64; 2]>) -> Self {
        self.xy_unit = unit;
        self.px_size = px_size;
        self
    }

    pub fn len(&self) -> usize {
        self.xyz.nrows()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Slice the on-time intervals at frame boundaries.
    ///
    /// Frame f covers the time interval [f, f + 1). Each overlap between an
    /// emitter's on-interval and a frame becomes one row with
    /// `intensity * overlap` photons, so total photons per fluorophore equal
    /// `intensity * ontime` exactly. Output rows are sorted by frame; the
    /// id column tracks the source fluorophore.
    pub fn distribute(&self) -> Result<EmitterSet, DataError> {
        struct Row {
            frame: i64,
            src: usize,
            phot: f64,
        }

        let mut rows: Vec<Row> = Vec::new();
        for i in 0..self.len() {
            let t_on = self.t0[i];
            let t_off = t_on + self.ontime[i];
            if self.ontime[i] == 0.0 {
                continue;
            }
            let first = t_on.floor() as i64;
            let last = t_off.ceil() as i64 - 1;
            for f in first..=last {
                let overlap = t_off.min((f + 1) as f64) - t_on.max(f as f64);
                if overlap > 0.0 {
                    rows.push(Row {
                        frame: f,
                        src: i,
                        phot: self.intensity[i] * overlap,
                    });
                }
            }
        }
        rows.sort_by_key(|r| r.frame);

        let n = rows.len();
        let mut xyz = Array2::zeros((n, 3));
        for (r, row) in rows.iter().enumerate() {
            for c in 0..self.xyz.ncols() {
                xyz[[r, c]] = self.xyz[[row.src, c]];
            }
        }
        let phot: Array1<f64> = rows.iter().map(|r| r.phot).collect();
        let frame_ix: Array1<i64> = rows.iter().map(|r| r.frame).collect();
        let id: Array1<i64> = match &self.id {
            Some(ids) => rows.iter().map(|r| ids[r.src]).collect(),
            None => rows.iter().map(|r| r.src as i64).collect(),
        };

        EmitterSet::new(xyz, phot, frame_ix)?
            .with_id(id)
            .map(|em| em.with_units(self.xy_unit, self.px_size))
    }
}
