// src/simulation/prior.rs
//! Random emitter populations for synthetic frame stacks.

use ndarray::Array2;
use rand::distributions::Distribution;
use rand::Rng;
use statrs::distribution::Exp;

use crate::emitter::{CoordUnit, EmitterSet};
use crate::error::DataError;
use crate::fluorophore::LooseEmitterSet;

/// Structureless prior: positions uniform over the volume, intensities
/// uniform over a range, exponential on-times.
#[derive(Debug, Clone)]
pub struct UniformPrior {
    /// Lateral extents in px.
    pub xextent: (f64, f64),
    pub yextent: (f64, f64),
    /// Axial extent in nm.
    pub zextent: (f64, f64),
    /// Inclusive bounds on the number of fluorophores per stack.
    pub n_range: (usize, usize),
    /// Photons per fully-on frame.
    pub intensity: (f64, f64),
    /// Mean on-time in frames. 0 disables blinking: every emitter is on
    /// for exactly one whole frame.
    pub lifetime: f64,
    /// Frames per stack; emitters land on frames `0..n_frames`.
    pub n_frames: usize,
}

fn sample_in<R: Rng>(rng: &mut R, range: (f64, f64)) -> f64 {
    if range.1 > range.0 {
        rng.gen_range(range.0..range.1)
    } else {
        range.0
    }
}

impl UniformPrior {
    /// Draw one population.
    pub fn pop<R: Rng>(&self, rng: &mut R) -> Result<EmitterSet, DataError> {
        let n = rng.gen_range(self.n_range.0..=self.n_range.1);
        if n == 0 {
            return Ok(EmitterSet::empty().with_units(Some(CoordUnit::Px), None));
        }

        let mut xyz = Array2::zeros((n, 3));
        for mut row in xyz.rows_mut() {
            row[0] = sample_in(rng, self.xextent);
            row[1] = sample_in(rng, self.yextent);
            row[2] = sample_in(rng, self.zextent);
        }
        let intensity = (0..n).map(|_| sample_in(rng, self.intensity)).collect();

        if self.lifetime > 0.0 {
            // Blinking: switch-on times may precede the stack so emitters
            // can already be live on frame 0.
            let t0 = (0..n)
                .map(|_| rng.gen_range(-self.lifetime..self.n_frames as f64))
                .collect();
            let exp = Exp::new(1.0 / self.lifetime).map_err(|_| DataError::InvalidValue {
                what: "lifetime",
                reason: format!("must be finite and positive, got {}", self.lifetime),
            })?;
            let ontime = (0..n).map(|_| exp.sample(rng)).collect();
            let em = LooseEmitterSet::new(xyz, intensity, t0, ontime)?
                .with_units(Some(CoordUnit::Px), None)
                .distribute()?;
            Ok(em.subset_frame(0, self.n_frames as i64 - 1))
        } else {
            let frame_ix = (0..n)
                .map(|_| rng.gen_range(0..self.n_frames as i64))
                .collect();
            Ok(EmitterSet::new(xyz, intensity, frame_ix)?
                .with_units(Some(CoordUnit::Px), None))
        }
    }
}
