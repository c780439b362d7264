// src/simulation/background.rs
//! Spatially uniform background photon levels.

use rand::Rng;

use crate::error::DataError;

/// Uniform background, either fixed or drawn from a range per frame stack.
/// Levels are in photons per pixel per frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UniformBackground {
    pub lo: f64,
    pub hi: f64,
}

impl UniformBackground {
    pub fn constant(level: f64) -> Result<Self, DataError> {
        Self::range(level, level)
    }

    pub fn range(lo: f64, hi: f64) -> Result<Self, DataError> {
        if lo < 0.0 || hi < lo {
            return Err(DataError::InvalidValue {
                what: "background range",
                reason: format!("need 0 <= lo <= hi, got ({lo}, {hi})"),
            });
        }
        Ok(Self { lo, hi })
    }

    /// Draw a level for one frame stack.
    pub fn level<R: Rng>(&self, rng: &mut R) -> f64 {
        if self.hi > self.lo {
            rng.gen_range(self.lo..self.hi)
        } else {
            self.lo
        }
    }
}
