// src/simulation/camera.rs
//! Camera noise model: Poisson shot noise, Gaussian read noise, gain and
//! baseline. `forward` maps expected photons to recorded counts, `backward`
//! undoes gain and baseline to recover photon estimates from raw data.

use ndarray::{Array2, Array3, ArrayView2};
use rand::distributions::Distribution;
use rand::Rng;
use statrs::distribution::{Normal, Poisson};

use crate::error::DataError;

/// Detector model with sCMOS/EMCCD style conversion parameters.
///
/// Quantum efficiency is folded into the photon numbers, so electrons and
/// photons are used interchangeably here.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Camera {
    /// Offset added to every pixel, in camera counts (ADU).
    pub baseline: f64,
    /// Electrons per camera count.
    pub e_per_adu: f64,
    /// Read noise sigma in electrons; 0 disables read noise.
    pub read_sigma: f64,
}

impl Camera {
    pub fn new(baseline: f64, e_per_adu: f64, read_sigma: f64) -> Result<Self, DataError> {
        if e_per_adu <= 0.0 {
            return Err(DataError::InvalidValue {
                what: "e_per_adu",
                reason: format!("must be positive, got {e_per_adu}"),
            });
        }
        if baseline < 0.0 || read_sigma < 0.0 {
            return Err(DataError::InvalidValue {
                what: "camera",
                reason: format!(
                    "baseline and read_sigma must be non-negative, got {baseline} and {read_sigma}"
                ),
            });
        }
        Ok(Self {
            baseline,
            e_per_adu,
            read_sigma,
        })
    }

    /// Expected photons to recorded counts for one frame.
    pub fn forward_frame<R: Rng>(&self, expected: ArrayView2<f64>, rng: &mut R) -> Array2<f64> {
        let read = if self.read_sigma > 0.0 {
            Normal::new(0.0, self.read_sigma).ok()
        } else {
            None
        };
        let mut out = Array2::zeros(expected.raw_dim());
        for (o, &lambda) in out.iter_mut().zip(expected.iter()) {
            let mut electrons = if lambda > 0.0 {
                Poisson::new(lambda)
                    .map(|d| d.sample(rng))
                    .unwrap_or(0.0)
            } else {
                0.0
            };
            if let Some(n) = &read {
                electrons += n.sample(rng);
            }
            *o = (electrons / self.e_per_adu + self.baseline).max(0.0);
        }
        out
    }

    /// Expected photons to recorded counts for a whole stack.
    pub fn forward<R: Rng>(&self, expected: &Array3<f64>, rng: &mut R) -> Array3<f64> {
        let mut out = Array3::zeros(expected.raw_dim());
        for (mut frame, src) in out.outer_iter_mut().zip(expected.outer_iter()) {
            frame.assign(&self.forward_frame(src, rng));
        }
        out
    }

    /// Recorded counts back to photon estimates for one frame. Values below
    /// the baseline clamp to zero.
    pub fn backward_frame(&self, counts: ArrayView2<f64>) -> Array2<f64> {
        counts.mapv(|c| ((c - self.baseline) * self.e_per_adu).max(0.0))
    }

    /// Recorded counts back to photon estimates for a whole stack.
    pub fn backward(&self, counts: &Array3<f64>) -> Array3<f64> {
        counts.mapv(|c| ((c - self.baseline) * self.e_per_adu).max(0.0))
    }
}
