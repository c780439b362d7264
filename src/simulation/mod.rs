// src/simulation/mod.rs
//! Forward simulation: emitters to expected photons to camera counts.

mod background;
mod camera;
mod prior;

pub use background::UniformBackground;
pub use camera::Camera;
pub use prior::UniformPrior;

use ndarray::{Array3, Axis};
use rand::Rng;
use rayon::prelude::*;
use tracing::debug;

use crate::emitter::EmitterSet;
use crate::error::DataError;
use crate::psf::Psf;

/// Renders emitter sets into frame stacks of shape `(n_frames, W, H)`.
pub struct Simulator<P: Psf> {
    pub psf: P,
    pub background: UniformBackground,
    pub camera: Camera,
    pub n_frames: usize,
}

impl<P: Psf + Sync> Simulator<P> {
    pub fn new(psf: P, background: UniformBackground, camera: Camera, n_frames: usize) -> Self {
        Self {
            psf,
            background,
            camera,
            n_frames,
        }
    }

    /// Noise-free expected photons per pixel, including `bg_level`.
    ///
    /// Emitters are split onto frames `0..n_frames`; frames render in
    /// parallel.
    pub fn forward_expected(
        &self,
        emitters: &EmitterSet,
        bg_level: f64,
    ) -> Result<Array3<f64>, DataError> {
        let per_frame = emitters.split_in_frames(Some(0), Some(self.n_frames as i64 - 1));
        let frames = per_frame
            .into_par_iter()
            .map(|em| {
                let xyz = em.grid_coords()?;
                let mut img = self.psf.forward(xyz.view(), em.phot.view());
                img += bg_level;
                Ok(img)
            })
            .collect::<Result<Vec<_>, DataError>>()?;

        let (w, h) = self.psf.grid().shape;
        let mut out = Array3::zeros((self.n_frames, w, h));
        for (t, frame) in frames.into_iter().enumerate() {
            out.index_axis_mut(Axis(0), t).assign(&frame);
        }
        Ok(out)
    }

    /// Full forward pass: a background level is drawn for the stack, the
    /// expected image is rendered and the camera model is applied.
    pub fn forward<R: Rng>(
        &self,
        emitters: &EmitterSet,
        rng: &mut R,
    ) -> Result<Array3<f64>, DataError> {
        let bg_level = self.background.level(rng);
        debug!(
            n_emitters = emitters.len(),
            n_frames = self.n_frames,
            bg_level,
            "rendering frame stack"
        );
        let expected = self.forward_expected(emitters, bg_level)?;
        Ok(self.camera.forward(&expected, rng))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::psf::{DeltaPsf, PixelGrid};
    use ndarray::{arr1, arr2};
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn delta_sim() -> Simulator<DeltaPsf> {
        Simulator::new(
            DeltaPsf::new(PixelGrid::unit((8, 8))),
            UniformBackground::constant(10.0).unwrap(),
            Camera::new(0.0, 1.0, 0.0).unwrap(),
            3,
        )
    }

    #[test]
    fn emitters_land_on_their_frames() {
        let sim = delta_sim();
        let em = EmitterSet::new(
            arr2(&[[2.0, 3.0, 0.0], [5.0, 5.0, 0.0]]),
            arr1(&[100.0, 200.0]),
            arr1(&[0, 2]),
        )
        .unwrap();
        let expected = sim.forward_expected(&em, 0.0).unwrap();
        assert_eq!(expected.shape(), &[3, 8, 8]);
        assert_eq!(expected[[0, 2, 3]], 100.0);
        assert_eq!(expected[[2, 5, 5]], 200.0);
        // The middle frame holds nothing.
        assert_eq!(expected.index_axis(Axis(0), 1).sum(), 0.0);
    }

    #[test]
    fn background_raises_every_pixel() {
        let sim = delta_sim();
        let expected = sim.forward_expected(&EmitterSet::empty(), 10.0).unwrap();
        assert!(expected.iter().all(|&v| v == 10.0));
    }

    #[test]
    fn out_of_range_frames_are_ignored() {
        let sim = delta_sim();
        let em = EmitterSet::new(
            arr2(&[[2.0, 2.0, 0.0], [3.0, 3.0, 0.0]]),
            arr1(&[50.0, 60.0]),
            arr1(&[-1, 5]),
        )
        .unwrap();
        let expected = sim.forward_expected(&em, 0.0).unwrap();
        assert_eq!(expected.sum(), 0.0);
    }

    #[test]
    fn forward_applies_shot_noise_around_the_expectation() {
        let mut rng = StdRng::seed_from_u64(21);
        let sim = delta_sim();
        let em = EmitterSet::new(arr2(&[[4.0, 4.0, 0.0]]), arr1(&[5000.0]), arr1(&[1])).unwrap();
        let counts = sim.forward(&em, &mut rng).unwrap();
        // The bright pixel should clearly stand out over the background.
        assert!(counts[[1, 4, 4]] > 4000.0);
        assert!(counts.iter().all(|&c| c >= 0.0));
    }
}
