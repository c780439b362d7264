// src/dataset.rs
//! Datasets pairing windowed frame inputs with dense target maps.
//!
//! Each sample is a stack of `window` consecutive frames (edge frames
//! repeat at the borders) plus the target map for the center frame. Samples
//! either come from recorded stacks with ground truth attached
//! ([`StaticDataset`]), from on-the-fly simulation ([`OnFlyDataset`]), or
//! from raw frames without any truth ([`UnsupervisedDataset`]).

use ndarray::{Array3, Axis};
use rand::Rng;
use tracing::info;

use crate::emitter::EmitterSet;
use crate::error::DataError;
use crate::psf::{PixelGrid, Psf};
use crate::simulation::{Simulator, UniformPrior};
use crate::target::TargetGenerator;

/// `window` consecutive frames centered on `index`; indices clamp at the
/// stack edges so border samples repeat their edge frame.
pub fn frame_window(frames: &Array3<f64>, index: usize, window: usize) -> Array3<f64> {
    let t = frames.shape()[0];
    let half = window / 2;
    let mut out = Array3::zeros((window, frames.shape()[1], frames.shape()[2]));
    for k in 0..window {
        let src = (index + k).saturating_sub(half).min(t - 1);
        out.index_axis_mut(Axis(0), k)
            .assign(&frames.index_axis(Axis(0), src));
    }
    out
}

fn validate_window(window: usize) -> Result<(), DataError> {
    if window == 0 || window % 2 == 0 {
        return Err(DataError::InvalidValue {
            what: "frame window",
            reason: format!("must be odd, got {window}"),
        });
    }
    Ok(())
}

/// Drops emitters outside a half-open field of view. Coordinates are
/// compared as stored; callers keep emitters and extent in the same unit.
#[derive(Debug, Clone, Copy)]
pub struct RemoveOutOfFov {
    pub xextent: (f64, f64),
    pub yextent: (f64, f64),
}

impl RemoveOutOfFov {
    pub fn from_grid(grid: &PixelGrid) -> Self {
        Self {
            xextent: grid.xextent,
            yextent: grid.yextent,
        }
    }

    pub fn clean(&self, emitters: &EmitterSet) -> EmitterSet {
        let idx: Vec<usize> = emitters
            .xyz
            .rows()
            .into_iter()
            .enumerate()
            .filter(|(_, row)| {
                row[0] >= self.xextent.0
                    && row[0] < self.xextent.1
                    && row[1] >= self.yextent.0
                    && row[1] < self.yextent.1
            })
            .map(|(i, _)| i)
            .collect();
        emitters.subset(&idx)
    }
}

/// Recorded frames with ground-truth emitters, one sample per frame.
pub struct StaticDataset<T: TargetGenerator> {
    frames: Array3<f64>,
    per_frame: Vec<EmitterSet>,
    target_gen: T,
    window: usize,
}

impl<T: TargetGenerator> StaticDataset<T> {
    /// Emitters outside the target grid are dropped up front; the rest are
    /// split per frame over the stack's range.
    pub fn new(
        frames: Array3<f64>,
        emitters: &EmitterSet,
        target_gen: T,
        window: usize,
    ) -> Result<Self, DataError> {
        validate_window(window)?;
        let cleaned = RemoveOutOfFov::from_grid(target_gen.grid()).clean(emitters);
        let t = frames.shape()[0];
        let per_frame = cleaned.split_in_frames(Some(0), Some(t as i64 - 1));
        info!(
            n_frames = t,
            n_emitters = cleaned.len(),
            "static dataset ready"
        );
        Ok(Self {
            frames,
            per_frame,
            target_gen,
            window,
        })
    }

    pub fn len(&self) -> usize {
        self.frames.shape()[0]
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Ground truth attached to one frame.
    pub fn emitters_on(&self, index: usize) -> &EmitterSet {
        &self.per_frame[index]
    }

    /// Windowed input and target map for one frame.
    pub fn get(&self, index: usize) -> Result<(Array3<f64>, Array3<f64>), DataError> {
        if index >= self.len() {
            return Err(DataError::InvalidValue {
                what: "sample index",
                reason: format!("{index} out of range for {} frames", self.len()),
            });
        }
        let input = frame_window(&self.frames, index, self.window);
        let target = self.target_gen.forward(&self.per_frame[index])?;
        Ok((input, target))
    }
}

/// One simulated sample: windowed input, target map and the emitters the
/// target encodes (center frame only).
#[derive(Debug, Clone)]
pub struct Sample {
    pub input: Array3<f64>,
    pub target: Array3<f64>,
    pub emitters: EmitterSet,
}

/// Samples drawn from the simulation pipeline instead of recorded data.
///
/// With `reuse` the dataset is precomputed once and indexed like a static
/// one; otherwise every access simulates a fresh stack.
pub struct OnFlyDataset<P: Psf, T: TargetGenerator> {
    pub prior: UniformPrior,
    pub simulator: Simulator<P>,
    target_gen: T,
    size: usize,
    window: usize,
    cache: Option<Vec<Sample>>,
}

impl<P: Psf + Sync, T: TargetGenerator> OnFlyDataset<P, T> {
    pub fn new<R: Rng>(
        prior: UniformPrior,
        simulator: Simulator<P>,
        target_gen: T,
        size: usize,
        window: usize,
        reuse: bool,
        rng: &mut R,
    ) -> Result<Self, DataError> {
        validate_window(window)?;
        if window > simulator.n_frames {
            return Err(DataError::InvalidValue {
                what: "frame window",
                reason: format!(
                    "window {window} exceeds the {} simulated frames",
                    simulator.n_frames
                ),
            });
        }
        let mut ds = Self {
            prior,
            simulator,
            target_gen,
            size,
            window,
            cache: None,
        };
        if reuse {
            let samples = (0..size)
                .map(|_| ds.sample(rng))
                .collect::<Result<Vec<_>, _>>()?;
            ds.cache = Some(samples);
            info!(size, "on-fly dataset precomputed");
        }
        Ok(ds)
    }

    pub fn len(&self) -> usize {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    /// Simulate one fresh sample: populate, render, window the center
    /// frame and build its target.
    pub fn sample<R: Rng>(&self, rng: &mut R) -> Result<Sample, DataError> {
        let population = self.prior.pop(rng)?;
        let frames = self.simulator.forward(&population, rng)?;
        let mid = self.simulator.n_frames / 2;
        let input = frame_window(&frames, mid, self.window);
        let emitters = population.subset_frame(mid as i64, mid as i64);
        let target = self.target_gen.forward(&emitters)?;
        Ok(Sample {
            input,
            target,
            emitters,
        })
    }

    /// Cached sample when reusing, a fresh draw otherwise.
    pub fn get<R: Rng>(&self, index: usize, rng: &mut R) -> Result<Sample, DataError> {
        match &self.cache {
            Some(cache) => cache.get(index).cloned().ok_or(DataError::InvalidValue {
                what: "sample index",
                reason: format!("{index} out of range for {} samples", cache.len()),
            }),
            None => self.sample(rng),
        }
    }
}

/// Raw frames only, for running inference on real data.
pub struct UnsupervisedDataset {
    frames: Array3<f64>,
    window: usize,
}

impl UnsupervisedDataset {
    pub fn new(frames: Array3<f64>, window: usize) -> Result<Self, DataError> {
        validate_window(window)?;
        Ok(Self { frames, window })
    }

    pub fn len(&self) -> usize {
        self.frames.shape()[0]
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, index: usize) -> Result<Array3<f64>, DataError> {
        if index >= self.len() {
            return Err(DataError::InvalidValue {
                what: "sample index",
                reason: format!("{index} out of range for {} frames", self.len()),
            });
        }
        Ok(frame_window(&self.frames, index, self.window))
    }
}
