// src/lib.rs
//! Simulation and fitting for single-molecule localization microscopy.
//!
//! The crate is organized around [`emitter::EmitterSet`], a column store of
//! localizations. [`simulation`] renders emitter sets into noisy frame
//! stacks, [`target`] and [`dataset`] turn them into training pairs,
//! [`localize`] goes the other way from frames back to emitters.

pub mod config;
pub mod dataset;
pub mod emitter;
pub mod error;
pub mod fluorophore;
pub mod interp;
pub mod io;
pub mod localize;
pub mod psf;
pub mod simulation;
pub mod target;
pub mod utils;

pub use emitter::{CoordUnit, EmitterSet};
pub use error::{Error, Result};
