// src/config.rs
//! Run configuration: TOML-backed settings with defaults, validation and
//! builders for the simulation and localization objects.

use serde::Deserialize;
use std::path::Path;
use tracing_subscriber::EnvFilter;

use crate::error::{ConfigError, Result};
use crate::localize::{LocalizePipeline, RoiFitter};
use crate::psf::{GaussianPsf, PixelGrid, ZCalibration};
use crate::simulation::{Camera, Simulator, UniformBackground, UniformPrior};

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub simulation: SimulationConfig,
    pub psf: PsfConfig,
    pub camera: CameraConfig,
    pub fit: FitConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// Frame shape (W, H) in px.
    pub frame_size: (usize, usize),
    pub n_frames: usize,
    /// Inclusive range of fluorophores per stack.
    pub n_emitters: (usize, usize),
    /// Photons per fully-on frame.
    pub intensity: (f64, f64),
    /// Mean on-time in frames; 0 disables blinking.
    pub lifetime: f64,
    /// Axial range in nm.
    pub z_range: (f64, f64),
    /// Background photons per pixel, drawn per stack.
    pub background: (f64, f64),
    /// Seed for reproducible runs; absent means entropy.
    pub seed: Option<u64>,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            frame_size: (32, 32),
            n_frames: 40,
            n_emitters: (15, 40),
            intensity: (1000.0, 8000.0),
            lifetime: 1.0,
            z_range: (-500.0, 500.0),
            background: (10.0, 60.0),
            seed: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PsfConfig {
    /// In-focus widths (x, y) in px.
    pub sigma: (f64, f64),
    pub z_calibration: Option<ZCalibrationConfig>,
}

impl Default for PsfConfig {
    fn default() -> Self {
        Self {
            sigma: (1.3, 1.3),
            z_calibration: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ZCalibrationConfig {
    pub z: Vec<f64>,
    pub sigma_x: Vec<f64>,
    pub sigma_y: Vec<f64>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    pub baseline: f64,
    pub e_per_adu: f64,
    pub read_sigma: f64,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            baseline: 100.0,
            e_per_adu: 1.0,
            read_sigma: 1.5,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FitConfig {
    /// Detection threshold in sigmas over the background level.
    pub detect_k: f64,
    /// Side length of the fit window, odd.
    pub roi_size: usize,
    pub max_iters: u64,
    /// Disable to keep raw pixel-center detections.
    pub refine: bool,
}

impl Default for FitConfig {
    fn default() -> Self {
        Self {
            detect_k: 4.0,
            roi_size: 5,
            max_iters: 200,
            refine: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    /// "pretty" or "json".
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "pretty".into(),
        }
    }
}

impl LoggingConfig {
    /// Install the global subscriber. `RUST_LOG` wins over the configured
    /// level when set.
    pub fn init(&self) {
        let filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&self.level));
        match self.format.as_str() {
            "json" => tracing_subscriber::fmt()
                .with_env_filter(filter)
                .json()
                .init(),
            _ => tracing_subscriber::fmt().with_env_filter(filter).init(),
        }
    }
}

impl Config {
    /// Read, parse and validate a TOML config file.
    pub fn load<P: AsRef<Path>>(path: P) -> std::result::Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(ConfigError::ReadFile)?;
        Self::from_toml(&text)
    }

    pub fn from_toml(text: &str) -> std::result::Result<Self, ConfigError> {
        let config: Config = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        let fail = |field: &'static str, reason: String| {
            Err(ConfigError::InvalidValue { field, reason })
        };
        let sim = &self.simulation;
        if sim.frame_size.0 == 0 || sim.frame_size.1 == 0 {
            return fail("simulation.frame_size", format!("{:?}", sim.frame_size));
        }
        if sim.n_frames == 0 {
            return fail("simulation.n_frames", "must be at least 1".into());
        }
        if sim.n_emitters.0 > sim.n_emitters.1 {
            return fail("simulation.n_emitters", format!("{:?}", sim.n_emitters));
        }
        if sim.intensity.0 <= 0.0 || sim.intensity.1 < sim.intensity.0 {
            return fail("simulation.intensity", format!("{:?}", sim.intensity));
        }
        if sim.lifetime < 0.0 {
            return fail("simulation.lifetime", format!("{}", sim.lifetime));
        }
        if sim.background.0 < 0.0 || sim.background.1 < sim.background.0 {
            return fail("simulation.background", format!("{:?}", sim.background));
        }
        if self.psf.sigma.0 <= 0.0 || self.psf.sigma.1 <= 0.0 {
            return fail("psf.sigma", format!("{:?}", self.psf.sigma));
        }
        if let Some(zc) = &self.psf.z_calibration {
            if ZCalibration::new(zc.z.clone(), zc.sigma_x.clone(), zc.sigma_y.clone()).is_err() {
                return fail("psf.z_calibration", "inconsistent knot vectors".into());
            }
        }
        if self.camera.e_per_adu <= 0.0 {
            return fail("camera.e_per_adu", format!("{}", self.camera.e_per_adu));
        }
        if self.camera.baseline < 0.0 || self.camera.read_sigma < 0.0 {
            return fail(
                "camera",
                format!(
                    "baseline {} read_sigma {}",
                    self.camera.baseline, self.camera.read_sigma
                ),
            );
        }
        if self.fit.roi_size % 2 == 0 || self.fit.roi_size == 0 {
            return fail("fit.roi_size", format!("{}", self.fit.roi_size));
        }
        if self.fit.detect_k <= 0.0 {
            return fail("fit.detect_k", format!("{}", self.fit.detect_k));
        }
        Ok(())
    }

    /// Unit pixel grid matching the configured frame size.
    pub fn grid(&self) -> PixelGrid {
        PixelGrid::unit(self.simulation.frame_size)
    }

    pub fn psf(&self) -> Result<GaussianPsf> {
        let grid = self.grid();
        Ok(match &self.psf.z_calibration {
            Some(zc) => GaussianPsf::astigmatic(
                grid,
                self.psf.sigma,
                ZCalibration::new(zc.z.clone(), zc.sigma_x.clone(), zc.sigma_y.clone())?,
            ),
            None => GaussianPsf::new(grid, self.psf.sigma),
        })
    }

    pub fn camera(&self) -> Result<Camera> {
        Ok(Camera::new(
            self.camera.baseline,
            self.camera.e_per_adu,
            self.camera.read_sigma,
        )?)
    }

    pub fn prior(&self) -> UniformPrior {
        let grid = self.grid();
        UniformPrior {
            xextent: grid.xextent,
            yextent: grid.yextent,
            zextent: self.simulation.z_range,
            n_range: self.simulation.n_emitters,
            intensity: self.simulation.intensity,
            lifetime: self.simulation.lifetime,
            n_frames: self.simulation.n_frames,
        }
    }

    pub fn simulator(&self) -> Result<Simulator<GaussianPsf>> {
        Ok(Simulator::new(
            self.psf()?,
            UniformBackground::range(self.simulation.background.0, self.simulation.background.1)?,
            self.camera()?,
            self.simulation.n_frames,
        ))
    }

    pub fn pipeline(&self) -> Result<LocalizePipeline> {
        let fitter = if self.fit.refine {
            Some(RoiFitter::new(
                self.fit.roi_size,
                self.psf.sigma,
                self.fit.max_iters,
            )?)
        } else {
            None
        };
        Ok(LocalizePipeline {
            camera: self.camera()?,
            grid: self.grid(),
            detect_k: self.fit.detect_k,
            fitter,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate_and_build() {
        let config = Config::default();
        config.validate().unwrap();
        let sim = config.simulator().unwrap();
        assert_eq!(sim.n_frames, 40);
        assert_eq!(config.grid().shape, (32, 32));
        assert!(config.pipeline().unwrap().fitter.is_some());
    }

    #[test]
    fn toml_overrides_defaults_section_by_section() {
        let config = Config::from_toml(
            r#"
            [simulation]
            frame_size = [64, 48]
            n_frames = 10
            seed = 7

            [camera]
            baseline = 50.0
            "#,
        )
        .unwrap();
        assert_eq!(config.simulation.frame_size, (64, 48));
        assert_eq!(config.simulation.seed, Some(7));
        assert_eq!(config.camera.baseline, 50.0);
        // Untouched sections keep their defaults.
        assert_eq!(config.fit.roi_size, 5);
        assert_eq!(config.psf.sigma, (1.3, 1.3));
    }

    #[test]
    fn z_calibration_table_produces_an_astigmatic_psf() {
        let config = Config::from_toml(
            r#"
            [psf]
            sigma = [1.2, 1.2]

            [psf.z_calibration]
            z = [-400.0, 0.0, 400.0]
            sigma_x = [2.0, 1.2, 0.9]
            sigma_y = [0.9, 1.2, 2.0]
            "#,
        )
        .unwrap();
        let psf = config.psf().unwrap();
        assert!(psf.z_calibration.is_some());
    }

    #[test]
    fn invalid_values_are_rejected_with_their_field() {
        let bad = Config::from_toml("[simulation]\nn_emitters = [9, 3]\n");
        match bad {
            Err(ConfigError::InvalidValue { field, .. }) => {
                assert_eq!(field, "simulation.n_emitters")
            }
            other => panic!("expected invalid value error, got {other:?}"),
        }

        assert!(Config::from_toml("[psf]\nsigma = [0.0, 1.0]\n").is_err());
        assert!(Config::from_toml("[fit]\nroi_size = 4\n").is_err());
        assert!(Config::from_toml("not valid toml [").is_err());
    }

    #[test]
    fn refine_flag_controls_the_fitter() {
        let config = Config::from_toml("[fit]\nrefine = false\n").unwrap();
        assert!(config.pipeline().unwrap().fitter.is_none());
    }
}
