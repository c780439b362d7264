// src/main.rs

use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Parser, Subcommand};
use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::info;

use smlmfit::config::Config;
use smlmfit::io;

#[derive(Parser)]
#[command(
    name = "smlmfit",
    version,
    about = "Simulate and localize single-molecule frame stacks"
)]
struct Cli {
    /// TOML config file; built-in defaults apply when omitted
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Render a synthetic frame stack together with its ground truth
    Simulate {
        /// Output CSV for the frame stack
        #[arg(long, default_value = "frames.csv")]
        out_frames: PathBuf,
        /// Output CSV for the ground-truth emitters
        #[arg(long, default_value = "emitters.csv")]
        out_emitters: PathBuf,
    },
    /// Detect and fit emitters in a recorded frame stack
    Localize {
        /// Input CSV with the frame stack
        frames: PathBuf,
        /// Output CSV for the localizations
        #[arg(short, long, default_value = "localizations.csv")]
        output: PathBuf,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => Config::load(path)
            .with_context(|| format!("failed to load config '{}'", path.display()))?,
        None => Config::default(),
    };
    config.logging.init();

    match cli.command {
        Command::Simulate {
            out_frames,
            out_emitters,
        } => cmd_simulate(&config, &out_frames, &out_emitters),
        Command::Localize { frames, output } => cmd_localize(&config, &frames, &output),
    }
}

fn cmd_simulate(config: &Config, out_frames: &Path, out_emitters: &Path) -> anyhow::Result<()> {
    let mut rng = match config.simulation.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };

    println!("Sampling emitters and rendering frames...");
    let simulator = config.simulator()?;
    let emitters = config.prior().pop(&mut rng)?;
    let frames = simulator.forward(&emitters, &mut rng)?;
    info!(
        n_emitters = emitters.len(),
        n_frames = frames.shape()[0],
        "simulation finished"
    );

    io::write_frames(out_frames, &frames)
        .with_context(|| format!("failed to write '{}'", out_frames.display()))?;
    println!(" -> {} written successfully.", out_frames.display());

    io::write_emitters(out_emitters, &emitters)
        .with_context(|| format!("failed to write '{}'", out_emitters.display()))?;
    println!(" -> {} written successfully.", out_emitters.display());

    println!(
        "Simulated {} frames of {:?} px with {} emitter slices.",
        frames.shape()[0],
        config.simulation.frame_size,
        emitters.len()
    );
    Ok(())
}

fn cmd_localize(config: &Config, frames_path: &Path, output: &Path) -> anyhow::Result<()> {
    println!("Loading frame stack...");
    let frames = io::read_frames(frames_path, config.simulation.frame_size)
        .with_context(|| format!("failed to read '{}'", frames_path.display()))?;

    println!("Localizing {} frames...", frames.shape()[0]);
    let pipeline = config.pipeline()?;
    let localizations = pipeline.run(&frames)?;

    io::write_emitters(output, &localizations)
        .with_context(|| format!("failed to write '{}'", output.display()))?;
    println!(" -> {} written successfully.", output.display());

    println!(
        "Found {} localizations across {} frames.",
        localizations.len(),
        frames.shape()[0]
    );
    Ok(())
}
