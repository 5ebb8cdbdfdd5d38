use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use log::{LevelFilter, info, warn};

use dicom_rtmask::{
    enums::Orientation,
    mip::{MipOptions, load_nifti_volume, render_mips},
};

#[derive(Parser)]
#[command(name = "rtmask-mip")]
#[command(about = "Render maximum intensity projections of a PET volume with its mask")]
#[command(version)]
struct Cli {
    /// PET volume (.nii or .nii.gz)
    #[arg(value_name = "PET")]
    pet: PathBuf,

    /// Mask volume on the same grid; rendered without overlay when missing
    #[arg(long)]
    mask: Option<PathBuf>,

    /// Output PNG
    #[arg(short, long, default_value = "mip.png")]
    output: PathBuf,

    /// Projection plane (axial, coronal or sagittal); repeat for more panels
    #[arg(long = "plane", value_parser = parse_plane)]
    planes: Vec<Orientation>,

    /// Render high intensities bright instead of dark
    #[arg(long)]
    no_invert: bool,

    /// Opacity of the mask overlay
    #[arg(long, default_value_t = 0.5)]
    alpha: f32,

    /// Keep projections unrotated
    #[arg(long)]
    no_rotate: bool,

    /// Skip the 1st to 99th percentile contrast stretch
    #[arg(long)]
    no_enhance: bool,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

fn parse_plane(s: &str) -> Result<Orientation, String> {
    s.parse().map_err(|e| format!("{e}"))
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };
    let _ = env_logger::Builder::new()
        .filter_level(default_level)
        .parse_default_env()
        .format_timestamp_secs()
        .try_init();

    let pet = load_nifti_volume(&cli.pet)
        .with_context(|| format!("Failed to read PET volume {}", cli.pet.display()))?;

    let mask = match &cli.mask {
        Some(path) if path.is_file() => Some(
            load_nifti_volume(path)
                .with_context(|| format!("Failed to read mask {}", path.display()))?,
        ),
        Some(path) => {
            warn!("Mask {} not found, rendering without overlay", path.display());
            None
        }
        None => None,
    };

    let defaults = MipOptions::default();
    let options = MipOptions {
        planes: if cli.planes.is_empty() {
            defaults.planes
        } else {
            cli.planes
        },
        invert: !cli.no_invert,
        alpha: cli.alpha,
        rotate: !cli.no_rotate,
        enhance: !cli.no_enhance,
    };

    let image = render_mips(pet.view(), mask.as_ref().map(|m| m.view()), &options)
        .context("Failed to render projections")?;
    image
        .save(&cli.output)
        .with_context(|| format!("Failed to save {}", cli.output.display()))?;
    info!("Wrote {}", cli.output.display());
    Ok(())
}
