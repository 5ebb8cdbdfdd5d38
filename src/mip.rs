//! Maximum intensity projections of NIfTI volumes with an optional mask
//! overlay.
//!
//! Volumes are indexed (x, y, z) as stored in the NIfTI file, so a coronal
//! projection collapses y and a sagittal projection collapses x.

use std::path::Path;

use image::{Rgb, RgbImage, imageops};
use log::debug;
use ndarray::{Array2, Array3, ArrayView2, ArrayView3, Axis, Ix3, s};
use nifti::{IntoNdArray, NiftiObject, ReaderOptions};
use thiserror::Error;

use crate::enums::{InvalidPlane, Orientation};

const RED: [f32; 3] = [255.0, 0.0, 0.0];

#[derive(Debug, Error)]
pub enum MipError {
    #[error(transparent)]
    InvalidPlane(#[from] InvalidPlane),

    #[error("Degenerate intensity range: p_low = p_high = {0}")]
    DegenerateRange(f32),

    #[error("Mask has shape {found:?}, expected {expected:?}")]
    ShapeMismatch {
        found: Vec<usize>,
        expected: Vec<usize>,
    },

    #[error("Failed to read NIfTI: {0}")]
    Nifti(#[from] nifti::NiftiError),

    #[error("Expected a 3D volume: {0}")]
    NotAVolume(#[from] ndarray::ShapeError),

    #[error("Failed to write image: {0}")]
    Image(#[from] image::ImageError),
}

/// Maximum over the axis collapsed by `plane`.
pub fn get_mip(volume: ArrayView3<f32>, plane: Orientation) -> Array2<f32> {
    volume.fold_axis(Axis(plane.axis()), f32::NEG_INFINITY, |&max, &v| max.max(v))
}

pub fn get_mip_for_plane(volume: ArrayView3<f32>, plane: &str) -> Result<Array2<f32>, MipError> {
    Ok(get_mip(volume, plane.parse()?))
}

/// Percentile `q` (0..=100) of already sorted values, interpolating linearly
/// between the neighbouring order statistics.
fn percentile_sorted(sorted: &[f32], q: f32) -> f32 {
    let rank = f64::from(q.clamp(0.0, 100.0)) / 100.0 * (sorted.len() - 1) as f64;
    let lower = rank.floor() as usize;
    let upper = rank.ceil() as usize;
    let fraction = (rank - lower as f64) as f32;
    sorted[lower] + (sorted[upper] - sorted[lower]) * fraction
}

pub fn percentile(values: impl IntoIterator<Item = f32>, q: f32) -> Option<f32> {
    let mut sorted: Vec<f32> = values.into_iter().filter(|v| !v.is_nan()).collect();
    if sorted.is_empty() {
        return None;
    }
    sorted.sort_by(f32::total_cmp);
    Some(percentile_sorted(&sorted, q))
}

/// Clip to the `[low, high]` percentiles and rescale to `[0, 1]`.
pub fn enhance_dynamic_range(
    image: ArrayView2<f32>,
    low_percent: f32,
    high_percent: f32,
) -> Result<Array2<f32>, MipError> {
    let mut sorted: Vec<f32> = image.iter().copied().filter(|v| !v.is_nan()).collect();
    if sorted.is_empty() {
        return Err(MipError::DegenerateRange(f32::NAN));
    }
    sorted.sort_by(f32::total_cmp);
    let low = percentile_sorted(&sorted, low_percent);
    let high = percentile_sorted(&sorted, high_percent);
    if high <= low {
        return Err(MipError::DegenerateRange(low));
    }
    Ok(image.mapv(|v| (v.clamp(low, high) - low) / (high - low)))
}

/// Min-max rescale to `[0, 1]`; a constant image maps to zeros.
pub fn normalize(image: ArrayView2<f32>) -> Array2<f32> {
    let (min, max) = image
        .iter()
        .fold((f32::INFINITY, f32::NEG_INFINITY), |(min, max), &v| {
            (min.min(v), max.max(v))
        });
    if max > min {
        image.mapv(|v| (v - min) / (max - min))
    } else {
        Array2::zeros(image.raw_dim())
    }
}

/// Counter-clockwise rotation by 90 degrees.
pub fn rot90<T: Clone>(image: ArrayView2<T>) -> Array2<T> {
    image.slice(s![.., ..;-1]).reversed_axes().to_owned()
}

/// Render a projection with values in `[0, 1]` as grayscale, blending mask
/// pixels above zero with red.
pub fn render_panel(
    mip: ArrayView2<f32>,
    mask: Option<ArrayView2<f32>>,
    invert: bool,
    alpha: f32,
) -> Result<RgbImage, MipError> {
    if let Some(mask) = mask.filter(|m| m.dim() != mip.dim()) {
        return Err(MipError::ShapeMismatch {
            found: mask.shape().to_vec(),
            expected: mip.shape().to_vec(),
        });
    }
    let alpha = alpha.clamp(0.0, 1.0);
    let (rows, columns) = mip.dim();

    let mut panel = RgbImage::new(columns as u32, rows as u32);
    for ((row, column), &value) in mip.indexed_iter() {
        let value = value.clamp(0.0, 1.0);
        let gray = if invert { 1.0 - value } else { value } * 255.0;
        let masked = mask.is_some_and(|m| m[[row, column]] > 0.0);
        let channel = |c: usize| {
            let v = if masked {
                (1.0 - alpha) * gray + alpha * RED[c]
            } else {
                gray
            };
            v.round() as u8
        };
        panel.put_pixel(
            column as u32,
            row as u32,
            Rgb([channel(0), channel(1), channel(2)]),
        );
    }
    Ok(panel)
}

/// Panels left to right on a white canvas as tall as the tallest panel.
pub fn compose_side_by_side(panels: &[RgbImage]) -> RgbImage {
    let width = panels.iter().map(RgbImage::width).sum();
    let height = panels.iter().map(RgbImage::height).max().unwrap_or(0);
    let mut canvas = RgbImage::from_pixel(width, height, Rgb([255, 255, 255]));
    let mut x = 0;
    for panel in panels {
        imageops::replace(&mut canvas, panel, x, 0);
        x += i64::from(panel.width());
    }
    canvas
}

pub fn load_nifti_volume(path: impl AsRef<Path>) -> Result<Array3<f32>, MipError> {
    let object = ReaderOptions::new().read_file(path.as_ref())?;
    let data = object.into_volume().into_ndarray::<f32>()?;
    Ok(data.into_dimensionality::<Ix3>()?)
}

/// Rendering options for [`render_mips`].
#[derive(Clone, Debug)]
pub struct MipOptions {
    pub planes: Vec<Orientation>,
    pub invert: bool,
    pub alpha: f32,
    pub rotate: bool,
    pub enhance: bool,
}

impl Default for MipOptions {
    fn default() -> Self {
        Self {
            planes: vec![Orientation::Coronal, Orientation::Sagittal],
            invert: true,
            alpha: 0.5,
            rotate: true,
            enhance: true,
        }
    }
}

/// One panel per requested plane, composed side by side.
pub fn render_mips(
    volume: ArrayView3<f32>,
    mask: Option<ArrayView3<f32>>,
    options: &MipOptions,
) -> Result<RgbImage, MipError> {
    if let Some(mask) = mask.filter(|m| m.dim() != volume.dim()) {
        return Err(MipError::ShapeMismatch {
            found: mask.shape().to_vec(),
            expected: volume.shape().to_vec(),
        });
    }

    let panels = options
        .planes
        .iter()
        .map(|&plane| {
            debug!("Rendering {plane} MIP");
            let projection = get_mip(volume, plane);
            let mut projection = if options.enhance {
                enhance_dynamic_range(projection.view(), 1.0, 99.0)?
            } else {
                normalize(projection.view())
            };
            let mut mask_projection = mask.map(|m| get_mip(m, plane));
            if options.rotate {
                projection = rot90(projection.view());
                mask_projection = mask_projection.map(|m| rot90(m.view()));
            }
            render_panel(
                projection.view(),
                mask_projection.as_ref().map(|m| m.view()),
                options.invert,
                options.alpha,
            )
        })
        .collect::<Result<Vec<_>, MipError>>()?;
    Ok(compose_side_by_side(&panels))
}
