//! Binary masks from RTSTRUCT labels, aligned voxel-for-voxel with the
//! referenced image series.

use std::{
    fs,
    path::{Path, PathBuf},
};

use log::{debug, warn};
use ndarray::Array3;
use thiserror::Error;

use crate::{
    enums::SortBy,
    rasterize::{RasterizeError, RoiRasterizer},
    rtstruct::LabelRecord,
    sanitize::extended_length_path,
    scanner::SeriesRecord,
    volume::Volume,
    volume_loader::{VolumeLoader, VolumeLoaderError},
};

pub const NIFTI_GZ_EXTENSION: &str = "nii.gz";

#[derive(Debug, Error)]
pub enum MaskError {
    #[error("Failed to load reference series: {0}")]
    Volume(#[from] VolumeLoaderError),

    #[error("Failed to rasterize: {0}")]
    Rasterize(#[from] RasterizeError),

    #[error("Label has no ROIs")]
    NoRois,

    #[error("ROI mask has shape {found:?}, expected {expected:?}")]
    ShapeMismatch {
        found: (usize, usize, usize),
        expected: (usize, usize, usize),
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to write NIfTI: {0}")]
    Nifti(#[from] nifti::NiftiError),
}

/// Voxel-wise union of ROI masks: the element-wise sum binarized at >= 1.
pub fn union_masks(masks: &[Array3<bool>]) -> Result<Array3<u8>, MaskError> {
    let first = masks.first().ok_or(MaskError::NoRois)?;
    let mut sum = Array3::<u32>::zeros(first.dim());
    for mask in masks {
        if mask.dim() != sum.dim() {
            return Err(MaskError::ShapeMismatch {
                found: mask.dim(),
                expected: sum.dim(),
            });
        }
        sum.zip_mut_with(mask, |total, &inside| *total += u32::from(inside));
    }
    Ok(sum.mapv(|total| u8::from(total >= 1)))
}

/// Move rasterizer axes [0, 1, 2] to positions [1, 2, 0]: (a, b, c) -> (c, a, b).
pub fn to_image_order<T: Clone>(native: Array3<T>) -> Array3<T> {
    native
        .permuted_axes([2, 0, 1])
        .as_standard_layout()
        .into_owned()
}

/// Mask array for `label` on the voxel grid of `reference`, in image order.
pub fn build_mask_array(
    label: &LabelRecord,
    reference: &Volume<f32>,
    rasterizer: &impl RoiRasterizer,
) -> Result<Array3<u8>, MaskError> {
    let (depth, rows, columns) = reference.dim();
    let native = label
        .roi_names()
        .into_iter()
        .map(|name| {
            let roi = label.roi(name).ok_or(MaskError::NoRois)?;
            let mask = rasterizer.rasterize(roi, reference)?;
            debug!("ROI '{name}' covers {} voxels", mask.iter().filter(|&&v| v).count());
            Ok(mask)
        })
        .collect::<Result<Vec<_>, MaskError>>()?;

    let mask = to_image_order(union_masks(&native)?);
    if mask.dim() != (depth, rows, columns) {
        return Err(MaskError::ShapeMismatch {
            found: mask.dim(),
            expected: (depth, rows, columns),
        });
    }
    Ok(mask)
}

/// `{PatientID}_{Modality}_{StudyDate}` with `NA` for missing values.
pub fn output_stem(
    patient_id: Option<&str>,
    modality: Option<&str>,
    study_date: Option<&str>,
) -> String {
    format!(
        "{}_{}_{}",
        patient_id.unwrap_or("NA"),
        modality.unwrap_or("NA"),
        study_date.unwrap_or("NA")
    )
}

/// The part of `path` below `root`, also when `path` carries the extended
/// length prefix and `root` does not.
pub fn relative_to_root<'p>(path: &'p Path, root: &Path) -> Option<&'p Path> {
    path.strip_prefix(root)
        .or_else(|_| path.strip_prefix(extended_length_path(root)))
        .ok()
}

/// Swap `source_token` for `dest_token` in the part of `dir` below `root`.
/// Directories outside `root` are returned unchanged.
pub fn mirror_dir(dir: &Path, root: &Path, source_token: &str, dest_token: &str) -> PathBuf {
    match relative_to_root(dir, root) {
        Some(relative) => {
            root.join(relative.to_string_lossy().replace(source_token, dest_token))
        }
        None => dir.to_path_buf(),
    }
}

/// Output location of the mask built from `label`.
pub fn mask_output_path(
    label: &LabelRecord,
    root: &Path,
    source_token: &str,
    dest_token: &str,
) -> PathBuf {
    let dir = label.path.parent().unwrap_or(Path::new(""));
    let stem = output_stem(
        label.patient_id.as_deref(),
        label.modality.as_deref(),
        label.study_date.as_deref(),
    );
    mirror_dir(dir, root, source_token, dest_token).join(format!("{stem}.{NIFTI_GZ_EXTENSION}"))
}

pub struct MaskBuilder<'a, R> {
    pub rasterizer: &'a R,
    pub root: &'a Path,
    pub source_token: &'a str,
    pub dest_token: &'a str,
    pub sort_by: SortBy,
}

impl<R: RoiRasterizer> MaskBuilder<'_, R> {
    pub fn output_path(&self, label: &LabelRecord) -> PathBuf {
        mask_output_path(label, self.root, self.source_token, self.dest_token)
    }

    /// Rasterize, align and write the mask of `label` over `series`.
    pub fn build(&self, label: &LabelRecord, series: &SeriesRecord) -> Result<PathBuf, MaskError> {
        let reference = VolumeLoader::load_from_file_paths(&series.files, self.sort_by)?;
        let mask = build_mask_array(label, &reference, self.rasterizer)?;
        let mask = Volume::with_geometry_of(mask, &reference);

        let path = self.output_path(label);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        if path.exists() {
            warn!("Overwriting {} with the mask of {}", path.display(), label.path.display());
        }
        mask.write_nifti(&path)?;
        debug!("Wrote mask {}", path.display());
        Ok(path)
    }
}
