use crate::{
    enums::SortBy,
    volume::{Geometry, Volume},
};

use dicom::{
    object::{FileDicomObject, InMemDicomObject, open_file},
    pixeldata::{ConvertOptions, ModalityLutOption, PixelDecoder},
};
use dicom_dictionary_std::tags;
use log::debug;
use ndarray::{Array2, Array3, s};
use rayon::prelude::*;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum VolumeLoaderError {
    #[error("No valid DICOM images found")]
    NoValidImages,

    #[error("Inconsistent image dimensions")]
    InconsistentDimensions,

    #[error("Missing spacing information")]
    MissingSpacing,

    #[error("Invalid ImageOrientationPatient: expected 6 values, got {0}")]
    InvalidOrientation(usize),

    #[error("DICOM error: {0}")]
    Dicom(#[from] dicom::object::ReadError),
}

type DicomFile = FileDicomObject<InMemDicomObject>;

pub struct VolumeLoader;

impl VolumeLoader {
    /// Load a volume from DICOM objects
    ///
    /// # Arguments
    ///
    /// * `dicom_objects` - Slice of DICOM file objects
    /// * `sort_by` - Method to sort the slices
    ///
    /// # Errors
    ///
    /// Returns error if no valid images found or dimensions are inconsistent
    pub fn load_from_dicom_objects(
        dicom_objects: &[DicomFile],
        sort_by: SortBy,
    ) -> Result<Volume<f32>, VolumeLoaderError> {
        let first = dicom_objects.first().ok_or(VolumeLoaderError::NoValidImages)?;
        let (dir_x, dir_y) = Self::get_orientation(first)?;
        let normal = cross(dir_x, dir_y);

        let mut slices: Vec<_> = dicom_objects
            .par_iter()
            .filter_map(|dicom_object| {
                let order = Self::get_sort_order(dicom_object, sort_by, normal);
                let image = Self::decode_image(dicom_object)?;
                Some((order, Self::get_position(dicom_object), dicom_object, image))
            })
            .collect();

        if slices.is_empty() {
            return Err(VolumeLoaderError::NoValidImages);
        }

        if !matches!(sort_by, SortBy::None) {
            slices.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal));
        }

        let images: Vec<_> = slices.iter().map(|(_, _, _, image)| image).collect();
        Self::validate_dimensions(&images)?;
        let volume_array = Self::build_volume_array(&images);

        let (row_spacing, column_spacing) = slices
            .iter()
            .find_map(|(_, _, obj, _)| Self::get_pixel_spacing(obj))
            .ok_or(VolumeLoaderError::MissingSpacing)?;

        let positions: Vec<_> = slices.iter().map(|(_, pos, _, _)| *pos).collect();
        let slice_axis = get_slice_axis(&positions, normal);
        let slice_spacing = Self::get_slice_spacing(&positions, slice_axis)
            .or_else(|| {
                slices
                    .iter()
                    .find_map(|(_, _, obj, _)| Self::get_f64(obj, tags::SLICE_THICKNESS))
            })
            .unwrap_or(1.0);

        let origin = positions[0].unwrap_or([0.0; 3]);
        let geometry = Geometry {
            origin,
            spacing: [column_spacing, row_spacing, slice_spacing],
            direction: [
                [dir_x[0], dir_y[0], slice_axis[0]],
                [dir_x[1], dir_y[1], slice_axis[1]],
                [dir_x[2], dir_y[2], slice_axis[2]],
            ],
        };
        debug!(
            "Loaded volume {:?} with spacing {:?}",
            volume_array.dim(),
            geometry.spacing
        );

        Ok(Volume::new(volume_array, geometry))
    }

    /// Load a volume from file paths
    pub fn load_from_file_paths(
        paths: &[impl AsRef<Path> + Sync],
        sort_by: SortBy,
    ) -> Result<Volume<f32>, VolumeLoaderError> {
        let objects: Result<Vec<_>, _> = paths
            .par_iter()
            .map(|path| open_file(path.as_ref()))
            .collect();

        Self::load_from_dicom_objects(&objects?, sort_by)
    }

    fn get_orientation(
        dicom_object: &DicomFile,
    ) -> Result<([f64; 3], [f64; 3]), VolumeLoaderError> {
        let Some(values) = Self::get_f64_vec(dicom_object, tags::IMAGE_ORIENTATION_PATIENT) else {
            return Ok(([1.0, 0.0, 0.0], [0.0, 1.0, 0.0]));
        };
        if values.len() != 6 {
            return Err(VolumeLoaderError::InvalidOrientation(values.len()));
        }
        Ok((
            normalize([values[0], values[1], values[2]]),
            normalize([values[3], values[4], values[5]]),
        ))
    }

    fn get_sort_order(dicom_object: &DicomFile, sort_by: SortBy, normal: [f64; 3]) -> Option<f64> {
        match sort_by {
            SortBy::ImagePositionPatient => {
                Self::get_position(dicom_object).map(|pos| dot(pos, normal))
            }
            SortBy::InstanceNumber => dicom_object
                .element(tags::INSTANCE_NUMBER)
                .ok()?
                .to_int::<i32>()
                .ok()
                .map(f64::from),
            SortBy::None => Some(0.0),
        }
    }

    fn decode_image(dicom_object: &DicomFile) -> Option<Array2<f32>> {
        let pixel_data = dicom_object.decode_pixel_data().ok()?;
        let options = ConvertOptions::new().with_modality_lut(ModalityLutOption::Default);
        pixel_data
            .to_ndarray_with_options::<f32>(&options)
            .ok()
            .map(|arr| arr.slice_move(s![0, .., .., 0]))
    }

    fn validate_dimensions(images: &[&Array2<f32>]) -> Result<(), VolumeLoaderError> {
        let first_dim = images[0].dim();
        if images.iter().any(|img| img.dim() != first_dim) {
            return Err(VolumeLoaderError::InconsistentDimensions);
        }
        Ok(())
    }

    fn build_volume_array(images: &[&Array2<f32>]) -> Array3<f32> {
        let (height, width) = images[0].dim();
        let depth = images.len();
        let mut volume = Array3::<f32>::zeros((depth, height, width));

        for (i, image) in images.iter().enumerate() {
            volume.slice_mut(s![i, .., ..]).assign(*image);
        }

        volume
    }

    /// (row spacing, column spacing) from PixelSpacing.
    fn get_pixel_spacing(dicom_object: &DicomFile) -> Option<(f64, f64)> {
        let spacing = Self::get_f64_vec(dicom_object, tags::PIXEL_SPACING)?;
        match spacing.as_slice() {
            [row, column, ..] => Some((*row, *column)),
            _ => None,
        }
    }

    /// Mean distance between consecutive slices along `axis`.
    fn get_slice_spacing(positions: &[Option<[f64; 3]>], axis: [f64; 3]) -> Option<f64> {
        let projected: Option<Vec<f64>> = positions
            .iter()
            .map(|pos| pos.map(|p| dot(p, axis)))
            .collect();
        let projected = projected?;
        if projected.len() < 2 {
            return None;
        }
        let total: f64 = projected.windows(2).map(|w| (w[1] - w[0]).abs()).sum();
        let mean = total / (projected.len() - 1) as f64;
        (mean > 0.0).then_some(mean)
    }

    fn get_position(dicom_object: &DicomFile) -> Option<[f64; 3]> {
        match Self::get_f64_vec(dicom_object, tags::IMAGE_POSITION_PATIENT)?.as_slice() {
            [x, y, z] => Some([*x, *y, *z]),
            _ => None,
        }
    }

    fn get_f64(dicom_object: &DicomFile, tag: dicom::core::Tag) -> Option<f64> {
        dicom_object.element(tag).ok()?.to_float64().ok()
    }

    fn get_f64_vec(dicom_object: &DicomFile, tag: dicom::core::Tag) -> Option<Vec<f64>> {
        dicom_object.element(tag).ok()?.to_multi_float64().ok()
    }
}

/// Direction from the first to the last stacked slice, so that slice index
/// k always lies at `origin + k * spacing * axis` whatever the sort order.
/// Falls back to the orientation normal when positions are missing or equal.
fn get_slice_axis(positions: &[Option<[f64; 3]>], normal: [f64; 3]) -> [f64; 3] {
    let (Some(Some(first)), Some(Some(last))) = (positions.first(), positions.last()) else {
        return normal;
    };
    let span = [last[0] - first[0], last[1] - first[1], last[2] - first[2]];
    if dot(span, span) == 0.0 {
        return normal;
    }
    let along_normal = dot(span, normal);
    if along_normal == 0.0 {
        normalize(span)
    } else {
        normal.map(|v| v * along_normal.signum())
    }
}

fn dot(a: [f64; 3], b: [f64; 3]) -> f64 {
    a[0] * b[0] + a[1] * b[1] + a[2] * b[2]
}

fn cross(a: [f64; 3], b: [f64; 3]) -> [f64; 3] {
    [
        a[1] * b[2] - a[2] * b[1],
        a[2] * b[0] - a[0] * b[2],
        a[0] * b[1] - a[1] * b[0],
    ]
}

fn normalize(v: [f64; 3]) -> [f64; 3] {
    let norm = dot(v, v).sqrt();
    if norm == 0.0 {
        v
    } else {
        [v[0] / norm, v[1] / norm, v[2] / norm]
    }
}
