use std::path::{Path, PathBuf};

use dicom::object::{InMemDicomObject, OpenFileOptions};
use dicom_dictionary_std::tags;
use thiserror::Error;

use crate::attributes::get_string;

#[derive(Debug, Error)]
pub enum RtStructError {
    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: dicom::object::ReadError,
    },

    #[error("{0} does not reference an image series")]
    MissingReferencedSeries(PathBuf),
}

/// Closed planar contours of one ROI, in patient coordinates (mm).
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Roi {
    pub number: Option<i32>,
    pub name: String,
    pub contours: Vec<Vec<[f64; 3]>>,
}

/// An RTSTRUCT file and the series it annotates.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct LabelRecord {
    pub path: PathBuf,
    pub referenced_series_uid: String,
    pub rois: Vec<Roi>,
    pub patient_id: Option<String>,
    pub modality: Option<String>,
    pub study_date: Option<String>,
}

impl LabelRecord {
    pub fn from_file(path: &Path) -> Result<Self, RtStructError> {
        let dicom_object = OpenFileOptions::new()
            .read_until(tags::PIXEL_DATA)
            .open_file(path)
            .map_err(|source| RtStructError::Read {
                path: path.to_path_buf(),
                source,
            })?;
        Self::from_dicom(path, &dicom_object)
    }

    pub fn from_dicom(path: &Path, dicom_object: &InMemDicomObject) -> Result<Self, RtStructError> {
        let referenced_series_uid = referenced_series_uid(dicom_object)
            .ok_or_else(|| RtStructError::MissingReferencedSeries(path.to_path_buf()))?;

        Ok(Self {
            path: path.to_path_buf(),
            referenced_series_uid,
            rois: read_rois(dicom_object),
            patient_id: get_string(dicom_object, tags::PATIENT_ID),
            modality: get_string(dicom_object, tags::MODALITY),
            study_date: get_string(dicom_object, tags::STUDY_DATE),
        })
    }

    pub fn roi_names(&self) -> Vec<&str> {
        self.rois.iter().map(|roi| roi.name.as_str()).collect()
    }

    pub fn roi(&self, name: &str) -> Option<&Roi> {
        self.rois.iter().find(|roi| roi.name == name)
    }
}

/// ReferencedFrameOfReference > RTReferencedStudy > RTReferencedSeries > SeriesInstanceUID
fn referenced_series_uid(dicom_object: &InMemDicomObject) -> Option<String> {
    let first_item = |object: &InMemDicomObject, tag| -> Option<InMemDicomObject> {
        object.element(tag).ok()?.items()?.first().cloned()
    };
    let frame = first_item(dicom_object, tags::REFERENCED_FRAME_OF_REFERENCE_SEQUENCE)?;
    let study = first_item(&frame, tags::RT_REFERENCED_STUDY_SEQUENCE)?;
    let series = first_item(&study, tags::RT_REFERENCED_SERIES_SEQUENCE)?;
    get_string(&series, tags::SERIES_INSTANCE_UID)
}

fn read_rois(dicom_object: &InMemDicomObject) -> Vec<Roi> {
    let mut rois: Vec<Roi> = dicom_object
        .element(tags::STRUCTURE_SET_ROI_SEQUENCE)
        .ok()
        .and_then(|e| e.items())
        .unwrap_or_default()
        .iter()
        .map(|item| Roi {
            number: get_int(item, tags::ROI_NUMBER),
            name: get_string(item, tags::ROI_NAME).unwrap_or_default(),
            contours: Vec::new(),
        })
        .collect();

    let roi_contours = dicom_object
        .element(tags::ROI_CONTOUR_SEQUENCE)
        .ok()
        .and_then(|e| e.items())
        .unwrap_or_default();

    for (index, item) in roi_contours.iter().enumerate() {
        let target = match get_int(item, tags::REFERENCED_ROI_NUMBER) {
            Some(number) => rois.iter_mut().find(|roi| roi.number == Some(number)),
            None => rois.get_mut(index),
        };
        let Some(roi) = target else {
            continue;
        };
        roi.contours.extend(read_contours(item));
    }
    rois
}

fn read_contours(roi_contour: &InMemDicomObject) -> Vec<Vec<[f64; 3]>> {
    roi_contour
        .element(tags::CONTOUR_SEQUENCE)
        .ok()
        .and_then(|e| e.items())
        .unwrap_or_default()
        .iter()
        .filter_map(|contour| {
            let data = contour
                .element(tags::CONTOUR_DATA)
                .ok()?
                .to_multi_float64()
                .ok()?;
            Some(
                data.chunks_exact(3)
                    .map(|p| [p[0], p[1], p[2]])
                    .collect::<Vec<_>>(),
            )
        })
        .filter(|points| !points.is_empty())
        .collect()
}

fn get_int(dicom_object: &InMemDicomObject, tag: dicom::core::Tag) -> Option<i32> {
    dicom_object.element(tag).ok()?.to_int::<i32>().ok()
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use dicom::core::{DataElement, PrimitiveValue, VR, value::DataSetSequence};

    fn sequence(tag: dicom::core::Tag, items: Vec<InMemDicomObject>) -> DataElement<InMemDicomObject> {
        DataElement::new(tag, VR::SQ, DataSetSequence::from(items))
    }

    /// Minimal structure set referencing `series_uid` with square ROIs.
    pub(crate) fn structure_set(series_uid: &str, rois: &[(i32, &str, Vec<f64>)]) -> InMemDicomObject {
        let series = InMemDicomObject::from_element_iter([DataElement::new(
            tags::SERIES_INSTANCE_UID,
            VR::UI,
            PrimitiveValue::from(series_uid),
        )]);
        let study = InMemDicomObject::from_element_iter([sequence(
            tags::RT_REFERENCED_SERIES_SEQUENCE,
            vec![series],
        )]);
        let frame = InMemDicomObject::from_element_iter([sequence(
            tags::RT_REFERENCED_STUDY_SEQUENCE,
            vec![study],
        )]);

        let roi_items = rois
            .iter()
            .map(|(number, name, _)| {
                InMemDicomObject::from_element_iter([
                    DataElement::new(tags::ROI_NUMBER, VR::IS, PrimitiveValue::from(number.to_string())),
                    DataElement::new(tags::ROI_NAME, VR::LO, PrimitiveValue::from(*name)),
                ])
            })
            .collect();
        let contour_items = rois
            .iter()
            .map(|(number, _, points)| {
                let contour = InMemDicomObject::from_element_iter([DataElement::new(
                    tags::CONTOUR_DATA,
                    VR::DS,
                    PrimitiveValue::Strs(points.iter().map(|p| p.to_string()).collect()),
                )]);
                InMemDicomObject::from_element_iter([
                    DataElement::new(
                        tags::REFERENCED_ROI_NUMBER,
                        VR::IS,
                        PrimitiveValue::from(number.to_string()),
                    ),
                    sequence(tags::CONTOUR_SEQUENCE, vec![contour]),
                ])
            })
            .collect();

        InMemDicomObject::from_element_iter([
            DataElement::new(tags::PATIENT_ID, VR::LO, PrimitiveValue::from("AB98")),
            DataElement::new(tags::MODALITY, VR::CS, PrimitiveValue::from("RTSTRUCT")),
            DataElement::new(tags::STUDY_DATE, VR::DA, PrimitiveValue::from("20181206")),
            sequence(tags::REFERENCED_FRAME_OF_REFERENCE_SEQUENCE, vec![frame]),
            sequence(tags::STRUCTURE_SET_ROI_SEQUENCE, roi_items),
            sequence(tags::ROI_CONTOUR_SEQUENCE, contour_items),
        ])
    }

    #[test]
    fn reads_referenced_series_and_rois() {
        let object = structure_set(
            "1.2.840.1",
            &[
                (1, "GTV", vec![0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 1.0, 1.0, 0.0]),
                (2, "Liver", vec![]),
            ],
        );
        let label = LabelRecord::from_dicom(Path::new("rs.dcm"), &object).unwrap();

        assert_eq!(label.referenced_series_uid, "1.2.840.1");
        assert_eq!(label.roi_names(), vec!["GTV", "Liver"]);
        assert_eq!(label.patient_id.as_deref(), Some("AB98"));
        assert_eq!(label.modality.as_deref(), Some("RTSTRUCT"));
        let gtv = label.roi("GTV").unwrap();
        assert_eq!(gtv.contours.len(), 1);
        assert_eq!(gtv.contours[0][2], [1.0, 1.0, 0.0]);
        assert!(label.roi("Liver").unwrap().contours.is_empty());
    }

    #[test]
    fn missing_reference_is_an_error() {
        let object = InMemDicomObject::from_element_iter([DataElement::new(
            tags::MODALITY,
            VR::CS,
            PrimitiveValue::from("RTSTRUCT"),
        )]);
        let result = LabelRecord::from_dicom(Path::new("rs.dcm"), &object);
        assert!(matches!(result, Err(RtStructError::MissingReferencedSeries(_))));
    }
}
