//! Clinical attributes of a series, one CSV row per scanned directory.

use std::path::Path;

use dicom::object::InMemDicomObject;
use dicom_dictionary_std::tags;
use serde::{Deserialize, Serialize};

/// Column order of `attributes.csv`.
pub const ATTRIBUTE_COLUMNS: [&str; 13] = [
    "Patient ID",
    "Patient's Sex",
    "Patient's Age",
    "Patient's Birth Date",
    "Patient's Weight",
    "Institution Name",
    "Referring Physician's Name",
    "Operator's Name",
    "Study Date",
    "Study Time",
    "Modality",
    "Series Description",
    "Dimensions",
];

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct PatientAttributes {
    #[serde(rename = "Patient ID")]
    pub patient_id: Option<String>,
    #[serde(rename = "Patient's Sex")]
    pub patient_sex: Option<String>,
    #[serde(rename = "Patient's Age")]
    pub patient_age: Option<String>,
    #[serde(rename = "Patient's Birth Date")]
    pub patient_birth_date: Option<String>,
    #[serde(rename = "Patient's Weight")]
    pub patient_weight: Option<String>,
    #[serde(rename = "Institution Name")]
    pub institution_name: Option<String>,
    #[serde(rename = "Referring Physician's Name")]
    pub referring_physician_name: Option<String>,
    #[serde(rename = "Operator's Name")]
    pub operators_name: Option<String>,
    #[serde(rename = "Study Date")]
    pub study_date: Option<String>,
    #[serde(rename = "Study Time")]
    pub study_time: Option<String>,
    #[serde(rename = "Modality")]
    pub modality: Option<String>,
    #[serde(rename = "Series Description")]
    pub series_description: Option<String>,
    #[serde(rename = "Dimensions")]
    pub dimensions: Option<String>,
}

impl PatientAttributes {
    /// Extract the fixed attribute set. Missing or unreadable values are `None`.
    pub fn from_dicom(dicom_object: &InMemDicomObject) -> Self {
        let text = |tag| get_string(dicom_object, tag);
        Self {
            patient_id: text(tags::PATIENT_ID),
            patient_sex: text(tags::PATIENT_SEX),
            patient_age: text(tags::PATIENT_AGE),
            patient_birth_date: text(tags::PATIENT_BIRTH_DATE),
            patient_weight: text(tags::PATIENT_WEIGHT),
            institution_name: text(tags::INSTITUTION_NAME),
            referring_physician_name: text(tags::REFERRING_PHYSICIAN_NAME),
            operators_name: text(tags::OPERATORS_NAME),
            study_date: text(tags::STUDY_DATE),
            study_time: text(tags::STUDY_TIME),
            modality: text(tags::MODALITY),
            series_description: text(tags::SERIES_DESCRIPTION),
            dimensions: pixel_dimensions(dicom_object),
        }
    }
}

/// Shape of the pixel array, `(rows, cols)` or `(frames, rows, cols)`.
fn pixel_dimensions(dicom_object: &InMemDicomObject) -> Option<String> {
    let get = |tag| {
        dicom_object
            .element(tag)
            .ok()
            .and_then(|e| e.to_int::<u32>().ok())
    };
    let rows = get(tags::ROWS)?;
    let columns = get(tags::COLUMNS)?;
    match get(tags::NUMBER_OF_FRAMES) {
        Some(frames) if frames > 1 => Some(format!("({frames}, {rows}, {columns})")),
        _ => Some(format!("({rows}, {columns})")),
    }
}

/// Trimmed string value of `tag`; empty values count as missing.
pub fn get_string(dicom_object: &InMemDicomObject, tag: dicom::core::Tag) -> Option<String> {
    let value = dicom_object.element(tag).ok()?.to_str().ok()?;
    let value = value.trim_end_matches('\0').trim();
    (!value.is_empty()).then(|| value.to_string())
}

/// Write the attribute table with its fixed header row.
pub fn write_attribute_table(path: &Path, rows: &[PatientAttributes]) -> Result<(), csv::Error> {
    let mut writer = csv::WriterBuilder::new().has_headers(false).from_path(path)?;
    writer.write_record(ATTRIBUTE_COLUMNS)?;
    for row in rows {
        writer.serialize(row)?;
    }
    writer.flush()?;
    Ok(())
}
