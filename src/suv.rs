//! PET activity concentration (Bq/ml) to body-weight SUV.

use chrono::{NaiveTime, Timelike};
use dicom::object::InMemDicomObject;
use dicom_dictionary_std::tags;

/// Multiplicative factor turning Bq/ml voxels into SUVbw, or `None` when the
/// radiopharmaceutical information or the patient weight is missing.
pub fn bqml_to_suv(dicom_object: &InMemDicomObject) -> Option<f64> {
    let weight_kg = get_f64(dicom_object, tags::PATIENT_WEIGHT)?;
    let info = dicom_object
        .element(tags::RADIOPHARMACEUTICAL_INFORMATION_SEQUENCE)
        .ok()?
        .items()?
        .first()?;

    let total_dose = get_f64(info, tags::RADIONUCLIDE_TOTAL_DOSE)?;
    let half_life = get_f64(info, tags::RADIONUCLIDE_HALF_LIFE)?;
    let injection_time = get_time(info, tags::RADIOPHARMACEUTICAL_START_TIME)?;
    let scan_time = get_time(dicom_object, tags::SERIES_TIME)
        .or_else(|| get_time(dicom_object, tags::ACQUISITION_TIME))?;

    suv_factor(weight_kg, total_dose, half_life, scan_time - injection_time)
}

/// `weight_g / (dose * 2^(-elapsed / half_life))`.
pub fn suv_factor(weight_kg: f64, total_dose: f64, half_life: f64, elapsed: f64) -> Option<f64> {
    if half_life <= 0.0 || total_dose <= 0.0 {
        return None;
    }
    let decayed_dose = total_dose * (-elapsed * std::f64::consts::LN_2 / half_life).exp();
    Some(weight_kg * 1000.0 / decayed_dose)
}

/// Seconds since midnight of a DICOM TM value (`HHMMSS[.FFFFFF]`).
pub fn parse_dicom_time(value: &str) -> Option<f64> {
    let value = value.trim();
    let (whole, fraction) = value.split_once('.').unwrap_or((value, ""));
    let time = NaiveTime::parse_from_str(whole, "%H%M%S").ok()?;
    let fraction = if fraction.is_empty() {
        0.0
    } else {
        format!("0.{fraction}").parse::<f64>().ok()?
    };
    Some(f64::from(time.num_seconds_from_midnight()) + fraction)
}

fn get_f64(dicom_object: &InMemDicomObject, tag: dicom::core::Tag) -> Option<f64> {
    dicom_object.element(tag).ok()?.to_float64().ok()
}

fn get_time(dicom_object: &InMemDicomObject, tag: dicom::core::Tag) -> Option<f64> {
    let value = dicom_object.element(tag).ok()?.to_str().ok()?;
    parse_dicom_time(&value)
}
