//! Query file selecting which series to keep by Patient ID and Modality.

use std::{
    collections::{HashMap, HashSet},
    path::Path,
};

use serde::Deserialize;

#[derive(Debug, Deserialize)]
struct FilterRow {
    #[serde(rename = "PatientId")]
    patient_id: String,
    #[serde(rename = "Modality", default)]
    modality: Option<String>,
}

/// Allowed modalities per listed patient. Patients absent from the query,
/// RTSTRUCT series and series without Patient ID or Modality are kept.
#[derive(Debug, Default, Clone)]
pub struct SeriesFilter {
    allowed: HashMap<String, HashSet<String>>,
}

impl SeriesFilter {
    pub fn from_path(path: &Path) -> Result<Self, csv::Error> {
        Self::from_reader(csv::Reader::from_path(path)?)
    }

    pub fn from_reader<R: std::io::Read>(mut reader: csv::Reader<R>) -> Result<Self, csv::Error> {
        let has_modality = reader.headers()?.iter().any(|h| h == "Modality");
        let mut allowed: HashMap<String, HashSet<String>> = HashMap::new();
        if !has_modality {
            return Ok(Self { allowed });
        }

        for row in reader.deserialize::<FilterRow>() {
            let row = row?;
            let modalities = allowed.entry(row.patient_id.trim().to_string()).or_default();
            if let Some(modality) = row.modality.filter(|m| !m.trim().is_empty()) {
                modalities.insert(modality.trim().to_string());
            }
        }
        Ok(Self { allowed })
    }

    pub fn keeps(&self, patient_id: Option<&str>, modality: Option<&str>) -> bool {
        let (Some(patient_id), Some(modality)) = (patient_id, modality) else {
            return true;
        };
        if modality == "RTSTRUCT" {
            return true;
        }
        self.allowed
            .get(patient_id)
            .is_none_or(|modalities| modalities.contains(modality))
    }
}
