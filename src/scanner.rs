use std::{
    collections::HashMap,
    fs::File,
    io::Read,
    path::{Path, PathBuf},
};

use log::debug;
use thiserror::Error;
use walkdir::WalkDir;

use dicom::object::InMemDicomObject;
use dicom_dictionary_std::tags;

use crate::{attributes::get_string, sanitize::extended_length_path};

#[derive(Debug, Error)]
pub enum ScanError {
    #[error("Input path is not a directory: {0}")]
    NotADirectory(PathBuf),

    #[error("Failed to walk directory: {0}")]
    Walk(#[from] walkdir::Error),

    #[error("{0} has no Series Instance UID")]
    MissingSeriesUid(PathBuf),
}

/// DICOM files sharing one directory, treated as one acquired series.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SeriesDir {
    pub dir: PathBuf,
    pub files: Vec<PathBuf>,
}

/// An image series identified by its Series Instance UID.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SeriesRecord {
    pub dir: PathBuf,
    pub files: Vec<PathBuf>,
    pub uid: String,
    pub modality: Option<String>,
    pub patient_id: Option<String>,
    pub study_date: Option<String>,
}

impl SeriesRecord {
    /// Build the record from the header of the directory's representative file.
    pub fn from_dicom(series: &SeriesDir, dicom_object: &InMemDicomObject) -> Result<Self, ScanError> {
        let uid = get_string(dicom_object, tags::SERIES_INSTANCE_UID)
            .ok_or_else(|| ScanError::MissingSeriesUid(series.files[0].clone()))?;
        Ok(Self {
            dir: series.dir.clone(),
            files: series.files.clone(),
            uid,
            modality: get_string(dicom_object, tags::MODALITY),
            patient_id: get_string(dicom_object, tags::PATIENT_ID),
            study_date: get_string(dicom_object, tags::STUDY_DATE),
        })
    }
}

/// Walk `root` recursively and group DICOM files by their parent directory,
/// in order of first appearance. Files within a directory are sorted by name.
pub fn scan_series_dirs(root: &Path) -> Result<Vec<SeriesDir>, ScanError> {
    if !root.is_dir() {
        return Err(ScanError::NotADirectory(root.to_path_buf()));
    }

    let mut series: Vec<SeriesDir> = Vec::new();
    let mut index_by_dir: HashMap<PathBuf, usize> = HashMap::new();

    for entry in WalkDir::new(root).sort_by_file_name() {
        let entry = entry?;
        if !entry.file_type().is_file() || !is_likely_dicom_file(entry.path()) {
            continue;
        }
        let path = extended_length_path(entry.path());
        let dir = path.parent().map(Path::to_path_buf).unwrap_or_default();

        match index_by_dir.get(&dir) {
            Some(&i) => series[i].files.push(path),
            None => {
                index_by_dir.insert(dir.clone(), series.len());
                series.push(SeriesDir {
                    dir,
                    files: vec![path],
                });
            }
        }
    }

    debug!("Found {} series directories under {}", series.len(), root.display());
    Ok(series)
}

/// A `.dcm` extension or the `DICM` magic after the 128 byte preamble.
pub fn is_likely_dicom_file(path: &Path) -> bool {
    if path
        .extension()
        .and_then(|s| s.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("dcm"))
    {
        return true;
    }

    if let Ok(mut file) = File::open(path) {
        let mut buffer = [0u8; 132];
        if file.read_exact(&mut buffer).is_ok() {
            return &buffer[128..132] == b"DICM";
        }
    }

    false
}
