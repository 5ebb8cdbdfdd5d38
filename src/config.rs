use std::path::PathBuf;

use crate::{
    enums::{MatchStrategy, SortBy},
    sanitize::{NoSanitize, PathSanitizer, ShortenLongNames},
};

pub const ATTRIBUTE_FILE_NAME: &str = "attributes.csv";
pub const HEADERS_FILE_NAME: &str = "headers.json";

/// Everything a conversion run needs; built once by the caller and passed in.
#[derive(Clone, Debug)]
pub struct ConverterConfig {
    /// Root folder holding the DICOM tree.
    pub root: PathBuf,
    /// Where `attributes.csv` and `headers.json` go. Defaults to `root`.
    pub output_dir: Option<PathBuf>,
    /// CSV with `PatientId` and `Modality` columns selecting series to keep.
    pub query_csv: Option<PathBuf>,
    /// Remove filtered-out series from disk instead of only skipping them.
    pub delete_filtered: bool,
    pub save_json: bool,
    /// Write every image series as a NIfTI volume as well.
    pub convert_series: bool,
    /// Move outputs out of the destination tree into its parent folder.
    pub restructure: bool,
    /// Rename directories with names longer than `max_dir_name_len`.
    pub shorten_dirs: bool,
    pub max_dir_name_len: usize,
    pub strategy: MatchStrategy,
    pub sort_by: SortBy,
    /// Path component identifying the DICOM tree, replaced in output paths.
    pub source_token: String,
    pub dest_token: String,
    /// Build masks across matched pairs in parallel.
    pub parallel: bool,
    pub progress: bool,
}

impl Default for ConverterConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("./data"),
            output_dir: None,
            query_csv: None,
            delete_filtered: false,
            save_json: false,
            convert_series: false,
            restructure: true,
            shorten_dirs: true,
            max_dir_name_len: 20,
            strategy: MatchStrategy::default(),
            sort_by: SortBy::default(),
            source_token: "DICOM".to_string(),
            dest_token: "NIFTI".to_string(),
            parallel: false,
            progress: true,
        }
    }
}

impl ConverterConfig {
    pub fn output_dir(&self) -> PathBuf {
        self.output_dir.clone().unwrap_or_else(|| self.root.clone())
    }

    pub fn sanitizer(&self) -> Box<dyn PathSanitizer> {
        if self.shorten_dirs {
            Box::new(ShortenLongNames {
                max_len: self.max_dir_name_len,
                ..ShortenLongNames::default()
            })
        } else {
            Box::new(NoSanitize)
        }
    }
}
