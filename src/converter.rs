//! Sequencing of a full conversion run over a DICOM tree.

use std::{
    collections::HashSet,
    fs, io,
    path::{Path, PathBuf},
};

use dicom::object::{InMemDicomObject, OpenFileOptions};
use dicom_dictionary_std::tags;
use indicatif::{ProgressBar, ProgressStyle};
use log::{debug, info, warn};
use rayon::prelude::*;
use thiserror::Error;
use walkdir::WalkDir;

use crate::{
    attributes::{PatientAttributes, write_attribute_table},
    config::{ATTRIBUTE_FILE_NAME, ConverterConfig, HEADERS_FILE_NAME},
    correlator::{Match, correlate},
    filter::SeriesFilter,
    headers::{HeaderDict, HeaderKeys, header_dict, write_headers_json},
    mask::{MaskBuilder, NIFTI_GZ_EXTENSION, mirror_dir, output_stem, relative_to_root},
    rasterize::{PolygonRasterizer, RoiRasterizer},
    rtstruct::{LabelRecord, RtStructError},
    scanner::{ScanError, SeriesDir, SeriesRecord, scan_series_dirs},
    suv::bqml_to_suv,
    volume_loader::{VolumeLoader, VolumeLoaderError},
};

const RTSTRUCT: &str = "RTSTRUCT";

#[derive(Debug, Error)]
pub enum ConvertError {
    #[error("Failed to shorten directory names: {0}")]
    Sanitize(#[source] io::Error),

    #[error(transparent)]
    Scan(#[from] ScanError),

    #[error("Failed to read DICOM header of {path}: {source}")]
    ReadHeader {
        path: PathBuf,
        #[source]
        source: dicom::object::ReadError,
    },

    #[error(transparent)]
    RtStruct(#[from] RtStructError),

    #[error("Failed to read query file {path}: {source}")]
    Query {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("Failed to write attribute table: {0}")]
    AttributeTable(#[source] csv::Error),

    #[error("Failed to convert series {dir}: {reason}")]
    Series { dir: PathBuf, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// A label whose mask could not be built, and why.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MaskFailure {
    pub label_path: PathBuf,
    pub reason: String,
}

/// Outcome of a conversion run.
#[derive(Clone, Debug, Default)]
pub struct BatchReport {
    pub series_scanned: usize,
    pub series_filtered: usize,
    pub series_converted: Vec<PathBuf>,
    pub masks_written: Vec<PathBuf>,
    pub unmatched_labels: Vec<PathBuf>,
    pub failures: Vec<MaskFailure>,
    pub header_keys: Vec<String>,
    pub files_moved: usize,
}

impl BatchReport {
    pub fn summary(&self) -> String {
        if self.series_scanned == 0 {
            return "No files in directory to convert. Check if your query is valid!".to_string();
        }
        format!(
            "Done! Scanned {} series, wrote {} masks and {} series volumes ({} labels unmatched, {} failed)",
            self.series_scanned,
            self.masks_written.len(),
            self.series_converted.len(),
            self.unmatched_labels.len(),
            self.failures.len()
        )
    }
}

/// Records gathered from one pass over the scanned directories.
#[derive(Default)]
struct Inventory {
    attributes: Vec<PatientAttributes>,
    headers: Vec<HeaderDict>,
    header_keys: HeaderKeys,
    series: Vec<SeriesRecord>,
    labels: Vec<LabelRecord>,
    filtered: usize,
}

pub struct Converter<R = PolygonRasterizer> {
    config: ConverterConfig,
    rasterizer: R,
}

impl Converter {
    pub fn new(config: ConverterConfig) -> Self {
        Self::with_rasterizer(config, PolygonRasterizer)
    }
}

impl<R: RoiRasterizer> Converter<R> {
    pub fn with_rasterizer(config: ConverterConfig, rasterizer: R) -> Self {
        Self { config, rasterizer }
    }

    pub fn run(&self) -> Result<BatchReport, ConvertError> {
        let config = &self.config;

        // renames must happen before any path is recorded
        config
            .sanitizer()
            .sanitize(&config.root)
            .map_err(ConvertError::Sanitize)?;

        let series_dirs = scan_series_dirs(&config.root)?;
        info!("Found {} series directories", series_dirs.len());

        let filter = match &config.query_csv {
            Some(path) => Some(SeriesFilter::from_path(path).map_err(|source| {
                ConvertError::Query {
                    path: path.clone(),
                    source,
                }
            })?),
            None => None,
        };

        let inventory = self.take_inventory(&series_dirs, filter.as_ref())?;
        let mut report = BatchReport {
            series_scanned: series_dirs.len(),
            series_filtered: inventory.filtered,
            header_keys: inventory.header_keys.keys().to_vec(),
            ..BatchReport::default()
        };

        if !inventory.attributes.is_empty() {
            let output_dir = config.output_dir();
            fs::create_dir_all(&output_dir)?;
            write_attribute_table(&output_dir.join(ATTRIBUTE_FILE_NAME), &inventory.attributes)
                .map_err(ConvertError::AttributeTable)?;
            if config.save_json {
                write_headers_json(&output_dir.join(HEADERS_FILE_NAME), &inventory.headers)?;
            }
        }

        if config.convert_series {
            report.series_converted = self.convert_series(&inventory.series)?;
        }

        let correlation = correlate(&inventory.labels, &inventory.series, config.strategy);
        report.unmatched_labels = correlation
            .unmatched
            .iter()
            .map(|label| label.path.clone())
            .collect();

        for (label, outcome) in self.build_masks(&correlation.matches) {
            match outcome {
                Ok(path) => report.masks_written.push(path),
                Err(reason) => {
                    warn!("Failed to build mask for label: {} ({reason})", label.display());
                    report.failures.push(MaskFailure {
                        label_path: label,
                        reason,
                    });
                }
            }
        }

        if config.restructure {
            report.files_moved = restructure_outputs(&config.root, &config.dest_token)?;
        }

        debug!("{}", report.summary());
        Ok(report)
    }

    fn take_inventory(
        &self,
        series_dirs: &[SeriesDir],
        filter: Option<&SeriesFilter>,
    ) -> Result<Inventory, ConvertError> {
        let config = &self.config;
        let progress = progress_bar(series_dirs.len(), config.progress, "Reading headers");
        let mut inventory = Inventory::default();

        for series_dir in series_dirs {
            progress.inc(1);
            let first = &series_dir.files[0];
            let dicom_object = read_header(first)?;

            let attributes = PatientAttributes::from_dicom(&dicom_object);
            let headers = header_dict(&dicom_object);
            inventory.header_keys.extend_from(&headers);
            if config.save_json {
                inventory.headers.push(headers);
            }

            let modality = attributes.modality.clone();
            let keep = filter.is_none_or(|f| {
                f.keeps(attributes.patient_id.as_deref(), modality.as_deref())
            });
            inventory.attributes.push(attributes);

            if !keep {
                inventory.filtered += 1;
                info!("Filtered out {}", series_dir.dir.display());
                if config.delete_filtered {
                    delete_series(series_dir)?;
                }
                continue;
            }

            if modality.as_deref() == Some(RTSTRUCT) {
                for file in &series_dir.files {
                    inventory.labels.push(LabelRecord::from_file(file)?);
                }
            } else {
                inventory
                    .series
                    .push(SeriesRecord::from_dicom(series_dir, &dicom_object)?);
            }
        }

        progress.finish_and_clear();
        debug!(
            "{} image series, {} labels",
            inventory.series.len(),
            inventory.labels.len()
        );
        Ok(inventory)
    }

    /// Each matched pair yields the label path and the written mask or a
    /// failure reason. A label whose output path is already claimed by an
    /// earlier label is not built and fails. Built masks follow `matches`
    /// order in both modes, followed by the skipped labels.
    fn build_masks(&self, matches: &[Match<'_>]) -> Vec<(PathBuf, Result<PathBuf, String>)> {
        let builder = MaskBuilder {
            rasterizer: &self.rasterizer,
            root: &self.config.root,
            source_token: &self.config.source_token,
            dest_token: &self.config.dest_token,
            sort_by: self.config.sort_by,
        };
        let mut claimed = HashSet::new();
        let (unique, shadowed): (Vec<&Match<'_>>, Vec<&Match<'_>>) = matches
            .iter()
            .partition(|m| claimed.insert(builder.output_path(m.label)));
        let progress = progress_bar(unique.len(), self.config.progress, "Building masks");

        let build = |m: &&Match<'_>| {
            let outcome = builder
                .build(m.label, m.series)
                .map_err(|e| e.to_string());
            progress.inc(1);
            (m.label.path.clone(), outcome)
        };
        let mut outcomes: Vec<_> = if self.config.parallel {
            unique.par_iter().map(build).collect()
        } else {
            unique.iter().map(build).collect()
        };
        progress.finish_and_clear();

        outcomes.extend(shadowed.into_iter().map(|m| {
            let reason = format!(
                "Output path {} is already taken by another label",
                builder.output_path(m.label).display()
            );
            (m.label.path.clone(), Err(reason))
        }));
        outcomes
    }

    /// Write every multi-file image series as `{PatientID}_{Modality}_{StudyDate}.nii.gz`
    /// in the mirrored destination directory. PET is scaled to SUV when possible.
    fn convert_series(&self, series: &[SeriesRecord]) -> Result<Vec<PathBuf>, ConvertError> {
        let config = &self.config;
        let progress = progress_bar(series.len(), config.progress, "Converting series");
        let mut written = Vec::new();

        for record in series {
            progress.inc(1);
            if record.files.len() < 2 {
                continue;
            }
            let series_error = |reason: String| ConvertError::Series {
                dir: record.dir.clone(),
                reason,
            };

            let mut volume = VolumeLoader::load_from_file_paths(&record.files, config.sort_by)
                .map_err(|e: VolumeLoaderError| series_error(e.to_string()))?;

            if record.modality.as_deref() == Some("PT") {
                let header = read_header(&record.files[0])?;
                match bqml_to_suv(&header) {
                    Some(factor) => volume.data.mapv_inplace(|v| v * factor as f32),
                    None => warn!(
                        "No SUV information in {}, writing raw values",
                        record.dir.display()
                    ),
                }
            }

            let out_dir = mirror_dir(
                &record.dir,
                &config.root,
                &config.source_token,
                &config.dest_token,
            );
            fs::create_dir_all(&out_dir)?;
            let stem = output_stem(
                record.patient_id.as_deref(),
                record.modality.as_deref(),
                record.study_date.as_deref(),
            );
            let path = out_dir.join(format!("{stem}.{NIFTI_GZ_EXTENSION}"));
            volume
                .write_nifti(&path)
                .map_err(|e| series_error(e.to_string()))?;
            written.push(path);
        }

        progress.finish_and_clear();
        Ok(written)
    }
}

fn read_header(path: &Path) -> Result<InMemDicomObject, ConvertError> {
    OpenFileOptions::new()
        .read_until(tags::PIXEL_DATA)
        .open_file(path)
        .map(|file| file.into_inner())
        .map_err(|source| ConvertError::ReadHeader {
            path: path.to_path_buf(),
            source,
        })
}

fn delete_series(series_dir: &SeriesDir) -> io::Result<()> {
    for file in &series_dir.files {
        fs::remove_file(file)?;
    }
    if let Err(e) = fs::remove_dir(&series_dir.dir) {
        warn!("Kept {}: {e}", series_dir.dir.display());
    }
    Ok(())
}

/// Move every file below a directory containing `dest_token` to the path
/// prefix in front of the token. Only the part of the path below `root` is
/// searched for the token. Returns the number of files moved.
pub fn restructure_outputs(root: &Path, dest_token: &str) -> io::Result<usize> {
    let mut moves = Vec::new();
    for entry in WalkDir::new(root).sort_by_file_name() {
        let entry = entry.map_err(io::Error::from)?;
        if !entry.file_type().is_file() {
            continue;
        }
        let Some(parent) = entry.path().parent() else {
            continue;
        };
        let Some(relative) = relative_to_root(parent, root) else {
            continue;
        };
        let relative = relative.to_string_lossy();
        let Some((prefix, _)) = relative.split_once(dest_token) else {
            continue;
        };
        let target = root.join(prefix).join(entry.file_name());
        moves.push((entry.path().to_path_buf(), target));
    }

    for (from, to) in &moves {
        fs::rename(from, to)?;
        debug!("Moved {} -> {}", from.display(), to.display());
    }
    Ok(moves.len())
}

fn progress_bar(len: usize, visible: bool, message: &'static str) -> ProgressBar {
    if !visible {
        return ProgressBar::hidden();
    }
    let progress = ProgressBar::new(len as u64);
    progress.set_style(
        ProgressStyle::with_template(
            "{spinner:.green} {msg} [{bar:40.cyan/blue}] {pos}/{len} ({percent}%)",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("#>-"),
    );
    progress.set_message(message);
    progress
}
