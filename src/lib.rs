//! # DICOM-rtmask library
//!
//! This crate converts a tree of DICOM series and RTSTRUCT annotations into
//! NIfTI volumes and binary segmentation masks.
//!
//! It is built on the dicom-rs ecosystem. A conversion run walks the root
//! folder, reads one representative header per series directory, exports
//! the patient attributes as CSV (and optionally the raw headers as JSON),
//! pairs each RTSTRUCT with the image series it references and writes one
//! mask per pair next to a mirrored copy of the source tree:
//!  - `DICOM/<patient>/<series>/...` becomes `NIFTI/<patient>/<series>/`
//!  - the mask file is named `{PatientID}_{Modality}_{StudyDate}.nii.gz`
//!  - masks share the voxel grid and affine of the referenced series
//!
//! Slices are decoded in parallel using rayon. Mask building can run in
//! parallel as well. DICOM files are assumed to have the following
//! attributes:
//!   - One series per directory
//!   - No multiframe (always the first frame is used)
//!   - Planar contours (every contour lies on a single slice)
//!
//! Maximum intensity projections of the resulting volumes can be rendered
//! with the [`mip`] module.
//!
//! # Examples
//!
//! ## Converting a DICOM tree
//!
//! ```no_run
//! # use dicom_rtmask::{config::ConverterConfig, converter::Converter};
//! # use std::path::PathBuf;
//! let config = ConverterConfig {
//!     root: PathBuf::from("data/DICOM"),
//!     save_json: true,
//!     ..ConverterConfig::default()
//! };
//! let report = Converter::new(config)
//!     .run()
//!     .expect("should have converted the tree");
//! println!("{}", report.summary());
//! ```
//!
//! ## Rendering a MIP
//!
//! ```no_run
//! # use dicom_rtmask::mip::{load_nifti_volume, render_mips, MipOptions};
//! let pet = load_nifti_volume("AB98_PT_20181206.nii.gz").expect("should have read PET");
//! let image = render_mips(pet.view(), None, &MipOptions::default())
//!     .expect("should have rendered projections");
//! image.save("mip.png").expect("should have saved image");
//! ```

pub mod attributes;
pub mod config;
pub mod converter;
pub mod correlator;
pub mod enums;
pub mod filter;
pub mod headers;
pub mod mask;
pub mod mip;
pub mod rasterize;
pub mod rtstruct;
pub mod sanitize;
pub mod scanner;
pub mod suv;
pub mod volume;
pub mod volume_loader;
