use std::{
    fs,
    path::{Path, PathBuf},
};

use dicom::{
    core::{DataElement, PrimitiveValue, VR, value::DataSetSequence},
    dictionary_std::{tags, uids},
    object::{FileMetaTableBuilder, InMemDicomObject},
};
use dicom_rtmask::{config::ConverterConfig, converter::Converter, enums::SortBy};
use ndarray::Ix3;
use nifti::{IntoNdArray, NiftiObject, ReaderOptions};
use walkdir::WalkDir;

const ROWS: u16 = 4;
const COLUMNS: u16 = 4;
const SLICES: usize = 3;

fn element(tag: dicom::core::Tag, vr: VR, value: impl Into<PrimitiveValue>) -> DataElement<InMemDicomObject> {
    DataElement::new(tag, vr, value.into())
}

fn sequence(tag: dicom::core::Tag, items: Vec<InMemDicomObject>) -> DataElement<InMemDicomObject> {
    DataElement::new(tag, VR::SQ, DataSetSequence::from(items))
}

fn write_dicom(path: &Path, object: InMemDicomObject, sop_class: &str, instance: &str) {
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    let file = object
        .with_meta(
            FileMetaTableBuilder::new()
                .transfer_syntax(uids::EXPLICIT_VR_LITTLE_ENDIAN)
                .media_storage_sop_class_uid(sop_class)
                .media_storage_sop_instance_uid(instance),
        )
        .unwrap();
    file.write_to_file(path).unwrap();
}

/// Axial CT series of `SLICES` 4x4 slices, 1 mm apart, starting at z = 0.
fn write_ct_series(dir: &Path, series_uid: &str) {
    write_series(dir, series_uid, "CT", Vec::new(), |slice| slice + 1);
}

/// Axial series of `SLICES` 4x4 slices, 1 mm apart, starting at z = 0. Slice
/// `n` holds `row * 4 + column + 100 * n` and carries `instance_number(n)`.
fn write_series(
    dir: &Path,
    series_uid: &str,
    modality: &str,
    extra: Vec<DataElement<InMemDicomObject>>,
    instance_number: impl Fn(usize) -> usize,
) {
    let sop_class = match modality {
        "PT" => uids::POSITRON_EMISSION_TOMOGRAPHY_IMAGE_STORAGE,
        _ => uids::CT_IMAGE_STORAGE,
    };
    for slice in 0..SLICES {
        let pixels: Vec<u16> = (0..ROWS * COLUMNS).map(|v| v + slice as u16 * 100).collect();
        let mut object = InMemDicomObject::from_element_iter([
            element(tags::PATIENT_ID, VR::LO, "AB98"),
            element(tags::STUDY_DATE, VR::DA, "20181206"),
            element(tags::MODALITY, VR::CS, modality),
            element(tags::SERIES_INSTANCE_UID, VR::UI, series_uid),
            element(tags::INSTANCE_NUMBER, VR::IS, instance_number(slice).to_string()),
            element(
                tags::IMAGE_POSITION_PATIENT,
                VR::DS,
                PrimitiveValue::Strs(
                    ["0".to_string(), "0".to_string(), slice.to_string()]
                        .into_iter()
                        .collect(),
                ),
            ),
            element(
                tags::IMAGE_ORIENTATION_PATIENT,
                VR::DS,
                PrimitiveValue::Strs(["1", "0", "0", "0", "1", "0"].map(String::from).into_iter().collect()),
            ),
            element(
                tags::PIXEL_SPACING,
                VR::DS,
                PrimitiveValue::Strs(["1", "1"].map(String::from).into_iter().collect()),
            ),
            element(tags::SAMPLES_PER_PIXEL, VR::US, 1_u16),
            element(tags::PHOTOMETRIC_INTERPRETATION, VR::CS, "MONOCHROME2"),
            element(tags::ROWS, VR::US, ROWS),
            element(tags::COLUMNS, VR::US, COLUMNS),
            element(tags::BITS_ALLOCATED, VR::US, 16_u16),
            element(tags::BITS_STORED, VR::US, 16_u16),
            element(tags::HIGH_BIT, VR::US, 15_u16),
            element(tags::PIXEL_REPRESENTATION, VR::US, 0_u16),
            element(
                tags::PIXEL_DATA,
                VR::OW,
                PrimitiveValue::U16(pixels.into_iter().collect()),
            ),
        ]);
        for extra in &extra {
            object.put(extra.clone());
        }
        let instance = format!("{series_uid}.{slice}");
        write_dicom(&dir.join(format!("{}.dcm", slice + 1)), object, sop_class, &instance);
    }
}

/// Structure set with one square ROI on the middle slice of `series_uid`.
fn write_structure_set(path: &Path, series_uid: &str) {
    write_structure_set_at(path, series_uid, 1.0);
}

/// Structure set with one 3x3 voxel square ROI in the plane `z`.
fn write_structure_set_at(path: &Path, series_uid: &str, z: f64) {
    let series = InMemDicomObject::from_element_iter([element(
        tags::SERIES_INSTANCE_UID,
        VR::UI,
        series_uid,
    )]);
    let study = InMemDicomObject::from_element_iter([sequence(
        tags::RT_REFERENCED_SERIES_SEQUENCE,
        vec![series],
    )]);
    let frame = InMemDicomObject::from_element_iter([sequence(
        tags::RT_REFERENCED_STUDY_SEQUENCE,
        vec![study],
    )]);
    let roi = InMemDicomObject::from_element_iter([
        element(tags::ROI_NUMBER, VR::IS, "1"),
        element(tags::ROI_NAME, VR::LO, "GTV"),
    ]);
    let points = [0.0, 0.0, z, 2.0, 0.0, z, 2.0, 2.0, z, 0.0, 2.0, z];
    let contour = InMemDicomObject::from_element_iter([element(
        tags::CONTOUR_DATA,
        VR::DS,
        PrimitiveValue::Strs(points.iter().map(|p: &f64| p.to_string()).collect()),
    )]);
    let roi_contour = InMemDicomObject::from_element_iter([
        element(tags::REFERENCED_ROI_NUMBER, VR::IS, "1"),
        sequence(tags::CONTOUR_SEQUENCE, vec![contour]),
    ]);

    let object = InMemDicomObject::from_element_iter([
        element(tags::PATIENT_ID, VR::LO, "AB98"),
        element(tags::STUDY_DATE, VR::DA, "20181206"),
        element(tags::MODALITY, VR::CS, "RTSTRUCT"),
        element(tags::SERIES_INSTANCE_UID, VR::UI, "RS"),
        sequence(tags::REFERENCED_FRAME_OF_REFERENCE_SEQUENCE, vec![frame]),
        sequence(tags::STRUCTURE_SET_ROI_SEQUENCE, vec![roi]),
        sequence(tags::ROI_CONTOUR_SEQUENCE, vec![roi_contour]),
    ]);
    write_dicom(path, object, uids::RT_STRUCTURE_SET_STORAGE, "RS.1");
}

/// `root/DICOM/AB98/{CT_A, CT_B, RTSTRUCT}` with the structure set on series "A".
fn write_tree(root: &Path) {
    let patient = root.join("DICOM").join("AB98");
    write_ct_series(&patient.join("CT_A"), "A");
    write_ct_series(&patient.join("CT_B"), "B");
    write_structure_set(&patient.join("RTSTRUCT").join("rs.dcm"), "A");
}

fn config(root: &Path) -> ConverterConfig {
    ConverterConfig {
        root: root.to_path_buf(),
        restructure: false,
        progress: false,
        ..ConverterConfig::default()
    }
}

fn read_nifti(path: &Path) -> ndarray::Array3<f32> {
    ReaderOptions::new()
        .read_file(path)
        .unwrap()
        .into_volume()
        .into_ndarray::<f32>()
        .unwrap()
        .into_dimensionality::<Ix3>()
        .unwrap()
}

fn nifti_files(root: &Path) -> Vec<PathBuf> {
    WalkDir::new(root)
        .into_iter()
        .filter_map(Result::ok)
        .map(|entry| entry.into_path())
        .filter(|path| path.to_string_lossy().ends_with(".nii.gz"))
        .collect()
}

#[test]
fn one_label_produces_one_mask_on_the_referenced_grid() {
    let root = tempfile::tempdir().unwrap();
    write_tree(root.path());

    let report = Converter::new(config(root.path())).run().unwrap();

    assert_eq!(report.series_scanned, 3);
    assert!(report.failures.is_empty(), "{:?}", report.failures);
    assert!(report.unmatched_labels.is_empty());

    let expected = root
        .path()
        .join("NIFTI")
        .join("AB98")
        .join("RTSTRUCT")
        .join("AB98_RTSTRUCT_20181206.nii.gz");
    assert_eq!(report.masks_written, vec![expected.clone()]);
    assert_eq!(nifti_files(root.path()), vec![expected.clone()]);

    let mask = read_nifti(&expected);
    assert_eq!(mask.shape(), &[COLUMNS as usize, ROWS as usize, SLICES]);
    assert_eq!(mask.sum(), 9.0);
    assert_eq!(mask[[1, 1, 1]], 1.0);
    assert_eq!(mask[[1, 1, 0]], 0.0);
    assert_eq!(mask[[3, 3, 1]], 0.0);
}

#[test]
fn attribute_table_has_one_row_per_series() {
    let root = tempfile::tempdir().unwrap();
    write_tree(root.path());
    let config = ConverterConfig {
        save_json: true,
        ..config(root.path())
    };

    let report = Converter::new(config).run().unwrap();

    let table = fs::read_to_string(root.path().join("attributes.csv")).unwrap();
    let lines: Vec<&str> = table.lines().collect();
    assert_eq!(lines.len(), 4);
    assert!(lines[0].starts_with("Patient ID,"));
    assert!(lines[1].starts_with("AB98,"));

    let headers: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(root.path().join("headers.json")).unwrap())
            .unwrap();
    assert_eq!(headers.as_array().map(Vec::len), Some(3));
    assert!(report.header_keys.contains(&"00100020".to_string()));
}

#[test]
fn restructure_moves_mask_next_to_the_source_tree() {
    let root = tempfile::tempdir().unwrap();
    write_tree(root.path());
    let config = ConverterConfig {
        restructure: true,
        ..config(root.path())
    };

    let report = Converter::new(config).run().unwrap();

    assert_eq!(report.files_moved, 1);
    assert_eq!(
        nifti_files(root.path()),
        vec![root.path().join("AB98_RTSTRUCT_20181206.nii.gz")]
    );
}

#[test]
fn query_filter_drops_unlisted_modalities() {
    let root = tempfile::tempdir().unwrap();
    write_tree(root.path());
    let query = root.path().join("query.csv");
    fs::write(&query, "PatientId,Modality\nAB98,PT\n").unwrap();
    let config = ConverterConfig {
        query_csv: Some(query),
        delete_filtered: true,
        ..config(root.path())
    };

    let report = Converter::new(config).run().unwrap();

    assert_eq!(report.series_filtered, 2);
    assert!(report.masks_written.is_empty());
    assert_eq!(report.unmatched_labels.len(), 1);
    assert!(!root.path().join("DICOM").join("AB98").join("CT_A").exists());
    assert!(root.path().join("DICOM").join("AB98").join("RTSTRUCT").exists());
}

#[test]
fn series_conversion_writes_volumes_next_to_masks() {
    let root = tempfile::tempdir().unwrap();
    write_tree(root.path());
    let config = ConverterConfig {
        convert_series: true,
        ..config(root.path())
    };

    let report = Converter::new(config).run().unwrap();

    assert_eq!(report.series_converted.len(), 2);
    let volume = read_nifti(&report.series_converted[0]);
    assert_eq!(volume.shape(), &[4, 4, 3]);
    // pixel value = row * 4 + column + 100 * slice
    assert_eq!(volume[[1, 2, 2]], 209.0);
}

#[test]
fn parallel_run_matches_sequential_run() {
    let sequential_root = tempfile::tempdir().unwrap();
    let parallel_root = tempfile::tempdir().unwrap();
    for root in [sequential_root.path(), parallel_root.path()] {
        write_tree(root);
        let patient = root.join("DICOM").join("AB98");
        write_structure_set(&patient.join("RTSTRUCT_B").join("rs.dcm"), "B");
    }

    let sequential = Converter::new(config(sequential_root.path())).run().unwrap();
    let parallel = Converter::new(ConverterConfig {
        parallel: true,
        ..config(parallel_root.path())
    })
    .run()
    .unwrap();

    assert!(sequential.failures.is_empty(), "{:?}", sequential.failures);
    assert!(parallel.failures.is_empty(), "{:?}", parallel.failures);
    assert_eq!(sequential.unmatched_labels, parallel.unmatched_labels);
    assert_eq!(sequential.masks_written.len(), 2);

    let relative = |paths: &[PathBuf], root: &Path| -> Vec<PathBuf> {
        paths
            .iter()
            .map(|p| p.strip_prefix(root).unwrap().to_path_buf())
            .collect()
    };
    assert_eq!(
        relative(&sequential.masks_written, sequential_root.path()),
        relative(&parallel.masks_written, parallel_root.path())
    );
    for (a, b) in sequential.masks_written.iter().zip(&parallel.masks_written) {
        assert_eq!(read_nifti(a), read_nifti(b));
    }
}

#[test]
fn pet_series_is_scaled_to_suv() {
    let root = tempfile::tempdir().unwrap();
    let radiopharmaceutical = InMemDicomObject::from_element_iter([
        element(tags::RADIONUCLIDE_TOTAL_DOSE, VR::DS, "700000"),
        element(tags::RADIONUCLIDE_HALF_LIFE, VR::DS, "6586.2"),
        element(tags::RADIOPHARMACEUTICAL_START_TIME, VR::TM, "100000"),
    ]);
    // scanned at injection time: factor = 70 kg * 1000 / 700000 Bq = 0.1
    let suv_elements = vec![
        element(tags::PATIENT_WEIGHT, VR::DS, "70"),
        element(tags::SERIES_TIME, VR::TM, "100000"),
        sequence(
            tags::RADIOPHARMACEUTICAL_INFORMATION_SEQUENCE,
            vec![radiopharmaceutical],
        ),
    ];
    let pet_dir = root.path().join("DICOM").join("AB98").join("PT");
    write_series(&pet_dir, "P", "PT", suv_elements, |slice| slice + 1);
    let config = ConverterConfig {
        convert_series: true,
        ..config(root.path())
    };

    let report = Converter::new(config).run().unwrap();

    let expected = root
        .path()
        .join("NIFTI")
        .join("AB98")
        .join("PT")
        .join("AB98_PT_20181206.nii.gz");
    assert_eq!(report.series_converted, vec![expected.clone()]);
    let volume = read_nifti(&expected);
    assert!((volume[[1, 2, 2]] - 20.9).abs() < 1e-4);
    assert!((volume[[0, 0, 0]] - 0.0).abs() < 1e-6);
}

#[test]
fn instance_number_order_keeps_contours_on_their_slice() {
    let root = tempfile::tempdir().unwrap();
    let patient = root.path().join("DICOM").join("AB98");
    // instance numbers run against the z order
    write_series(&patient.join("CT"), "A", "CT", Vec::new(), |slice| SLICES - slice);
    write_structure_set_at(&patient.join("RTSTRUCT").join("rs.dcm"), "A", 0.0);
    let config = ConverterConfig {
        sort_by: SortBy::InstanceNumber,
        ..config(root.path())
    };

    let report = Converter::new(config).run().unwrap();

    assert!(report.failures.is_empty(), "{:?}", report.failures);
    let mask = read_nifti(&report.masks_written[0]);
    assert_eq!(mask.sum(), 9.0);
    // z = 0 is the last slice of the stack
    assert_eq!(mask[[1, 1, SLICES - 1]], 1.0);
    assert_eq!(mask[[1, 1, 0]], 0.0);
}

#[test]
fn second_label_on_the_same_output_path_is_not_written() {
    for parallel in [false, true] {
        let root = tempfile::tempdir().unwrap();
        write_tree(root.path());
        let rtstruct = root.path().join("DICOM").join("AB98").join("RTSTRUCT");
        write_structure_set(&rtstruct.join("rs2.dcm"), "A");
        let config = ConverterConfig {
            parallel,
            ..config(root.path())
        };
        let report = Converter::new(config).run().unwrap();

        assert_eq!(report.masks_written.len(), 1);
        assert_eq!(nifti_files(root.path()), report.masks_written);
        assert_eq!(report.failures.len(), 1);
        assert!(report.failures[0].label_path.ends_with("rs2.dcm"));
        assert!(report.failures[0].reason.contains("already taken"));
    }
}
