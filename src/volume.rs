use std::path::Path;

use ndarray::Array3;
use bytemuck::Pod;
use nifti::{DataElement, NiftiHeader, writer::WriterOptions};

/// NIfTI `xyzt_units` code for millimetres.
const UNITS_MM: u8 = 2;
/// NIfTI `qform_code`/`sform_code` for scanner-anatomical coordinates.
const XFORM_SCANNER_ANAT: i16 = 1;

/// Spatial placement of a volume in DICOM patient coordinates (LPS, mm).
#[derive(Clone, Debug, PartialEq)]
pub struct Geometry {
    /// Position of the first voxel centre.
    pub origin: [f64; 3],
    /// Voxel size along (x, y, z), i.e. (column, row, slice).
    pub spacing: [f64; 3],
    /// Direction cosines; column `c` is the unit vector of axis `c`.
    pub direction: [[f64; 3]; 3],
}

impl Default for Geometry {
    fn default() -> Self {
        Self {
            origin: [0.0; 3],
            spacing: [1.0; 3],
            direction: [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]],
        }
    }
}

impl Geometry {
    /// Unit vector of volume axis `axis` (0 = x/columns, 1 = y/rows, 2 = z/slices).
    pub fn axis_direction(&self, axis: usize) -> [f64; 3] {
        [
            self.direction[0][axis],
            self.direction[1][axis],
            self.direction[2][axis],
        ]
    }

    /// Continuous voxel index (x, y, z) of a patient-space point.
    pub fn point_to_index(&self, point: [f64; 3]) -> [f64; 3] {
        let offset = [
            point[0] - self.origin[0],
            point[1] - self.origin[1],
            point[2] - self.origin[2],
        ];
        let mut index = [0.0; 3];
        for (axis, value) in index.iter_mut().enumerate() {
            let dir = self.axis_direction(axis);
            let projected = offset[0] * dir[0] + offset[1] * dir[1] + offset[2] * dir[2];
            *value = projected / self.spacing[axis];
        }
        index
    }

    /// 4x4 voxel-to-world affine in NIfTI (RAS) world coordinates.
    pub fn ras_affine(&self) -> [[f64; 4]; 4] {
        let mut affine = [[0.0; 4]; 4];
        for row in 0..3 {
            // LPS -> RAS flips the first two world axes
            let sign = if row < 2 { -1.0 } else { 1.0 };
            for col in 0..3 {
                affine[row][col] = sign * self.direction[row][col] * self.spacing[col];
            }
            affine[row][3] = sign * self.origin[row];
        }
        affine[3][3] = 1.0;
        affine
    }

    /// Header carrying this geometry in both the sform and the qform.
    pub fn to_nifti_header(&self) -> NiftiHeader {
        let affine = self.ras_affine();
        let srow = |row: usize| {
            [
                affine[row][0] as f32,
                affine[row][1] as f32,
                affine[row][2] as f32,
                affine[row][3] as f32,
            ]
        };

        let mut rotation = [[0.0; 3]; 3];
        for row in 0..3 {
            let sign = if row < 2 { -1.0 } else { 1.0 };
            for col in 0..3 {
                rotation[row][col] = sign * self.direction[row][col];
            }
        }
        let (qfac, [_, b, c, d]) = rotation_to_quaternion(rotation);

        NiftiHeader {
            pixdim: [
                qfac as f32,
                self.spacing[0] as f32,
                self.spacing[1] as f32,
                self.spacing[2] as f32,
                1.0,
                1.0,
                1.0,
                1.0,
            ],
            xyzt_units: UNITS_MM,
            qform_code: XFORM_SCANNER_ANAT,
            sform_code: XFORM_SCANNER_ANAT,
            quatern_b: b as f32,
            quatern_c: c as f32,
            quatern_d: d as f32,
            quatern_x: affine[0][3] as f32,
            quatern_y: affine[1][3] as f32,
            quatern_z: affine[2][3] as f32,
            srow_x: srow(0),
            srow_y: srow(1),
            srow_z: srow(2),
            ..NiftiHeader::default()
        }
    }
}

/// Quaternion (a, b, c, d) and qfac of a direction matrix, following the
/// NIfTI-1 `mat44_to_quatern` convention.
fn rotation_to_quaternion(mut r: [[f64; 3]; 3]) -> (f64, [f64; 4]) {
    let det = r[0][0] * (r[1][1] * r[2][2] - r[1][2] * r[2][1])
        - r[0][1] * (r[1][0] * r[2][2] - r[1][2] * r[2][0])
        + r[0][2] * (r[1][0] * r[2][1] - r[1][1] * r[2][0]);
    let qfac = if det < 0.0 {
        for row in r.iter_mut() {
            row[2] = -row[2];
        }
        -1.0
    } else {
        1.0
    };

    let trace = r[0][0] + r[1][1] + r[2][2] + 1.0;
    let (mut a, mut b, mut c, mut d);
    if trace > 0.5 {
        a = 0.5 * trace.sqrt();
        b = 0.25 * (r[2][1] - r[1][2]) / a;
        c = 0.25 * (r[0][2] - r[2][0]) / a;
        d = 0.25 * (r[1][0] - r[0][1]) / a;
    } else {
        let xd = 1.0 + r[0][0] - (r[1][1] + r[2][2]);
        let yd = 1.0 + r[1][1] - (r[0][0] + r[2][2]);
        let zd = 1.0 + r[2][2] - (r[0][0] + r[1][1]);
        if xd > 1.0 {
            b = 0.5 * xd.sqrt();
            c = 0.25 * (r[0][1] + r[1][0]) / b;
            d = 0.25 * (r[0][2] + r[2][0]) / b;
            a = 0.25 * (r[2][1] - r[1][2]) / b;
        } else if yd > 1.0 {
            c = 0.5 * yd.sqrt();
            b = 0.25 * (r[0][1] + r[1][0]) / c;
            d = 0.25 * (r[1][2] + r[2][1]) / c;
            a = 0.25 * (r[0][2] - r[2][0]) / c;
        } else {
            d = 0.5 * zd.sqrt();
            b = 0.25 * (r[0][2] + r[2][0]) / d;
            c = 0.25 * (r[1][2] + r[2][1]) / d;
            a = 0.25 * (r[1][0] - r[0][1]) / d;
        }
        if a < 0.0 {
            a = -a;
            b = -b;
            c = -c;
            d = -d;
        }
    }
    (qfac, [a, b, c, d])
}

/// A reconstructed image series or a mask aligned to one.
#[derive(Clone, Debug, Default)]
pub struct Volume<T> {
    /// Voxels in (depth, height, width) = (slices, rows, columns) order.
    pub data: Array3<T>,
    pub geometry: Geometry,
}

impl<T> Volume<T> {
    pub fn new(data: Array3<T>, geometry: Geometry) -> Self {
        Self { data, geometry }
    }

    /// Get the dimensions of the volume (depth, height, width)
    pub fn dim(&self) -> (usize, usize, usize) {
        self.data.dim()
    }

    /// Replace the voxel data, keeping the geometry of `reference`.
    pub fn with_geometry_of<U>(data: Array3<T>, reference: &Volume<U>) -> Self {
        Self::new(data, reference.geometry.clone())
    }
}

// NIfTI stores voxels indexed (x, y, z); the reversed view maps our
// (slice, row, column) order onto it without copying.
impl<T: DataElement + Pod> Volume<T> {
    pub fn write_nifti(&self, path: impl AsRef<Path>) -> nifti::Result<()> {
        WriterOptions::new(path.as_ref())
            .reference_header(&self.geometry.to_nifti_header())
            .write_nifti(&self.data.view().reversed_axes())
    }
}
