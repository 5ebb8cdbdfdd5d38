use std::{fmt, str::FromStr};

use thiserror::Error;

/// Projection plane of a volume stored as (x, y, z), the NIfTI axis order.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Orientation {
    Axial,
    Coronal,
    Sagittal,
}

impl Orientation {
    /// Axis collapsed by a projection onto this plane.
    pub fn axis(self) -> usize {
        match self {
            Orientation::Axial => 2,
            Orientation::Coronal => 1,
            Orientation::Sagittal => 0,
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("Plane must be 'axial', 'coronal', or 'sagittal', got '{0}'")]
pub struct InvalidPlane(pub String);

impl FromStr for Orientation {
    type Err = InvalidPlane;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "axial" => Ok(Orientation::Axial),
            "coronal" => Ok(Orientation::Coronal),
            "sagittal" => Ok(Orientation::Sagittal),
            _ => Err(InvalidPlane(s.to_string())),
        }
    }
}

impl fmt::Display for Orientation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Orientation::Axial => "Axial",
            Orientation::Coronal => "Coronal",
            Orientation::Sagittal => "Sagittal",
        };
        f.write_str(name)
    }
}

/// How slices of a series are ordered before stacking.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum SortBy {
    /// Ascending projection of ImagePositionPatient onto the slice normal.
    #[default]
    ImagePositionPatient,
    InstanceNumber,
    None,
}

/// How RTSTRUCT labels are paired with image series.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum MatchStrategy {
    /// Direct lookup of the referenced Series Instance UID
    #[default]
    ByUid,
    /// Sort both lists by UID and search forward from the same position
    SortedForwardSearch,
}
