//! ROI contours to voxel masks.
//!
//! Masks come out in rasterizer-native order (rows, columns, slices); the
//! mask builder moves them into the image order of the reference volume.

use image::{GrayImage, Luma};
use imageproc::{drawing::draw_polygon_mut, point::Point};
use ndarray::{Array3, s};
use thiserror::Error;

use crate::{rtstruct::Roi, volume::Volume};

#[derive(Debug, Error, PartialEq)]
pub enum RasterizeError {
    #[error("Reference volume is empty")]
    EmptyReference,

    #[error("Contour of ROI '{roi}' lies on slice {slice}, outside 0..{depth}")]
    ContourOutsideVolume { roi: String, slice: i64, depth: usize },
}

pub trait RoiRasterizer: Sync {
    /// Boolean occupancy of `roi` on the voxel grid of `reference`, shaped
    /// (rows, columns, slices).
    fn rasterize(&self, roi: &Roi, reference: &Volume<f32>) -> Result<Array3<bool>, RasterizeError>;
}

/// Fills each planar contour on the slice nearest to it.
#[derive(Clone, Copy, Debug, Default)]
pub struct PolygonRasterizer;

impl RoiRasterizer for PolygonRasterizer {
    fn rasterize(&self, roi: &Roi, reference: &Volume<f32>) -> Result<Array3<bool>, RasterizeError> {
        let (depth, rows, columns) = reference.dim();
        if depth == 0 || rows == 0 || columns == 0 {
            return Err(RasterizeError::EmptyReference);
        }
        let mut mask = Array3::<bool>::from_elem((rows, columns, depth), false);

        for contour in &roi.contours {
            let indices: Vec<[f64; 3]> = contour
                .iter()
                .map(|&p| reference.geometry.point_to_index(p))
                .collect();
            let mean_z = indices.iter().map(|i| i[2]).sum::<f64>() / indices.len() as f64;
            let slice = mean_z.round() as i64;
            if slice < 0 || slice >= depth as i64 {
                return Err(RasterizeError::ContourOutsideVolume {
                    roi: roi.name.clone(),
                    slice,
                    depth,
                });
            }

            let points: Vec<Point<i32>> = indices
                .iter()
                .map(|i| Point::new(i[0].round() as i32, i[1].round() as i32))
                .collect();
            let filled = fill_polygon(&points, columns as u32, rows as u32);

            let mut plane = mask.slice_mut(s![.., .., slice as usize]);
            for (x, y, pixel) in filled.enumerate_pixels() {
                if pixel[0] > 0 {
                    plane[[y as usize, x as usize]] = true;
                }
            }
        }
        Ok(mask)
    }
}

/// Filled polygon on a `width` x `height` canvas. Degenerate contours with
/// fewer than three distinct vertices mark their vertices only.
fn fill_polygon(points: &[Point<i32>], width: u32, height: u32) -> GrayImage {
    let mut canvas = GrayImage::new(width, height);

    let mut vertices: Vec<Point<i32>> = Vec::with_capacity(points.len());
    for &point in points {
        if vertices.last() != Some(&point) {
            vertices.push(point);
        }
    }
    while vertices.len() > 1 && vertices.first() == vertices.last() {
        vertices.pop();
    }

    if vertices.len() >= 3 {
        draw_polygon_mut(&mut canvas, &vertices, Luma([1u8]));
    } else {
        for p in vertices {
            if p.x >= 0 && p.y >= 0 && (p.x as u32) < width && (p.y as u32) < height {
                canvas.put_pixel(p.x as u32, p.y as u32, Luma([1u8]));
            }
        }
    }
    canvas
}
