// src/orientation.rs

use crate::types::Frame;
use anyhow::Result;
use opencv::{
    core::{self, Mat},
    imgproc,
    prelude::*,
};
use serde::Serialize;
use tracing::debug;

/// Half-size of the square voting window centered on each box.
const WINDOW_RADIUS: i32 = 10;
/// Gradient magnitudes at or below this are treated as noise and skipped.
const MAGNITUDE_THRESHOLD: f32 = 100.0;
const CANNY_LOW: f64 = 100.0;
const CANNY_HIGH: f64 = 200.0;

/// One dominant edge orientation per detected box, in detection order.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct OrientationRecord {
    pub x_center: i32,
    pub y_center: i32,
    pub angle_degrees: f32,
}

/// Signed Sobel derivatives of the Canny edge map, plus the per-pixel
/// gradient angle. Computed once per image and shared by every box.
pub struct GradientField {
    grad_x: Vec<i16>,
    grad_y: Vec<i16>,
    direction: Vec<f32>,
    width: usize,
    height: usize,
}

impl GradientField {
    /// Blur, edge-detect, and differentiate a full RGB frame.
    pub fn compute(frame: &Frame) -> Result<Self> {
        let mat = Mat::from_slice(&frame.data)?;
        let mat = mat.reshape(3, frame.height as i32)?;

        let mut blurred = Mat::default();
        imgproc::gaussian_blur(
            &mat,
            &mut blurred,
            core::Size::new(3, 3),
            0.0,
            0.0,
            core::BORDER_DEFAULT,
        )?;

        let mut edges = Mat::default();
        imgproc::canny(&blurred, &mut edges, CANNY_LOW, CANNY_HIGH, 3, false)?;

        let mut grad_x = Mat::default();
        let mut grad_y = Mat::default();
        imgproc::sobel(
            &edges,
            &mut grad_x,
            core::CV_16S,
            1,
            0,
            3,
            1.0,
            0.0,
            core::BORDER_DEFAULT,
        )?;
        imgproc::sobel(
            &edges,
            &mut grad_y,
            core::CV_16S,
            0,
            1,
            3,
            1.0,
            0.0,
            core::BORDER_DEFAULT,
        )?;

        Ok(Self::from_gradients(
            grad_x.data_typed::<i16>()?.to_vec(),
            grad_y.data_typed::<i16>()?.to_vec(),
            frame.width,
            frame.height,
        ))
    }

    /// Build a field directly from gradient grids (row-major, height x width).
    pub fn from_gradients(grad_x: Vec<i16>, grad_y: Vec<i16>, width: usize, height: usize) -> Self {
        let direction = grad_x
            .iter()
            .zip(&grad_y)
            .map(|(&gx, &gy)| (gy as f32).atan2(gx as f32))
            .collect();

        Self {
            grad_x,
            grad_y,
            direction,
            width,
            height,
        }
    }
}

/// Estimate one dominant gradient direction per box.
///
/// Each box votes over a 20x20 window around its center: every in-bounds
/// pixel whose gradient magnitude clears the noise threshold contributes
/// its gradient angle, and the most frequent angle wins. Output order
/// matches input order, one record per box.
pub fn dominant_orientations(field: &GradientField, boxes: &[[f32; 4]]) -> Vec<OrientationRecord> {
    let records: Vec<OrientationRecord> = boxes
        .iter()
        .map(|bbox| orientation_for_box(field, bbox))
        .collect();

    debug!("Estimated orientations for {} boxes", records.len());
    records
}

fn orientation_for_box(field: &GradientField, bbox: &[f32; 4]) -> OrientationRecord {
    let xc = ((bbox[0] + bbox[2]) / 2.0).floor() as i32;
    let yc = ((bbox[1] + bbox[3]) / 2.0).floor() as i32;

    // Votes are keyed by the exact angle value; two pixels only share a
    // bucket when their angles are bit-identical. Insertion order matters
    // for tie-breaking below.
    let mut votes: Vec<(f32, u32)> = Vec::new();

    for i in (xc - WINDOW_RADIUS)..(xc + WINDOW_RADIUS) {
        for j in (yc - WINDOW_RADIUS)..(yc + WINDOW_RADIUS) {
            if i < 0 || j < 0 || i >= field.width as i32 || j >= field.height as i32 {
                continue;
            }

            let idx = j as usize * field.width + i as usize;
            let gx = field.grad_x[idx] as f32;
            let gy = field.grad_y[idx] as f32;
            let magnitude = (gx * gx + gy * gy).sqrt();

            if magnitude > MAGNITUDE_THRESHOLD {
                let angle = field.direction[idx];
                match votes
                    .iter_mut()
                    .find(|(seen, _)| seen.to_bits() == angle.to_bits())
                {
                    Some(entry) => entry.1 += 1,
                    None => votes.push((angle, 1)),
                }
            }
        }
    }

    // Strict > keeps the earliest-inserted angle on ties; a window with no
    // qualifying pixels falls back to an angle of zero.
    let mut best_count = 0u32;
    let mut best_angle = 0.0f32;
    for &(angle, count) in &votes {
        if count > best_count {
            best_count = count;
            best_angle = angle;
        }
    }

    OrientationRecord {
        x_center: xc,
        y_center: yc,
        angle_degrees: best_angle * 180.0 / std::f32::consts::PI,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn zero_field(width: usize, height: usize) -> GradientField {
        GradientField::from_gradients(
            vec![0; width * height],
            vec![0; width * height],
            width,
            height,
        )
    }

    fn field_with(
        width: usize,
        height: usize,
        pixels: &[(usize, usize, i16, i16)],
    ) -> GradientField {
        let mut gx = vec![0i16; width * height];
        let mut gy = vec![0i16; width * height];
        for &(x, y, vx, vy) in pixels {
            gx[y * width + x] = vx;
            gy[y * width + x] = vy;
        }
        GradientField::from_gradients(gx, gy, width, height)
    }

    #[test]
    fn test_one_record_per_box() {
        let field = zero_field(100, 100);
        let boxes = [
            [10.0, 20.0, 30.0, 40.0],
            [0.0, 0.0, 50.0, 50.0],
            [5.0, 5.0, 6.0, 6.0],
        ];

        let records = dominant_orientations(&field, &boxes);
        assert_eq!(records.len(), 3);
        assert_eq!((records[0].x_center, records[0].y_center), (20, 30));
        assert_eq!((records[1].x_center, records[1].y_center), (25, 25));
        assert_eq!((records[2].x_center, records[2].y_center), (5, 5));
    }

    #[test]
    fn test_uniform_field_defaults_to_zero() {
        let field = zero_field(64, 64);
        let records = dominant_orientations(&field, &[[10.0, 10.0, 50.0, 50.0]]);
        assert_eq!(records[0].angle_degrees, 0.0);
    }

    #[test]
    fn test_below_threshold_gradients_do_not_vote() {
        // Magnitude sqrt(60^2 + 60^2) ~ 84.8 stays under the cutoff.
        let pixels: Vec<(usize, usize, i16, i16)> =
            (20..30).map(|x| (x, 25, 60, 60)).collect();
        let field = field_with(64, 64, &pixels);

        let records = dominant_orientations(&field, &[[15.0, 15.0, 35.0, 35.0]]);
        assert_eq!(records[0].angle_degrees, 0.0);
    }

    #[test]
    fn test_center_computation() {
        let field = zero_field(200, 200);
        let records = dominant_orientations(&field, &[[10.0, 20.0, 30.0, 40.0]]);
        assert_eq!(records[0].x_center, 20);
        assert_eq!(records[0].y_center, 30);
    }

    #[test]
    fn test_diagonal_edge_angle() {
        // A 45-degree gradient through the window center: atan2(150, 150).
        let pixels: Vec<(usize, usize, i16, i16)> =
            (16..24).map(|x| (x, 30, 150, 150)).collect();
        let field = field_with(100, 100, &pixels);

        let records = dominant_orientations(&field, &[[10.0, 20.0, 30.0, 40.0]]);
        assert!((records[0].angle_degrees - 45.0).abs() < 1e-3);
    }

    #[test]
    fn test_boundary_clipping_at_origin() {
        // Box centered at (0, 0): only the lower-right quadrant of the
        // window is inside the image.
        let mut pixels = Vec::new();
        for x in 0..10 {
            for y in 0..10 {
                pixels.push((x, y, 0, 200));
            }
        }
        let field = field_with(50, 50, &pixels);

        let records = dominant_orientations(&field, &[[0.0, 0.0, 0.0, 0.0]]);
        assert_eq!((records[0].x_center, records[0].y_center), (0, 0));
        assert!((records[0].angle_degrees - 90.0).abs() < 1e-3);
    }

    #[test]
    fn test_window_fully_outside_image() {
        let field = zero_field(32, 32);
        let records = dominant_orientations(&field, &[[-60.0, -60.0, -40.0, -40.0]]);
        assert_eq!((records[0].x_center, records[0].y_center), (-50, -50));
        assert_eq!(records[0].angle_degrees, 0.0);
    }

    #[test]
    fn test_tie_break_keeps_first_seen_angle() {
        // Two angles with equal counts; the 90-degree pixels sit at a lower
        // column index so they enter the histogram first and must win.
        let field = field_with(
            50,
            50,
            &[
                (16, 20, 0, 200),  // 90 degrees
                (16, 21, 0, 200),  // 90 degrees
                (17, 20, -200, 0), // 180 degrees
                (17, 21, -200, 0), // 180 degrees
            ],
        );

        let records = dominant_orientations(&field, &[[15.0, 15.0, 35.0, 35.0]]);
        assert!((records[0].angle_degrees - 90.0).abs() < 1e-3);
    }

    #[test]
    fn test_deterministic_across_runs() {
        let pixels: Vec<(usize, usize, i16, i16)> = (10..30)
            .flat_map(|x| [(x, 18, 120, -90), (x, 22, -80, 110)])
            .collect();
        let field = field_with(64, 64, &pixels);
        let boxes = [[10.0, 10.0, 30.0, 30.0], [12.0, 14.0, 28.0, 26.0]];

        let first = dominant_orientations(&field, &boxes);
        let second = dominant_orientations(&field, &boxes);

        assert_eq!(first.len(), second.len());
        for (a, b) in first.iter().zip(&second) {
            assert_eq!(a.x_center, b.x_center);
            assert_eq!(a.y_center, b.y_center);
            assert_eq!(a.angle_degrees.to_bits(), b.angle_degrees.to_bits());
        }
    }

    #[test]
    fn test_gradient_field_from_uniform_frame() {
        let frame = Frame {
            data: vec![128; 64 * 48 * 3],
            width: 64,
            height: 48,
            timestamp_ms: 0.0,
        };

        let field = GradientField::compute(&frame).unwrap();
        assert_eq!(field.direction.len(), 64 * 48);

        let records = dominant_orientations(&field, &[[20.0, 10.0, 40.0, 30.0]]);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].angle_degrees, 0.0);
    }
}
