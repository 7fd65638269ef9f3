// src/visualization.rs

use crate::detector::Detection;
use crate::orientation::OrientationRecord;
use crate::types::Frame;
use anyhow::Result;
use opencv::{
    core::{self, Mat},
    highgui, imgcodecs, imgproc,
    prelude::*,
};
use std::path::Path;

pub const WINDOW_NAME: &str = "COCO detections";

const ORIENTATION_TICK_LEN: f32 = 15.0;

/// Draw detection boxes and labels onto a frame, plus an orientation tick
/// through each box center when records are available. Returns a BGR Mat
/// ready for display or encoding.
pub fn render_detections(
    frame: &Frame,
    detections: &[Detection],
    orientations: Option<&[OrientationRecord]>,
) -> Result<Mat> {
    let mat = Mat::from_slice(&frame.data)?;
    let mat = mat.reshape(3, frame.height as i32)?;

    let mut output = Mat::default();
    imgproc::cvt_color(&mat, &mut output, imgproc::COLOR_RGB2BGR, 0)?;

    let colors = vec![
        core::Scalar::new(0.0, 0.0, 255.0, 0.0),   // Red
        core::Scalar::new(0.0, 255.0, 0.0, 0.0),   // Green
        core::Scalar::new(255.0, 0.0, 0.0, 0.0),   // Blue
        core::Scalar::new(0.0, 255.0, 255.0, 0.0), // Yellow
    ];

    for det in detections {
        let color = colors[det.class_id % colors.len()];
        let [x1, y1, x2, y2] = det.bbox;

        let rect = core::Rect::new(
            x1 as i32,
            y1 as i32,
            (x2 - x1) as i32,
            (y2 - y1) as i32,
        );
        imgproc::rectangle(&mut output, rect, color, 2, imgproc::LINE_8, 0)?;

        imgproc::put_text(
            &mut output,
            &format!("{} {:.2}", det.class_name, det.confidence),
            core::Point::new(x1 as i32, y1 as i32 - 5),
            imgproc::FONT_HERSHEY_SIMPLEX,
            0.5,
            color,
            1,
            imgproc::LINE_8,
            false,
        )?;
    }

    if let Some(records) = orientations {
        for record in records {
            draw_orientation_tick(&mut output, record)?;
        }
    }

    Ok(output)
}

/// Short line through the box center along the dominant gradient direction.
fn draw_orientation_tick(output: &mut Mat, record: &OrientationRecord) -> Result<()> {
    let theta = record.angle_degrees.to_radians();
    let dx = theta.cos() * ORIENTATION_TICK_LEN;
    let dy = theta.sin() * ORIENTATION_TICK_LEN;

    let center = core::Point::new(record.x_center, record.y_center);
    let p1 = core::Point::new(
        (record.x_center as f32 - dx) as i32,
        (record.y_center as f32 - dy) as i32,
    );
    let p2 = core::Point::new(
        (record.x_center as f32 + dx) as i32,
        (record.y_center as f32 + dy) as i32,
    );

    let white = core::Scalar::new(255.0, 255.0, 255.0, 0.0);
    imgproc::line(output, p1, p2, white, 2, imgproc::LINE_AA, 0)?;
    imgproc::circle(output, center, 3, white, -1, imgproc::LINE_8, 0)?;

    Ok(())
}

pub fn save_image(mat: &Mat, path: &Path) -> Result<()> {
    imgcodecs::imwrite(path.to_str().unwrap(), mat, &core::Vector::<i32>::new())?;
    Ok(())
}

/// Show a frame in the demo window. Returns true when ESC was pressed.
/// A zero delay blocks until a key is hit (still images); a small delay
/// polls once (video/webcam streaming).
pub fn show_frame(mat: &Mat, delay_ms: i32) -> Result<bool> {
    highgui::named_window(WINDOW_NAME, highgui::WINDOW_NORMAL)?;
    highgui::imshow(WINDOW_NAME, mat)?;
    Ok(highgui::wait_key(delay_ms)? == 27)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_preserves_dimensions() {
        let frame = Frame {
            data: vec![64; 48 * 32 * 3],
            width: 48,
            height: 32,
            timestamp_ms: 0.0,
        };
        let detections = vec![Detection {
            bbox: [8.0, 8.0, 24.0, 24.0],
            confidence: 0.9,
            class_id: 0,
            class_name: "person".to_string(),
        }];
        let records = vec![OrientationRecord {
            x_center: 16,
            y_center: 16,
            angle_degrees: 45.0,
        }];

        let rendered = render_detections(&frame, &detections, Some(&records)).unwrap();
        assert_eq!(rendered.cols(), 48);
        assert_eq!(rendered.rows(), 32);
    }

    #[test]
    fn test_render_without_detections() {
        let frame = Frame {
            data: vec![0; 16 * 16 * 3],
            width: 16,
            height: 16,
            timestamp_ms: 0.0,
        };
        let rendered = render_detections(&frame, &[], None).unwrap();
        assert_eq!(rendered.rows(), 16);
    }
}
