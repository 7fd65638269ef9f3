// src/video.rs

use crate::types::Frame;
use anyhow::{bail, Context, Result};
use opencv::{
    core::{self, Mat},
    imgcodecs, imgproc,
    prelude::*,
    videoio::{self, VideoCapture, VideoCaptureTraitConst, VideoWriter},
};
use std::path::{Path, PathBuf};
use tracing::info;

/// Decode an image file into an RGB frame.
pub fn read_image(path: &Path) -> Result<Frame> {
    let bgr = imgcodecs::imread(path.to_str().unwrap(), imgcodecs::IMREAD_COLOR)
        .with_context(|| format!("reading {}", path.display()))?;
    if bgr.empty() {
        bail!("failed to decode image {}", path.display());
    }

    let mut rgb = Mat::default();
    imgproc::cvt_color(&bgr, &mut rgb, imgproc::COLOR_BGR2RGB, 0)?;

    Ok(Frame {
        data: rgb.data_bytes()?.to_vec(),
        width: rgb.cols() as usize,
        height: rgb.rows() as usize,
        timestamp_ms: 0.0,
    })
}

pub struct VideoReader {
    pub cap: VideoCapture,
    pub fps: f64,
    pub total_frames: i32,
    pub current_frame: i32,
    pub width: i32,
    pub height: i32,
}

impl VideoReader {
    pub fn open(path: &Path) -> Result<Self> {
        info!("Opening video: {}", path.display());
        let cap = VideoCapture::from_file(path.to_str().unwrap(), videoio::CAP_ANY)?;
        Self::from_capture(cap)
    }

    pub fn from_camera(index: i32) -> Result<Self> {
        info!("Opening webcam device {}", index);
        let cap = VideoCapture::new(index, videoio::CAP_ANY)?;
        Self::from_capture(cap)
    }

    fn from_capture(cap: VideoCapture) -> Result<Self> {
        if !cap.is_opened()? {
            bail!("failed to open capture source");
        }

        let fps = VideoCaptureTraitConst::get(&cap, videoio::CAP_PROP_FPS)?;
        // Webcams often report no frame rate; fall back for timestamping.
        let fps = if fps > 0.0 { fps } else { 30.0 };
        let total_frames = VideoCaptureTraitConst::get(&cap, videoio::CAP_PROP_FRAME_COUNT)? as i32;
        let width = VideoCaptureTraitConst::get(&cap, videoio::CAP_PROP_FRAME_WIDTH)? as i32;
        let height = VideoCaptureTraitConst::get(&cap, videoio::CAP_PROP_FRAME_HEIGHT)? as i32;

        info!(
            "Capture properties: {}x{} @ {:.1} FPS, {} frames",
            width, height, fps, total_frames
        );

        Ok(Self {
            cap,
            fps,
            total_frames,
            current_frame: 0,
            width,
            height,
        })
    }

    pub fn read_frame(&mut self) -> Result<Option<Frame>> {
        use opencv::videoio::VideoCaptureTrait;

        let mut mat = Mat::default();
        if !VideoCaptureTrait::read(&mut self.cap, &mut mat)? || mat.empty() {
            return Ok(None);
        }

        self.current_frame += 1;
        let timestamp_ms = (self.current_frame as f64 / self.fps) * 1000.0;

        let mut rgb_mat = Mat::default();
        imgproc::cvt_color(&mat, &mut rgb_mat, imgproc::COLOR_BGR2RGB, 0)?;

        Ok(Some(Frame {
            data: rgb_mat.data_bytes()?.to_vec(),
            width: self.width as usize,
            height: self.height as usize,
            timestamp_ms,
        }))
    }
}

/// Annotated-video path: `<output>/<input name>.mp4` when `output` is a
/// directory, otherwise `output` itself.
pub fn annotated_output_path(output: &Path, input: &Path) -> PathBuf {
    if output.is_dir() {
        output
            .join(input.file_name().unwrap())
            .with_extension("mp4")
    } else {
        output.to_path_buf()
    }
}

pub fn create_video_writer(
    output: &Path,
    input: &Path,
    width: i32,
    height: i32,
    fps: f64,
    codec: &str,
) -> Result<VideoWriter> {
    let path = annotated_output_path(output, input);
    if path.exists() {
        bail!("output file already exists: {}", path.display());
    }

    let chars: Vec<char> = codec.chars().collect();
    if chars.len() != 4 {
        bail!("video codec must be a four character code, got {:?}", codec);
    }
    let fourcc = VideoWriter::fourcc(chars[0], chars[1], chars[2], chars[3])?;

    info!("Output video: {}", path.display());
    let writer = VideoWriter::new(
        path.to_str().unwrap(),
        fourcc,
        fps,
        core::Size::new(width, height),
        true,
    )?;

    Ok(writer)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_annotated_path_into_directory() {
        let dir = tempfile::tempdir().unwrap();
        let path = annotated_output_path(dir.path(), Path::new("clips/traffic.avi"));
        assert_eq!(path, dir.path().join("traffic.mp4"));
    }

    #[test]
    fn test_annotated_path_explicit_file() {
        let path = annotated_output_path(Path::new("results/out.mp4"), Path::new("traffic.avi"));
        assert_eq!(path, PathBuf::from("results/out.mp4"));
    }

    #[test]
    fn test_writer_rejects_existing_output() {
        let dir = tempfile::tempdir().unwrap();
        let existing = dir.path().join("taken.mp4");
        std::fs::write(&existing, b"").unwrap();

        let result = create_video_writer(&existing, Path::new("in.avi"), 640, 480, 30.0, "mp4v");
        assert!(result.is_err());
    }

    #[test]
    fn test_writer_rejects_bad_codec() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("out.mp4");
        let result = create_video_writer(&out, Path::new("in.avi"), 640, 480, 30.0, "h26");
        assert!(result.is_err());
    }
}
