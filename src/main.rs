// src/main.rs

mod config;
mod detector;
mod orientation;
mod output;
mod types;
mod video;
mod visualization;

use anyhow::{bail, Context, Result};
use clap::Parser;
use detector::ObjectDetector;
use indicatif::ProgressBar;
use orientation::GradientField;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, info};
use types::Config;
use walkdir::WalkDir;

#[derive(Parser, Debug)]
#[command(
    name = "detect-orientation",
    about = "Runs an ONNX object detector on images, video, or a webcam and \
             estimates a dominant edge orientation per detection"
)]
struct Args {
    /// Path to the YAML runtime configuration
    #[arg(long, default_value = "config.yaml")]
    config_file: String,

    /// Input images: a list of paths, a single glob pattern, or a directory
    #[arg(long, num_args = 1..)]
    input: Vec<String>,

    /// Path to a video file
    #[arg(long)]
    video_input: Option<PathBuf>,

    /// Capture input from webcam device 0
    #[arg(long)]
    webcam: bool,

    /// File or directory for annotated outputs; shows a window when absent
    #[arg(long)]
    output: Option<PathBuf>,

    /// Minimum score for a detection to be kept
    #[arg(long, default_value_t = 0.5)]
    confidence_threshold: f32,
}

#[derive(Debug)]
enum InputMode {
    Images,
    Video(PathBuf),
    Webcam,
}

fn main() -> Result<()> {
    let args = Args::parse();
    let config = Config::load(&args.config_file)?;

    tracing_subscriber::fmt()
        .with_env_filter(format!(
            "detect_orientation={},ort=warn",
            config.logging.level
        ))
        .init();

    info!("Object detection demo starting");
    info!("✓ Configuration loaded from {}", args.config_file);

    let mode = input_mode(&args)?;
    let mut detector = ObjectDetector::new(&config.model)?;

    match mode {
        InputMode::Images => run_on_images(&args, &config, &mut detector),
        InputMode::Video(path) => run_on_video(&path, &args, &config, &mut detector),
        InputMode::Webcam => run_on_webcam(&args, &mut detector),
    }
}

/// Resolve which input source was requested, rejecting invalid
/// combinations up front.
fn input_mode(args: &Args) -> Result<InputMode> {
    let selected = [!args.input.is_empty(), args.video_input.is_some(), args.webcam];
    match selected.iter().filter(|&&s| s).count() {
        0 => bail!("no input given: use --input, --video-input, or --webcam"),
        1 => {}
        _ => bail!("--input, --video-input, and --webcam are mutually exclusive"),
    }

    if args.webcam && args.output.is_some() {
        bail!("--output is not supported with --webcam");
    }

    if !args.input.is_empty() {
        Ok(InputMode::Images)
    } else if let Some(path) = &args.video_input {
        Ok(InputMode::Video(path.clone()))
    } else {
        Ok(InputMode::Webcam)
    }
}

/// Expand the --input arguments into concrete image paths. A single
/// argument may be a directory (walked recursively) or a glob pattern;
/// multiple arguments are taken literally.
fn resolve_image_inputs(inputs: &[String]) -> Result<Vec<PathBuf>> {
    let mut paths = Vec::new();

    if let [single] = inputs {
        let as_path = Path::new(single);
        if as_path.is_dir() {
            let image_extensions = vec!["jpg", "jpeg", "png", "bmp", "JPG", "JPEG", "PNG", "BMP"];

            for entry in WalkDir::new(as_path)
                .follow_links(true)
                .into_iter()
                .filter_map(|e| e.ok())
            {
                let path = entry.path();
                if let Some(ext) = path.extension() {
                    if image_extensions.contains(&ext.to_str().unwrap_or("")) {
                        paths.push(path.to_path_buf());
                    }
                }
            }
            paths.sort();
        } else {
            for entry in
                glob::glob(single).with_context(|| format!("invalid glob pattern {:?}", single))?
            {
                paths.push(entry?);
            }
        }
    } else {
        paths = inputs.iter().map(PathBuf::from).collect();
    }

    if paths.is_empty() {
        bail!("no input files matched {:?}", inputs);
    }
    Ok(paths)
}

fn run_on_images(args: &Args, config: &Config, detector: &mut ObjectDetector) -> Result<()> {
    let images = resolve_image_inputs(&args.input)?;

    if images.len() > 1 {
        if let Some(output) = &args.output {
            if !output.is_dir() {
                bail!("--output must be a directory when processing multiple images");
            }
        }
    }

    info!("Processing {} image(s)", images.len());
    let csv_dir = Path::new(&config.output.csv_dir);

    let progress = if args.output.is_some() {
        ProgressBar::new(images.len() as u64)
    } else {
        ProgressBar::hidden()
    };

    let mut total_instances = 0usize;

    for path in &images {
        let frame = video::read_image(path)?;
        let start = Instant::now();

        let detections = detector.detect(&frame, args.confidence_threshold)?;
        total_instances += detections.len();

        let field = GradientField::compute(&frame)?;
        let boxes: Vec<[f32; 4]> = detections.iter().map(|d| d.bbox).collect();
        let records = orientation::dominant_orientations(&field, &boxes);
        let csv_path = output::write_orientation_csv(path, csv_dir, &records)?;
        debug!("Orientation CSV: {}", csv_path.display());

        info!(
            "{}: detected {} instances in {:.2}s",
            path.display(),
            detections.len(),
            start.elapsed().as_secs_f64()
        );

        let rendered = visualization::render_detections(&frame, &detections, Some(&records))?;

        if let Some(output) = &args.output {
            let out_path = if output.is_dir() {
                output.join(path.file_name().unwrap())
            } else {
                output.clone()
            };
            visualization::save_image(&rendered, &out_path)?;
        } else if visualization::show_frame(&rendered, 0)? {
            break; // esc to quit
        }
        progress.inc(1);
    }
    progress.finish_and_clear();

    info!(
        "✓ Processed {} image(s), {} detections total",
        images.len(),
        total_instances
    );
    Ok(())
}

fn run_on_video(
    path: &Path,
    args: &Args,
    config: &Config,
    detector: &mut ObjectDetector,
) -> Result<()> {
    use opencv::videoio::VideoWriterTrait;

    let mut reader = video::VideoReader::open(path)?;

    let mut writer = match &args.output {
        Some(output) => Some(video::create_video_writer(
            output,
            path,
            reader.width,
            reader.height,
            reader.fps,
            &config.video.codec,
        )?),
        None => None,
    };

    let progress = if writer.is_some() {
        ProgressBar::new(reader.total_frames.max(0) as u64)
    } else {
        ProgressBar::hidden()
    };

    while let Some(frame) = reader.read_frame()? {
        debug!(
            "frame {} @ {:.0}ms",
            reader.current_frame, frame.timestamp_ms
        );

        let detections = detector.detect(&frame, args.confidence_threshold)?;
        let rendered = visualization::render_detections(&frame, &detections, None)?;

        match writer.as_mut() {
            Some(writer) => {
                writer.write(&rendered)?;
                progress.inc(1);
            }
            None => {
                if visualization::show_frame(&rendered, 1)? {
                    break; // esc to quit
                }
            }
        }
    }
    progress.finish_and_clear();

    info!("✓ Video processed: {} frames", reader.current_frame);
    Ok(())
}

fn run_on_webcam(args: &Args, detector: &mut ObjectDetector) -> Result<()> {
    let mut reader = video::VideoReader::from_camera(0)?;

    while let Some(frame) = reader.read_frame()? {
        let detections = detector.detect(&frame, args.confidence_threshold)?;
        let rendered = visualization::render_detections(&frame, &detections, None)?;

        if visualization::show_frame(&rendered, 1)? {
            break; // esc to quit
        }
    }

    info!("✓ Webcam session ended after {} frames", reader.current_frame);
    Ok(())
}
