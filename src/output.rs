// src/output.rs

use crate::orientation::OrientationRecord;
use anyhow::{Context, Result};
use csv::WriterBuilder;
use std::path::{Path, PathBuf};
use tracing::debug;

/// CSV path for an image: `<csv_dir>/<image file stem>.csv`.
pub fn csv_output_path(image_path: &Path, csv_dir: &Path) -> PathBuf {
    let stem = image_path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("detections");
    csv_dir.join(format!("{}.csv", stem))
}

/// Write one row per record: `x_center,y_center,angle_degrees`, no header.
pub fn write_orientation_csv(
    image_path: &Path,
    csv_dir: &Path,
    records: &[OrientationRecord],
) -> Result<PathBuf> {
    std::fs::create_dir_all(csv_dir)
        .with_context(|| format!("creating output directory {}", csv_dir.display()))?;

    let path = csv_output_path(image_path, csv_dir);
    let mut writer = WriterBuilder::new()
        .has_headers(false)
        .from_path(&path)
        .with_context(|| format!("creating {}", path.display()))?;

    for record in records {
        writer.serialize(record)?;
    }
    writer.flush()?;

    debug!(
        "Wrote {} orientation row(s) to {}",
        records.len(),
        path.display()
    );
    Ok(path)
}
