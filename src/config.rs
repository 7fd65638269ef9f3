use crate::types::Config;
use anyhow::{Context, Result};
use std::fs;

impl Config {
    pub fn load(path: &str) -> Result<Self> {
        let contents =
            fs::read_to_string(path).with_context(|| format!("reading config file {}", path))?;
        let config: Config = serde_yaml::from_str(&contents)?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_load_config() {
        let yaml = "\
model:
  path: models/yolov8n.onnx
  input_size: 640
  num_threads: 4
output:
  csv_dir: output/orientation
video:
  codec: mp4v
logging:
  level: debug
";
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(yaml.as_bytes()).unwrap();

        let config = Config::load(file.path().to_str().unwrap()).unwrap();
        assert_eq!(config.model.input_size, 640);
        assert_eq!(config.output.csv_dir, "output/orientation");
        assert_eq!(config.video.codec, "mp4v");
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_load_missing_file() {
        assert!(Config::load("does/not/exist.yaml").is_err());
    }
}
