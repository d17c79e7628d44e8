use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::analyzer::{TargetClasses, DEFAULT_TARGET_CLASS};
use crate::camera::CameraConfig;
use crate::frame::Rotation;
use crate::geometry::CropSpec;
use crate::inference::{
    ClassifierOptions, ModelRef, DEFAULT_CONFIDENCE_THRESHOLD, DEFAULT_MAX_LABELS,
};

const DEFAULT_HEIGHT_CROP_PERCENT: u32 = 54;
const DEFAULT_WIDTH_CROP_PERCENT: u32 = 8;
const DEFAULT_INPUT_SIZE: u32 = 224;
const DEFAULT_CAMERA_URL: &str = "stub://back_camera";
const DEFAULT_CAMERA_WIDTH: u32 = 1280;
const DEFAULT_CAMERA_HEIGHT: u32 = 720;
const DEFAULT_CAMERA_FPS: u32 = 30;
const DEFAULT_BUFFER_SLOTS: usize = 4;
const BUILTIN_STUB_MODEL: &str = "stub";

#[derive(Debug, Deserialize, Default)]
struct DetectorConfigFile {
    crop: Option<CropConfigFile>,
    classifier: Option<ClassifierConfigFile>,
    targets: Option<TargetsConfigFile>,
    camera: Option<CameraConfigFile>,
    analysis: Option<AnalysisConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct CropConfigFile {
    height_percent: Option<u32>,
    width_percent: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct ClassifierConfigFile {
    model_path: Option<PathBuf>,
    labels_path: Option<PathBuf>,
    stream_mode: Option<bool>,
    classification: Option<bool>,
    confidence_threshold: Option<f32>,
    max_labels: Option<usize>,
    input_width: Option<u32>,
    input_height: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct TargetsConfigFile {
    class_indices: Option<Vec<u32>>,
}

#[derive(Debug, Deserialize, Default)]
struct CameraConfigFile {
    url: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    rotation_degrees: Option<u32>,
    target_fps: Option<u32>,
    buffer_slots: Option<usize>,
}

#[derive(Debug, Deserialize, Default)]
struct AnalysisConfigFile {
    inference_timeout_ms: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct DetectorConfig {
    pub crop: CropSettings,
    pub classifier: ClassifierSettings,
    pub target_classes: Vec<u32>,
    pub camera: CameraSettings,
    pub inference_timeout: Option<Duration>,
}

#[derive(Debug, Clone)]
pub struct CropSettings {
    pub height_percent: u32,
    pub width_percent: u32,
}

#[derive(Debug, Clone)]
pub struct ClassifierSettings {
    pub model_path: Option<PathBuf>,
    pub labels_path: Option<PathBuf>,
    pub stream_mode: bool,
    pub classification: bool,
    pub confidence_threshold: f32,
    pub max_labels: usize,
    pub input_width: u32,
    pub input_height: u32,
}

#[derive(Debug, Clone)]
pub struct CameraSettings {
    pub url: String,
    pub width: u32,
    pub height: u32,
    pub rotation_degrees: u32,
    pub target_fps: u32,
    pub buffer_slots: usize,
}

impl DetectorConfig {
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("ROI_DETECT_CONFIG").ok();
        let file_cfg = match config_path.as_deref() {
            Some(path) => Some(read_config_file(Path::new(path))?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default());
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: DetectorConfigFile) -> Self {
        let crop = file.crop.unwrap_or_default();
        let classifier = file.classifier.unwrap_or_default();
        let camera = file.camera.unwrap_or_default();
        Self {
            crop: CropSettings {
                height_percent: crop.height_percent.unwrap_or(DEFAULT_HEIGHT_CROP_PERCENT),
                width_percent: crop.width_percent.unwrap_or(DEFAULT_WIDTH_CROP_PERCENT),
            },
            classifier: ClassifierSettings {
                model_path: classifier.model_path,
                labels_path: classifier.labels_path,
                stream_mode: classifier.stream_mode.unwrap_or(true),
                classification: classifier.classification.unwrap_or(true),
                confidence_threshold: classifier
                    .confidence_threshold
                    .unwrap_or(DEFAULT_CONFIDENCE_THRESHOLD),
                max_labels: classifier.max_labels.unwrap_or(DEFAULT_MAX_LABELS),
                input_width: classifier.input_width.unwrap_or(DEFAULT_INPUT_SIZE),
                input_height: classifier.input_height.unwrap_or(DEFAULT_INPUT_SIZE),
            },
            target_classes: file
                .targets
                .and_then(|targets| targets.class_indices)
                .unwrap_or_else(|| vec![DEFAULT_TARGET_CLASS]),
            camera: CameraSettings {
                url: camera
                    .url
                    .unwrap_or_else(|| DEFAULT_CAMERA_URL.to_string()),
                width: camera.width.unwrap_or(DEFAULT_CAMERA_WIDTH),
                height: camera.height.unwrap_or(DEFAULT_CAMERA_HEIGHT),
                rotation_degrees: camera.rotation_degrees.unwrap_or(0),
                target_fps: camera.target_fps.unwrap_or(DEFAULT_CAMERA_FPS),
                buffer_slots: camera.buffer_slots.unwrap_or(DEFAULT_BUFFER_SLOTS),
            },
            inference_timeout: file
                .analysis
                .and_then(|analysis| analysis.inference_timeout_ms)
                .filter(|ms| *ms > 0)
                .map(Duration::from_millis),
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(value) = std::env::var("ROI_DETECT_HEIGHT_CROP_PERCENT") {
            self.crop.height_percent = parse_env("ROI_DETECT_HEIGHT_CROP_PERCENT", &value)?;
        }
        if let Ok(value) = std::env::var("ROI_DETECT_WIDTH_CROP_PERCENT") {
            self.crop.width_percent = parse_env("ROI_DETECT_WIDTH_CROP_PERCENT", &value)?;
        }
        if let Ok(path) = std::env::var("ROI_DETECT_MODEL") {
            if !path.trim().is_empty() {
                self.classifier.model_path = Some(PathBuf::from(path));
            }
        }
        if let Ok(value) = std::env::var("ROI_DETECT_CONFIDENCE_THRESHOLD") {
            self.classifier.confidence_threshold =
                parse_env("ROI_DETECT_CONFIDENCE_THRESHOLD", &value)?;
        }
        if let Ok(classes) = std::env::var("ROI_DETECT_TARGET_CLASSES") {
            let parsed = split_csv(&classes)
                .iter()
                .map(|entry| parse_env("ROI_DETECT_TARGET_CLASSES", entry))
                .collect::<Result<Vec<u32>>>()?;
            if !parsed.is_empty() {
                self.target_classes = parsed;
            }
        }
        if let Ok(url) = std::env::var("ROI_DETECT_CAMERA_URL") {
            if !url.trim().is_empty() {
                self.camera.url = url;
            }
        }
        if let Ok(value) = std::env::var("ROI_DETECT_INFERENCE_TIMEOUT_MS") {
            let ms: u64 = parse_env("ROI_DETECT_INFERENCE_TIMEOUT_MS", &value)?;
            self.inference_timeout = (ms > 0).then(|| Duration::from_millis(ms));
        }
        Ok(())
    }

    fn validate(&mut self) -> Result<()> {
        CropSpec::new(self.crop.height_percent, self.crop.width_percent)?;
        Rotation::from_degrees(self.camera.rotation_degrees)?;
        self.classifier_options()?;

        if self.classifier.input_width == 0 || self.classifier.input_height == 0 {
            return Err(anyhow!("classifier input size must be non-zero"));
        }
        if self.target_classes.is_empty() {
            return Err(anyhow!("at least one target class index is required"));
        }
        self.target_classes.sort_unstable();
        self.target_classes.dedup();
        if self.camera.width == 0 || self.camera.height == 0 {
            return Err(anyhow!("camera dimensions must be non-zero"));
        }
        if self.camera.buffer_slots == 0 {
            return Err(anyhow!("camera buffer_slots must be at least 1"));
        }
        Ok(())
    }

    pub fn crop_spec(&self) -> Result<CropSpec> {
        CropSpec::new(self.crop.height_percent, self.crop.width_percent)
    }

    pub fn targets(&self) -> TargetClasses {
        TargetClasses::new(self.target_classes.iter().copied())
    }

    /// Model reference: the configured file, or the built-in stub model.
    pub fn model_ref(&self) -> ModelRef {
        match &self.classifier.model_path {
            Some(path) => ModelRef::Path(path.clone()),
            None => ModelRef::Builtin(BUILTIN_STUB_MODEL.to_string()),
        }
    }

    pub fn classifier_options(&self) -> Result<ClassifierOptions> {
        let mut builder = ClassifierOptions::builder(self.model_ref())
            .confidence_threshold(self.classifier.confidence_threshold)
            .max_labels(self.classifier.max_labels);
        if self.classifier.stream_mode {
            builder = builder.stream_mode();
        }
        if self.classifier.classification {
            builder = builder.enable_classification();
        }
        builder.build()
    }

    pub fn camera_config(&self) -> Result<CameraConfig> {
        Ok(CameraConfig {
            url: self.camera.url.clone(),
            width: self.camera.width,
            height: self.camera.height,
            rotation: Rotation::from_degrees(self.camera.rotation_degrees)?,
            target_fps: self.camera.target_fps,
            buffer_slots: self.camera.buffer_slots,
        })
    }
}

fn read_config_file(path: &Path) -> Result<DetectorConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_toml = path
        .extension()
        .map(|ext| ext.eq_ignore_ascii_case("toml"))
        .unwrap_or(false);
    let cfg = if is_toml {
        toml::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| anyhow!("{} has an invalid value: {:?}", key, value))
}

fn split_csv(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|entry| entry.trim())
        .filter(|entry| !entry.is_empty())
        .map(|entry| entry.to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inference::DetectorMode;

    #[test]
    fn defaults_match_the_shipped_detector() -> Result<()> {
        let mut cfg = DetectorConfig::from_file(DetectorConfigFile::default());
        cfg.validate()?;

        let crop = cfg.crop_spec()?;
        assert_eq!((crop.height_percent(), crop.width_percent()), (54, 8));
        assert!(cfg.targets().contains(510));
        assert_eq!(cfg.inference_timeout, None);

        let options = cfg.classifier_options()?;
        assert_eq!(options.mode(), DetectorMode::Stream);
        assert!(options.classification_enabled());
        assert_eq!(options.confidence_threshold(), 0.8);
        assert_eq!(options.max_labels(), 5);
        assert_eq!(options.model(), &ModelRef::Builtin("stub".to_string()));

        let camera = cfg.camera_config()?;
        assert_eq!(camera.url, "stub://back_camera");
        assert_eq!((camera.width, camera.height), (1280, 720));
        assert_eq!(camera.rotation, Rotation::Deg0);
        Ok(())
    }

    #[test]
    fn parses_toml_sections() -> Result<()> {
        let file: DetectorConfigFile = toml::from_str(
            r#"
            [crop]
            height_percent = 20

            [camera]
            rotation_degrees = 270

            [analysis]
            inference_timeout_ms = 0
            "#,
        )?;
        let mut cfg = DetectorConfig::from_file(file);
        cfg.validate()?;
        assert_eq!(cfg.crop.height_percent, 20);
        assert_eq!(cfg.crop.width_percent, 8);
        assert_eq!(cfg.camera_config()?.rotation, Rotation::Deg270);
        assert_eq!(cfg.inference_timeout, None);
        Ok(())
    }

    #[test]
    fn rejects_out_of_range_values() {
        let mut cfg = DetectorConfig::from_file(DetectorConfigFile::default());
        cfg.crop.height_percent = 100;
        assert!(cfg.validate().is_err());

        let mut cfg = DetectorConfig::from_file(DetectorConfigFile::default());
        cfg.camera.rotation_degrees = 45;
        assert!(cfg.validate().is_err());

        let mut cfg = DetectorConfig::from_file(DetectorConfigFile::default());
        cfg.classifier.confidence_threshold = 1.5;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn split_csv_skips_blanks() {
        assert_eq!(split_csv(" 510, ,42,"), vec!["510", "42"]);
    }
}
