use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub global: Global,
    #[serde(default)]
    pub paths: Paths,
    #[serde(default)]
    pub detection: Detection,
    #[serde(default)]
    pub render: Render,
    #[serde(default)]
    pub recognizer: Recognizer,
    #[serde(default)]
    pub output: Output,
    #[serde(default)]
    pub logging: Logging,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config: {}", path.display()))?;
        let cfg: Config = toml::from_str(&raw).with_context(|| "parsing TOML")?;
        Ok(cfg)
    }

    /// A stable, normalization-friendly string for hashing.
    pub fn normalized_for_hash(&self) -> String {
        toml::to_string(self).unwrap_or_default()
    }

    /// Worker pool size with `0` resolved to the available parallelism.
    pub fn effective_workers(&self) -> usize {
        if self.global.worker_count > 0 {
            return self.global.worker_count;
        }
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
    }

    pub fn validate(&self) -> Result<()> {
        if self.render.rasterization_resolution == 0 {
            return Err(anyhow!("render.rasterization_resolution must be > 0"));
        }
        if self.detection.question_pattern.trim().is_empty() {
            return Err(anyhow!("detection.question_pattern is empty"));
        }
        regex::RegexBuilder::new(&self.detection.question_pattern)
            .case_insensitive(true)
            .build()
            .with_context(|| {
                format!(
                    "invalid detection.question_pattern: {}",
                    self.detection.question_pattern
                )
            })?;
        if self.detection.canny_low > self.detection.canny_high {
            return Err(anyhow!(
                "detection.canny_low ({}) exceeds canny_high ({})",
                self.detection.canny_low,
                self.detection.canny_high
            ));
        }
        if self.output.drawing_marker.is_empty() {
            return Err(anyhow!("output.drawing_marker is empty"));
        }
        if self.output.unsplit_label.trim().is_empty() {
            return Err(anyhow!("output.unsplit_label is empty"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Global {
    pub worker_count: usize,
    pub print_summary: bool,
}
impl Default for Global {
    fn default() -> Self {
        Self {
            worker_count: 0,
            print_summary: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Paths {
    pub input_dir: String,
    pub output_dir: String,
}
impl Default for Paths {
    fn default() -> Self {
        Self {
            input_dir: "scans".into(),
            output_dir: "sliced".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Detection {
    pub question_pattern: String,
    pub normalize_unicode: bool,
    /// Edge pixels above which a page counts as drawing-heavy.
    pub edge_density_threshold: u64,
    pub canny_low: f32,
    pub canny_high: f32,
}
impl Default for Detection {
    fn default() -> Self {
        Self {
            question_pattern: "\\b(?:question|problem|q)\\s*\\d+".into(),
            normalize_unicode: true,
            edge_density_threshold: 1000,
            canny_low: 50.0,
            canny_high: 150.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Render {
    /// Pixels per inch; fixed for the whole run so scores stay comparable.
    pub rasterization_resolution: u32,
    pub pdfium_library_path: String,
}
impl Default for Render {
    fn default() -> Self {
        Self {
            rasterization_resolution: 300,
            pdfium_library_path: "".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Recognizer {
    pub tesseract_exe: String,
    pub language: String,
    pub page_timeout_seconds: u64,
    #[serde(default)]
    pub extra_args: Vec<String>,
}
impl Default for Recognizer {
    fn default() -> Self {
        Self {
            tesseract_exe: "tesseract".into(),
            language: "eng".into(),
            page_timeout_seconds: 120,
            extra_args: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Output {
    pub drawing_marker: String,
    pub unsplit_label: String,
    pub log_filename: String,
    pub write_report_json: bool,
    pub report_filename: String,
}
impl Default for Output {
    fn default() -> Self {
        Self {
            drawing_marker: "_drawing".into(),
            unsplit_label: "unsplit".into(),
            log_filename: "drawing_detection_log.txt".into(),
            write_report_json: true,
            report_filename: "batch_report.json".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Logging {
    pub level: String,
    pub json: bool,
    pub write_to_file: bool,
    pub file_path: String,
}
impl Default for Logging {
    fn default() -> Self {
        Self {
            level: "info".into(),
            json: false,
            write_to_file: true,
            file_path: "".into(),
        }
    }
}
