// medrec/src/config.rs
//!
//! Run configuration loaded from `config/config.toml`.
//!
//! The file is parsed once into an immutable [`Config`] value that is passed by
//! reference to every component. Loading also validates the filename template,
//! decodes the optional function schema and expands `${output_language}` in the
//! prompts, so a bad configuration fails before any file is touched.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Deserializer};

use crate::naming::{FilenameTemplate, TemplateError, DEFAULT_FILENAME_FORMAT};
use crate::Error;

/// Environment variable that overrides `openai_api_key`.
pub const API_KEY_ENV: &str = "OPENAI_API_KEY";

/// Settings for one kind of analysis call (per-record or overall summary).
#[derive(Debug, Clone, Deserialize)]
pub struct ModelSettings {
    #[serde(default = "default_model_name")]
    pub model_name: String,
    #[serde(default)]
    pub role_prompt: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Output-schema constraint. Either a TOML table or a string holding JSON;
    /// both are normalized to a JSON object at load time.
    #[serde(default)]
    pub function_schema: Option<serde_json::Value>,

    #[serde(default = "default_api_base")]
    pub api_base: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_request_delay_ms")]
    pub request_delay_ms: u64,
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            model_name: default_model_name(),
            role_prompt: String::new(),
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            function_schema: None,
            api_base: default_api_base(),
            timeout_secs: default_timeout_secs(),
            max_retries: default_max_retries(),
            request_delay_ms: default_request_delay_ms(),
        }
    }
}

/// External OCR tool locations.
#[derive(Debug, Clone, Deserialize)]
pub struct OcrSettings {
    #[serde(default = "default_tesseract_path")]
    pub tesseract_path: PathBuf,
    #[serde(default = "default_pdftoppm_path")]
    pub pdftoppm_path: PathBuf,
    #[serde(default = "default_dpi")]
    pub dpi: u32,
}

impl Default for OcrSettings {
    fn default() -> Self {
        Self {
            tesseract_path: default_tesseract_path(),
            pdftoppm_path: default_pdftoppm_path(),
            dpi: default_dpi(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub scans_location: PathBuf,
    pub output_location: PathBuf,

    #[serde(default, deserialize_with = "bool_or_string")]
    pub skip_processed_files: bool,
    /// Days before an already processed checksum is reviewed again.
    #[serde(default = "default_review_interval")]
    pub skip_process_review_interval: i64,

    #[serde(default = "default_filename_format")]
    pub filename_format: String,
    #[serde(default = "default_ocr_language")]
    pub ocr_language: String,
    #[serde(default = "default_output_language")]
    pub output_language: String,
    #[serde(default = "default_output_html")]
    pub output_html: String,
    #[serde(default, deserialize_with = "bool_or_string")]
    pub clean_output_on_start: bool,

    #[serde(default)]
    pub openai_api_key: Option<String>,

    #[serde(default)]
    pub ai_processing: ModelSettings,
    #[serde(default)]
    pub ai_overall_summary: Option<ModelSettings>,
    #[serde(default)]
    pub ocr: OcrSettings,
}

impl Config {
    /// Load and validate the configuration file. A missing file is fatal.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, Error> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(Error::Config(format!(
                "Configuration file not found: {}",
                path.display()
            )));
        }

        let toml_str = std::fs::read_to_string(path)?;
        let config = Self::from_toml_str(&toml_str)?;

        tracing::info!(path = %path.display(), "Loaded configuration");
        tracing::info!(
            skip_processed = config.skip_processed_files,
            review_interval = config.skip_process_review_interval,
            "Processing settings"
        );
        Ok(config)
    }

    /// Parse configuration from a TOML string
    pub fn from_toml_str(toml_str: &str) -> Result<Self, Error> {
        let mut config: Config = toml::from_str(toml_str)
            .map_err(|e| Error::Config(format!("Failed to parse configuration TOML: {}", e)))?;

        // Fail fast on a template the resolver could not render.
        config.filename_template()?;

        if config.skip_process_review_interval < 0 {
            return Err(Error::Config(
                "skip_process_review_interval must not be negative".to_string(),
            ));
        }

        let language = language_name(&config.output_language);
        config.ai_processing.normalize(language)?;
        if let Some(summary) = config.ai_overall_summary.as_mut() {
            summary.normalize(language)?;
        }

        Ok(config)
    }

    pub fn filename_template(&self) -> Result<FilenameTemplate, TemplateError> {
        FilenameTemplate::parse(&self.filename_format)
    }

    /// Resolve the API credential. The environment wins over the file.
    pub fn api_key(&self) -> Result<String, Error> {
        self.api_key_with_env(std::env::var(API_KEY_ENV).ok())
    }

    fn api_key_with_env(&self, env_value: Option<String>) -> Result<String, Error> {
        env_value
            .filter(|key| !key.trim().is_empty())
            .or_else(|| {
                self.openai_api_key
                    .clone()
                    .filter(|key| !key.trim().is_empty())
            })
            .ok_or(Error::MissingApiKey)
    }

    pub fn records_dir(&self) -> PathBuf {
        self.output_location.join("records")
    }

    pub fn data_files_dir(&self) -> PathBuf {
        self.output_location.join("data_files")
    }

    pub fn html_dir(&self) -> PathBuf {
        self.output_location.join("html")
    }

    pub fn checksums_file(&self) -> PathBuf {
        self.data_files_dir().join("processed_files.json")
    }

    pub fn csv_file(&self) -> PathBuf {
        self.data_files_dir().join("extracted_data.csv")
    }

    pub fn records_json_file(&self) -> PathBuf {
        self.data_files_dir().join("records.json")
    }

    pub fn overall_summary_file(&self) -> PathBuf {
        self.data_files_dir().join("overall_summary.json")
    }

    pub fn output_html_path(&self) -> PathBuf {
        self.output_location.join(&self.output_html)
    }
}

impl ModelSettings {
    fn normalize(&mut self, language: &str) -> Result<(), Error> {
        self.role_prompt = self.role_prompt.replace("${output_language}", language);

        if let Some(serde_json::Value::String(raw)) = &self.function_schema {
            let parsed: serde_json::Value = serde_json::from_str(raw).map_err(|e| {
                Error::Config(format!("function_schema is not valid JSON: {}", e))
            })?;
            self.function_schema = Some(parsed);
        }

        match &self.function_schema {
            None | Some(serde_json::Value::Object(_)) => Ok(()),
            Some(_) => Err(Error::Config(
                "function_schema must be a JSON object".to_string(),
            )),
        }
    }
}

/// English name of an output language code, used in prompts.
pub fn language_name(code: &str) -> &str {
    match code.to_lowercase().as_str() {
        "en" => "English",
        "it" => "Italian",
        "fr" => "French",
        "de" => "German",
        "es" => "Spanish",
        "pt" => "Portuguese",
        "nl" => "Dutch",
        _ => code,
    }
}

/// Accept `true`, `"true"` and `"True"` alike.
fn bool_or_string<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum BoolOrString {
        Bool(bool),
        Text(String),
    }

    Ok(match BoolOrString::deserialize(deserializer)? {
        BoolOrString::Bool(value) => value,
        BoolOrString::Text(text) => text.trim().eq_ignore_ascii_case("true"),
    })
}

fn default_review_interval() -> i64 {
    180
}

fn default_filename_format() -> String {
    DEFAULT_FILENAME_FORMAT.to_string()
}

fn default_ocr_language() -> String {
    "eng+ita".to_string()
}

fn default_output_language() -> String {
    "en".to_string()
}

fn default_output_html() -> String {
    "output.html".to_string()
}

fn default_model_name() -> String {
    "gpt-4o-mini".to_string()
}

fn default_max_tokens() -> u32 {
    2000
}

fn default_temperature() -> f32 {
    0.3
}

fn default_api_base() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_timeout_secs() -> u64 {
    120
}

fn default_max_retries() -> u32 {
    2
}

fn default_request_delay_ms() -> u64 {
    500
}

fn default_tesseract_path() -> PathBuf {
    PathBuf::from("tesseract")
}

fn default_pdftoppm_path() -> PathBuf {
    PathBuf::from("pdftoppm")
}

fn default_dpi() -> u32 {
    300
}
