use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context as _;
use serde::{Deserialize, Serialize};

use crate::formats::SourceLayout;
use crate::retry::RetryPolicy;

/// Project settings, read from YAML. Relative paths resolve against the root
/// directory given at startup.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectConfig {
    pub sources: Vec<SourceConfig>,
    pub maps: MapsConfig,
    pub ocr: OcrConfig,
    pub link_check: LinkCheckConfig,
    pub api: ApiConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    pub name: String,
    pub platform: String,
    pub input: PathBuf,
    pub output: PathBuf,
    #[serde(default)]
    pub filter: LineFilter,
    #[serde(default)]
    pub layout: SourceLayout,
}

/// Which lines of a legacy link file count as records.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum LineFilter {
    /// Every non-blank line.
    #[default]
    NonEmpty,
    /// Only lines starting with http:// or https://, edge quotes stripped.
    HttpOnly,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MapsConfig {
    pub dir: PathBuf,
    pub catalog: Option<PathBuf>,
}

impl Default for MapsConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("data/maps"),
            catalog: None,
        }
    }
}

impl MapsConfig {
    pub fn catalog_path(&self) -> PathBuf {
        self.catalog
            .clone()
            .unwrap_or_else(|| self.dir.join("metadata.json"))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OcrConfig {
    pub command: String,
    pub args: Vec<String>,
    pub languages: String,
    pub timeout_secs: u64,
    pub max_chars: usize,
    pub retry: RetryPolicy,
}

impl Default for OcrConfig {
    fn default() -> Self {
        Self {
            command: "tesseract".to_owned(),
            args: Vec::new(),
            languages: "fra+eng".to_owned(),
            timeout_secs: 120,
            max_chars: 500,
            retry: RetryPolicy::default(),
        }
    }
}

impl OcrConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn apply_env(&mut self) {
        if let Ok(command) = std::env::var("CATALOGIFY_OCR_COMMAND") {
            self.command = command;
        }
        if let Ok(languages) = std::env::var("CATALOGIFY_OCR_LANGUAGES") {
            self.languages = languages;
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkCheckConfig {
    pub enabled: bool,
    pub timeout_secs: u64,
}

impl Default for LinkCheckConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            timeout_secs: 10,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub youtube: PlatformApiConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlatformApiConfig {
    pub enabled: bool,
    pub endpoint: String,
    pub api_key_env: String,
    pub timeout_secs: u64,
    pub retry: RetryPolicy,
}

impl Default for PlatformApiConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            endpoint: String::new(),
            api_key_env: "YOUTUBE_API_KEY".to_owned(),
            timeout_secs: 30,
            retry: RetryPolicy {
                max_attempts: 3,
                initial_backoff_ms: 1_000,
                max_backoff_ms: 16_000,
            },
        }
    }
}

impl ProjectConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let yaml = std::fs::read_to_string(path)
            .with_context(|| format!("read config: {}", path.display()))?;
        let mut config: ProjectConfig =
            serde_yaml::from_str(&yaml).with_context(|| format!("parse config: {}", path.display()))?;
        config.ocr.apply_env();
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        for source in &self.sources {
            if source.name.trim().is_empty() {
                anyhow::bail!("source name is empty");
            }
            if source.platform.trim().is_empty() {
                anyhow::bail!("source {} has an empty platform", source.name);
            }
        }
        if self.api.youtube.enabled && self.api.youtube.endpoint.trim().is_empty() {
            anyhow::bail!("api.youtube.enabled is set but api.youtube.endpoint is empty");
        }
        if self.ocr.command.trim().is_empty() {
            anyhow::bail!("ocr.command is empty");
        }
        Ok(())
    }

    /// Returns a copy with every relative path joined onto `root`.
    pub fn rooted(mut self, root: &Path) -> Self {
        for source in &mut self.sources {
            source.input = root.join(&source.input);
            source.output = root.join(&source.output);
        }
        self.maps.catalog = Some(root.join(self.maps.catalog_path()));
        self.maps.dir = root.join(&self.maps.dir);
        self
    }
}
