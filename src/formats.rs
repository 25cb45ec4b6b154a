use serde::{Deserialize, Serialize};

use crate::error::{ErrorClass, PipelineError};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceStatus {
    Unprocessed,
    Processed,
    Error(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceRecord {
    pub platform: String,
    pub url: String,
    pub status: SourceStatus,
}

impl SourceRecord {
    pub fn unprocessed(platform: &str, url: impl Into<String>) -> Self {
        Self {
            platform: platform.to_owned(),
            url: url.into(),
            status: SourceStatus::Unprocessed,
        }
    }

    pub fn mark_processed(&mut self) {
        tracing::debug!(url = %self.url, from = ?self.status, "source status -> processed");
        self.status = SourceStatus::Processed;
    }

    pub fn mark_error(&mut self, detail: impl Into<String>) {
        let detail = detail.into();
        tracing::debug!(url = %self.url, from = ?self.status, %detail, "source status -> error");
        self.status = SourceStatus::Error(detail);
    }
}

/// On-disk shape of a converted source file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum SourceLayout {
    /// JSON array of `{platform, url, status}`.
    #[default]
    Records,
    /// Legacy `{metadata, videos: [{url, status}]}` document.
    Videos,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversionMetadata {
    pub original_file: String,
    pub conversion_date: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoEntry {
    pub url: String,
    pub status: SourceStatus,
}

/// Legacy document view over a slice of records. The platform is implied by
/// the file, so it is dropped on render and supplied again on read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideosDocument {
    pub metadata: ConversionMetadata,
    pub videos: Vec<VideoEntry>,
}

impl VideosDocument {
    pub fn render(records: &[SourceRecord], metadata: ConversionMetadata) -> Self {
        Self {
            metadata,
            videos: records
                .iter()
                .map(|r| VideoEntry {
                    url: r.url.clone(),
                    status: r.status.clone(),
                })
                .collect(),
        }
    }

    pub fn into_records(self, platform: &str) -> Vec<SourceRecord> {
        self.videos
            .into_iter()
            .map(|v| SourceRecord {
                platform: platform.to_owned(),
                url: v.url,
                status: v.status,
            })
            .collect()
    }
}

/// Either on-disk shape, as read back by later stages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SourceDocument {
    Records(Vec<SourceRecord>),
    Videos(VideosDocument),
}

impl SourceDocument {
    pub fn layout(&self) -> SourceLayout {
        match self {
            Self::Records(_) => SourceLayout::Records,
            Self::Videos(_) => SourceLayout::Videos,
        }
    }

    pub fn into_records(self, platform: &str) -> Vec<SourceRecord> {
        match self {
            Self::Records(records) => records,
            Self::Videos(doc) => doc.into_records(platform),
        }
    }

    /// Same layout and conversion metadata, new records.
    pub fn with_records(&self, records: &[SourceRecord]) -> Self {
        match self {
            Self::Records(_) => Self::Records(records.to_vec()),
            Self::Videos(doc) => Self::Videos(VideosDocument::render(records, doc.metadata.clone())),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MapCatalog {
    pub maps: Vec<MapEntry>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MapEntry {
    pub new_location: String,
    #[serde(default)]
    pub metadata: MapMetadata,
    #[serde(default)]
    pub analysis: MapAnalysis,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl MapEntry {
    pub fn needs_ocr(&self) -> bool {
        self.metadata.needs_ocr.unwrap_or(true)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MapMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dimensions: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub needs_ocr: Option<bool>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MapAnalysis {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extracted_text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<EntryError>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryError {
    pub class: ErrorClass,
    pub detail: String,
}

impl From<&PipelineError> for EntryError {
    fn from(err: &PipelineError) -> Self {
        Self {
            class: err.class(),
            detail: err.to_string(),
        }
    }
}
