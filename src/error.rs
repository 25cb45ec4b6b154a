use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Failure classes surfaced in stage summaries and per-entry notations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    ResourceNotFound,
    Decode,
    ExternalService,
    Persistence,
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::ResourceNotFound => "resource not found",
            Self::Decode => "decode error",
            Self::ExternalService => "external service error",
            Self::Persistence => "persistence error",
        };
        f.write_str(name)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("not found: {}", path.display())]
    ResourceNotFound { path: PathBuf },

    #[error("decode {what}: {detail}")]
    Decode { what: String, detail: String },

    #[error("{service}: {detail}")]
    ExternalService {
        service: String,
        detail: String,
        retryable: bool,
    },

    #[error("persist {}: {detail}", path.display())]
    Persistence { path: PathBuf, detail: String },
}

impl PipelineError {
    pub fn not_found(path: impl Into<PathBuf>) -> Self {
        Self::ResourceNotFound { path: path.into() }
    }

    pub fn decode(what: impl Into<String>, detail: impl fmt::Display) -> Self {
        Self::Decode {
            what: what.into(),
            detail: detail.to_string(),
        }
    }

    pub fn external(service: impl Into<String>, detail: impl fmt::Display, retryable: bool) -> Self {
        Self::ExternalService {
            service: service.into(),
            detail: detail.to_string(),
            retryable,
        }
    }

    pub fn persistence(path: impl Into<PathBuf>, detail: impl fmt::Display) -> Self {
        Self::Persistence {
            path: path.into(),
            detail: detail.to_string(),
        }
    }

    /// Maps a read failure on `path` to `ResourceNotFound` or `Decode`.
    pub fn from_read(path: &Path, err: std::io::Error) -> Self {
        if err.kind() == std::io::ErrorKind::NotFound {
            Self::not_found(path)
        } else {
            Self::decode(path.display().to_string(), err)
        }
    }

    pub fn class(&self) -> ErrorClass {
        match self {
            Self::ResourceNotFound { .. } => ErrorClass::ResourceNotFound,
            Self::Decode { .. } => ErrorClass::Decode,
            Self::ExternalService { .. } => ErrorClass::ExternalService,
            Self::Persistence { .. } => ErrorClass::Persistence,
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::ExternalService { retryable: true, .. })
    }
}

pub type Result<T, E = PipelineError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_errors_split_into_not_found_and_decode() {
        let missing = std::io::Error::from(std::io::ErrorKind::NotFound);
        let err = PipelineError::from_read(Path::new("maps/a.png"), missing);
        assert_eq!(err.class(), ErrorClass::ResourceNotFound);
        assert_eq!(err.to_string(), "not found: maps/a.png");

        let invalid = std::io::Error::from(std::io::ErrorKind::InvalidData);
        let err = PipelineError::from_read(Path::new("links.txt"), invalid);
        assert_eq!(err.class(), ErrorClass::Decode);
    }

    #[test]
    fn only_flagged_external_errors_are_retryable() {
        assert!(PipelineError::external("ocr", "timed out", true).is_retryable());
        assert!(!PipelineError::external("ocr", "spawn failed", false).is_retryable());
        assert!(!PipelineError::not_found("x").is_retryable());
    }
}
