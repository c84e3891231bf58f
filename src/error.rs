use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Failures while reading or validating the provider configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read configuration {path}: {source}")]
    Read { path: PathBuf, source: io::Error },

    #[error("failed to parse configuration TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Filesystem failures inside a provider's dataset folder.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("i/o error at {path}: {source}")]
    Io { path: PathBuf, source: io::Error },

    #[error("cannot rename {path}: source does not exist")]
    MissingSource { path: PathBuf },

    #[error("refusing path outside the provider folder: {path}")]
    InvalidPath { path: PathBuf },

    #[error("archive entries {first} and {second} collide once lowercased")]
    CaseCollision { first: String, second: String },
}

impl StorageError {
    pub fn io(path: impl Into<PathBuf>, source: io::Error) -> StorageError {
        StorageError::Io { path: path.into(), source }
    }
}

/// Per-provider failure of an acquisition run.
#[derive(Debug, Error)]
pub enum AcquisitionError {
    #[error("network error for provider {provider}: tried {} ({reason})", .attempted.join(", "))]
    Network {
        provider: String,
        attempted: Vec<String>,
        reason: String,
    },

    #[error("archive error for provider {provider}: {url} is not a valid zip archive: {source}")]
    Archive {
        provider: String,
        url: String,
        source: zip::result::ZipError,
    },

    #[error("storage error for provider {provider}: {source}")]
    Storage {
        provider: String,
        source: StorageError,
    },
}

impl AcquisitionError {
    pub fn kind(&self) -> &'static str {
        match self {
            AcquisitionError::Network { .. } => "network",
            AcquisitionError::Archive { .. } => "archive",
            AcquisitionError::Storage { .. } => "storage",
        }
    }
}

#[test]
fn test_network_error_names_every_url() {
    let error = AcquisitionError::Network {
        provider: "CANADA".to_owned(),
        attempted: vec![
            "https://example.org/LCDMA_April_2024.zip".to_owned(),
            "https://example.org/LCDMA_March_2024.zip".to_owned(),
        ],
        reason: "HTTP 404".to_owned(),
    };

    let message = error.to_string();
    assert!(message.contains("CANADA"));
    assert!(message.contains("LCDMA_April_2024.zip"));
    assert!(message.contains("LCDMA_March_2024.zip"));
    assert_eq!(error.kind(), "network");
}
