//! Fatal error types for the dataset pipeline.
//!
//! Per-item merge problems are not errors in this sense; they are collected as
//! [`crate::merge::MergeError`] values and only surface in the merge report.

use std::path::PathBuf;

use thiserror::Error;

/// Configuration problems detected before any stage runs
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The config file could not be read
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The config file is not valid YAML or has the wrong shape
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    /// A required key is missing from both the config file and the CLI
    #[error("missing required setting: {0}")]
    Missing(&'static str),

    /// `SPLIT_DATASET` could not be parsed
    #[error("invalid split description '{0}': expected 'name:fraction[,name:fraction...]'")]
    SplitSyntax(String),

    /// Split fractions are out of range or inconsistent
    #[error("invalid split configuration: {0}")]
    Split(String),

    /// Unknown export format name
    #[error("unknown export format '{0}' (expected one of: datumaro, coco, yolo)")]
    ExportFormat(String),

    /// Merge tuning parameters are out of range
    #[error("invalid merge parameter: {0}")]
    MergeParam(String),

    /// Unknown policy for labels missing from the mapping
    #[error("unknown remap default '{0}' (expected delete or keep)")]
    RemapDefault(String),

    /// Two sources define the same label with different parents
    #[error("label '{label}' has conflicting parents across sources: '{first}' vs '{second}'")]
    CategoryConflict {
        label: String,
        first: String,
        second: String,
    },
}

/// Errors that abort a pipeline run
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// No task export directories were found
    #[error("no task exports found in {0}")]
    NoTasks(PathBuf),

    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid json in {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid glob pattern: {0}")]
    Pattern(#[from] glob::PatternError),
}

impl PipelineError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        PipelineError::Io {
            path: path.into(),
            source,
        }
    }

    pub fn json(path: impl Into<PathBuf>, source: serde_json::Error) -> Self {
        PipelineError::Json {
            path: path.into(),
            source,
        }
    }
}

pub type Result<T, E = PipelineError> = std::result::Result<T, E>;
