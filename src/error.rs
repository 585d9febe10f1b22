use std::path::PathBuf;
use thiserror::Error;

/// A raw record that cannot become a shot. Only the offending record is skipped.
#[derive(Debug, Error, PartialEq)]
pub enum ShotError {
    #[error("malformed record: {0}")]
    MalformedRecord(String),
}

#[derive(Debug, Error)]
pub enum SourceError {
    /// File or directory missing or unreadable. The caller keeps showing "loading".
    #[error("shot source unavailable: {path}")]
    Unavailable { path: PathBuf },
    #[error("failed to parse {path}: {reason}")]
    Parse { path: PathBuf, reason: String },
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("file watcher error: {0}")]
    Watch(#[from] notify::Error),
}

#[derive(Debug, Error, PartialEq)]
pub enum DrillError {
    #[error("no target distance for shot index {index}: generator holds {capacity} slots")]
    GeneratorExhausted { index: usize, capacity: usize },
    #[error("invalid drill configuration: {0}")]
    InvalidConfiguration(String),
    #[error("unknown distance table '{0}'")]
    UnknownTable(String),
}
