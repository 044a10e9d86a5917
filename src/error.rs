use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum HarvestError {
    #[error("failed to connect to catalog database: {0}")]
    CatalogConnect(String),

    #[error("catalog query failed: {0}")]
    CatalogQuery(String),

    #[error("link {link:?} does not contain marker {marker:?}")]
    #[diagnostic(help("pass --marker-policy permissive to keep the raw slice of such links"))]
    MissingMarker { link: String, marker: String },

    #[error("catalog record does not match the {expected} collection")]
    RecordShape { expected: &'static str },

    #[error("cannot write {path}: {message}")]
    LocalIo { path: String, message: String },

    #[error("filesystem error: {0}")]
    Filesystem(String),

    #[error("object key has no usable file name: {0:?}")]
    InvalidKey(String),

    #[error("failed to spawn retrieval worker: {0}")]
    Spawn(String),

    #[error("blob store request failed: {0}")]
    BlobHttp(String),

    #[error("blob store returned status {status}: {message}")]
    BlobStatus { status: u16, message: String },

    #[error("object not found in blob store: {0}")]
    ObjectNotFound(String),

    #[error("transfer interrupted: {0}")]
    BlobTransfer(String),

    #[error("retrieval cancelled")]
    Cancelled,

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("invalid time window: {0}")]
    #[diagnostic(help("timestamps use the form '2022-05-22 21:30:00'"))]
    InvalidTimeWindow(String),
}

/// Coarse classification used for reporting and exit codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorKind {
    Resolution,
    LocalIo,
    RemoteFetch,
    Cancelled,
    Config,
}

impl HarvestError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            HarvestError::CatalogConnect(_)
            | HarvestError::CatalogQuery(_)
            | HarvestError::MissingMarker { .. }
            | HarvestError::RecordShape { .. } => ErrorKind::Resolution,
            HarvestError::LocalIo { .. }
            | HarvestError::Filesystem(_)
            | HarvestError::InvalidKey(_)
            | HarvestError::Spawn(_) => ErrorKind::LocalIo,
            HarvestError::BlobHttp(_)
            | HarvestError::BlobStatus { .. }
            | HarvestError::ObjectNotFound(_)
            | HarvestError::BlobTransfer(_) => ErrorKind::RemoteFetch,
            HarvestError::Cancelled => ErrorKind::Cancelled,
            HarvestError::ConfigRead(_)
            | HarvestError::ConfigParse(_)
            | HarvestError::InvalidConfig(_)
            | HarvestError::InvalidTimeWindow(_) => ErrorKind::Config,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_task_errors() {
        let local = HarvestError::LocalIo {
            path: "out/a.wav".to_string(),
            message: "permission denied".to_string(),
        };
        assert_eq!(local.kind(), ErrorKind::LocalIo);
        assert_eq!(
            HarvestError::ObjectNotFound("a/b.wav".to_string()).kind(),
            ErrorKind::RemoteFetch
        );
        assert_eq!(HarvestError::Cancelled.kind(), ErrorKind::Cancelled);
    }
}
