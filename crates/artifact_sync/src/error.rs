use crate::report::FailureKind;
use crate::types::ArtifactIdentifier;

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("Remote artifact store unavailable: {message}")]
    RemoteUnavailable { message: String },

    #[error("Artifact not found: {identifier}")]
    NotFound { identifier: ArtifactIdentifier },

    #[error("Artifact already exists remotely: {identifier}")]
    Conflict { identifier: ArtifactIdentifier },

    #[error("Archive {identifier} could not be extracted: {message}")]
    CorruptArchive {
        identifier: ArtifactIdentifier,
        message: String,
    },

    #[error("Artifact identifier is not a valid file name: {identifier}")]
    InvalidIdentifier { identifier: ArtifactIdentifier },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl SyncError {
    pub fn remote_unavailable(message: impl Into<String>) -> Self {
        SyncError::RemoteUnavailable {
            message: message.into(),
        }
    }

    /// Report category for a per-item failure
    pub fn kind(&self) -> FailureKind {
        match self {
            SyncError::RemoteUnavailable { .. } => FailureKind::RemoteUnavailable,
            SyncError::NotFound { .. } => FailureKind::NotFound,
            SyncError::Conflict { .. } => FailureKind::Conflict,
            SyncError::CorruptArchive { .. } => FailureKind::CorruptArchive,
            SyncError::Io(_) => FailureKind::Io,
            SyncError::InvalidIdentifier { .. } | SyncError::Internal { .. } => {
                FailureKind::Internal
            }
        }
    }
}

impl From<reqwest::Error> for SyncError {
    fn from(err: reqwest::Error) -> Self {
        SyncError::remote_unavailable(err.to_string())
    }
}

pub type SyncResult<T> = Result<T, SyncError>;
