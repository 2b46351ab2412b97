use serde::Serialize;
use strum::Display;

/// Errors raised at the boundary between the aggregator and its remote collaborators.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuditError {
    /// The repository listing could not be obtained. Fatal to a run.
    #[error("repository directory unavailable: {0}")]
    DirectoryUnavailable(String),

    /// The roster of a single repository could not be obtained.
    #[error("membership of `{repository}` unavailable: {message}")]
    MembershipUnavailable { repository: String, message: String },
}

impl AuditError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            AuditError::DirectoryUnavailable(_) => ErrorKind::DirectoryUnavailable,
            AuditError::MembershipUnavailable { .. } => ErrorKind::MembershipUnavailable,
        }
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, AuditError::DirectoryUnavailable(_))
    }
}

/// Discriminant of [`AuditError`], recorded alongside per-repository diagnostics.
#[derive(Copy, Clone, Debug, Display, PartialEq, Eq, Hash, Serialize)]
#[strum(serialize_all = "kebab-case")]
#[serde(rename_all = "kebab-case")]
pub enum ErrorKind {
    DirectoryUnavailable,
    MembershipUnavailable,
}
