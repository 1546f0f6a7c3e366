use serde::Serialize;

/// A JMAP-visible failure: the RFC 8621 error literal plus a diagnostic
/// that tells the caller what to fix without leaking internals. Used
/// both at method level and per-entry (`notCreated` values).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, thiserror::Error)]
#[error("{kind}: {description}")]
pub struct MethodError {
    #[serde(rename = "type")]
    pub kind: ErrorKind,
    pub description: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ErrorKind {
    UnknownMethod,
    InvalidArguments,
    InvalidMailboxId,
    InvalidEmail,
    InvalidProperties,
    BlobNotFound,
    ServerFail,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let literal = match self {
            ErrorKind::UnknownMethod => "unknownMethod",
            ErrorKind::InvalidArguments => "invalidArguments",
            ErrorKind::InvalidMailboxId => "invalidMailboxId",
            ErrorKind::InvalidEmail => "invalidEmail",
            ErrorKind::InvalidProperties => "invalidProperties",
            ErrorKind::BlobNotFound => "blobNotFound",
            ErrorKind::ServerFail => "serverFail",
        };
        f.write_str(literal)
    }
}

impl MethodError {
    fn new(kind: ErrorKind, description: impl Into<String>) -> Self {
        Self {
            kind,
            description: description.into(),
        }
    }

    pub fn unknown_method(description: impl Into<String>) -> Self {
        Self::new(ErrorKind::UnknownMethod, description)
    }

    pub fn invalid_arguments(description: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidArguments, description)
    }

    pub fn invalid_mailbox_id(description: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidMailboxId, description)
    }

    pub fn invalid_email(description: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidEmail, description)
    }

    pub fn invalid_properties(description: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidProperties, description)
    }

    pub fn blob_not_found(description: impl Into<String>) -> Self {
        Self::new(ErrorKind::BlobNotFound, description)
    }

    /// Internal failures surface with a sanitized message.
    pub fn server_fail(error: impl std::fmt::Display) -> Self {
        tracing::error!(%error, "request failed");
        Self::new(ErrorKind::ServerFail, "internal server error")
    }
}
