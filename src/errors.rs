//! Error taxonomy for the repository (spec component H).
//!
//! Every fallible operation in this crate returns [`RepositoryError`], a small
//! tagged union over the [`ErrorKind`]s a caller-facing gateway needs to map to
//! transport status codes. Storage-engine faults are classified on arrival
//! (`From<mongodb::error::Error>`) rather than leaking driver types upward.

use rsb_derive::Builder;
use std::error::Error;
use std::fmt::{Display, Formatter};

pub type RepositoryResult<T> = Result<T, RepositoryError>;

/// Stable error classification surfaced to callers. Gateway translation to
/// transport codes (HTTP/gRPC) is the collaborator's concern (spec §6).
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum ErrorKind {
    InvalidArgument,
    NotFound,
    AlreadyExists,
    FailedPrecondition,
    PermissionDenied,
    Unauthenticated,
    Internal,
    Aborted,
    Cancelled,
    DeadlineExceeded,
}

impl Display for ErrorKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ErrorKind::InvalidArgument => "INVALID_ARGUMENT",
            ErrorKind::NotFound => "NOT_FOUND",
            ErrorKind::AlreadyExists => "ALREADY_EXISTS",
            ErrorKind::FailedPrecondition => "FAILED_PRECONDITION",
            ErrorKind::PermissionDenied => "PERMISSION_DENIED",
            ErrorKind::Unauthenticated => "UNAUTHENTICATED",
            ErrorKind::Internal => "INTERNAL",
            ErrorKind::Aborted => "ABORTED",
            ErrorKind::Cancelled => "CANCELLED",
            ErrorKind::DeadlineExceeded => "DEADLINE_EXCEEDED",
        };
        write!(f, "{name}")
    }
}

/// Structured context attached to an error, enough for a gateway to build a
/// useful response without re-parsing the message string.
#[derive(Debug, Clone, Default, Builder)]
pub struct ErrorDetails {
    pub message: String,
    pub collection_path: Option<String>,
    pub field: Option<String>,
    /// Zero-based index of the first failing operation in a batch (spec §4.D, §7).
    pub op_index: Option<usize>,
}

impl ErrorDetails {
    pub fn from_message<S: Into<String>>(message: S) -> Self {
        ErrorDetails::new(message.into())
    }
}

#[derive(Debug, Clone)]
pub struct RepositoryError {
    pub kind: ErrorKind,
    pub details: ErrorDetails,
}

impl RepositoryError {
    pub fn new(kind: ErrorKind, details: ErrorDetails) -> Self {
        Self { kind, details }
    }

    pub fn invalid_argument<S: Into<String>>(message: S) -> Self {
        Self::new(ErrorKind::InvalidArgument, ErrorDetails::from_message(message))
    }

    pub fn invalid_field<S: Into<String>>(field: S, message: S) -> Self {
        Self::new(
            ErrorKind::InvalidArgument,
            ErrorDetails::from_message(message).opt_field(Some(field.into())),
        )
    }

    pub fn not_found<S: Into<String>>(message: S) -> Self {
        Self::new(ErrorKind::NotFound, ErrorDetails::from_message(message))
    }

    pub fn already_exists<S: Into<String>>(message: S) -> Self {
        Self::new(ErrorKind::AlreadyExists, ErrorDetails::from_message(message))
    }

    pub fn failed_precondition<S: Into<String>>(message: S) -> Self {
        Self::new(
            ErrorKind::FailedPrecondition,
            ErrorDetails::from_message(message),
        )
    }

    pub fn permission_denied<S: Into<String>>(message: S) -> Self {
        Self::new(ErrorKind::PermissionDenied, ErrorDetails::from_message(message))
    }

    pub fn unauthenticated<S: Into<String>>(message: S) -> Self {
        Self::new(ErrorKind::Unauthenticated, ErrorDetails::from_message(message))
    }

    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::new(ErrorKind::Internal, ErrorDetails::from_message(message))
    }

    pub fn aborted<S: Into<String>>(message: S) -> Self {
        Self::new(ErrorKind::Aborted, ErrorDetails::from_message(message))
    }

    pub fn cancelled<S: Into<String>>(message: S) -> Self {
        Self::new(ErrorKind::Cancelled, ErrorDetails::from_message(message))
    }

    pub fn deadline_exceeded<S: Into<String>>(message: S) -> Self {
        Self::new(ErrorKind::DeadlineExceeded, ErrorDetails::from_message(message))
    }

    /// Attaches the batch operation index that first failed (spec §4.D, §7).
    pub fn with_op_index(mut self, index: usize) -> Self {
        self.details.op_index = Some(index);
        self
    }

    pub fn with_collection_path<S: Into<String>>(mut self, path: S) -> Self {
        self.details.collection_path = Some(path.into());
        self
    }
}

impl Display for RepositoryError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind, self.details.message)
    }
}

impl Error for RepositoryError {}

impl From<mongodb::error::Error> for RepositoryError {
    fn from(err: mongodb::error::Error) -> Self {
        use mongodb::error::ErrorKind as MongoErrorKind;
        match err.kind.as_ref() {
            MongoErrorKind::Write(_) if err.contains_label("DuplicateKey") => {
                RepositoryError::already_exists(format!("Storage conflict: {err}"))
            }
            _ if err.contains_label("TransientTransactionError")
                || err.contains_label("RetryableWriteError") =>
            {
                RepositoryError::aborted(format!("Transient storage error: {err}"))
            }
            MongoErrorKind::Command(cmd_err) if cmd_err.code == 11000 => {
                RepositoryError::already_exists(format!("Storage conflict: {err}"))
            }
            _ => RepositoryError::internal(format!("Storage engine fault: {err}")),
        }
    }
}

impl From<bson::ser::Error> for RepositoryError {
    fn from(err: bson::ser::Error) -> Self {
        RepositoryError::internal(format!("BSON serialization error: {err}"))
    }
}

impl From<bson::de::Error> for RepositoryError {
    fn from(err: bson::de::Error) -> Self {
        RepositoryError::internal(format!("BSON deserialization error: {err}"))
    }
}

impl From<chrono::ParseError> for RepositoryError {
    fn from(err: chrono::ParseError) -> Self {
        RepositoryError::invalid_argument(format!("Timestamp parse error: {err}"))
    }
}
