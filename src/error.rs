//! Error types for libres
//!
//! Exit codes:
//! - 0: Success
//! - 2: User error (unknown ids, bad args, bad config)
//! - 3: Blocked by policy (book held by someone else)
//! - 4: Operation failed (reservation center down, IO, serialization)

use thiserror::Error;

use crate::model::{BookId, MemberId};

/// Exit codes for the libres CLI
pub mod exit_codes {
    pub const SUCCESS: i32 = 0;
    pub const USER_ERROR: i32 = 2;
    pub const POLICY_BLOCKED: i32 = 3;
    pub const OPERATION_FAILED: i32 = 4;
}

/// Main error type for libres operations
#[derive(Error, Debug)]
pub enum Error {
    // User errors (exit code 2)
    #[error("Book not found: {0}")]
    BookNotFound(BookId),

    #[error("Member not found: {0}")]
    MemberNotFound(MemberId),

    #[error("Book {0} is not borrowed")]
    NotBorrowed(BookId),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // Policy blocks (exit code 3)
    #[error("Book {0} is already borrowed")]
    BookNotAvailable(BookId),

    #[error("Book {book} is reserved by member {holder}")]
    ReservedByOther { book: BookId, holder: MemberId },

    #[error("Book {0} is already reserved")]
    AlreadyReserved(BookId),

    #[error("Book {0} is borrowed and cannot be removed")]
    BookBorrowed(BookId),

    // Operation failures (exit code 4)
    #[error("Reservation center not initialized")]
    CenterNotInitialized,

    #[error("Reservation center has been stopped")]
    CenterStopped,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("Operation failed: {0}")]
    OperationFailed(String),
}

impl Error {
    /// Get the exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            // User errors
            Error::BookNotFound(_)
            | Error::MemberNotFound(_)
            | Error::NotBorrowed(_)
            | Error::InvalidArgument(_)
            | Error::InvalidConfig(_) => exit_codes::USER_ERROR,

            // Policy blocks
            Error::BookNotAvailable(_)
            | Error::ReservedByOther { .. }
            | Error::AlreadyReserved(_)
            | Error::BookBorrowed(_) => exit_codes::POLICY_BLOCKED,

            // Operation failures
            Error::CenterNotInitialized
            | Error::CenterStopped
            | Error::Io(_)
            | Error::Json(_)
            | Error::TomlParse(_)
            | Error::TomlSerialize(_)
            | Error::OperationFailed(_) => exit_codes::OPERATION_FAILED,
        }
    }

    /// Machine-readable name of the failure
    pub fn kind(&self) -> &'static str {
        match self {
            Error::BookNotFound(_) => "book_not_found",
            Error::MemberNotFound(_) => "member_not_found",
            Error::NotBorrowed(_) => "not_borrowed",
            Error::InvalidArgument(_) => "invalid_argument",
            Error::InvalidConfig(_) => "invalid_config",
            Error::BookNotAvailable(_) => "book_not_available",
            Error::ReservedByOther { .. } => "reserved_by_other",
            Error::AlreadyReserved(_) => "already_reserved",
            Error::BookBorrowed(_) => "book_borrowed",
            Error::CenterNotInitialized => "center_not_initialized",
            Error::CenterStopped => "center_stopped",
            Error::Io(_) => "io",
            Error::Json(_) => "json",
            Error::TomlParse(_) => "toml_parse",
            Error::TomlSerialize(_) => "toml_serialize",
            Error::OperationFailed(_) => "operation_failed",
        }
    }

    /// Whether retrying later can succeed without changing the request
    pub fn is_contention(&self) -> bool {
        matches!(
            self,
            Error::BookNotAvailable(_) | Error::ReservedByOther { .. } | Error::AlreadyReserved(_)
        )
    }

    /// Structured context for JSON output
    pub fn details(&self) -> Option<serde_json::Value> {
        match self {
            Error::BookNotFound(book)
            | Error::NotBorrowed(book)
            | Error::BookNotAvailable(book)
            | Error::AlreadyReserved(book)
            | Error::BookBorrowed(book) => Some(serde_json::json!({ "book_id": book })),
            Error::MemberNotFound(member) => Some(serde_json::json!({ "member_id": member })),
            Error::ReservedByOther { book, holder } => Some(serde_json::json!({
                "book_id": book,
                "reserved_by": holder,
            })),
            _ => None,
        }
    }
}

/// Result type alias for libres operations
pub type Result<T> = std::result::Result<T, Error>;

/// Wrapper for displaying errors in JSON format
#[derive(serde::Serialize)]
pub struct JsonError {
    pub kind: &'static str,
    pub error: String,
    pub code: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl From<&Error> for JsonError {
    fn from(err: &Error) -> Self {
        JsonError {
            kind: err.kind(),
            error: err.to_string(),
            code: err.exit_code(),
            details: err.details(),
        }
    }
}
