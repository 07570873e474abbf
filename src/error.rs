//! Backend failure taxonomy and the classifier that turns a failure into a
//! user-facing message plus a retry verdict.
//!
//! Raw failures (`message`, optional `code`, optional HTTP `status`) are
//! sorted into a [`BackendError`] variant exactly once, at the network
//! boundary, by [`BackendError::from_parts`]. Everything downstream matches
//! on the variant instead of probing strings again.

use chrono::Utc;
use std::backtrace::Backtrace;
use thiserror::Error;
use tracing::error;

pub const GENERIC_FAILURE_MESSAGE: &str = "Something went wrong. Please try again.";

/// Raw messages longer than this are replaced by [`GENERIC_FAILURE_MESSAGE`].
const MAX_RAW_MESSAGE_LEN: usize = 100;

const NETWORK_MARKERS: &[&str] = &[
    "network",
    "failed to fetch",
    "fetch failed",
    "connection refused",
    "connection reset",
    "econnrefused",
    "enotfound",
];
const TIMEOUT_MARKERS: &[&str] = &["timeout", "timed out", "etimedout"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemaObject {
    Relation,
    Column,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthFailure {
    InvalidCredentials,
    AlreadyRegistered,
    WeakPassword,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BackendError {
    /// Message already written for the user by the caller.
    #[error("{0}")]
    UserFacing(String),
    #[error("network failure: {0}")]
    Network(String),
    #[error("request timed out: {0}")]
    Timeout(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("no data: {0}")]
    NoData(String),
    #[error("missing {object:?}: {message}")]
    MissingSchema {
        object: SchemaObject,
        message: String,
    },
    #[error("auth failure: {0:?}")]
    Auth(AuthFailure),
    #[error("server fault {status}: {message}")]
    ServerFault { status: u16, message: String },
    #[error("{message}")]
    Unknown {
        message: String,
        code: Option<String>,
        status: Option<u16>,
    },
}

/// Outcome of [`classify`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub retryable: bool,
    pub user_message: String,
}

impl BackendError {
    /// Sort a raw failure into a variant. First match wins: network
    /// markers, known backend codes, auth markers, timeout markers, then
    /// `status >= 500`.
    pub fn from_parts(message: impl Into<String>, code: Option<&str>, status: Option<u16>) -> Self {
        let message = message.into();
        let lower = message.to_lowercase();

        if contains_any(&lower, NETWORK_MARKERS) {
            return BackendError::Network(message);
        }

        match code.map(str::trim) {
            Some("23505") => return BackendError::Conflict(message),
            Some("PGRST116") => return BackendError::NotFound(message),
            Some("P0002") => return BackendError::NoData(message),
            Some("42P01") => {
                return BackendError::MissingSchema {
                    object: SchemaObject::Relation,
                    message,
                }
            }
            Some("42703") | Some("PGRST204") => {
                return BackendError::MissingSchema {
                    object: SchemaObject::Column,
                    message,
                }
            }
            _ => {}
        }

        if lower.contains("invalid login credentials") {
            return BackendError::Auth(AuthFailure::InvalidCredentials);
        }
        if lower.contains("user already registered") {
            return BackendError::Auth(AuthFailure::AlreadyRegistered);
        }
        if lower.contains("password should be at least") {
            return BackendError::Auth(AuthFailure::WeakPassword);
        }

        if contains_any(&lower, TIMEOUT_MARKERS) {
            return BackendError::Timeout(message);
        }

        match status {
            Some(status) if status >= 500 => BackendError::ServerFault { status, message },
            _ => BackendError::Unknown {
                message,
                code: code.map(str::to_owned),
                status,
            },
        }
    }

    pub fn code(&self) -> Option<&str> {
        match self {
            BackendError::Conflict(_) => Some("23505"),
            BackendError::NotFound(_) => Some("PGRST116"),
            BackendError::NoData(_) => Some("P0002"),
            BackendError::MissingSchema {
                object: SchemaObject::Relation,
                ..
            } => Some("42P01"),
            BackendError::MissingSchema {
                object: SchemaObject::Column,
                ..
            } => Some("42703"),
            BackendError::Unknown { code, .. } => code.as_deref(),
            _ => None,
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            BackendError::ServerFault { status, .. } => Some(*status),
            BackendError::Unknown { status, .. } => *status,
            _ => None,
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            BackendError::Network(_) | BackendError::Timeout(_) | BackendError::ServerFault { .. }
        )
    }

    pub fn user_message(&self) -> String {
        match self {
            BackendError::UserFacing(msg) => msg.clone(),
            BackendError::Network(_) => {
                "Network error. Please check your connection and try again.".to_string()
            }
            BackendError::Conflict(_) => "This entry already exists.".to_string(),
            BackendError::NotFound(_) => "The requested item could not be found.".to_string(),
            BackendError::NoData(_) => "No data found.".to_string(),
            BackendError::MissingSchema {
                object: SchemaObject::Relation,
                ..
            } => "The server is missing a required table. Please update the app.".to_string(),
            BackendError::MissingSchema {
                object: SchemaObject::Column,
                ..
            } => "The server is missing a required field. Please update the app.".to_string(),
            BackendError::Auth(AuthFailure::InvalidCredentials) => {
                "Invalid email or password.".to_string()
            }
            BackendError::Auth(AuthFailure::AlreadyRegistered) => {
                "An account with this email already exists.".to_string()
            }
            BackendError::Auth(AuthFailure::WeakPassword) => {
                "Password must be at least 6 characters long.".to_string()
            }
            BackendError::Timeout(_) => "The request timed out. Please try again.".to_string(),
            BackendError::ServerFault { message, .. } | BackendError::Unknown { message, .. } => {
                raw_or_generic(message)
            }
        }
    }
}

fn contains_any(haystack: &str, needles: &[&str]) -> bool {
    needles.iter().any(|n| haystack.contains(n))
}

fn raw_or_generic(message: &str) -> String {
    let trimmed = message.trim();
    if trimmed.is_empty() || trimmed.chars().count() > MAX_RAW_MESSAGE_LEN {
        GENERIC_FAILURE_MESSAGE.to_string()
    } else {
        trimmed.to_string()
    }
}

pub fn classify(err: &BackendError) -> Classification {
    Classification {
        retryable: err.is_retryable(),
        user_message: err.user_message(),
    }
}

/// Errors the retry executor knows how to judge.
pub trait Retryable {
    fn is_retryable(&self) -> bool;
}

impl Retryable for BackendError {
    fn is_retryable(&self) -> bool {
        BackendError::is_retryable(self)
    }
}

/// Looks through the context chain for a [`BackendError`]; anything else is
/// not retried.
impl Retryable for anyhow::Error {
    fn is_retryable(&self) -> bool {
        self.chain()
            .find_map(|cause| cause.downcast_ref::<BackendError>())
            .is_some_and(BackendError::is_retryable)
    }
}

/// Record a failure for diagnostics. Never fails.
pub fn log_error(context: &str, err: &BackendError) {
    let backtrace = Backtrace::capture();
    error!(
        context,
        code = err.code().unwrap_or("-"),
        status = err.status().map(i64::from).unwrap_or(-1),
        error = %err,
        at = %Utc::now().to_rfc3339(),
        backtrace = %backtrace,
        "backend operation failed"
    );
}
