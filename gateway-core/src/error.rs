//! Error taxonomy for the multi-tenant gateway core.
//!
//! Mirrors the split the rest of the gateway uses elsewhere: an error either
//! carries information that is safe to hand back to a caller
//! ([`UserFacingError`]), or it doesn't, and only [`ReportableError::get_error_kind`]
//! (for logs and metrics) is allowed to see it.

use std::fmt;

use thiserror::Error;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, GatewayError>;

/// Coarse classification used for metrics labels and alerting, independent
/// of the human-readable message.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ErrorKind {
    /// Bad input from an untrusted caller (malformed user id, etc).
    User,
    /// Token unknown, suspended, or expired.
    Unauthorized,
    /// Tenant or config record does not exist; not an error condition per se.
    NotFound,
    /// Non-2xx or transport failure talking to the cloud backend.
    TransientUpstream,
    /// Unexpected filesystem fault.
    Storage,
    /// Multi-tenant mode is disabled or misconfigured.
    ConfigUnavailable,
}

impl ErrorKind {
    pub fn to_metric_label(&self) -> &'static str {
        match self {
            ErrorKind::User => "user",
            ErrorKind::Unauthorized => "unauthorized",
            ErrorKind::NotFound => "not_found",
            ErrorKind::TransientUpstream => "transient_upstream",
            ErrorKind::Storage => "storage",
            ErrorKind::ConfigUnavailable => "config_unavailable",
        }
    }
}

/// Marks errors that may be safely reported back to an API caller.
///
/// NOTE: deliberately not implemented for `anyhow::Error` — that combinator
/// is too easy to reach for and tends to leak internal detail once it does.
pub trait UserFacingError: ReportableError {
    fn to_string_client(&self) -> String {
        self.to_string()
    }
}

pub trait ReportableError: fmt::Display + Send + Sync + 'static {
    fn get_error_kind(&self) -> ErrorKind;
}

#[derive(Debug, Error)]
enum GatewayErrorImpl {
    #[error("invalid user id: {0}")]
    InvalidUserId(String),

    #[error("tenant not found: {0}")]
    NotFound(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("upstream request failed: {0}")]
    TransientUpstream(String),

    #[error("storage error: {0}")]
    Storage(#[from] std::io::Error),

    #[error("multi-tenant mode unavailable: {0}")]
    ConfigUnavailable(String),
}

/// Boxed to keep `Result<T, GatewayError>` futures small — the same tradeoff
/// the rest of the stack makes for its own auth/console error types.
#[derive(Debug, Error)]
#[error(transparent)]
pub struct GatewayError(Box<GatewayErrorImpl>);

impl GatewayError {
    pub fn invalid_user_id(detail: impl Into<String>) -> Self {
        Self(Box::new(GatewayErrorImpl::InvalidUserId(detail.into())))
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        Self(Box::new(GatewayErrorImpl::NotFound(what.into())))
    }

    pub fn unauthorized(why: impl Into<String>) -> Self {
        Self(Box::new(GatewayErrorImpl::Unauthorized(why.into())))
    }

    pub fn transient_upstream(why: impl Into<String>) -> Self {
        Self(Box::new(GatewayErrorImpl::TransientUpstream(why.into())))
    }

    pub fn config_unavailable(why: impl Into<String>) -> Self {
        Self(Box::new(GatewayErrorImpl::ConfigUnavailable(why.into())))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self.0.as_ref(), GatewayErrorImpl::NotFound(_))
    }
}

impl From<std::io::Error> for GatewayError {
    fn from(e: std::io::Error) -> Self {
        Self(Box::new(GatewayErrorImpl::Storage(e)))
    }
}

impl UserFacingError for GatewayError {
    fn to_string_client(&self) -> String {
        use GatewayErrorImpl::*;
        match self.0.as_ref() {
            InvalidUserId(_) => self.to_string(),
            NotFound(_) => self.to_string(),
            Unauthorized(_) => "unauthorized".to_string(),
            TransientUpstream(_) => "service temporarily unavailable".to_string(),
            Storage(_) => "internal error".to_string(),
            ConfigUnavailable(_) => self.to_string(),
        }
    }
}

impl ReportableError for GatewayError {
    fn get_error_kind(&self) -> ErrorKind {
        use GatewayErrorImpl::*;
        match self.0.as_ref() {
            InvalidUserId(_) => ErrorKind::User,
            NotFound(_) => ErrorKind::NotFound,
            Unauthorized(_) => ErrorKind::Unauthorized,
            TransientUpstream(_) => ErrorKind::TransientUpstream,
            Storage(_) => ErrorKind::Storage,
            ConfigUnavailable(_) => ErrorKind::ConfigUnavailable,
        }
    }
}
