//! Error handling for Depot Core.
//!
//! This module provides:
//! - A single error type with a stable, machine-readable [`ErrorCode`]
//! - User-facing messages kept apart from internal detail
//! - Structured [`ErrorDetails`] (which entity, which constraint)
//! - A `depot_errors_total{code,category}` count of every error constructed
//!
//! Authorization *denials* are never errors: the engine returns `Ok(false)`.
//! Errors are reserved for misuse (validation), catalog guard failures
//! (referential), and persistence failures.
//!
//! # Usage
//!
//! ```rust,ignore
//! use depot_core::error::{DepotError, Result};
//!
//! fn load_role(id: i64) -> Result<Role> {
//!     repo.find(id)?.ok_or_else(|| DepotError::not_found("role", id))
//! }
//! ```

use metrics::counter;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;
use tracing::{debug, error, warn};

// ═══════════════════════════════════════════════════════════════════════════════
// Result Type Alias
// ═══════════════════════════════════════════════════════════════════════════════

/// A specialized Result type for Depot operations.
pub type Result<T> = std::result::Result<T, DepotError>;

// ═══════════════════════════════════════════════════════════════════════════════
// Error Codes
// ═══════════════════════════════════════════════════════════════════════════════

/// Machine-readable error codes.
///
/// These codes are stable and can be used by callers to render a specific
/// message or pick an HTTP status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Validation Errors (1000-1099)
    ValidationError,
    MissingRequiredField,
    InvalidFormat,

    // Catalog Errors (1100-1199)
    RecordNotFound,
    DuplicateRecord,
    ReferentialViolation,
    SystemProtected,
    RoleInactive,

    // Persistence Errors (2000-2099)
    DatabaseError,
    DatabaseConnectionFailed,
    PolicyStoreWriteFailed,
    PolicyStoreLoadFailed,
    SerializationError,

    // Configuration Errors (5000-5099)
    ConfigurationError,
    InvalidConfiguration,

    // Internal Errors (9000-9099)
    InternalError,
}

impl ErrorCode {
    /// Stable numeric form, grouped by hundreds per category.
    pub const fn numeric_code(&self) -> u32 {
        match self {
            Self::ValidationError => 1000,
            Self::MissingRequiredField => 1001,
            Self::InvalidFormat => 1002,

            Self::RecordNotFound => 1100,
            Self::DuplicateRecord => 1101,
            Self::ReferentialViolation => 1102,
            Self::SystemProtected => 1103,
            Self::RoleInactive => 1104,

            Self::DatabaseError => 2000,
            Self::DatabaseConnectionFailed => 2001,
            Self::PolicyStoreWriteFailed => 2002,
            Self::PolicyStoreLoadFailed => 2003,
            Self::SerializationError => 2004,

            Self::ConfigurationError => 5000,
            Self::InvalidConfiguration => 5001,

            Self::InternalError => 9000,
        }
    }

    /// HTTP status the calling layer is expected to map this code to.
    pub const fn http_status_hint(&self) -> u16 {
        match self {
            Self::ValidationError | Self::MissingRequiredField | Self::InvalidFormat => 422,
            Self::RecordNotFound => 404,
            Self::DuplicateRecord | Self::ReferentialViolation | Self::RoleInactive => 409,
            Self::SystemProtected => 403,
            Self::DatabaseConnectionFailed => 503,
            Self::DatabaseError
            | Self::PolicyStoreWriteFailed
            | Self::PolicyStoreLoadFailed
            | Self::SerializationError
            | Self::ConfigurationError
            | Self::InvalidConfiguration
            | Self::InternalError => 500,
        }
    }

    /// Metric and log label.
    pub const fn category(&self) -> &'static str {
        match self.numeric_code() / 100 {
            10 => "validation",
            11 => "catalog",
            20 => "persistence",
            50 => "configuration",
            _ => "internal",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Error Severity
// ═══════════════════════════════════════════════════════════════════════════════

/// Decides the level an error is logged at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorSeverity {
    /// Caller mistakes and catalog guard failures
    Low,
    /// Bad configuration
    Medium,
    /// A backend is unreachable or returned garbage
    High,
    /// A write did not land; memory was rolled back
    Critical,
}

impl ErrorSeverity {
    pub const fn from_code(code: &ErrorCode) -> Self {
        match code.numeric_code() / 100 {
            10 | 11 => Self::Low,
            50 => Self::Medium,
            _ => match code {
                ErrorCode::PolicyStoreWriteFailed | ErrorCode::InternalError => Self::Critical,
                _ => Self::High,
            },
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Error Details
// ═══════════════════════════════════════════════════════════════════════════════

/// Which record an error is about, plus free-form context.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ErrorDetails {
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub context: HashMap<String, serde_json::Value>,

    /// Role id, menu id, permission key, ...
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entity_id: Option<String>,

    /// `role`, `menu`, `menu action`, `assignment`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entity_type: Option<String>,

    /// Uniqueness constraint that rejected a write
    #[serde(skip_serializing_if = "Option::is_none")]
    pub constraint: Option<String>,
}

impl ErrorDetails {
    fn entity(entity_type: impl Into<String>, entity_id: impl fmt::Display) -> Self {
        Self {
            entity_type: Some(entity_type.into()),
            entity_id: Some(entity_id.to_string()),
            ..Default::default()
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Main Error Type
// ═══════════════════════════════════════════════════════════════════════════════

/// Every fallible operation in the crate returns this.
#[derive(Error, Debug)]
pub struct DepotError {
    code: ErrorCode,

    /// Safe to show to an end user
    user_message: Cow<'static, str>,

    /// Backend detail, for logs only
    internal_message: Option<String>,

    details: ErrorDetails,

    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
}

impl fmt::Display for DepotError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.user_message)?;
        match &self.internal_message {
            Some(internal) => write!(f, ": {}", internal),
            None => Ok(()),
        }
    }
}

impl DepotError {
    // ─────────────────────────────────────────────────────────────────────────
    // Constructors
    // ─────────────────────────────────────────────────────────────────────────

    /// Every constructor funnels through here and bumps the error counter.
    pub fn new(code: ErrorCode, user_message: impl Into<Cow<'static, str>>) -> Self {
        counter!(
            crate::telemetry::metrics::ERRORS_TOTAL,
            "code" => code.to_string(),
            "category" => code.category(),
        )
        .increment(1);
        Self {
            code,
            user_message: user_message.into(),
            internal_message: None,
            details: ErrorDetails::default(),
            source: None,
        }
    }

    pub fn with_internal(
        code: ErrorCode,
        user_message: impl Into<Cow<'static, str>>,
        internal_message: impl Into<String>,
    ) -> Self {
        Self {
            internal_message: Some(internal_message.into()),
            ..Self::new(code, user_message)
        }
    }

    pub fn validation(message: impl Into<Cow<'static, str>>) -> Self {
        Self::new(ErrorCode::ValidationError, message)
    }

    /// A required field was empty.
    pub fn missing_field(field: &'static str) -> Self {
        Self::new(
            ErrorCode::MissingRequiredField,
            format!("{} must not be empty", field),
        )
        .with_context("field", field)
    }

    pub fn not_found(entity_type: impl Into<String>, entity_id: impl fmt::Display) -> Self {
        let details = ErrorDetails::entity(entity_type, entity_id);
        Self::new(
            ErrorCode::RecordNotFound,
            format!(
                "{} not found: {}",
                details.entity_type.as_deref().unwrap_or_default(),
                details.entity_id.as_deref().unwrap_or_default()
            ),
        )
        .with_details(details)
    }

    /// `value` already exists under the uniqueness constraint `constraint`.
    pub fn duplicate(
        entity_type: impl Into<String>,
        constraint: impl Into<String>,
        value: impl fmt::Display,
    ) -> Self {
        let mut details = ErrorDetails::entity(entity_type, &value);
        details.constraint = Some(constraint.into());
        Self::new(
            ErrorCode::DuplicateRecord,
            format!(
                "{} with {} '{}' already exists",
                details.entity_type.as_deref().unwrap_or_default(),
                details.constraint.as_deref().unwrap_or_default(),
                value
            ),
        )
        .with_details(details)
    }

    /// A catalog guard (parent, tenant, assignment count, cycle) refused.
    pub fn referential(
        entity_type: impl Into<String>,
        entity_id: impl fmt::Display,
        message: impl Into<Cow<'static, str>>,
    ) -> Self {
        Self::new(ErrorCode::ReferentialViolation, message)
            .with_details(ErrorDetails::entity(entity_type, entity_id))
    }

    pub fn system_protected(entity_type: impl Into<String>, entity_id: impl fmt::Display) -> Self {
        let details = ErrorDetails::entity(entity_type, entity_id);
        Self::new(
            ErrorCode::SystemProtected,
            format!(
                "{} {} is a system record and cannot be modified",
                details.entity_type.as_deref().unwrap_or_default(),
                details.entity_id.as_deref().unwrap_or_default()
            ),
        )
        .with_details(details)
    }

    pub fn policy_write(message: impl Into<String>) -> Self {
        Self::with_internal(
            ErrorCode::PolicyStoreWriteFailed,
            "Failed to persist policy change",
            message,
        )
    }

    pub fn policy_load(message: impl Into<String>) -> Self {
        Self::with_internal(
            ErrorCode::PolicyStoreLoadFailed,
            "Failed to load policy facts",
            message,
        )
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Builders
    // ─────────────────────────────────────────────────────────────────────────

    pub fn with_source<E>(mut self, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        self.source = Some(Box::new(source));
        self
    }

    pub fn with_details(mut self, details: ErrorDetails) -> Self {
        self.details = details;
        self
    }

    /// Attach a context value. Values that fail to serialize are dropped.
    pub fn with_context(mut self, key: impl Into<String>, value: impl Serialize) -> Self {
        if let Ok(v) = serde_json::to_value(value) {
            self.details.context.insert(key.into(), v);
        }
        self
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Accessors
    // ─────────────────────────────────────────────────────────────────────────

    pub fn code(&self) -> ErrorCode {
        self.code
    }

    pub fn user_message(&self) -> &str {
        &self.user_message
    }

    pub fn internal_message(&self) -> Option<&str> {
        self.internal_message.as_deref()
    }

    pub fn details(&self) -> &ErrorDetails {
        &self.details
    }

    pub fn severity(&self) -> ErrorSeverity {
        ErrorSeverity::from_code(&self.code)
    }

    /// Emit one event at the level the severity calls for. Caller errors
    /// only show up at `debug`.
    pub fn log(&self) {
        let code = self.code.to_string();
        let category = self.code.category();
        match self.severity() {
            ErrorSeverity::Critical | ErrorSeverity::High => error!(
                error_code = %code,
                category,
                user_message = %self.user_message,
                internal = ?self.internal_message,
                details = ?self.details,
                "Operation failed"
            ),
            ErrorSeverity::Medium => warn!(
                error_code = %code,
                category,
                user_message = %self.user_message,
                internal = ?self.internal_message,
                "Operation failed"
            ),
            ErrorSeverity::Low => debug!(
                error_code = %code,
                category,
                user_message = %self.user_message,
                details = ?self.details,
                "Operation rejected"
            ),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Conversions
// ═══════════════════════════════════════════════════════════════════════════════

impl From<sqlx::Error> for DepotError {
    fn from(err: sqlx::Error) -> Self {
        let code = match &err {
            sqlx::Error::RowNotFound => ErrorCode::RecordNotFound,
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
                ErrorCode::DatabaseConnectionFailed
            }
            sqlx::Error::Database(db) if db.is_unique_violation() => ErrorCode::DuplicateRecord,
            sqlx::Error::Database(db) if db.is_foreign_key_violation() => {
                ErrorCode::ReferentialViolation
            }
            _ => ErrorCode::DatabaseError,
        };
        Self::with_internal(code, "Database operation failed", err.to_string()).with_source(err)
    }
}

impl From<sqlx::migrate::MigrateError> for DepotError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        Self::with_internal(ErrorCode::DatabaseError, "Database migration failed", err.to_string())
            .with_source(err)
    }
}

impl From<std::io::Error> for DepotError {
    fn from(err: std::io::Error) -> Self {
        Self::with_internal(ErrorCode::PolicyStoreWriteFailed, "I/O operation failed", err.to_string())
            .with_source(err)
    }
}

impl From<serde_json::Error> for DepotError {
    fn from(err: serde_json::Error) -> Self {
        Self::with_internal(ErrorCode::SerializationError, "Serialization failed", err.to_string())
            .with_source(err)
    }
}

impl From<config::ConfigError> for DepotError {
    fn from(err: config::ConfigError) -> Self {
        Self::with_internal(
            ErrorCode::ConfigurationError,
            "Configuration could not be loaded",
            err.to_string(),
        )
        .with_source(err)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════
