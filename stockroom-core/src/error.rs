//! Unified error handling system
//!
//! Provides structured error types with context and recovery suggestions, plus
//! the narrow error taxonomies of the external profile store and identity provider.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{error, warn};

pub type StockroomResult<T> = Result<T, StockroomError>;

/// Error context providing additional information for debugging and recovery
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorContext {
    /// Unique error ID for tracking
    pub error_id: String,
    /// Timestamp when error occurred
    pub timestamp: DateTime<Utc>,
    /// Component where error originated
    pub component: String,
    /// Operation being performed when error occurred
    pub operation: Option<String>,
    /// Additional metadata
    pub metadata: std::collections::HashMap<String, String>,
    /// Recovery suggestions
    pub recovery_suggestions: Vec<String>,
}

impl ErrorContext {
    pub fn new(component: &str) -> Self {
        Self {
            error_id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            component: component.to_string(),
            operation: None,
            metadata: std::collections::HashMap::new(),
            recovery_suggestions: Vec::new(),
        }
    }

    pub fn with_operation(mut self, operation: &str) -> Self {
        self.operation = Some(operation.to_string());
        self
    }

    pub fn with_metadata(mut self, key: &str, value: &str) -> Self {
        self.metadata.insert(key.to_string(), value.to_string());
        self
    }

    pub fn with_suggestion(mut self, suggestion: &str) -> Self {
        self.recovery_suggestions.push(suggestion.to_string());
        self
    }
}

/// Main error type for Stockroom infrastructure
#[derive(Error, Debug)]
pub enum StockroomError {
    #[error("Configuration error: {message}")]
    Config {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
        context: ErrorContext,
    },

    #[error("Validation error: {message}")]
    Validation {
        message: String,
        field: Option<String>,
        context: ErrorContext,
    },

    #[error("Operation timeout: {operation}")]
    Timeout {
        operation: String,
        duration_ms: u64,
        context: ErrorContext,
    },
}

impl StockroomError {
    pub fn context(&self) -> &ErrorContext {
        match self {
            StockroomError::Config { context, .. }
            | StockroomError::Validation { context, .. }
            | StockroomError::Timeout { context, .. } => context,
        }
    }

    /// Check if error is recoverable
    pub fn is_recoverable(&self) -> bool {
        matches!(self, StockroomError::Timeout { .. })
    }

    /// Timeouts are logged as warnings, everything else as errors
    pub fn log(&self) {
        let context = self.context();
        if self.is_recoverable() {
            warn!(
                error_id = %context.error_id,
                component = %context.component,
                operation = ?context.operation,
                error = %self,
                "Recoverable failure"
            );
        } else {
            error!(
                error_id = %context.error_id,
                component = %context.component,
                suggestions = ?context.recovery_suggestions,
                error = %self,
                "Unrecoverable failure"
            );
        }
    }
}

/// Outcome of a failed profile store call
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "error_type", content = "details")]
pub enum StoreError {
    /// Network or server hiccup, safe to retry
    #[error("Transient store failure: {message}")]
    Transient { message: String },

    /// The call did not complete within its time bound
    #[error("Store operation {operation} timed out after {duration_ms}ms")]
    Timeout { operation: String, duration_ms: u64 },

    #[error("No profile for user {user_id}")]
    NotFound { user_id: String },

    /// Row-level security or similar refusal; never retried
    #[error("Permission denied: {message}")]
    Permission { message: String },

    /// A profile for this user already exists
    #[error("Profile for user {user_id} already exists")]
    UniqueViolation { user_id: String },
}

impl StoreError {
    pub fn transient<S: Into<String>>(message: S) -> Self {
        Self::Transient {
            message: message.into(),
        }
    }

    pub fn not_found<S: Into<String>>(user_id: S) -> Self {
        Self::NotFound {
            user_id: user_id.into(),
        }
    }

    pub fn permission<S: Into<String>>(message: S) -> Self {
        Self::Permission {
            message: message.into(),
        }
    }

    /// Transient failures and timeouts are worth another attempt
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Transient { .. } | StoreError::Timeout { .. })
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }
}

impl From<StockroomError> for StoreError {
    fn from(error: StockroomError) -> Self {
        match error {
            StockroomError::Timeout {
                operation,
                duration_ms,
                ..
            } => StoreError::Timeout {
                operation,
                duration_ms,
            },
            other => StoreError::Transient {
                message: other.to_string(),
            },
        }
    }
}

/// Failure reported by the identity provider
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "error_type", content = "details")]
pub enum AuthError {
    #[error("Invalid login credentials")]
    InvalidCredentials,

    #[error("Identity provider error: {message}")]
    Provider { message: String },

    #[error("Identity provider unreachable: {message}")]
    Network { message: String },
}

impl AuthError {
    pub fn provider<S: Into<String>>(message: S) -> Self {
        Self::Provider {
            message: message.into(),
        }
    }

    pub fn network<S: Into<String>>(message: S) -> Self {
        Self::Network {
            message: message.into(),
        }
    }
}

/// Build a [`StockroomError::Config`], optionally with specific suggestions
///
/// `config_error!("profile.fetch_timeout_ms must be greater than 0", "config", "Set it to a positive value")`
#[macro_export]
macro_rules! config_error {
    ($msg:expr, $component:expr $(, $suggestion:expr)* $(,)?) => {
        $crate::StockroomError::Config {
            message: $msg.to_string(),
            source: None,
            context: $crate::ErrorContext::new($component)
                $(.with_suggestion($suggestion))*
                .with_suggestion("Run 'stockroom config show' to review the current values"),
        }
    };
}

#[macro_export]
macro_rules! validation_error {
    ($msg:expr, $field:expr, $component:expr) => {
        $crate::StockroomError::Validation {
            message: $msg.to_string(),
            field: Some($field.to_string()),
            context: $crate::ErrorContext::new($component)
                .with_suggestion("Check the field value and format"),
        }
    };
}
