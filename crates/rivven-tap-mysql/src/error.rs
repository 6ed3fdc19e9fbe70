//! Error types for rivven-tap-mysql
//!
//! Every failure surfaced by the connector is fatal for the current run.
//! The category is informational: nothing in this crate retries, retry
//! belongs to the orchestration or transport layer.

use std::fmt;
use thiserror::Error;

/// Result type for rivven-tap-mysql operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error categories for classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Connection-related errors
    Connection,
    /// Query execution errors
    Query,
    /// Type construction/conversion errors
    TypeConversion,
    /// Configuration error
    Configuration,
    /// Schema-related errors
    Schema,
    /// Tunnel errors
    Tunnel,
    /// Unknown/other errors
    Other,
}

impl ErrorCategory {
    /// Whether errors in this category are transient in nature
    #[inline]
    pub const fn is_retriable(self) -> bool {
        matches!(self, Self::Connection | Self::Tunnel)
    }
}

/// Main error type for rivven-tap-mysql
#[derive(Error, Debug)]
#[allow(missing_docs)]
pub enum Error {
    /// Connection failed
    #[error("connection error: {message}")]
    Connection {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Query execution failed
    #[error("query error: {message}")]
    Query {
        message: String,
        sql: Option<String>,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Value conversion failed
    #[error("type conversion error: {message}")]
    TypeConversion { message: String },

    /// A native column type could not be turned into a concrete column type
    #[error("unsupported column type '{type_text}': {message}")]
    UnsupportedType { type_text: String, message: String },

    /// Configuration error
    #[error("configuration error: {message}")]
    Configuration { message: String },

    /// Schema error
    #[error("schema error: {message}")]
    Schema { message: String },

    /// Column not found
    #[error("column not found: {column} in table {table}")]
    ColumnNotFound { table: String, column: String },

    /// Tunnel could not be opened or closed
    #[error("tunnel error: {message}")]
    Tunnel {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Unsupported operation
    #[error("unsupported: {message}")]
    Unsupported { message: String },

    /// Internal error
    #[error("internal error: {message}")]
    Internal { message: String },
}

impl Error {
    /// Get the error category
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Connection { .. } => ErrorCategory::Connection,
            Self::Query { .. } => ErrorCategory::Query,
            Self::TypeConversion { .. } | Self::UnsupportedType { .. } => {
                ErrorCategory::TypeConversion
            }
            Self::Configuration { .. } => ErrorCategory::Configuration,
            Self::Schema { .. } | Self::ColumnNotFound { .. } => ErrorCategory::Schema,
            Self::Tunnel { .. } => ErrorCategory::Tunnel,
            Self::Unsupported { .. } | Self::Internal { .. } => ErrorCategory::Other,
        }
    }

    /// Whether this error is transient in nature
    #[inline]
    pub fn is_retriable(&self) -> bool {
        self.category().is_retriable()
    }

    /// Create a connection error
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
            source: None,
        }
    }

    /// Create a connection error with source
    pub fn connection_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Connection {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a query error
    pub fn query(message: impl Into<String>) -> Self {
        Self::Query {
            message: message.into(),
            sql: None,
            source: None,
        }
    }

    /// Create a query error carrying the failing SQL and driver error
    pub fn query_with_source(
        message: impl Into<String>,
        sql: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Query {
            message: message.into(),
            sql: Some(sql.into()),
            source: Some(Box::new(source)),
        }
    }

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create a type conversion error
    pub fn type_conversion(message: impl Into<String>) -> Self {
        Self::TypeConversion {
            message: message.into(),
        }
    }

    /// Create an unsupported column type error
    pub fn unsupported_type(type_text: impl Into<String>, message: impl Into<String>) -> Self {
        Self::UnsupportedType {
            type_text: type_text.into(),
            message: message.into(),
        }
    }

    /// Create a schema error
    pub fn schema(message: impl Into<String>) -> Self {
        Self::Schema {
            message: message.into(),
        }
    }

    /// Create a tunnel error
    pub fn tunnel(message: impl Into<String>) -> Self {
        Self::Tunnel {
            message: message.into(),
            source: None,
        }
    }

    /// Create an unsupported operation error
    pub fn unsupported(message: impl Into<String>) -> Self {
        Self::Unsupported {
            message: message.into(),
        }
    }

    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// The SQL text attached to a query error, if any
    pub fn sql(&self) -> Option<&str> {
        match self {
            Self::Query { sql, .. } => sql.as_deref(),
            _ => None,
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connection => write!(f, "connection"),
            Self::Query => write!(f, "query"),
            Self::TypeConversion => write!(f, "type_conversion"),
            Self::Configuration => write!(f, "configuration"),
            Self::Schema => write!(f, "schema"),
            Self::Tunnel => write!(f, "tunnel"),
            Self::Other => write!(f, "other"),
        }
    }
}
