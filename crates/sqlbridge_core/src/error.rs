//! Error types for the sqlbridge core.
//!
//! Every failure surfaced to the host engine is a [`BridgeError`]. Errors carry an
//! optional position so the host can point at the offending column or argument.

use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, BridgeError>;

/// Main error type for sqlbridge.
#[derive(Debug, Error)]
pub enum BridgeError {
    /// Settings row-set is missing a column or declares the wrong type.
    #[error("Configuration error: {message}")]
    Configuration {
        /// Human-readable error message.
        message: String,
        /// Name of the offending settings column, if any.
        column: Option<String>,
        /// Index of the offending column in the settings metadata.
        position: Option<usize>,
    },

    /// Query referenced a pool name that was never registered.
    #[error("DataSource {name} not found")]
    PoolNotFound {
        /// Pool name as given by the caller.
        name: String,
    },

    /// External result column has no engine column type.
    #[error("External column type isn't supported: {type_name}")]
    UnsupportedType {
        /// Name of the result column.
        column: String,
        /// Type name as reported by the external driver.
        type_name: String,
        /// Zero-based index of the result column.
        position: usize,
    },

    /// Prepare, execute or fetch failed against the external source.
    #[error("{message}")]
    Execution {
        /// Driver error message.
        message: String,
        /// Additional detail reported by the driver.
        detail: Option<String>,
        /// Driver hint.
        hint: Option<String>,
        /// Position in query text (1-indexed).
        position: Option<usize>,
        /// Vendor error code (e.g., SQLSTATE "42P01").
        code: Option<String>,
        /// Optional underlying error source.
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Could not open or acquire a connection to the external source.
    #[error("Connection error: {message}")]
    Connection {
        /// Human-readable error message.
        message: String,
        /// Optional underlying error source.
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Connection pool exhausted within the configured timeout.
    #[error("Pool timeout: {message}")]
    PoolTimeout {
        /// Human-readable error message.
        message: String,
    },

    /// Unexpected internal error.
    #[error("Internal error: {message}")]
    Internal {
        /// Human-readable error message.
        message: String,
        /// Optional underlying error source.
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

impl BridgeError {
    // ========== Constructors ==========

    /// Create a configuration error not tied to a column.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration { message: message.into(), column: None, position: None }
    }

    /// Create a "column not found" configuration error.
    pub fn column_not_found(column: impl Into<String>) -> Self {
        let column = column.into();
        Self::Configuration {
            message: format!("Invalid column: {column} not found"),
            column: Some(column),
            position: None,
        }
    }

    /// Create a "type mismatch" configuration error.
    pub fn column_type_mismatch(
        column: impl Into<String>,
        position: usize,
        expected: impl std::fmt::Display,
        found: impl std::fmt::Display,
    ) -> Self {
        let column = column.into();
        Self::Configuration {
            message: format!("Invalid column: {column}, expected type {expected} but found {found}"),
            column: Some(column),
            position: Some(position),
        }
    }

    /// Create a pool not found error.
    pub fn pool_not_found(name: impl Into<String>) -> Self {
        Self::PoolNotFound { name: name.into() }
    }

    /// Create an unsupported type error for a result column.
    pub fn unsupported_type(
        column: impl Into<String>,
        type_name: impl Into<String>,
        position: usize,
    ) -> Self {
        Self::UnsupportedType { column: column.into(), type_name: type_name.into(), position }
    }

    /// Create an execution error with just a message.
    pub fn execution(message: impl Into<String>) -> Self {
        Self::Execution {
            message: message.into(),
            detail: None,
            hint: None,
            position: None,
            code: None,
            source: None,
        }
    }

    /// Create an execution error with source.
    pub fn execution_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Execution {
            message: message.into(),
            detail: None,
            hint: None,
            position: None,
            code: None,
            source: Some(Box::new(source)),
        }
    }

    /// Create a new connection error.
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection { message: message.into(), source: None }
    }

    /// Create a new connection error with source.
    pub fn connection_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Connection { message: message.into(), source: Some(Box::new(source)) }
    }

    /// Create a new pool timeout error.
    pub fn pool_timeout(message: impl Into<String>) -> Self {
        Self::PoolTimeout { message: message.into() }
    }

    /// Create a new internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal { message: message.into(), source: None }
    }

    // ========== Methods ==========

    /// Check if this error was raised while validating settings.
    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::Configuration { .. })
    }

    /// Check if this error came from the external source.
    pub fn is_external(&self) -> bool {
        matches!(self, Self::Execution { .. } | Self::Connection { .. } | Self::PoolTimeout { .. })
    }

    /// Get the error category name.
    pub fn category(&self) -> &'static str {
        match self {
            Self::Configuration { .. } => "Configuration",
            Self::PoolNotFound { .. } => "Pool",
            Self::UnsupportedType { .. } => "Type",
            Self::Execution { .. } => "Execution",
            Self::Connection { .. } => "Connection",
            Self::PoolTimeout { .. } => "Pool",
            Self::Internal { .. } => "Internal",
        }
    }

    /// Get actionable hint for the user.
    pub fn hint(&self) -> Option<&str> {
        match self {
            Self::Configuration { .. } => {
                Some("Settings need string columns name, url, user and password")
            }
            Self::PoolNotFound { .. } => Some("Register the pool with pool_init first"),
            Self::UnsupportedType { .. } => Some("Cast the column to a supported type in the query"),
            Self::Execution { hint, .. } => hint.as_deref(),
            Self::Connection { .. } => Some("Check that the database server is running"),
            Self::PoolTimeout { .. } => Some("Increase max_pool_size or close idle cursors"),
            Self::Internal { .. } => Some("Please report this issue"),
        }
    }

    /// Get the vendor error code (if applicable).
    pub fn code(&self) -> Option<&str> {
        match self {
            Self::Execution { code, .. } => code.as_deref(),
            _ => None,
        }
    }

    /// Get the position the host should report (column index or query offset).
    pub fn position(&self) -> Option<usize> {
        match self {
            Self::Configuration { position, .. } => *position,
            Self::UnsupportedType { position, .. } => Some(*position),
            Self::Execution { position, .. } => *position,
            _ => None,
        }
    }

    /// Convert to user-displayable error info.
    pub fn to_error_info(&self) -> ErrorInfo {
        let error_type = format!("{} Error", self.category());
        let message = self.to_string();
        let hint = self.hint().map(String::from);

        let technical_detail = match self {
            Self::Execution { detail, code, position, .. } => {
                let mut parts = Vec::new();
                if let Some(code) = code {
                    parts.push(format!("Code: {code}"));
                }
                if let Some(pos) = position {
                    parts.push(format!("Position: {pos}"));
                }
                if let Some(detail) = detail {
                    parts.push(format!("Detail: {detail}"));
                }
                if parts.is_empty() {
                    None
                } else {
                    Some(parts.join("\n"))
                }
            }
            Self::Configuration { column: Some(column), position, .. } => Some(match position {
                Some(pos) => format!("Column: {column} (index {pos})"),
                None => format!("Column: {column}"),
            }),
            Self::UnsupportedType { column, position, .. } => {
                Some(format!("Column: {column} (index {position})"))
            }
            _ => None,
        };

        ErrorInfo { error_type, message, hint, technical_detail }
    }
}

/// User-displayable error information.
#[derive(Debug, Clone)]
pub struct ErrorInfo {
    /// Category name (e.g., "Configuration Error").
    pub error_type: String,
    /// User-friendly message.
    pub message: String,
    /// Actionable suggestion.
    pub hint: Option<String>,
    /// Technical detail for "Show Details" expansion.
    pub technical_detail: Option<String>,
}

// ========== Error Conversions ==========

/// Convert from tokio_postgres::Error to BridgeError.
impl From<tokio_postgres::Error> for BridgeError {
    fn from(err: tokio_postgres::Error) -> Self {
        if let Some(db_err) = err.as_db_error() {
            let message = db_err.message().to_string();
            let detail = db_err.detail().map(String::from);
            let hint = db_err.hint().map(String::from);
            let position = db_err.position().and_then(|p| match p {
                tokio_postgres::error::ErrorPosition::Original(pos) => Some(*pos as usize),
                tokio_postgres::error::ErrorPosition::Internal { .. } => None,
            });
            let code = db_err.code().code().to_string();

            // Connection exceptions (08xxx) and auth failures (28xxx)
            if code.starts_with("08") || code.starts_with("28") {
                return BridgeError::Connection { message, source: Some(Box::new(err)) };
            }
            return BridgeError::Execution {
                message,
                detail,
                hint,
                position,
                code: Some(code),
                source: None,
            };
        }

        if err.is_closed() {
            return BridgeError::Connection {
                message: "Connection closed".to_string(),
                source: Some(Box::new(err)),
            };
        }

        BridgeError::Execution {
            message: err.to_string(),
            detail: None,
            hint: None,
            position: None,
            code: None,
            source: Some(Box::new(err)),
        }
    }
}

/// Convert from rusqlite::Error to BridgeError.
impl From<rusqlite::Error> for BridgeError {
    fn from(err: rusqlite::Error) -> Self {
        let code = match &err {
            rusqlite::Error::SqliteFailure(ffi, _) => Some(format!("{:?}", ffi.code)),
            _ => None,
        };
        BridgeError::Execution {
            message: err.to_string(),
            detail: None,
            hint: None,
            position: None,
            code,
            source: Some(Box::new(err)),
        }
    }
}

/// Convert from r2d2::Error (checkout timeout) to BridgeError.
impl From<r2d2::Error> for BridgeError {
    fn from(err: r2d2::Error) -> Self {
        BridgeError::PoolTimeout { message: err.to_string() }
    }
}

/// Convert from deadpool_postgres::PoolError to BridgeError.
impl From<deadpool_postgres::PoolError> for BridgeError {
    fn from(err: deadpool_postgres::PoolError) -> Self {
        match err {
            deadpool_postgres::PoolError::Timeout(kind) => {
                BridgeError::pool_timeout(format!("Pool exhausted after timeout: {kind:?}"))
            }
            deadpool_postgres::PoolError::Backend(e) => BridgeError::from(e),
            other => BridgeError::connection(format!("Failed to acquire connection: {other}")),
        }
    }
}

/// Convert from deadpool_postgres::BuildError to BridgeError.
impl From<deadpool_postgres::BuildError> for BridgeError {
    fn from(err: deadpool_postgres::BuildError) -> Self {
        BridgeError::connection(format!("Failed to create pool: {err}"))
    }
}

/// Convert from std::io::Error to BridgeError.
impl From<std::io::Error> for BridgeError {
    fn from(err: std::io::Error) -> Self {
        BridgeError::Internal { message: err.to_string(), source: Some(Box::new(err)) }
    }
}

/// Convert from serde_json::Error to BridgeError.
impl From<serde_json::Error> for BridgeError {
    fn from(err: serde_json::Error) -> Self {
        BridgeError::Configuration {
            message: format!("JSON error: {err}"),
            column: None,
            position: None,
        }
    }
}
