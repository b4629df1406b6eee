//! Error types for db_tools

use thiserror::Error;

/// Result type for db_tools operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for db_tools
#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Database error: {0}")]
    DatabaseError(String),

    /// A column, index or foreign-key definition could not be parsed.
    #[error("Parse error: {message} in '{fragment}'")]
    ParseError { fragment: String, message: String },

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Schema introspection error: {0}")]
    IntrospectionError(String),

    #[error("Migration error: {0}")]
    MigrationError(String),

    #[error("Invalid table pattern: {0}")]
    PatternError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("SQLx error: {0}")]
    SqlxError(#[from] sqlx::Error),
}

impl Error {
    /// Build a parse error for the given raw definition fragment
    pub fn parse(fragment: impl Into<String>, message: impl Into<String>) -> Self {
        Error::ParseError {
            fragment: fragment.into(),
            message: message.into(),
        }
    }

    /// Prefix the error message with the table (and member) it belongs to
    pub fn in_context(self, context: &str) -> Self {
        match self {
            Error::ParseError { fragment, message } => Error::ParseError {
                fragment,
                message: format!("{}: {}", context, message),
            },
            Error::ValidationError(msg) => Error::ValidationError(format!("{}: {}", context, msg)),
            Error::IntrospectionError(msg) => {
                Error::IntrospectionError(format!("{}: {}", context, msg))
            }
            Error::SqlxError(e) => Error::IntrospectionError(format!("{}: {}", context, e)),
            other => other,
        }
    }
}

/// Convert Serde JSON errors to db_tools errors
impl From<serde_json::Error> for Error {
    fn from(error: serde_json::Error) -> Self {
        Error::SerializationError(error.to_string())
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(error: serde_yaml::Error) -> Self {
        Error::SerializationError(error.to_string())
    }
}

/// Convert TOML deserialization errors to db_tools errors
impl From<toml::de::Error> for Error {
    fn from(error: toml::de::Error) -> Self {
        Error::ConfigError(error.to_string())
    }
}

impl From<regex::Error> for Error {
    fn from(error: regex::Error) -> Self {
        Error::PatternError(error.to_string())
    }
}
