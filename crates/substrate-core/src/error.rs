//! Error types for substrate-core
//!
//! Every variant maps to a machine-readable code and a semantic exit code so
//! that agents parsing a failure can decide their next step without scraping
//! the message text.

use thiserror::Error;

/// Core error type for substrate operations
#[derive(Debug, Clone, Error)]
pub enum Error {
    /// No session, lock, claim or zone exists where one was expected
    #[error("Not found: {0}")]
    NotFound(String),

    /// Caller is not the current holder of the resource
    #[error("'{resource}' is held by {holder}, not {agent_id}")]
    NotOwner {
        /// Lock path or claim key
        resource: String,
        /// Current holder
        holder: String,
        /// Agent that attempted the operation
        agent_id: String,
    },

    /// Agent already holds the maximum number of live claims
    #[error("Agent {agent_id} already holds {held} of {max} allowed claims")]
    QuotaExceeded {
        /// Agent that attempted to claim
        agent_id: String,
        /// Live claims currently held
        held: u32,
        /// Configured per-agent limit
        max: u32,
    },

    /// Another agent already holds the target
    #[error("'{resource}' is already held by {holder}")]
    Conflict {
        /// Lock path, claim key or zone path
        resource: String,
        /// Agent currently holding it
        holder: String,
    },

    /// A policy check blocked a mutation (only raised when enforcement is on)
    #[error("Blocked by policy: {0}")]
    Blocked(String),

    /// Missing or malformed request field
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Admin gate rejected the request
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// Invalid configuration value
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Database errors
    #[error("Database error: {0}")]
    DatabaseError(String),

    /// Stored data could not be decoded
    #[error("Parse error: {0}")]
    ParseError(String),

    /// Filesystem errors
    #[error("IO error: {0}")]
    IoError(String),
}

impl Error {
    /// Create an invalid-input error for a missing or blank field.
    pub fn missing_field(field: &str) -> Self {
        Self::InvalidInput(format!("'{field}' is required and cannot be blank"))
    }

    /// Machine-readable error code (`SCREAMING_SNAKE_CASE`).
    pub const fn code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "NOT_FOUND",
            Self::NotOwner { .. } => "NOT_OWNER",
            Self::QuotaExceeded { .. } => "QUOTA_EXCEEDED",
            Self::Conflict { .. } => "CONFLICT",
            Self::Blocked(_) => "BLOCKED",
            Self::InvalidInput(_) => "INVALID_INPUT",
            Self::Forbidden(_) => "FORBIDDEN",
            Self::InvalidConfig(_) => "INVALID_CONFIG",
            Self::DatabaseError(_) => "DATABASE_ERROR",
            Self::ParseError(_) => "PARSE_ERROR",
            Self::IoError(_) => "IO_ERROR",
        }
    }

    /// Returns the appropriate exit code for this error type.
    ///
    /// Exit code scheme:
    /// - 1: Caller error (invalid input, bad configuration, forbidden)
    /// - 2: System error (IO)
    /// - 3: Not found
    /// - 4: Contention or invalid state (conflict, ownership, quota, database)
    pub const fn exit_code(&self) -> i32 {
        match self {
            Self::InvalidInput(_) | Self::InvalidConfig(_) | Self::Forbidden(_) => 1,
            Self::IoError(_) => 2,
            Self::NotFound(_) => 3,
            Self::NotOwner { .. }
            | Self::QuotaExceeded { .. }
            | Self::Conflict { .. }
            | Self::Blocked(_)
            | Self::DatabaseError(_)
            | Self::ParseError(_) => 4,
        }
    }

    /// Actionable next step for the caller, when one exists.
    pub fn suggestion(&self) -> Option<String> {
        match self {
            Self::NotFound(_) => Some(
                "Call session.init first, or list current state with lock.list / claim.list"
                    .to_string(),
            ),
            Self::NotOwner { holder, .. } => Some(format!(
                "Only {holder} can release this; coordinate with {holder} or wait for it to go stale"
            )),
            Self::QuotaExceeded { .. } => Some(
                "Release a claim you no longer need with claim.release before claiming more"
                    .to_string(),
            ),
            Self::Conflict { holder, .. } => Some(format!(
                "Wait for {holder} to release it, or pick different work"
            )),
            Self::Forbidden(_) => Some("Pass the configured adminKey".to_string()),
            Self::Blocked(_)
            | Self::InvalidInput(_)
            | Self::InvalidConfig(_)
            | Self::DatabaseError(_)
            | Self::ParseError(_)
            | Self::IoError(_) => None,
        }
    }
}

impl From<sqlx::Error> for Error {
    fn from(err: sqlx::Error) -> Self {
        Self::DatabaseError(err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::ParseError(err.to_string())
    }
}

impl From<toml::de::Error> for Error {
    fn from(err: toml::de::Error) -> Self {
        Self::ParseError(format!("Failed to parse config: {err}"))
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Self::IoError(err.to_string())
    }
}

/// Result type alias for substrate-core operations
pub type Result<T> = std::result::Result<T, Error>;

/// Reject blank required fields, returning the trimmed value.
pub fn require<'a>(field: &str, value: &'a str) -> Result<&'a str> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        Err(Error::missing_field(field))
    } else {
        Ok(trimmed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_owner_display_names_holder() {
        let err = Error::NotOwner {
            resource: "src/x.rs".into(),
            holder: "agent-a".into(),
            agent_id: "agent-b".into(),
        };
        assert_eq!(err.to_string(), "'src/x.rs' is held by agent-a, not agent-b");
        assert_eq!(err.code(), "NOT_OWNER");
        assert!(err.suggestion().is_some_and(|s| s.contains("agent-a")));
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(Error::missing_field("agentId").exit_code(), 1);
        assert_eq!(Error::IoError("disk".into()).exit_code(), 2);
        assert_eq!(Error::NotFound("session".into()).exit_code(), 3);
        assert_eq!(
            Error::QuotaExceeded {
                agent_id: "a".into(),
                held: 3,
                max: 3
            }
            .exit_code(),
            4
        );
    }

    #[test]
    fn test_from_io_error() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err = Error::from(io_err);
        assert!(matches!(err, Error::IoError(_)));
    }
}
