//! Error taxonomy for the protocol core.
//!
//! Replaces the exception-class hierarchy of the system this crate is
//! modeled on with a single enum matched once at the session boundary:
//! every variant already carries the MySQL error code and SQL state needed
//! to build an ERR packet, so the session never has to re-derive them.

use thiserror::Error;

/// Default message table for MySQL error codes, used as a fallback when a
/// `QueryHandler` implementation returns an error with an empty message.
pub const MYSQL_ERROR_MESSAGES: &[(u16, &str)] = &[
    (1040, "Too many connections"),
    (1045, "Access denied for user"),
    (1047, "Unknown command"),
    (1049, "Unknown database"),
    (1064, "SQL syntax error"),
    (1105, "Internal error"),
    (1146, "Table doesn't exist"),
    (1205, "Lock wait timeout exceeded"),
    (1213, "Deadlock found when trying to get lock"),
    (1251, "Client does not support authentication protocol"),
];

pub fn default_message(code: u16) -> &'static str {
    MYSQL_ERROR_MESSAGES
        .iter()
        .find(|(c, _)| *c == code)
        .map(|(_, msg)| *msg)
        .unwrap_or("Unknown MySQL error")
}

/// Error surfaced while driving one connection's protocol session.
///
/// The MySQL state codes match the convention the wire protocol uses: a
/// `#` followed by 5 ASCII characters. `HY000` is the generic fallback;
/// `42000` marks syntax-category errors.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("protocol error: {message}")]
    Protocol { code: u16, message: String },

    #[error("authentication failed for user '{username}'")]
    Authentication { code: u16, username: String },

    #[error("command error: {message}")]
    Command { code: u16, message: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl SessionError {
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            code: 1105,
            message: message.into(),
        }
    }

    pub fn authentication(username: impl Into<String>) -> Self {
        Self::Authentication {
            code: 1045,
            username: username.into(),
        }
    }

    pub fn command(code: u16, message: impl Into<String>) -> Self {
        Self::Command {
            code,
            message: message.into(),
        }
    }

    /// The MySQL error code this should surface to the client as an ERR
    /// packet, or `None` when the error means the socket is no longer
    /// writable (plain I/O failure).
    pub fn mysql_code(&self) -> Option<u16> {
        match self {
            Self::Protocol { code, .. } => Some(*code),
            Self::Authentication { code, .. } => Some(*code),
            Self::Command { code, .. } => Some(*code),
            Self::Io(_) => None,
        }
    }

    pub fn sql_state(&self) -> &'static [u8; 5] {
        match self {
            Self::Command { code: 1064, .. } => b"42000",
            _ => b"HY000",
        }
    }

    pub fn client_message(&self) -> String {
        match self {
            Self::Protocol { message, .. } => message.clone(),
            Self::Authentication { username, .. } => {
                format!("Access denied for user '{username}'")
            }
            Self::Command { message, .. } => message.clone(),
            Self::Io(e) => e.to_string(),
        }
    }
}

/// Fatal at startup: the server never enters its listener loop.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("configuration file not found: {0}")]
    NotFound(String),

    #[error("failed to read configuration file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse configuration file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn authentication_error_formats_client_message() {
        let err = SessionError::authentication("root");
        assert_eq!(err.mysql_code(), Some(1045));
        assert_eq!(err.client_message(), "Access denied for user 'root'");
    }

    #[test]
    fn command_error_uses_syntax_sql_state_for_1064() {
        let err = SessionError::command(1064, "Empty command packet");
        assert_eq!(err.sql_state(), b"42000");
    }

    #[test]
    fn other_errors_default_to_hy000() {
        let err = SessionError::command(1047, "Unknown command: 153");
        assert_eq!(err.sql_state(), b"HY000");
    }

    #[test]
    fn default_message_falls_back_for_unknown_code() {
        assert_eq!(default_message(1045), "Access denied for user");
        assert_eq!(default_message(9999), "Unknown MySQL error");
    }
}
