//! Error types for LM calls.

/// The result type used throughout assembly-lm.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors returned by LM calls.
///
/// Absence of an assembly or process is not an error; read operations report
/// it as `Ok(None)`.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The request could not be sent or the connection failed.
    #[error("{operation} request failed: {source}")]
    Request {
        /// The operation that was attempted.
        operation: &'static str,
        /// The transport error.
        #[source]
        source: reqwest::Error,
    },

    /// LM answered with a status code the operation does not accept.
    #[error("{operation} request returned an unexpected result -> StatusCode: {status}, Body: {body}")]
    UnexpectedStatus {
        /// The operation that was attempted, including its subject.
        operation: String,
        /// HTTP status code returned by LM.
        status: u16,
        /// Response body returned by LM.
        body: String,
    },

    /// No access token could be obtained.
    #[error("authentication failed: {message}")]
    Authentication {
        /// Description of the failure.
        message: String,
        /// The underlying cause, if any.
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// An intent was accepted but LM did not say which process it started.
    #[error("{operation} response did not include a process Location header")]
    MissingLocation {
        /// The intent that was submitted.
        operation: &'static str,
    },

    /// A response body could not be decoded.
    #[error("failed to decode {operation} response: {message}")]
    Decode {
        /// The operation whose response was malformed.
        operation: String,
        /// Description of the decode failure.
        message: String,
    },

    /// The client configuration is invalid.
    #[error("configuration error: {0}")]
    Configuration(String),
}

impl Error {
    /// Creates an authentication error without an underlying cause.
    #[must_use]
    pub fn authentication(message: impl Into<String>) -> Self {
        Self::Authentication {
            message: message.into(),
            source: None,
        }
    }

    /// Creates an authentication error with an underlying cause.
    #[must_use]
    pub fn authentication_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Authentication {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Creates a configuration error.
    #[must_use]
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    /// Returns the HTTP status code LM answered with, if the error carries one.
    #[must_use]
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::UnexpectedStatus { status, .. } => Some(*status),
            Self::Request { source, .. } => source.status().map(|s| s.as_u16()),
            _ => None,
        }
    }

    /// Returns true when LM rejected an intent because it conflicts with the
    /// current remote state (for example a duplicate assembly name).
    #[must_use]
    pub fn is_conflict(&self) -> bool {
        self.status_code() == Some(409)
    }

    /// Returns true for authentication failures.
    #[must_use]
    pub const fn is_authentication(&self) -> bool {
        matches!(self, Self::Authentication { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as StdError;

    #[test]
    fn unexpected_status_display_includes_code_and_body() {
        let err = Error::UnexpectedStatus {
            operation: "Create Assembly".into(),
            status: 409,
            body: "name already in use".into(),
        };
        let msg = err.to_string();
        assert!(msg.starts_with("Create Assembly request returned an unexpected result"));
        assert!(msg.contains("StatusCode: 409"));
        assert!(msg.contains("Body: name already in use"));
        assert!(err.is_conflict());
    }

    #[test]
    fn authentication_error_keeps_source() {
        let source = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        let err = Error::authentication_with_source("token request failed", source);
        assert!(err.is_authentication());
        assert!(StdError::source(&err).is_some());
        assert_eq!(err.status_code(), None);
    }

    #[test]
    fn non_conflict_status_is_not_conflict() {
        let err = Error::UnexpectedStatus {
            operation: "Delete Assembly".into(),
            status: 500,
            body: String::new(),
        };
        assert!(!err.is_conflict());
        assert_eq!(err.status_code(), Some(500));
    }
}
