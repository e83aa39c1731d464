//! Error types for the operator.

/// The result type used throughout assembly-operator.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while reconciling an Assembly.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A call to LM failed.
    #[error("{context}: {source}")]
    Lm {
        /// What the operator was doing when the call failed.
        context: String,
        /// The LM error.
        #[source]
        source: assembly_lm::Error,
    },

    /// LM reported a value the operator does not understand.
    #[error("unexpected {field} reported by LM: {value}")]
    UnexpectedRemoteValue {
        /// The field carrying the value.
        field: &'static str,
        /// The value reported.
        value: String,
    },

    /// The resource declares something the operator cannot act on.
    #[error("invalid resource: {message}")]
    InvalidResource {
        /// Description of the problem.
        message: String,
    },

    /// The resource no longer exists in the store.
    #[error("resource not found: {key}")]
    ResourceNotFound {
        /// `namespace/name` of the resource.
        key: String,
    },

    /// The store rejected a write because the resource changed concurrently.
    #[error("conflicting update to {key}: {message}")]
    Conflict {
        /// `namespace/name` of the resource.
        key: String,
        /// Message returned by the store.
        message: String,
    },

    /// A resource store operation failed.
    #[error("store error: {message}")]
    Store {
        /// Description of the failure.
        message: String,
        /// The underlying cause, if any.
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Operator settings are invalid.
    #[error("configuration error: {0}")]
    Configuration(String),
}

impl Error {
    /// Wraps an LM error with the action that was attempted.
    #[must_use]
    pub fn lm(context: impl Into<String>, source: assembly_lm::Error) -> Self {
        Self::Lm {
            context: context.into(),
            source,
        }
    }

    /// Creates a new store error.
    #[must_use]
    pub fn store(message: impl Into<String>) -> Self {
        Self::Store {
            message: message.into(),
            source: None,
        }
    }

    /// Creates a new store error with a source.
    #[must_use]
    pub fn store_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Store {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Creates a new invalid-resource error.
    #[must_use]
    pub fn invalid_resource(message: impl Into<String>) -> Self {
        Self::InvalidResource {
            message: message.into(),
        }
    }

    /// Returns true when the resource is gone from the store.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::ResourceNotFound { .. })
    }

    /// Returns true when the error came from the resource store.
    #[must_use]
    pub const fn is_store_error(&self) -> bool {
        matches!(
            self,
            Self::ResourceNotFound { .. } | Self::Conflict { .. } | Self::Store { .. }
        )
    }
}
