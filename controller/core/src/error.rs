use std::fmt;

pub type Result<T, E = Error> = std::result::Result<T, E>;

pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("{kind} {namespace}/{name} not found")]
    NotFound {
        kind: String,
        namespace: String,
        name: String,
    },

    #[error("operation '{operation}' for user '{user}' is not allowed for ShortLink '{name}'")]
    NotAllowed {
        operation: Operation,
        user: String,
        name: String,
    },

    #[error("unauthenticated: {0}")]
    Unauthenticated(String),

    #[error("conflicting write to {kind} {namespace}/{name}")]
    Conflict {
        kind: String,
        namespace: String,
        name: String,
    },

    #[error("invalid {0}")]
    Validation(String),

    #[error("store request failed: {0}")]
    Store(#[source] BoxError),

    #[error("request deadline elapsed")]
    Cancelled,
}

/// The operations gated by the ownership predicate.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Operation {
    Get,
    Update,
    Delete,
    Share,
    Revoke,
}

// === impl Error ===

impl Error {
    pub fn not_allowed(operation: Operation, user: impl Into<String>, name: impl Into<String>) -> Self {
        Self::NotAllowed {
            operation,
            user: user.into(),
            name: name.into(),
        }
    }

    pub fn store(error: impl Into<BoxError>) -> Self {
        Self::Store(error.into())
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }

    pub fn is_not_allowed(&self) -> bool {
        matches!(self, Self::NotAllowed { .. })
    }

    /// Conflicts, store failures and elapsed deadlines may succeed when the
    /// whole operation is retried; everything else is terminal.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Conflict { .. } | Self::Store(_) | Self::Cancelled)
    }
}

impl From<urlshortener_k8s_api::shortlink::InvalidSpec> for Error {
    fn from(error: urlshortener_k8s_api::shortlink::InvalidSpec) -> Self {
        Self::Validation(format!("ShortLink spec: {error}"))
    }
}

// === impl Operation ===

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Get => "get",
            Self::Update => "update",
            Self::Delete => "delete",
            Self::Share => "share",
            Self::Revoke => "revoke",
        })
    }
}
