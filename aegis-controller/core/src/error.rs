use crate::ProviderKind;

pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Failures shared by adapters, the resolver, the controllers, and the
/// admission engine.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The request itself is malformed and retrying will not help.
    #[error("invalid: {0}")]
    Validation(String),

    #[error("{kind} {namespace}/{name} not found")]
    NotFound {
        kind: String,
        namespace: String,
        name: String,
    },

    /// A write raced with another writer.
    #[error("conflict: {0}")]
    Conflict(String),

    /// A remote system failed or returned something unexpected.
    #[error("{context}: {source}")]
    External {
        context: String,
        #[source]
        source: BoxError,
    },

    #[error("{operation} is not implemented by the {provider} provider")]
    Unimplemented {
        operation: &'static str,
        provider: ProviderKind,
    },
}

// === impl Error ===

impl Error {
    pub fn not_found(kind: impl ToString, namespace: impl ToString, name: impl ToString) -> Self {
        Self::NotFound {
            kind: kind.to_string(),
            namespace: namespace.to_string(),
            name: name.to_string(),
        }
    }

    pub fn external(context: impl ToString, source: impl Into<BoxError>) -> Self {
        Self::External {
            context: context.to_string(),
            source: source.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}
