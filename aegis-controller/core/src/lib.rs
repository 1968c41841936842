#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

mod error;
mod kind;
pub mod metadata;
pub mod token;

pub use self::{
    error::{BoxError, Error, Result},
    kind::{ProviderKind, UnknownProviderKind},
    metadata::Metadata,
};

/// The API group shared by every aegis resource.
pub const API_GROUP: &str = "aegis.aegisproxy.io";

/// Names the Kubernetes identity (a service account) that an external
/// identity is issued for.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct IdentityRef {
    pub namespace: String,
    pub name: String,
}

/// A backend capable of issuing workload identities.
///
/// Implementations do not retry: every remote failure is returned to the
/// caller, which owns the retry policy. `create_identity` must be safe to
/// call more than once for the same identity.
#[async_trait::async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Ensures the external identity exists and returns the metadata the
    /// backend assigned to it.
    async fn create_identity(&self, identity: &IdentityRef) -> Result<Metadata>;

    async fn get_identity(&self, identity: &IdentityRef) -> Result<bool>;

    /// Removes every external object `create_identity` produced. `metadata`
    /// is whatever was recorded on the identity's status.
    async fn delete_identity(&self, identity: &IdentityRef, metadata: &Metadata) -> Result<()>;

    fn name(&self) -> ProviderKind;
}

// === impl IdentityRef ===

impl IdentityRef {
    pub fn new(namespace: impl ToString, name: impl ToString) -> Self {
        Self {
            namespace: namespace.to_string(),
            name: name.to_string(),
        }
    }

    /// The subject claim carried by the service account's tokens.
    pub fn subject(&self) -> String {
        format!("system:serviceaccount:{}:{}", self.namespace, self.name)
    }
}

impl std::fmt::Display for IdentityRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}
