#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

//! Adapters that issue workload identities from external backends.

pub mod aws;
pub mod azure;
mod http;
pub mod kubernetes;
pub mod vault;

pub use self::{
    aws::AwsAdapter, azure::AzureAdapter, kubernetes::KubernetesAdapter, vault::VaultAdapter,
};
pub use aegis_controller_core::{Error, IdentityProvider, IdentityRef, Metadata, Result};

/// Mints tokens for a service account through the cluster's TokenRequest
/// API.
#[async_trait::async_trait]
pub trait ServiceAccountTokens: Send + Sync {
    async fn request_token(
        &self,
        service_account: &IdentityRef,
        audience: &str,
        expiration_seconds: i64,
    ) -> Result<String>;
}
