use crate::{
    k8s::{AnyProvider, AwsProvider, AzureProvider, HashicorpVaultProvider, KubernetesProvider},
    store::Store,
};
use aegis_controller_core::{Error, IdentityProvider, ProviderKind, Result};
use aegis_controller_identity::{
    AwsAdapter, AzureAdapter, KubernetesAdapter, ServiceAccountTokens, VaultAdapter,
};
use std::{path::PathBuf, sync::Arc};
use tracing::debug;

/// Binds a provider name to the adapter for whatever kind of provider it
/// names.
#[async_trait::async_trait]
pub trait Resolve: Send + Sync + 'static {
    async fn resolve(&self, namespace: &str, provider: &str) -> Result<Box<dyn IdentityProvider>>;
}

/// Settings the adapters need beyond their provider's spec.
#[derive(Clone)]
pub struct AdapterConfig {
    pub http: reqwest::Client,
    pub vault_token: PathBuf,
    pub azure_token: PathBuf,
    pub aws_token: PathBuf,
    pub tokens: Arc<dyn ServiceAccountTokens>,
}

#[derive(Clone)]
pub struct Resolver<S> {
    store: S,
    config: AdapterConfig,
}

/// Looks up a provider by bare name, trying each kind in
/// [`ProviderKind::PROBE_ORDER`]. The first kind with an object of that name
/// wins.
pub async fn find_provider<S: Store>(store: &S, namespace: &str, name: &str) -> Result<AnyProvider> {
    for kind in ProviderKind::PROBE_ORDER {
        if let Some(provider) = get_provider(store, namespace, kind, name).await? {
            debug!(%namespace, %name, %kind, "Resolved provider");
            return Ok(provider);
        }
    }
    Err(Error::not_found("provider", namespace, name))
}

/// Fetches a provider of a known kind.
pub async fn get_provider<S: Store>(
    store: &S,
    namespace: &str,
    kind: ProviderKind,
    name: &str,
) -> Result<Option<AnyProvider>> {
    let provider = match kind {
        ProviderKind::HashicorpVault => store
            .get_opt::<HashicorpVaultProvider>(namespace, name)
            .await?
            .map(Into::into),
        ProviderKind::Azure => store
            .get_opt::<AzureProvider>(namespace, name)
            .await?
            .map(Into::into),
        ProviderKind::Aws => store
            .get_opt::<AwsProvider>(namespace, name)
            .await?
            .map(Into::into),
        ProviderKind::Kubernetes => store
            .get_opt::<KubernetesProvider>(namespace, name)
            .await?
            .map(Into::into),
    };
    Ok(provider)
}

// === impl AdapterConfig ===

impl AdapterConfig {
    pub fn adapter(&self, provider: AnyProvider) -> Box<dyn IdentityProvider> {
        match provider {
            AnyProvider::HashicorpVault(p) => Box::new(VaultAdapter::new(
                self.http.clone(),
                p.spec.vault_address,
                self.vault_token.clone(),
            )),
            AnyProvider::Azure(p) => Box::new(AzureAdapter::new(
                self.http.clone(),
                p.spec.tenant_id,
                p.spec.client_id,
                self.azure_token.clone(),
            )),
            AnyProvider::Aws(p) => Box::new(AwsAdapter::new(
                p.spec.region,
                p.spec.identity_pool_id,
                p.spec.role_arn,
                self.aws_token.clone(),
                self.tokens.clone(),
            )),
            AnyProvider::Kubernetes(_) => Box::new(KubernetesAdapter::default()),
        }
    }
}

// === impl Resolver ===

impl<S> Resolver<S> {
    pub fn new(store: S, config: AdapterConfig) -> Self {
        Self { store, config }
    }
}

#[async_trait::async_trait]
impl<S: Store> Resolve for Resolver<S> {
    async fn resolve(&self, namespace: &str, provider: &str) -> Result<Box<dyn IdentityProvider>> {
        let provider = find_provider(&self.store, namespace, provider).await?;
        Ok(self.config.adapter(provider))
    }
}
