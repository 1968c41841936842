use aegis_controller_core::{IdentityProvider, IdentityRef, Metadata, ProviderKind, Result};

/// Service accounts are already identities in the cluster's own token
/// issuer, so nothing external needs to exist.
#[derive(Clone, Debug, Default)]
pub struct KubernetesAdapter(());

#[async_trait::async_trait]
impl IdentityProvider for KubernetesAdapter {
    async fn create_identity(&self, _: &IdentityRef) -> Result<Metadata> {
        Ok(Metadata::new())
    }

    async fn get_identity(&self, _: &IdentityRef) -> Result<bool> {
        Ok(true)
    }

    async fn delete_identity(&self, _: &IdentityRef, _: &Metadata) -> Result<()> {
        Ok(())
    }

    fn name(&self) -> ProviderKind {
        ProviderKind::Kubernetes
    }
}
