//! Drives each provider kind. A provider holds a finalizer for as long as any
//! identity it issued still exists.

use super::{CHILDREN_REQUEUE, FINALIZER_REQUEUE, RESYNC};
use crate::{
    k8s::{
        condition::Condition, finalizer, labels, Identity, KubernetesProvider,
        ProviderResource, ResourceExt,
    },
    store::Store,
};
use aegis_controller_core::{token, Error, Result};
use kube::runtime::controller::Action;
use std::{path::PathBuf, sync::Arc};
use tracing::{debug, info, instrument};

pub struct Context<S> {
    pub store: S,

    /// The controller's own projected service-account token.
    pub kubernetes_token: PathBuf,
}

/// Computes the kind-specific part of a provider's status.
#[async_trait::async_trait]
pub trait Observe: Send {
    async fn observe(&mut self, _token: &std::path::Path) -> Result<()> {
        Ok(())
    }
}

impl Observe for crate::k8s::HashicorpVaultProvider {}
impl Observe for crate::k8s::AzureProvider {}
impl Observe for crate::k8s::AwsProvider {}

#[async_trait::async_trait]
impl Observe for KubernetesProvider {
    async fn observe(&mut self, token: &std::path::Path) -> Result<()> {
        let issuer = token::read_issuer(token).await?;
        self.status.get_or_insert_with(Default::default).issuer = Some(issuer);
        Ok(())
    }
}

#[instrument(skip_all, fields(
    kind = %K::KIND,
    namespace = %provider.namespace().unwrap_or_default(),
    name = %provider.name_any(),
))]
pub async fn reconcile<K, S>(provider: Arc<K>, ctx: Arc<Context<S>>) -> Result<Action>
where
    K: ProviderResource + Observe,
    S: Store,
{
    let namespace = provider
        .namespace()
        .ok_or_else(|| Error::Validation("provider must be namespaced".to_string()))?;
    let mut provider = K::clone(&provider);

    if finalizer::is_deleting(&provider) {
        return cleanup(provider, &namespace, &ctx.store).await;
    }

    if provider.conditions().is_empty() {
        let generation = provider.meta().generation;
        provider.set_condition(Condition::reconciling(generation));
        ctx.store.update_status(&provider).await?;
        provider = ctx.store.get(&namespace, &provider.name_any()).await?;
    }

    if finalizer::add(&mut provider, finalizer::PROVIDER) {
        ctx.store.update(&provider).await?;
        debug!("Added finalizer");
        return Ok(Action::requeue(FINALIZER_REQUEUE));
    }

    let before = serde_json::to_value(&provider).ok();
    provider.observe(&ctx.kubernetes_token).await?;
    let generation = provider.meta().generation;
    provider.set_condition(Condition::reconciled(
        format!("{} reconciled", K::kind(&())),
        generation,
    ));
    if serde_json::to_value(&provider).ok() != before {
        ctx.store.update_status(&provider).await?;
    }
    Ok(Action::requeue(RESYNC))
}

async fn cleanup<K: ProviderResource, S: Store>(
    mut provider: K,
    namespace: &str,
    store: &S,
) -> Result<Action> {
    if !finalizer::contains(&provider, finalizer::PROVIDER) {
        return Ok(Action::await_change());
    }

    let selector = labels::provider_selector(&provider.name_any());
    let children = store.list::<Identity>(namespace, &selector).await?;
    for child in &children {
        match store.delete::<Identity>(namespace, &child.name_any()).await {
            Ok(()) => debug!(identity = %child.name_any(), "Deleted identity"),
            Err(error) if error.is_not_found() => {}
            Err(error) => return Err(error.into()),
        }
    }

    // Identities release their own finalizers once the backend identity is
    // gone, so the provider must outlive every one of them.
    let mut remaining = 0;
    for child in &children {
        if store
            .get_opt::<Identity>(namespace, &child.name_any())
            .await?
            .is_some()
        {
            remaining += 1;
        }
    }
    if remaining > 0 {
        debug!(remaining, "Waiting for identities to be deleted");
        return Ok(Action::requeue(CHILDREN_REQUEUE));
    }

    finalizer::remove(&mut provider, finalizer::PROVIDER);
    match store.update(&provider).await {
        Ok(_) => {}
        Err(error) if error.is_not_found() => {}
        Err(error) => return Err(error.into()),
    }
    info!(identities = children.len(), "Released provider");
    Ok(Action::await_change())
}
