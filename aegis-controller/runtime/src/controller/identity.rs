//! Drives an `Identity` from creation to deletion.
//!
//! An identity moves through these phases, one step per reconcile:
//!
//! 1. Without conditions it is marked `Available=Unknown`.
//! 2. Without the finalizer, the finalizer and the provider label are
//!    persisted. Nothing external happens before this write succeeds.
//! 3. With the finalizer, the service account and RBAC objects are ensured
//!    and the provider is asked to create the identity. Only then are the
//!    provider kind and metadata recorded.
//! 4. Once deleted, the provider deletes the identity and the finalizer is
//!    released. A failed deletion keeps the finalizer.

use super::{FINALIZER_REQUEUE, RESYNC};
use crate::{
    k8s::{condition::Condition, finalizer, labels, HasConditions, Identity, ResourceExt},
    rbac,
    resolver::Resolve,
    store::Store,
};
use aegis_controller_core::{Error, Result};
use kube::runtime::controller::Action;
use std::sync::Arc;
use tracing::{debug, info, instrument};

pub struct Context<S, R> {
    pub store: S,
    pub resolver: R,
}

#[instrument(skip_all, fields(
    namespace = %identity.namespace().unwrap_or_default(),
    name = %identity.name_any(),
))]
pub async fn reconcile<S: Store, R: Resolve>(
    identity: Arc<Identity>,
    ctx: Arc<Context<S, R>>,
) -> Result<Action> {
    let namespace = identity
        .namespace()
        .ok_or_else(|| Error::Validation("identity must be namespaced".to_string()))?;
    let mut identity = Identity::clone(&identity);

    if finalizer::is_deleting(&identity) {
        return cleanup(identity, &namespace, &ctx).await;
    }

    if identity.conditions().is_empty() {
        let generation = identity.metadata.generation;
        identity.set_condition(Condition::reconciling(generation));
        ctx.store.update_status(&identity).await?;
        identity = ctx.store.get(&namespace, &identity.name_any()).await?;
    }

    if !finalizer::contains(&identity, finalizer::IDENTITY) {
        finalizer::add(&mut identity, finalizer::IDENTITY);
        let provider = identity.spec.provider.clone();
        identity
            .labels_mut()
            .insert(labels::IDENTITY_PROVIDER.to_string(), provider);
        ctx.store.update(&identity).await?;
        debug!("Added finalizer");
        return Ok(Action::requeue(FINALIZER_REQUEUE));
    }

    let provider = ctx
        .resolver
        .resolve(&namespace, &identity.spec.provider)
        .await?;
    let name = identity.name_any();

    let sa = rbac::ensure_service_account(
        &ctx.store,
        &namespace,
        &name,
        Some(rbac::owner_ref(&identity)?),
    )
    .await?;
    rbac::ensure_policy_reader_role(&ctx.store, &namespace).await?;
    rbac::ensure_policy_reader_binding(&ctx.store, &namespace, &name, Some(rbac::owner_ref(&sa)?))
        .await?;
    rbac::ensure_policy_reader_binding(
        &ctx.store,
        &namespace,
        rbac::DEFAULT_SERVICE_ACCOUNT,
        None,
    )
    .await?;

    let before = identity.status.clone();
    if !identity.is_created() {
        let metadata = provider.create_identity(&identity.identity_ref()).await?;
        identity.set_created(provider.name(), metadata);
        info!(provider = %provider.name(), "Created identity");
    }
    let generation = identity.metadata.generation;
    identity.set_condition(Condition::reconciled("Identity reconciled", generation));

    if identity.status != before {
        ctx.store.update_status(&identity).await?;
    }
    Ok(Action::requeue(RESYNC))
}

async fn cleanup<S: Store, R: Resolve>(
    mut identity: Identity,
    namespace: &str,
    ctx: &Context<S, R>,
) -> Result<Action> {
    if !finalizer::contains(&identity, finalizer::IDENTITY) {
        return Ok(Action::await_change());
    }

    let provider = ctx
        .resolver
        .resolve(namespace, &identity.spec.provider)
        .await?;
    let metadata = identity
        .status
        .as_ref()
        .map(|s| s.metadata.clone())
        .unwrap_or_default();
    provider
        .delete_identity(&identity.identity_ref(), &metadata)
        .await?;

    finalizer::remove(&mut identity, finalizer::IDENTITY);
    match ctx.store.update(&identity).await {
        Ok(_) => {}
        Err(error) if error.is_not_found() => {}
        Err(error) => return Err(error.into()),
    }
    info!(provider = %provider.name(), "Deleted identity");
    Ok(Action::await_change())
}
