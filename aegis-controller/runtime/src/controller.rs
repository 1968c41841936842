//! Reconciliation loops for identities and providers.

pub mod identity;
pub mod provider;


use aegis_controller_core::Error;
use futures::prelude::*;
use kube::{
    runtime::{controller::Action, watcher, Controller},
    Api, Resource, ResourceExt,
};
use serde::de::DeserializeOwned;
use std::{fmt::Debug, future::Future, sync::Arc, time::Duration};
use tokio::sync::oneshot;
use tracing::{debug, warn};

/// Delay before picking an object back up after persisting its finalizer.
pub(crate) const FINALIZER_REQUEUE: Duration = Duration::from_secs(1);

/// Delay before checking again whether a provider's identities are gone.
pub(crate) const CHILDREN_REQUEUE: Duration = Duration::from_secs(5);

const ERROR_REQUEUE: Duration = Duration::from_secs(10);

/// Periodic resync of healthy objects.
pub(crate) const RESYNC: Duration = Duration::from_secs(300);

pub(crate) fn error_policy<K, C>(obj: Arc<K>, error: &Error, _: Arc<C>) -> Action
where
    K: Resource<DynamicType = ()>,
{
    warn!(
        kind = %K::kind(&()),
        namespace = %obj.namespace().unwrap_or_default(),
        name = %obj.name_any(),
        %error,
        "Reconcile failed"
    );
    Action::requeue(ERROR_REQUEUE)
}

/// Drives `reconcile` for every object of kind `K` until shutdown is
/// signaled. Shutdown is held until in-flight reconciles complete.
pub(crate) async fn run<K, C, F, Fut>(api: Api<K>, ctx: Arc<C>, reconcile: F, drain: drain::Watch)
where
    K: Resource<DynamicType = ()> + Clone + Debug + DeserializeOwned + Send + Sync + 'static,
    C: Send + Sync + 'static,
    F: FnMut(Arc<K>, Arc<C>) -> Fut,
    Fut: Future<Output = Result<Action, Error>> + Send + 'static,
{
    let (stop, stopped) = oneshot::channel::<()>();
    let signaled = tokio::spawn(async move {
        let release = drain.signaled().await;
        let _ = stop.send(());
        release
    });

    Controller::new(api, watcher::Config::default().any_semantic())
        .graceful_shutdown_on(stopped.map(|_| ()))
        .run(reconcile, error_policy, ctx)
        .for_each(|res| {
            match res {
                Ok((obj, _)) => debug!(name = %obj.name, namespace = ?obj.namespace, "Reconciled"),
                Err(error) => debug!(%error, "Reconcile error"),
            }
            future::ready(())
        })
        .await;

    signaled.abort();
    if let Ok(release) = signaled.await {
        drop(release);
    }
}
