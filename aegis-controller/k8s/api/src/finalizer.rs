//! Finalizers are edited as list membership on the object's metadata and
//! persisted by replacing the object.

use kube::Resource;

/// Held by an `Identity` until its external identity has been deleted.
pub const IDENTITY: &str = "identity.aegis.aegisproxy.io";

/// Held by a provider until every identity issued by it is gone.
pub const PROVIDER: &str = "idprovider.aegis.aegisproxy.io";

pub fn contains<K: Resource>(obj: &K, finalizer: &str) -> bool {
    obj.meta()
        .finalizers
        .iter()
        .flatten()
        .any(|f| f == finalizer)
}

/// Returns true if the finalizer was not already present.
pub fn add<K: Resource>(obj: &mut K, finalizer: &str) -> bool {
    if contains(obj, finalizer) {
        return false;
    }
    obj.meta_mut()
        .finalizers
        .get_or_insert_with(Vec::new)
        .push(finalizer.to_string());
    true
}

/// Returns true if the finalizer was present.
pub fn remove<K: Resource>(obj: &mut K, finalizer: &str) -> bool {
    let Some(finalizers) = obj.meta_mut().finalizers.as_mut() else {
        return false;
    };
    let before = finalizers.len();
    finalizers.retain(|f| f != finalizer);
    before != finalizers.len()
}

pub fn is_deleting<K: Resource>(obj: &K) -> bool {
    obj.meta().deletion_timestamp.is_some()
}
