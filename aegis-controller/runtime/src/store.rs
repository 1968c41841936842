//! Typed access to cluster resources.
//!
//! Controllers and the admission engine go through [`Store`] rather than a
//! `kube::Client` directly so that the distinction between a missing object,
//! a lost write race, and any other API failure is explicit.

use k8s_openapi::NamespaceResourceScope;
use kube::{
    api::{Api, DeleteParams, ListParams, Patch, PatchParams, PostParams},
    Resource, ResourceExt,
};
use serde::{de::DeserializeOwned, Serialize};
use std::fmt::Debug;

#[cfg(test)]
pub(crate) mod memory;

/// A namespaced resource the store can read and write.
pub trait Object:
    Resource<DynamicType = (), Scope = NamespaceResourceScope>
    + Clone
    + Debug
    + DeserializeOwned
    + Serialize
    + Send
    + Sync
    + 'static
{
}

impl<K> Object for K where
    K: Resource<DynamicType = (), Scope = NamespaceResourceScope>
        + Clone
        + Debug
        + DeserializeOwned
        + Serialize
        + Send
        + Sync
        + 'static
{
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("{kind} {namespace}/{name} not found")]
    NotFound {
        kind: String,
        namespace: String,
        name: String,
    },

    #[error("{kind} {namespace}/{name} already exists")]
    AlreadyExists {
        kind: String,
        namespace: String,
        name: String,
    },

    /// The object changed since it was read.
    #[error("{kind} {namespace}/{name} was modified concurrently")]
    Conflict {
        kind: String,
        namespace: String,
        name: String,
    },

    #[error("failed to encode {kind}: {source}")]
    Encode {
        kind: String,
        #[source]
        source: serde_json::Error,
    },

    #[error(transparent)]
    Api(#[from] kube::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[async_trait::async_trait]
pub trait Store: Clone + Send + Sync + 'static {
    async fn get<K: Object>(&self, namespace: &str, name: &str) -> Result<K>;

    /// Lists the objects in `namespace` matching an equality label selector.
    async fn list<K: Object>(&self, namespace: &str, labels: &str) -> Result<Vec<K>>;

    async fn create<K: Object>(&self, namespace: &str, obj: &K) -> Result<K>;

    /// Replaces the object's metadata and spec. Fails with a conflict when the
    /// object's resource version is stale.
    async fn update<K: Object>(&self, obj: &K) -> Result<K>;

    /// Replaces the object's status, guarded by its resource version.
    async fn update_status<K: Object>(&self, obj: &K) -> Result<K>;

    async fn delete<K: Object>(&self, namespace: &str, name: &str) -> Result<()>;

    async fn get_opt<K: Object>(&self, namespace: &str, name: &str) -> Result<Option<K>> {
        match self.get(namespace, name).await {
            Ok(obj) => Ok(Some(obj)),
            Err(Error::NotFound { .. }) => Ok(None),
            Err(error) => Err(error),
        }
    }
}

/// Stores objects in the cluster.
#[derive(Clone)]
pub struct KubeStore {
    client: kube::Client,
}

// === impl Error ===

impl Error {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    pub fn is_already_exists(&self) -> bool {
        matches!(self, Self::AlreadyExists { .. })
    }

    pub(crate) fn not_found<K: Object>(namespace: &str, name: &str) -> Self {
        Self::NotFound {
            kind: K::kind(&()).to_string(),
            namespace: namespace.to_string(),
            name: name.to_string(),
        }
    }

    pub(crate) fn already_exists<K: Object>(namespace: &str, name: &str) -> Self {
        Self::AlreadyExists {
            kind: K::kind(&()).to_string(),
            namespace: namespace.to_string(),
            name: name.to_string(),
        }
    }

    pub(crate) fn conflict<K: Object>(namespace: &str, name: &str) -> Self {
        Self::Conflict {
            kind: K::kind(&()).to_string(),
            namespace: namespace.to_string(),
            name: name.to_string(),
        }
    }

    pub(crate) fn encode<K: Object>(source: serde_json::Error) -> Self {
        Self::Encode {
            kind: K::kind(&()).to_string(),
            source,
        }
    }

    fn from_kube<K: Object>(error: kube::Error, namespace: &str, name: &str) -> Self {
        match error {
            kube::Error::Api(rsp) if rsp.code == 404 => Self::not_found::<K>(namespace, name),
            kube::Error::Api(rsp) if rsp.code == 409 && rsp.reason == "AlreadyExists" => {
                Self::already_exists::<K>(namespace, name)
            }
            kube::Error::Api(rsp) if rsp.code == 409 => Self::conflict::<K>(namespace, name),
            error => Self::Api(error),
        }
    }
}

impl From<Error> for aegis_controller_core::Error {
    fn from(error: Error) -> Self {
        match error {
            Error::NotFound {
                kind,
                namespace,
                name,
            } => Self::NotFound {
                kind,
                namespace,
                name,
            },
            error @ (Error::AlreadyExists { .. } | Error::Conflict { .. }) => {
                Self::Conflict(error.to_string())
            }
            error => Self::external("kubernetes api", error),
        }
    }
}

// === impl KubeStore ===

impl KubeStore {
    pub fn new(client: kube::Client) -> Self {
        Self { client }
    }

    fn api<K: Object>(&self, namespace: &str) -> Api<K> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

#[async_trait::async_trait]
impl Store for KubeStore {
    async fn get<K: Object>(&self, namespace: &str, name: &str) -> Result<K> {
        self.api(namespace)
            .get(name)
            .await
            .map_err(|e| Error::from_kube::<K>(e, namespace, name))
    }

    async fn list<K: Object>(&self, namespace: &str, labels: &str) -> Result<Vec<K>> {
        let list = self
            .api::<K>(namespace)
            .list(&ListParams::default().labels(labels))
            .await?;
        Ok(list.items)
    }

    async fn create<K: Object>(&self, namespace: &str, obj: &K) -> Result<K> {
        let name = obj.name_any();
        self.api(namespace)
            .create(&PostParams::default(), obj)
            .await
            .map_err(|e| Error::from_kube::<K>(e, namespace, &name))
    }

    async fn update<K: Object>(&self, obj: &K) -> Result<K> {
        let namespace = obj.namespace().unwrap_or_default();
        let name = obj.name_any();
        self.api(&namespace)
            .replace(&name, &PostParams::default(), obj)
            .await
            .map_err(|e| Error::from_kube::<K>(e, &namespace, &name))
    }

    async fn update_status<K: Object>(&self, obj: &K) -> Result<K> {
        let namespace = obj.namespace().unwrap_or_default();
        let name = obj.name_any();
        let value = serde_json::to_value(obj).map_err(Error::encode::<K>)?;
        // Including the resource version makes the API server reject the
        // patch if the object changed since it was read.
        let patch = serde_json::json!({
            "metadata": { "resourceVersion": obj.resource_version() },
            "status": value.get("status"),
        });
        self.api(&namespace)
            .patch_status(&name, &PatchParams::default(), &Patch::Merge(patch))
            .await
            .map_err(|e| Error::from_kube::<K>(e, &namespace, &name))
    }

    async fn delete<K: Object>(&self, namespace: &str, name: &str) -> Result<()> {
        self.api::<K>(namespace)
            .delete(name, &DeleteParams::default())
            .await
            .map_err(|e| Error::from_kube::<K>(e, namespace, name))?;
        Ok(())
    }
}
