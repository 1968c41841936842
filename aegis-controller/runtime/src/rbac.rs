//! Ensures the service accounts and RBAC objects identities depend on.
//!
//! Every object is get-or-create: an existing object is left untouched and a
//! concurrent creation is treated as success.

use crate::{
    k8s::{
        ObjectMeta, OwnerReference, PolicyRule, Resource, ResourceExt, Role, RoleBinding,
        RoleRef, ServiceAccount, Subject,
    },
    store::{Object, Store},
};
use aegis_controller_core::{Error, Result, API_GROUP};
use tracing::info;

/// Grants read access to ingress policies.
pub const POLICY_READER_ROLE: &str = "ingresspolicy-viewer-role";

const INGRESS_POLICIES: &str = "ingresspolicies";

/// The service account `default` in every namespace.
pub const DEFAULT_SERVICE_ACCOUNT: &str = "default";

async fn ensure<S: Store, K: Object>(store: &S, namespace: &str, obj: K) -> Result<K> {
    let name = obj.name_any();
    match store.get::<K>(namespace, &name).await {
        Ok(existing) => return Ok(existing),
        Err(error) if error.is_not_found() => {}
        Err(error) => return Err(error.into()),
    }

    match store.create(namespace, &obj).await {
        Ok(created) => {
            info!(%namespace, %name, kind = %K::kind(&()), "Created");
            Ok(created)
        }
        Err(error) if error.is_already_exists() => Ok(store.get(namespace, &name).await?),
        Err(error) => Err(error.into()),
    }
}

pub(crate) fn owner_ref<K: Resource<DynamicType = ()>>(owner: &K) -> Result<OwnerReference> {
    owner.controller_owner_ref(&()).ok_or_else(|| {
        Error::Validation(format!(
            "{} {} has no uid",
            K::kind(&()),
            owner.meta().name.as_deref().unwrap_or_default()
        ))
    })
}

pub async fn ensure_service_account<S: Store>(
    store: &S,
    namespace: &str,
    name: &str,
    owner: Option<OwnerReference>,
) -> Result<ServiceAccount> {
    let sa = ServiceAccount {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            owner_references: owner.map(|o| vec![o]),
            ..Default::default()
        },
        ..Default::default()
    };
    ensure(store, namespace, sa).await
}

/// Ensures the namespace's policy-reader role.
///
/// The role is shared by every identity in the namespace and has no owner,
/// so deleting any one identity never collects it.
pub async fn ensure_policy_reader_role<S: Store>(store: &S, namespace: &str) -> Result<Role> {
    let role = Role {
        metadata: ObjectMeta {
            name: Some(POLICY_READER_ROLE.to_string()),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        },
        rules: Some(vec![PolicyRule {
            api_groups: Some(vec![API_GROUP.to_string()]),
            resources: Some(vec![INGRESS_POLICIES.to_string()]),
            verbs: ["get", "list", "watch"].map(String::from).to_vec(),
            ..Default::default()
        }]),
    };
    ensure(store, namespace, role).await
}

pub fn binding_name(service_account: &str) -> String {
    format!("{service_account}-{POLICY_READER_ROLE}")
}

/// Binds the policy-reader role to a service account.
pub async fn ensure_policy_reader_binding<S: Store>(
    store: &S,
    namespace: &str,
    service_account: &str,
    owner: Option<OwnerReference>,
) -> Result<RoleBinding> {
    let binding = RoleBinding {
        metadata: ObjectMeta {
            name: Some(binding_name(service_account)),
            namespace: Some(namespace.to_string()),
            owner_references: owner.map(|o| vec![o]),
            ..Default::default()
        },
        role_ref: RoleRef {
            api_group: "rbac.authorization.k8s.io".to_string(),
            kind: "Role".to_string(),
            name: POLICY_READER_ROLE.to_string(),
        },
        subjects: Some(vec![Subject {
            kind: "ServiceAccount".to_string(),
            name: service_account.to_string(),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        }]),
    };
    ensure(store, namespace, binding).await
}
