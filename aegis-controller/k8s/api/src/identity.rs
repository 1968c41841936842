use crate::condition::{Condition, HasConditions};
use aegis_controller_core::{IdentityRef, Metadata, ProviderKind};
use kube::{CustomResource, ResourceExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Requests a workload identity for the same-named service account from the
/// provider named by `spec.provider`.
#[derive(Clone, Debug, PartialEq, Eq, CustomResource, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "aegis.aegisproxy.io",
    version = "v1",
    kind = "Identity",
    status = "IdentityStatus",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct IdentitySpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Bare name of a provider resource in the identity's namespace.
    pub provider: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct IdentityStatus {
    #[serde(default)]
    pub conditions: Vec<Condition>,

    /// The kind of the provider that issued the identity. Set only once the
    /// provider has created it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,

    #[serde(default, skip_serializing_if = "Metadata::is_empty")]
    pub metadata: Metadata,
}

// === impl Identity ===

impl Identity {
    pub fn identity_ref(&self) -> IdentityRef {
        IdentityRef::new(self.namespace().unwrap_or_default(), self.name_any())
    }

    /// The provider kind recorded once creation completed.
    pub fn provider_kind(&self) -> Option<&str> {
        self.status
            .as_ref()
            .and_then(|s| s.provider.as_deref())
            .filter(|p| !p.is_empty())
    }

    pub fn is_created(&self) -> bool {
        self.provider_kind().is_some()
    }

    pub fn metadata_value(&self, key: &str) -> Option<&str> {
        self.status
            .as_ref()
            .and_then(|s| s.metadata.get(key))
            .map(String::as_str)
    }

    /// Records a completed creation.
    pub fn set_created(&mut self, kind: ProviderKind, metadata: Metadata) {
        let status = self.status.get_or_insert_with(Default::default);
        status.provider = Some(kind.to_string());
        status.metadata = metadata;
    }
}

impl HasConditions for Identity {
    fn conditions(&self) -> &[Condition] {
        self.status
            .as_ref()
            .map(|s| s.conditions.as_slice())
            .unwrap_or_default()
    }

    fn conditions_mut(&mut self) -> &mut Vec<Condition> {
        &mut self.status.get_or_insert_with(Default::default).conditions
    }
}
