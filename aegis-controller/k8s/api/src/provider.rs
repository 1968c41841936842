use crate::condition::{Condition, HasConditions};
use aegis_controller_core::ProviderKind;
use k8s_openapi::NamespaceResourceScope;
use kube::{CustomResource, Resource, ResourceExt};
use schemars::JsonSchema;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::fmt::Debug;

/// A provider resource kind, tied to the identity backend it configures.
pub trait ProviderResource:
    Resource<DynamicType = (), Scope = NamespaceResourceScope>
    + HasConditions
    + Clone
    + Debug
    + DeserializeOwned
    + Serialize
    + Send
    + Sync
    + 'static
{
    const KIND: ProviderKind;
}

/// Issues identities from a HashiCorp Vault server.
#[derive(Clone, Debug, PartialEq, Eq, CustomResource, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "aegis.aegisproxy.io",
    version = "v1",
    kind = "HashicorpVaultProvider",
    status = "ProviderStatus",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct HashicorpVaultProviderSpec {
    pub vault_address: String,
}

/// Issues identities as Entra ID application registrations.
#[derive(Clone, Debug, PartialEq, Eq, CustomResource, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "aegis.aegisproxy.io",
    version = "v1",
    kind = "AzureProvider",
    status = "ProviderStatus",
    namespaced
)]
pub struct AzureProviderSpec {
    #[serde(rename = "tenantID")]
    pub tenant_id: String,

    #[serde(rename = "clientID")]
    pub client_id: String,
}

/// Issues identities from a Cognito identity pool.
#[derive(Clone, Debug, PartialEq, Eq, CustomResource, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "aegis.aegisproxy.io",
    version = "v1",
    kind = "AWSProvider",
    root = "AwsProvider",
    status = "ProviderStatus",
    namespaced
)]
pub struct AwsProviderSpec {
    pub region: String,

    #[serde(rename = "identityPoolID")]
    pub identity_pool_id: String,

    #[serde(rename = "roleARN")]
    pub role_arn: String,
}

/// Uses the cluster's own service-account token issuer.
#[derive(Clone, Debug, Default, PartialEq, Eq, CustomResource, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "aegis.aegisproxy.io",
    version = "v1",
    kind = "KubernetesProvider",
    status = "KubernetesProviderStatus",
    namespaced
)]
pub struct KubernetesProviderSpec {}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
pub struct ProviderStatus {
    #[serde(default)]
    pub conditions: Vec<Condition>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
pub struct KubernetesProviderStatus {
    #[serde(default)]
    pub conditions: Vec<Condition>,

    /// The `iss` claim of the cluster's service-account tokens.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issuer: Option<String>,
}

/// A provider fetched by bare name, whichever kind it turned out to be.
#[derive(Clone, Debug)]
pub enum AnyProvider {
    HashicorpVault(HashicorpVaultProvider),
    Azure(AzureProvider),
    Aws(AwsProvider),
    Kubernetes(KubernetesProvider),
}

macro_rules! provider_resource {
    ($ty:ty, $kind:expr, $variant:ident) => {
        impl ProviderResource for $ty {
            const KIND: ProviderKind = $kind;
        }

        impl From<$ty> for AnyProvider {
            fn from(p: $ty) -> Self {
                Self::$variant(p)
            }
        }
    };
}

provider_resource!(HashicorpVaultProvider, ProviderKind::HashicorpVault, HashicorpVault);
provider_resource!(AzureProvider, ProviderKind::Azure, Azure);
provider_resource!(AwsProvider, ProviderKind::Aws, Aws);
provider_resource!(KubernetesProvider, ProviderKind::Kubernetes, Kubernetes);

macro_rules! status_conditions {
    ($($ty:ty),+) => {
        $(
            impl HasConditions for $ty {
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
        )+
    };
}

status_conditions!(
    HashicorpVaultProvider,
    AzureProvider,
    AwsProvider,
    KubernetesProvider
);

// === impl AnyProvider ===

impl AnyProvider {
    pub fn kind(&self) -> ProviderKind {
        match self {
            Self::HashicorpVault(_) => ProviderKind::HashicorpVault,
            Self::Azure(_) => ProviderKind::Azure,
            Self::Aws(_) => ProviderKind::Aws,
            Self::Kubernetes(_) => ProviderKind::Kubernetes,
        }
    }

    pub fn name(&self) -> String {
        match self {
            Self::HashicorpVault(p) => p.name_any(),
            Self::Azure(p) => p.name_any(),
            Self::Aws(p) => p.name_any(),
            Self::Kubernetes(p) => p.name_any(),
        }
    }
}

// === impl KubernetesProvider ===

impl KubernetesProvider {
    pub fn issuer(&self) -> Option<&str> {
        self.status
            .as_ref()
            .and_then(|s| s.issuer.as_deref())
            .filter(|i| !i.is_empty())
    }
}
