#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod condition;
pub mod finalizer;
pub mod identity;
pub mod labels;
pub mod provider;

pub use self::{
    condition::{Condition, ConditionStatus, HasConditions},
    identity::{Identity, IdentitySpec, IdentityStatus},
    provider::{
        AnyProvider, AwsProvider, AwsProviderSpec, AzureProvider, AzureProviderSpec,
        HashicorpVaultProvider, HashicorpVaultProviderSpec, KubernetesProvider,
        KubernetesProviderSpec, KubernetesProviderStatus, ProviderResource, ProviderStatus,
    },
};
pub use k8s_openapi::api::{
    self,
    authentication::v1::{TokenRequest, TokenRequestSpec},
    core::v1::{
        Capabilities, Container, EnvVar, Pod, PodSpec, ProjectedVolumeSource, SecurityContext,
        ServiceAccount, ServiceAccountTokenProjection, Volume, VolumeMount, VolumeProjection,
    },
    rbac::v1::{PolicyRule, Role, RoleBinding, RoleRef, Subject},
};
pub use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
pub use kube::api::{ObjectMeta, ResourceExt};
pub use k8s_openapi::NamespaceResourceScope;
pub use kube::Resource;
