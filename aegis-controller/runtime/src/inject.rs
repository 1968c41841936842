//! Decides how a pod's annotations translate into an injected proxy, and
//! applies the result to the pod.

use crate::{
    k8s::{
        AnyProvider, Capabilities, Container, Identity, Pod, ProjectedVolumeSource,
        SecurityContext, ServiceAccountTokenProjection, Volume, VolumeMount, VolumeProjection,
    },
    rbac,
    resolver::{find_provider, get_provider},
    scripts,
    store::Store,
};
use aegis_controller_core::{metadata, Error, ProviderKind, Result};
use std::collections::BTreeMap;
use tracing::debug;

pub const EGRESS_ANNOTATION: &str = "aegisproxy.io/egress";
pub const INGRESS_ANNOTATION: &str = "aegisproxy.io/ingress";
pub const INGRESS_PORT_ANNOTATION: &str = "aegisproxy.io/ingress.port";
pub const INGRESS_POLICY_ANNOTATION: &str = "aegisproxy.io/ingress.policy";
pub const IDENTITY_ANNOTATION: &str = "aegisproxy.io/identity";
pub const IDENTITY_PROVIDER_ANNOTATION: &str = "aegisproxy.io/identity.provider";

pub const PROXY_CONTAINER: &str = "aegis-proxy";
pub const INIT_CONTAINER: &str = "aegis-init";

/// The service account plain ingress proxies are granted in each namespace.
pub const INGRESS_SERVICE_ACCOUNT: &str = "aegisproxy";

const PROXY_UID: i64 = 1137;
const INBOUND_PORT: &str = "3127";
const OUTBOUND_PORT: &str = "3128";

const TOKEN_VOLUME: &str = "satoken";
const TOKEN_MOUNT_PATH: &str = "/var/run/secrets/tokens";
const TOKEN_FILE: &str = "token";
const TOKEN_EXPIRATION_SECONDS: i64 = 7200;

const ENV_PREFIXES: [&str; 2] = ["OTEL", "AEGIS"];

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ProxyType {
    Egress,
    Ingress,
    IngressEgress,
}

/// What a pod's annotations ask for.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Request {
    pub proxy_type: ProxyType,

    /// The identity outbound requests are made as. Set for egress.
    pub identity: Option<String>,

    /// The application port inbound traffic is redirected from. Set for
    /// ingress.
    pub ingress_port: Option<u16>,

    pub policy: Option<String>,

    /// The provider named directly by a plain ingress pod.
    pub provider: Option<String>,
}

/// Everything needed to mutate a pod, resolved from cluster state.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Plan {
    pub proxy_type: ProxyType,
    pub service_account: String,
    pub provider_kind: ProviderKind,
    pub provider_args: Vec<String>,
    pub policy: Option<String>,
    pub script: String,
}

/// Images used for the injected containers.
#[derive(Clone, Debug)]
pub struct Injector {
    pub proxy_image: String,
    pub init_image: String,
}

// === impl ProxyType ===

impl ProxyType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Egress => "egress",
            Self::Ingress => "ingress",
            Self::IngressEgress => "ingress-egress",
        }
    }

    pub fn has_egress(&self) -> bool {
        matches!(self, Self::Egress | Self::IngressEgress)
    }
}

impl std::fmt::Display for ProxyType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

fn non_empty<'a>(annotations: &'a BTreeMap<String, String>, key: &str) -> Option<&'a str> {
    annotations
        .get(key)
        .map(String::as_str)
        .filter(|v| !v.is_empty())
}

fn enabled(annotations: &BTreeMap<String, String>, key: &str) -> bool {
    annotations.get(key).is_some_and(|v| v == "true")
}

/// Reads the injection annotations. Returns `None` when the pod asks for no
/// proxy at all.
pub fn parse(annotations: &BTreeMap<String, String>) -> Result<Option<Request>> {
    let egress = enabled(annotations, EGRESS_ANNOTATION);
    let identity = if egress {
        let identity = non_empty(annotations, IDENTITY_ANNOTATION).ok_or_else(|| {
            Error::Validation(format!("egress proxies require {IDENTITY_ANNOTATION}"))
        })?;
        Some(identity.to_string())
    } else {
        None
    };

    if !enabled(annotations, INGRESS_ANNOTATION) {
        return Ok(egress.then(|| Request {
            proxy_type: ProxyType::Egress,
            identity,
            ingress_port: None,
            policy: None,
            provider: None,
        }));
    }

    let port = annotations.get(INGRESS_PORT_ANNOTATION).ok_or_else(|| {
        Error::Validation(format!("ingress proxies require {INGRESS_PORT_ANNOTATION}"))
    })?;
    // The port is interpolated into the redirection script.
    let port = port.trim().parse::<u16>().map_err(|_| {
        Error::Validation(format!("{INGRESS_PORT_ANNOTATION} is not a port: {port:?}"))
    })?;
    let policy = non_empty(annotations, INGRESS_POLICY_ANNOTATION).map(str::to_string);

    if egress {
        return Ok(Some(Request {
            proxy_type: ProxyType::IngressEgress,
            identity,
            ingress_port: Some(port),
            policy,
            provider: None,
        }));
    }

    let provider = non_empty(annotations, IDENTITY_PROVIDER_ANNOTATION).ok_or_else(|| {
        Error::Validation(format!(
            "ingress proxies require {IDENTITY_PROVIDER_ANNOTATION}"
        ))
    })?;
    Ok(Some(Request {
        proxy_type: ProxyType::Ingress,
        identity: None,
        ingress_port: Some(port),
        policy,
        provider: Some(provider.to_string()),
    }))
}

/// The token audience the proxy's provider expects.
fn audience(kind: ProviderKind) -> Option<&'static str> {
    match kind {
        ProviderKind::HashicorpVault => Some(aegis_controller_identity::vault::AUDIENCE),
        ProviderKind::Azure => Some(aegis_controller_identity::azure::TOKEN_EXCHANGE_AUDIENCE),
        ProviderKind::Kubernetes => Some("kubernetes"),
        ProviderKind::Aws => None,
    }
}

fn render_script(req: &Request) -> Result<String> {
    let uid = PROXY_UID.to_string();
    let port = req.ingress_port.map(|p| p.to_string()).unwrap_or_default();
    match req.proxy_type {
        ProxyType::Egress => scripts::EGRESS.render(&[&uid, OUTBOUND_PORT]),
        ProxyType::Ingress => scripts::INGRESS.render(&[&uid, INBOUND_PORT, &port]),
        ProxyType::IngressEgress => {
            scripts::INGRESS_EGRESS.render(&[&uid, INBOUND_PORT, OUTBOUND_PORT, &port])
        }
    }
}

fn provider_args(provider: &AnyProvider, identity: Option<&Identity>) -> Result<Vec<String>> {
    let args = match provider {
        AnyProvider::HashicorpVault(p) => {
            vec!["--vault-address".to_string(), p.spec.vault_address.clone()]
        }
        AnyProvider::Kubernetes(p) => {
            let issuer = p.issuer().ok_or_else(|| {
                Error::Validation(format!(
                    "kubernetes provider {} has not published an issuer",
                    provider.name()
                ))
            })?;
            vec!["--kubernetes-issuer".to_string(), issuer.to_string()]
        }
        AnyProvider::Azure(p) => {
            let mut args = vec!["--azure-tenant-id".to_string(), p.spec.tenant_id.clone()];
            if let Some(identity) = identity {
                let client_id = identity
                    .metadata_value(metadata::IDENTITY_ID)
                    .filter(|id| !id.is_empty())
                    .ok_or_else(|| {
                        Error::Validation(format!(
                            "identity {} has no azure client id",
                            identity.identity_ref()
                        ))
                    })?;
                args.push("--azure-client-id".to_string());
                args.push(client_id.to_string());
            }
            args
        }
        AnyProvider::Aws(_) => {
            return Err(Error::Validation(format!(
                "unrecognized provider kind {}",
                provider.kind()
            )))
        }
    };
    Ok(args)
}

// === impl Injector ===

impl Injector {
    /// Resolves the identity and provider a request refers to.
    ///
    /// Plain ingress proxies also ensure the namespace's ingress service
    /// account exists, once the provider has been resolved.
    pub async fn plan<S: Store>(&self, store: &S, namespace: &str, req: Request) -> Result<Plan> {
        let script = render_script(&req)?;

        let (provider, identity) = match req.identity.as_deref() {
            Some(name) => {
                let identity = store.get::<Identity>(namespace, name).await?;
                let kind = identity
                    .provider_kind()
                    .ok_or_else(|| {
                        Error::Validation(format!("identity {namespace}/{name} is not ready"))
                    })?
                    .parse::<ProviderKind>()
                    .map_err(|e| Error::Validation(e.to_string()))?;
                let provider = get_provider(store, namespace, kind, &identity.spec.provider)
                    .await?
                    .ok_or_else(|| {
                        Error::not_found(kind, namespace, &identity.spec.provider)
                    })?;
                (provider, Some(identity))
            }
            None => {
                let name = req.provider.as_deref().ok_or_else(|| {
                    Error::Validation(format!("{IDENTITY_PROVIDER_ANNOTATION} is not set"))
                })?;
                (find_provider(store, namespace, name).await?, None)
            }
        };

        let provider_args = provider_args(&provider, identity.as_ref())?;
        if identity.is_none() {
            rbac::ensure_service_account(store, namespace, INGRESS_SERVICE_ACCOUNT, None).await?;
        }
        debug!(
            proxy = %req.proxy_type,
            provider = %provider.name(),
            kind = %provider.kind(),
            "Planned injection"
        );
        Ok(Plan {
            proxy_type: req.proxy_type,
            service_account: req
                .identity
                .unwrap_or_else(|| rbac::DEFAULT_SERVICE_ACCOUNT.to_string()),
            provider_kind: provider.kind(),
            provider_args,
            policy: req.policy,
            script,
        })
    }

    /// Adds the proxy and init containers to `pod`. Returns false, leaving the
    /// pod untouched, if either container is already present.
    pub fn apply(&self, pod: &mut Pod, plan: &Plan) -> Result<bool> {
        let audience = audience(plan.provider_kind).ok_or_else(|| {
            Error::Validation(format!(
                "unrecognized provider kind {}",
                plan.provider_kind
            ))
        })?;

        let spec = pod.spec.get_or_insert_with(Default::default);
        let injected = spec
            .containers
            .iter()
            .chain(spec.init_containers.iter().flatten())
            .any(|c| c.name == PROXY_CONTAINER || c.name == INIT_CONTAINER);
        if injected {
            return Ok(false);
        }

        let mut env = Vec::new();
        for prefix in ENV_PREFIXES {
            for container in &spec.containers {
                env.extend(
                    container
                        .env
                        .iter()
                        .flatten()
                        .filter(|e| e.name.starts_with(prefix))
                        .cloned(),
                );
            }
        }

        let proxy = Container {
            name: PROXY_CONTAINER.to_string(),
            image: Some(self.proxy_image.clone()),
            image_pull_policy: Some("Always".to_string()),
            command: Some(vec!["./aegisproxy".to_string()]),
            args: Some(proxy_args(plan)),
            env: (!env.is_empty()).then_some(env),
            security_context: Some(SecurityContext {
                run_as_user: Some(PROXY_UID),
                run_as_group: Some(PROXY_UID),
                ..Default::default()
            }),
            volume_mounts: Some(vec![VolumeMount {
                name: TOKEN_VOLUME.to_string(),
                mount_path: TOKEN_MOUNT_PATH.to_string(),
                ..Default::default()
            }]),
            ..Default::default()
        };

        let init = Container {
            name: INIT_CONTAINER.to_string(),
            image: Some(self.init_image.clone()),
            command: Some(vec![
                "/bin/sh".to_string(),
                "-c".to_string(),
                plan.script.clone(),
            ]),
            security_context: Some(SecurityContext {
                capabilities: Some(Capabilities {
                    add: Some(vec!["NET_ADMIN".to_string()]),
                    ..Default::default()
                }),
                ..Default::default()
            }),
            ..Default::default()
        };

        let volume = Volume {
            name: TOKEN_VOLUME.to_string(),
            projected: Some(ProjectedVolumeSource {
                sources: Some(vec![VolumeProjection {
                    service_account_token: Some(ServiceAccountTokenProjection {
                        audience: Some(audience.to_string()),
                        expiration_seconds: Some(TOKEN_EXPIRATION_SECONDS),
                        path: TOKEN_FILE.to_string(),
                    }),
                    ..Default::default()
                }]),
                ..Default::default()
            }),
            ..Default::default()
        };

        spec.containers.push(proxy);
        spec.init_containers.get_or_insert_with(Vec::new).push(init);
        spec.volumes.get_or_insert_with(Vec::new).push(volume);
        spec.service_account_name = Some(plan.service_account.clone());
        // The deprecated alias must agree with the name when set.
        if spec.service_account.is_some() {
            spec.service_account = Some(plan.service_account.clone());
        }
        Ok(true)
    }
}

fn proxy_args(plan: &Plan) -> Vec<String> {
    let mut args = [
        "run",
        "--type",
        plan.proxy_type.as_str(),
        "--inport",
        INBOUND_PORT,
        "--outport",
        OUTBOUND_PORT,
    ]
    .map(String::from)
    .to_vec();
    args.push("--token".to_string());
    args.push(format!("{TOKEN_MOUNT_PATH}/{TOKEN_FILE}"));
    args.push("--identity".to_string());
    args.push(plan.service_account.clone());
    args.push("--identity-provider".to_string());
    args.push(plan.provider_kind.to_string());
    if let Some(policy) = &plan.policy {
        args.push("--policy".to_string());
        args.push(policy.clone());
    }
    args.extend(plan.provider_args.iter().cloned());
    args
}

#[cfg(test)]
mod tests;
