use super::*;
use crate::{
    k8s::{
        AwsProvider, AwsProviderSpec, AzureProvider, AzureProviderSpec, EnvVar,
        HashicorpVaultProvider, HashicorpVaultProviderSpec, IdentitySpec, IdentityStatus,
        KubernetesProvider, KubernetesProviderStatus, ObjectMeta, PodSpec, ServiceAccount,
    },
    store::memory::MemoryStore,
};
use aegis_controller_core::Metadata;
use maplit::btreemap;

fn meta(name: &str) -> ObjectMeta {
    ObjectMeta {
        name: Some(name.to_string()),
        namespace: Some("apps".to_string()),
        ..Default::default()
    }
}

fn injector() -> Injector {
    Injector {
        proxy_image: "ghcr.io/aegisproxy/aegis-proxy:test".to_string(),
        init_image: "ghcr.io/aegisproxy/aegis-init:test".to_string(),
    }
}

fn identity(name: &str, provider: &str, kind: ProviderKind, metadata: Metadata) -> Identity {
    Identity {
        metadata: meta(name),
        spec: IdentitySpec {
            name: None,
            provider: provider.to_string(),
        },
        status: Some(IdentityStatus {
            conditions: vec![],
            provider: Some(kind.to_string()),
            metadata,
        }),
    }
}

fn kubernetes_provider(name: &str, issuer: Option<&str>) -> KubernetesProvider {
    KubernetesProvider {
        metadata: meta(name),
        spec: Default::default(),
        status: Some(KubernetesProviderStatus {
            conditions: vec![],
            issuer: issuer.map(str::to_string),
        }),
    }
}

fn vault_provider(name: &str) -> HashicorpVaultProvider {
    HashicorpVaultProvider {
        metadata: meta(name),
        spec: HashicorpVaultProviderSpec {
            vault_address: "http://vault.vault:8200".to_string(),
        },
        status: None,
    }
}

fn azure_provider(name: &str) -> AzureProvider {
    AzureProvider {
        metadata: meta(name),
        spec: AzureProviderSpec {
            tenant_id: "tenant-1".to_string(),
            client_id: "controller-client".to_string(),
        },
        status: None,
    }
}

fn app_pod() -> Pod {
    Pod {
        metadata: meta("web-0"),
        spec: Some(PodSpec {
            containers: vec![Container {
                name: "web".to_string(),
                image: Some("web:latest".to_string()),
                env: Some(vec![
                    EnvVar {
                        name: "AEGIS_MODE".to_string(),
                        value: Some("strict".to_string()),
                        ..Default::default()
                    },
                    EnvVar {
                        name: "HOME".to_string(),
                        value: Some("/root".to_string()),
                        ..Default::default()
                    },
                    EnvVar {
                        name: "OTEL_EXPORTER_OTLP_ENDPOINT".to_string(),
                        value: Some("http://otel:4317".to_string()),
                        ..Default::default()
                    },
                ]),
                ..Default::default()
            }],
            ..Default::default()
        }),
        status: None,
    }
}

fn container<'p>(pod: &'p Pod, name: &str) -> &'p Container {
    let spec = pod.spec.as_ref().unwrap();
    spec.containers
        .iter()
        .chain(spec.init_containers.iter().flatten())
        .find(|c| c.name == name)
        .unwrap_or_else(|| panic!("{name} not found"))
}

fn args(container: &Container) -> Vec<&str> {
    container.args.iter().flatten().map(String::as_str).collect()
}

fn audience_of(pod: &Pod) -> &str {
    let volume = pod
        .spec
        .as_ref()
        .unwrap()
        .volumes
        .iter()
        .flatten()
        .find(|v| v.name == "satoken")
        .unwrap();
    let projection = &volume.projected.as_ref().unwrap().sources.as_ref().unwrap()[0];
    projection
        .service_account_token
        .as_ref()
        .unwrap()
        .audience
        .as_deref()
        .unwrap()
}

#[test]
fn parse_without_annotations() {
    assert_eq!(parse(&BTreeMap::new()).unwrap(), None);
    assert_eq!(
        parse(&btreemap! { EGRESS_ANNOTATION.to_string() => "false".to_string() }).unwrap(),
        None
    );
}

#[test]
fn parse_requires_annotations() {
    let egress = btreemap! { EGRESS_ANNOTATION.to_string() => "true".to_string() };
    assert!(matches!(parse(&egress), Err(Error::Validation(_))));

    let ingress = btreemap! {
        INGRESS_ANNOTATION.to_string() => "true".to_string(),
        IDENTITY_PROVIDER_ANNOTATION.to_string() => "k8s".to_string(),
    };
    assert!(matches!(parse(&ingress), Err(Error::Validation(_))));

    let no_provider = btreemap! {
        INGRESS_ANNOTATION.to_string() => "true".to_string(),
        INGRESS_PORT_ANNOTATION.to_string() => "8080".to_string(),
    };
    assert!(matches!(parse(&no_provider), Err(Error::Validation(_))));

    let bad_port = btreemap! {
        INGRESS_ANNOTATION.to_string() => "true".to_string(),
        INGRESS_PORT_ANNOTATION.to_string() => "8080; reboot".to_string(),
        IDENTITY_PROVIDER_ANNOTATION.to_string() => "k8s".to_string(),
    };
    assert!(matches!(parse(&bad_port), Err(Error::Validation(_))));
}

#[test]
fn parse_ingress_egress() {
    let req = parse(&btreemap! {
        EGRESS_ANNOTATION.to_string() => "true".to_string(),
        IDENTITY_ANNOTATION.to_string() => "svc-a".to_string(),
        INGRESS_ANNOTATION.to_string() => "true".to_string(),
        INGRESS_PORT_ANNOTATION.to_string() => "8080".to_string(),
        INGRESS_POLICY_ANNOTATION.to_string() => "allow-web".to_string(),
    })
    .unwrap()
    .unwrap();
    assert_eq!(
        req,
        Request {
            proxy_type: ProxyType::IngressEgress,
            identity: Some("svc-a".to_string()),
            ingress_port: Some(8080),
            policy: Some("allow-web".to_string()),
            provider: None,
        }
    );
}

#[tokio::test]
async fn egress_with_kubernetes_identity() {
    let store = MemoryStore::default();
    store
        .seed(identity("svc-a", "k8s", ProviderKind::Kubernetes, Metadata::new()))
        .await;
    store
        .seed(kubernetes_provider("k8s", Some("https://kubernetes.default.svc")))
        .await;

    let req = parse(&btreemap! {
        EGRESS_ANNOTATION.to_string() => "true".to_string(),
        IDENTITY_ANNOTATION.to_string() => "svc-a".to_string(),
    })
    .unwrap()
    .unwrap();
    let plan = injector().plan(&store, "apps", req).await.unwrap();
    assert_eq!(plan.proxy_type, ProxyType::Egress);
    assert_eq!(plan.service_account, "svc-a");

    let mut pod = app_pod();
    assert!(injector().apply(&mut pod, &plan).unwrap());

    let proxy = container(&pod, PROXY_CONTAINER);
    assert_eq!(
        args(proxy),
        [
            "run",
            "--type",
            "egress",
            "--inport",
            "3127",
            "--outport",
            "3128",
            "--token",
            "/var/run/secrets/tokens/token",
            "--identity",
            "svc-a",
            "--identity-provider",
            "kubernetes",
            "--kubernetes-issuer",
            "https://kubernetes.default.svc",
        ]
    );
    assert!(!args(proxy).iter().any(|a| a.starts_with("--policy")));
    assert_eq!(audience_of(&pod), "kubernetes");
    assert_eq!(
        pod.spec.as_ref().unwrap().service_account_name.as_deref(),
        Some("svc-a")
    );

    let env = proxy
        .env
        .iter()
        .flatten()
        .map(|e| e.name.as_str())
        .collect::<Vec<_>>();
    assert_eq!(env, ["OTEL_EXPORTER_OTLP_ENDPOINT", "AEGIS_MODE"]);

    let init = container(&pod, INIT_CONTAINER);
    let command = init.command.as_ref().unwrap();
    assert_eq!(command[..2], ["/bin/sh", "-c"]);
    assert!(command[2].contains("OUTBOUND_PORT=3128"));
    assert!(!command[2].contains("INBOUND_PORT"));
    let caps = init
        .security_context
        .as_ref()
        .and_then(|sc| sc.capabilities.as_ref())
        .and_then(|c| c.add.as_ref())
        .unwrap();
    assert_eq!(caps, &["NET_ADMIN"]);
}

#[tokio::test]
async fn ingress_with_vault_provider() {
    let store = MemoryStore::default();
    store.seed(vault_provider("vault-prov")).await;

    let req = parse(&btreemap! {
        INGRESS_ANNOTATION.to_string() => "true".to_string(),
        INGRESS_PORT_ANNOTATION.to_string() => "8080".to_string(),
        IDENTITY_PROVIDER_ANNOTATION.to_string() => "vault-prov".to_string(),
    })
    .unwrap()
    .unwrap();
    let plan = injector().plan(&store, "apps", req).await.unwrap();
    assert_eq!(plan.proxy_type, ProxyType::Ingress);
    assert_eq!(plan.service_account, "default");
    assert!(store.contains::<ServiceAccount>("apps", INGRESS_SERVICE_ACCOUNT));

    let mut pod = app_pod();
    assert!(injector().apply(&mut pod, &plan).unwrap());
    let proxy = args(container(&pod, PROXY_CONTAINER));
    assert_eq!(proxy[2], "ingress");
    assert!(proxy.ends_with(&["--vault-address", "http://vault.vault:8200"]));
    assert_eq!(audience_of(&pod), "vault");

    let init = container(&pod, INIT_CONTAINER);
    let script = &init.command.as_ref().unwrap()[2];
    assert!(script.contains("INBOUND_PORT=3127"));
    assert!(script.contains("APP_PORT=8080"));
}

#[tokio::test]
async fn ingress_egress_with_azure_identity() {
    let store = MemoryStore::default();
    store.seed(azure_provider("entra")).await;
    store
        .seed(identity(
            "svc-a",
            "entra",
            ProviderKind::Azure,
            Metadata::from([(metadata::IDENTITY_ID.to_string(), "app-client".to_string())]),
        ))
        .await;

    let req = parse(&btreemap! {
        EGRESS_ANNOTATION.to_string() => "true".to_string(),
        IDENTITY_ANNOTATION.to_string() => "svc-a".to_string(),
        INGRESS_ANNOTATION.to_string() => "true".to_string(),
        INGRESS_PORT_ANNOTATION.to_string() => "9090".to_string(),
        INGRESS_POLICY_ANNOTATION.to_string() => "allow-web".to_string(),
    })
    .unwrap()
    .unwrap();
    let plan = injector().plan(&store, "apps", req).await.unwrap();

    let mut pod = app_pod();
    assert!(injector().apply(&mut pod, &plan).unwrap());
    let proxy = args(container(&pod, PROXY_CONTAINER));
    assert!(proxy.ends_with(&[
        "--policy",
        "allow-web",
        "--azure-tenant-id",
        "tenant-1",
        "--azure-client-id",
        "app-client",
    ]));
    assert_eq!(audience_of(&pod), "api://AzureADTokenExchange");
    assert!(!store.contains::<ServiceAccount>("apps", INGRESS_SERVICE_ACCOUNT));
}

#[tokio::test]
async fn azure_identity_without_client_id_is_rejected() {
    let store = MemoryStore::default();
    store.seed(azure_provider("entra")).await;
    store
        .seed(identity("svc-a", "entra", ProviderKind::Azure, Metadata::new()))
        .await;

    let req = parse(&btreemap! {
        EGRESS_ANNOTATION.to_string() => "true".to_string(),
        IDENTITY_ANNOTATION.to_string() => "svc-a".to_string(),
    })
    .unwrap()
    .unwrap();
    let error = injector().plan(&store, "apps", req).await.unwrap_err();
    assert!(matches!(error, Error::Validation(_)), "{error}");
}

#[tokio::test]
async fn unresolved_references_are_rejected() {
    let store = MemoryStore::default();
    let egress = Request {
        proxy_type: ProxyType::Egress,
        identity: Some("missing".to_string()),
        ingress_port: None,
        policy: None,
        provider: None,
    };
    let error = injector().plan(&store, "apps", egress).await.unwrap_err();
    assert!(error.is_not_found(), "{error}");

    // Not yet issued by a provider.
    let mut pending = identity("svc-a", "k8s", ProviderKind::Kubernetes, Metadata::new());
    pending.status = None;
    store.seed(pending).await;
    let egress = Request {
        proxy_type: ProxyType::Egress,
        identity: Some("svc-a".to_string()),
        ingress_port: None,
        policy: None,
        provider: None,
    };
    let error = injector().plan(&store, "apps", egress).await.unwrap_err();
    assert!(matches!(error, Error::Validation(_)), "{error}");

    let ingress = Request {
        proxy_type: ProxyType::Ingress,
        identity: None,
        ingress_port: Some(8080),
        policy: None,
        provider: Some("nope".to_string()),
    };
    let error = injector().plan(&store, "apps", ingress).await.unwrap_err();
    assert!(error.is_not_found(), "{error}");
    assert!(
        !store.contains::<ServiceAccount>("apps", INGRESS_SERVICE_ACCOUNT),
        "a denied ingress request must not create the ingress service account"
    );
}

#[tokio::test]
async fn aws_and_issuerless_providers_are_rejected() {
    let store = MemoryStore::default();
    store
        .seed(AwsProvider {
            metadata: meta("aws"),
            spec: AwsProviderSpec {
                region: "eu-west-1".to_string(),
                identity_pool_id: "eu-west-1:pool".to_string(),
                role_arn: "arn:aws:iam::123456789012:role/aegis".to_string(),
            },
            status: None,
        })
        .await;
    store.seed(kubernetes_provider("k8s", None)).await;

    for provider in ["aws", "k8s"] {
        let req = Request {
            proxy_type: ProxyType::Ingress,
            identity: None,
            ingress_port: Some(8080),
            policy: None,
            provider: Some(provider.to_string()),
        };
        let error = injector().plan(&store, "apps", req).await.unwrap_err();
        assert!(matches!(error, Error::Validation(_)), "{provider}: {error}");
    }
    assert!(!store.contains::<ServiceAccount>("apps", INGRESS_SERVICE_ACCOUNT));
}

#[test]
fn apply_never_duplicates() {
    let plan = Plan {
        proxy_type: ProxyType::Egress,
        service_account: "svc-a".to_string(),
        provider_kind: ProviderKind::Kubernetes,
        provider_args: vec![],
        policy: None,
        script: "true".to_string(),
    };

    let mut pod = app_pod();
    assert!(injector().apply(&mut pod, &plan).unwrap());
    let once = pod.clone();
    assert!(!injector().apply(&mut pod, &plan).unwrap());
    assert_eq!(pod, once);

    // A pre-existing init container alone also suppresses injection.
    let mut pod = app_pod();
    pod.spec.as_mut().unwrap().init_containers = Some(vec![Container {
        name: INIT_CONTAINER.to_string(),
        ..Default::default()
    }]);
    let before = pod.clone();
    assert!(!injector().apply(&mut pod, &plan).unwrap());
    assert_eq!(pod, before);
}
