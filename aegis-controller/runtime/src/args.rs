use crate::{
    admission::Admission,
    controller::{self, identity, provider},
    inject::Injector,
    k8s::{AwsProvider, AzureProvider, HashicorpVaultProvider, Identity, KubernetesProvider},
    resolver::{AdapterConfig, Resolver},
    store::KubeStore,
    tokens::KubeTokens,
};
use anyhow::{bail, Result};
use clap::Parser;
use kube::Api;
use prometheus_client::registry::Registry;
use std::{path::PathBuf, sync::Arc};
use tracing::{info_span, Instrument};

#[derive(Debug, Parser)]
#[clap(name = "aegis", about = "An identity and proxy-injection controller")]
pub struct Args {
    #[clap(
        long,
        default_value = "aegis=info,warn",
        env = "AEGIS_CONTROLLER_LOG"
    )]
    log_level: kubert::LogFilter,

    #[clap(long, default_value = "plain")]
    log_format: kubert::LogFormat,

    #[clap(flatten)]
    client: kubert::ClientArgs,

    #[clap(flatten)]
    server: kubert::ServerArgs,

    #[clap(flatten)]
    admin: kubert::AdminArgs,

    /// Disables the admission controller server.
    #[clap(long)]
    admission_controller_disabled: bool,

    #[clap(long, default_value = "registry.localhost:5000/aegis-proxy:1.1")]
    proxy_image: String,

    /// Image of the init container that installs traffic redirection.
    #[clap(long, default_value = "registry.localhost:5000/aegis-iptables:1.0")]
    init_image: String,

    /// Projected token the controller logs in to Vault with.
    #[clap(long, default_value = "/var/run/secrets/tokens/token")]
    vault_token_path: PathBuf,

    #[clap(long, default_value = "/var/run/secrets/tokens/azure_token")]
    azure_token_path: PathBuf,

    #[clap(long, default_value = "/var/run/secrets/tokens/aws_token")]
    aws_token_path: PathBuf,

    /// The controller's own service-account token, whose issuer Kubernetes
    /// providers publish.
    #[clap(
        long,
        default_value = "/var/run/secrets/kubernetes.io/serviceaccount/token"
    )]
    kubernetes_token_path: PathBuf,
}

impl Args {
    #[inline]
    pub async fn parse_and_run() -> Result<()> {
        Self::parse().run().await
    }

    pub async fn run(self) -> Result<()> {
        let Self {
            admin,
            client,
            log_level,
            log_format,
            server,
            admission_controller_disabled,
            proxy_image,
            init_image,
            vault_token_path,
            azure_token_path,
            aws_token_path,
            kubernetes_token_path,
        } = self;

        let server = if admission_controller_disabled {
            None
        } else {
            Some(server)
        };

        let mut prom = <Registry>::default();
        let rt_metrics = kubert::RuntimeMetrics::register(prom.sub_registry_with_prefix("kube"));

        let runtime = kubert::Runtime::builder()
            .with_log(log_level, log_format)
            .with_metrics(rt_metrics)
            .with_admin(admin.into_builder().with_prometheus(prom))
            .with_client(client)
            .with_optional_server(server)
            .build()
            .await?;

        let http = reqwest::Client::builder()
            .user_agent(concat!("aegis-controller/", env!("CARGO_PKG_VERSION")))
            .build()?;
        let store = KubeStore::new(runtime.client());
        let adapters = AdapterConfig {
            http,
            vault_token: vault_token_path,
            azure_token: azure_token_path,
            aws_token: aws_token_path,
            tokens: Arc::new(KubeTokens::new(runtime.client())),
        };

        // Spawn reconciliation loops.

        let identities = Arc::new(identity::Context {
            store: store.clone(),
            resolver: Resolver::new(store.clone(), adapters),
        });
        tokio::spawn(
            controller::run(
                Api::<Identity>::all(runtime.client()),
                identities,
                identity::reconcile,
                runtime.shutdown_handle(),
            )
            .instrument(info_span!("identities")),
        );

        let providers = Arc::new(provider::Context {
            store: store.clone(),
            kubernetes_token: kubernetes_token_path,
        });
        tokio::spawn(
            controller::run(
                Api::<HashicorpVaultProvider>::all(runtime.client()),
                providers.clone(),
                provider::reconcile,
                runtime.shutdown_handle(),
            )
            .instrument(info_span!("hashicorpvaultproviders")),
        );
        tokio::spawn(
            controller::run(
                Api::<AzureProvider>::all(runtime.client()),
                providers.clone(),
                provider::reconcile,
                runtime.shutdown_handle(),
            )
            .instrument(info_span!("azureproviders")),
        );
        tokio::spawn(
            controller::run(
                Api::<AwsProvider>::all(runtime.client()),
                providers.clone(),
                provider::reconcile,
                runtime.shutdown_handle(),
            )
            .instrument(info_span!("awsproviders")),
        );
        tokio::spawn(
            controller::run(
                Api::<KubernetesProvider>::all(runtime.client()),
                providers,
                provider::reconcile,
                runtime.shutdown_handle(),
            )
            .instrument(info_span!("kubernetesproviders")),
        );

        let admission = Admission::new(
            store,
            Injector {
                proxy_image,
                init_image,
            },
        );
        let runtime = runtime.spawn_server(move || admission.clone());

        // Block the main thread on the shutdown signal. Once it fires, wait for
        // the reconcilers to finish.
        if runtime.run().await.is_err() {
            bail!("Aborted");
        }

        Ok(())
    }
}
