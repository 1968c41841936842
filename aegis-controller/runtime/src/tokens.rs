use crate::k8s::{ServiceAccount, TokenRequest, TokenRequestSpec};
use aegis_controller_core::{Error, IdentityRef, Result};
use aegis_controller_identity::ServiceAccountTokens;
use kube::api::{Api, PostParams};

/// Requests service-account tokens from the API server.
#[derive(Clone)]
pub struct KubeTokens {
    client: kube::Client,
}

impl KubeTokens {
    pub fn new(client: kube::Client) -> Self {
        Self { client }
    }
}

#[async_trait::async_trait]
impl ServiceAccountTokens for KubeTokens {
    async fn request_token(
        &self,
        service_account: &IdentityRef,
        audience: &str,
        expiration_seconds: i64,
    ) -> Result<String> {
        let api = Api::<ServiceAccount>::namespaced(self.client.clone(), &service_account.namespace);
        let request = TokenRequest {
            spec: TokenRequestSpec {
                audiences: vec![audience.to_string()],
                expiration_seconds: Some(expiration_seconds),
                ..Default::default()
            },
            ..Default::default()
        };
        let rsp = api
            .create_token_request(&service_account.name, &PostParams::default(), &request)
            .await
            .map_err(|e| Error::external(format!("token request for {service_account}"), e))?;
        rsp.status
            .map(|s| s.token)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| {
                Error::external(
                    format!("token request for {service_account}"),
                    "response carried no token",
                )
            })
    }
}
