//! Issues identities as Entra ID application registrations.
//!
//! Each identity is an application whose display name is the service
//! account's subject, with a service principal, a self-assigned app role,
//! and a federated credential trusting the cluster's token issuer.

use crate::http;
use aegis_controller_core::{
    metadata, token, IdentityProvider, IdentityRef, Metadata, ProviderKind, Result,
};
use serde::{de::DeserializeOwned, Deserialize};
use serde_json::json;
use std::path::PathBuf;
use tracing::{debug, info, instrument};


pub const LOGIN_ENDPOINT: &str = "https://login.microsoftonline.com";
pub const GRAPH_ENDPOINT: &str = "https://graph.microsoft.com";

/// Audience of tokens exchanged through a federated credential.
pub const TOKEN_EXCHANGE_AUDIENCE: &str = "api://AzureADTokenExchange";

const CLIENT_ASSERTION_TYPE: &str = "urn:ietf:params:oauth:client-assertion-type:jwt-bearer";

#[derive(Clone, Debug)]
pub struct AzureAdapter {
    http: reqwest::Client,
    tenant_id: String,
    client_id: String,
    token_path: PathBuf,
    login_endpoint: String,
    graph_endpoint: String,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

#[derive(Debug, Deserialize)]
struct List<T> {
    value: Vec<T>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Application {
    id: String,
    app_id: String,
    #[serde(default)]
    app_roles: Vec<AppRole>,
}

#[derive(Debug, Deserialize)]
struct AppRole {
    id: String,
}

#[derive(Debug, Deserialize)]
struct ServicePrincipal {
    id: String,
}

#[derive(Debug, Deserialize)]
struct FederatedCredential {
    name: String,
}

/// An authenticated Graph session.
struct Graph<'a> {
    adapter: &'a AzureAdapter,
    token: String,
}

// === impl AzureAdapter ===

impl AzureAdapter {
    pub fn new(
        http: reqwest::Client,
        tenant_id: impl ToString,
        client_id: impl ToString,
        token_path: PathBuf,
    ) -> Self {
        Self {
            http,
            tenant_id: tenant_id.to_string(),
            client_id: client_id.to_string(),
            token_path,
            login_endpoint: LOGIN_ENDPOINT.to_string(),
            graph_endpoint: GRAPH_ENDPOINT.to_string(),
        }
    }

    pub fn with_endpoints(mut self, login: impl AsRef<str>, graph: impl AsRef<str>) -> Self {
        self.login_endpoint = login.as_ref().trim_end_matches('/').to_string();
        self.graph_endpoint = graph.as_ref().trim_end_matches('/').to_string();
        self
    }

    /// Exchanges the projected token for a Graph access token.
    async fn graph(&self, assertion: &str) -> Result<Graph<'_>> {
        let url = format!(
            "{}/{}/oauth2/v2.0/token",
            self.login_endpoint, self.tenant_id
        );
        let scope = format!("{GRAPH_ENDPOINT}/.default");
        let params = [
            ("grant_type", "client_credentials"),
            ("client_id", self.client_id.as_str()),
            ("scope", scope.as_str()),
            ("client_assertion_type", CLIENT_ASSERTION_TYPE),
            ("client_assertion", assertion),
        ];
        let rsp = self
            .http
            .post(url)
            .form(&params)
            .send()
            .await
            .map_err(http::send_error("azure token request"))?;
        let TokenResponse { access_token } = http::json(rsp, "azure token request").await?;
        Ok(Graph {
            adapter: self,
            token: access_token,
        })
    }
}

#[async_trait::async_trait]
impl IdentityProvider for AzureAdapter {
    #[instrument(skip_all, fields(identity = %identity, tenant = %self.tenant_id))]
    async fn create_identity(&self, identity: &IdentityRef) -> Result<Metadata> {
        let assertion = token::read(&self.token_path).await?;
        let issuer = token::issuer(&assertion)?;
        let graph = self.graph(&assertion).await?;
        let subject = identity.subject();

        let (app, sp) = match graph.application(&subject).await? {
            Some(app) => {
                debug!(app.id = %app.id, "Found application");
                let sp = match graph.service_principal(&app.app_id).await? {
                    Some(sp) => sp,
                    None => graph.create_service_principal(&app.app_id).await?,
                };
                (app, sp)
            }
            None => {
                info!(%subject, "Creating application");
                let app = graph.create_application(identity, &issuer).await?;
                let sp = graph.create_service_principal(&app.app_id).await?;
                (app, sp)
            }
        };

        if let Some(role) = app.app_roles.first() {
            graph.ensure_role_assignment(&sp, role).await?;
        }
        graph
            .ensure_federated_credential(&app, identity, &issuer)
            .await?;

        Ok(Metadata::from([
            (metadata::AZURE_OBJECT_ID.to_string(), app.id),
            (metadata::IDENTITY_ID.to_string(), app.app_id),
            (metadata::AZURE_TENANT_ID.to_string(), self.tenant_id.clone()),
            (
                metadata::IDENTITY_PROVIDER.to_string(),
                ProviderKind::Azure.to_string(),
            ),
        ]))
    }

    async fn get_identity(&self, identity: &IdentityRef) -> Result<bool> {
        let assertion = token::read(&self.token_path).await?;
        let graph = self.graph(&assertion).await?;
        Ok(graph.application(&identity.subject()).await?.is_some())
    }

    #[instrument(skip_all, fields(identity = %identity, tenant = %self.tenant_id))]
    async fn delete_identity(&self, identity: &IdentityRef, _: &Metadata) -> Result<()> {
        let assertion = token::read(&self.token_path).await?;
        let graph = self.graph(&assertion).await?;
        match graph.application(&identity.subject()).await? {
            Some(app) => {
                graph.delete(&format!("applications/{}", app.id)).await?;
                info!(app.id = %app.id, "Deleted application");
            }
            None => debug!("Application already deleted"),
        }
        Ok(())
    }

    fn name(&self) -> ProviderKind {
        ProviderKind::Azure
    }
}

// === impl Graph ===

impl Graph<'_> {
    fn url(&self, path: &str) -> String {
        format!("{}/v1.0/{}", self.adapter.graph_endpoint, path)
    }

    async fn get<T: DeserializeOwned>(&self, path: &str, filter: Option<String>) -> Result<T> {
        let context = format!("graph get {path}");
        let mut req = self.adapter.http.get(self.url(path)).bearer_auth(&self.token);
        if let Some(filter) = filter {
            req = req.query(&[("$filter", filter)]);
        }
        let rsp = req.send().await.map_err(http::send_error(&context))?;
        http::json(rsp, &context).await
    }

    async fn post<T: DeserializeOwned>(&self, path: &str, body: serde_json::Value) -> Result<T> {
        let context = format!("graph post {path}");
        let rsp = self
            .adapter
            .http
            .post(self.url(path))
            .bearer_auth(&self.token)
            .json(&body)
            .send()
            .await
            .map_err(http::send_error(&context))?;
        http::json(rsp, &context).await
    }

    async fn delete(&self, path: &str) -> Result<()> {
        let context = format!("graph delete {path}");
        let rsp = self
            .adapter
            .http
            .delete(self.url(path))
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(http::send_error(&context))?;
        if rsp.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(());
        }
        http::check(rsp, &context).await?;
        Ok(())
    }

    async fn application(&self, display_name: &str) -> Result<Option<Application>> {
        let List { value } = self
            .get::<List<Application>>(
                "applications",
                Some(format!("displayName eq '{display_name}'")),
            )
            .await?;
        Ok(value.into_iter().next())
    }

    async fn create_application(&self, identity: &IdentityRef, issuer: &str) -> Result<Application> {
        let subject = identity.subject();
        self.post(
            "applications",
            json!({
                "displayName": subject,
                "tags": [
                    "aegis",
                    format!("identity:{}", identity.name),
                    format!("identity.namespace:{}", identity.namespace),
                    format!("issuer:{issuer}"),
                ],
                "api": { "acceptMappedClaims": true },
                "appRoles": [{
                    "id": uuid::Uuid::new_v4().to_string(),
                    "displayName": subject,
                    "value": subject,
                    "description": subject,
                    "allowedMemberTypes": ["Application"],
                    "isEnabled": true,
                }],
            }),
        )
        .await
    }

    async fn service_principal(&self, app_id: &str) -> Result<Option<ServicePrincipal>> {
        let List { value } = self
            .get::<List<ServicePrincipal>>(
                "servicePrincipals",
                Some(format!("appId eq '{app_id}'")),
            )
            .await?;
        Ok(value.into_iter().next())
    }

    async fn create_service_principal(&self, app_id: &str) -> Result<ServicePrincipal> {
        self.post("servicePrincipals", json!({ "appId": app_id }))
            .await
    }

    /// Grants the service principal its own app role, once.
    async fn ensure_role_assignment(&self, sp: &ServicePrincipal, role: &AppRole) -> Result<()> {
        let path = format!("servicePrincipals/{}/appRoleAssignedTo", sp.id);
        let List { value } = self.get::<List<serde_json::Value>>(&path, None).await?;
        if !value.is_empty() {
            return Ok(());
        }
        let _: serde_json::Value = self
            .post(
                &format!("servicePrincipals/{}/appRoleAssignments", sp.id),
                json!({
                    "principalId": sp.id,
                    "resourceId": sp.id,
                    "appRoleId": role.id,
                }),
            )
            .await?;
        Ok(())
    }

    async fn ensure_federated_credential(
        &self,
        app: &Application,
        identity: &IdentityRef,
        issuer: &str,
    ) -> Result<()> {
        let path = format!("applications/{}/federatedIdentityCredentials", app.id);
        let List { value } = self.get::<List<FederatedCredential>>(&path, None).await?;
        if value.iter().any(|c| c.name == identity.name) {
            return Ok(());
        }
        let _: serde_json::Value = self
            .post(
                &path,
                json!({
                    "name": identity.name,
                    "issuer": issuer,
                    "subject": identity.subject(),
                    "audiences": [TOKEN_EXCHANGE_AUDIENCE],
                }),
            )
            .await?;
        Ok(())
    }
}
