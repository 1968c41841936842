//! Issues identities as Vault entities.
//!
//! For each identity the adapter maintains an entity named after the service
//! account's subject, a JWT auth role bound to that subject, an alias linking
//! the entity to the JWT auth mount, and an OIDC role that signs identity
//! tokens for it.

use crate::http;
use aegis_controller_core::{
    metadata, token, Error, IdentityProvider, IdentityRef, Metadata, ProviderKind, Result,
};
use base64::Engine;
use serde::Deserialize;
use serde_json::json;
use std::path::PathBuf;
use tracing::{debug, info, instrument};


/// The JWT auth role the controller logs in with.
const LOGIN_ROLE: &str = "aegis";
const JWT_MOUNT: &str = "jwt/";
const OIDC_KEY: &str = "aegis-key";
const OIDC_TTL: &str = "1h";
const POLICIES: [&str; 2] = ["default", "jwt_issuer"];
const AEGIS_VERSION: &str = "1.0";

/// The audience of the tokens Vault's JWT auth method accepts.
pub const AUDIENCE: &str = "vault";

const TOKEN_TEMPLATE: &str = include_str!("vault/token_template.json");

#[derive(Clone, Debug)]
pub struct VaultAdapter {
    http: reqwest::Client,
    address: String,
    token_path: PathBuf,
}

#[derive(Debug, Deserialize)]
struct Data<T> {
    data: T,
}

#[derive(Debug, Deserialize)]
struct Login {
    auth: LoginAuth,
}

#[derive(Debug, Deserialize)]
struct LoginAuth {
    client_token: String,
}

#[derive(Debug, Deserialize)]
struct Entity {
    id: String,
    #[serde(default)]
    aliases: Option<Vec<EntityAlias>>,
}

#[derive(Debug, Deserialize)]
struct EntityAlias {
    id: String,
    #[serde(default)]
    mount_accessor: String,
}

#[derive(Debug, Deserialize)]
struct AuthMount {
    accessor: String,
}

// === impl VaultAdapter ===

impl VaultAdapter {
    pub fn new(http: reqwest::Client, address: impl AsRef<str>, token_path: PathBuf) -> Self {
        Self {
            http,
            address: address.as_ref().trim_end_matches('/').to_string(),
            token_path,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/v1/{}", self.address, path)
    }

    async fn login(&self) -> Result<String> {
        let jwt = token::read(&self.token_path).await?;
        let rsp = self
            .http
            .post(self.url("auth/jwt/login"))
            .json(&json!({ "jwt": jwt, "role": LOGIN_ROLE }))
            .send()
            .await
            .map_err(http::send_error("vault login"))?;
        let login: Login = http::json(rsp, "vault login").await?;
        Ok(login.auth.client_token)
    }

    async fn entity(&self, token: &str, name: &str) -> Result<Option<Entity>> {
        let rsp = self
            .http
            .get(self.url(&format!("identity/entity/name/{name}")))
            .header("X-Vault-Token", token)
            .send()
            .await
            .map_err(http::send_error("vault read entity"))?;
        if rsp.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let Data { data } = http::json(rsp, "vault read entity").await?;
        Ok(Some(data))
    }

    async fn create_entity(&self, token: &str, identity: &IdentityRef) -> Result<Entity> {
        let rsp = self
            .http
            .post(self.url("identity/entity"))
            .header("X-Vault-Token", token)
            .json(&json!({
                "name": identity.subject(),
                "metadata": {
                    "aegis_version": AEGIS_VERSION,
                    "aegis_identity_name": identity.name,
                    "aegis_identity_namespace": identity.namespace,
                },
            }))
            .send()
            .await
            .map_err(http::send_error("vault create entity"))?;
        http::check(rsp, "vault create entity").await?;

        // The create response omits aliases, so read the entity back.
        self.entity(token, &identity.subject())
            .await?
            .ok_or_else(|| Error::not_found("vault entity", &identity.namespace, identity.subject()))
    }

    async fn write(&self, token: &str, path: &str, body: serde_json::Value) -> Result<()> {
        let context = format!("vault write {path}");
        let rsp = self
            .http
            .post(self.url(path))
            .header("X-Vault-Token", token)
            .json(&body)
            .send()
            .await
            .map_err(http::send_error(&context))?;
        http::check(rsp, &context).await?;
        Ok(())
    }

    /// Deletes are idempotent: a missing object counts as deleted.
    async fn delete(&self, token: &str, path: &str) -> Result<()> {
        let context = format!("vault delete {path}");
        let rsp = self
            .http
            .delete(self.url(path))
            .header("X-Vault-Token", token)
            .send()
            .await
            .map_err(http::send_error(&context))?;
        if rsp.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(());
        }
        http::check(rsp, &context).await?;
        Ok(())
    }

    async fn jwt_accessor(&self, token: &str) -> Result<String> {
        let rsp = self
            .http
            .get(self.url("sys/auth"))
            .header("X-Vault-Token", token)
            .send()
            .await
            .map_err(http::send_error("vault list auth methods"))?;
        let mounts: serde_json::Value = http::json(rsp, "vault list auth methods").await?;
        let mount = mounts
            .get("data")
            .and_then(|d| d.get(JWT_MOUNT))
            .or_else(|| mounts.get(JWT_MOUNT))
            .cloned()
            .ok_or_else(|| {
                Error::external("vault list auth methods", "jwt auth method is not enabled")
            })?;
        let AuthMount { accessor } = serde_json::from_value(mount)
            .map_err(|e| Error::external("vault list auth methods", e))?;
        Ok(accessor)
    }
}

#[async_trait::async_trait]
impl IdentityProvider for VaultAdapter {
    #[instrument(skip_all, fields(identity = %identity))]
    async fn create_identity(&self, identity: &IdentityRef) -> Result<Metadata> {
        let token = self.login().await?;
        let subject = identity.subject();

        let entity = match self.entity(&token, &subject).await? {
            Some(entity) => entity,
            None => {
                info!(%subject, "Creating vault entity");
                self.create_entity(&token, identity).await?
            }
        };
        debug!(entity.id = %entity.id, "Resolved vault entity");

        self.write(
            &token,
            &format!("auth/jwt/role/{}", identity.name),
            json!({
                "role_type": "jwt",
                "user_claim": "sub",
                "bound_subject": subject,
                "bound_audiences": [AUDIENCE],
                "policies": POLICIES,
            }),
        )
        .await?;

        let accessor = self.jwt_accessor(&token).await?;
        let aliased = entity
            .aliases
            .iter()
            .flatten()
            .any(|a| a.mount_accessor == accessor);
        if !aliased {
            self.write(
                &token,
                "identity/entity-alias",
                json!({
                    "name": subject,
                    "canonical_id": entity.id,
                    "mount_accessor": accessor,
                }),
            )
            .await?;
        }

        let template = base64::engine::general_purpose::STANDARD.encode(TOKEN_TEMPLATE);
        self.write(
            &token,
            &format!("identity/oidc/role/{}", identity.name),
            json!({ "key": OIDC_KEY, "template": template, "ttl": OIDC_TTL }),
        )
        .await?;

        Ok(Metadata::from([
            (metadata::IDENTITY_ID.to_string(), entity.id),
            (
                metadata::IDENTITY_PROVIDER.to_string(),
                ProviderKind::HashicorpVault.to_string(),
            ),
            (metadata::VAULT_ADDRESS.to_string(), self.address.clone()),
        ]))
    }

    async fn get_identity(&self, identity: &IdentityRef) -> Result<bool> {
        let token = self.login().await?;
        Ok(self.entity(&token, &identity.subject()).await?.is_some())
    }

    #[instrument(skip_all, fields(identity = %identity))]
    async fn delete_identity(&self, identity: &IdentityRef, _: &Metadata) -> Result<()> {
        let token = self.login().await?;
        let subject = identity.subject();

        self.delete(&token, &format!("auth/jwt/role/{}", identity.name))
            .await?;
        self.delete(&token, &format!("identity/oidc/role/{}", identity.name))
            .await?;

        if let Some(entity) = self.entity(&token, &subject).await? {
            for alias in entity.aliases.iter().flatten() {
                self.delete(&token, &format!("identity/entity-alias/id/{}", alias.id))
                    .await?;
            }
        }
        self.delete(&token, &format!("identity/entity/name/{subject}"))
            .await?;

        info!(%subject, "Deleted vault identity");
        Ok(())
    }

    fn name(&self) -> ProviderKind {
        ProviderKind::HashicorpVault
    }
}
