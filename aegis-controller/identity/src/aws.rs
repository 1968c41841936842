//! Issues identities from a Cognito identity pool, logging in with a token
//! minted for the identity's service account.


use crate::ServiceAccountTokens;
use aegis_controller_core::{
    metadata, token, Error, IdentityProvider, IdentityRef, Metadata, ProviderKind, Result,
};
use aws_sdk_cognitoidentity::{
    config::{BehaviorVersion, Credentials, Region},
    error::DisplayErrorContext,
};
use std::{path::PathBuf, sync::Arc};
use tracing::{info, instrument, warn};

/// Audience of the service-account tokens presented to AWS.
pub const STS_AUDIENCE: &str = "sts.amazonaws.com";

const TOKEN_EXPIRATION_SECONDS: i64 = 3600;
const SESSION_NAME: &str = "k8s-service-account-session";
const CREDENTIALS_SOURCE: &str = "aegis-sts";

#[derive(Clone)]
pub struct AwsAdapter {
    region: String,
    identity_pool_id: String,
    role_arn: String,
    token_path: PathBuf,
    tokens: Arc<dyn ServiceAccountTokens>,
    cognito_endpoint: Option<String>,
    sts_endpoint: Option<String>,
}

fn sdk_error<E>(context: &'static str) -> impl FnOnce(E) -> Error
where
    E: std::error::Error,
{
    move |e| Error::external(context, DisplayErrorContext(e).to_string())
}

// === impl AwsAdapter ===

impl AwsAdapter {
    pub fn new(
        region: impl ToString,
        identity_pool_id: impl ToString,
        role_arn: impl ToString,
        token_path: PathBuf,
        tokens: Arc<dyn ServiceAccountTokens>,
    ) -> Self {
        Self {
            region: region.to_string(),
            identity_pool_id: identity_pool_id.to_string(),
            role_arn: role_arn.to_string(),
            token_path,
            tokens,
            cognito_endpoint: None,
            sts_endpoint: None,
        }
    }

    /// Overrides the regional Cognito Identity and STS endpoints.
    pub fn with_endpoints(mut self, cognito: impl ToString, sts: impl ToString) -> Self {
        self.cognito_endpoint = Some(cognito.to_string());
        self.sts_endpoint = Some(sts.to_string());
        self
    }

    /// A Cognito Identity client. Requests are signed only when credentials
    /// are given.
    fn cognito(&self, credentials: Option<Credentials>) -> aws_sdk_cognitoidentity::Client {
        let mut config = aws_sdk_cognitoidentity::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new(self.region.clone()));
        if let Some(endpoint) = self.cognito_endpoint.as_ref() {
            config = config.endpoint_url(endpoint);
        }
        if let Some(credentials) = credentials {
            config = config.credentials_provider(credentials);
        }
        aws_sdk_cognitoidentity::Client::from_conf(config.build())
    }

    fn sts(&self) -> aws_sdk_sts::Client {
        let mut config = aws_sdk_sts::Config::builder()
            .behavior_version(aws_sdk_sts::config::BehaviorVersion::latest())
            .region(aws_sdk_sts::config::Region::new(self.region.clone()));
        if let Some(endpoint) = self.sts_endpoint.as_ref() {
            config = config.endpoint_url(endpoint);
        }
        aws_sdk_sts::Client::from_conf(config.build())
    }

    /// Trades the controller's projected token for temporary credentials.
    async fn assume_role(&self) -> Result<Credentials> {
        let web_identity_token = token::read(&self.token_path).await?;
        let rsp = self
            .sts()
            .assume_role_with_web_identity()
            .role_arn(&self.role_arn)
            .role_session_name(SESSION_NAME)
            .web_identity_token(web_identity_token)
            .send()
            .await
            .map_err(sdk_error("sts AssumeRoleWithWebIdentity"))?;
        let credentials = rsp.credentials().ok_or_else(|| {
            Error::external(
                "sts AssumeRoleWithWebIdentity",
                "response carried no credentials",
            )
        })?;
        Ok(Credentials::new(
            credentials.access_key_id(),
            credentials.secret_access_key(),
            Some(credentials.session_token().to_string()),
            None,
            CREDENTIALS_SOURCE,
        ))
    }
}

impl std::fmt::Debug for AwsAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AwsAdapter")
            .field("region", &self.region)
            .field("identity_pool_id", &self.identity_pool_id)
            .field("role_arn", &self.role_arn)
            .finish_non_exhaustive()
    }
}

#[async_trait::async_trait]
impl IdentityProvider for AwsAdapter {
    #[instrument(skip_all, fields(identity = %identity, pool = %self.identity_pool_id))]
    async fn create_identity(&self, identity: &IdentityRef) -> Result<Metadata> {
        let sa_token = self
            .tokens
            .request_token(identity, STS_AUDIENCE, TOKEN_EXPIRATION_SECONDS)
            .await?;
        let issuer = token::read_issuer(&self.token_path).await?;

        let rsp = self
            .cognito(None)
            .get_id()
            .identity_pool_id(&self.identity_pool_id)
            .logins(issuer.trim_start_matches("https://"), sa_token)
            .send()
            .await
            .map_err(sdk_error("cognito GetId"))?;
        let identity_id = rsp
            .identity_id()
            .ok_or_else(|| Error::external("cognito GetId", "response carried no identity id"))?;
        info!(%identity_id, "Resolved cognito identity");

        Ok(Metadata::from([(
            metadata::IDENTITY_ID.to_string(),
            identity_id.to_string(),
        )]))
    }

    async fn get_identity(&self, _: &IdentityRef) -> Result<bool> {
        Err(Error::Unimplemented {
            operation: "GetIdentity",
            provider: ProviderKind::Aws,
        })
    }

    #[instrument(skip_all, fields(identity = %identity, pool = %self.identity_pool_id))]
    async fn delete_identity(&self, identity: &IdentityRef, recorded: &Metadata) -> Result<()> {
        let Some(identity_id) = recorded.get(metadata::IDENTITY_ID) else {
            warn!("No cognito identity recorded; nothing to delete");
            return Ok(());
        };

        let credentials = self.assume_role().await?;
        let rsp = self
            .cognito(Some(credentials))
            .delete_identities()
            .identity_ids_to_delete(identity_id)
            .send()
            .await
            .map_err(sdk_error("cognito DeleteIdentities"))?;

        if let Some(unprocessed) = rsp.unprocessed_identity_ids().first() {
            return Err(Error::external(
                "cognito DeleteIdentities",
                format!(
                    "identity {} was not deleted: {}",
                    unprocessed.identity_id().unwrap_or(identity_id.as_str()),
                    unprocessed
                        .error_code()
                        .map(|code| code.as_str())
                        .unwrap_or("unknown error"),
                ),
            ));
        }
        info!(%identity_id, "Deleted cognito identity");
        Ok(())
    }

    fn name(&self) -> ProviderKind {
        ProviderKind::Aws
    }
}
