//! Outbound bearer-token acquisition.

use async_trait::async_trait;
use oauth2::basic::BasicClient;
use oauth2::reqwest::async_http_client;
use oauth2::{
    AuthUrl, ClientId, ClientSecret, ResourceOwnerPassword, ResourceOwnerUsername, Scope,
    TokenResponse, TokenUrl,
};
use tracing::info;

use crate::config::Oauth2Config;
use crate::error::{Result, TempusError};

/// Yields a fresh bearer token for outbound requests on demand.
#[async_trait]
pub trait AuthProvider: Send + Sync {
    /// `None` means "do not send an Authorization header".
    async fn job_token(&self) -> Result<Option<String>>;
}

/// Resource-owner password-credentials grant against the configured token
/// endpoint.
pub struct OauthPasswordProvider {
    client: BasicClient,
    /// Username/password pair; absent when no password-grant identity is
    /// configured, in which case no token is issued.
    identity: Option<(String, String)>,
}

impl OauthPasswordProvider {
    /// Build from configuration. Returns `None` (auth disabled) when the
    /// issuer, client id or token URL is missing.
    pub fn from_config(cfg: &Oauth2Config) -> Result<Option<Self>> {
        if !cfg.is_configured() {
            if cfg.issuer.is_empty() {
                info!("no issuer configured, outbound requests will not be authenticated");
            } else if cfg.client_id.is_empty() {
                info!("no client id configured, outbound requests will not be authenticated");
            } else {
                info!("no token URL configured, outbound requests will not be authenticated");
            }
            return Ok(None);
        }

        let token_url = TokenUrl::new(cfg.token_url.clone())
            .map_err(|err| TempusError::Auth(format!("invalid token URL: {err}")))?;
        // The password grant never touches the authorize endpoint; the token
        // URL stands in to satisfy the client constructor.
        let auth_url = AuthUrl::new(cfg.token_url.clone())
            .map_err(|err| TempusError::Auth(format!("invalid token URL: {err}")))?;

        let client = BasicClient::new(
            ClientId::new(cfg.client_id.clone()),
            Some(ClientSecret::new(cfg.client_secret.clone())),
            auth_url,
            Some(token_url),
        );

        let identity = cfg
            .has_password_identity()
            .then(|| (cfg.username.clone(), cfg.password.clone()));

        Ok(Some(Self { client, identity }))
    }
}

#[async_trait]
impl AuthProvider for OauthPasswordProvider {
    async fn job_token(&self) -> Result<Option<String>> {
        let Some((username, password)) = &self.identity else {
            return Ok(None);
        };

        let token = self
            .client
            .exchange_password(
                &ResourceOwnerUsername::new(username.clone()),
                &ResourceOwnerPassword::new(password.clone()),
            )
            .add_scope(Scope::new("openid".to_string()))
            .add_scope(Scope::new("profile".to_string()))
            .request_async(async_http_client)
            .await
            .map_err(|err| {
                TempusError::Auth(format!("unable to obtain token for user {username}: {err}"))
            })?;

        let access = token.access_token().secret().clone();
        if access.is_empty() {
            return Err(TempusError::Auth(format!(
                "access token was not returned for user {username}"
            )));
        }
        Ok(Some(access))
    }
}

/// Fixed token, for tests and pre-provisioned credentials.
pub struct StaticTokenProvider {
    token: String,
}

impl StaticTokenProvider {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

#[async_trait]
impl AuthProvider for StaticTokenProvider {
    async fn job_token(&self) -> Result<Option<String>> {
        if self.token.is_empty() {
            Ok(None)
        } else {
            Ok(Some(self.token.clone()))
        }
    }
}
