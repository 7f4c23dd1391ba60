//! Application Default Credentials.
//!
//! Credentials are resolved the way Google client libraries do it: an
//! explicit `GOOGLE_APPLICATION_CREDENTIALS` file, then the gcloud
//! well-known file, then the GCE/Cloud Run metadata server. Token minting
//! and refresh is left to `yup_oauth2`.

use super::api::install_crypto_provider;
use super::models::TokenInfo;
use crate::config::{Config, GoogleEndpoints};
use crate::error::{credentials_error, RemoteError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use google_calendar3::hyper_rustls::HttpsConnector;
use google_calendar3::hyper_util::client::legacy::connect::HttpConnector;
use google_calendar3::yup_oauth2::authenticator::{
    ApplicationDefaultCredentialsTypes, Authenticator,
};
use google_calendar3::yup_oauth2::{
    self, ApplicationDefaultCredentialsAuthenticator, ApplicationDefaultCredentialsFlowOpts,
    AuthorizedUserAuthenticator, ServiceAccountAuthenticator,
};
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

/// OAuth scope for full calendar access
pub const CALENDAR_SCOPE: &str = "https://www.googleapis.com/auth/calendar";

const METADATA_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(3);

const NO_PROJECT_ID: &str = "Unable to detect a Project Id in the current environment";

type GoogleAuthenticator = Authenticator<HttpsConnector<HttpConnector>>;

/// Where the credentials came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialKind {
    /// GOOGLE_APPLICATION_CREDENTIALS points at a file
    ExplicitFile,
    /// Resolved from the environment (gcloud file or metadata server)
    ApplicationDefault,
}

impl CredentialKind {
    pub fn describe(&self) -> &'static str {
        match self {
            CredentialKind::ExplicitFile => "Explicit credentials file",
            CredentialKind::ApplicationDefault => "ADC (Application Default Credentials)",
        }
    }
}

impl fmt::Display for CredentialKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.describe())
    }
}

/// Bearer token with its expiry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessToken {
    pub token: String,
    pub expires_at: Option<DateTime<Utc>>,
}

/// Authenticated identity that can mint access tokens
#[async_trait]
pub trait TokenSource: Send + Sync {
    /// A valid access token, refreshed if needed
    async fn access_token(&self) -> Result<AccessToken, RemoteError>;

    /// Project the credentials belong to
    async fn project_id(&self) -> Result<String, RemoteError>;

    /// Introspect the current token (principal email and expiry)
    async fn token_info(&self) -> Result<TokenInfo, RemoteError>;

    fn kind(&self) -> CredentialKind;
}

/// Resolves ambient credentials into a token source
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    async fn acquire(&self) -> Result<Arc<dyn TokenSource>, RemoteError>;
}

/// The fields of a credentials file needed before handing it to `yup_oauth2`
#[derive(Debug, Deserialize)]
struct CredentialsHeader {
    #[serde(rename = "type")]
    kind: String,
    project_id: Option<String>,
    quota_project_id: Option<String>,
}

/// Token source backed by a `yup_oauth2` authenticator
pub struct GoogleTokenSource {
    auth: GoogleAuthenticator,
    kind: CredentialKind,
    client: Client,
    endpoints: GoogleEndpoints,
    /// Project from the override or the credentials file
    project_hint: Option<String>,
}

#[async_trait]
impl TokenSource for GoogleTokenSource {
    async fn access_token(&self) -> Result<AccessToken, RemoteError> {
        let token = self
            .auth
            .token(&[CALENDAR_SCOPE])
            .await
            .map_err(|e| credentials_error(&format!("Failed to obtain access token: {}", e)))?;

        let value = token
            .token()
            .ok_or_else(|| credentials_error("Failed to obtain access token: empty token"))?;

        Ok(AccessToken {
            token: value.to_string(),
            expires_at: token
                .expiration_time()
                .and_then(|at| DateTime::<Utc>::from_timestamp(at.unix_timestamp(), 0)),
        })
    }

    async fn project_id(&self) -> Result<String, RemoteError> {
        match &self.project_hint {
            Some(project) => Ok(project.clone()),
            None => metadata_project_id(&self.client, &self.endpoints.metadata_host).await,
        }
    }

    async fn token_info(&self) -> Result<TokenInfo, RemoteError> {
        let token = self.access_token().await?;
        fetch_token_info(&self.client, &self.endpoints.tokeninfo_url, &token).await
    }

    fn kind(&self) -> CredentialKind {
        self.kind
    }
}

/// Ask the metadata server which project this instance runs in
async fn metadata_project_id(client: &Client, metadata_host: &str) -> Result<String, RemoteError> {
    let response = client
        .get(metadata_url(metadata_host, "project/project-id"))
        .header("Metadata-Flavor", "Google")
        .timeout(METADATA_TIMEOUT)
        .send()
        .await
        .map_err(|_| credentials_error(NO_PROJECT_ID))?;

    if !response.status().is_success() {
        return Err(credentials_error(NO_PROJECT_ID));
    }

    let project = response.text().await?.trim().to_string();
    if project.is_empty() {
        return Err(credentials_error(NO_PROJECT_ID));
    }
    Ok(project)
}

/// Look the token up on the tokeninfo endpoint
async fn fetch_token_info(
    client: &Client,
    tokeninfo_url: &str,
    token: &AccessToken,
) -> Result<TokenInfo, RemoteError> {
    let response = client
        .get(tokeninfo_url)
        .query(&[("access_token", token.token.as_str())])
        .send()
        .await?;

    if !response.status().is_success() {
        return Err(RemoteError::from_response(response).await);
    }

    let body: Value = response.json().await?;
    Ok(parse_token_info(&body, token.expires_at))
}

/// Tokeninfo returns numbers as strings; `exp` is epoch seconds
fn parse_token_info(body: &Value, fallback_expiry: Option<DateTime<Utc>>) -> TokenInfo {
    let email = body
        .get("email")
        .and_then(|e| e.as_str())
        .filter(|e| !e.is_empty())
        .map(|e| e.to_string());

    let expiry = body
        .get("exp")
        .and_then(|exp| match exp {
            Value::String(s) => s.parse::<i64>().ok(),
            Value::Number(n) => n.as_i64(),
            _ => None,
        })
        .and_then(|secs| DateTime::<Utc>::from_timestamp(secs, 0))
        .or(fallback_expiry);

    TokenInfo { email, expiry }
}

fn metadata_url(metadata_host: &str, path: &str) -> String {
    format!(
        "{}/computeMetadata/v1/{}",
        metadata_host.trim_end_matches('/'),
        path
    )
}

/// Resolves Application Default Credentials
pub struct ApplicationDefaultCredentials {
    client: Client,
    endpoints: GoogleEndpoints,
    credentials_file: Option<PathBuf>,
    well_known_file: Option<PathBuf>,
    project_override: Option<String>,
}

impl ApplicationDefaultCredentials {
    pub fn new(config: &Config) -> Self {
        Self {
            client: Client::new(),
            endpoints: config.endpoints.clone(),
            credentials_file: config.credentials_file.clone(),
            well_known_file: gcloud_well_known_file(),
            project_override: config.project_id.clone(),
        }
    }

    /// Override the gcloud well-known file location
    pub fn with_well_known_file(mut self, path: Option<PathBuf>) -> Self {
        self.well_known_file = path;
        self
    }

    fn source(
        &self,
        auth: GoogleAuthenticator,
        kind: CredentialKind,
        project_hint: Option<String>,
    ) -> Arc<dyn TokenSource> {
        Arc::new(GoogleTokenSource {
            auth,
            kind,
            client: self.client.clone(),
            endpoints: self.endpoints.clone(),
            project_hint: self.project_override.clone().or(project_hint),
        })
    }

    /// Build an authenticator from a service account or authorized user file
    async fn from_file(
        &self,
        path: &Path,
        kind: CredentialKind,
    ) -> Result<Arc<dyn TokenSource>, RemoteError> {
        let content = tokio::fs::read_to_string(path).await.map_err(|e| {
            credentials_error(&format!(
                "Failed to read credentials file {}: {}",
                path.display(),
                e
            ))
        })?;

        let header: CredentialsHeader = serde_json::from_str(&content).map_err(|e| {
            credentials_error(&format!(
                "Failed to parse credentials file {}: {}",
                path.display(),
                e
            ))
        })?;

        let auth = match header.kind.as_str() {
            "service_account" => {
                let key = yup_oauth2::parse_service_account_key(&content)
                    .map_err(|e| invalid_file(path, e))?;
                info!("Using service account {}", key.client_email);
                ServiceAccountAuthenticator::builder(key).build().await
            }
            "authorized_user" => {
                let secret = yup_oauth2::read_authorized_user_secret(path)
                    .await
                    .map_err(|e| invalid_file(path, e))?;
                info!("Using authorized user credentials");
                AuthorizedUserAuthenticator::builder(secret).build().await
            }
            other => {
                return Err(credentials_error(&format!(
                    "Unsupported credentials type \"{}\" in {}",
                    other,
                    path.display()
                )))
            }
        }
        .map_err(|e| invalid_file(path, e))?;

        Ok(self.source(auth, kind, header.project_id.or(header.quota_project_id)))
    }

    /// Authenticator backed by the instance metadata server
    async fn from_metadata(&self) -> Result<Arc<dyn TokenSource>, RemoteError> {
        let opts = ApplicationDefaultCredentialsFlowOpts::default();
        let auth = match ApplicationDefaultCredentialsAuthenticator::builder(opts).await {
            ApplicationDefaultCredentialsTypes::ServiceAccount(builder) => builder.build().await,
            ApplicationDefaultCredentialsTypes::InstanceMetadata(builder) => builder.build().await,
        }
        .map_err(|e| credentials_error(&format!("Failed to build metadata authenticator: {}", e)))?;

        Ok(self.source(auth, CredentialKind::ApplicationDefault, None))
    }

    async fn metadata_available(&self) -> bool {
        match self
            .client
            .get(metadata_url(&self.endpoints.metadata_host, ""))
            .header("Metadata-Flavor", "Google")
            .timeout(METADATA_TIMEOUT)
            .send()
            .await
        {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                debug!("Metadata server not reachable: {}", e);
                false
            }
        }
    }
}

#[async_trait]
impl CredentialProvider for ApplicationDefaultCredentials {
    async fn acquire(&self) -> Result<Arc<dyn TokenSource>, RemoteError> {
        install_crypto_provider();

        if let Some(path) = &self.credentials_file {
            debug!("Loading credentials from {}", path.display());
            return self.from_file(path, CredentialKind::ExplicitFile).await;
        }

        if let Some(path) = &self.well_known_file {
            if tokio::fs::try_exists(path).await.unwrap_or(false) {
                debug!("Loading gcloud credentials from {}", path.display());
                return self.from_file(path, CredentialKind::ApplicationDefault).await;
            }
        }

        if self.metadata_available().await {
            debug!("Using metadata server credentials");
            return self.from_metadata().await;
        }

        Err(credentials_error(
            "Could not load the default credentials. Set GOOGLE_APPLICATION_CREDENTIALS or run on Google Cloud",
        ))
    }
}

fn invalid_file(path: &Path, err: impl fmt::Display) -> RemoteError {
    credentials_error(&format!(
        "Invalid credentials file {}: {}",
        path.display(),
        err
    ))
}

/// Location gcloud writes application default credentials to
fn gcloud_well_known_file() -> Option<PathBuf> {
    let base = if cfg!(windows) {
        std::env::var_os("APPDATA").map(PathBuf::from)
    } else {
        std::env::var_os("HOME").map(|home| PathBuf::from(home).join(".config"))
    }?;
    Some(base.join("gcloud").join("application_default_credentials.json"))
}
