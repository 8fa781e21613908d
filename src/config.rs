//! Connection settings
//!
//! Settings are a plain value handed in by whatever loads the service
//! configuration. Components only see them through [`ServiceSettings`].

use aws_config::{BehaviorVersion, Region, SdkConfig};
use aws_sdk_dynamodb::config::Credentials;
use aws_types::sdk_config::{RetryConfig, TimeoutConfig};
use serde::Deserialize;
use std::fmt;
use std::time::Duration;

/// LocalStack edge endpoint used when `AWS_PROFILE=localstack`
const LOCALSTACK_ENDPOINT: &str = "http://127.0.0.1:4566";

/// Read-only view of the settings a store connection needs
pub trait ServiceSettings {
    /// AWS region; the default provider chain is used when absent
    fn region(&self) -> Option<&str>;
    /// Endpoint override, e.g. DynamoDB Local
    fn endpoint_url(&self) -> Option<&str>;
    /// Deployment environment tag (`development`, `production`, ...)
    fn environment(&self) -> &str;
    /// Object storage bucket used by the exporters
    fn bucket(&self) -> Option<&str>;
    /// Static credentials; the default provider chain is used when absent
    fn credentials(&self) -> Option<&StaticCredentials>;
}

/// Access key pair
#[derive(Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StaticCredentials {
    /// Access key id
    pub access_key_id: String,
    /// Secret access key
    pub secret_access_key: String,
    /// Session token for temporary credentials
    #[serde(default)]
    pub session_token: Option<String>,
}

impl fmt::Debug for StaticCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StaticCredentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"** redacted **")
            .field("session_token", &self.session_token.as_ref().map(|_| "** redacted **"))
            .finish()
    }
}

/// Connection settings of one environment
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreConfig {
    /// AWS region
    #[serde(default)]
    pub region: Option<String>,
    /// Endpoint override
    #[serde(default, alias = "endpointURL")]
    pub endpoint_url: Option<String>,
    /// Environment tag
    #[serde(default = "default_environment")]
    pub environment: String,
    /// Export bucket
    #[serde(default)]
    pub bucket: Option<String>,
    /// Static credentials
    #[serde(default)]
    pub credentials: Option<StaticCredentials>,
}

fn default_environment() -> String {
    "development".to_string()
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            region: None,
            endpoint_url: None,
            environment: default_environment(),
            bucket: None,
            credentials: None,
        }
    }
}

impl StoreConfig {
    /// Settings for a region
    pub fn new(region: impl Into<String>) -> Self {
        Self {
            region: Some(region.into()),
            ..Self::default()
        }
    }

    /// Sets the endpoint override
    pub fn with_endpoint_url(mut self, endpoint_url: impl Into<String>) -> Self {
        self.endpoint_url = Some(endpoint_url.into());
        self
    }

    /// Sets the environment tag
    pub fn with_environment(mut self, environment: impl Into<String>) -> Self {
        self.environment = environment.into();
        self
    }
}

impl ServiceSettings for StoreConfig {
    fn region(&self) -> Option<&str> {
        self.region.as_deref()
    }

    fn endpoint_url(&self) -> Option<&str> {
        self.endpoint_url.as_deref()
    }

    fn environment(&self) -> &str {
        &self.environment
    }

    fn bucket(&self) -> Option<&str> {
        self.bucket.as_deref()
    }

    fn credentials(&self) -> Option<&StaticCredentials> {
        self.credentials.as_ref()
    }
}

/// Loads an SDK config with sensible defaults, then applies the settings
///
/// Defaults:
/// - Adaptive retry mode with 3 max attempts
/// - Exponential backoff starting at 1 second
/// - Connect timeout: 3 seconds
/// - Read timeout: 20 seconds
/// - Operation timeout: 60 seconds
/// - LocalStack support via AWS_PROFILE=localstack
///
/// An explicit endpoint in the settings wins over the LocalStack default.
pub async fn load_sdk_config(settings: &impl ServiceSettings) -> SdkConfig {
    let timeout_config = TimeoutConfig::builder()
        .connect_timeout(Duration::from_secs(3))
        .read_timeout(Duration::from_secs(20))
        .operation_timeout(Duration::from_secs(60))
        .build();

    let mut loader = aws_config::defaults(BehaviorVersion::latest())
        .retry_config(
            RetryConfig::adaptive()
                .with_max_attempts(3)
                .with_initial_backoff(Duration::from_secs(1)),
        )
        .timeout_config(timeout_config);

    if std::env::var("AWS_PROFILE").unwrap_or_default() == "localstack" {
        loader = loader.endpoint_url(LOCALSTACK_ENDPOINT);
    }

    if let Some(endpoint_url) = settings.endpoint_url() {
        loader = loader.endpoint_url(endpoint_url);
    }

    if let Some(region) = settings.region() {
        loader = loader.region(Region::new(region.to_string()));
    }

    if let Some(credentials) = settings.credentials() {
        loader = loader.credentials_provider(Credentials::new(
            credentials.access_key_id.clone(),
            credentials.secret_access_key.clone(),
            credentials.session_token.clone(),
            None,
            "vulnscore-static",
        ));
    }

    loader.load().await
}
