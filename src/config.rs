//! Provider configuration.
//!
//! Startup settings come from the environment; the host's `configure` call
//! may then override the server URL.

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::ProviderError;
use crate::openapi::OpenApi;
use crate::schema::{Attribute, Schema};

/// Location of the interface description (file path or `http(s)` URL).
pub const OPENAPI_ENV: &str = "AEP_OPENAPI";
/// Prefix the document's paths carry in front of resource patterns.
pub const PATH_PREFIX_ENV: &str = "AEP_PATH_PREFIX";
/// Server URL overriding the document's first server.
pub const SERVER_URL_ENV: &str = "AEP_SERVER_URL";
/// Prefix of host resource and data source type names.
pub const PROVIDER_PREFIX_ENV: &str = "AEP_PROVIDER_PREFIX";

/// Default prefix of host type names.
pub const DEFAULT_PROVIDER_PREFIX: &str = "aep";

/// Name of the provider configuration attribute that overrides the server URL.
pub const SERVER_URL_ATTRIBUTE: &str = "server_url";

/// Settings for one provider instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Where to load the interface description from.
    pub openapi_path: String,
    /// Prefix in front of resource patterns, e.g. `/v1`.
    #[serde(default)]
    pub path_prefix: String,
    /// Server URL override.
    #[serde(default)]
    pub server_url: Option<String>,
    /// Prefix of host type names.
    #[serde(default = "default_provider_prefix")]
    pub provider_prefix: String,
}

fn default_provider_prefix() -> String {
    DEFAULT_PROVIDER_PREFIX.to_string()
}

/// The host's `configure` payload.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ConfigureRequest {
    /// Server URL override.
    #[serde(default)]
    pub server_url: Option<String>,
}

impl ProviderConfig {
    /// Create a configuration for a description location with defaults.
    pub fn new(openapi_path: impl Into<String>) -> Self {
        Self {
            openapi_path: openapi_path.into(),
            path_prefix: String::new(),
            server_url: None,
            provider_prefix: default_provider_prefix(),
        }
    }

    /// Set the path prefix.
    pub fn with_path_prefix(mut self, path_prefix: impl Into<String>) -> Self {
        self.path_prefix = path_prefix.into();
        self
    }

    /// Set the server URL override.
    pub fn with_server_url(mut self, server_url: impl Into<String>) -> Self {
        self.server_url = Some(server_url.into());
        self
    }

    /// Set the host type-name prefix.
    pub fn with_provider_prefix(mut self, provider_prefix: impl Into<String>) -> Self {
        self.provider_prefix = provider_prefix.into();
        self
    }

    /// Read the configuration from the process environment.
    pub fn from_env() -> Result<Self, ProviderError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read the configuration through a variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ProviderError> {
        let openapi_path = lookup(OPENAPI_ENV)
            .filter(|value| !value.is_empty())
            .ok_or_else(|| {
                ProviderError::Configuration(format!("{} must be set", OPENAPI_ENV))
            })?;

        let mut config = Self::new(openapi_path);
        if let Some(prefix) = lookup(PATH_PREFIX_ENV) {
            config.path_prefix = prefix;
        }
        config.server_url = lookup(SERVER_URL_ENV).filter(|value| !value.is_empty());
        if let Some(prefix) = lookup(PROVIDER_PREFIX_ENV).filter(|value| !value.is_empty()) {
            config.provider_prefix = prefix;
        }
        Ok(config)
    }

    /// Apply a host `configure` payload.
    pub fn apply(&mut self, payload: &serde_json::Value) -> Result<(), ProviderError> {
        if payload.is_null() {
            return Ok(());
        }
        let request: ConfigureRequest = serde_json::from_value(payload.clone())?;
        if let Some(server_url) = request.server_url.filter(|value| !value.is_empty()) {
            self.server_url = Some(server_url);
        }
        Ok(())
    }

    /// The base URL requests are made against.
    ///
    /// The override wins over the document's first server; the path prefix
    /// is appended to either.
    pub fn base_url(&self, document: &OpenApi) -> Result<String, ProviderError> {
        let server = self
            .server_url
            .as_deref()
            .or_else(|| document.server_url())
            .ok_or_else(|| {
                ProviderError::Configuration(
                    "no server URL configured and the description declares no servers".to_string(),
                )
            })?;

        Url::parse(server).map_err(|e| {
            ProviderError::Configuration(format!("invalid server URL '{}': {}", server, e))
        })?;

        let prefix = self.path_prefix.trim_matches('/');
        if prefix.is_empty() {
            Ok(server.trim_end_matches('/').to_string())
        } else {
            Ok(format!("{}/{}", server.trim_end_matches('/'), prefix))
        }
    }

    /// Schema of the provider configuration block.
    pub fn schema() -> Schema {
        Schema::v0().with_attribute(
            SERVER_URL_ATTRIBUTE,
            Attribute::optional_string()
                .with_description("Base URL of the API, overriding the description's servers"),
        )
    }
}
