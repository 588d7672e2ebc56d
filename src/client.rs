//! Request execution against the remote API.
//!
//! [`RequestExecutor`] is the seam resource operations call through. The
//! reqwest-backed [`HttpExecutor`] is used in production; tests substitute
//! [`InMemoryApi`](crate::testing::InMemoryApi).

use std::fmt;

use reqwest::{Client, StatusCode};
use serde_json::{Map, Value};
use tracing::{debug, error, instrument};

use crate::error::ProviderError;

/// Maximum length of a response body written to logs.
const MAX_LOG_BODY_LENGTH: usize = 200;

/// HTTP verbs used by resource operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    /// Read.
    Get,
    /// Create.
    Post,
    /// Update.
    Patch,
    /// Delete.
    Delete,
}

impl Method {
    fn as_reqwest(self) -> reqwest::Method {
        match self {
            Self::Get => reqwest::Method::GET,
            Self::Post => reqwest::Method::POST,
            Self::Patch => reqwest::Method::PATCH,
            Self::Delete => reqwest::Method::DELETE,
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Patch => "PATCH",
            Self::Delete => "DELETE",
        };
        f.write_str(name)
    }
}

/// Executes one request and returns the decoded JSON response.
///
/// An empty response body decodes to `Value::Null`. A missing resource is
/// [`ProviderError::NotFound`]; any other failure is
/// [`ProviderError::Remote`] carrying the server's message.
#[async_trait::async_trait]
pub trait RequestExecutor: Send + Sync + 'static {
    /// Execute `method` against `url` with an optional JSON body.
    async fn execute(
        &self,
        method: Method,
        url: &str,
        body: Option<&Map<String, Value>>,
    ) -> Result<Value, ProviderError>;
}

/// A [`RequestExecutor`] backed by reqwest.
#[derive(Debug, Clone)]
pub struct HttpExecutor {
    client: Client,
}

impl HttpExecutor {
    /// Create an executor with a default client.
    pub fn new() -> Result<Self, ProviderError> {
        let client = Client::builder()
            .user_agent(concat!("hemmer-provider-aep/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client })
    }

    /// Create an executor around an existing client.
    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait::async_trait]
impl RequestExecutor for HttpExecutor {
    #[instrument(skip(self, body))]
    async fn execute(
        &self,
        method: Method,
        url: &str,
        body: Option<&Map<String, Value>>,
    ) -> Result<Value, ProviderError> {
        debug!("{} {}", method, url);

        let mut request = self.client.request(method.as_reqwest(), url);
        if let Some(body) = body {
            debug!(body = %body_for_log(body), "Request body");
            request = request.json(body);
        }

        let response = request.send().await?;
        let status = response.status();
        let text = response.text().await?;
        debug!(%status, body = %sanitize_for_log(&text), "Response received");
        interpret_response(status, &text, url)
    }
}

/// Decode a response, turning failures into errors.
pub fn interpret_response(status: StatusCode, body: &str, url: &str) -> Result<Value, ProviderError> {
    if status == StatusCode::NOT_FOUND {
        return Err(ProviderError::NotFound(url.to_string()));
    }

    let json = if body.trim().is_empty() {
        Value::Null
    } else {
        match serde_json::from_str::<Value>(body) {
            Ok(json) => json,
            Err(err) if status.is_success() => return Err(err.into()),
            Err(_) => {
                error!("API error: {} - {}", status, sanitize_for_log(body));
                return Err(ProviderError::Remote(format!(
                    "request to {} failed with status {}",
                    url, status
                )));
            },
        }
    };

    if !status.is_success() {
        error!("API error: {} - {}", status, sanitize_for_log(body));
        return Err(ProviderError::Remote(remote_message(&json).unwrap_or_else(|| {
            format!("request to {} failed with status {}", url, status)
        })));
    }

    if let Some(message) = embedded_error(&json) {
        error!("API error in response body: {}", sanitize_for_log(body));
        return Err(ProviderError::Remote(message));
    }
    Ok(json)
}

/// The failure carried by a successful response, if any.
///
/// A body with an `error` field is a failure. So is a body with a `code`
/// field, unless it is a resource representation (which carries `path`).
fn embedded_error(json: &Value) -> Option<String> {
    let object = json.as_object()?;
    if object.contains_key("error") || (object.contains_key("code") && !object.contains_key("path")) {
        return remote_message(json);
    }
    None
}

fn remote_message(json: &Value) -> Option<String> {
    let object = json.as_object()?;
    if let Some(error) = object.get("error") {
        return Some(match error {
            Value::String(message) => message.clone(),
            Value::Object(details) => match details.get("message") {
                Some(Value::String(message)) => message.clone(),
                _ => error.to_string(),
            },
            other => other.to_string(),
        });
    }
    if object.contains_key("code") {
        return Some(match object.get("message") {
            Some(Value::String(message)) => message.clone(),
            _ => json.to_string(),
        });
    }
    None
}

fn body_for_log(body: &Map<String, Value>) -> String {
    sanitize_for_log(&serde_json::to_string(body).unwrap_or_default())
}

fn sanitize_for_log(body: &str) -> String {
    let truncated = if body.chars().count() > MAX_LOG_BODY_LENGTH {
        let head: String = body.chars().take(MAX_LOG_BODY_LENGTH).collect();
        format!("{}... [truncated, {} bytes total]", head, body.len())
    } else {
        body.to_string()
    };
    truncated.replace(|c: char| !c.is_ascii_graphic() && c != ' ', "")
}
