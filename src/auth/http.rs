//! HTTP callback authenticator
//!
//! Sends the identity as a form POST, compatible with nginx-rtmp's
//! `on_publish` / `on_play` directives:
//!
//! ```text
//! call=<publish|play>&app=<application>&name=<stream>&<password_param>=<credential>
//! ```
//!
//! - 2xx: accept unchanged
//! - 307/308 with `Location`: accept, redirected to the location's path
//! - anything else, timeouts and transport errors: reject

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{header, redirect, StatusCode};
use serde::Deserialize;

use super::{AuthResult, Authenticator};
use crate::session::StreamIdentity;

/// HTTP authenticator configuration
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct HttpAuthConfig {
    /// Callback URL
    pub url: String,

    /// Value of the `app` form field
    #[serde(default = "default_application")]
    pub application: String,

    /// Request timeout in milliseconds
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Form field carrying the credential
    #[serde(default = "default_password_param")]
    pub password_param: String,
}

fn default_application() -> String {
    "stream".to_string()
}

fn default_timeout_ms() -> u64 {
    1000
}

fn default_password_param() -> String {
    "auth".to_string()
}

impl HttpAuthConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            application: default_application(),
            timeout_ms: default_timeout_ms(),
            password_param: default_password_param(),
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Authenticator backed by an HTTP callback
#[derive(Debug, Clone)]
pub struct HttpAuth {
    config: HttpAuthConfig,
    client: reqwest::Client,
}

impl HttpAuth {
    /// Build the client; redirects are surfaced to us, never followed
    pub fn new(config: HttpAuthConfig) -> reqwest::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .redirect(redirect::Policy::none())
            .build()?;

        Ok(Self { config, client })
    }

    pub fn config(&self) -> &HttpAuthConfig {
        &self.config
    }
}

#[async_trait]
impl Authenticator for HttpAuth {
    async fn authenticate(&self, identity: &StreamIdentity) -> AuthResult {
        let form = [
            ("call", identity.intent().as_str()),
            ("app", self.config.application.as_str()),
            ("name", identity.name()),
            (self.config.password_param.as_str(), identity.credential()),
        ];

        let response = match self.client.post(&self.config.url).form(&form[..]).send().await {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!(stream = %identity, error = %e, "Auth callback failed");
                return AuthResult::Reject(format!("auth callback failed: {}", e));
            }
        };

        let status = response.status();
        if status == StatusCode::TEMPORARY_REDIRECT || status == StatusCode::PERMANENT_REDIRECT {
            return match redirect_target(&response) {
                Some(name) => AuthResult::Redirect(name),
                None => AuthResult::Reject("redirect without usable location".into()),
            };
        }

        if status.is_success() {
            AuthResult::Accept
        } else {
            AuthResult::Reject(format!("auth callback returned {}", status))
        }
    }
}

/// Stream name from a redirect's `Location` path
fn redirect_target(response: &reqwest::Response) -> Option<String> {
    let location = response.headers().get(header::LOCATION)?.to_str().ok()?;
    let target = response.url().join(location).ok()?;
    Some(target.path().trim_start_matches('/').to_string())
}
