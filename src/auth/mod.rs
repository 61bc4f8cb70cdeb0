//! Access control for publish and play requests
//!
//! An [`Authenticator`] looks at a parsed [`StreamIdentity`] and either
//! accepts it, redirects it to another stream name, or rejects it. The
//! rewrite itself is applied by [`authorize`], so no authenticator can
//! change a connection's intent or credential.
//!
//! Variants are chosen from configuration:
//! - [`AllowAll`]: access control disabled
//! - [`StaticAuth`]: allow-list of `<intent>/<name>` glob patterns
//! - [`HttpAuth`]: delegate to an HTTP callback (nginx-rtmp `on_publish`/`on_play` style)

pub mod http;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use crate::config::ConfigError;
use crate::error::{Error, Result};
use crate::session::StreamIdentity;

pub use http::{HttpAuth, HttpAuthConfig};

/// Outcome of an authentication check
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthResult {
    /// Proceed with the identity unchanged
    Accept,
    /// Proceed, but on the named stream instead
    Redirect(String),
    /// Refuse the connection
    Reject(String),
}

/// Decides whether a stream identity may proceed
#[async_trait]
pub trait Authenticator: Send + Sync {
    async fn authenticate(&self, identity: &StreamIdentity) -> AuthResult;
}

/// Authenticate `identity` within `timeout` and return the effective identity
///
/// Timeouts, rejections and redirects to invalid names all deny access.
pub async fn authorize(
    authenticator: &dyn Authenticator,
    identity: StreamIdentity,
    timeout: Duration,
) -> Result<StreamIdentity> {
    let outcome = tokio::time::timeout(timeout, authenticator.authenticate(&identity))
        .await
        .unwrap_or_else(|_| AuthResult::Reject("authentication timed out".into()));

    match outcome {
        AuthResult::Accept => Ok(identity),
        AuthResult::Redirect(name) => {
            let redirected = identity.redirect(name).map_err(|e| Error::AuthDenied {
                stream: identity.format(),
                reason: format!("invalid redirect: {}", e),
            })?;
            tracing::debug!(from = %identity, to = %redirected, "Identity redirected");
            Ok(redirected)
        }
        AuthResult::Reject(reason) => Err(Error::AuthDenied {
            stream: identity.format(),
            reason,
        }),
    }
}

/// Accepts every identity unchanged
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

#[async_trait]
impl Authenticator for AllowAll {
    async fn authenticate(&self, _identity: &StreamIdentity) -> AuthResult {
        AuthResult::Accept
    }
}

/// Allow-list of glob patterns matched against `<intent>/<name>`
///
/// `*` matches any run of characters, e.g. `play/*` or `publish/studio-*`.
#[derive(Debug, Clone, Default)]
pub struct StaticAuth {
    allow: Vec<String>,
}

impl StaticAuth {
    pub fn new(allow: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            allow: allow.into_iter().map(Into::into).collect(),
        }
    }

    pub fn allows(&self, identity: &StreamIdentity) -> bool {
        let subject = identity.format();
        self.allow.iter().any(|pattern| glob_match(pattern, &subject))
    }
}

#[async_trait]
impl Authenticator for StaticAuth {
    async fn authenticate(&self, identity: &StreamIdentity) -> AuthResult {
        if self.allows(identity) {
            AuthResult::Accept
        } else {
            AuthResult::Reject("not in allow list".into())
        }
    }
}

fn glob_match(pattern: &str, text: &str) -> bool {
    let parts: Vec<&str> = pattern.split('*').collect();
    let (first, last) = match parts.as_slice() {
        [only] => return *only == text,
        [first, .., last] => (*first, *last),
        [] => return text.is_empty(),
    };

    let Some(mut rest) = text.strip_prefix(first) else {
        return false;
    };
    for middle in &parts[1..parts.len() - 1] {
        match rest.find(middle) {
            Some(i) => rest = &rest[i + middle.len()..],
            None => return false,
        }
    }
    rest.ends_with(last)
}

/// Authenticator selection
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum AuthConfig {
    /// No access control
    #[default]
    AllowAll,
    /// Static allow-list
    Static {
        #[serde(default)]
        allow: Vec<String>,
    },
    /// HTTP callback
    Http(HttpAuthConfig),
}

impl AuthConfig {
    /// Instantiate the configured authenticator
    pub fn build(&self) -> std::result::Result<Arc<dyn Authenticator>, ConfigError> {
        Ok(match self {
            AuthConfig::AllowAll => Arc::new(AllowAll),
            AuthConfig::Static { allow } => Arc::new(StaticAuth::new(allow.iter().cloned())),
            AuthConfig::Http(config) => Arc::new(
                HttpAuth::new(config.clone()).map_err(|e| ConfigError::Auth(e.to_string()))?,
            ),
        })
    }
}
