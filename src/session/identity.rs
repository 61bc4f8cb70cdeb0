//! Stream identity parsing
//!
//! Every connection announces what it wants to do with an identity string
//! supplied at connect time. Two syntaxes are understood:
//!
//! ```text
//! publish/<name>[/<credential>]
//! play/<name>[/<credential>]
//! #!::r=<name>,m=<publish|request|play>,s=<credential>
//! ```
//!
//! The credential never leaves this type in printable form: `Display`
//! yields `<intent>/<name>` and `Debug` redacts it.

use std::fmt;
use std::str::FromStr;

/// Prefix of the key/value access-control syntax
const ACCESS_CONTROL_PREFIX: &str = "#!::";

/// Default key holding the credential in the key/value syntax
pub const DEFAULT_CREDENTIAL_KEY: &str = "s";

/// What a connection intends to do with a stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Intent {
    /// Feed the stream
    Publish,
    /// Receive the stream
    Play,
}

impl Intent {
    /// Token used in the serialized form
    pub fn as_str(&self) -> &'static str {
        match self {
            Intent::Publish => "publish",
            Intent::Play => "play",
        }
    }
}

impl fmt::Display for Intent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Intent {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "publish" => Ok(Intent::Publish),
            "play" => Ok(Intent::Play),
            other => Err(ParseError::UnknownIntent(other.to_string())),
        }
    }
}

/// Error returned when an identity string cannot be parsed
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    /// Not of the form `<intent>/<name>[/<credential>]`
    #[error("malformed stream id: expected <intent>/<name>[/<credential>]")]
    Malformed,
    /// Intent token is not `publish` or `play`
    #[error("unknown intent '{0}'")]
    UnknownIntent(String),
    /// Stream name is empty
    #[error("empty stream name")]
    EmptyName,
    /// Stream name contains a reserved character
    #[error("invalid stream name '{0}'")]
    InvalidName(String),
}

/// Parsed identity of a connection: intent, stream name and credential
#[derive(Clone, PartialEq, Eq)]
pub struct StreamIdentity {
    intent: Intent,
    name: String,
    credential: String,
}

impl StreamIdentity {
    /// Build an identity, validating the stream name
    pub fn new(
        intent: Intent,
        name: impl Into<String>,
        credential: impl Into<String>,
    ) -> Result<Self, ParseError> {
        let name = name.into();
        validate_name(&name)?;
        Ok(Self {
            intent,
            name,
            credential: credential.into(),
        })
    }

    /// Parse with the default credential key
    pub fn parse(raw: &str) -> Result<Self, ParseError> {
        IdentityParser::default().parse(raw)
    }

    pub fn intent(&self) -> Intent {
        self.intent
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Opaque access credential (empty when none was supplied)
    pub fn credential(&self) -> &str {
        &self.credential
    }

    /// Whether both identities route to the same stream
    pub fn same_stream(&self, other: &StreamIdentity) -> bool {
        self.name == other.name
    }

    /// Identity with a different stream name, keeping intent and credential
    pub fn redirect(&self, name: impl Into<String>) -> Result<Self, ParseError> {
        Self::new(self.intent, name, self.credential.clone())
    }

    /// Credential-free serialized form, `<intent>/<name>`
    pub fn format(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for StreamIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.intent, self.name)
    }
}

impl fmt::Debug for StreamIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamIdentity")
            .field("intent", &self.intent)
            .field("name", &self.name)
            .field("credential", &"<redacted>")
            .finish()
    }
}

impl FromStr for StreamIdentity {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

fn validate_name(name: &str) -> Result<(), ParseError> {
    if name.is_empty() {
        return Err(ParseError::EmptyName);
    }
    if name.contains('/') || name.chars().any(char::is_control) {
        return Err(ParseError::InvalidName(name.to_string()));
    }
    Ok(())
}

/// Identity parser with a configurable credential field
#[derive(Debug, Clone)]
pub struct IdentityParser {
    credential_key: String,
}

impl IdentityParser {
    /// Parser reading the credential from `credential_key` in the key/value syntax
    pub fn new(credential_key: impl Into<String>) -> Self {
        Self {
            credential_key: credential_key.into(),
        }
    }

    /// Parse a raw identity string
    pub fn parse(&self, raw: &str) -> Result<StreamIdentity, ParseError> {
        match raw.strip_prefix(ACCESS_CONTROL_PREFIX) {
            Some(pairs) => self.parse_access_control(pairs),
            None => Self::parse_path(raw),
        }
    }

    fn parse_path(raw: &str) -> Result<StreamIdentity, ParseError> {
        let mut parts = raw.split('/');
        let intent = parts.next().ok_or(ParseError::Malformed)?;
        let name = parts.next().ok_or(ParseError::Malformed)?;
        let credential = parts.next().unwrap_or_default();
        if parts.next().is_some() {
            return Err(ParseError::Malformed);
        }

        StreamIdentity::new(intent.parse()?, name, credential)
    }

    fn parse_access_control(&self, pairs: &str) -> Result<StreamIdentity, ParseError> {
        let mut name = None;
        let mut intent = Intent::Play;
        let mut credential = String::new();

        for pair in pairs.split(',').filter(|p| !p.is_empty()) {
            let (key, value) = pair.split_once('=').ok_or(ParseError::Malformed)?;
            match key {
                "r" => name = Some(value),
                "m" => {
                    intent = match value {
                        "publish" => Intent::Publish,
                        "request" | "play" => Intent::Play,
                        other => return Err(ParseError::UnknownIntent(other.to_string())),
                    }
                }
                k if k == self.credential_key => credential = value.to_string(),
                _ => {}
            }
        }

        StreamIdentity::new(intent, name.unwrap_or_default(), credential)
    }
}

impl Default for IdentityParser {
    fn default() -> Self {
        Self::new(DEFAULT_CREDENTIAL_KEY)
    }
}
