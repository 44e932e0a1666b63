//! Tunnel start configuration and validation

use std::fmt;

use serde::{Deserialize, Serialize};
use url::Url;

/// Longest DNS name we accept, in characters
pub const MAX_HOSTNAME_LEN: usize = 253;

/// Longest single DNS label
const MAX_LABEL_LEN: usize = 63;

/// Configuration supplied by the caller when requesting a tunnel
///
/// The auth token is opaque here; only the provider interprets it.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct StartConfig {
    /// Public hostname the tunnel should answer on
    pub public_hostname: String,
    /// Local service URL, e.g. `http://localhost:9000`
    pub local_addr: String,
    /// Provider credential
    pub auth_token: String,
}

impl StartConfig {
    pub fn new(
        public_hostname: impl Into<String>,
        local_addr: impl Into<String>,
        auth_token: impl Into<String>,
    ) -> Self {
        Self {
            public_hostname: public_hostname.into(),
            local_addr: local_addr.into(),
            auth_token: auth_token.into(),
        }
    }
}

impl fmt::Debug for StartConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StartConfig")
            .field("public_hostname", &self.public_hostname)
            .field("local_addr", &self.local_addr)
            .field("auth_token", &"<redacted>")
            .finish()
    }
}

/// Scheme of the local service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LocalScheme {
    Http,
    Https,
}

impl LocalScheme {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Http => "http",
            Self::Https => "https",
        }
    }
}

/// Parsed `scheme://host:port` of the local service
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalAddr {
    pub scheme: LocalScheme,
    pub host: String,
    pub port: u16,
}

impl fmt::Display for LocalAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "{}://[{}]:{}", self.scheme.as_str(), self.host, self.port)
        } else {
            write!(f, "{}://{}:{}", self.scheme.as_str(), self.host, self.port)
        }
    }
}

/// A configuration that passed [`validate`]
///
/// Providers only ever see this type, never a raw [`StartConfig`].
#[derive(Clone, PartialEq)]
pub struct ValidConfig {
    public_hostname: String,
    local_addr: LocalAddr,
    auth_token: String,
}

impl ValidConfig {
    /// Normalized public hostname (lower-case, no trailing dot)
    pub fn public_hostname(&self) -> &str {
        &self.public_hostname
    }

    pub fn local_addr(&self) -> &LocalAddr {
        &self.local_addr
    }

    pub fn auth_token(&self) -> &str {
        &self.auth_token
    }
}

impl fmt::Debug for ValidConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ValidConfig")
            .field("public_hostname", &self.public_hostname)
            .field("local_addr", &self.local_addr.to_string())
            .field("auth_token", &"<redacted>")
            .finish()
    }
}

/// A single rejected field
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl ValidationError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Every field error found in one [`StartConfig`]
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{}", render(.0))]
pub struct ValidationErrors(pub Vec<ValidationError>);

fn render(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl ValidationErrors {
    pub fn errors(&self) -> &[ValidationError] {
        &self.0
    }

    /// Whether `field` was among the rejected fields
    pub fn has_field(&self, field: &str) -> bool {
        self.0.iter().any(|e| e.field == field)
    }
}

impl From<Vec<ValidationError>> for ValidationErrors {
    fn from(errors: Vec<ValidationError>) -> Self {
        Self(errors)
    }
}

/// Validate and normalize a [`StartConfig`]
///
/// Pure function; all failing fields are reported together.
pub fn validate(config: &StartConfig) -> Result<ValidConfig, ValidationErrors> {
    let mut errors = Vec::new();

    let hostname = validate_hostname(&config.public_hostname)
        .map_err(|msg| errors.push(ValidationError::new("public_hostname", msg)))
        .ok();

    let local_addr = parse_local_addr(&config.local_addr)
        .map_err(|msg| errors.push(ValidationError::new("local_addr", msg)))
        .ok();

    if config.auth_token.trim().is_empty() {
        errors.push(ValidationError::new("auth_token", "must not be empty"));
    }

    match (hostname, local_addr) {
        (Some(public_hostname), Some(local_addr)) if errors.is_empty() => Ok(ValidConfig {
            public_hostname,
            local_addr,
            auth_token: config.auth_token.clone(),
        }),
        _ => Err(ValidationErrors(errors)),
    }
}

fn validate_hostname(raw: &str) -> Result<String, String> {
    if raw.is_empty() {
        return Err("must not be empty".to_string());
    }
    if raw.chars().any(char::is_whitespace) {
        return Err("must not contain whitespace".to_string());
    }
    if raw.len() > MAX_HOSTNAME_LEN {
        return Err(format!("must be at most {MAX_HOSTNAME_LEN} characters"));
    }

    let name = raw.strip_suffix('.').unwrap_or(raw).to_ascii_lowercase();
    for label in name.split('.') {
        if label.is_empty() {
            return Err("must not contain empty labels".to_string());
        }
        if label.len() > MAX_LABEL_LEN {
            return Err(format!("label '{label}' exceeds {MAX_LABEL_LEN} characters"));
        }
        if label.starts_with('-') || label.ends_with('-') {
            return Err(format!("label '{label}' must not start or end with '-'"));
        }
        if !label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
            return Err(format!("label '{label}' contains invalid characters"));
        }
    }

    Ok(name)
}

fn parse_local_addr(raw: &str) -> Result<LocalAddr, String> {
    let url = Url::parse(raw).map_err(|e| format!("not a valid URL: {e}"))?;

    let scheme = match url.scheme() {
        "http" => LocalScheme::Http,
        "https" => LocalScheme::Https,
        other => return Err(format!("scheme must be http or https, got '{other}'")),
    };

    let host = match url.host() {
        Some(url::Host::Ipv6(addr)) => addr.to_string(),
        Some(host) => host.to_string(),
        None => return Err("missing host".to_string()),
    };

    if !has_explicit_port(raw) {
        return Err("must include an explicit port".to_string());
    }
    let port = url
        .port_or_known_default()
        .ok_or_else(|| "missing port".to_string())?;

    if url.path() != "/" || url.query().is_some() || url.fragment().is_some() {
        return Err("must not include a path, query or fragment".to_string());
    }

    Ok(LocalAddr { scheme, host, port })
}

/// `Url` drops default ports, so look at the authority as written
fn has_explicit_port(raw: &str) -> bool {
    let Some((_, rest)) = raw.split_once("://") else {
        return false;
    };
    let authority = rest.split(['/', '?', '#']).next().unwrap_or_default();
    let host_port = authority.rsplit('@').next().unwrap_or_default();
    let after_host = match host_port.strip_prefix('[') {
        Some(v6) => v6.split_once(']').map(|(_, rest)| rest).unwrap_or_default(),
        None => host_port,
    };
    after_host
        .rsplit_once(':')
        .is_some_and(|(_, port)| !port.is_empty() && port.chars().all(|c| c.is_ascii_digit()))
}
