use std::{env, fmt, time::Duration};

use thiserror::Error;
use url::Url;

use crate::{
    BACKEND_ENDPOINT_ENV, BACKEND_TIMEOUT_ENV, DEFAULT_BACKEND_ENDPOINT,
    DEFAULT_BACKEND_TIMEOUT_MS, RPC_TIMEOUT_ENV,
};

const ENDPOINT_SCHEME: &str = "tcp";

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub(crate) enum EndpointError {
    #[error("backend endpoint is empty")]
    Empty,
    #[error("invalid backend endpoint '{0}': {1}")]
    Invalid(String, String),
    #[error("unsupported endpoint scheme '{0}', only tcp is allowed")]
    UnsupportedScheme(String),
    #[error("backend endpoint '{0}' has no host")]
    MissingHost(String),
    #[error("backend endpoint '{0}' has no port")]
    MissingPort(String),
}

/// A backend RPC listener address of the form `tcp://host:port`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Endpoint {
    host: String,
    port: u16,
}

impl Endpoint {
    pub(crate) fn parse(raw: &str) -> Result<Self, EndpointError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(EndpointError::Empty);
        }

        let parsed = Url::parse(trimmed)
            .map_err(|error| EndpointError::Invalid(trimmed.to_string(), error.to_string()))?;
        if parsed.scheme() != ENDPOINT_SCHEME {
            return Err(EndpointError::UnsupportedScheme(parsed.scheme().to_string()));
        }
        if !matches!(parsed.path(), "" | "/") || parsed.query().is_some() {
            return Err(EndpointError::Invalid(
                trimmed.to_string(),
                "transport addresses carry no path or query".to_string(),
            ));
        }

        let host = parsed
            .host_str()
            .filter(|host| !host.is_empty())
            .ok_or_else(|| EndpointError::MissingHost(trimmed.to_string()))?
            .to_string();
        let port = parsed
            .port()
            .ok_or_else(|| EndpointError::MissingPort(trimmed.to_string()))?;

        Ok(Self { host, port })
    }

    pub(crate) fn host(&self) -> &str {
        &self.host
    }

    pub(crate) fn port(&self) -> u16 {
        self.port
    }

    /// `host:port`, suitable for `TcpStream::connect`.
    pub(crate) fn socket_address(&self) -> String {
        format!("{}:{}", self.host(), self.port())
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{ENDPOINT_SCHEME}://{}", self.socket_address())
    }
}

pub(crate) fn normalize_backend_endpoint(raw: &str, default_endpoint: &str) -> String {
    match Endpoint::parse(raw) {
        Ok(endpoint) => endpoint.to_string(),
        Err(EndpointError::Empty) => default_endpoint.to_string(),
        Err(error) => {
            crate::append_desktop_log(&format!(
                "{error}; falling back to {default_endpoint}"
            ));
            default_endpoint.to_string()
        }
    }
}

pub(crate) fn resolve_backend_endpoint() -> String {
    normalize_backend_endpoint(
        &env::var(BACKEND_ENDPOINT_ENV).unwrap_or_default(),
        DEFAULT_BACKEND_ENDPOINT,
    )
}

pub(crate) fn parse_rpc_timeout(raw: Option<&str>) -> Option<Duration> {
    let timeout_ms = raw?.trim().parse::<u64>().ok()?;
    if timeout_ms == 0 {
        return None;
    }
    Some(Duration::from_millis(timeout_ms))
}

pub(crate) fn resolve_rpc_timeout() -> Option<Duration> {
    parse_rpc_timeout(env::var(RPC_TIMEOUT_ENV).ok().as_deref())
}

/// How long a launched backend gets to start listening. Always bounded.
pub(crate) fn parse_backend_startup_timeout(raw: Option<&str>) -> Duration {
    let timeout_ms = raw
        .and_then(|value| value.trim().parse::<u64>().ok())
        .filter(|value| *value > 0)
        .unwrap_or(DEFAULT_BACKEND_TIMEOUT_MS);
    Duration::from_millis(timeout_ms)
}

pub(crate) fn resolve_backend_startup_timeout() -> Duration {
    parse_backend_startup_timeout(env::var(BACKEND_TIMEOUT_ENV).ok().as_deref())
}
