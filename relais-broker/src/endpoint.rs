//! Adresses de transport au format `tcp://host:port`

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::SocketAddr;
use std::str::FromStr;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum EndpointError {
    #[error("Unsupported transport scheme in '{0}' (expected tcp://)")]
    UnsupportedScheme(String),
    #[error("Missing host in '{0}'")]
    MissingHost(String),
    #[error("Missing port in '{0}'")]
    MissingPort(String),
    #[error("Invalid port in '{0}'")]
    InvalidPort(String),
}

/// Adresse d'écoute ou de connexion d'un connecteur
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Endpoint {
    host: String,
    port: u16,
}

impl Endpoint {
    pub fn new<S: Into<String>>(host: S, port: u16) -> Self {
        Self { host: host.into(), port }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Couple utilisable par `TcpListener::bind` / `TcpStream::connect`
    pub fn target(&self) -> (&str, u16) {
        (self.host.as_str(), self.port)
    }
}

impl From<SocketAddr> for Endpoint {
    fn from(addr: SocketAddr) -> Self {
        Self { host: addr.ip().to_string(), port: addr.port() }
    }
}

impl FromStr for Endpoint {
    type Err = EndpointError;

    fn from_str(url: &str) -> Result<Self, Self::Err> {
        let rest = url
            .strip_prefix("tcp://")
            .ok_or_else(|| EndpointError::UnsupportedScheme(url.to_string()))?;
        // on ignore un éventuel chemin ou query (?wireFormat=...)
        let authority = rest.split(['/', '?']).next().unwrap_or_default();

        let (host, port) = if let Some(bracketed) = authority.strip_prefix('[') {
            let (host, tail) = bracketed
                .split_once(']')
                .ok_or_else(|| EndpointError::MissingHost(url.to_string()))?;
            let port = tail
                .strip_prefix(':')
                .ok_or_else(|| EndpointError::MissingPort(url.to_string()))?;
            (host, port)
        } else {
            authority
                .rsplit_once(':')
                .ok_or_else(|| EndpointError::MissingPort(url.to_string()))?
        };

        if host.is_empty() {
            return Err(EndpointError::MissingHost(url.to_string()));
        }
        if port.is_empty() {
            return Err(EndpointError::MissingPort(url.to_string()));
        }
        let port = port
            .parse::<u16>()
            .map_err(|_| EndpointError::InvalidPort(url.to_string()))?;

        Ok(Self::new(host, port))
    }
}

impl TryFrom<String> for Endpoint {
    type Error = EndpointError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Endpoint> for String {
    fn from(endpoint: Endpoint) -> Self {
        endpoint.to_string()
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "tcp://[{}]:{}", self.host, self.port)
        } else {
            write!(f, "tcp://{}:{}", self.host, self.port)
        }
    }
}
