//! Resource addresses.
//!
//! A `ResourceAddress` names one end of a connection: scheme, host, port,
//! path and an open bag of transport options. It is the routing key for
//! transports and the pooling key for persistent connections, so equality
//! and hashing cover every field.

use std::collections::BTreeMap;
use std::fmt;

use url::Url;

use crate::error::{GatewayError, Result};
use crate::transport::registry::TransportRegistry;

/// Well-known option keys consumed by the built-in transports.
pub mod options {
    /// Set to `"disabled"` to opt a connect address out of connection pooling.
    pub const HTTP_KEEPALIVE: &str = "http.keepalive";
    /// Keep-alive window in seconds used when the backend does not advertise one.
    pub const HTTP_KEEPALIVE_TIMEOUT: &str = "http.keepalive.timeout";
    /// Value of [`HTTP_KEEPALIVE`] that disables pooling.
    pub const DISABLED: &str = "disabled";
}

/// Immutable address of a transport endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceAddress {
    scheme: String,
    host: String,
    port: Option<u16>,
    path: String,
    options: BTreeMap<String, String>,
}

impl ResourceAddress {
    /// Create an address from its parts. The scheme is lowercased and an
    /// empty path becomes `/`.
    pub fn new(scheme: &str, host: &str, port: Option<u16>, path: &str) -> Self {
        Self {
            scheme: scheme.to_ascii_lowercase(),
            host: host.to_string(),
            port,
            path: normalize_path(path),
            options: BTreeMap::new(),
        }
    }

    /// Parse a URI, taking the default port for its scheme from the registry.
    pub fn parse(uri: &str, registry: &TransportRegistry) -> Result<Self> {
        let url = parse_url(uri)?;
        let default_port = registry.default_port(url.scheme())?;
        Self::from_url(uri, &url, default_port)
    }

    /// Parse a URI with an explicit default port instead of a registry lookup.
    pub fn parse_with_default(uri: &str, default_port: Option<u16>) -> Result<Self> {
        let url = parse_url(uri)?;
        Self::from_url(uri, &url, default_port)
    }

    fn from_url(uri: &str, url: &Url, default_port: Option<u16>) -> Result<Self> {
        let host = url.host_str().ok_or_else(|| GatewayError::InvalidAddress {
            uri: uri.to_string(),
            reason: "missing host".to_string(),
        })?;
        // The url crate hides a special scheme's default port, so fall back to it last.
        let port = url
            .port()
            .or(default_port)
            .or_else(|| url.port_or_known_default());
        let mut address = Self::new(url.scheme(), host, port, url.path());
        for (key, value) in url.query_pairs() {
            address.options.insert(key.into_owned(), value.into_owned());
        }
        Ok(address)
    }

    /// Return a copy with one more transport option.
    pub fn with_option(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.options.insert(key.into(), value.into());
        self
    }

    /// Return a copy with every option from `options` merged in.
    pub fn with_options<'a, I>(mut self, options: I) -> Self
    where
        I: IntoIterator<Item = (&'a String, &'a String)>,
    {
        for (key, value) in options {
            self.options.insert(key.clone(), value.clone());
        }
        self
    }

    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> Option<u16> {
        self.port
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn options(&self) -> &BTreeMap<String, String> {
        &self.options
    }

    /// Look up a single transport option.
    pub fn option(&self, key: &str) -> Option<&str> {
        self.options.get(key).map(String::as_str)
    }

    /// `host:port` suitable for a socket connect or bind.
    pub fn authority(&self) -> Result<String> {
        match self.port {
            Some(port) => Ok(format!("{}:{}", self.host, port)),
            None => Err(GatewayError::InvalidAddress {
                uri: self.to_string(),
                reason: format!("scheme {} has no default port", self.scheme),
            }),
        }
    }

    /// True unless the `http.keepalive` option is `disabled`.
    pub fn keep_alive_enabled(&self) -> bool {
        !self
            .option(options::HTTP_KEEPALIVE)
            .is_some_and(|v| v.eq_ignore_ascii_case(options::DISABLED))
    }
}

impl fmt::Display for ResourceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}", self.scheme, self.host)?;
        if let Some(port) = self.port {
            write!(f, ":{}", port)?;
        }
        write!(f, "{}", self.path)
    }
}

fn parse_url(uri: &str) -> Result<Url> {
    Url::parse(uri).map_err(|e| GatewayError::InvalidAddress {
        uri: uri.to_string(),
        reason: e.to_string(),
    })
}

fn normalize_path(path: &str) -> String {
    if path.is_empty() {
        "/".to_string()
    } else if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{}", path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn parse_with_explicit_port() {
        let addr = ResourceAddress::parse_with_default("tcp://backend:9000", None).unwrap();
        assert_eq!(addr.scheme(), "tcp");
        assert_eq!(addr.host(), "backend");
        assert_eq!(addr.port(), Some(9000));
        assert_eq!(addr.path(), "/");
        assert_eq!(addr.to_string(), "tcp://backend:9000/");
    }

    #[test]
    fn parse_fills_default_port() {
        let addr = ResourceAddress::parse_with_default("ws://example.com/echo", Some(80)).unwrap();
        assert_eq!(addr.port(), Some(80));
        assert_eq!(addr.path(), "/echo");
    }

    #[test]
    fn query_pairs_become_options() {
        let addr =
            ResourceAddress::parse_with_default("http://backend:8080/?http.keepalive=disabled", None)
                .unwrap();
        assert_eq!(addr.option("http.keepalive"), Some("disabled"));
        assert!(!addr.keep_alive_enabled());
    }

    #[test]
    fn equality_covers_options() {
        let a = ResourceAddress::new("http", "backend", Some(80), "/");
        let b = a.clone().with_option("http.keepalive", "disabled");
        assert_ne!(a, b);

        let mut set = HashSet::new();
        set.insert(a.clone());
        set.insert(a.clone());
        set.insert(b);
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn authority_requires_port() {
        let addr = ResourceAddress::new("pipe", "bus", None, "");
        assert!(addr.authority().is_err());
        let addr = ResourceAddress::new("tcp", "127.0.0.1", Some(7000), "");
        assert_eq!(addr.authority().unwrap(), "127.0.0.1:7000");
    }

    #[test]
    fn missing_host_is_rejected() {
        let err = ResourceAddress::parse_with_default("tcp:no-host", None).unwrap_err();
        assert!(matches!(err, GatewayError::InvalidAddress { .. }));
    }
}
