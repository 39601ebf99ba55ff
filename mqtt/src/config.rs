//! Connection configuration.
//!
//! [`ConnectConfig`] is what the surrounding application loads asynchronously
//! (broker address, credentials, transport scheme). The default value is the
//! empty config, meaning "not ready yet, do not connect".

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Broker credentials, passed through at connect time.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub username: String,
    #[serde(default)]
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

/// Transport scheme of a broker address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheme {
    /// Plain TCP (`mqtt`, `tcp`).
    Tcp,
    /// TCP with TLS (`mqtts`, `ssl`, `tls`).
    Tls,
    /// WebSocket (`ws`).
    Ws,
    /// WebSocket over TLS (`wss`).
    Wss,
}

impl Scheme {
    /// Default port when the config leaves it at 0.
    pub fn default_port(self) -> u16 {
        match self {
            Scheme::Tcp => 1883,
            Scheme::Tls => 8883,
            Scheme::Ws => 8083,
            Scheme::Wss => 8084,
        }
    }
}

impl FromStr for Scheme {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "" | "mqtt" | "tcp" => Ok(Scheme::Tcp),
            "mqtts" | "ssl" | "tls" => Ok(Scheme::Tls),
            "ws" => Ok(Scheme::Ws),
            "wss" => Ok(Scheme::Wss),
            other => Err(Error::InvalidConfig(format!("unsupported scheme {:?}", other))),
        }
    }
}

/// Broker connection configuration.
///
/// Compared by value: a namespace reconnects only when this changes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectConfig {
    /// Credentials sent in CONNECT.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub credentials: Option<Credentials>,
    /// Transport scheme (`mqtt`, `mqtts`, `ws`, `wss`).
    pub scheme: String,
    /// Broker host. Empty means the config is not ready.
    pub host: String,
    /// Broker port. 0 selects the scheme's default port.
    pub port: u16,
    /// URL path for WebSocket transports (e.g. `/mqtt`).
    #[serde(skip_serializing_if = "String::is_empty")]
    pub path: String,
}

impl ConnectConfig {
    /// Create a config for a plain TCP broker.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            scheme: "mqtt".to_string(),
            host: host.into(),
            port,
            ..Default::default()
        }
    }

    /// Parse a broker URL: `scheme://[user:pass@]host[:port][/path]`.
    pub fn from_url(addr: &str) -> Result<Self> {
        let url = url::Url::parse(addr).map_err(|e| Error::InvalidConfig(e.to_string()))?;
        let host = url
            .host_str()
            .ok_or_else(|| Error::InvalidConfig(format!("missing host in {:?}", addr)))?;

        let credentials = (!url.username().is_empty()).then(|| {
            Credentials::new(url.username(), url.password().unwrap_or_default())
        });

        let path = match url.path() {
            "" | "/" => String::new(),
            p => p.to_string(),
        };

        let config = Self {
            credentials,
            scheme: url.scheme().to_string(),
            host: host.to_string(),
            port: url.port().unwrap_or(0),
            path,
        };
        config.scheme()?;
        Ok(config)
    }

    /// Set the scheme.
    pub fn with_scheme(mut self, scheme: impl Into<String>) -> Self {
        self.scheme = scheme.into();
        self
    }

    /// Set the credentials.
    pub fn with_credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.credentials = Some(Credentials::new(username, password));
        self
    }

    /// Set the WebSocket path.
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    /// Returns true when no broker is configured yet.
    pub fn is_empty(&self) -> bool {
        self.host.is_empty()
    }

    /// The parsed transport scheme.
    pub fn scheme(&self) -> Result<Scheme> {
        self.scheme.parse()
    }

    /// The configured port, or the scheme's default.
    pub fn port_or_default(&self) -> Result<u16> {
        if self.port != 0 {
            return Ok(self.port);
        }
        Ok(self.scheme()?.default_port())
    }

    /// Broker URL without credentials, e.g. `ws://broker:8083/mqtt`.
    pub fn url(&self) -> String {
        let scheme = if self.scheme.is_empty() { "mqtt" } else { self.scheme.as_str() };
        let port = self.port_or_default().unwrap_or(self.port);
        format!("{}://{}:{}{}", scheme, self.host, port, self.path)
    }
}

/// Tuning knobs for opening a connection.
#[derive(Debug, Clone)]
pub struct ConnOptions {
    /// Client ID (defaults to `reactor-<uuid>`).
    pub client_id: Option<String>,
    /// Keep-alive interval.
    pub keep_alive: Duration,
    /// How long to wait for CONNACK before reporting `Disconnected`.
    pub connect_timeout: Duration,
    /// Clean session flag.
    pub clean_session: bool,
    /// Capacity of the outgoing request queue.
    pub request_capacity: usize,
}

impl Default for ConnOptions {
    fn default() -> Self {
        Self {
            client_id: None,
            keep_alive: Duration::from_secs(20),
            connect_timeout: Duration::from_secs(10),
            clean_session: true,
            request_capacity: 100,
        }
    }
}

impl ConnOptions {
    /// Set the client ID.
    pub fn with_client_id(mut self, id: impl Into<String>) -> Self {
        self.client_id = Some(id.into());
        self
    }

    /// Set the keep-alive interval.
    pub fn with_keep_alive(mut self, keep_alive: Duration) -> Self {
        self.keep_alive = keep_alive;
        self
    }

    /// Set the connection timeout.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the clean session flag.
    pub fn with_clean_session(mut self, clean: bool) -> Self {
        self.clean_session = clean;
        self
    }
}
