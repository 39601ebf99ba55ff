//! CLI configuration file.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use reactor_mqtt::{ConnOptions, ConnectConfig};
use serde::{Deserialize, Serialize};

use crate::Cli;

/// Default configuration filename.
pub const DEFAULT_CONFIG_FILE: &str = "reactormux.yaml";

/// Contents of the configuration file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Broker per namespace name.
    #[serde(default)]
    pub namespaces: BTreeMap<String, ConnectConfig>,

    /// Connection tuning shared by all namespaces.
    #[serde(default)]
    pub options: OptionsConfig,
}

/// Connection tuning (all optional).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OptionsConfig {
    /// Client ID (random when empty).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,

    /// Keep-alive interval in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keep_alive_secs: Option<u64>,

    /// CONNACK timeout in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connect_timeout_secs: Option<u64>,
}

impl OptionsConfig {
    /// Apply the configured values over the library defaults.
    pub fn to_options(&self) -> ConnOptions {
        let mut options = ConnOptions::default();
        if let Some(ref id) = self.client_id {
            options = options.with_client_id(id.clone());
        }
        if let Some(secs) = self.keep_alive_secs {
            options = options.with_keep_alive(Duration::from_secs(secs));
        }
        if let Some(secs) = self.connect_timeout_secs {
            options = options.with_connect_timeout(Duration::from_secs(secs));
        }
        options
    }
}

/// Loads a config from a YAML or JSON file.
pub fn load_config(path: &str) -> anyhow::Result<Config> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("failed to read config {}: {}", path, e))?;
    parse_config(&content, path)
}

fn parse_config(content: &str, path: &str) -> anyhow::Result<Config> {
    let ext = Path::new(path)
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("yaml");

    let config: Config = match ext.to_lowercase().as_str() {
        "json" => serde_json::from_str(content)?,
        _ => serde_yaml::from_str(content)?,
    };

    // Namespaces only log an unusable broker.
    for (name, broker) in &config.namespaces {
        broker
            .scheme()
            .map_err(|e| anyhow::anyhow!("namespace '{}' in {}: {}", name, path, e))?;
    }

    Ok(config)
}

/// Resolves the broker and options for `namespace`.
///
/// `--broker` wins over the config file.
pub fn resolve(cli: &Cli, namespace: &str) -> anyhow::Result<(ConnectConfig, ConnOptions)> {
    if let Some(ref url) = cli.broker {
        let options = match cli.config.as_deref() {
            Some(path) => load_config(path)?.options.to_options(),
            None => ConnOptions::default(),
        };
        return Ok((ConnectConfig::from_url(url)?, options));
    }

    let path = cli.config.as_deref().unwrap_or(DEFAULT_CONFIG_FILE);
    let config = load_config(path)?;
    match config.namespaces.get(namespace) {
        Some(broker) if !broker.is_empty() => Ok((broker.clone(), config.options.to_options())),
        Some(_) => anyhow::bail!("namespace '{}' has no host in {}", namespace, path),
        None => anyhow::bail!("namespace '{}' not found in {}", namespace, path),
    }
}
