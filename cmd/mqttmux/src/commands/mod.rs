//! CLI commands module.

mod publish;
mod watch;

pub use publish::PublishCommand;
pub use watch::WatchCommand;

use reactor_mqtt::{Hub, Namespace, RumqttcConnector};
use std::sync::Arc;

use crate::Cli;
use crate::config;

/// Opens `namespace` against the broker resolved from the CLI flags.
pub(crate) fn open_namespace(cli: &Cli, namespace: &str) -> anyhow::Result<(Hub, Namespace)> {
    let (broker, options) = config::resolve(cli, namespace)?;
    let hub = Hub::with_connector(Arc::new(RumqttcConnector::new()), options);
    hub.ensure_connected(namespace, broker)?;
    let ns = hub.namespace(namespace);
    Ok((hub, ns))
}

/// Formats a payload for display: text as is, binary as hex.
pub(crate) fn display_payload(payload: &[u8]) -> String {
    match std::str::from_utf8(payload) {
        Ok(s) => s.to_string(),
        Err(_) => payload.iter().map(|b| format!("{:02x}", b)).collect(),
    }
}
