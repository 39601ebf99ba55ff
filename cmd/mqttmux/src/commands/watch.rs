//! Watch command: print every message matching the given patterns.

use clap::Args;
use reactor_mqtt::{QoS, ReconnectPolicy, SubscribeOptions};
use std::sync::Arc;
use std::time::Duration;

use super::{display_payload, open_namespace};
use crate::Cli;

/// Print `topic payload` lines until Ctrl-C.
#[derive(Args)]
pub struct WatchCommand {
    /// Namespace to use
    #[arg(short = 'n', long, default_value = "default")]
    namespace: String,

    /// Topic patterns (`+` and `#` wildcards allowed)
    #[arg(required = true)]
    patterns: Vec<String>,

    /// QoS for the subscriptions (0 or 1)
    #[arg(long, default_value_t = 0)]
    qos: u8,

    /// Seconds to wait before reconnecting after a drop
    #[arg(long, default_value_t = 3)]
    retry_secs: u64,
}

impl WatchCommand {
    pub async fn run(&self, cli: &Cli) -> anyhow::Result<()> {
        let (_hub, ns) = open_namespace(cli, &self.namespace)?;

        let opts = SubscribeOptions::default()
            .with_qos(QoS::from(self.qos))
            .with_owner("watch");
        let mut subscriptions = Vec::with_capacity(self.patterns.len());
        for pattern in &self.patterns {
            let handler = Arc::new(|msg: &reactor_mqtt::Message| -> reactor_mqtt::Result<()> {
                println!("{} {}", msg.topic, display_payload(&msg.payload));
                Ok(())
            });
            subscriptions.push(ns.subscribe_with(pattern, handler, opts.clone())?);
        }

        let reconnect = ns.spawn_reconnect(ReconnectPolicy {
            delay: Duration::from_secs(self.retry_secs),
            max_attempts: None,
        });

        let mut state = ns.watch_state();
        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => break,
                changed = state.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let current = state.borrow_and_update().clone();
                    eprintln!("[{}] {}", ns.name(), current);
                }
            }
        }

        reconnect.abort();
        drop(subscriptions);
        ns.teardown();
        Ok(())
    }
}
