//! Publish command.

use clap::Args;
use reactor_mqtt::{PublishOptions, QoS};
use std::time::Duration;
use tokio::time::timeout;

use super::open_namespace;
use crate::Cli;

/// Time left for the transport to flush before the process exits.
const FLUSH_GRACE: Duration = Duration::from_millis(300);

/// Publish one message and exit.
#[derive(Args)]
pub struct PublishCommand {
    /// Namespace to use
    #[arg(short = 'n', long, default_value = "default")]
    namespace: String,

    /// Topic name (no wildcards)
    topic: String,

    /// Message payload
    payload: String,

    /// QoS level (0 or 1)
    #[arg(long, default_value_t = 0)]
    qos: u8,

    /// Set the retain flag
    #[arg(long)]
    retain: bool,

    /// Seconds to wait for the broker connection
    #[arg(long, default_value_t = 10)]
    timeout: u64,
}

impl PublishCommand {
    pub async fn run(&self, cli: &Cli) -> anyhow::Result<()> {
        let (_hub, ns) = open_namespace(cli, &self.namespace)?;

        let mut state = ns.watch_state();
        let ready = timeout(
            Duration::from_secs(self.timeout),
            state.wait_for(|s| s.is_connected() || s.is_disconnected()),
        )
        .await
        .map(|r| r.map(|s| s.clone()));
        match ready {
            Err(_) => anyhow::bail!("timed out waiting for the broker"),
            Ok(Err(_)) => anyhow::bail!("namespace closed"),
            Ok(Ok(s)) if !s.is_connected() => anyhow::bail!("{}", s),
            Ok(Ok(_)) => {}
        }

        let mut opts = PublishOptions::default().with_qos(QoS::from(self.qos));
        if self.retain {
            opts = opts.with_retain();
        }

        let sent = ns.publish(&self.topic, self.payload.clone(), opts)?;
        if !sent {
            anyhow::bail!("broker connection dropped before publishing");
        }
        tracing::info!(topic = %self.topic, "published");

        ns.teardown();
        tokio::time::sleep(FLUSH_GRACE).await;
        Ok(())
    }
}
