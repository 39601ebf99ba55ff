//! MQTT subscription multiplexer.
//!
//! Many consumers inside one process share a single broker connection per
//! [`Namespace`]. Each consumer registers a topic pattern (with `+` and `#`
//! wildcards) and a handler; every incoming message is delivered to all
//! handlers whose pattern matches. Wire-level subscriptions are reference
//! counted and replayed after every reconnect.
//!
//! # Example
//!
//! ```no_run
//! use reactor_mqtt::{ConnectConfig, Hub, PublishOptions};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let hub = Hub::new();
//!     let ns = hub.namespace("telemetry");
//!
//!     let _status = ns.subscribe_func("devices/+/status", |msg| {
//!         println!("{}: {:?}", msg.topic, msg.payload_str());
//!         Ok(())
//!     })?;
//!
//!     ns.ensure_connected(ConnectConfig::new("127.0.0.1", 1883))?;
//!     ns.watch_state().wait_for(|s| s.is_connected()).await?;
//!
//!     ns.publish("devices/unit7/status", "online", PublishOptions::default())?;
//!     Ok(())
//! }
//! ```
//!
//! # Example - Dispatch only
//!
//! ```
//! use reactor_mqtt::{Message, ServeMux};
//!
//! let mux = ServeMux::new();
//! mux.handle_func("devices/#", |msg| {
//!     println!("Received: {:?}", msg.payload);
//!     Ok(())
//! }).unwrap();
//!
//! let report = mux.dispatch(&Message::new("devices/unit7/status", "online"));
//! assert_eq!(report.matched, 1);
//! ```

mod client;
mod config;
mod error;
mod manager;
mod namespace;
mod registry;
mod serve_mux;
#[cfg(test)]
mod tests;
mod topic;
mod transport;
mod types;

pub use client::RumqttcConnector;
pub use config::{ConnOptions, ConnectConfig, Credentials, Scheme};
pub use error::{Error, Result};
pub use manager::{ConnManager, ConnState};
pub use namespace::{Hub, Namespace, ReconnectPolicy, SubscribeOptions, Subscription};
pub use registry::{ListRegistry, Registration, RegistrationId, Registry, TrieRegistry};
pub use serve_mux::{DispatchReport, Handler, HandlerFunc, ServeMux};
pub use topic::Pattern;
pub use transport::{Connector, EventReceiver, EventSender, TransportEvent, TransportHandle};
pub use types::{Message, PublishOptions, QoS};

/// Re-export commonly used items
pub mod prelude {
    pub use crate::{
        ConnState, ConnectConfig, Error, Handler, Hub, Message, Namespace, PublishOptions, QoS,
        Result, ServeMux, SubscribeOptions, Subscription,
    };
}
