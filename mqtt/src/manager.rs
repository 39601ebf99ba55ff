//! Connection lifecycle for one namespace.
//!
//! [`ConnManager`] owns at most one live transport connection. It reference
//! counts wire-level subscriptions, replays them whenever a connection comes
//! up, and pumps incoming messages into the namespace's [`ServeMux`].

use crate::config::{ConnOptions, ConnectConfig};
use crate::error::{Error, Result};
use crate::registry::{Registry, TrieRegistry};
use crate::serve_mux::ServeMux;
use crate::transport::{Connector, EventReceiver, TransportEvent, TransportHandle};
use crate::types::{PublishOptions, QoS};
use bytes::Bytes;
use parking_lot::Mutex;
use reactor_trie::validate_topic;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Connection availability as seen by consumers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ConnState {
    /// No connection and none requested (empty config or torn down).
    #[default]
    Uninitialized,
    /// A connection has been opened and is waiting for the broker.
    Connecting,
    /// The broker accepted the connection.
    Connected,
    /// The last connection failed or was closed.
    Disconnected {
        /// Why the connection went away, if known.
        error: Option<String>,
    },
}

impl ConnState {
    /// Returns true in the `Connected` state.
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnState::Connected)
    }

    /// Returns true in the `Disconnected` state.
    pub fn is_disconnected(&self) -> bool {
        matches!(self, ConnState::Disconnected { .. })
    }
}

impl fmt::Display for ConnState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnState::Uninitialized => f.write_str("uninitialized"),
            ConnState::Connecting => f.write_str("connecting"),
            ConnState::Connected => f.write_str("connected"),
            ConnState::Disconnected { error: None } => f.write_str("disconnected"),
            ConnState::Disconnected { error: Some(e) } => write!(f, "disconnected: {}", e),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct WireSub {
    count: usize,
    qos: QoS,
}

struct Live {
    handle: Box<dyn TransportHandle>,
    generation: u64,
    connected: bool,
    ended: bool,
    pump: JoinHandle<()>,
}

impl Live {
    fn usable(&self) -> bool {
        self.connected && !self.ended
    }
}

#[derive(Default)]
struct Inner {
    live: Option<Live>,
    config: ConnectConfig,
    generation: u64,
    wire: HashMap<String, WireSub>,
}

struct Shared<R: Registry> {
    namespace: String,
    connector: Arc<dyn Connector>,
    options: ConnOptions,
    mux: Arc<ServeMux<R>>,
    inner: Mutex<Inner>,
    /// Generation of the live connection, 0 when there is none.
    current: AtomicU64,
    state: watch::Sender<ConnState>,
}

/// Owns the transport connection of one namespace.
///
/// Dropping the manager tears the connection down.
pub struct ConnManager<R: Registry + 'static = TrieRegistry> {
    shared: Arc<Shared<R>>,
}

impl<R: Registry + 'static> ConnManager<R> {
    /// Create a manager that delivers incoming messages to `mux`.
    pub fn new(
        namespace: impl Into<String>,
        connector: Arc<dyn Connector>,
        options: ConnOptions,
        mux: Arc<ServeMux<R>>,
    ) -> Self {
        let (state, _) = watch::channel(ConnState::Uninitialized);
        Self {
            shared: Arc::new(Shared {
                namespace: namespace.into(),
                connector,
                options,
                mux,
                inner: Mutex::new(Inner::default()),
                current: AtomicU64::new(0),
                state,
            }),
        }
    }

    /// Bring the connection in line with `config`.
    ///
    /// - An empty config tears down any live connection.
    /// - An equal config on a live, not disconnected connection is a no-op.
    /// - A config with an unknown scheme is logged and treated like an empty one.
    /// - Anything else closes the previous connection before opening a new one.
    ///
    /// Connect failures are reported through [`state`](Self::state), not as
    /// errors. The only error is calling this outside a tokio runtime.
    pub fn ensure_connected(&self, config: ConnectConfig) -> Result<()> {
        let shared = &self.shared;
        let mut inner = shared.inner.lock();

        if let Err(e) = config.scheme() {
            warn!(namespace = %shared.namespace, "ignoring unusable config: {}", e);
            shared.close_live(&mut inner);
            inner.config = ConnectConfig::default();
            shared.set_state(ConnState::Uninitialized);
            return Ok(());
        }

        if config.is_empty() {
            shared.close_live(&mut inner);
            inner.config = config;
            shared.set_state(ConnState::Uninitialized);
            return Ok(());
        }

        if inner.live.is_some() && inner.config == config && !shared.state.borrow().is_disconnected() {
            return Ok(());
        }

        shared.close_live(&mut inner);
        shared.open(&mut inner, config)
    }

    /// Reopen the connection with the last config.
    ///
    /// No-op when no config has been supplied.
    pub fn reconnect(&self) -> Result<()> {
        let shared = &self.shared;
        let mut inner = shared.inner.lock();
        if inner.config.is_empty() {
            return Ok(());
        }

        let config = inner.config.clone();
        shared.close_live(&mut inner);
        shared.open(&mut inner, config)
    }

    /// Disconnect gracefully and forget the config.
    ///
    /// Wire subscriptions are kept and replayed by the next
    /// [`ensure_connected`](Self::ensure_connected). Safe without a connection.
    pub fn teardown(&self) {
        let shared = &self.shared;
        let mut inner = shared.inner.lock();
        shared.close_live(&mut inner);
        inner.config = ConnectConfig::default();
        shared.set_state(ConnState::Uninitialized);
    }

    /// Count one more local subscription of `wire`.
    ///
    /// The wire-level SUBSCRIBE is issued on the first reference, immediately
    /// when connected, otherwise once the connection comes up. A later
    /// reference asking for a higher QoS re-subscribes with it.
    pub fn subscribe_wire(&self, wire: &str, qos: QoS) {
        let mut guard = self.shared.inner.lock();
        let inner = &mut *guard;

        let sub = inner
            .wire
            .entry(wire.to_string())
            .or_insert(WireSub { count: 0, qos });
        sub.count += 1;

        let upgraded = qos > sub.qos;
        if upgraded {
            sub.qos = qos;
        }
        if sub.count > 1 && !upgraded {
            return;
        }

        if let Some(live) = inner.live.as_ref().filter(|l| l.usable()) {
            debug!(namespace = %self.shared.namespace, wire, "subscribing");
            if let Err(e) = live.handle.subscribe(wire, sub.qos) {
                warn!(namespace = %self.shared.namespace, wire, "subscribe failed: {}", e);
            }
        }
    }

    /// Drop one local subscription of `wire`.
    ///
    /// The wire-level UNSUBSCRIBE is issued when the last reference goes.
    /// Unknown patterns are ignored.
    pub fn unsubscribe_wire(&self, wire: &str) {
        let mut guard = self.shared.inner.lock();
        let inner = &mut *guard;

        let Some(sub) = inner.wire.get_mut(wire) else {
            return;
        };
        sub.count -= 1;
        if sub.count > 0 {
            return;
        }
        inner.wire.remove(wire);

        if let Some(live) = inner.live.as_ref().filter(|l| l.usable()) {
            debug!(namespace = %self.shared.namespace, wire, "unsubscribing");
            if let Err(e) = live.handle.unsubscribe(wire) {
                warn!(namespace = %self.shared.namespace, wire, "unsubscribe failed: {}", e);
            }
        }
    }

    /// Number of local references to `wire`.
    pub fn wire_count(&self, wire: &str) -> usize {
        self.shared
            .inner
            .lock()
            .wire
            .get(wire)
            .map_or(0, |sub| sub.count)
    }

    /// Hand a message to the transport.
    ///
    /// Returns `Ok(false)` when there is no connection or the transport
    /// refused the request. Only an invalid topic name is an error.
    pub fn publish(&self, topic: &str, payload: Bytes, opts: PublishOptions) -> Result<bool> {
        validate_topic(topic)?;

        let inner = self.shared.inner.lock();
        let Some(live) = inner.live.as_ref().filter(|l| !l.ended) else {
            debug!(namespace = %self.shared.namespace, topic, "not connected, dropping publish");
            return Ok(false);
        };

        match live.handle.publish(topic, payload, opts.qos, opts.retain) {
            Ok(()) => Ok(true),
            Err(e) => {
                warn!(namespace = %self.shared.namespace, topic, "publish failed: {}", e);
                Ok(false)
            }
        }
    }

    /// Current connection state.
    pub fn state(&self) -> ConnState {
        self.shared.state.borrow().clone()
    }

    /// Subscribe to connection state changes.
    pub fn watch(&self) -> watch::Receiver<ConnState> {
        self.shared.state.subscribe()
    }

    /// The config of the current (or last requested) connection.
    pub fn config(&self) -> ConnectConfig {
        self.shared.inner.lock().config.clone()
    }
}

impl<R: Registry + 'static> Shared<R> {
    fn set_state(&self, state: ConnState) {
        debug!(namespace = %self.namespace, %state, "state changed");
        self.state.send_replace(state);
    }

    fn is_current(&self, generation: u64) -> bool {
        self.current.load(Ordering::Acquire) == generation
    }

    fn open(self: &Arc<Self>, inner: &mut Inner, config: ConnectConfig) -> Result<()> {
        if tokio::runtime::Handle::try_current().is_err() {
            return Err(Error::Connection("no tokio runtime".to_string()));
        }

        inner.generation += 1;
        let generation = inner.generation;
        inner.config = config;
        self.set_state(ConnState::Connecting);

        let (handle, events) = match self.connector.connect(&inner.config, &self.options) {
            Ok(opened) => opened,
            Err(e) => {
                warn!(namespace = %self.namespace, "connect failed: {}", e);
                self.set_state(ConnState::Disconnected {
                    error: Some(e.to_string()),
                });
                return Ok(());
            }
        };

        info!(namespace = %self.namespace, url = %inner.config.url(), generation, "connection opened");
        self.current.store(generation, Ordering::Release);
        let pump = tokio::spawn(pump(
            Arc::downgrade(self),
            generation,
            events,
            self.options.connect_timeout,
        ));

        inner.live = Some(Live {
            handle,
            generation,
            connected: false,
            ended: false,
            pump,
        });
        Ok(())
    }

    fn close_live(&self, inner: &mut Inner) {
        let Some(live) = inner.live.take() else {
            return;
        };
        self.current.store(0, Ordering::Release);
        if !live.ended {
            live.handle.end();
        }
        live.pump.abort();
        info!(namespace = %self.namespace, generation = live.generation, "connection closed");
    }

    fn on_connected(&self, generation: u64) {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        let Some(live) = inner.live.as_mut().filter(|l| l.generation == generation) else {
            debug!(namespace = %self.namespace, generation, "ignoring stale connect");
            return;
        };
        live.connected = true;

        let mut patterns: Vec<_> = inner.wire.iter().collect();
        patterns.sort_unstable_by(|a, b| a.0.cmp(b.0));
        for (wire, sub) in patterns {
            if let Err(e) = live.handle.subscribe(wire, sub.qos) {
                warn!(namespace = %self.namespace, wire = %wire, "resubscribe failed: {}", e);
            }
        }

        self.set_state(ConnState::Connected);
    }

    fn on_disconnected(&self, generation: u64, error: Option<String>) {
        let mut inner = self.inner.lock();
        let Some(live) = inner.live.as_mut().filter(|l| l.generation == generation) else {
            debug!(namespace = %self.namespace, generation, "ignoring stale disconnect");
            return;
        };
        live.connected = false;

        match &error {
            Some(e) => warn!(namespace = %self.namespace, generation, "connection lost: {}", e),
            None => warn!(namespace = %self.namespace, generation, "connection closed by broker"),
        }
        self.set_state(ConnState::Disconnected { error });
    }

    fn on_connect_timeout(&self, generation: u64) {
        let mut inner = self.inner.lock();
        let Some(live) = inner.live.as_mut().filter(|l| l.generation == generation) else {
            return;
        };
        if live.connected {
            return;
        }

        warn!(namespace = %self.namespace, generation, "connect timeout");
        live.handle.end();
        live.ended = true;
        self.set_state(ConnState::Disconnected {
            error: Some("connect timeout".to_string()),
        });
    }
}

/// Reads one connection's events until it closes.
async fn pump<R: Registry + 'static>(
    shared: Weak<Shared<R>>,
    generation: u64,
    mut events: EventReceiver,
    connect_timeout: Duration,
) {
    let deadline = tokio::time::sleep(connect_timeout);
    tokio::pin!(deadline);
    let mut connected = false;

    loop {
        let event = tokio::select! {
            event = events.recv() => event,
            _ = &mut deadline, if !connected => {
                if let Some(shared) = shared.upgrade() {
                    shared.on_connect_timeout(generation);
                }
                return;
            }
        };

        let Some(shared) = shared.upgrade() else {
            return;
        };

        match event {
            Some(TransportEvent::Connected) => {
                connected = true;
                shared.on_connected(generation);
            }
            Some(TransportEvent::Message(msg)) => {
                // Re-checked per handler: a handler may replace the connection.
                shared.mux.dispatch_while(&msg, || shared.is_current(generation));
            }
            Some(TransportEvent::Closed) => {
                shared.on_disconnected(generation, None);
                return;
            }
            Some(TransportEvent::Error(e)) => {
                shared.on_disconnected(generation, Some(e));
                return;
            }
            None => {
                shared.on_disconnected(generation, Some("event stream ended".to_string()));
                return;
            }
        }
    }
}

impl<R: Registry + 'static> Drop for ConnManager<R> {
    fn drop(&mut self) {
        self.teardown();
    }
}

impl<R: Registry + 'static> fmt::Debug for ConnManager<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnManager")
            .field("namespace", &self.shared.namespace)
            .field("state", &*self.shared.state.borrow())
            .finish_non_exhaustive()
    }
}
