//! Consumer-facing subscription API.
//!
//! A [`Namespace`] pairs one pattern registry with one connection manager.
//! Consumers subscribe through it and get a [`Subscription`] back, which
//! unsubscribes when dropped. A [`Hub`] keeps namespaces by name.

use crate::client::RumqttcConnector;
use crate::config::{ConnOptions, ConnectConfig};
use crate::error::Result;
use crate::manager::{ConnManager, ConnState};
use crate::registry::{RegistrationId, Registry, TrieRegistry};
use crate::serve_mux::{Handler, ServeMux};
use crate::topic::Pattern;
use crate::transport::Connector;
use crate::types::{Message, PublishOptions, QoS};
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Options for [`Namespace::subscribe_with`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubscribeOptions {
    /// QoS requested for the wire-level subscription.
    pub qos: QoS,
    /// Tag naming the consumer, for diagnostics and [`Namespace::unsubscribe_owner`].
    pub owner: String,
}

impl SubscribeOptions {
    /// Set the QoS level.
    pub fn with_qos(mut self, qos: QoS) -> Self {
        self.qos = qos;
        self
    }

    /// Set the owner tag.
    pub fn with_owner(mut self, owner: impl Into<String>) -> Self {
        self.owner = owner.into();
        self
    }
}

/// Retry policy for [`Namespace::spawn_reconnect`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Wait between a disconnect and the next attempt.
    pub delay: Duration,
    /// Give up after this many consecutive failed attempts. `None` retries forever.
    pub max_attempts: Option<u32>,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            delay: Duration::from_secs(3),
            max_attempts: Some(5),
        }
    }
}

struct NamespaceInner<R: Registry + 'static> {
    name: String,
    mux: Arc<ServeMux<R>>,
    manager: ConnManager<R>,
}

impl<R: Registry + 'static> NamespaceInner<R> {
    fn release(&self, id: RegistrationId) -> bool {
        match self.mux.remove(id) {
            Some(registration) => {
                self.manager.unsubscribe_wire(registration.pattern.as_wire());
                true
            }
            None => false,
        }
    }
}

/// An isolated subscription context with its own registry and connection.
///
/// Cloning is cheap and yields a handle to the same namespace. The
/// connection is torn down when the last handle is dropped.
pub struct Namespace<R: Registry + 'static = TrieRegistry> {
    inner: Arc<NamespaceInner<R>>,
}

impl<R: Registry + 'static> Clone for Namespace<R> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl Namespace<TrieRegistry> {
    /// Create a namespace connecting through rumqttc with default options.
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_connector(name, Arc::new(RumqttcConnector::new()), ConnOptions::default())
    }

    /// Create a namespace using the given transport.
    pub fn with_connector(
        name: impl Into<String>,
        connector: Arc<dyn Connector>,
        options: ConnOptions,
    ) -> Self {
        Self::with_registry(name, TrieRegistry::new(), connector, options)
    }
}

impl<R: Registry + 'static> Namespace<R> {
    /// Create a namespace over a specific registry strategy.
    pub fn with_registry(
        name: impl Into<String>,
        registry: R,
        connector: Arc<dyn Connector>,
        options: ConnOptions,
    ) -> Self {
        let name = name.into();
        let mux = Arc::new(ServeMux::with_registry(registry));
        let manager = ConnManager::new(name.clone(), connector, options, Arc::clone(&mux));
        Self {
            inner: Arc::new(NamespaceInner { name, mux, manager }),
        }
    }

    /// The namespace name.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Register `handler` for messages matching `pattern`.
    pub fn subscribe(&self, pattern: &str, handler: Arc<dyn Handler>) -> Result<Subscription<R>> {
        self.subscribe_with(pattern, handler, SubscribeOptions::default())
    }

    /// Register a closure for messages matching `pattern`.
    ///
    /// ```no_run
    /// # async fn demo() -> reactor_mqtt::Result<()> {
    /// use reactor_mqtt::{ConnectConfig, Namespace};
    ///
    /// let ns = Namespace::new("telemetry");
    /// ns.ensure_connected(ConnectConfig::new("broker.local", 1883))?;
    ///
    /// let sub = ns.subscribe_func("devices/+/status", |msg| {
    ///     println!("{} -> {:?}", msg.topic, msg.payload_str());
    ///     Ok(())
    /// })?;
    /// // ...
    /// sub.unsubscribe();
    /// # Ok(())
    /// # }
    /// ```
    pub fn subscribe_func<F>(&self, pattern: &str, f: F) -> Result<Subscription<R>>
    where
        F: Fn(&Message) -> Result<()> + Send + Sync + 'static,
    {
        self.subscribe(pattern, Arc::new(f))
    }

    /// Register `handler` with explicit QoS and owner tag.
    ///
    /// The pattern is validated first; an invalid pattern registers nothing.
    pub fn subscribe_with(
        &self,
        pattern: &str,
        handler: Arc<dyn Handler>,
        opts: SubscribeOptions,
    ) -> Result<Subscription<R>> {
        let pattern = Pattern::parse(pattern)?;
        let id = self.inner.mux.handle(pattern.clone(), handler, &opts.owner)?;
        self.inner.manager.subscribe_wire(pattern.as_wire(), opts.qos);
        debug!(namespace = %self.inner.name, %pattern, %id, "subscribed");

        Ok(Subscription {
            namespace: Arc::downgrade(&self.inner),
            id,
            pattern,
            active: AtomicBool::new(true),
            detached: false,
        })
    }

    /// Remove every registration tagged with `owner`. Returns how many were removed.
    pub fn unsubscribe_owner(&self, owner: &str) -> usize {
        let removed = self
            .inner
            .mux
            .owned_by(owner)
            .into_iter()
            .filter(|id| self.inner.release(*id))
            .count();
        debug!(namespace = %self.inner.name, owner, removed, "owner unsubscribed");
        removed
    }

    /// Publish a message. Returns whether it was handed to the transport.
    ///
    /// Not being connected is not an error; the message is dropped and
    /// `Ok(false)` returned. Delivery is not confirmed.
    pub fn publish(
        &self,
        topic: &str,
        payload: impl Into<Bytes>,
        opts: PublishOptions,
    ) -> Result<bool> {
        self.inner.manager.publish(topic, payload.into(), opts)
    }

    /// Connect, or reconnect if `config` differs from the live one.
    pub fn ensure_connected(&self, config: ConnectConfig) -> Result<()> {
        self.inner.manager.ensure_connected(config)
    }

    /// Reopen the connection with the last config.
    pub fn reconnect(&self) -> Result<()> {
        self.inner.manager.reconnect()
    }

    /// Disconnect. Subscriptions stay registered.
    pub fn teardown(&self) {
        self.inner.manager.teardown()
    }

    /// Current connection state.
    pub fn state(&self) -> ConnState {
        self.inner.manager.state()
    }

    /// Returns true when the broker connection is up.
    pub fn is_connected(&self) -> bool {
        self.state().is_connected()
    }

    /// Watch connection state changes.
    pub fn watch_state(&self) -> watch::Receiver<ConnState> {
        self.inner.manager.watch()
    }

    /// The registry and dispatcher of this namespace.
    pub fn mux(&self) -> &ServeMux<R> {
        &self.inner.mux
    }

    /// Number of live registrations.
    pub fn len(&self) -> usize {
        self.inner.mux.len()
    }

    /// Returns true if nothing is subscribed.
    pub fn is_empty(&self) -> bool {
        self.inner.mux.is_empty()
    }

    /// Retry the connection after it drops.
    ///
    /// The task waits `policy.delay` after every `Disconnected` state and
    /// calls [`reconnect`](Self::reconnect). It stops after
    /// `policy.max_attempts` consecutive failures, after [`teardown`](Self::teardown),
    /// when the namespace is dropped, or when the returned handle is aborted.
    ///
    /// Must be called inside a tokio runtime.
    pub fn spawn_reconnect(&self, policy: ReconnectPolicy) -> JoinHandle<()> {
        let namespace = Arc::downgrade(&self.inner);
        let state = self.inner.manager.watch();
        tokio::spawn(reconnect_loop(namespace, state, policy))
    }
}

async fn reconnect_loop<R: Registry + 'static>(
    namespace: Weak<NamespaceInner<R>>,
    mut state: watch::Receiver<ConnState>,
    policy: ReconnectPolicy,
) {
    let mut started = false;
    let mut failures = 0u32;

    loop {
        let current = state.borrow_and_update().clone();
        match current {
            ConnState::Uninitialized if started => {
                debug!("namespace torn down, reconnect task stopping");
                return;
            }
            ConnState::Uninitialized => {}
            ConnState::Connecting => started = true,
            ConnState::Connected => {
                started = true;
                failures = 0;
            }
            ConnState::Disconnected { .. } => {
                started = true;
                if policy.max_attempts.is_some_and(|max| failures >= max) {
                    warn!(failures, "giving up reconnecting");
                    return;
                }

                tokio::time::sleep(policy.delay).await;
                let Some(namespace) = namespace.upgrade() else {
                    return;
                };
                if namespace.manager.state().is_disconnected() {
                    failures += 1;
                    info!(namespace = %namespace.name, attempt = failures, "reconnecting");
                    if let Err(e) = namespace.manager.reconnect() {
                        warn!(namespace = %namespace.name, "reconnect failed: {}", e);
                    }
                }
                continue;
            }
        }

        if state.changed().await.is_err() {
            return;
        }
    }
}

impl<R: Registry + 'static> fmt::Debug for Namespace<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Namespace")
            .field("name", &self.inner.name)
            .field("registrations", &self.inner.mux.len())
            .field("state", &self.state())
            .finish()
    }
}

/// A live registration. Dropping it unsubscribes unless [`detach`](Self::detach)ed.
pub struct Subscription<R: Registry + 'static = TrieRegistry> {
    namespace: Weak<NamespaceInner<R>>,
    id: RegistrationId,
    pattern: Pattern,
    active: AtomicBool,
    detached: bool,
}

impl<R: Registry + 'static> Subscription<R> {
    /// Registration id.
    pub fn id(&self) -> RegistrationId {
        self.id
    }

    /// The subscribed pattern.
    pub fn pattern(&self) -> &Pattern {
        &self.pattern
    }

    /// Returns false once unsubscribed.
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Remove the registration. Only the first call has an effect.
    ///
    /// Returns whether this call removed it.
    pub fn unsubscribe(&self) -> bool {
        if !self.active.swap(false, Ordering::AcqRel) {
            return false;
        }
        let Some(namespace) = self.namespace.upgrade() else {
            return false;
        };
        let removed = namespace.release(self.id);
        if removed {
            debug!(namespace = %namespace.name, pattern = %self.pattern, id = %self.id, "unsubscribed");
        }
        removed
    }

    /// Keep the registration alive after this value is dropped.
    pub fn detach(mut self) -> RegistrationId {
        self.detached = true;
        self.id
    }
}

impl<R: Registry + 'static> Drop for Subscription<R> {
    fn drop(&mut self) {
        if !self.detached {
            self.unsubscribe();
        }
    }
}

impl<R: Registry + 'static> fmt::Debug for Subscription<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("pattern", &self.pattern.as_wire())
            .field("active", &self.is_active())
            .finish()
    }
}

/// Directory of named namespaces.
///
/// Namespaces never share registrations or connection state.
pub struct Hub {
    connector: Arc<dyn Connector>,
    options: ConnOptions,
    namespaces: Mutex<BTreeMap<String, Namespace>>,
}

impl Default for Hub {
    fn default() -> Self {
        Self::new()
    }
}

impl Hub {
    /// Create a hub whose namespaces connect through rumqttc.
    pub fn new() -> Self {
        Self::with_connector(Arc::new(RumqttcConnector::new()), ConnOptions::default())
    }

    /// Create a hub whose namespaces use the given transport and options.
    pub fn with_connector(connector: Arc<dyn Connector>, options: ConnOptions) -> Self {
        Self {
            connector,
            options,
            namespaces: Mutex::new(BTreeMap::new()),
        }
    }

    /// Get the namespace called `name`, creating it on first use.
    pub fn namespace(&self, name: &str) -> Namespace {
        self.namespaces
            .lock()
            .entry(name.to_string())
            .or_insert_with(|| {
                debug!(namespace = name, "namespace created");
                Namespace::with_connector(name, Arc::clone(&self.connector), self.options.clone())
            })
            .clone()
    }

    /// Get an existing namespace.
    pub fn get(&self, name: &str) -> Option<Namespace> {
        self.namespaces.lock().get(name).cloned()
    }

    /// Connect the namespace called `name`, creating it if needed.
    pub fn ensure_connected(&self, name: &str, config: ConnectConfig) -> Result<()> {
        self.namespace(name).ensure_connected(config)
    }

    /// Tear down and forget the namespace called `name`.
    ///
    /// Returns false if there was no such namespace.
    pub fn teardown(&self, name: &str) -> bool {
        let removed = self.namespaces.lock().remove(name);
        match removed {
            Some(namespace) => {
                namespace.teardown();
                true
            }
            None => false,
        }
    }

    /// Names of the known namespaces, sorted.
    pub fn names(&self) -> Vec<String> {
        self.namespaces.lock().keys().cloned().collect()
    }
}

impl fmt::Debug for Hub {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Hub")
            .field("namespaces", &self.names())
            .finish_non_exhaustive()
    }
}
