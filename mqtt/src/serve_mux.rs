//! ServeMux for MQTT message routing.
//!
//! Routes incoming MQTT messages to every handler whose pattern matches the
//! message topic.

use crate::error::Result;
use crate::registry::{Registration, RegistrationId, Registry, TrieRegistry};
use crate::topic::Pattern;
use crate::types::Message;
use parking_lot::RwLock;
use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{debug, warn};

/// Handler trait for processing MQTT messages.
pub trait Handler: Send + Sync {
    /// Handle an incoming MQTT message.
    fn handle_message(&self, msg: &Message) -> Result<()>;
}

/// Handler function type.
pub type HandlerFunc = dyn Fn(&Message) -> Result<()> + Send + Sync;

/// Function-based handler.
impl<F> Handler for F
where
    F: Fn(&Message) -> Result<()> + Send + Sync,
{
    fn handle_message(&self, msg: &Message) -> Result<()> {
        self(msg)
    }
}

/// Outcome of dispatching one message.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    /// Handlers whose pattern matched.
    pub matched: usize,
    /// Handlers that returned an error or panicked.
    pub failed: usize,
}

/// MQTT message multiplexer.
///
/// Routes incoming messages to handlers based on topic patterns.
/// Supports MQTT wildcards: `+` (single level) and `#` (multi-level).
///
/// The registry is consulted fresh for every message, and the lock is
/// released before any handler runs, so handlers may register or remove
/// handlers themselves.
pub struct ServeMux<R: Registry = TrieRegistry> {
    registry: RwLock<R>,
}

impl Default for ServeMux<TrieRegistry> {
    fn default() -> Self {
        Self::new()
    }
}

impl ServeMux<TrieRegistry> {
    /// Create a new empty ServeMux backed by a trie.
    pub fn new() -> Self {
        Self::with_registry(TrieRegistry::new())
    }
}

impl<R: Registry> ServeMux<R> {
    /// Create a ServeMux over the given registry strategy.
    pub fn with_registry(registry: R) -> Self {
        Self {
            registry: RwLock::new(registry),
        }
    }

    /// Register a handler for the given pattern.
    ///
    /// # Example
    ///
    /// ```
    /// use reactor_mqtt::{Handler, Message, Pattern, Result, ServeMux};
    /// use std::sync::Arc;
    ///
    /// struct StatusHandler;
    ///
    /// impl Handler for StatusHandler {
    ///     fn handle_message(&self, msg: &Message) -> Result<()> {
    ///         println!("{}: {:?}", msg.topic, msg.payload);
    ///         Ok(())
    ///     }
    /// }
    ///
    /// let mux = ServeMux::new();
    /// let pattern = Pattern::parse("devices/+/status").unwrap();
    /// mux.handle(pattern, Arc::new(StatusHandler), "status-panel").unwrap();
    /// ```
    pub fn handle(
        &self,
        pattern: Pattern,
        handler: Arc<dyn Handler>,
        owner: &str,
    ) -> Result<RegistrationId> {
        let id = self.registry.write().insert(pattern, handler, owner)?;
        debug!(%id, owner, "handler registered");
        Ok(id)
    }

    /// Register a handler function for the given pattern.
    ///
    /// # Example
    ///
    /// ```
    /// use reactor_mqtt::ServeMux;
    ///
    /// let mux = ServeMux::new();
    /// mux.handle_func("devices/+/status", |msg| {
    ///     println!("Received: {:?}", msg.payload);
    ///     Ok(())
    /// }).unwrap();
    /// ```
    pub fn handle_func<F>(&self, pattern: &str, f: F) -> Result<RegistrationId>
    where
        F: Fn(&Message) -> Result<()> + Send + Sync + 'static,
    {
        self.handle(Pattern::parse(pattern)?, Arc::new(f), "")
    }

    /// Remove a registration. Idempotent: unknown ids return `None`.
    pub fn remove(&self, id: RegistrationId) -> Option<Arc<Registration>> {
        let removed = self.registry.write().remove(id);
        if removed.is_some() {
            debug!(%id, "handler removed");
        }
        removed
    }

    /// Snapshot of the registrations matching `topic`, in registration order.
    pub fn lookup(&self, topic: &str) -> Vec<Arc<Registration>> {
        self.registry.read().lookup(topic)
    }

    /// Ids of the registrations tagged with `owner`.
    pub fn owned_by(&self, owner: &str) -> Vec<RegistrationId> {
        self.registry.read().owned_by(owner)
    }

    /// Check if any handler matches a topic.
    pub fn has_handlers(&self, topic: &str) -> bool {
        !self.lookup(topic).is_empty()
    }

    /// Number of registrations.
    pub fn len(&self) -> usize {
        self.registry.read().len()
    }

    /// Returns true if nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.registry.read().is_empty()
    }

    /// Deliver a message to every matching handler.
    ///
    /// A handler returning an error or panicking is logged and skipped; the
    /// remaining handlers still run.
    pub fn dispatch(&self, msg: &Message) -> DispatchReport {
        self.dispatch_while(msg, || true)
    }

    /// Like [`dispatch`](Self::dispatch), but checks `active` before each
    /// handler and stops at the first `false`. Handlers not reached are not
    /// counted as failed.
    pub fn dispatch_while<F>(&self, msg: &Message, active: F) -> DispatchReport
    where
        F: Fn() -> bool,
    {
        let matched = self.lookup(&msg.topic);
        if matched.is_empty() {
            debug!(topic = %msg.topic, "no handler found");
            return DispatchReport::default();
        }

        let mut report = DispatchReport {
            matched: matched.len(),
            failed: 0,
        };

        for registration in matched {
            if !active() {
                debug!(topic = %msg.topic, id = %registration.id, "dispatch stopped");
                break;
            }
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
                registration.handler.handle_message(msg)
            }));

            match outcome {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    report.failed += 1;
                    warn!(
                        topic = %msg.topic,
                        id = %registration.id,
                        owner = %registration.owner,
                        "handler error: {}", e
                    );
                }
                Err(panic) => {
                    report.failed += 1;
                    warn!(
                        topic = %msg.topic,
                        id = %registration.id,
                        owner = %registration.owner,
                        "handler panicked: {}", panic_message(&*panic)
                    );
                }
            }
        }

        report
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s
    } else {
        "non-string panic payload"
    }
}

impl<R: Registry + fmt::Debug> fmt::Debug for ServeMux<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ServeMux {{ registry: {:?} }}", &*self.registry.read())
    }
}
