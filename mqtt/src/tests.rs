//! Connection manager and namespace tests against a recording transport.

use crate::{
    ConnOptions, ConnState, ConnectConfig, Connector, Error, EventReceiver, EventSender, Hub,
    ListRegistry, Message, Namespace, PublishOptions, QoS, ReconnectPolicy, Result,
    SubscribeOptions, TransportEvent, TransportHandle,
};
use bytes::Bytes;
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_test::{assert_err, assert_ok};

#[derive(Debug, Clone, PartialEq, Eq)]
enum Call {
    Connect(String),
    Subscribe(String, QoS),
    Unsubscribe(String),
    Publish(String, Bytes, QoS, bool),
    End,
}

/// Records every call per connection and lets tests inject events.
#[derive(Default)]
struct FakeConnector {
    log: Mutex<Vec<(usize, Call)>>,
    senders: Mutex<Vec<EventSender>>,
    fail_next: Mutex<Option<String>>,
}

impl FakeConnector {
    fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn calls(&self) -> Vec<(usize, Call)> {
        self.log.lock().clone()
    }

    fn calls_on(&self, conn: usize) -> Vec<Call> {
        self.log
            .lock()
            .iter()
            .filter(|(c, _)| *c == conn)
            .map(|(_, call)| call.clone())
            .collect()
    }

    fn connections(&self) -> usize {
        self.senders.lock().len()
    }

    fn count(&self, pred: impl Fn(&Call) -> bool) -> usize {
        self.log.lock().iter().filter(|(_, call)| pred(call)).count()
    }

    fn emit(&self, conn: usize, event: TransportEvent) {
        let _ = self.senders.lock()[conn].send(event);
    }

    fn fail_next_connect(&self, reason: &str) {
        *self.fail_next.lock() = Some(reason.to_string());
    }
}

struct FakeHandle {
    conn: usize,
    connector: Arc<FakeConnector>,
}

impl FakeHandle {
    fn record(&self, call: Call) {
        self.connector.log.lock().push((self.conn, call));
    }
}

impl TransportHandle for FakeHandle {
    fn subscribe(&self, pattern: &str, qos: QoS) -> Result<()> {
        self.record(Call::Subscribe(pattern.to_string(), qos));
        Ok(())
    }

    fn unsubscribe(&self, pattern: &str) -> Result<()> {
        self.record(Call::Unsubscribe(pattern.to_string()));
        Ok(())
    }

    fn publish(&self, topic: &str, payload: Bytes, qos: QoS, retain: bool) -> Result<()> {
        self.record(Call::Publish(topic.to_string(), payload, qos, retain));
        Ok(())
    }

    fn end(&self) {
        self.record(Call::End);
    }
}

/// Wraps the shared recorder so handles can point back at it.
struct Recorder(Arc<FakeConnector>);

impl Connector for Recorder {
    fn connect(
        &self,
        config: &ConnectConfig,
        _options: &ConnOptions,
    ) -> Result<(Box<dyn TransportHandle>, EventReceiver)> {
        if let Some(reason) = self.0.fail_next.lock().take() {
            return Err(Error::Connection(reason));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let mut senders = self.0.senders.lock();
        let conn = senders.len();
        senders.push(tx);
        drop(senders);

        self.0.log.lock().push((conn, Call::Connect(config.url())));
        Ok((
            Box::new(FakeHandle {
                conn,
                connector: Arc::clone(&self.0),
            }),
            rx,
        ))
    }
}

fn namespace(name: &str) -> (Namespace, Arc<FakeConnector>) {
    let fake = FakeConnector::new();
    let ns = Namespace::with_connector(
        name,
        Arc::new(Recorder(Arc::clone(&fake))),
        ConnOptions::default(),
    );
    (ns, fake)
}

fn broker() -> ConnectConfig {
    ConnectConfig::new("broker.local", 1883)
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init();
}

/// Let spawned tasks run until they block.
async fn settle() {
    for _ in 0..16 {
        tokio::task::yield_now().await;
    }
}

async fn wait_state(ns: &Namespace, pred: impl FnMut(&ConnState) -> bool) {
    let mut rx = ns.watch_state();
    tokio::time::timeout(Duration::from_secs(1), rx.wait_for(pred))
        .await
        .expect("state wait timed out")
        .expect("state channel closed");
}

async fn connected(ns: &Namespace, fake: &FakeConnector, conn: usize) {
    fake.emit(conn, TransportEvent::Connected);
    wait_state(ns, |s| s.is_connected()).await;
}

fn counter(n: &Arc<AtomicUsize>) -> impl Fn(&Message) -> Result<()> + Send + Sync + 'static {
    let n = n.clone();
    move |_: &Message| -> Result<()> {
        n.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

fn subscribes(fake: &FakeConnector, wire: &str) -> usize {
    fake.count(|c| matches!(c, Call::Subscribe(p, _) if p == wire))
}

fn unsubscribes(fake: &FakeConnector, wire: &str) -> usize {
    fake.count(|c| matches!(c, Call::Unsubscribe(p) if p == wire))
}

#[tokio::test]
async fn test_wire_subscription_is_reference_counted() {
    let (ns, fake) = namespace("refcount");
    ns.ensure_connected(broker()).unwrap();
    connected(&ns, &fake, 0).await;

    let a = ns.subscribe_func("devices/+/status", |_| Ok(())).unwrap();
    let b = ns.subscribe_func("devices/+/status", |_| Ok(())).unwrap();
    let c = ns.subscribe_func("devices/+/status", |_| Ok(())).unwrap();
    assert_eq!(subscribes(&fake, "devices/+/status"), 1);

    a.unsubscribe();
    b.unsubscribe();
    assert_eq!(unsubscribes(&fake, "devices/+/status"), 0);

    c.unsubscribe();
    assert_eq!(unsubscribes(&fake, "devices/+/status"), 1);
    assert!(ns.is_empty());
}

#[tokio::test]
async fn test_subscribe_before_connect_is_issued_on_connect() {
    let (ns, fake) = namespace("early");
    let _sub = ns.subscribe_func("alerts/#", |_| Ok(())).unwrap();
    assert!(fake.calls().is_empty());

    ns.ensure_connected(broker()).unwrap();
    assert_eq!(subscribes(&fake, "alerts/#"), 0);

    connected(&ns, &fake, 0).await;
    assert_eq!(
        fake.calls_on(0),
        vec![
            Call::Connect("mqtt://broker.local:1883".to_string()),
            Call::Subscribe("alerts/#".to_string(), QoS::AtMostOnce),
        ]
    );
}

#[tokio::test]
async fn test_messages_reach_every_matching_handler() {
    let (ns, fake) = namespace("dispatch");
    let status = Arc::new(AtomicUsize::new(0));
    let all = Arc::new(AtomicUsize::new(0));
    let unit7 = Arc::new(AtomicUsize::new(0));

    let _a = ns.subscribe_func("devices/+/status", counter(&status)).unwrap();
    let _b = ns.subscribe_func("devices/#", counter(&all)).unwrap();
    let _c = ns.subscribe_func("devices/unit7/status", counter(&unit7)).unwrap();

    ns.ensure_connected(broker()).unwrap();
    connected(&ns, &fake, 0).await;

    fake.emit(0, TransportEvent::Message(Message::new("devices/unit7/status", "ok")));
    fake.emit(0, TransportEvent::Message(Message::new("devices/unit8/status", "ok")));
    fake.emit(0, TransportEvent::Message(Message::new("devices/unit7/status/extra", "x")));
    settle().await;

    assert_eq!(status.load(Ordering::SeqCst), 2);
    assert_eq!(all.load(Ordering::SeqCst), 3);
    assert_eq!(unit7.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_config_change_replaces_connection() {
    let (ns, fake) = namespace("swap");
    let _sub = ns.subscribe_func("devices/+/status", |_| Ok(())).unwrap();

    ns.ensure_connected(broker()).unwrap();
    connected(&ns, &fake, 0).await;

    let moved = ConnectConfig::new("broker.local", 1884);
    ns.ensure_connected(moved).unwrap();
    assert_eq!(fake.connections(), 2);
    assert_eq!(fake.calls_on(0).iter().filter(|c| **c == Call::End).count(), 1);
    assert_eq!(ns.state(), ConnState::Connecting);

    let ended = fake
        .calls()
        .iter()
        .position(|(conn, call)| *conn == 0 && *call == Call::End);
    let opened = fake
        .calls()
        .iter()
        .position(|(conn, call)| *conn == 1 && matches!(call, Call::Connect(_)));
    assert!(ended < opened, "old connection must end before the new one opens");

    connected(&ns, &fake, 1).await;
    assert_eq!(
        fake.calls_on(1),
        vec![
            Call::Connect("mqtt://broker.local:1884".to_string()),
            Call::Subscribe("devices/+/status".to_string(), QoS::AtMostOnce),
        ]
    );
}

#[tokio::test]
async fn test_same_config_is_noop() {
    let (ns, fake) = namespace("same");
    ns.ensure_connected(broker()).unwrap();
    connected(&ns, &fake, 0).await;

    ns.ensure_connected(broker()).unwrap();
    ns.ensure_connected(broker()).unwrap();
    assert_eq!(fake.connections(), 1);
    assert!(!fake.calls_on(0).contains(&Call::End));
}

#[tokio::test]
async fn test_same_config_after_disconnect_reopens() {
    let (ns, fake) = namespace("retry");
    ns.ensure_connected(broker()).unwrap();
    connected(&ns, &fake, 0).await;

    fake.emit(0, TransportEvent::Error("connection reset".to_string()));
    wait_state(&ns, |s| s.is_disconnected()).await;
    assert_eq!(
        ns.state(),
        ConnState::Disconnected {
            error: Some("connection reset".to_string())
        }
    );

    ns.ensure_connected(broker()).unwrap();
    assert_eq!(fake.connections(), 2);
}

#[tokio::test]
async fn test_empty_config_tears_down() {
    let (ns, fake) = namespace("empty");
    ns.ensure_connected(ConnectConfig::default()).unwrap();
    assert_eq!(fake.connections(), 0);
    assert_eq!(ns.state(), ConnState::Uninitialized);

    ns.ensure_connected(broker()).unwrap();
    connected(&ns, &fake, 0).await;

    ns.ensure_connected(ConnectConfig::default()).unwrap();
    assert_eq!(ns.state(), ConnState::Uninitialized);
    assert!(fake.calls_on(0).contains(&Call::End));
}

#[tokio::test]
async fn test_resubscribe_after_reconnect() {
    let (ns, fake) = namespace("resub");
    let _a = ns.subscribe_func("devices/+/status", |_| Ok(())).unwrap();
    let _b = ns.subscribe_func("devices/+/status", |_| Ok(())).unwrap();
    let _c = ns
        .subscribe_with(
            "alerts/#",
            Arc::new(|_: &Message| -> Result<()> { Ok(()) }),
            SubscribeOptions::default().with_qos(QoS::AtLeastOnce),
        )
        .unwrap();

    ns.ensure_connected(broker()).unwrap();
    connected(&ns, &fake, 0).await;

    fake.emit(0, TransportEvent::Closed);
    wait_state(&ns, |s| s.is_disconnected()).await;

    ns.reconnect().unwrap();
    connected(&ns, &fake, 1).await;

    assert_eq!(
        fake.calls_on(1),
        vec![
            Call::Connect("mqtt://broker.local:1883".to_string()),
            Call::Subscribe("alerts/#".to_string(), QoS::AtLeastOnce),
            Call::Subscribe("devices/+/status".to_string(), QoS::AtMostOnce),
        ]
    );
}

#[tokio::test]
async fn test_stale_events_are_ignored() {
    let (ns, fake) = namespace("stale");
    let hits = Arc::new(AtomicUsize::new(0));
    let _sub = ns.subscribe_func("a/b", counter(&hits)).unwrap();

    ns.ensure_connected(broker()).unwrap();
    connected(&ns, &fake, 0).await;

    ns.ensure_connected(ConnectConfig::new("other.local", 1883)).unwrap();
    fake.emit(0, TransportEvent::Error("late failure".to_string()));
    fake.emit(0, TransportEvent::Message(Message::new("a/b", "old")));
    settle().await;

    assert_eq!(ns.state(), ConnState::Connecting);
    assert_eq!(hits.load(Ordering::SeqCst), 0);

    connected(&ns, &fake, 1).await;
    fake.emit(1, TransportEvent::Message(Message::new("a/b", "new")));
    settle().await;
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_publish() {
    let (ns, fake) = namespace("pub");
    assert!(!assert_ok!(ns.publish("devices/unit7/cmd", "reboot", PublishOptions::default())));

    assert_ok!(ns.ensure_connected(broker()));
    connected(&ns, &fake, 0).await;

    let opts = PublishOptions::default().with_qos(QoS::AtLeastOnce).with_retain();
    assert!(ns.publish("devices/unit7/cmd", "reboot", opts).unwrap());
    assert!(fake.calls_on(0).contains(&Call::Publish(
        "devices/unit7/cmd".to_string(),
        Bytes::from("reboot"),
        QoS::AtLeastOnce,
        true,
    )));

    let err = assert_err!(ns.publish("devices/+/cmd", "x", PublishOptions::default()));
    assert!(matches!(err, Error::InvalidTopicName(_)));
}

#[tokio::test]
async fn test_namespaces_are_isolated() {
    let (left, left_fake) = namespace("left");
    let (right, right_fake) = namespace("right");
    let left_hits = Arc::new(AtomicUsize::new(0));
    let right_hits = Arc::new(AtomicUsize::new(0));

    let _l = left.subscribe_func("devices/#", counter(&left_hits)).unwrap();
    let _r = right.subscribe_func("devices/#", counter(&right_hits)).unwrap();

    left.ensure_connected(broker()).unwrap();
    right.ensure_connected(broker()).unwrap();
    connected(&left, &left_fake, 0).await;
    connected(&right, &right_fake, 0).await;

    left_fake.emit(0, TransportEvent::Message(Message::new("devices/unit1", "x")));
    settle().await;
    assert_eq!(left_hits.load(Ordering::SeqCst), 1);
    assert_eq!(right_hits.load(Ordering::SeqCst), 0);

    left.teardown();
    assert!(right.is_connected());
}

#[tokio::test]
async fn test_unsubscribe_is_idempotent_and_drop_unsubscribes() {
    let (ns, fake) = namespace("raii");
    ns.ensure_connected(broker()).unwrap();
    connected(&ns, &fake, 0).await;

    let sub = ns.subscribe_func("a/+", |_| Ok(())).unwrap();
    assert!(sub.is_active());
    assert!(sub.unsubscribe());
    assert!(!sub.unsubscribe());
    assert!(!sub.is_active());
    drop(sub);
    assert_eq!(unsubscribes(&fake, "a/+"), 1);

    {
        let _scoped = ns.subscribe_func("b/#", |_| Ok(())).unwrap();
        assert_eq!(ns.len(), 1);
    }
    assert!(ns.is_empty());
    assert_eq!(unsubscribes(&fake, "b/#"), 1);

    let id = ns.subscribe_func("c", |_| Ok(())).unwrap().detach();
    assert_eq!(ns.len(), 1);
    assert!(ns.mux().remove(id).is_some());
}

#[tokio::test]
async fn test_unsubscribe_owner() {
    let (ns, fake) = namespace("owners");
    ns.ensure_connected(broker()).unwrap();
    connected(&ns, &fake, 0).await;

    let panel = SubscribeOptions::default().with_owner("status-panel");
    let noop = || Arc::new(|_: &Message| -> Result<()> { Ok(()) });
    let a = ns.subscribe_with("devices/+/status", noop(), panel.clone()).unwrap();
    let b = ns.subscribe_with("alerts/#", noop(), panel).unwrap();
    let _other = ns.subscribe_func("alerts/#", |_| Ok(())).unwrap();

    assert_eq!(ns.unsubscribe_owner("status-panel"), 2);
    assert_eq!(ns.unsubscribe_owner("status-panel"), 0);
    assert_eq!(ns.len(), 1);
    assert_eq!(unsubscribes(&fake, "devices/+/status"), 1);
    assert_eq!(unsubscribes(&fake, "alerts/#"), 0);

    // Already removed by owner; dropping must not touch the shared filter.
    drop(a);
    drop(b);
    assert_eq!(unsubscribes(&fake, "alerts/#"), 0);
}

#[tokio::test]
async fn test_invalid_pattern_registers_nothing() {
    let (ns, fake) = namespace("invalid");
    for pattern in ["devices/#/status", "a+", "", "a//b", "$share/g"] {
        assert!(ns.subscribe_func(pattern, |_| Ok(())).is_err(), "{pattern:?}");
    }
    assert!(ns.is_empty());

    ns.ensure_connected(broker()).unwrap();
    connected(&ns, &fake, 0).await;
    assert_eq!(fake.count(|c| matches!(c, Call::Subscribe(..))), 0);
}

#[tokio::test]
async fn test_share_subscription_routes_on_filter() {
    let (ns, fake) = namespace("share");
    let hits = Arc::new(AtomicUsize::new(0));
    let _sub = ns.subscribe_func("$share/workers/jobs/+", counter(&hits)).unwrap();

    ns.ensure_connected(broker()).unwrap();
    connected(&ns, &fake, 0).await;
    assert_eq!(subscribes(&fake, "$share/workers/jobs/+"), 1);

    fake.emit(0, TransportEvent::Message(Message::new("jobs/42", "run")));
    settle().await;
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_handler_failures_do_not_stop_the_pump() {
    init_tracing();
    let (ns, fake) = namespace("faults");
    let hits = Arc::new(AtomicUsize::new(0));
    let _bad = ns.subscribe_func("alerts/#", |_| panic!("handler bug")).unwrap();
    let _err = ns
        .subscribe_func("alerts/#", |_| Err(Error::Handler("rejected".to_string())))
        .unwrap();
    let _good = ns.subscribe_func("alerts/#", counter(&hits)).unwrap();

    ns.ensure_connected(broker()).unwrap();
    connected(&ns, &fake, 0).await;

    fake.emit(0, TransportEvent::Message(Message::new("alerts/unit1", "hot")));
    fake.emit(0, TransportEvent::Message(Message::new("alerts/unit2", "hot")));
    settle().await;

    assert_eq!(hits.load(Ordering::SeqCst), 2);
    assert!(ns.is_connected());
}

#[tokio::test]
async fn test_messages_dispatched_in_transport_order() {
    let (ns, fake) = namespace("ordered");
    let seen = Arc::new(Mutex::new(Vec::new()));
    let _sub = {
        let seen = seen.clone();
        ns.subscribe_func("#", move |msg: &Message| -> Result<()> {
            seen.lock().push(msg.topic.clone());
            Ok(())
        })
        .unwrap()
    };

    ns.ensure_connected(broker()).unwrap();
    connected(&ns, &fake, 0).await;

    let topics: Vec<String> = (0..10).map(|i| format!("seq/{}/{}", i, 9 - i)).collect();
    for topic in &topics {
        fake.emit(0, TransportEvent::Message(Message::new(topic.as_str(), "x")));
    }
    settle().await;

    assert_eq!(*seen.lock(), topics);
}

#[tokio::test]
async fn test_handler_switching_config_stops_old_dispatch() {
    init_tracing();
    let (ns, fake) = namespace("switch");
    let later = Arc::new(AtomicUsize::new(0));
    let slot: Arc<Mutex<Option<Namespace>>> = Arc::new(Mutex::new(Some(ns.clone())));

    let _switch = {
        let slot = slot.clone();
        ns.subscribe_func("control/move", move |_: &Message| -> Result<()> {
            if let Some(ns) = slot.lock().take() {
                ns.ensure_connected(ConnectConfig::new("other.local", 1883))?;
            }
            Ok(())
        })
        .unwrap()
    };
    let _late = ns.subscribe_func("control/+", counter(&later)).unwrap();

    ns.ensure_connected(broker()).unwrap();
    connected(&ns, &fake, 0).await;

    fake.emit(0, TransportEvent::Message(Message::new("control/move", "go")));
    wait_state(&ns, |s| *s == ConnState::Connecting).await;
    settle().await;
    assert_eq!(fake.connections(), 2);
    assert_eq!(later.load(Ordering::SeqCst), 0);

    connected(&ns, &fake, 1).await;
    fake.emit(1, TransportEvent::Message(Message::new("control/stop", "now")));
    settle().await;
    assert_eq!(later.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_handler_may_unsubscribe_itself() {
    let (ns, fake) = namespace("reentrant");
    let hits = Arc::new(AtomicUsize::new(0));
    let slot = Arc::new(Mutex::new(None));

    let sub = {
        let hits = hits.clone();
        let slot = slot.clone();
        ns.subscribe_func("once", move |_| {
            hits.fetch_add(1, Ordering::SeqCst);
            if let Some(sub) = slot.lock().take() {
                drop::<crate::Subscription>(sub);
            }
            Ok(())
        })
        .unwrap()
    };
    *slot.lock() = Some(sub);

    ns.ensure_connected(broker()).unwrap();
    connected(&ns, &fake, 0).await;

    fake.emit(0, TransportEvent::Message(Message::new("once", "1")));
    fake.emit(0, TransportEvent::Message(Message::new("once", "2")));
    settle().await;

    assert_eq!(hits.load(Ordering::SeqCst), 1);
    assert_eq!(unsubscribes(&fake, "once"), 1);
}

#[tokio::test]
async fn test_teardown_without_connection_is_safe() {
    let (ns, fake) = namespace("idle");
    ns.teardown();
    ns.teardown();
    assert_eq!(ns.state(), ConnState::Uninitialized);
    assert!(fake.calls().is_empty());

    ns.reconnect().unwrap();
    assert_eq!(fake.connections(), 0);
}

#[tokio::test]
async fn test_teardown_keeps_subscriptions() {
    let (ns, fake) = namespace("keep");
    let _sub = ns.subscribe_func("devices/#", |_| Ok(())).unwrap();
    ns.ensure_connected(broker()).unwrap();
    connected(&ns, &fake, 0).await;

    ns.teardown();
    assert_eq!(ns.state(), ConnState::Uninitialized);
    assert_eq!(fake.calls_on(0).last(), Some(&Call::End));
    assert_eq!(unsubscribes(&fake, "devices/#"), 0);

    ns.ensure_connected(broker()).unwrap();
    connected(&ns, &fake, 1).await;
    assert!(fake
        .calls_on(1)
        .contains(&Call::Subscribe("devices/#".to_string(), QoS::AtMostOnce)));
}

#[tokio::test]
async fn test_connect_failure_reports_disconnected() {
    init_tracing();
    let (ns, fake) = namespace("refused");
    fake.fail_next_connect("bad credentials");

    assert_ok!(ns.ensure_connected(broker()));
    assert_eq!(
        ns.state(),
        ConnState::Disconnected {
            error: Some("mqtt: connection error: bad credentials".to_string())
        }
    );

    // The same config is retried rather than treated as already live.
    assert_ok!(ns.ensure_connected(broker()));
    assert_eq!(fake.connections(), 1);
    assert_eq!(ns.state(), ConnState::Connecting);
}

#[tokio::test]
async fn test_unusable_config_stays_uninitialized() {
    init_tracing();
    let (ns, fake) = namespace("gopher");
    let _sub = ns.subscribe_func("devices/#", |_| Ok(())).unwrap();

    assert_ok!(ns.ensure_connected(broker().with_scheme("gopher")));
    assert_eq!(ns.state(), ConnState::Uninitialized);
    assert_eq!(fake.connections(), 0);

    // A live connection is closed when the config turns unusable.
    ns.ensure_connected(broker()).unwrap();
    connected(&ns, &fake, 0).await;
    assert_ok!(ns.ensure_connected(ConnectConfig::new("broker.local", 0).with_scheme("gopher")));
    assert_eq!(ns.state(), ConnState::Uninitialized);
    assert_eq!(fake.calls_on(0).last(), Some(&Call::End));

    // Reconnect has nothing to reopen.
    ns.reconnect().unwrap();
    assert_eq!(fake.connections(), 1);
}

#[test]
fn test_ensure_connected_outside_runtime_fails() {
    let (ns, fake) = namespace("no-runtime");
    assert_err!(ns.ensure_connected(broker()));
    assert_eq!(fake.connections(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_connect_timeout() {
    init_tracing();
    let fake = FakeConnector::new();
    let ns = Namespace::with_connector(
        "slow",
        Arc::new(Recorder(Arc::clone(&fake))),
        ConnOptions::default().with_connect_timeout(Duration::from_secs(2)),
    );

    ns.ensure_connected(broker()).unwrap();
    assert_eq!(ns.state(), ConnState::Connecting);

    let mut rx = ns.watch_state();
    rx.wait_for(|s| s.is_disconnected()).await.unwrap();
    assert_eq!(
        ns.state(),
        ConnState::Disconnected {
            error: Some("connect timeout".to_string())
        }
    );
    assert_eq!(fake.calls_on(0).last(), Some(&Call::End));

    // A late CONNACK from the abandoned attempt changes nothing.
    fake.emit(0, TransportEvent::Connected);
    settle().await;
    assert!(ns.state().is_disconnected());
}

#[tokio::test(start_paused = true)]
async fn test_spawn_reconnect() {
    let (ns, fake) = namespace("auto");
    let task = ns.spawn_reconnect(ReconnectPolicy {
        delay: Duration::from_millis(100),
        max_attempts: Some(2),
    });

    ns.ensure_connected(broker()).unwrap();
    connected(&ns, &fake, 0).await;

    fake.emit(0, TransportEvent::Closed);
    wait_state(&ns, |s| s.is_disconnected()).await;
    wait_state(&ns, |s| *s == ConnState::Connecting).await;
    assert_eq!(fake.connections(), 2);

    // Two failed attempts in a row exhaust the policy.
    fake.emit(1, TransportEvent::Error("refused".to_string()));
    wait_state(&ns, |s| s.is_disconnected()).await;
    wait_state(&ns, |s| *s == ConnState::Connecting).await;
    assert_eq!(fake.connections(), 3);
    fake.emit(2, TransportEvent::Error("refused".to_string()));

    tokio::time::timeout(Duration::from_secs(5), task)
        .await
        .expect("reconnect task should stop")
        .unwrap();
    assert_eq!(fake.connections(), 3);
}

#[tokio::test]
async fn test_spawn_reconnect_stops_on_teardown() {
    let (ns, fake) = namespace("auto-stop");
    let task = ns.spawn_reconnect(ReconnectPolicy::default());

    ns.ensure_connected(broker()).unwrap();
    connected(&ns, &fake, 0).await;
    ns.teardown();

    tokio::time::timeout(Duration::from_secs(1), task)
        .await
        .expect("reconnect task should stop")
        .unwrap();
}

#[tokio::test]
async fn test_list_registry_namespace() {
    let fake = FakeConnector::new();
    let ns = Namespace::with_registry(
        "linear",
        ListRegistry::new(),
        Arc::new(Recorder(Arc::clone(&fake))),
        ConnOptions::default(),
    );
    let hits = Arc::new(AtomicUsize::new(0));
    let _sub = ns.subscribe_func("devices/+/status", counter(&hits)).unwrap();

    ns.ensure_connected(broker()).unwrap();
    fake.emit(0, TransportEvent::Connected);
    let mut rx = ns.watch_state();
    rx.wait_for(|s| s.is_connected()).await.unwrap();

    fake.emit(0, TransportEvent::Message(Message::new("devices/unit7/status", "ok")));
    settle().await;
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_hub() {
    let fake = FakeConnector::new();
    let hub = Hub::with_connector(Arc::new(Recorder(Arc::clone(&fake))), ConnOptions::default());

    let ns = hub.namespace("telemetry");
    let _sub = ns.subscribe_func("devices/#", |_| Ok(())).unwrap();
    assert_eq!(hub.namespace("telemetry").len(), 1);
    assert!(hub.get("control").is_none());

    hub.ensure_connected("control", broker()).unwrap();
    assert_eq!(hub.names(), vec!["control".to_string(), "telemetry".to_string()]);
    assert_eq!(hub.get("control").unwrap().state(), ConnState::Connecting);

    assert!(hub.teardown("control"));
    assert!(!hub.teardown("control"));
    assert_eq!(hub.names(), vec!["telemetry".to_string()]);
    assert!(fake.calls_on(0).contains(&Call::End));
}
