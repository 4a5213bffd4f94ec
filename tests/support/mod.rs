#![allow(dead_code)]

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use async_trait::async_trait;
use futures::SinkExt;
use tokio::sync::broadcast;
use tokio::time::{sleep, timeout};

use hand_controller::config::types::SessionConfig;
use hand_controller::device::constants::{make_hand_command_uuid, make_hand_service_uuid, DEVICE_NAME};
use hand_controller::device::session::Session;
use hand_controller::device::transport::{
    event_channel, CommandChannel, EventSink, ServiceInfo, Transport, TransportEvent,
};
use hand_controller::device::types::SessionUpdate;
use hand_controller::error::TransportError;

pub const STATUS_REPLY: &str =
    r#"STATUS:{"servosEnabled":true,"emergencyStop":false,"autoMode":false,"angles":{"0":10,"1":20,"2":30,"3":40,"4":50}}"#;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockPeripheral(pub String);

/// How the fake radio behaves. Tests adjust it before or during a session.
#[derive(Debug, Clone)]
pub struct Behavior {
    pub services: Vec<ServiceInfo>,
    pub scan_error: Option<TransportError>,
    pub connect_error: Option<TransportError>,
    pub connect_delay: Option<Duration>,
    pub write_error: Option<TransportError>,
    /// Name and delay of the advertisement sent after each scan start.
    pub advertise: Option<(Option<String>, Duration)>,
    /// Sent back as a notification whenever STATUS is written.
    pub status_reply: Option<String>,
}

impl Default for Behavior {
    fn default() -> Self {
        Behavior {
            services: vec![ServiceInfo {
                uuid: make_hand_service_uuid(),
                characteristics: vec![make_hand_command_uuid()],
            }],
            scan_error: None,
            connect_error: None,
            connect_delay: None,
            write_error: None,
            advertise: Some((Some(DEVICE_NAME.to_string()), Duration::from_millis(200))),
            status_reply: Some(STATUS_REPLY.to_string()),
        }
    }
}

/// Everything the session asked the radio to do.
#[derive(Debug, Default, Clone)]
pub struct Record {
    pub scans_started: usize,
    pub scans_stopped: usize,
    pub connects: usize,
    pub disconnects: usize,
    pub subscriptions: usize,
    pub written: Vec<String>,
}

#[derive(Clone)]
pub struct MockTransport {
    behavior: Arc<Mutex<Behavior>>,
    record: Arc<Mutex<Record>>,
    sink: EventSink<MockPeripheral>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl MockTransport {
    pub fn behavior(&self) -> MutexGuard<'_, Behavior> {
        lock(&self.behavior)
    }

    pub fn record(&self) -> Record {
        lock(&self.record).clone()
    }

    pub fn written(&self) -> Vec<String> {
        lock(&self.record).written.clone()
    }

    /// Push an event as if the radio reported it.
    pub async fn emit(&self, event: TransportEvent<MockPeripheral>) {
        let mut sink = self.sink.clone();
        sink.send(event).await.expect("session stopped listening");
    }

    pub async fn notify(&self, text: &str) {
        self.emit(TransportEvent::Notification {
            characteristic: make_hand_command_uuid(),
            value: text.as_bytes().to_vec(),
        }).await;
    }

    fn emit_later(&self, delay: Duration, event: TransportEvent<MockPeripheral>) {
        let mut sink = self.sink.clone();
        tokio::spawn(async move {
            sleep(delay).await;
            let _ = sink.send(event).await;
        });
    }
}

#[async_trait]
impl Transport for MockTransport {
    type Peripheral = MockPeripheral;

    async fn start_scan(&self) -> Result<(), TransportError> {
        let behavior = self.behavior().clone();
        if let Some(err) = behavior.scan_error {
            return Err(err);
        }

        lock(&self.record).scans_started += 1;

        if let Some((name, delay)) = behavior.advertise {
            let peripheral = MockPeripheral(name.clone().unwrap_or_default());
            self.emit_later(delay, TransportEvent::Discovered { name, peripheral });
        }
        Ok(())
    }

    async fn stop_scan(&self) -> Result<(), TransportError> {
        lock(&self.record).scans_stopped += 1;
        Ok(())
    }

    async fn connect(&self, _peripheral: &MockPeripheral) -> Result<(), TransportError> {
        let behavior = self.behavior().clone();
        lock(&self.record).connects += 1;

        if let Some(delay) = behavior.connect_delay {
            sleep(delay).await;
        }
        match behavior.connect_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    async fn discover_services(&self, _peripheral: &MockPeripheral) -> Result<Vec<ServiceInfo>, TransportError> {
        Ok(self.behavior().services.clone())
    }

    async fn subscribe(&self, _peripheral: &MockPeripheral, _channel: &CommandChannel) -> Result<(), TransportError> {
        lock(&self.record).subscriptions += 1;
        Ok(())
    }

    async fn write(&self, _peripheral: &MockPeripheral, _channel: &CommandChannel, value: &[u8]) -> Result<(), TransportError> {
        let behavior = self.behavior().clone();
        let text = String::from_utf8(value.to_vec()).expect("commands are utf-8");

        if let Some(err) = behavior.write_error {
            return Err(err);
        }

        lock(&self.record).written.push(text.clone());

        if text == "STATUS" {
            if let Some(reply) = behavior.status_reply {
                self.emit_later(Duration::from_millis(10), TransportEvent::Notification {
                    characteristic: make_hand_command_uuid(),
                    value: reply.into_bytes(),
                });
            }
        }
        Ok(())
    }

    async fn disconnect(&self, _peripheral: &MockPeripheral) -> Result<(), TransportError> {
        lock(&self.record).disconnects += 1;
        Ok(())
    }
}

pub fn start_with(config: SessionConfig, behavior: Behavior) -> (Session, MockTransport) {
    let (sink, events) = event_channel();
    let transport = MockTransport {
        behavior: Arc::new(Mutex::new(behavior)),
        record: Arc::new(Mutex::new(Record::default())),
        sink,
    };

    let session = Session::spawn(config, transport.clone(), events);
    (session, transport)
}

pub fn start(behavior: Behavior) -> (Session, MockTransport) {
    start_with(SessionConfig::default(), behavior)
}

/// Wait for the first update matching `predicate`. Time is paused in these
/// tests, so the generous limit costs nothing.
pub async fn wait_for<F>(updates: &mut broadcast::Receiver<SessionUpdate>, predicate: F) -> SessionUpdate
where
    F: Fn(&SessionUpdate) -> bool,
{
    timeout(Duration::from_secs(120), async {
        loop {
            let update = updates.recv().await.expect("update stream closed");
            if predicate(&update) {
                return update;
            }
        }
    })
    .await
    .expect("expected session update never arrived")
}

/// Connect and wait until the STATUS reply has been mirrored.
pub async fn connected(behavior: Behavior) -> (Session, MockTransport, broadcast::Receiver<SessionUpdate>) {
    let (session, transport) = start(behavior);
    let mut updates = session.subscribe();

    session.request_scan().await.expect("scan");
    wait_for(&mut updates, |update| update.is_connected() && update.mirror.joint_angles[0] == 10).await;

    (session, transport, updates)
}

/// Let spawned tasks and the control loop run without advancing the clock much.
pub async fn settle() {
    sleep(Duration::from_millis(50)).await;
}
