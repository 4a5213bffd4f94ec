//! Seam between the session and the wireless stack.
//!
//! Request/response operations are methods on [`Transport`]. Everything the
//! radio reports on its own (scan results, notifications, link loss) is pushed
//! into one event channel that the session's control loop consumes.

use std::fmt::Debug;
use async_trait::async_trait;
use futures::channel::mpsc::{channel, Receiver, Sender};
use uuid::Uuid;

use crate::error::TransportError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceInfo {
    pub uuid: Uuid,
    pub characteristics: Vec<Uuid>,
}

/// The negotiated endpoint on a connected device. Only the connection state
/// machine holds one, and only while connected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandChannel {
    pub service: Uuid,
    pub characteristic: Uuid,
}

#[derive(Debug, Clone)]
pub enum TransportEvent<P> {
    Discovered {
        name: Option<String>,
        peripheral: P,
    },
    ScanFailed(TransportError),
    Notification {
        characteristic: Uuid,
        value: Vec<u8>,
    },
    /// The connected peripheral went away without being asked to.
    LinkLost,
}

pub type EventSink<P> = Sender<TransportEvent<P>>;
pub type EventStream<P> = Receiver<TransportEvent<P>>;

pub fn event_channel<P>() -> (EventSink<P>, EventStream<P>) {
    channel(64)
}

#[async_trait]
pub trait Transport: Send + Sync + 'static {
    type Peripheral: Clone + Debug + Send + Sync + 'static;

    /// Start reporting `Discovered` events. Fails with `Unavailable` when the
    /// radio is off or missing.
    async fn start_scan(&self) -> Result<(), TransportError>;

    async fn stop_scan(&self) -> Result<(), TransportError>;

    async fn connect(&self, peripheral: &Self::Peripheral) -> Result<(), TransportError>;

    async fn discover_services(&self, peripheral: &Self::Peripheral) -> Result<Vec<ServiceInfo>, TransportError>;

    /// Start reporting `Notification` events for the channel's characteristic.
    async fn subscribe(&self, peripheral: &Self::Peripheral, channel: &CommandChannel) -> Result<(), TransportError>;

    async fn write(&self, peripheral: &Self::Peripheral, channel: &CommandChannel, value: &[u8]) -> Result<(), TransportError>;

    async fn disconnect(&self, peripheral: &Self::Peripheral) -> Result<(), TransportError>;
}
