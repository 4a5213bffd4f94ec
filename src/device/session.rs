//! Public entry point for the presentation layer.
//!
//! A [`Session`] owns the control loop task. Intents are forwarded to it over
//! a channel and answered once the loop has acted on them; every resulting
//! change is published as a [`SessionUpdate`].

use futures::channel::mpsc::{channel, Sender};
use futures::SinkExt;
use log::warn;
use tokio::sync::{broadcast, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::types::SessionConfig;
use crate::device::codec::{clamp_angle, Command};
use crate::device::connection::{spawn_connection, CommandIntent, Intent, IntentRequest, Publisher};
use crate::device::transport::{EventStream, Transport};
use crate::device::types::{SessionState, SessionUpdate};
use crate::error::SessionError;

const UPDATE_CAPACITY: usize = 64;

pub struct Session {
    intents: Sender<IntentRequest>,
    updates: broadcast::Sender<SessionUpdate>,
    latest: watch::Receiver<SessionUpdate>,
    // this token is cancelled upon shutdown
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl Session {
    /// Start a session on the current tokio runtime. `events` must be the
    /// receiving end of the channel `transport` reports into.
    pub fn spawn<T: Transport>(config: SessionConfig, transport: T, events: EventStream<T::Peripheral>) -> Session {
        let (intents, intent_receiver) = channel::<IntentRequest>(16);
        let (updates, _) = broadcast::channel(UPDATE_CAPACITY);
        let (latest_sender, latest) = watch::channel(SessionUpdate::initial());
        let cancel = CancellationToken::new();

        let publisher = Publisher {
            updates: updates.clone(),
            latest: latest_sender,
        };

        let task = spawn_connection(config, transport, events, intent_receiver, publisher, cancel.clone());

        Session {
            intents,
            updates,
            latest,
            cancel,
            task: Some(task),
        }
    }

    /// Every update from now on, in order. Slow receivers may lag.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionUpdate> {
        self.updates.subscribe()
    }

    /// Only the most recent update.
    pub fn watch(&self) -> watch::Receiver<SessionUpdate> {
        self.latest.clone()
    }

    pub fn snapshot(&self) -> SessionUpdate {
        self.latest.borrow().clone()
    }

    pub fn state(&self) -> SessionState {
        self.latest.borrow().session_state
    }

    async fn request(&self, intent: Intent) -> Result<(), SessionError> {
        let (reply, response) = oneshot::channel();
        let mut sender = self.intents.clone();

        sender.send(IntentRequest { intent, reply }).await
            .map_err(|_| SessionError::SessionClosed)?;

        response.await.map_err(|_| SessionError::SessionClosed)?
    }

    async fn send_command(&self, intent: CommandIntent) -> Result<(), SessionError> {
        self.request(Intent::Send(intent)).await
    }

    /// Scan for the configured device and connect to the first match. Returns
    /// once scanning has started; the outcome arrives as updates.
    pub async fn request_scan(&self) -> Result<(), SessionError> {
        self.request(Intent::Scan).await
    }

    /// Cancel a scan or connection attempt, or close the connection.
    pub async fn request_disconnect(&self) -> Result<(), SessionError> {
        self.request(Intent::Disconnect).await
    }

    pub async fn query_status(&self) -> Result<(), SessionError> {
        self.send_command(CommandIntent::Fixed(Command::QueryStatus)).await
    }

    /// Out of range angles are clamped. An unknown joint is refused once the
    /// session is known to be connected.
    pub async fn set_joint_angle(&self, joint: usize, angle: i32) -> Result<(), SessionError> {
        self.send_command(CommandIntent::SetJoint { joint, angle }).await
    }

    pub async fn set_all_joints(&self, angle: i32) -> Result<(), SessionError> {
        let angle = clamp_angle(angle);
        self.send_command(CommandIntent::Fixed(Command::All { angle })).await
    }

    pub async fn run_gesture(&self, name: &str) -> Result<(), SessionError> {
        self.send_command(CommandIntent::RunGesture(name.to_string())).await
    }

    pub async fn toggle_emergency_stop(&self) -> Result<(), SessionError> {
        self.send_command(CommandIntent::ToggleEmergencyStop).await
    }

    pub async fn toggle_auto_mode(&self) -> Result<(), SessionError> {
        self.send_command(CommandIntent::ToggleAutoMode).await
    }

    pub async fn toggle_servos_enabled(&self) -> Result<(), SessionError> {
        self.send_command(CommandIntent::ToggleServosEnabled).await
    }

    /// Stop the control loop and wait until it has released the scan, the
    /// connection attempt or the device handle.
    pub async fn shutdown(mut self) {
        self.cancel.cancel();

        if let Some(task) = self.task.take() {
            if let Err(err) = task.await {
                warn!("Session task did not stop cleanly: {}", err);
            }
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
