use std::mem;
use std::time::Duration;
use futures::channel::mpsc::{channel, Receiver, Sender};
use futures::{SinkExt, StreamExt};
use log::{debug, info, warn};
use tokio::spawn;
use tokio::sync::{broadcast, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::types::SessionConfig;
use crate::device::codec::{clamp_angle, decode_notification, Command, CommandClass, Notification};
use crate::device::constants::{joint_name, JOINT_COUNT};
use crate::device::gesture::Gesture;
use crate::device::latch::OneShotLatch;
use crate::device::mirror::DeviceStateMirror;
use crate::device::safety::{Denial, SafetyGate};
use crate::device::transport::{CommandChannel, EventStream, Transport, TransportEvent};
use crate::device::types::{DeviceIdentity, SessionState, SessionUpdate};
use crate::error::{SessionError, TransportError};

/// A command request as the presentation layer made it. Arguments are only
/// validated once the gate has let the request through.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum CommandIntent {
    Fixed(Command),
    SetJoint { joint: usize, angle: i32 },
    RunGesture(String),
    ToggleEmergencyStop,
    ToggleAutoMode,
    ToggleServosEnabled,
}

impl CommandIntent {
    fn class(&self) -> CommandClass {
        match self {
            CommandIntent::Fixed(command) => command.class(),
            CommandIntent::SetJoint { .. } | CommandIntent::RunGesture(_) => CommandClass::Motion,
            CommandIntent::ToggleEmergencyStop
            | CommandIntent::ToggleAutoMode
            | CommandIntent::ToggleServosEnabled => CommandClass::System,
        }
    }

    fn resolve(self, mirror: &DeviceStateMirror) -> Result<Command, SessionError> {
        let command = match self {
            CommandIntent::Fixed(command) => command,
            CommandIntent::SetJoint { joint, angle } => {
                if joint >= JOINT_COUNT {
                    return Err(SessionError::InvalidJoint(joint));
                }
                Command::Servo { joint, angle: clamp_angle(angle) }
            },
            CommandIntent::RunGesture(name) => {
                let gesture = Gesture::parse(&name)?;
                if !gesture.is_known() {
                    debug!("Gesture {} has no local pose, mirroring neutral angles", gesture.name());
                }
                Command::Gesture(gesture)
            },
            CommandIntent::ToggleEmergencyStop => Command::EmergencyStop(!mirror.emergency_stop),
            CommandIntent::ToggleAutoMode => Command::AutoMode(!mirror.auto_mode),
            CommandIntent::ToggleServosEnabled => Command::ServosEnabled(!mirror.servos_enabled),
        };

        Ok(command)
    }
}

#[derive(Debug)]
pub(crate) enum Intent {
    Scan,
    Disconnect,
    Send(CommandIntent),
}

#[derive(Debug)]
pub(crate) struct IntentRequest {
    pub intent: Intent,
    pub reply: oneshot::Sender<Result<(), SessionError>>,
}

#[derive(Debug)]
enum TimerEvent {
    ScanTimeout { attempt: u64 },
}

#[derive(Debug)]
struct ScanAttempt {
    id: u64,
    latch: OneShotLatch,
    timer: JoinHandle<()>,
}

#[derive(Debug)]
enum ConnectionState<P> {
    Disconnected,
    Scanning {
        attempt: ScanAttempt,
    },
    Connecting {
        peripheral: P,
    },
    Connected {
        peripheral: P,
        channel: CommandChannel,
    },
}

enum Establish {
    Finished(Result<CommandChannel, SessionError>),
    Aborted(oneshot::Sender<Result<(), SessionError>>),
    Shutdown,
}

/// Where session updates go: every update to the broadcast stream, the most
/// recent one to the watch channel.
pub(crate) struct Publisher {
    pub updates: broadcast::Sender<SessionUpdate>,
    pub latest: watch::Sender<SessionUpdate>,
}

async fn connect_peripheral<T: Transport>(
    transport: &T,
    peripheral: &T::Peripheral,
    config: &SessionConfig,
) -> Result<CommandChannel, SessionError> {
    info!("Connecting to peripheral...");
    transport.connect(peripheral).await
        .map_err(|source| SessionError::ConnectFailed { source })?;

    info!("Connected; Discovering services...");
    let services = transport.discover_services(peripheral).await
        .map_err(|source| SessionError::ConnectFailed { source })?;

    let service = services
        .iter()
        .find(|service| service.uuid == config.service_uuid)
        .ok_or(SessionError::ServiceNotFound(config.service_uuid))?;

    if !service.characteristics.contains(&config.characteristic_uuid) {
        return Err(SessionError::CharacteristicNotFound(config.characteristic_uuid));
    }

    let channel = CommandChannel {
        service: service.uuid,
        characteristic: config.characteristic_uuid,
    };

    info!("Subscribing to characteristic {:?} {:?}", channel.service, channel.characteristic);
    transport.subscribe(peripheral, &channel).await
        .map_err(|source| SessionError::ConnectFailed { source })?;

    Ok(channel)
}

fn spawn_scan_timer(attempt: u64, latch: OneShotLatch, duration: Duration, mut sender: Sender<TimerEvent>) -> JoinHandle<()> {
    spawn(async move {
        sleep(duration).await;

        // Aborting this task is best-effort; the control loop re-checks the
        // latch before acting on the event.
        if !latch.is_settled() {
            let _ = sender.send(TimerEvent::ScanTimeout { attempt }).await;
        }
    })
}

/// The session state machine. Runs as a single task; every transition
/// happens inside `run`, so the task is the only writer of session state.
pub(crate) struct Connection<T: Transport> {
    transport: T,
    config: SessionConfig,
    identity: DeviceIdentity,
    gate: SafetyGate,
    state: ConnectionState<T::Peripheral>,
    mirror: DeviceStateMirror,
    last_error: Option<SessionError>,
    scan_attempts: u64,
    timer_sender: Sender<TimerEvent>,
    publisher: Publisher,
}

impl<T: Transport> Connection<T> {
    fn session_state(&self) -> SessionState {
        match self.state {
            ConnectionState::Disconnected => SessionState::Disconnected,
            ConnectionState::Scanning { .. } => SessionState::Scanning,
            ConnectionState::Connecting { .. } => SessionState::Connecting,
            ConnectionState::Connected { .. } => SessionState::Connected,
        }
    }

    fn publish(&self) {
        let update = SessionUpdate {
            session_state: self.session_state(),
            mirror: self.mirror.clone(),
            last_error: self.last_error.clone(),
        };

        self.publisher.latest.send_replace(update.clone());
        // having no subscribers is fine
        let _ = self.publisher.updates.send(update);
    }

    fn transition(&mut self, state: ConnectionState<T::Peripheral>, last_error: Option<SessionError>) {
        self.state = state;
        self.last_error = last_error;
        info!("Session state: {} ({:?})", self.session_state(), self.last_error);
        self.publish();
    }

    async fn release(&self, peripheral: &T::Peripheral) {
        if let Err(err) = self.transport.disconnect(peripheral).await {
            debug!("Disconnecting peripheral failed: {}", err);
        }
    }

    /// Leave the Scanning state (if in it): stop the radio and drop the timer.
    /// Leaves the state Disconnected without publishing.
    async fn leave_scanning(&mut self) {
        let attempt = match mem::replace(&mut self.state, ConnectionState::Disconnected) {
            ConnectionState::Scanning { attempt } => attempt,
            other => {
                self.state = other;
                return;
            },
        };

        attempt.latch.try_settle();
        attempt.timer.abort();

        if let Err(err) = self.transport.stop_scan().await {
            warn!("Failed to stop scanning: {}", err);
        }
    }

    async fn start_scan(&mut self) -> Result<(), SessionError> {
        match self.state {
            ConnectionState::Connecting { .. } | ConnectionState::Connected { .. } => {
                return Err(SessionError::Busy(self.session_state()));
            },
            ConnectionState::Scanning { .. } => {
                info!("Restarting scan");
                self.leave_scanning().await;
            },
            ConnectionState::Disconnected => {},
        }

        info!("Scanning for {}...", self.identity.advertised_name);

        if let Err(source) = self.transport.start_scan().await {
            warn!("Scanning failed {:?}", source);

            let error = match source {
                TransportError::Unavailable(_) | TransportError::PermissionDenied => {
                    SessionError::TransportUnavailable { source }
                },
                source => SessionError::ScanFailed { source },
            };

            self.transition(ConnectionState::Disconnected, Some(error.clone()));
            return Err(error);
        }

        self.scan_attempts += 1;
        let latch = OneShotLatch::new();
        let timer = spawn_scan_timer(
            self.scan_attempts,
            latch.clone(),
            self.config.scan_timeout(),
            self.timer_sender.clone(),
        );

        let attempt = ScanAttempt { id: self.scan_attempts, latch, timer };
        self.transition(ConnectionState::Scanning { attempt }, None);
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), SessionError> {
        match mem::replace(&mut self.state, ConnectionState::Disconnected) {
            ConnectionState::Disconnected => {
                return Ok(());
            },
            state @ ConnectionState::Scanning { .. } => {
                info!("Scan cancelled");
                self.state = state;
                self.leave_scanning().await;
            },
            ConnectionState::Connecting { peripheral } | ConnectionState::Connected { peripheral, .. } => {
                info!("Disconnecting from peripheral");
                self.release(&peripheral).await;
            },
        }

        self.transition(ConnectionState::Disconnected, None);
        Ok(())
    }

    async fn write_command(&self, peripheral: &T::Peripheral, channel: &CommandChannel, command: &Command) -> Result<(), SessionError> {
        let payload = command.to_bytes();
        let fut = self.transport.write(peripheral, channel, &payload);

        let result = match timeout(self.config.write_deadline(), fut).await {
            Err(_) => {
                warn!("Sending to command characteristic took too long");
                Err(TransportError::TimedOut)
            },
            Ok(result) => result,
        };

        match result {
            Ok(()) => {
                debug!("Sent {}", command);
                Ok(())
            },
            Err(source) => {
                // not surfaced to the update stream, a noisy link would spam it
                warn!("Failed to send {}: {}", command, source);
                Err(SessionError::WriteFailed { source })
            },
        }
    }

    async fn send(&mut self, intent: CommandIntent) -> Result<(), SessionError> {
        let verdict = self.gate.check(
            intent.class(),
            self.session_state(),
            self.mirror.emergency_stop,
            self.mirror.servos_enabled,
        );
        if let Err(denial) = verdict {
            debug!("Refusing {:?}: {}", intent, denial);
            return Err(SessionError::Denied(denial));
        }

        let command = intent.resolve(&self.mirror)?;

        let ConnectionState::Connected { peripheral, channel } = &self.state else {
            return Err(SessionError::Denied(Denial::NotConnected));
        };

        if let Command::Servo { joint, angle } = &command {
            debug!("Moving {} to {}°", joint_name(*joint), angle);
        }

        self.mirror.apply_command(&command);
        self.publish();

        self.write_command(peripheral, channel, &command).await
    }

    async fn handle_request(&mut self, request: IntentRequest) {
        let result = match request.intent {
            Intent::Scan => self.start_scan().await,
            Intent::Disconnect => self.disconnect().await,
            Intent::Send(intent) => self.send(intent).await,
        };

        // the caller may have stopped waiting
        let _ = request.reply.send(result);
    }

    async fn on_discovered(&mut self, name: Option<String>, peripheral: T::Peripheral) {
        let ConnectionState::Scanning { attempt } = &self.state else {
            return;
        };

        if !self.identity.matches(name.as_deref()) {
            debug!("Ignoring peripheral {:?}", name);
            return;
        }

        if !attempt.latch.try_settle() {
            debug!("Scan already settled, ignoring {:?}", name);
            return;
        }

        info!("Using peripheral {} {:?}", name.as_deref().unwrap_or("NONE"), peripheral);
        self.leave_scanning().await;
        self.transition(ConnectionState::Connecting { peripheral }, None);
    }

    async fn on_scan_failed(&mut self, source: TransportError) {
        let ConnectionState::Scanning { attempt } = &self.state else {
            debug!("Ignoring scan error outside of a scan: {}", source);
            return;
        };

        if !attempt.latch.try_settle() {
            return;
        }

        warn!("Scanning failed {:?}", source);
        self.leave_scanning().await;
        self.transition(ConnectionState::Disconnected, Some(SessionError::ScanFailed { source }));
    }

    async fn on_scan_timeout(&mut self, expired: u64) {
        let won = match &self.state {
            ConnectionState::Scanning { attempt } if attempt.id == expired => attempt.latch.try_settle(),
            _ => false,
        };

        if !won {
            debug!("Ignoring stale scan timeout");
            return;
        }

        info!("No peripherals matched within {:?}", self.config.scan_timeout());
        self.leave_scanning().await;
        self.transition(ConnectionState::Disconnected, Some(SessionError::ScanTimeout));
    }

    fn on_notification(&mut self, characteristic: Uuid, value: &[u8]) {
        match &self.state {
            ConnectionState::Connected { channel, .. } if channel.characteristic == characteristic => {},
            _ => {
                debug!("Ignoring notification from {:?}", characteristic);
                return;
            },
        }

        match decode_notification(value) {
            Err(err) => {
                let error = SessionError::from(err);
                warn!("Dropping notification {:?}: {}", String::from_utf8_lossy(value), error);
            },
            Ok(Notification::Status(report)) => {
                self.mirror.apply_status(&report);
                self.publish();
            },
            Ok(Notification::DeviceError(message)) => {
                warn!("Device reported an error: {}", message);
                self.last_error = Some(SessionError::DeviceReportedError(message));
                self.publish();
            },
            Ok(Notification::UnknownCommand) => {
                warn!("Device did not recognize a command");
                self.last_error = Some(SessionError::ProtocolMismatch);
                self.publish();
            },
            Ok(Notification::Ignored) => {
                debug!("Ignoring notification {:?}", String::from_utf8_lossy(value));
            },
        }
    }

    async fn on_link_lost(&mut self) {
        match mem::replace(&mut self.state, ConnectionState::Disconnected) {
            ConnectionState::Connected { peripheral, .. } => {
                warn!("Connection lost");
                self.release(&peripheral).await;
                self.transition(ConnectionState::Disconnected, Some(SessionError::UnsolicitedDisconnect));
            },
            other => {
                self.state = other;
                debug!("Ignoring link loss while {}", self.session_state());
            },
        }
    }

    async fn handle_transport_event(&mut self, event: TransportEvent<T::Peripheral>) {
        match event {
            TransportEvent::Discovered { name, peripheral } => self.on_discovered(name, peripheral).await,
            TransportEvent::ScanFailed(source) => self.on_scan_failed(source).await,
            TransportEvent::Notification { characteristic, value } => self.on_notification(characteristic, &value),
            TransportEvent::LinkLost => self.on_link_lost().await,
        }
    }

    /// Drive the Connecting state to completion while still answering intents.
    /// Returns false when the session is shutting down.
    async fn establish(
        &mut self,
        intents: &mut Receiver<IntentRequest>,
        events: &mut EventStream<T::Peripheral>,
        cancel: &CancellationToken,
    ) -> bool {
        let peripheral = match &self.state {
            ConnectionState::Connecting { peripheral } => peripheral.clone(),
            _ => return true,
        };

        let outcome = {
            let attempt = timeout(
                self.config.connect_deadline(),
                connect_peripheral(&self.transport, &peripheral, &self.config),
            );
            tokio::pin!(attempt);

            loop {
                tokio::select! {
                    biased;

                    _ = cancel.cancelled() => break Establish::Shutdown,
                    result = &mut attempt => {
                        break Establish::Finished(match result {
                            Ok(result) => result,
                            Err(_) => Err(SessionError::ConnectFailed { source: TransportError::TimedOut }),
                        });
                    },
                    request = intents.next() => match request {
                        None => break Establish::Shutdown,
                        Some(IntentRequest { intent: Intent::Disconnect, reply }) => break Establish::Aborted(reply),
                        Some(IntentRequest { intent: Intent::Scan, reply }) => {
                            let _ = reply.send(Err(SessionError::Busy(SessionState::Connecting)));
                        },
                        Some(IntentRequest { intent: Intent::Send(_), reply }) => {
                            let _ = reply.send(Err(SessionError::Denied(Denial::NotConnected)));
                        },
                    },
                    Some(event) = events.next() => match event {
                        TransportEvent::LinkLost => {
                            break Establish::Finished(Err(SessionError::ConnectFailed { source: TransportError::NotConnected }));
                        },
                        other => debug!("Ignoring {:?} while connecting", other),
                    },
                }
            }
        };

        match outcome {
            Establish::Finished(Ok(channel)) => {
                info!("Peripheral ready");
                self.transition(ConnectionState::Connected { peripheral: peripheral.clone(), channel }, None);

                // resynchronize the mirror; the reply arrives as a notification
                if let Err(err) = self.write_command(&peripheral, &channel, &Command::QueryStatus).await {
                    debug!("Initial status query failed: {}", err);
                }
                true
            },
            Establish::Finished(Err(error)) => {
                warn!("Connecting to peripheral failed: {}", error);
                self.release(&peripheral).await;
                self.transition(ConnectionState::Disconnected, Some(error));
                true
            },
            Establish::Aborted(reply) => {
                info!("Connection attempt cancelled");
                self.release(&peripheral).await;
                self.transition(ConnectionState::Disconnected, None);
                let _ = reply.send(Ok(()));
                true
            },
            Establish::Shutdown => {
                self.release(&peripheral).await;
                self.state = ConnectionState::Disconnected;
                false
            },
        }
    }

    async fn teardown(&mut self) {
        info!("Tearing down session");

        match mem::replace(&mut self.state, ConnectionState::Disconnected) {
            ConnectionState::Disconnected => {},
            state @ ConnectionState::Scanning { .. } => {
                self.state = state;
                self.leave_scanning().await;
            },
            ConnectionState::Connecting { peripheral } | ConnectionState::Connected { peripheral, .. } => {
                self.release(&peripheral).await;
            },
        }

        self.transition(ConnectionState::Disconnected, None);
    }

    async fn run(
        mut self,
        mut intents: Receiver<IntentRequest>,
        mut events: EventStream<T::Peripheral>,
        mut timer_events: Receiver<TimerEvent>,
        cancel: CancellationToken,
    ) {
        'mainloop: loop {
            if let ConnectionState::Connecting { .. } = self.state {
                if !self.establish(&mut intents, &mut events, &cancel).await {
                    break 'mainloop;
                }
                continue;
            }

            tokio::select! {
                biased;

                _ = cancel.cancelled() => {
                    break 'mainloop;
                },
                request = intents.next() => match request {
                    Some(request) => self.handle_request(request).await,
                    None => {
                        debug!("All session handles dropped");
                        break 'mainloop;
                    },
                },
                Some(event) = events.next() => {
                    self.handle_transport_event(event).await;
                },
                Some(event) = timer_events.next() => match event {
                    TimerEvent::ScanTimeout { attempt } => self.on_scan_timeout(attempt).await,
                },
            }
        }

        self.teardown().await;
    }
}

/// Start the control loop for one session.
pub(crate) fn spawn_connection<T: Transport>(
    config: SessionConfig,
    transport: T,
    events: EventStream<T::Peripheral>,
    intents: Receiver<IntentRequest>,
    publisher: Publisher,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    let (timer_sender, timer_events) = channel::<TimerEvent>(8);

    let connection = Connection {
        transport,
        identity: config.identity(),
        gate: config.safety_gate(),
        config,
        state: ConnectionState::Disconnected,
        mirror: DeviceStateMirror::default(),
        last_error: None,
        scan_attempts: 0,
        timer_sender,
        publisher,
    };

    spawn(connection.run(intents, events, timer_events, cancel))
}
