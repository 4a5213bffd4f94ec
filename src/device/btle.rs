use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard};
use std::sync::atomic::{AtomicBool, Ordering};
use async_trait::async_trait;
use btleplug::api::{Central, CentralEvent, Characteristic, Manager as _, Peripheral as _, ScanFilter, WriteType};
use btleplug::platform::{Adapter, Manager, Peripheral, PeripheralId};
use futures::{SinkExt, Stream, StreamExt};
use log::{debug, info, warn};
use tokio::spawn;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::device::transport::{CommandChannel, EventSink, ServiceInfo, Transport, TransportEvent};
use crate::error::TransportError;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

async fn discovered_event(adapter: &Adapter, id: &PeripheralId) -> Option<TransportEvent<Peripheral>> {
    let peripheral = match adapter.peripheral(id).await {
        Ok(peripheral) => peripheral,
        Err(err) => {
            warn!("Could not look up peripheral {:?}: {:?}", id, err);
            return None;
        },
    };

    let name = match peripheral.properties().await {
        Err(err) => {
            warn!("Could not query peripheral for properties: {:?}", err);
            return None;
        },
        Ok(None) => {
            debug!("Peripheral has no properties");
            None
        },
        Ok(Some(properties)) => {
            debug!(
                "Found peripheral {} {:?} {} {:?}",
                properties.address,
                properties.address_type,
                properties.local_name.as_deref().unwrap_or("NONE"),
                properties.services,
            );
            properties.local_name
        },
    };

    Some(TransportEvent::Discovered { name, peripheral })
}

/// Forward adapter events to the session until cancelled. Discoveries are
/// only reported while scanning. If the adapter stops reporting in the middle
/// of a scan, the scan fails instead of silently running into its timeout.
async fn forward_central_events<S, P, F, Fut>(
    cancel: CancellationToken,
    mut central_events: S,
    scanning: Arc<AtomicBool>,
    listening: Arc<AtomicBool>,
    connected: Arc<Mutex<Option<PeripheralId>>>,
    mut sink: EventSink<P>,
    lookup: F,
)
where
    S: Stream<Item = CentralEvent> + Unpin,
    F: Fn(PeripheralId) -> Fut,
    Fut: Future<Output = Option<TransportEvent<P>>>,
{
    'mainloop: loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                return;
            },
            event = central_events.next() => {
                let forwarded = match event {
                    None => break 'mainloop,
                    Some(CentralEvent::DeviceDiscovered(id)) | Some(CentralEvent::DeviceUpdated(id)) => {
                        if !scanning.load(Ordering::Acquire) {
                            continue;
                        }
                        lookup(id).await
                    },
                    Some(CentralEvent::DeviceDisconnected(id)) => {
                        let mut connected = lock(&connected);
                        if connected.as_ref() == Some(&id) {
                            *connected = None;
                            Some(TransportEvent::LinkLost)
                        } else {
                            None
                        }
                    },
                    Some(_) => None,
                };

                if let Some(event) = forwarded {
                    if sink.send(event).await.is_err() {
                        debug!("Session stopped listening to adapter events");
                        return;
                    }
                }
            },
        }
    }

    warn!("Adapter stopped reporting events");
    listening.store(false, Ordering::Release);

    if scanning.load(Ordering::Acquire) {
        let error = TransportError::Other("adapter stopped reporting events".to_string());
        let _ = sink.send(TransportEvent::ScanFailed(error)).await;
    }
}

fn central_events_task(
    cancel: CancellationToken,
    adapter: Adapter,
    central_events: Pin<Box<dyn Stream<Item = CentralEvent> + Send>>,
    scanning: Arc<AtomicBool>,
    listening: Arc<AtomicBool>,
    connected: Arc<Mutex<Option<PeripheralId>>>,
    sink: EventSink<Peripheral>,
) -> JoinHandle<()> {
    spawn(async move {
        let lookup = |id: PeripheralId| {
            let adapter = adapter.clone();
            async move { discovered_event(&adapter, &id).await }
        };

        forward_central_events(cancel, central_events, scanning, listening, connected, sink, lookup).await;
    })
}

fn read_notifications_task(
    cancel: CancellationToken,
    peripheral: &Peripheral,
    characteristic: Uuid,
    mut sink: EventSink<Peripheral>,
) -> JoinHandle<()> {
    let peripheral_clone = peripheral.clone();

    spawn(async move {
        let mut notification_stream = match peripheral_clone.notifications().await {
            Ok(stream) => stream,
            Err(err) => {
                warn!("Failed to open notification stream: {:?}", err);
                return;
            },
        };

        'mainloop: loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    break 'mainloop;
                },
                data = notification_stream.next() => match data {
                    None => break 'mainloop,
                    Some(data) => {
                        if data.uuid != characteristic {
                            continue;
                        }

                        let event = TransportEvent::Notification { characteristic: data.uuid, value: data.value };
                        if sink.send(event).await.is_err() {
                            break 'mainloop;
                        }
                    },
                },
            }
        }
    })
}

fn report_known_peripherals(adapters: Vec<Adapter>, mut sink: EventSink<Peripheral>) -> JoinHandle<()> {
    spawn(async move {
        for adapter in &adapters {
            let peripherals = match adapter.peripherals().await {
                Ok(v) => v,
                Err(err) => {
                    warn!("Failed to query BLE adapter for peripherals: {}", err);
                    continue;
                },
            };

            for peripheral in peripherals {
                if let Some(event) = discovered_event(adapter, &peripheral.id()).await {
                    if sink.send(event).await.is_err() {
                        return;
                    }
                }
            }
        }
    })
}

/// Start `count` adapters in order. When one fails, the ones already started
/// are stopped again before the error is returned.
async fn start_all<S, SF, T, TF>(count: usize, start: S, stop: T) -> Result<(), TransportError>
where
    S: Fn(usize) -> SF,
    SF: Future<Output = Result<(), TransportError>>,
    T: Fn(usize) -> TF,
    TF: Future<Output = Result<(), TransportError>>,
{
    for index in 0..count {
        if let Err(err) = start(index).await {
            for started in 0..index {
                if let Err(err) = stop(started).await {
                    debug!("Failed to stop scanning: {}", err);
                }
            }
            return Err(err);
        }
    }
    Ok(())
}

fn find_characteristic(peripheral: &Peripheral, channel: &CommandChannel) -> Result<Characteristic, TransportError> {
    peripheral
        .characteristics()
        .into_iter()
        .find(|characteristic| {
            characteristic.uuid == channel.characteristic && characteristic.service_uuid == channel.service
        })
        .ok_or_else(|| TransportError::Other(format!("characteristic {} is not available", channel.characteristic)))
}

/// Transport backed by the host's Bluetooth adapters through btleplug.
pub struct BtleTransport {
    adapters: Vec<Adapter>,
    sink: EventSink<Peripheral>,
    scanning: Arc<AtomicBool>,
    // cleared once any adapter stops reporting events
    listening: Arc<AtomicBool>,
    // link loss is only reported for this peripheral
    connected: Arc<Mutex<Option<PeripheralId>>>,
    notifications: Mutex<Option<CancellationToken>>,
    // this token is cancelled when the transport is dropped
    cancel: CancellationToken,
}

impl BtleTransport {
    pub async fn new(sink: EventSink<Peripheral>) -> Result<Self, TransportError> {
        let manager = Manager::new().await?;
        let adapters = manager.adapters().await?;

        if adapters.is_empty() {
            return Err(TransportError::Unavailable("no Bluetooth adapter found".to_string()));
        }

        let transport = BtleTransport {
            adapters,
            sink,
            scanning: Arc::new(AtomicBool::new(false)),
            listening: Arc::new(AtomicBool::new(true)),
            connected: Arc::new(Mutex::new(None)),
            notifications: Mutex::new(None),
            cancel: CancellationToken::new(),
        };

        for adapter in &transport.adapters {
            // without adapter events there are no scan results and no link loss
            let central_events = adapter.events().await?;

            central_events_task(
                transport.cancel.child_token(),
                adapter.clone(),
                central_events,
                transport.scanning.clone(),
                transport.listening.clone(),
                transport.connected.clone(),
                transport.sink.clone(),
            );
        }

        Ok(transport)
    }

    fn stop_notifications(&self) {
        if let Some(token) = lock(&self.notifications).take() {
            token.cancel();
        }
    }
}

impl Drop for BtleTransport {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[async_trait]
impl Transport for BtleTransport {
    type Peripheral = Peripheral;

    async fn start_scan(&self) -> Result<(), TransportError> {
        if !self.listening.load(Ordering::Acquire) {
            return Err(TransportError::Unavailable("adapter stopped reporting events".to_string()));
        }

        start_all(
            self.adapters.len(),
            |index| {
                let adapter = self.adapters[index].clone();
                async move {
                    info!("Scanning using adapter {}...", adapter.adapter_info().await.unwrap_or("UNKNOWN".to_string()));
                    adapter.start_scan(ScanFilter::default()).await.map_err(TransportError::from)
                }
            },
            |index| {
                let adapter = self.adapters[index].clone();
                async move { adapter.stop_scan().await.map_err(TransportError::from) }
            },
        ).await?;
        self.scanning.store(true, Ordering::Release);

        // Peripherals cached by the OS may not be announced again. Reported
        // from a task, the session is not reading events while it waits here.
        report_known_peripherals(self.adapters.clone(), self.sink.clone());

        Ok(())
    }

    async fn stop_scan(&self) -> Result<(), TransportError> {
        self.scanning.store(false, Ordering::Release);

        for adapter in &self.adapters {
            adapter.stop_scan().await?;
        }
        Ok(())
    }

    async fn connect(&self, peripheral: &Peripheral) -> Result<(), TransportError> {
        peripheral.connect().await?;
        *lock(&self.connected) = Some(peripheral.id());
        Ok(())
    }

    async fn discover_services(&self, peripheral: &Peripheral) -> Result<Vec<ServiceInfo>, TransportError> {
        peripheral.discover_services().await?;

        let services = peripheral
            .services()
            .into_iter()
            .map(|service| ServiceInfo {
                uuid: service.uuid,
                characteristics: service.characteristics.iter().map(|characteristic| characteristic.uuid).collect(),
            })
            .collect();

        Ok(services)
    }

    async fn subscribe(&self, peripheral: &Peripheral, channel: &CommandChannel) -> Result<(), TransportError> {
        let characteristic = find_characteristic(peripheral, channel)?;
        peripheral.subscribe(&characteristic).await?;

        self.stop_notifications();
        let token = self.cancel.child_token();
        read_notifications_task(token.clone(), peripheral, characteristic.uuid, self.sink.clone());
        *lock(&self.notifications) = Some(token);
        Ok(())
    }

    async fn write(&self, peripheral: &Peripheral, channel: &CommandChannel, value: &[u8]) -> Result<(), TransportError> {
        let characteristic = find_characteristic(peripheral, channel)?;
        peripheral.write(&characteristic, value, WriteType::WithResponse).await?;
        Ok(())
    }

    async fn disconnect(&self, peripheral: &Peripheral) -> Result<(), TransportError> {
        // an explicit disconnect is not a lost link
        lock(&self.connected).take();
        self.stop_notifications();

        let connected = match peripheral.is_connected().await {
            Ok(connected) => connected,
            Err(err) => {
                debug!("Could not query connection state, disconnecting anyway: {}", err);
                true
            },
        };

        if connected {
            peripheral.disconnect().await?;
        }
        Ok(())
    }
}
