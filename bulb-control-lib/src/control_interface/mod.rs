use std::net::SocketAddr;
use std::ops::ControlFlow;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError, Weak};
use std::time::Duration;

use log::{debug, info, trace, warn};
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::task::JoinHandle;

use crate::device::registry::{DeviceRegistry, Upsert};
use crate::device::{ConnectionState, Device, DeviceProperties, Power};
use crate::error::{ControlError, Result};
use crate::event::{Event, EventBus, EventReceiver};
use crate::led::rgb::RGB;
use crate::util::discovery::DiscoveryListener;
use crate::util::headers::{self, Headers};
use crate::util::options::{DiscoveryOptions, ReconnectPolicy};

use self::command::Command;
use self::connection::{run_connection, ConnectionTable};

pub mod command;
mod connection;

/// What happened to a control command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandOutcome {
    /// The request was accepted by the local socket.
    Written,
    /// The device was not connected. Nothing was written and
    /// [`Event::DeviceDisconnected`] was emitted.
    Rejected,
    /// Writing failed. The connection has been closed and
    /// [`Event::DeviceDisconnected`] was emitted.
    Failed,
}

/// Registry and connection table. Every mutation, and the event describing
/// it, happens while this is locked.
#[derive(Debug, Default)]
pub(crate) struct State {
    registry: DeviceRegistry,
    connections: ConnectionTable,
}

impl State {
    fn snapshot(&self, id: &str) -> Option<Device> {
        self.registry
            .get(id)
            .cloned()
            .map(|device| device.with_connection_state(self.connections.state(id)))
    }
}

#[derive(Debug)]
pub(crate) struct Shared {
    options: DiscoveryOptions,
    state: Mutex<State>,
    events: EventBus,
    discovery: OnceLock<Arc<DiscoveryListener>>,
    receiver: OnceLock<JoinHandle<()>>,
}

impl Drop for Shared {
    // The receive loop owns the socket; stop it so the port is released.
    fn drop(&mut self) {
        if let Some(receiver) = self.receiver.get() {
            receiver.abort();
        }
    }
}

/// Discovers bulbs on the local network and controls them.
///
/// Cloning is cheap; every clone drives the same registry and connections.
/// All operations report their effects through the [`EventReceiver`]
/// returned by [`ControlInterface::new`].
///
/// ```no_run
/// use bulb_control_lib::control_interface::ControlInterface;
/// use bulb_control_lib::event::Event;
/// use bulb_control_lib::util::options::DiscoveryOptions;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let (control, mut events) = ControlInterface::new(DiscoveryOptions::default());
///     control.start().await?;
///     control.discover().await?;
///
///     while let Some(event) = events.recv().await {
///         match event {
///             Event::DeviceAdded(device) => control.connect(&device).await,
///             Event::DeviceConnected(device) => {
///                 control.set_power(&device, true, None).await;
///             }
///             _ => {}
///         }
///     }
///     Ok(())
/// }
/// ```
#[derive(Debug, Clone)]
pub struct ControlInterface {
    shared: Arc<Shared>,
}

impl ControlInterface {
    pub fn new(options: DiscoveryOptions) -> (Self, EventReceiver) {
        let (events, receiver) = EventBus::new();
        let shared = Shared {
            options,
            state: Mutex::new(State::default()),
            events,
            discovery: OnceLock::new(),
            receiver: OnceLock::new(),
        };
        (
            ControlInterface {
                shared: Arc::new(shared),
            },
            receiver,
        )
    }

    pub fn options(&self) -> &DiscoveryOptions {
        &self.shared.options
    }

    /// Binds the discovery socket and starts listening.
    ///
    /// Emits [`Event::Ready`] with the bound port and returns it. A bind
    /// failure is fatal. Calling this again after a successful start only
    /// returns the port.
    pub async fn start(&self) -> Result<u16> {
        if let Some(listener) = self.shared.discovery.get() {
            warn!("Discovery already started on port {}", listener.port());
            return Ok(listener.port());
        }

        let listener = Arc::new(DiscoveryListener::bind(&self.shared.options).await?);
        let port = listener.port();
        if self.shared.discovery.set(Arc::clone(&listener)).is_err() {
            // Lost a race against a concurrent start; the other socket wins.
            return self.shared.discovery.get().map(|l| l.port()).ok_or(ControlError::NotStarted);
        }

        info!("Listening for devices on port {}", port);
        self.shared.events.emit(Event::Ready { port });

        let weak: Weak<Shared> = Arc::downgrade(&self.shared);
        let receiver = listener.spawn(move |headers, source| match weak.upgrade() {
            Some(shared) => {
                shared.handle_message(headers, source);
                ControlFlow::Continue(())
            }
            None => ControlFlow::Break(()),
        });
        if let Err(receiver) = self.shared.receiver.set(receiver) {
            receiver.abort();
        }
        Ok(port)
    }

    /// Broadcasts one search request. Replies arrive as
    /// [`Event::DeviceAdded`] and [`Event::DeviceUpdated`]; call this again
    /// to widen the capture window.
    pub async fn discover(&self) -> Result<()> {
        let listener = self.shared.discovery.get().ok_or(ControlError::NotStarted)?;
        listener.discover().await
    }

    /// Opens the control connection to `device` unless one is already open
    /// or opening.
    ///
    /// Returns without waiting. Success is reported as
    /// [`Event::DeviceConnected`]; any failure, now or later, as
    /// [`Event::DeviceDisconnected`].
    pub async fn connect(&self, device: &Device) {
        self.shared.connect(device.id());
    }

    /// Closes the control connection to `device`, if any.
    pub async fn disconnect(&self, device: &Device) {
        self.shared.close_connection(device.id(), None, true);
    }

    /// Turns the device on or off over `duration` (300 ms when `None`).
    pub async fn set_power(
        &self,
        device: &Device,
        on: bool,
        duration: Option<Duration>,
    ) -> CommandOutcome {
        let power = Power::from(on);
        let command = Command::SetPower {
            power,
            duration: self.duration_or_default(duration),
        };
        self.shared
            .send_command(device, command, move |properties| {
                properties.power = Some(power)
            })
            .await
    }

    /// Sets the brightness in percent, clamped to 100.
    ///
    /// A device that is off is turned on first, instantly, so two requests
    /// are written in that order.
    pub async fn set_brightness(
        &self,
        device: &Device,
        percent: u8,
        duration: Option<Duration>,
    ) -> CommandOutcome {
        let percent = percent.min(100);
        let id = device.id();

        let is_off = {
            let state = self.shared.lock();
            if state.connections.state(id) != ConnectionState::Connected {
                drop(state);
                return self.shared.reject(device);
            }
            state
                .registry
                .get(id)
                .map(|stored| stored.properties().is_off())
                .unwrap_or(false)
        };

        if is_off {
            let power_on = Command::SetPower {
                power: Power::On,
                duration: Duration::ZERO,
            };
            let outcome = self
                .shared
                .send_command(device, power_on, |properties| {
                    properties.brightness = Some(0);
                    properties.power = Some(Power::On);
                })
                .await;
            if outcome != CommandOutcome::Written {
                return outcome;
            }
        }

        let command = Command::SetBrightness {
            percent,
            duration: self.duration_or_default(duration),
        };
        self.shared
            .send_command(device, command, move |properties| {
                properties.brightness = Some(percent)
            })
            .await
    }

    /// Sets the color, sent as a packed `red * 65536 + green * 256 + blue`.
    pub async fn set_color(
        &self,
        device: &Device,
        rgb: RGB,
        duration: Option<Duration>,
    ) -> CommandOutcome {
        let command = Command::SetColor {
            rgb,
            duration: self.duration_or_default(duration),
        };
        self.shared
            .send_command(device, command, move |properties| {
                properties.rgb = Some(rgb)
            })
            .await
    }

    /// Snapshots of all known devices, in the order they were first seen.
    pub fn list(&self) -> Vec<Device> {
        let state = self.shared.lock();
        state
            .registry
            .list()
            .filter_map(|device| state.snapshot(device.id()))
            .collect()
    }

    pub fn get(&self, id: &str) -> Option<Device> {
        self.shared.lock().snapshot(id)
    }

    fn duration_or_default(&self, duration: Option<Duration>) -> Duration {
        duration.unwrap_or_else(|| self.shared.options.default_duration())
    }
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Records a sighting from a discovery reply or advertisement.
    fn handle_message(self: &Arc<Self>, headers: Headers, source: SocketAddr) {
        let id = match headers.get(headers::ID).filter(|id| !id.is_empty()) {
            Some(id) => id.to_string(),
            None => {
                let error = ControlError::MalformedMessage(format!("no id from {}", source));
                warn!("Dropping message: {}", error);
                return;
            }
        };
        let properties = DeviceProperties::from_headers(&headers);

        let stale_connection = {
            let mut state = self.lock();
            match state.registry.upsert(&id, properties) {
                Upsert::Added => {
                    info!("Found device {} from {}", id, source);
                    if let Some(device) = state.snapshot(&id) {
                        self.events.emit(Event::DeviceAdded(device));
                    }
                    false
                }
                Upsert::Updated => {
                    debug!("Device {} updated", id);
                    let snapshot = state.snapshot(&id);
                    let stale = match (&snapshot, state.connections.endpoint(&id)) {
                        (Some(device), Some(connected)) => {
                            matches!(device.endpoint(), Ok(moved) if &moved != connected)
                        }
                        _ => false,
                    };
                    if let Some(device) = snapshot {
                        self.events.emit(Event::DeviceUpdated(device));
                    }
                    stale
                }
                Upsert::Unchanged => {
                    trace!("Device {} unchanged", id);
                    false
                }
            }
        };

        if stale_connection {
            match self.options.reconnect_policy {
                ReconnectPolicy::Keep => {
                    info!("Device {} moved; keeping the open connection", id)
                }
                ReconnectPolicy::Reconnect => {
                    info!("Device {} moved; reconnecting", id);
                    self.close_connection(&id, None, true);
                    self.connect(&id);
                }
            }
        }
    }

    fn connect(self: &Arc<Self>, id: &str) {
        let mut state = self.lock();
        let device = match state.snapshot(id) {
            Some(device) => device,
            None => {
                warn!("Cannot connect to unknown device {}", id);
                return;
            }
        };
        if device.connection_state() != ConnectionState::Disconnected {
            debug!("Device {} is already {:?}", id, device.connection_state());
            return;
        }

        let endpoint = match device.endpoint() {
            Ok(endpoint) => endpoint,
            Err(e) => {
                warn!("Cannot connect to {}: {}", id, e);
                self.events.emit(Event::DeviceDisconnected(device));
                return;
            }
        };

        if let Some(generation) = state.connections.begin(id, endpoint.clone()) {
            debug!("Connecting to {} at {}", id, endpoint);
            let task = tokio::spawn(run_connection(
                Arc::clone(self),
                id.to_string(),
                endpoint,
                generation,
            ));
            state.connections.attach_task(id, generation, task);
        }
    }

    pub(crate) fn connection_established(
        &self,
        id: &str,
        generation: u64,
        writer: OwnedWriteHalf,
    ) -> bool {
        let mut state = self.lock();
        if !state.connections.establish(id, generation, writer) {
            return false;
        }
        info!("Connected to {}", id);
        if let Some(device) = state.snapshot(id) {
            self.events.emit(Event::DeviceConnected(device));
        }
        true
    }

    /// Closes the connection and emits [`Event::DeviceDisconnected`] once.
    /// `abort` stops the connection task; the task itself passes `false`.
    pub(crate) fn close_connection(&self, id: &str, generation: Option<u64>, abort: bool) -> bool {
        let mut state = self.lock();
        let task = match state.connections.close(id, generation) {
            Some(task) => task,
            None => return false,
        };
        if abort {
            if let Some(task) = task {
                task.abort();
            }
        }
        info!("Disconnected from {}", id);
        if let Some(device) = state.snapshot(id) {
            self.events.emit(Event::DeviceDisconnected(device));
        }
        true
    }

    fn reject(&self, device: &Device) -> CommandOutcome {
        let error = ControlError::NotConnected(device.id().to_string());
        warn!("Rejecting command: {}", error);
        let snapshot = self.lock().snapshot(device.id()).unwrap_or_else(|| {
            device
                .clone()
                .with_connection_state(ConnectionState::Disconnected)
        });
        self.events.emit(Event::DeviceDisconnected(snapshot));
        CommandOutcome::Rejected
    }

    /// Writes one request. The optimistic property update is applied before
    /// the write and stays in place even if the write fails.
    async fn send_command<F>(&self, device: &Device, command: Command, optimistic: F) -> CommandOutcome
    where
        F: FnOnce(&mut DeviceProperties),
    {
        let id = device.id();
        let line = match command.encode() {
            Ok(line) => line,
            Err(e) => {
                warn!("Dropping {} for {}: {}", command.method(), id, e);
                return CommandOutcome::Failed;
            }
        };

        let (writer, generation) = {
            let mut state = self.lock();
            match state.connections.writer(id) {
                Some(writer) => {
                    state.registry.update_properties(id, optimistic);
                    writer
                }
                None => {
                    drop(state);
                    return self.reject(device);
                }
            }
        };

        let written = {
            let mut writer = writer.lock().await;
            writer.write_all(&line).await
        };

        match written {
            Ok(()) => {
                debug!("{} -> {}", id, String::from_utf8_lossy(&line).trim_end());
                let state = self.lock();
                if let Some(device) = state.snapshot(id) {
                    self.events.emit(Event::CommandCompleted {
                        kind: command.kind(),
                        device,
                    });
                }
                CommandOutcome::Written
            }
            Err(source) => {
                let error = ControlError::Transport {
                    device_id: id.to_string(),
                    source,
                };
                warn!("Failed to send {}: {}", command.method(), error);
                self.close_connection(id, Some(generation), true);
                CommandOutcome::Failed
            }
        }
    }
}
