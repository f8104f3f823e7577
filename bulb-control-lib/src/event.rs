use std::fmt::{Display, Formatter};

use log::trace;
use serde::Serialize;
use tokio::sync::mpsc;

use crate::device::Device;

/// The control operation a [`Event::CommandCompleted`] reports on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum CommandKind {
    Power,
    Brightness,
    Color,
}

/// Notifications delivered to the caller of a
/// [`ControlInterface`](crate::control_interface::ControlInterface).
///
/// Events for a single device arrive in the order the underlying changes
/// happened.
#[derive(Debug, Clone, Serialize)]
pub enum Event {
    /// The discovery socket is bound and listening.
    Ready { port: u16 },
    DeviceAdded(Device),
    DeviceUpdated(Device),
    DeviceConnected(Device),
    /// The control connection closed, could not be opened, or a command was
    /// issued while the device was not connected.
    DeviceDisconnected(Device),
    /// A command was written to the device socket. This does not mean the
    /// device executed it.
    CommandCompleted { kind: CommandKind, device: Device },
}

impl Event {
    /// Short lower-case name, e.g. `deviceadded` or `powerupdated`.
    pub fn name(&self) -> &'static str {
        match self {
            Event::Ready { .. } => "ready",
            Event::DeviceAdded(_) => "deviceadded",
            Event::DeviceUpdated(_) => "deviceupdated",
            Event::DeviceConnected(_) => "deviceconnected",
            Event::DeviceDisconnected(_) => "devicedisconnected",
            Event::CommandCompleted { kind, .. } => match kind {
                CommandKind::Power => "powerupdated",
                CommandKind::Brightness => "brightnessupdated",
                CommandKind::Color => "colorupdated",
            },
        }
    }

    pub fn device(&self) -> Option<&Device> {
        match self {
            Event::Ready { .. } => None,
            Event::DeviceAdded(device)
            | Event::DeviceUpdated(device)
            | Event::DeviceConnected(device)
            | Event::DeviceDisconnected(device)
            | Event::CommandCompleted { device, .. } => Some(device),
        }
    }
}

impl Display for Event {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Event::Ready { port } => write!(f, "ready on port {}", port),
            _ => match self.device() {
                Some(device) => write!(f, "{} {}", self.name(), device),
                None => f.write_str(self.name()),
            },
        }
    }
}

pub type EventReceiver = mpsc::UnboundedReceiver<Event>;

/// Sending side of the single event channel.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: mpsc::UnboundedSender<Event>,
}

impl EventBus {
    pub fn new() -> (Self, EventReceiver) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (EventBus { sender }, receiver)
    }

    /// Publishes an event. Events are dropped once the receiver is gone.
    pub fn emit(&self, event: Event) {
        trace!("Emitting {}", event);
        if self.sender.send(event).is_err() {
            trace!("Event receiver dropped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::DeviceProperties;

    fn device() -> Device {
        Device::new("A".to_string(), DeviceProperties::default())
    }

    #[test]
    fn test_event_names() {
        assert_eq!(Event::Ready { port: 1982 }.name(), "ready");
        assert_eq!(Event::DeviceAdded(device()).name(), "deviceadded");
        assert_eq!(Event::DeviceDisconnected(device()).name(), "devicedisconnected");
        assert_eq!(
            Event::CommandCompleted {
                kind: CommandKind::Color,
                device: device()
            }
            .name(),
            "colorupdated"
        );
    }

    #[tokio::test]
    async fn test_bus_preserves_order() {
        let (bus, mut receiver) = EventBus::new();
        bus.emit(Event::Ready { port: 1 });
        bus.emit(Event::DeviceAdded(device()));
        bus.emit(Event::DeviceConnected(device()));

        assert_eq!(receiver.recv().await.unwrap().name(), "ready");
        assert_eq!(receiver.recv().await.unwrap().name(), "deviceadded");
        assert_eq!(receiver.recv().await.unwrap().name(), "deviceconnected");
    }

    #[test]
    fn test_emit_after_receiver_dropped() {
        let (bus, receiver) = EventBus::new();
        drop(receiver);
        bus.emit(Event::Ready { port: 1 });
    }
}
