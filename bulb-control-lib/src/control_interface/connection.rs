//! Control connection lifecycle, one TCP socket per device.
//!
//! ```text
//! Disconnected --connect--> Connecting --established--> Connected
//!      ^                        |                           |
//!      +-------- close ---------+---------- close ----------+
//! ```
//!
//! Each connection attempt gets a fresh generation number. A close that
//! carries an older generation than the table entry is ignored, so a read
//! task that outlives its connection cannot tear down a newer one.

use std::collections::HashMap;
use std::sync::Arc;

use log::{debug, warn};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;

use crate::device::{ConnectionState, Endpoint};
use crate::error::ControlError;

use super::Shared;

pub(crate) type SharedWriter = Arc<AsyncMutex<OwnedWriteHalf>>;

#[derive(Debug)]
struct Connection {
    state: ConnectionState,
    generation: u64,
    endpoint: Endpoint,
    writer: Option<SharedWriter>,
    task: Option<JoinHandle<()>>,
}

/// Connection state of every device that was ever connected.
#[derive(Debug, Default)]
pub(crate) struct ConnectionTable {
    entries: HashMap<String, Connection>,
    next_generation: u64,
}

impl ConnectionTable {
    pub fn state(&self, id: &str) -> ConnectionState {
        self.entries
            .get(id)
            .map(|connection| connection.state)
            .unwrap_or_default()
    }

    pub fn endpoint(&self, id: &str) -> Option<&Endpoint> {
        self.entries
            .get(id)
            .filter(|connection| connection.state != ConnectionState::Disconnected)
            .map(|connection| &connection.endpoint)
    }

    /// Moves a disconnected device to `Connecting`. Returns the generation of
    /// the new attempt, or `None` when the device is not disconnected.
    pub fn begin(&mut self, id: &str, endpoint: Endpoint) -> Option<u64> {
        if self.state(id) != ConnectionState::Disconnected {
            return None;
        }
        self.next_generation += 1;
        let generation = self.next_generation;
        self.entries.insert(
            id.to_string(),
            Connection {
                state: ConnectionState::Connecting,
                generation,
                endpoint,
                writer: None,
                task: None,
            },
        );
        Some(generation)
    }

    pub fn attach_task(&mut self, id: &str, generation: u64, task: JoinHandle<()>) {
        match self.current_mut(id, generation) {
            Some(connection) => connection.task = Some(task),
            // The attempt already ended; the task is finishing on its own.
            None => drop(task),
        }
    }

    /// Moves a `Connecting` attempt to `Connected`. Returns `false` when the
    /// attempt was closed in the meantime.
    pub fn establish(&mut self, id: &str, generation: u64, writer: OwnedWriteHalf) -> bool {
        match self.current_mut(id, generation) {
            Some(connection) if connection.state == ConnectionState::Connecting => {
                connection.state = ConnectionState::Connected;
                connection.writer = Some(Arc::new(AsyncMutex::new(writer)));
                true
            }
            _ => false,
        }
    }

    /// Writer of a connected device, together with its generation.
    pub fn writer(&self, id: &str) -> Option<(SharedWriter, u64)> {
        self.entries
            .get(id)
            .filter(|connection| connection.state == ConnectionState::Connected)
            .and_then(|connection| {
                connection
                    .writer
                    .as_ref()
                    .map(|writer| (Arc::clone(writer), connection.generation))
            })
    }

    /// Moves a device to `Disconnected` and releases its socket.
    ///
    /// With a generation, only that attempt is closed. Returns the
    /// connection task so the caller can abort it, or `None` when there was
    /// nothing to close.
    pub fn close(&mut self, id: &str, generation: Option<u64>) -> Option<Option<JoinHandle<()>>> {
        let connection = self.entries.get_mut(id)?;
        if connection.state == ConnectionState::Disconnected {
            return None;
        }
        if generation.is_some_and(|g| g != connection.generation) {
            return None;
        }
        connection.state = ConnectionState::Disconnected;
        connection.writer = None;
        Some(connection.task.take())
    }

    fn current_mut(&mut self, id: &str, generation: u64) -> Option<&mut Connection> {
        self.entries.get_mut(id).filter(|connection| {
            connection.generation == generation && connection.state != ConnectionState::Disconnected
        })
    }
}

/// Opens the socket, reports it, then watches it until it closes.
pub(crate) async fn run_connection(
    shared: Arc<Shared>,
    id: String,
    endpoint: Endpoint,
    generation: u64,
) {
    let stream = match TcpStream::connect((endpoint.host.as_str(), endpoint.port)).await {
        Ok(stream) => stream,
        Err(source) => {
            let error = ControlError::Transport {
                device_id: id.clone(),
                source,
            };
            warn!("Failed to connect to {}: {}", endpoint, error);
            shared.close_connection(&id, Some(generation), false);
            return;
        }
    };
    if let Err(e) = stream.set_nodelay(true) {
        debug!("Could not disable Nagle for {}: {}", id, e);
    }

    let (reader, writer) = stream.into_split();
    if !shared.connection_established(&id, generation, writer) {
        debug!("Connection to {} closed before it was established", id);
        return;
    }

    read_until_closed(&id, reader).await;
    shared.close_connection(&id, Some(generation), false);
}

/// Drains whatever the device sends back. Responses and property
/// notifications are logged only; commands are not correlated with them.
async fn read_until_closed(id: &str, reader: OwnedReadHalf) {
    let mut lines = BufReader::new(reader).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => debug!("{} <- {}", id, line.trim_end()),
            Ok(None) => {
                debug!("Device {} closed the connection", id);
                break;
            }
            Err(source) => {
                let error = ControlError::Transport {
                    device_id: id.to_string(),
                    source,
                };
                warn!("{}", error);
                break;
            }
        }
    }
}
