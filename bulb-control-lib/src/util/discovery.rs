use std::net::{IpAddr, Ipv4Addr, SocketAddr, SocketAddrV4};
use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, trace, warn};
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;

use crate::error::{ControlError, Result};
use crate::util::headers::Headers;
use crate::util::options::DiscoveryOptions;

const RECEIVE_BUFFER_SIZE: usize = 4096;
const RECEIVE_ERROR_BACKOFF: Duration = Duration::from_millis(100);

/// The UDP side of device discovery.
///
/// One socket is bound to the configured port. It sends search requests to
/// the multicast group and receives both the replies and the unsolicited
/// advertisements bulbs send when their state changes.
#[derive(Debug)]
pub struct DiscoveryListener {
    socket: Arc<UdpSocket>,
    port: u16,
    search_target: SocketAddr,
    search_message: Vec<u8>,
    local_address: Option<IpAddr>,
}

impl DiscoveryListener {
    /// Binds the discovery socket. Failure is fatal and not retried.
    pub async fn bind(options: &DiscoveryOptions) -> Result<Self> {
        let bind_error = |source| ControlError::Bind {
            port: options.port,
            source,
        };

        let socket = UdpSocket::bind(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, options.port))
            .await
            .map_err(bind_error)?;
        socket.set_broadcast(true).map_err(bind_error)?;

        if options.join_multicast {
            if let Err(e) = socket.join_multicast_v4(options.multicast_address, Ipv4Addr::UNSPECIFIED)
            {
                warn!(
                    "Could not join multicast group {}, advertisements will be missed: {}",
                    options.multicast_address, e
                );
            }
        }

        let port = socket.local_addr().map_err(bind_error)?.port();
        let local_address = options
            .local_address
            .or_else(|| detect_local_ip(options.multicast_address, options.port));
        debug!("Local address for loop-back suppression: {:?}", local_address);

        Ok(DiscoveryListener {
            socket: Arc::new(socket),
            port,
            search_target: SocketAddr::from((options.multicast_address, options.port)),
            search_message: options.discovery_message.as_bytes().to_vec(),
            local_address,
        })
    }

    /// The port the socket is actually bound to.
    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn local_address(&self) -> Option<IpAddr> {
        self.local_address
    }

    /// Sends one search request. Replies arrive on the receive loop; nothing
    /// is awaited here.
    pub async fn discover(&self) -> Result<()> {
        let sent = self
            .socket
            .send_to(&self.search_message, self.search_target)
            .await?;
        debug!("Sent {} byte search request to {}", sent, self.search_target);
        Ok(())
    }

    /// Checks one datagram. Returns `None` when it came from this host,
    /// otherwise the parsed headers or the reason they could not be parsed.
    pub fn accept(&self, data: &[u8], source: SocketAddr) -> Option<Result<Headers>> {
        if self.local_address == Some(source.ip()) {
            trace!("Ignoring {} bytes from ourselves ({})", data.len(), source);
            return None;
        }
        Some(Headers::parse(data))
    }

    /// Runs the receive loop on its own task. `on_message` sees every parsed
    /// datagram that did not originate here; the loop stops when it returns
    /// [`ControlFlow::Break`].
    pub fn spawn<F>(self: &Arc<Self>, mut on_message: F) -> JoinHandle<()>
    where
        F: FnMut(Headers, SocketAddr) -> ControlFlow<()> + Send + 'static,
    {
        let listener = Arc::clone(self);
        tokio::spawn(async move {
            let mut buffer = [0u8; RECEIVE_BUFFER_SIZE];
            loop {
                let (size, source) = match listener.socket.recv_from(&mut buffer).await {
                    Ok(received) => received,
                    Err(e) => {
                        warn!("Failed to receive discovery message: {}", e);
                        tokio::time::sleep(RECEIVE_ERROR_BACKOFF).await;
                        continue;
                    }
                };

                if size == RECEIVE_BUFFER_SIZE {
                    let error = ControlError::MalformedMessage(format!(
                        "datagram of {} bytes or more was truncated",
                        RECEIVE_BUFFER_SIZE
                    ));
                    warn!("Dropping message from {}: {}", source, error);
                    continue;
                }

                match listener.accept(&buffer[..size], source) {
                    None => {}
                    Some(Ok(headers)) => {
                        if on_message(headers, source).is_break() {
                            info!("Discovery receive loop on port {} stopped", listener.port);
                            break;
                        }
                    }
                    Some(Err(e)) => warn!("Dropping message from {}: {}", source, e),
                }
            }
        })
    }
}

/// Finds the address this host uses to reach `target` by connecting a UDP
/// socket. No packet is sent.
pub fn detect_local_ip(target: Ipv4Addr, port: u16) -> Option<IpAddr> {
    let socket = std::net::UdpSocket::bind("0.0.0.0:0").ok()?;
    socket.connect((target, port)).ok()?;
    let local_addr = socket.local_addr().ok()?;
    Some(local_addr.ip())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options(local: &str) -> DiscoveryOptions {
        DiscoveryOptions {
            port: 0,
            join_multicast: false,
            local_address: Some(local.parse().unwrap()),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_bind_reports_ephemeral_port() {
        let listener = DiscoveryListener::bind(&options("192.0.2.1")).await.unwrap();
        assert_ne!(listener.port(), 0);
        assert_eq!(listener.local_address(), Some("192.0.2.1".parse().unwrap()));
    }

    #[tokio::test]
    async fn test_bind_fails_on_taken_port() {
        let first = DiscoveryListener::bind(&options("192.0.2.1")).await.unwrap();
        let mut second = options("192.0.2.1");
        second.port = first.port();

        match DiscoveryListener::bind(&second).await {
            Err(ControlError::Bind { port, .. }) => assert_eq!(port, first.port()),
            other => panic!("expected bind error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_accept_drops_own_packets() {
        let listener = DiscoveryListener::bind(&options("10.0.0.2")).await.unwrap();
        let payload = b"HTTP/1.1 200 OK\r\nid: A\r\n";

        assert!(listener
            .accept(payload, "10.0.0.2:1982".parse().unwrap())
            .is_none());

        let headers = listener
            .accept(payload, "10.0.0.5:1982".parse().unwrap())
            .unwrap()
            .unwrap();
        assert_eq!(headers.get("id"), Some("A"));
    }

    #[tokio::test]
    async fn test_accept_reports_malformed() {
        let listener = DiscoveryListener::bind(&options("10.0.0.2")).await.unwrap();
        let result = listener.accept(b"garbage", "10.0.0.5:1982".parse().unwrap());
        assert!(matches!(result, Some(Err(ControlError::MalformedMessage(_)))));
    }

    #[tokio::test]
    async fn test_receive_loop_delivers_and_stops() {
        let listener = Arc::new(DiscoveryListener::bind(&options("192.0.2.1")).await.unwrap());
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let handle = listener.spawn(move |headers, _source| {
            let _ = tx.send(headers.get("id").map(str::to_string));
            ControlFlow::Break(())
        });

        let bulb = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        bulb.send_to(b"not headers", ("127.0.0.1", listener.port()))
            .await
            .unwrap();
        bulb.send_to(b"NOTIFY * HTTP/1.1\r\nid: B\r\n", ("127.0.0.1", listener.port()))
            .await
            .unwrap();

        assert_eq!(rx.recv().await, Some(Some("B".to_string())));
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_receive_loop_drops_oversized_datagrams() {
        let listener = Arc::new(DiscoveryListener::bind(&options("192.0.2.1")).await.unwrap());
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let handle = listener.spawn(move |headers, _source| {
            let _ = tx.send(headers.get("id").map(str::to_string));
            ControlFlow::Continue(())
        });

        let oversized = format!(
            "NOTIFY * HTTP/1.1\r\nid: big\r\nx-padding: {}\r\n",
            "a".repeat(RECEIVE_BUFFER_SIZE)
        );
        let bulb = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        bulb.send_to(oversized.as_bytes(), ("127.0.0.1", listener.port()))
            .await
            .unwrap();
        bulb.send_to(b"NOTIFY * HTTP/1.1\r\nid: small\r\n", ("127.0.0.1", listener.port()))
            .await
            .unwrap();

        assert_eq!(rx.recv().await, Some(Some("small".to_string())));
        handle.abort();
    }
}
