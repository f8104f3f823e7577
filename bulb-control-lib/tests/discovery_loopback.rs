//! Drives the public API over loopback sockets: a UDP socket plays the bulb's
//! discovery side and a TCP listener its control port.

use std::net::Ipv4Addr;
use std::time::Duration;

use bulb_control_lib::control_interface::{CommandOutcome, ControlInterface};
use bulb_control_lib::device::Power;
use bulb_control_lib::event::{Event, EventReceiver};
use bulb_control_lib::util::options::DiscoveryOptions;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::{TcpListener, UdpSocket};
use tokio::time::timeout;

const WAIT: Duration = Duration::from_secs(5);
const QUIET: Duration = Duration::from_millis(300);

fn free_udp_port() -> u16 {
    let socket = std::net::UdpSocket::bind("0.0.0.0:0").unwrap();
    socket.local_addr().unwrap().port()
}

fn loopback_options(local_address: &str) -> DiscoveryOptions {
    let _ = env_logger::builder().is_test(true).try_init();
    DiscoveryOptions {
        port: free_udp_port(),
        multicast_address: Ipv4Addr::LOCALHOST,
        join_multicast: false,
        local_address: Some(local_address.parse().unwrap()),
        ..Default::default()
    }
}

async fn next_event(events: &mut EventReceiver) -> Event {
    timeout(WAIT, events.recv())
        .await
        .expect("timed out waiting for an event")
        .expect("event channel closed")
}

async fn assert_quiet(events: &mut EventReceiver) {
    if let Ok(Some(event)) = timeout(QUIET, events.recv()).await {
        panic!("unexpected event {}", event);
    }
}

async fn started(options: DiscoveryOptions) -> (ControlInterface, EventReceiver, u16) {
    let (control, mut events) = ControlInterface::new(options);
    let port = control.start().await.unwrap();
    match next_event(&mut events).await {
        Event::Ready { port: ready } => assert_eq!(ready, port),
        other => panic!("expected ready, got {}", other),
    }
    (control, events, port)
}

fn reply(id: &str, control_port: u16, power: &str) -> String {
    format!(
        "HTTP/1.1 200 OK\r\n\
         Cache-Control: max-age=3600\r\n\
         Location: yeelight://127.0.0.1:{}\r\n\
         Server: POSIX UPnP/1.0 YGLC/1\r\n\
         id: {}\r\n\
         model: color\r\n\
         power: {}\r\n\
         bright: 100\r\n\
         rgb: 16711680\r\n\r\n",
        control_port, id, power
    )
}

#[tokio::test]
async fn own_packets_never_reach_the_registry() {
    let (control, mut events, port) = started(loopback_options("127.0.0.1")).await;

    // Our search request loops straight back to us.
    control.discover().await.unwrap();

    // So does anything else sent from this address.
    let bulb = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    bulb.send_to(reply("A", 55443, "on").as_bytes(), ("127.0.0.1", port))
        .await
        .unwrap();

    assert_quiet(&mut events).await;
    assert!(control.list().is_empty());
}

#[tokio::test]
async fn discover_sends_the_configured_message() {
    let mut options = loopback_options("192.0.2.1");
    options.discovery_message =
        "M-SEARCH * HTTP/1.1\r\nid: echo\r\nLocation: yeelight://127.0.0.1:1\r\n".to_string();
    let (control, mut events, _port) = started(options).await;

    control.discover().await.unwrap();

    match next_event(&mut events).await {
        Event::DeviceAdded(device) => {
            assert_eq!(device.id(), "echo");
            assert_eq!(device.endpoint().unwrap().port, 1);
        }
        other => panic!("expected deviceadded, got {}", other),
    }
}

#[tokio::test]
async fn discovered_bulb_can_be_controlled() {
    let (control, mut events, port) = started(loopback_options("192.0.2.1")).await;
    let control_port = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let control_port_number = control_port.local_addr().unwrap().port();
    let bulb = UdpSocket::bind("127.0.0.1:0").await.unwrap();

    // The default search request has no id and is dropped.
    control.discover().await.unwrap();
    let answer = reply("0x000000000015243f", control_port_number, "off");
    bulb.send_to(answer.as_bytes(), ("127.0.0.1", port))
        .await
        .unwrap();

    let device = match next_event(&mut events).await {
        Event::DeviceAdded(device) => device,
        other => panic!("expected deviceadded, got {}", other),
    };
    assert_eq!(device.properties().power, Some(Power::Off));
    assert_eq!(device.properties().model.as_deref(), Some("color"));

    // A repeated reply is not news; an advertisement with a new state is.
    bulb.send_to(answer.as_bytes(), ("127.0.0.1", port))
        .await
        .unwrap();
    let notify = reply("0x000000000015243f", control_port_number, "on")
        .replace("HTTP/1.1 200 OK", "NOTIFY * HTTP/1.1");
    bulb.send_to(notify.as_bytes(), ("127.0.0.1", port))
        .await
        .unwrap();
    match next_event(&mut events).await {
        Event::DeviceUpdated(device) => assert_eq!(device.properties().power, Some(Power::On)),
        other => panic!("expected deviceupdated, got {}", other),
    }

    control.connect(&device).await;
    let (stream, _) = timeout(WAIT, control_port.accept()).await.unwrap().unwrap();
    let device = match next_event(&mut events).await {
        Event::DeviceConnected(device) => device,
        other => panic!("expected deviceconnected, got {}", other),
    };

    assert_eq!(
        control.set_power(&device, false, None).await,
        CommandOutcome::Written
    );
    let mut lines = BufReader::new(stream).lines();
    let line = timeout(WAIT, lines.next_line()).await.unwrap().unwrap();
    assert_eq!(
        line.as_deref(),
        Some(r#"{"id":1,"method":"set_power","params":["off","smooth",300]}"#)
    );
    assert_eq!(next_event(&mut events).await.name(), "powerupdated");
    assert_eq!(control.list().len(), 1);
}
