//! # Bulb Control Library for LAN Smart Bulbs
//!
//! `bulb-control-lib` is a Rust library for finding smart bulbs on the local
//! network and controlling them. Bulbs answer an SSDP-style search on UDP
//! port 1982 and accept line-delimited JSON commands on a persistent TCP
//! connection.
//!
//! This library is designed to be used by command-line tools or other client
//! applications that keep track of the bulbs on a network and switch them.
//!
//! ## Features
//!
//! - Device discovery with a de-duplicated, continuously updated registry
//! - One persistent control connection per device
//! - Power, brightness and color commands
//! - A single event stream for everything that happens
//!
//! ## Example
//!
//! Here is how to turn on every bulb as soon as it is connected:
//!
//! ```no_run
//! use bulb_control_lib::control_interface::ControlInterface;
//! use bulb_control_lib::event::Event;
//! use bulb_control_lib::util::options::DiscoveryOptions;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let (control, mut events) = ControlInterface::new(DiscoveryOptions::default());
//!     control.start().await?;
//!     control.discover().await?;
//!
//!     while let Some(event) = events.recv().await {
//!         match event {
//!             Event::DeviceAdded(device) => control.connect(&device).await,
//!             Event::DeviceConnected(device) => {
//!                 control.set_power(&device, true, None).await;
//!             }
//!             other => println!("{}", other),
//!         }
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## License
//!
//! This project is dual-licensed under the MIT License and the Apache License, Version 2.0.
//! You may choose to use either license, depending on your project needs.

// The `control_interface` module ties discovery, the device registry and the
// per-device control connections together, and encodes the commands sent to
// the bulbs.
pub mod control_interface;

// The `device` module holds the device model and the registry of known devices.
pub mod device;

pub mod error;

// The `event` module defines the events reported to the caller and the
// channel they travel on.
pub mod event;

// The `led` module contains the color type and its packed wire encoding.
pub mod led;

// The `util` module provides the discovery socket, the header parser for
// discovery messages and the configuration options.
//
// Example usage:
//
// ```
// use bulb_control_lib::util::headers::Headers;
//
// let headers = Headers::parse(b"HTTP/1.1 200 OK\r\nid: 0x1\r\nbright: 40\r\n").unwrap();
// assert_eq!(headers.get_u8("bright"), Some(40));
// ```
pub mod util;

pub use control_interface::{CommandOutcome, ControlInterface};
pub use device::Device;
pub use error::{ControlError, Result};
pub use event::Event;
