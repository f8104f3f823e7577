use std::time::Duration;

use serde::Serialize;
use serde_json::{json, Value};

use crate::device::Power;
use crate::error::Result;
use crate::event::CommandKind;
use crate::led::rgb::RGB;

/// Every request carries the same id; responses are not correlated.
pub const REQUEST_ID: u32 = 1;
const TRANSITION: &str = "smooth";
const TERMINATOR: &str = "\r\n";

/// One request line on the control connection.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Request {
    pub id: u32,
    pub method: &'static str,
    pub params: Vec<Value>,
}

/// A control operation and its arguments.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    SetPower { power: Power, duration: Duration },
    /// Brightness in percent, 0..100.
    SetBrightness { percent: u8, duration: Duration },
    SetColor { rgb: RGB, duration: Duration },
}

impl Command {
    pub fn kind(&self) -> CommandKind {
        match self {
            Command::SetPower { .. } => CommandKind::Power,
            Command::SetBrightness { .. } => CommandKind::Brightness,
            Command::SetColor { .. } => CommandKind::Color,
        }
    }

    pub fn method(&self) -> &'static str {
        match self {
            Command::SetPower { .. } => "set_power",
            Command::SetBrightness { .. } => "set_bright",
            Command::SetColor { .. } => "set_rgb",
        }
    }

    pub fn to_request(&self) -> Request {
        let (value, duration) = match *self {
            Command::SetPower { power, duration } => (json!(power.as_str()), duration),
            Command::SetBrightness { percent, duration } => (json!(percent), duration),
            Command::SetColor { rgb, duration } => (json!(rgb.to_packed()), duration),
        };

        Request {
            id: REQUEST_ID,
            method: self.method(),
            params: vec![value, json!(TRANSITION), json!(duration.as_millis() as u64)],
        }
    }

    /// The request as written to the socket, JSON followed by CRLF.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut line = serde_json::to_vec(&self.to_request())?;
        line.extend_from_slice(TERMINATOR.as_bytes());
        Ok(line)
    }
}
