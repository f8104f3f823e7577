use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};

use derivative::Derivative;
use serde::{Deserialize, Serialize};

use crate::error::{ControlError, Result};
use crate::led::rgb::RGB;
use crate::util::headers::{self, Headers};

pub mod registry;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Power {
    On,
    Off,
}

impl Power {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "on" => Some(Power::On),
            "off" => Some(Power::Off),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Power::On => "on",
            Power::Off => "off",
        }
    }
}

impl From<bool> for Power {
    fn from(on: bool) -> Self {
        if on {
            Power::On
        } else {
            Power::Off
        }
    }
}

impl Display for Power {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle of the control connection to one device.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

/// Everything a device reported about itself in its last sighting.
///
/// Fields the library understands are typed. Every other header lands in
/// `extra` under its lower-cased name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceProperties {
    /// Advertised control endpoint, e.g. `yeelight://192.168.1.239:55443`.
    pub location: Option<String>,
    pub power: Option<Power>,
    /// Range 0..100.
    pub brightness: Option<u8>,
    pub color_mode: Option<u8>,
    /// Color temperature in Kelvin.
    pub color_temperature: Option<u32>,
    pub rgb: Option<RGB>,
    pub hue: Option<u16>,
    pub saturation: Option<u8>,
    pub model: Option<String>,
    pub firmware_version: Option<String>,
    pub name: Option<String>,
    /// Methods the device accepts on its control connection.
    pub support: Vec<String>,
    pub extra: BTreeMap<String, String>,
}

impl DeviceProperties {
    pub fn from_headers(headers: &Headers) -> Self {
        let mut properties = DeviceProperties {
            location: headers.get(headers::LOCATION).map(str::to_string),
            power: headers.get(headers::POWER).and_then(Power::parse),
            brightness: headers.get_u8(headers::BRIGHT),
            color_mode: headers.get_u8(headers::COLOR_MODE),
            color_temperature: headers.get_u32(headers::CT),
            // A packed value of zero means the bulb has no color set.
            rgb: headers
                .get_u32(headers::RGB_VALUE)
                .filter(|packed| *packed > 0)
                .map(RGB::from_packed),
            hue: headers.get_u16(headers::HUE),
            saturation: headers.get_u8(headers::SAT),
            model: headers.get(headers::MODEL).map(str::to_string),
            firmware_version: headers.get(headers::FW_VER).map(str::to_string),
            name: headers
                .get(headers::NAME)
                .filter(|name| !name.is_empty())
                .map(str::to_string),
            support: headers
                .get(headers::SUPPORT)
                .map(|methods| methods.split_whitespace().map(str::to_string).collect())
                .unwrap_or_default(),
            extra: BTreeMap::new(),
        };

        for (name, value) in headers.iter() {
            if !Self::is_known(name) {
                properties.extra.insert(name.to_string(), value.to_string());
            }
        }

        properties
    }

    fn is_known(name: &str) -> bool {
        matches!(
            name,
            headers::ID
                | headers::LOCATION
                | headers::POWER
                | headers::BRIGHT
                | headers::COLOR_MODE
                | headers::CT
                | headers::RGB_VALUE
                | headers::HUE
                | headers::SAT
                | headers::MODEL
                | headers::FW_VER
                | headers::NAME
                | headers::SUPPORT
        )
    }

    pub fn is_off(&self) -> bool {
        self.power == Some(Power::Off)
    }
}

/// Host and port of a device's control connection.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    /// Parses an advertised location of the form `scheme://host:port`.
    /// The scheme is optional.
    pub fn parse(location: &str) -> Result<Self> {
        let invalid = || ControlError::InvalidLocation(location.to_string());

        let authority = match location.split_once("://") {
            Some((_, rest)) => rest,
            None => location,
        };
        let authority = authority.split('/').next().unwrap_or_default().trim();

        let (host, port) = authority.rsplit_once(':').ok_or_else(invalid)?;
        let host = host.trim_start_matches('[').trim_end_matches(']');
        if host.is_empty() {
            return Err(invalid());
        }
        let port = port.parse::<u16>().map_err(|_| invalid())?;

        Ok(Endpoint {
            host: host.to_string(),
            port,
        })
    }
}

impl Display for Endpoint {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

/// A bulb found on the local network.
///
/// Two devices are equal when their ids are equal; properties and connection
/// state are snapshots that change over the device's lifetime.
#[derive(Derivative)]
#[derivative(Hash, PartialEq, Eq)]
#[derive(Debug, Clone, Serialize)]
pub struct Device {
    id: String,
    #[derivative(Hash = "ignore", PartialEq = "ignore")]
    properties: DeviceProperties,
    #[derivative(Hash = "ignore", PartialEq = "ignore")]
    connection_state: ConnectionState,
}

impl Device {
    pub fn new(id: String, properties: DeviceProperties) -> Self {
        Device {
            id,
            properties,
            connection_state: ConnectionState::Disconnected,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn properties(&self) -> &DeviceProperties {
        &self.properties
    }

    pub(crate) fn properties_mut(&mut self) -> &mut DeviceProperties {
        &mut self.properties
    }

    pub(crate) fn replace_properties(&mut self, properties: DeviceProperties) {
        self.properties = properties;
    }

    /// Connection state at the moment this snapshot was taken.
    pub fn connection_state(&self) -> ConnectionState {
        self.connection_state
    }

    pub(crate) fn with_connection_state(mut self, state: ConnectionState) -> Self {
        self.connection_state = state;
        self
    }

    pub fn is_connected(&self) -> bool {
        self.connection_state == ConnectionState::Connected
    }

    /// Control endpoint derived from the current `location` property.
    pub fn endpoint(&self) -> Result<Endpoint> {
        let location = self
            .properties
            .location
            .as_deref()
            .ok_or_else(|| ControlError::InvalidLocation(format!("device {} has none", self.id)))?;
        Endpoint::parse(location)
    }
}

impl Display for Device {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.id)?;
        if let Some(name) = &self.properties.name {
            write!(f, " ({})", name)?;
        }
        if let Some(location) = &self.properties.location {
            write!(f, " at {}", location)?;
        }
        Ok(())
    }
}
