//! Parsing of the pseudo-HTTP header blocks carried by discovery responses
//! and `NOTIFY` advertisements.
//!
//! ```text
//! HTTP/1.1 200 OK
//! Cache-Control: max-age=3600
//! Location: yeelight://192.168.1.239:55443
//! id: 0x000000000015243f
//! power: on
//! bright: 100
//! rgb: 16711680
//! ```
//!
//! The parser performs no semantic validation. Callers pick the fields they
//! know about through the typed accessors, which yield `None` for absent or
//! unparseable values instead of failing.

use std::collections::BTreeMap;
use std::str::FromStr;

use crate::error::{ControlError, Result};
use crate::led::rgb::RGB;

/// Header names as the bulbs send them. Lookups are case-insensitive.
pub const ID: &str = "id";
pub const LOCATION: &str = "location";
pub const POWER: &str = "power";
pub const BRIGHT: &str = "bright";
pub const COLOR_MODE: &str = "color_mode";
pub const CT: &str = "ct";
pub const RGB_VALUE: &str = "rgb";
pub const HUE: &str = "hue";
pub const SAT: &str = "sat";
pub const MODEL: &str = "model";
pub const FW_VER: &str = "fw_ver";
pub const NAME: &str = "name";
pub const SUPPORT: &str = "support";

/// A parsed header block.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers {
    start_line: Option<String>,
    fields: BTreeMap<String, String>,
}

impl Headers {
    /// Splits `raw` into header lines.
    ///
    /// Fails only when the payload is not text or carries no `Name: value`
    /// line at all. A later duplicate of a header replaces the earlier one.
    pub fn parse(raw: &[u8]) -> Result<Self> {
        let text = std::str::from_utf8(raw)
            .map_err(|e| ControlError::MalformedMessage(format!("not UTF-8: {}", e)))?;

        let mut headers = Headers::default();

        for line in text.split('\n') {
            let line = line.trim_end_matches('\r').trim();
            if line.is_empty() {
                continue;
            }

            match line.split_once(':') {
                Some((name, value)) if !name.trim().is_empty() && !name.contains(' ') => {
                    headers
                        .fields
                        .insert(name.trim().to_ascii_lowercase(), value.trim().to_string());
                }
                _ => {
                    if headers.start_line.is_none() && headers.fields.is_empty() {
                        headers.start_line = Some(line.to_string());
                    }
                }
            }
        }

        if headers.fields.is_empty() {
            return Err(ControlError::MalformedMessage(
                "no header lines found".to_string(),
            ));
        }

        Ok(headers)
    }

    /// The request or status line, e.g. `HTTP/1.1 200 OK` or `NOTIFY * HTTP/1.1`.
    pub fn start_line(&self) -> Option<&str> {
        self.start_line.as_deref()
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.fields
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    pub fn get_u8(&self, name: &str) -> Option<u8> {
        self.get_number(name)
    }

    pub fn get_u16(&self, name: &str) -> Option<u16> {
        self.get_number(name)
    }

    pub fn get_u32(&self, name: &str) -> Option<u32> {
        self.get_number(name)
    }

    /// Decomposes a packed decimal color such as `rgb: 16711680`.
    pub fn get_rgb(&self, name: &str) -> Option<RGB> {
        self.get_u32(name).map(RGB::from_packed)
    }

    fn get_number<T: FromStr>(&self, name: &str) -> Option<T> {
        self.get(name).and_then(|value| value.parse().ok())
    }

    /// All fields, keyed by lower-cased header name.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RESPONSE: &str = "HTTP/1.1 200 OK\r\n\
        Cache-Control: max-age=3600\r\n\
        Date: \r\n\
        Ext: \r\n\
        Location: yeelight://192.168.1.239:55443\r\n\
        Server: POSIX UPnP/1.0 YGLC/1\r\n\
        id: 0x000000000015243f\r\n\
        model: color\r\n\
        fw_ver: 18\r\n\
        support: get_prop set_default set_power toggle set_bright\r\n\
        power: on\r\n\
        bright: 100\r\n\
        color_mode: 2\r\n\
        ct: 4000\r\n\
        rgb: 16711680\r\n\
        hue: 100\r\n\
        sat: 35\r\n\
        name: my_bulb\r\n\
        \r\n";

    #[test]
    fn test_parse_discovery_response() {
        let headers = Headers::parse(RESPONSE.as_bytes()).unwrap();

        assert_eq!(headers.start_line(), Some("HTTP/1.1 200 OK"));
        assert_eq!(headers.get(ID), Some("0x000000000015243f"));
        assert_eq!(headers.get(LOCATION), Some("yeelight://192.168.1.239:55443"));
        assert_eq!(headers.get(POWER), Some("on"));
        assert_eq!(headers.get_u8(BRIGHT), Some(100));
        assert_eq!(headers.get_u32(CT), Some(4000));
        assert_eq!(headers.get_u16(HUE), Some(100));
        assert_eq!(headers.get_u8(SAT), Some(35));
        assert_eq!(headers.get_rgb(RGB_VALUE), Some(RGB::new(255, 0, 0)));
        assert_eq!(headers.get("date"), Some(""));
    }

    #[test]
    fn test_lookup_is_case_insensitive() {
        let headers = Headers::parse(b"LOCATION: yeelight://10.0.0.5:55443\r\nID: a\r\n").unwrap();
        assert_eq!(headers.get("Location"), Some("yeelight://10.0.0.5:55443"));
        assert_eq!(headers.get(ID), Some("a"));
        assert_eq!(headers.start_line(), None);
    }

    #[test]
    fn test_bare_newlines_are_accepted() {
        let headers = Headers::parse(b"NOTIFY * HTTP/1.1\nid: b\npower: off\n").unwrap();
        assert_eq!(headers.start_line(), Some("NOTIFY * HTTP/1.1"));
        assert_eq!(headers.get(POWER), Some("off"));
        assert_eq!(headers.len(), 2);
    }

    #[test]
    fn test_absent_and_unparseable_numbers_yield_none() {
        let headers = Headers::parse(b"id: c\r\nbright: bright\r\nhue: -4\r\n").unwrap();
        assert_eq!(headers.get_u8(BRIGHT), None);
        assert_eq!(headers.get_u16(HUE), None);
        assert_eq!(headers.get_u8(SAT), None);
        assert_eq!(headers.get_rgb(RGB_VALUE), None);
    }

    #[test]
    fn test_out_of_range_number_yields_none() {
        let headers = Headers::parse(b"id: d\r\nbright: 300\r\n").unwrap();
        assert_eq!(headers.get_u8(BRIGHT), None);
        assert_eq!(headers.get_u32(BRIGHT), Some(300));
    }

    #[test]
    fn test_missing_fields_are_not_an_error() {
        let headers = Headers::parse(b"HTTP/1.1 200 OK\r\nServer: x\r\n").unwrap();
        assert_eq!(headers.get(ID), None);
        assert_eq!(headers.get(LOCATION), None);
    }

    #[test]
    fn test_duplicate_header_last_wins() {
        let headers = Headers::parse(b"id: e\r\npower: on\r\npower: off\r\n").unwrap();
        assert_eq!(headers.get(POWER), Some("off"));
    }

    #[test]
    fn test_parse_rejects_payload_without_headers() {
        assert!(matches!(
            Headers::parse(b""),
            Err(ControlError::MalformedMessage(_))
        ));
        assert!(matches!(
            Headers::parse(b"M-SEARCH * HTTP/1.1\r\n\r\n"),
            Err(ControlError::MalformedMessage(_))
        ));
        assert!(matches!(
            Headers::parse(&[0xff, 0xfe, 0x00]),
            Err(ControlError::MalformedMessage(_))
        ));
    }
}
