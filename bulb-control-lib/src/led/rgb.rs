use std::fmt;
use std::str::FromStr;

use anyhow::anyhow;
use clap::ValueEnum;
use serde::{Deserialize, Serialize};

/// A three channel color as the bulbs understand it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RGB {
    pub red: u8,
    pub green: u8,
    pub blue: u8,
}

impl RGB {
    pub fn new(red: u8, green: u8, blue: u8) -> Self {
        RGB { red, green, blue }
    }

    /// Packs the color into the single integer used on the wire,
    /// `red * 65536 + green * 256 + blue`.
    pub fn to_packed(self) -> u32 {
        (self.red as u32) * 65536 + (self.green as u32) * 256 + self.blue as u32
    }

    /// Decomposes a packed integer into its channels.
    ///
    /// Bits above the lowest 24 are ignored.
    pub fn from_packed(value: u32) -> Self {
        RGB {
            red: ((value >> 16) & 0xff) as u8,
            green: ((value >> 8) & 0xff) as u8,
            blue: (value & 0xff) as u8,
        }
    }
}

impl fmt::Display for RGB {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{:02x}{:02x}{:02x}", self.red, self.green, self.blue)
    }
}

// implement From for (u8,u8,u8) to RGB and vice verse
impl From<(u8, u8, u8)> for RGB {
    fn from(tuple: (u8, u8, u8)) -> Self {
        RGB::new(tuple.0, tuple.1, tuple.2)
    }
}

impl From<RGB> for (u8, u8, u8) {
    fn from(rgb: RGB) -> Self {
        (rgb.red, rgb.green, rgb.blue)
    }
}

impl From<[u8; 3]> for RGB {
    fn from(channels: [u8; 3]) -> Self {
        RGB::new(channels[0], channels[1], channels[2])
    }
}

/// Named colors accepted on the command line.
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum CliColors {
    Red,
    Green,
    Blue,
    White,
    Yellow,
    Orange,
    Purple,
    Cyan,
    Magenta,
    Lime,
    Pink,
    Teal,
    Lavender,
    Brown,
    Beige,
    Maroon,
    Mint,
}

impl FromStr for CliColors {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        <CliColors as ValueEnum>::from_str(s, true).map_err(|_| anyhow!("Invalid color"))
    }
}

impl From<CliColors> for RGB {
    fn from(color: CliColors) -> Self {
        let channels: (u8, u8, u8) = match color {
            CliColors::Red => (255, 0, 0),
            CliColors::Green => (0, 255, 0),
            CliColors::Blue => (0, 0, 255),
            CliColors::White => (255, 255, 255),
            CliColors::Yellow => (255, 255, 0),
            CliColors::Orange => (255, 165, 0),
            CliColors::Purple => (128, 0, 128),
            CliColors::Cyan => (0, 255, 255),
            CliColors::Magenta => (255, 0, 255),
            CliColors::Lime => (50, 205, 50),
            CliColors::Pink => (255, 192, 203),
            CliColors::Teal => (0, 128, 128),
            CliColors::Lavender => (230, 230, 250),
            CliColors::Brown => (165, 42, 42),
            CliColors::Beige => (245, 245, 220),
            CliColors::Maroon => (128, 0, 0),
            CliColors::Mint => (189, 252, 201),
        };
        channels.into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_packed_round_trip_all_channels() {
        for red in 0..=255u8 {
            for green in 0..=255u8 {
                for blue in 0..=255u8 {
                    let rgb = RGB::new(red, green, blue);
                    assert_eq!(RGB::from_packed(rgb.to_packed()), rgb);
                }
            }
        }
    }

    #[test]
    fn test_packed_value() {
        assert_eq!(RGB::new(255, 0, 0).to_packed(), 16711680);
        assert_eq!(RGB::new(0, 255, 0).to_packed(), 65280);
        assert_eq!(RGB::new(0, 0, 255).to_packed(), 255);
        assert_eq!(RGB::new(255, 255, 255).to_packed(), 16777215);
    }

    #[test]
    fn test_from_packed_ignores_high_bits() {
        assert_eq!(RGB::from_packed(0x01ff_0000), RGB::new(255, 0, 0));
    }

    #[test]
    fn test_cli_color_parsing() {
        let color: CliColors = "Orange".parse().unwrap();
        assert_eq!(RGB::from(color), RGB::new(255, 165, 0));
        assert!("ultraviolet".parse::<CliColors>().is_err());
    }

    #[test]
    fn test_display_hex() {
        assert_eq!(RGB::new(255, 128, 0).to_string(), "#ff8000");
    }
}
