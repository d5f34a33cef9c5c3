//! RGB color values and the named palette used for robot/target pairing.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Palette entries the UI layer can offer by name.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum NamedColor {
    Red,
    Orange,
    Yellow,
    Green,
    Blue,
    Violet,
    White,
    Black,
}

/// An RGB triple with each channel in `[0, 1]`.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct Color {
    pub red: f32,
    pub green: f32,
    pub blue: f32,
}

impl Color {
    /// Construct from raw channel values.
    #[must_use]
    pub const fn new(red: f32, green: f32, blue: f32) -> Self {
        Self { red, green, blue }
    }

    /// Construct from a packed `0xRRGGBB` integer.
    #[must_use]
    pub fn from_rgb24(packed: u32) -> Self {
        Self {
            red: ((packed >> 16) & 0xFF) as f32 / 255.0,
            green: ((packed >> 8) & 0xFF) as f32 / 255.0,
            blue: (packed & 0xFF) as f32 / 255.0,
        }
    }

    /// Channel-wise comparison within `delta`, used when cycling the palette
    /// so a new robot/target pair never reuses a color already on screen.
    #[must_use]
    pub fn is_similar(&self, other: Color, delta: f32) -> bool {
        (self.red - other.red).abs() < delta
            && (self.green - other.green).abs() < delta
            && (self.blue - other.blue).abs() < delta
    }
}

impl From<NamedColor> for Color {
    fn from(name: NamedColor) -> Self {
        match name {
            NamedColor::Red => Self::new(1.0, 0.0, 0.0),
            NamedColor::Orange => Self::new(1.0, 0.4, 0.0),
            NamedColor::Yellow => Self::new(1.0, 1.0, 0.0),
            NamedColor::Green => Self::new(0.0, 1.0, 0.0),
            NamedColor::Blue => Self::new(0.0, 0.0, 1.0),
            NamedColor::Violet => Self::new(0.5, 0.0, 0.5),
            NamedColor::White => Self::new(1.0, 1.0, 1.0),
            NamedColor::Black => Self::new(0.0, 0.0, 0.0),
        }
    }
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}, {})", self.red, self.green, self.blue)
    }
}
