//! Packed colour values as they cross the module boundary.
//!
//! A colour is one `u32` with red in the least significant byte, then green,
//! blue and alpha in the most significant byte. Reading the value as
//! little-endian bytes therefore yields `[r, g, b, a]`.

use core::fmt;

/// Packed RGBA colour, red in the low byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Color(pub u32);

impl Color {
    /// Wraps whatever integer the module passed, keeping the low 32 bits.
    pub const fn from_bits(bits: u64) -> Self {
        Self(bits as u32)
    }

    pub const fn red(self) -> u8 {
        self.0 as u8
    }

    pub const fn green(self) -> u8 {
        (self.0 >> 8) as u8
    }

    pub const fn blue(self) -> u8 {
        (self.0 >> 16) as u8
    }

    pub const fn alpha(self) -> u8 {
        (self.0 >> 24) as u8
    }

    /// Channels in `[r, g, b, a]` order.
    pub const fn channels(self) -> [u8; 4] {
        self.0.to_le_bytes()
    }

    /// `#rrggbbaa`, lowercase.
    pub fn to_hex(self) -> String {
        self.to_string()
    }
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [r, g, b, a] = self.channels();
        write!(f, "#{r:02x}{g:02x}{b:02x}{a:02x}")
    }
}

impl From<u32> for Color {
    fn from(bits: u32) -> Self {
        Self(bits)
    }
}
