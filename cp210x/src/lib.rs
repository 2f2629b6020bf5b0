#![no_std]

// AN571 "CP210x Virtual COM Port Interface", vendor specific requests

use core::fmt;

/// Silicon Labs
pub const VID: u16 = 0x10C4;

pub const VENDOR_SPECIFIC: u8 = 0xFF;

pub const GET_PARTNUM: u16 = 0x370B;
pub const WRITE_LATCH: u16 = 0x37E1;
pub const READ_LATCH: u16 = 0x00C2;

#[derive(Clone, Copy, Debug, PartialEq, thiserror::Error)]
pub enum Error {
    #[error("relay number {0} out of range 0-3")]
    InvalidRelay(i64),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PartNumber {
    Cp2101,
    Cp2102,
    Cp2103,
    Cp2104,
    Cp2105,
    Cp2108,
    Cp2102nQfn28,
    Cp2102nQfn24,
    Cp2102nQfn20,
    Unknown(u8),
}

impl From<u8> for PartNumber {
    fn from(value: u8) -> Self {
        match value {
            0x01 => Self::Cp2101,
            0x02 => Self::Cp2102,
            0x03 => Self::Cp2103,
            0x04 => Self::Cp2104,
            0x05 => Self::Cp2105,
            0x08 => Self::Cp2108,
            0x20 => Self::Cp2102nQfn28,
            0x21 => Self::Cp2102nQfn24,
            0x22 => Self::Cp2102nQfn20,
            _ => Self::Unknown(value),
        }
    }
}

impl From<PartNumber> for u8 {
    fn from(value: PartNumber) -> Self {
        match value {
            PartNumber::Cp2101 => 0x01,
            PartNumber::Cp2102 => 0x02,
            PartNumber::Cp2103 => 0x03,
            PartNumber::Cp2104 => 0x04,
            PartNumber::Cp2105 => 0x05,
            PartNumber::Cp2108 => 0x08,
            PartNumber::Cp2102nQfn28 => 0x20,
            PartNumber::Cp2102nQfn24 => 0x21,
            PartNumber::Cp2102nQfn20 => 0x22,
            PartNumber::Unknown(value) => value,
        }
    }
}

bitflags::bitflags! {
    /// GPIO latch bits of a CP2104.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct Gpio: u8 {
        const GPIO_0 = 1 << 0;
        const GPIO_1 = 1 << 1;
        const GPIO_2 = 1 << 2;
        const GPIO_3 = 1 << 3;
    }
}

/// One of the four relays of the board, wired to the GPIO of the same index.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct Relay(u8);

impl Relay {
    pub const COUNT: usize = 4;
    pub const ALL: [Self; Self::COUNT] = [Self(0), Self(1), Self(2), Self(3)];

    pub const fn new(index: i64) -> Result<Self, Error> {
        match index {
            0..=3 => Ok(Self(index as u8)),
            _ => Err(Error::InvalidRelay(index)),
        }
    }

    pub const fn index(self) -> u8 {
        self.0
    }

    pub const fn gpio(self) -> Gpio {
        Gpio::from_bits_retain(1 << self.0)
    }

    /// Relays are active low: a cleared latch bit energizes the coil.
    pub const fn is_on(self, latch: Gpio) -> bool {
        !latch.contains(self.gpio())
    }
}

impl fmt::Display for Relay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// Argument of a WRITE_LATCH request: `mask` selects the pins to change,
/// `state` carries their new levels.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Latch {
    pub mask: Gpio,
    pub state: Gpio,
}

impl Latch {
    pub const fn relay(relay: Relay, on: bool) -> Self {
        Self {
            mask: relay.gpio(),
            state: if on { Gpio::empty() } else { Gpio::all() },
        }
    }

    /// wIndex of the request.
    pub const fn index(self) -> u16 {
        (self.state.bits() as u16) << 8 | self.mask.bits() as u16
    }

    pub fn apply(self, latch: Gpio) -> Gpio {
        (latch - self.mask) | (self.state & self.mask)
    }
}

#[cfg(test)]
mod tests {
    use super::{Gpio, Latch, PartNumber, Relay};

    #[test]
    fn test_relay() {
        assert_eq!(Relay::new(0).map(Relay::index), Ok(0));
        assert_eq!(Relay::new(3).map(Relay::index), Ok(3));
        assert_eq!(Relay::new(4), Err(super::Error::InvalidRelay(4)));
        assert_eq!(Relay::new(-1), Err(super::Error::InvalidRelay(-1)));
        assert_eq!(Relay::ALL[2].gpio(), Gpio::GPIO_2);
    }

    #[test]
    fn test_latch_index() {
        let relay = Relay::new(2).unwrap();
        assert_eq!(Latch::relay(relay, true).index(), 0x0004);
        assert_eq!(Latch::relay(relay, false).index(), 0x0F04);
        assert_eq!(Latch::relay(Relay::ALL[0], false).index(), 0x0F01);
    }

    #[test]
    fn test_latch_apply() {
        let latch = Latch::relay(Relay::ALL[1], true).apply(Gpio::all());
        assert_eq!(latch, Gpio::GPIO_0 | Gpio::GPIO_2 | Gpio::GPIO_3);
        assert!(Relay::ALL[1].is_on(latch));
        assert!(!Relay::ALL[0].is_on(latch));

        let latch = Latch::relay(Relay::ALL[1], false).apply(latch);
        assert_eq!(latch, Gpio::all());
    }

    #[test]
    fn test_part_number() {
        assert_eq!(PartNumber::from(0x04), PartNumber::Cp2104);
        assert_eq!(PartNumber::from(0x42), PartNumber::Unknown(0x42));
        assert_eq!(u8::from(PartNumber::Cp2102nQfn20), 0x22);
    }
}
