//! VXLAN network identifier.

use crate::ParseError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::num::NonZeroU32;
use std::str::FromStr;

/// A [VXLAN][RFC7348] Network Identifier.
///
/// A `Vni` is a 24-bit value naming one overlay segment. Value `0` is
/// reserved and rejected; the maximum is `2^24 - 1`.
///
/// In flow tables the VNI travels as the tunnel id (`tun_id`). Open vSwitch
/// prints it back in hexadecimal, so [`Vni::from_str`] accepts a `0x` prefix.
///
/// [RFC7348]: https://datatracker.ietf.org/doc/html/rfc7348#section-5
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
#[repr(transparent)]
pub struct Vni(NonZeroU32);

impl Vni {
    /// The minimum legal [`Vni`] value (1).
    pub const MIN: u32 = 1;
    /// The maximum legal [`Vni`] value (2<sup>24</sup> - 1).
    pub const MAX: u32 = 0x00_FF_FF_FF;

    /// Create a new [`Vni`] from a `u32`.
    ///
    /// # Errors
    ///
    /// Returns [`ParseError::InvalidVni`] if the value is 0 or greater than [`Vni::MAX`].
    pub fn new(vni: u32) -> Result<Vni, ParseError> {
        match NonZeroU32::new(vni) {
            Some(v) if vni <= Vni::MAX => Ok(Vni(v)),
            _ => Err(ParseError::InvalidVni(vni)),
        }
    }

    /// Get the value of the [`Vni`] as a `u32`.
    pub fn as_u32(self) -> u32 {
        self.0.get()
    }
}

impl fmt::Display for Vni {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.get())
    }
}

impl FromStr for Vni {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parsed = match s.strip_prefix("0x") {
            Some(hex) => u32::from_str_radix(hex, 16),
            None => s.parse::<u32>(),
        };
        let value = parsed.map_err(|_| ParseError::InvalidVni(0))?;
        Vni::new(value)
    }
}

impl TryFrom<u32> for Vni {
    type Error = ParseError;

    fn try_from(vni: u32) -> Result<Self, Self::Error> {
        Vni::new(vni)
    }
}

impl From<Vni> for u32 {
    fn from(vni: Vni) -> u32 {
        vni.as_u32()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_bounds() {
        assert_eq!(Vni::new(0), Err(ParseError::InvalidVni(0)));
        assert!(Vni::new(Vni::MIN).is_ok());
        assert!(Vni::new(Vni::MAX).is_ok());
        assert_eq!(
            Vni::new(Vni::MAX + 1),
            Err(ParseError::InvalidVni(Vni::MAX + 1))
        );
    }

    #[test]
    fn test_parse_decimal_and_hex() {
        assert_eq!("100".parse::<Vni>().unwrap().as_u32(), 100);
        assert_eq!("0x64".parse::<Vni>().unwrap().as_u32(), 100);
        assert!("0x0".parse::<Vni>().is_err());
        assert!("flow".parse::<Vni>().is_err());
    }

    #[test]
    fn test_option_is_niche_optimized() {
        assert_eq!(
            std::mem::size_of::<Option<Vni>>(),
            std::mem::size_of::<u32>()
        );
    }
}
