//! Switch port numbers.

use crate::ParseError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// OpenFlow port number on one switch.
///
/// Valid numbers are 1 through 65279; everything from `0xff00` up is
/// reserved for OpenFlow pseudo-ports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u16", into = "u16")]
pub struct PortNo(u16);

impl PortNo {
    /// Lowest usable port number.
    pub const MIN: u16 = 1;

    /// Highest usable port number.
    pub const MAX: u16 = 0xfeff;

    /// Creates a new port number.
    ///
    /// # Errors
    ///
    /// Returns an error for 0 and the reserved range.
    pub const fn new(port: u16) -> Result<Self, ParseError> {
        if port >= Self::MIN && port <= Self::MAX {
            Ok(PortNo(port))
        } else {
            Err(ParseError::InvalidPortNo(port as u32))
        }
    }

    pub const fn as_u16(&self) -> u16 {
        self.0
    }

    /// Returns the next port number, or `None` past [`PortNo::MAX`].
    pub fn next(&self) -> Option<PortNo> {
        self.0.checked_add(1).and_then(|p| PortNo::new(p).ok())
    }
}

impl fmt::Display for PortNo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for PortNo {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let port: u16 = s
            .parse()
            .map_err(|_| ParseError::InvalidPortNo(0))?;
        PortNo::new(port)
    }
}

impl TryFrom<u16> for PortNo {
    type Error = ParseError;

    fn try_from(port: u16) -> Result<Self, Self::Error> {
        PortNo::new(port)
    }
}

impl From<PortNo> for u16 {
    fn from(port: PortNo) -> u16 {
        port.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_port_range() {
        assert!(PortNo::new(0).is_err());
        assert!(PortNo::new(1).is_ok());
        assert!(PortNo::new(0xfeff).is_ok());
        assert_eq!(PortNo::new(0xff00), Err(ParseError::InvalidPortNo(0xff00)));
    }

    #[test]
    fn test_next() {
        let p = PortNo::new(9).unwrap();
        assert_eq!(p.next(), Some(PortNo::new(10).unwrap()));
        assert_eq!(PortNo::new(PortNo::MAX).unwrap().next(), None);
    }

    #[test]
    fn test_parse() {
        assert_eq!("10".parse::<PortNo>().unwrap().as_u16(), 10);
        assert!("LOCAL".parse::<PortNo>().is_err());
    }
}
