//! VLAN ID type with validation.

use crate::ParseError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// IEEE 802.1Q VLAN identifier (1-4094).
///
/// VLAN 0 is reserved (priority tagged frames) and VLAN 4095 is reserved.
/// A host carrying a `VlanId` gets a `<iface>.<vlan>` sub-interface.
///
/// # Examples
///
/// ```
/// use overlay_types::VlanId;
///
/// let vlan = VlanId::new(100).unwrap();
/// assert_eq!(vlan.as_u16(), 100);
///
/// assert!(VlanId::new(0).is_err());
/// assert!(VlanId::new(4095).is_err());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u16", into = "u16")]
pub struct VlanId(u16);

impl VlanId {
    /// Minimum valid VLAN ID.
    pub const MIN: u16 = 1;

    /// Maximum valid VLAN ID.
    pub const MAX: u16 = 4094;

    /// Creates a new VLAN ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the VLAN ID is not in the valid range (1-4094).
    pub const fn new(id: u16) -> Result<Self, ParseError> {
        if id >= Self::MIN && id <= Self::MAX {
            Ok(VlanId(id))
        } else {
            Err(ParseError::InvalidVlanId(id as u32))
        }
    }

    /// Returns the VLAN ID as a u16.
    pub const fn as_u16(&self) -> u16 {
        self.0
    }

    /// Returns the sub-interface name for this VLAN on `iface`.
    pub fn sub_interface(&self, iface: &str) -> String {
        format!("{}.{}", iface, self.0)
    }

    /// Returns the VLAN that is `offset` above this one, if still valid.
    pub fn checked_add(&self, offset: u16) -> Option<VlanId> {
        self.0.checked_add(offset).and_then(|id| VlanId::new(id).ok())
    }
}

impl fmt::Display for VlanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for VlanId {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let id: u16 = s.parse().map_err(|_| ParseError::InvalidVlanId(0))?;
        VlanId::new(id)
    }
}

impl TryFrom<u16> for VlanId {
    type Error = ParseError;

    fn try_from(id: u16) -> Result<Self, Self::Error> {
        VlanId::new(id)
    }
}

impl From<VlanId> for u16 {
    fn from(vlan: VlanId) -> u16 {
        vlan.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_valid_vlan_ids() {
        assert!(VlanId::new(1).is_ok());
        assert!(VlanId::new(100).is_ok());
        assert!(VlanId::new(4094).is_ok());
    }

    #[test]
    fn test_invalid_vlan_ids() {
        assert!(VlanId::new(0).is_err());
        assert!(VlanId::new(4095).is_err());
        assert!(VlanId::new(65535).is_err());
    }

    #[test]
    fn test_parse() {
        let vlan: VlanId = "200".parse().unwrap();
        assert_eq!(vlan.as_u16(), 200);
        assert!("Vlan100".parse::<VlanId>().is_err());
        assert!("4095".parse::<VlanId>().is_err());
    }

    #[test]
    fn test_sub_interface() {
        let vlan = VlanId::new(100).unwrap();
        assert_eq!(vlan.sub_interface("h1-eth0"), "h1-eth0.100");
    }

    #[test]
    fn test_checked_add() {
        let base = VlanId::new(100).unwrap();
        assert_eq!(base.checked_add(1), Some(VlanId::new(101).unwrap()));
        assert_eq!(VlanId::new(4094).unwrap().checked_add(1), None);
    }

    #[test]
    fn test_serde_rejects_reserved() {
        assert!(serde_json::from_str::<VlanId>("4095").is_err());
        let vlan: VlanId = serde_json::from_str("200").unwrap();
        assert_eq!(vlan.as_u16(), 200);
    }
}
