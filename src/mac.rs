//! 48-bit link-layer addresses.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

/// Error returned when a string is not a colon- or hyphen-separated MAC address.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid MAC address: {0}")]
pub struct ParseMacError(String);

/// A 48-bit Ethernet MAC address.
///
/// ```
/// use rust_ofp_l2::mac::MacAddress;
///
/// let mac: MacAddress = "00:00:00:00:00:aa".parse().unwrap();
/// assert_eq!(mac.to_u64(), 0xaa);
/// assert!(!mac.is_multicast());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MacAddress([u8; 6]);

impl MacAddress {
    /// The broadcast address `ff:ff:ff:ff:ff:ff`.
    pub const BROADCAST: MacAddress = MacAddress([0xff; 6]);

    pub const fn new(bytes: [u8; 6]) -> Self {
        MacAddress(bytes)
    }

    pub const fn as_bytes(&self) -> &[u8; 6] {
        &self.0
    }

    /// Returns true for group addresses (the I/G bit of the first octet is set).
    ///
    /// Broadcast is a group address, so it is multicast too.
    pub const fn is_multicast(&self) -> bool {
        self.0[0] & 0x01 != 0
    }

    pub fn is_broadcast(&self) -> bool {
        *self == Self::BROADCAST
    }

    /// The address as a big-endian 48-bit integer.
    pub fn to_u64(&self) -> u64 {
        self.0.iter().fold(0u64, |acc, b| (acc << 8) | *b as u64)
    }

    /// Builds an address from the low 48 bits of `addr`.
    pub fn from_u64(addr: u64) -> Self {
        let mut arr = [0u8; 6];
        for (i, b) in arr.iter_mut().enumerate() {
            *b = ((addr >> (8 * (5 - i))) & 0xff) as u8;
        }
        MacAddress(arr)
    }
}

impl From<[u8; 6]> for MacAddress {
    fn from(bytes: [u8; 6]) -> Self {
        MacAddress(bytes)
    }
}

impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let b = &self.0;
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            b[0], b[1], b[2], b[3], b[4], b[5]
        )
    }
}

impl FromStr for MacAddress {
    type Err = ParseMacError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let separator = if s.contains(':') { ':' } else { '-' };
        let parts: Vec<&str> = s.split(separator).collect();
        if parts.len() != 6 {
            return Err(ParseMacError(s.to_string()));
        }

        let mut bytes = [0u8; 6];
        for (i, part) in parts.iter().enumerate() {
            bytes[i] = u8::from_str_radix(part, 16).map_err(|_| ParseMacError(s.to_string()))?;
        }
        Ok(MacAddress(bytes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn multicast_bit_covers_broadcast() {
        assert!(MacAddress::BROADCAST.is_multicast());
        assert!(MacAddress::BROADCAST.is_broadcast());

        let ipv6_mcast: MacAddress = "33:33:00:00:00:01".parse().unwrap();
        assert!(ipv6_mcast.is_multicast());
        assert!(!ipv6_mcast.is_broadcast());

        let host: MacAddress = "02:00:00:00:00:01".parse().unwrap();
        assert!(!host.is_multicast());
    }

    #[test]
    fn integer_form_is_big_endian() {
        let mac: MacAddress = "00:00:00:00:01:02".parse().unwrap();
        assert_eq!(mac.to_u64(), 258);
        assert_eq!(MacAddress::from_u64(258), mac);
        assert_eq!(MacAddress::BROADCAST.to_u64(), 0xffff_ffff_ffff);
    }

    #[test]
    fn display_and_parse_agree() {
        let mac: MacAddress = "aa-bb-cc-dd-ee-0f".parse().unwrap();
        assert_eq!(mac.to_string(), "aa:bb:cc:dd:ee:0f");
        assert!("aa:bb:cc".parse::<MacAddress>().is_err());
        assert!("zz:bb:cc:dd:ee:ff".parse::<MacAddress>().is_err());
    }
}
