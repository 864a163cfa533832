use std::fmt;
use std::str::FromStr;

use pnet::util::MacAddr;

pub const MAC_ADDRESS_LEN: usize = 6;
pub const BROADCAST_MAC: [u8; MAC_ADDRESS_LEN] = [ 0xff, 0xff, 0xff, 0xff, 0xff, 0xff ];

/// Length of the textual `XX:XX:XX:XX:XX:XX` form.
pub const MAC_TEXT_LEN: usize = 3 * MAC_ADDRESS_LEN - 1;

/// Hardware address of the proxied machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MacAddress([u8; MAC_ADDRESS_LEN]);

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseMacError {
    #[error("expected XX:XX:XX:XX:XX:XX, got {0} characters")]
    TooShort(usize),
    #[error("expected ':' at position {0}")]
    Separator(usize),
    #[error("invalid hex digit at position {0}")]
    Digit(usize),
}

impl MacAddress {
    pub const fn new(bytes: [u8; MAC_ADDRESS_LEN]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; MAC_ADDRESS_LEN] {
        &self.0
    }

    /// Parses a leading `XX:XX:XX:XX:XX:XX` (two hex digits per byte) and
    /// ignores whatever follows it.
    pub fn parse_prefix(s: &str) -> Result<Self, ParseMacError> {
        let text = s.as_bytes();
        if text.len() < MAC_TEXT_LEN {
            return Err(ParseMacError::TooShort(text.len()));
        }

        let mut bytes = [0u8; MAC_ADDRESS_LEN];
        for (i, byte) in bytes.iter_mut().enumerate() {
            let pos = i * 3;
            if i > 0 && text[pos - 1] != b':' {
                return Err(ParseMacError::Separator(pos - 1));
            }
            let hi = hex_value(text[pos]).ok_or(ParseMacError::Digit(pos))?;
            let lo = hex_value(text[pos + 1]).ok_or(ParseMacError::Digit(pos + 1))?;
            *byte = (hi << 4) | lo;
        }

        Ok(Self(bytes))
    }
}

fn hex_value(c: u8) -> Option<u8> {
    (c as char).to_digit(16).map(|d| d as u8)
}

impl FromStr for MacAddress {
    type Err = ParseMacError;

    /// Strict form: nothing but the address.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mac = Self::parse_prefix(s)?;
        if s.len() != MAC_TEXT_LEN {
            return Err(ParseMacError::Separator(MAC_TEXT_LEN));
        }
        Ok(mac)
    }
}

impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let b = &self.0;
        write!(f, "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}", b[0], b[1], b[2], b[3], b[4], b[5])
    }
}

impl From<MacAddress> for MacAddr {
    fn from(mac: MacAddress) -> Self {
        let b = mac.0;
        MacAddr::new(b[0], b[1], b[2], b[3], b[4], b[5])
    }
}

impl From<MacAddr> for MacAddress {
    fn from(mac: MacAddr) -> Self {
        Self([mac.0, mac.1, mac.2, mac.3, mac.4, mac.5])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_upper_and_lower_case() {
        let upper: MacAddress = "AA:BB:CC:DD:EE:FF".parse().unwrap();
        let lower: MacAddress = "aa:bb:cc:dd:ee:ff".parse().unwrap();
        assert_eq!(upper, lower);
        assert_eq!(upper.as_bytes(), &[0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff]);
    }

    #[test]
    fn prefix_ignores_trailing_content() {
        let mac = MacAddress::parse_prefix("01:23:45:67:89:ab   # office desktop").unwrap();
        assert_eq!(mac.as_bytes(), &[0x01, 0x23, 0x45, 0x67, 0x89, 0xab]);
        assert!("01:23:45:67:89:ab #".parse::<MacAddress>().is_err());
    }

    #[test]
    fn rejects_malformed() {
        assert_eq!(MacAddress::parse_prefix("AA:BB:CC"), Err(ParseMacError::TooShort(8)));
        assert_eq!(MacAddress::parse_prefix("AA-BB-CC-DD-EE-FF"), Err(ParseMacError::Separator(2)));
        assert_eq!(MacAddress::parse_prefix("AA:BB:CC:DD:EE:GG"), Err(ParseMacError::Digit(15)));
        // single digit groups are not accepted
        assert!(MacAddress::parse_prefix("A:BB:CC:DD:EE:FF0").is_err());
    }

    #[test]
    fn display_is_lowercase_hex() {
        let mac = MacAddress::new([0xAA, 0x0B, 0xCC, 0xDD, 0xEE, 0x01]);
        assert_eq!(mac.to_string(), "aa:0b:cc:dd:ee:01");
    }

    #[test]
    fn converts_to_and_from_pnet() {
        let mac = MacAddress::new([1, 2, 3, 4, 5, 6]);
        let addr: MacAddr = mac.into();
        assert_eq!(addr, MacAddr::new(1, 2, 3, 4, 5, 6));
        assert_eq!(MacAddress::from(addr), mac);
    }
}
