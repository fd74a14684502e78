use crate::{BluetoothError, ObjectPath};
use core::fmt::Write;

/// A Bluetooth Device Address (`BD_ADDR`) wrapper for type safety
///
/// Bytes are stored in display order, most significant first, so
/// `00:11:22:33:44:55` is `[0x00, 0x11, 0x22, 0x33, 0x44, 0x55]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, defmt::Format)]
pub struct BluetoothAddress(pub [u8; 6]);

const HEX_DIGITS: [char; 16] = [
    '0', '1', '2', '3', '4', '5', '6', '7', '8', '9', 'A', 'B', 'C', 'D', 'E', 'F',
];

impl BluetoothAddress {
    /// The all-zero address (`BDADDR_ANY`)
    pub const ANY: Self = Self([0; 6]);

    /// Create a new Bluetooth address from bytes
    #[must_use]
    pub const fn new(addr: [u8; 6]) -> Self {
        Self(addr)
    }

    /// Get the raw address bytes
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 6] {
        &self.0
    }

    /// Format the address as a colon-separated, upper-case hex string
    #[must_use]
    pub fn format_hex(&self) -> heapless::String<17> {
        self.format_with(':')
    }

    /// Parse a Bluetooth address from a colon-separated hex string
    ///
    /// Hex digits are accepted in either case.
    ///
    /// # Errors
    /// Returns [`BluetoothError::InvalidArguments`] if the string is not exactly
    /// six colon-separated pairs of hex digits
    pub fn from_hex(hex: &str) -> Result<Self, BluetoothError> {
        if hex.len() != 17 || !hex.chars().all(|c| c.is_ascii_hexdigit() || c == ':') {
            return Err(BluetoothError::InvalidArguments);
        }

        let mut bytes = [0u8; 6];
        let mut parts = 0;
        for (i, byte) in hex.split(':').enumerate() {
            if i >= 6 || byte.len() != 2 {
                return Err(BluetoothError::InvalidArguments);
            }
            bytes[i] =
                u8::from_str_radix(byte, 16).map_err(|_| BluetoothError::InvalidArguments)?;
            parts += 1;
        }
        if parts != 6 {
            return Err(BluetoothError::InvalidArguments);
        }
        Ok(Self(bytes))
    }

    /// Object path of the device record below `adapter_path`
    ///
    /// `/hci0` and `00:11:22:33:44:55` give `/hci0/dev_00_11_22_33_44_55`.
    #[must_use]
    pub fn device_path(&self, adapter_path: &str) -> ObjectPath {
        let mut path = ObjectPath::new();
        // 1 + 4 + 17 bytes on top of the adapter path; truncation only hits absurd adapter paths
        let _ = write!(path, "{}/dev_{}", adapter_path, self.format_with('_'));
        path
    }

    fn format_with(&self, separator: char) -> heapless::String<17> {
        let mut result = heapless::String::new();
        for (i, byte) in self.0.iter().enumerate() {
            if i > 0 {
                result.push(separator).ok();
            }
            result.push(HEX_DIGITS[(byte >> 4) as usize]).ok();
            result.push(HEX_DIGITS[(byte & 0x0F) as usize]).ok();
        }
        result
    }
}

impl core::fmt::Display for BluetoothAddress {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.format_hex())
    }
}

impl From<[u8; 6]> for BluetoothAddress {
    fn from(addr: [u8; 6]) -> Self {
        Self(addr)
    }
}

impl From<BluetoothAddress> for [u8; 6] {
    fn from(addr: BluetoothAddress) -> Self {
        addr.0
    }
}

/// HCI carries addresses least significant byte first
impl From<BluetoothAddress> for bt_hci::param::BdAddr {
    fn from(addr: BluetoothAddress) -> Self {
        let mut raw = addr.0;
        raw.reverse();
        bt_hci::param::BdAddr::new(raw)
    }
}

impl TryFrom<&str> for BluetoothAddress {
    type Error = BluetoothError;

    fn try_from(hex: &str) -> Result<Self, Self::Error> {
        BluetoothAddress::from_hex(hex)
    }
}

impl TryFrom<bt_hci::param::BdAddr> for BluetoothAddress {
    type Error = BluetoothError;

    fn try_from(bd_addr: bt_hci::param::BdAddr) -> Result<Self, Self::Error> {
        let raw = bd_addr.raw();
        if raw.len() != 6 {
            return Err(BluetoothError::InvalidArguments);
        }
        let mut addr = [0u8; 6];
        addr.copy_from_slice(raw);
        addr.reverse();
        Ok(Self(addr))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_mixed_case() {
        let upper = BluetoothAddress::from_hex("00:1A:7D:DA:71:13").unwrap();
        let lower = BluetoothAddress::from_hex("00:1a:7d:da:71:13").unwrap();
        assert_eq!(upper, lower);
        assert_eq!(upper.as_bytes(), &[0x00, 0x1A, 0x7D, 0xDA, 0x71, 0x13]);
    }

    #[test]
    fn test_parse_rejects_malformed() {
        for bad in [
            "",
            "00:11:22:33:44",
            "00:11:22:33:44:55:66",
            "00-11-22-33-44-55",
            "0011:22:33:44:55:",
            "GG:11:22:33:44:55",
            ":00:11:22:33:44:5",
        ] {
            assert_eq!(
                BluetoothAddress::from_hex(bad),
                Err(BluetoothError::InvalidArguments),
                "{bad}"
            );
        }
    }

    #[test]
    fn test_format_is_upper_case() {
        let addr = BluetoothAddress::new([0xAB, 0xCD, 0xEF, 0x01, 0x23, 0x45]);
        assert_eq!(addr.format_hex().as_str(), "AB:CD:EF:01:23:45");
        let parsed: BluetoothAddress = "ab:cd:ef:01:23:45".try_into().unwrap();
        assert_eq!(parsed, addr);
    }

    #[test]
    fn test_device_path() {
        let addr = BluetoothAddress::new([0x00, 0x11, 0x22, 0x33, 0x44, 0x55]);
        assert_eq!(
            addr.device_path("/hci0").as_str(),
            "/hci0/dev_00_11_22_33_44_55"
        );
    }

    #[test]
    fn test_bd_addr_byte_order() {
        let addr = BluetoothAddress::new([0x00, 0x11, 0x22, 0x33, 0x44, 0x55]);
        let bd_addr: bt_hci::param::BdAddr = addr.into();
        assert_eq!(bd_addr.raw(), [0x55, 0x44, 0x33, 0x22, 0x11, 0x00]);

        let back = BluetoothAddress::try_from(bd_addr).unwrap();
        assert_eq!(back, addr);
    }
}
