//! Device identification
//!
//! The loader's `READ_FLASH_ID` command fills the data window with an
//! identifier block. The first four bytes, read big-endian, form the device
//! type. Only diagnostics depend on it; geometry comes from configuration.

use core::fmt;

use crate::mailbox::FLASH_ID_LEN;

/// Device type derived from the flash identifier block
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceType(pub u32);

/// Known device types and their display names
pub const KNOWN_DEVICES: &[(DeviceType, &str)] = &[
    (DeviceType(0x0117_0117), "Spansion NOR 0x01 0x17"),
    (DeviceType(0x9D16_9D16), "ISSI NOR 0x9d 0x16"),
];

impl DeviceType {
    /// Compose the device type from an identifier block
    pub fn from_id(id: &[u8; FLASH_ID_LEN]) -> Self {
        Self(u32::from_be_bytes([id[0], id[1], id[2], id[3]]))
    }

    /// Display name, if this is a known device
    pub fn name(self) -> Option<&'static str> {
        KNOWN_DEVICES
            .iter()
            .find(|(ty, _)| *ty == self)
            .map(|(_, name)| *name)
    }
}

impl fmt::Display for DeviceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:08X}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_type_is_big_endian() {
        let id = [0x01, 0x17, 0x01, 0x17, 0xAA, 0xBB, 0xCC, 0xDD];
        assert_eq!(DeviceType::from_id(&id), DeviceType(0x0117_0117));
    }

    #[test]
    fn test_known_devices() {
        assert_eq!(
            DeviceType(0x0117_0117).name(),
            Some("Spansion NOR 0x01 0x17")
        );
        assert_eq!(DeviceType(0x9D16_9D16).name(), Some("ISSI NOR 0x9d 0x16"));
        assert_eq!(DeviceType(0xEF40_1800).name(), None);
    }
}
