//! Adapter modes and the scan-enable bits they map to.

use crate::BluetoothError;

/// Adapter-wide scan/power policy, ordered by discoverability
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, defmt::Format)]
#[repr(u8)]
pub enum Mode {
    /// No scans, or radio down depending on [`OffMode`]
    Off = 0,
    /// Page scan only
    Connectable = 1,
    /// Page and inquiry scan
    Discoverable = 2,
    /// Page and inquiry scan with the limited discoverable bit set
    Limited = 3,
}

impl Mode {
    /// Bus name of the mode
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Off => "off",
            Self::Connectable => "connectable",
            Self::Discoverable => "discoverable",
            Self::Limited => "limited",
        }
    }

    /// Parse a mode name, case-insensitively
    ///
    /// `"on"` stands for the last non-off mode the adapter was in, given as
    /// `on_mode` (usually read from the store). Without one it means
    /// [`Mode::Connectable`].
    ///
    /// # Errors
    /// Returns [`BluetoothError::InvalidArguments`] for any other name
    pub fn parse(name: &str, on_mode: Option<Mode>) -> Result<Self, BluetoothError> {
        if name.eq_ignore_ascii_case("off") {
            Ok(Self::Off)
        } else if name.eq_ignore_ascii_case("connectable") {
            Ok(Self::Connectable)
        } else if name.eq_ignore_ascii_case("discoverable") {
            Ok(Self::Discoverable)
        } else if name.eq_ignore_ascii_case("limited") {
            Ok(Self::Limited)
        } else if name.eq_ignore_ascii_case("on") {
            match on_mode {
                Some(Self::Off) | None => Ok(Self::Connectable),
                Some(mode) => Ok(mode),
            }
        } else {
            Err(BluetoothError::InvalidArguments)
        }
    }

    /// Scan-enable bits enacting this mode
    #[must_use]
    pub const fn scan_enable(self) -> ScanEnable {
        match self {
            Self::Off => ScanEnable::DISABLED,
            Self::Connectable => ScanEnable::PAGE,
            Self::Discoverable | Self::Limited => ScanEnable::PAGE_AND_INQUIRY,
        }
    }

    /// Whether the adapter answers inquiries in this mode
    #[must_use]
    pub const fn is_discoverable(self) -> bool {
        matches!(self, Self::Discoverable | Self::Limited)
    }
}

/// HCI `Write_Scan_Enable` parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, defmt::Format)]
pub struct ScanEnable(u8);

impl ScanEnable {
    /// No scans enabled
    pub const DISABLED: Self = Self(0x00);
    /// Inquiry scan enabled
    pub const INQUIRY: Self = Self(0x01);
    /// Page scan enabled
    pub const PAGE: Self = Self(0x02);
    /// Page and inquiry scan enabled
    pub const PAGE_AND_INQUIRY: Self = Self(0x03);

    /// Wrap raw scan-enable bits
    #[must_use]
    pub const fn from_bits(bits: u8) -> Self {
        Self(bits & 0x03)
    }

    /// Raw scan-enable bits
    #[must_use]
    pub const fn bits(self) -> u8 {
        self.0
    }

    /// Whether all bits of `other` are set
    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Mode implied by these bits; `current` disambiguates Discoverable from Limited
    #[must_use]
    pub fn mode(self, current: Mode) -> Mode {
        if self.contains(Self::INQUIRY) {
            if current.is_discoverable() {
                current
            } else {
                Mode::Discoverable
            }
        } else if self.contains(Self::PAGE) {
            Mode::Connectable
        } else {
            Mode::Off
        }
    }
}

/// What [`Mode::Off`] does to the radio
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, defmt::Format)]
pub enum OffMode {
    /// Keep the radio up, disable scans
    #[default]
    NoScan,
    /// Power the radio down
    DeviceDown,
}
