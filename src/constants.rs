//! `Roostbird` Constants
//!
//! Limits, default values and Bluetooth-specific parameters used by the adapter
//! and audio state machines. Collection capacities feed `heapless` containers,
//! so every map capacity is a power of two.

/// Depth of the event queue feeding the processor
pub const MAX_PENDING_EVENTS: usize = 16;

/// General Inquiry Access Code (GIAC) - standard inquiry LAP
pub const GIAC: [u8; 3] = [0x33, 0x8B, 0x9E];

/// Inquiry length used for discovery, in 1.28s units (~10 seconds)
pub const DEFAULT_INQUIRY_LENGTH: u8 = 0x08;

/// Unlimited number of inquiry responses
pub const UNLIMITED_RESPONSES: u8 = 0;

/// Periodic inquiry maximum period, in 1.28s units
pub const PERIODIC_MAX_PERIOD: u16 = 24;

/// Periodic inquiry minimum period, in 1.28s units
pub const PERIODIC_MIN_PERIOD: u16 = 16;

/// Default discoverable timeout in seconds
pub const DEFAULT_DISCOVERABLE_TIMEOUT: u32 = 180;

/// Default class of device (computer, uncategorized)
pub const DEFAULT_CLASS_OF_DEVICE: u32 = 0x00_0100;

/// Limited discoverable bit in the class of device service field
pub const LIMITED_DISCOVERABLE_CLASS_BIT: u32 = 0x00_2000;

/// Timeout for commands that wait for a command complete event, in milliseconds
pub const HCI_REQUEST_TIMEOUT_MS: u32 = 1000;

/// Timeout for commands that only wait for a command status event, in milliseconds
pub const HCI_STATUS_TIMEOUT_MS: u32 = 500;

/// Grace period between a disconnect request and the HCI disconnect, in milliseconds
pub const DC_PENDING_TIMEOUT_MS: u32 = 2000;

/// Delay before AVRCP is connected after stream setup, in seconds
pub const CONTROL_CONNECT_TIMEOUT_SECS: u32 = 2;

/// Delay before the sink stream is set up after a remote control connection, in seconds
pub const AVDTP_CONNECT_TIMEOUT_SECS: u32 = 1;

/// HCI status: Authentication Failure
pub const HCI_AUTHENTICATION_FAILURE: u8 = 0x05;

/// HCI reason: Remote User Terminated Connection
pub const HCI_REMOTE_USER_TERMINATED: u8 = 0x13;

/// errno reported when a raw connection hangs up before authentication
pub const ENETDOWN: i32 = 100;

/// Maximum number of concurrent mode sessions
pub const MAX_SESSIONS: usize = 8;

/// Maximum number of outstanding agent requests
pub const MAX_AGENT_REQUESTS: usize = 8;

/// Maximum number of devices tracked while a discovery is running
pub const MAX_FOUND_DEVICES: usize = 16;

/// Maximum number of outstanding PIN code requests
pub const MAX_PIN_REQUESTS: usize = 4;

/// Maximum number of simultaneous ACL connections
pub const MAX_CONNECTIONS: usize = 8;

/// Maximum number of device records owned by the adapter
pub const MAX_DEVICES: usize = 16;

/// Maximum number of bondings or trusts reported in one listing
pub const MAX_BONDINGS: usize = 16;

/// Maximum number of registered audio devices
pub const MAX_AUDIO_DEVICES: usize = 8;

/// Maximum length of a bus client identity (unique bus name)
pub const MAX_CLIENT_ID_LENGTH: usize = 32;

/// Maximum length of an object path
pub const MAX_PATH_LENGTH: usize = 64;

/// Maximum length of a textual argument (mode names, addresses, capabilities)
pub const MAX_ARGUMENT_LENGTH: usize = 32;

/// Maximum remote name length in bytes
pub const MAX_DEVICE_NAME_LENGTH: usize = 248;

/// Maximum PIN code length in bytes
pub const MAX_PIN_LENGTH: usize = 16;

/// Link key length in bytes
pub const LINK_KEY_LENGTH: usize = 16;
