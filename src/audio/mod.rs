//! Audio device coordination
//!
//! An [`AudioDevice`] aggregates the sub-profiles layered over one remote
//! device, an A2DP sink transport and an AVRCP control channel, into a single
//! linear state exposed on the bus:
//!
//! ```text
//! Disconnected -> Connecting -> Connected -> Disconnected
//! ```
//!
//! The sub-profiles themselves live behind [`AudioProfiles`]. Their state
//! changes come back as [`AudioEvent`]s and drive the aggregate state.
//!
//! ## Usage
//!
//! ```rust
//! use roostbird::audio::{AudioDevice, AudioState, Profiles};
//! use roostbird::BluetoothAddress;
//!
//! let address = BluetoothAddress::new([0x00, 0x11, 0x22, 0x33, 0x44, 0x55]);
//! let device = AudioDevice::new(address, "/hci0", Profiles::SINK_AND_CONTROL);
//! assert_eq!(device.state(), AudioState::Disconnected);
//! assert_eq!(device.path(), "/hci0/dev_00_11_22_33_44_55");
//! ```

mod device;

pub use device::AudioDevice;

use crate::{
    BluetoothAddress, BluetoothError,
    bus::{Bus, Timers, WatchId},
};

/// Aggregate state of an audio device
#[derive(Debug, Clone, Copy, PartialEq, Eq, defmt::Format)]
pub enum AudioState {
    /// No sub-profile connected
    Disconnected,
    /// Stream setup in progress
    Connecting,
    /// Sink transport connected
    Connected,
}

impl AudioState {
    /// Value of the `State` property
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
        }
    }
}

/// State of the A2DP sink sub-profile
#[derive(Debug, Clone, Copy, PartialEq, Eq, defmt::Format)]
pub enum SinkState {
    /// No transport
    Disconnected,
    /// Stream being set up
    Connecting,
    /// Stream configured
    Connected,
    /// Stream started
    Playing,
}

/// State of the AVCTP control channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, defmt::Format)]
pub enum ControlState {
    /// No channel
    Disconnected,
    /// Channel being opened
    Connecting,
    /// Channel open
    Connected,
}

/// Sub-profiles present on an audio device
#[derive(Debug, Clone, Copy, PartialEq, Eq, defmt::Format)]
pub struct Profiles {
    /// A2DP sink
    pub sink: bool,
    /// AVRCP control
    pub control: bool,
}

impl Profiles {
    /// Sink and control, the usual headphones setup
    pub const SINK_AND_CONTROL: Self = Self {
        sink: true,
        control: true,
    };
}

/// Callbacks from the sub-profiles of one audio device
#[derive(Debug, Clone, Copy, PartialEq, Eq, defmt::Format)]
pub enum AudioEvent {
    /// The sink changed state
    Sink(SinkState),
    /// The AVCTP control channel changed state
    Control(ControlState),
    /// The AVDTP signaling session connected
    SessionConnected {
        /// Whether a stream setup is already running on the session
        stream_setup_active: bool,
    },
    /// The device disconnect watch fired
    DeviceDisconnected(WatchId),
}

/// Sub-profile operations of the audio stack
pub trait AudioProfiles {
    /// Get or create the AVDTP session and start sink stream setup
    ///
    /// A sink state reached synchronously while starting is returned and
    /// applied as if reported by [`AudioEvent::Sink`].
    ///
    /// # Errors
    /// Fails when no AVDTP session can be obtained
    fn setup_stream(
        &mut self,
        device: &BluetoothAddress,
    ) -> Result<Option<SinkState>, BluetoothError>;

    /// Tear down the sink transport
    fn disconnect_sink(&mut self, device: &BluetoothAddress);

    /// Open the AVRCP control channel
    fn connect_control(&mut self, device: &BluetoothAddress);

    /// Close the AVRCP control channel
    fn disconnect_control(&mut self, device: &BluetoothAddress);

    /// Watch for the remote device disconnecting or being removed
    ///
    /// Firing queues [`AudioEvent::DeviceDisconnected`] with the returned handle.
    fn watch_device_disconnect(&mut self, device: &BluetoothAddress) -> WatchId;

    /// Remove a device disconnect watch; unknown ids are ignored
    fn unwatch_device_disconnect(&mut self, watch: WatchId);
}

/// Collaborators an [`AudioDevice`] drives
pub trait AudioPlatform: Bus + Timers + AudioProfiles {}

impl<T: Bus + Timers + AudioProfiles> AudioPlatform for T {}
