#![no_std]
#![doc = include_str!("../README.md")]
#![warn(missing_docs)]
#![allow(clippy::too_many_lines, clippy::module_name_repetitions)]

mod address;
pub mod adapter;
pub mod api;
pub mod audio;
pub mod bus;
pub mod constants;
mod error;
pub mod hci;
mod host;
mod mode;
pub mod processor;
pub mod storage;

#[cfg(test)]
extern crate std;
#[cfg(test)]
mod testing;

use crate::constants::{
    DEFAULT_CLASS_OF_DEVICE, DEFAULT_DISCOVERABLE_TIMEOUT, DEFAULT_INQUIRY_LENGTH, GIAC,
    MAX_AUDIO_DEVICES, MAX_DEVICE_NAME_LENGTH, MAX_PATH_LENGTH, MAX_PENDING_EVENTS,
    PERIODIC_MAX_PERIOD, PERIODIC_MIN_PERIOD, UNLIMITED_RESPONSES,
};
use bt_hci::param::ConnHandle;
use embassy_sync::{blocking_mutex::raw::CriticalSectionRawMutex, channel::Channel};
use heapless::{FnvIndexMap, String};

pub use adapter::{Adapter, AdapterProperties, Platform};
pub use address::BluetoothAddress;
pub use audio::{AudioDevice, AudioPlatform};
pub use bus::{Argument, ClientId, PendingReply, RequestId};
pub use error::{BluetoothError, Failure, LinkError};
pub use mode::{Mode, OffMode, ScanEnable};

use audio::AudioEvent;
use bus::{AgentRequestId, AgentResponse, TimerId, WatchId};
use hci::{ChannelId, IoCondition};
use storage::LinkKey;

/// Object path on the bus
pub type ObjectPath = String<MAX_PATH_LENGTH>;

/// Remote device name
pub type DeviceName = String<MAX_DEVICE_NAME_LENGTH>;

/// Event queue drained by [`processor::run`]
pub(crate) static EVENT_CHANNEL: Channel<CriticalSectionRawMutex, Event, MAX_PENDING_EVENTS> =
    Channel::new();

/// Everything a platform needs to provide to run a [`BluetoothHost`]
pub trait HostPlatform: Platform + AudioPlatform {}

impl<T: Platform + AudioPlatform> HostPlatform for T {}

/// Options for configuring an [`Adapter`]
///
/// # Examples
///
/// ```rust
/// use roostbird::{AdapterOptions, OffMode, constants};
///
/// // Power the radio down when switched off, shorter discoverable window
/// let options = AdapterOptions {
///     off_mode: OffMode::DeviceDown,
///     discoverable_timeout: 60,
///     ..AdapterOptions::default()
/// };
/// assert_eq!(options.lap, constants::GIAC);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdapterOptions {
    /// Inquiry access code used for discovery
    pub lap: [u8; 3],
    /// Inquiry length in 1.28s units
    pub inquiry_length: u8,
    /// Maximum number of inquiry responses, 0 for unlimited
    pub num_responses: u8,
    /// Periodic inquiry maximum period in 1.28s units
    pub periodic_max_period: u16,
    /// Periodic inquiry minimum period in 1.28s units
    pub periodic_min_period: u16,
    /// What switching to [`Mode::Off`] does to the radio
    pub off_mode: OffMode,
    /// Discoverable timeout in seconds until a persisted value is loaded, 0 disables it
    pub discoverable_timeout: u32,
    /// Class of device advertised by the adapter
    pub class: u32,
}

impl Default for AdapterOptions {
    fn default() -> Self {
        Self {
            lap: GIAC,
            inquiry_length: DEFAULT_INQUIRY_LENGTH,
            num_responses: UNLIMITED_RESPONSES,
            periodic_max_period: PERIODIC_MAX_PERIOD,
            periodic_min_period: PERIODIC_MIN_PERIOD,
            off_mode: OffMode::NoScan,
            discoverable_timeout: DEFAULT_DISCOVERABLE_TIMEOUT,
            class: DEFAULT_CLASS_OF_DEVICE,
        }
    }
}

/// The adapter plus the audio devices registered on it
pub struct BluetoothHost {
    adapter: Adapter,
    audio_devices: FnvIndexMap<BluetoothAddress, AudioDevice, MAX_AUDIO_DEVICES>,
}

/// A method call from a bus client
#[derive(Debug)]
pub struct Request {
    /// Serial of the call
    pub id: RequestId,
    /// Caller
    pub sender: ClientId,
    /// Target object and method
    pub call: Call,
}

/// Target object and method of a [`Request`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    /// Method on the adapter object
    Adapter(AdapterMethod),
    /// Method on an audio device object
    Audio {
        /// Remote device the audio object belongs to
        device: BluetoothAddress,
        /// Method
        method: AudioMethod,
    },
}

/// Adapter methods
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdapterMethod {
    /// `GetProperties() -> dict`
    GetProperties,
    /// `GetMode() -> string`
    GetMode,
    /// `SetMode(string)`
    SetMode(Argument),
    /// `RequestMode(string)`, deferred
    RequestMode(Argument),
    /// `ReleaseMode()`
    ReleaseMode,
    /// `GetDiscoverableTimeout() -> uint32`
    GetDiscoverableTimeout,
    /// `SetDiscoverableTimeout(uint32)`
    SetDiscoverableTimeout(u32),
    /// `DiscoverDevices()`
    DiscoverDevices,
    /// `DiscoverDevicesWithoutNameResolving()`
    DiscoverDevicesWithoutNameResolving,
    /// `CancelDiscovery()`, deferred
    CancelDiscovery,
    /// `StartPeriodicDiscovery()`
    StartPeriodicDiscovery,
    /// `StopPeriodicDiscovery()`
    StopPeriodicDiscovery,
    /// `IsPeriodicDiscovery() -> bool`
    IsPeriodicDiscovery,
    /// `SetPeriodicDiscoveryNameResolving(bool)`
    SetPeriodicDiscoveryNameResolving(bool),
    /// `GetPeriodicDiscoveryNameResolving() -> bool`
    GetPeriodicDiscoveryNameResolving,
    /// `GetRemoteName(address) -> string`
    GetRemoteName(Argument),
    /// `CreateBonding(address)`, deferred
    CreateBonding(Argument),
    /// `CreatePairedDevice(address, agent, capability) -> path`, deferred
    CreatePairedDevice {
        /// Remote address
        address: Argument,
        /// Agent object path of the caller
        agent: ObjectPath,
        /// Agent IO capability
        capability: Argument,
    },
    /// `CancelBondingProcess(address)`
    CancelBondingProcess(Argument),
    /// `RemoveBonding(address)`
    RemoveBonding(Argument),
    /// `HasBonding(address) -> bool`
    HasBonding(Argument),
    /// `ListBondings() -> string[]`
    ListBondings,
    /// `DisconnectRemoteDevice(address)`, deferred
    DisconnectRemoteDevice(Argument),
    /// `SetTrusted(address)`
    SetTrusted(Argument),
    /// `IsTrusted(address) -> bool`
    IsTrusted(Argument),
    /// `RemoveTrust(address)`
    RemoveTrust(Argument),
    /// `ListTrusts() -> string[]`
    ListTrusts,
    /// `ListDevices() -> path[]`
    ListDevices,
    /// `CreateDevice(address) -> path`, deferred
    CreateDevice(Argument),
    /// `RemoveDevice(path)`
    RemoveDevice(ObjectPath),
    /// `FindDevice(address) -> path`
    FindDevice(Argument),
    /// `RegisterAgent(path, capability)`
    RegisterAgent {
        /// Agent object path
        path: ObjectPath,
        /// Agent IO capability
        capability: Argument,
    },
    /// `UnregisterAgent(path)`
    UnregisterAgent(ObjectPath),
}

/// Audio device methods
#[derive(Debug, Clone, Copy, PartialEq, Eq, defmt::Format)]
pub enum AudioMethod {
    /// `Connect()`, deferred
    Connect,
    /// `Disconnect()`, deferred
    Disconnect,
    /// `GetProperties() -> {State}`
    GetProperties,
}

/// Controller events the adapter reacts to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HciEvent {
    /// HCI device came up with the given scan state
    DeviceUp(ScanEnable),
    /// HCI device went down
    DeviceDown,
    /// An inquiry (or periodic inquiry cycle) started
    InquiryStarted,
    /// `Inquiry_Result`
    InquiryResult {
        /// Remote address
        address: BluetoothAddress,
        /// Class of device
        class: u32,
        /// Signal strength in dBm
        rssi: i8,
    },
    /// `Inquiry_Complete`, also reported when an inquiry is canceled
    InquiryComplete,
    /// `Remote_Name_Request_Complete`, also reported when a name request is canceled
    RemoteNameComplete {
        /// Remote address
        address: BluetoothAddress,
        /// HCI status
        status: u8,
        /// Resolved name, empty on failure
        name: DeviceName,
    },
    /// `Connection_Complete`
    ConnectionComplete {
        /// Remote address
        address: BluetoothAddress,
        /// Connection handle
        handle: ConnHandle,
        /// HCI status
        status: u8,
    },
    /// `Disconnection_Complete`
    DisconnectionComplete {
        /// Connection handle
        handle: ConnHandle,
        /// HCI reason
        reason: u8,
    },
    /// `PIN_Code_Request`
    PinCodeRequest(BluetoothAddress),
    /// `Link_Key_Notification`
    LinkKeyNotification {
        /// Remote address
        address: BluetoothAddress,
        /// New link key
        key: LinkKey,
    },
    /// `Authentication_Complete`
    AuthenticationComplete {
        /// Connection handle
        handle: ConnHandle,
        /// HCI status
        status: u8,
    },
}

/// Input of the single-threaded event loop
#[derive(Debug)]
pub enum Event {
    /// Method call from a client
    Request(Request),
    /// A watched client left the bus
    ClientExited(WatchId),
    /// A timer expired
    Timer(TimerId),
    /// An agent answered
    Agent {
        /// Call being answered
        request: AgentRequestId,
        /// Agent outcome
        result: Result<AgentResponse, BluetoothError>,
    },
    /// Controller event
    Hci(HciEvent),
    /// Readiness of the raw channel driving a bonding
    BondingIo {
        /// Channel
        channel: ChannelId,
        /// Watch that fired
        watch: WatchId,
        /// Reported condition
        condition: IoCondition,
    },
    /// Service discovery of a device finished
    BrowseComplete {
        /// Remote address
        device: BluetoothAddress,
        /// Outcome
        result: Result<(), BluetoothError>,
    },
    /// Sub-profile callback of an audio device
    Audio {
        /// Remote address
        device: BluetoothAddress,
        /// Callback
        event: AudioEvent,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_adapter_options_default() {
        let options = AdapterOptions::default();
        assert_eq!(options.lap, GIAC);
        assert_eq!(options.inquiry_length, 8);
        assert_eq!(options.num_responses, 0);
        assert_eq!(options.periodic_max_period, 24);
        assert_eq!(options.periodic_min_period, 16);
        assert_eq!(options.off_mode, OffMode::NoScan);
    }
}
