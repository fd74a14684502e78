//! Client-facing seams: replies, signals, watches, timers, agents and services
//!
//! A client request is answered through a [`PendingReply`]. The reply slot is
//! not `Clone`, and [`PendingReply::send`] consumes it, so an operation that
//! parks its caller in an `Option<PendingReply>` can only answer once: taking
//! it out of the slot is the answer.
//!
//! Asynchronous completions never call back into the adapter directly. Each
//! watch or timer is represented by a handle ([`WatchId`], [`TimerId`],
//! [`AgentRequestId`]) stored next to the state it belongs to; when it fires
//! the platform queues an [`crate::Event`] carrying the handle. A handle that
//! no longer matches anything is stale and ignored, which makes cancel-then-fire
//! races harmless.

use crate::{
    AdapterProperties, BluetoothAddress, BluetoothError, DeviceName, Mode, ObjectPath,
    audio::AudioState,
    constants::{MAX_ARGUMENT_LENGTH, MAX_BONDINGS, MAX_CLIENT_ID_LENGTH, MAX_DEVICES},
};
use heapless::{String, Vec};

/// Unique bus name of a client
pub type ClientId = String<MAX_CLIENT_ID_LENGTH>;

/// Textual method argument
pub type Argument = String<MAX_ARGUMENT_LENGTH>;

/// Bus-assigned serial of a method call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, defmt::Format)]
pub struct RequestId(pub u32);

/// Handle of a client-disconnect, device-disconnect or channel watch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, defmt::Format)]
pub struct WatchId(pub u32);

/// Handle of an armed timer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, defmt::Format)]
pub struct TimerId(pub u32);

/// Handle of an outstanding agent call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, defmt::Format)]
pub struct AgentRequestId(pub u32);

/// Successful reply payloads
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplyValue {
    /// Empty method return
    Empty,
    /// Adapter mode
    Mode(Mode),
    /// Discoverable timeout in seconds
    Timeout(u32),
    /// Boolean answer
    Bool(bool),
    /// Remote device name
    Name(DeviceName),
    /// Object path
    Path(ObjectPath),
    /// Object paths
    Paths(Vec<ObjectPath, MAX_DEVICES>),
    /// Device addresses
    Addresses(Vec<BluetoothAddress, MAX_BONDINGS>),
    /// Adapter property dictionary
    AdapterProperties(AdapterProperties),
    /// Audio device property dictionary
    AudioProperties(AudioState),
}

/// Method return or error addressed to one client
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    /// Serial of the call being answered
    pub request: RequestId,
    /// Caller
    pub destination: ClientId,
    /// Outcome
    pub result: Result<ReplyValue, BluetoothError>,
}

/// The right, and obligation, to answer one method call
#[derive(Debug)]
#[must_use = "a pending reply must be sent or parked"]
pub struct PendingReply {
    request: RequestId,
    sender: ClientId,
}

impl PendingReply {
    /// Take ownership of a call's reply slot
    pub fn new(request: RequestId, sender: ClientId) -> Self {
        Self { request, sender }
    }

    /// Caller identity
    #[must_use]
    pub fn sender(&self) -> &ClientId {
        &self.sender
    }

    /// Serial of the call
    #[must_use]
    pub fn request(&self) -> RequestId {
        self.request
    }

    /// Answer the call, consuming the slot
    pub fn send<B: Bus + ?Sized>(self, bus: &mut B, result: Result<ReplyValue, BluetoothError>) {
        if let Err(e) = &result {
            defmt::debug!(
                "[BUS] Replying {} to {}: {}",
                self.request,
                self.sender.as_str(),
                e
            );
        }
        bus.send_reply(Reply {
            request: self.request,
            destination: self.sender,
            result,
        });
    }

    /// Answer with an empty return or an error
    pub fn ack<B: Bus + ?Sized>(self, bus: &mut B, result: Result<(), BluetoothError>) {
        self.send(bus, result.map(|()| ReplyValue::Empty));
    }
}

/// Property carried by a device property-changed signal
#[derive(Debug, Clone, Copy, PartialEq, Eq, defmt::Format)]
pub enum DeviceProperty {
    /// `Paired`
    Paired(bool),
    /// `Trusted`
    Trusted(bool),
}

/// One-way notifications
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Signal {
    /// `ModeChanged`
    ModeChanged(Mode),
    /// `DiscoverableTimeoutChanged`
    DiscoverableTimeoutChanged(u32),
    /// `DiscoveryStarted`
    DiscoveryStarted,
    /// `DiscoveryCompleted`
    DiscoveryCompleted,
    /// `PeriodicDiscoveryStarted`
    PeriodicDiscoveryStarted,
    /// `PeriodicDiscoveryStopped`
    PeriodicDiscoveryStopped,
    /// `RemoteDeviceFound`
    RemoteDeviceFound {
        /// Device address
        address: BluetoothAddress,
        /// Class of device
        class: u32,
        /// Signal strength in dBm
        rssi: i8,
    },
    /// `RemoteNameUpdated`
    RemoteNameUpdated {
        /// Device address
        address: BluetoothAddress,
        /// Resolved name
        name: DeviceName,
    },
    /// `RemoteDeviceDisconnectRequested`
    RemoteDeviceDisconnectRequested(BluetoothAddress),
    /// `DeviceCreated`
    DeviceCreated(ObjectPath),
    /// `DeviceRemoved`
    DeviceRemoved(ObjectPath),
    /// `BondingCreated`
    BondingCreated(BluetoothAddress),
    /// `BondingRemoved`
    BondingRemoved(BluetoothAddress),
    /// `TrustAdded`
    TrustAdded(BluetoothAddress),
    /// `TrustRemoved`
    TrustRemoved(BluetoothAddress),
    /// `PropertyChanged` on a device object
    DevicePropertyChanged {
        /// Device object
        path: ObjectPath,
        /// New value
        property: DeviceProperty,
    },
    /// `PropertyChanged("State")` on an audio device object
    AudioStateChanged {
        /// Audio device object
        path: ObjectPath,
        /// New aggregate state
        state: AudioState,
    },
}

/// IPC bus towards clients
pub trait Bus {
    /// Deliver a method return or error
    fn send_reply(&mut self, reply: Reply);

    /// Broadcast a signal
    fn emit(&mut self, signal: Signal);

    /// Watch for `client` leaving the bus
    ///
    /// When it does, the platform queues [`crate::Event::ClientExited`] with the
    /// returned handle.
    fn watch_client(&mut self, client: &ClientId) -> WatchId;

    /// Remove a client watch; unknown ids are ignored
    fn unwatch_client(&mut self, watch: WatchId);
}

/// One-shot timers
pub trait Timers {
    /// Arm a timer; expiry queues [`crate::Event::Timer`] with the returned handle
    fn start_timer(&mut self, timeout_ms: u32) -> TimerId;

    /// Disarm a timer; unknown or fired ids are ignored
    fn cancel_timer(&mut self, timer: TimerId);
}

/// A registered agent object
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Agent {
    /// Bus name owning the agent
    pub owner: ClientId,
    /// Agent object path
    pub path: ObjectPath,
    /// Declared IO capability
    pub capability: Argument,
}

/// Answer of an agent call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AgentResponse {
    /// Mode change approved
    Confirmed,
    /// PIN code entered
    PinCode(crate::hci::PinCode),
}

/// Calls into user-facing agents
///
/// Answers come back as [`crate::Event::Agent`] with the given request id.
pub trait Agents {
    /// Ask `agent` to approve switching to `mode`
    ///
    /// # Errors
    /// Fails when the call cannot be issued
    fn confirm_mode_change(
        &mut self,
        agent: &Agent,
        mode: Mode,
        request: AgentRequestId,
    ) -> Result<(), BluetoothError>;

    /// Ask `agent` for the PIN code of `device`
    ///
    /// # Errors
    /// Fails when the call cannot be issued
    fn request_pin_code(
        &mut self,
        agent: &Agent,
        device: &BluetoothAddress,
        request: AgentRequestId,
    ) -> Result<(), BluetoothError>;

    /// Cancel any prompt `agent` shows for `device`
    fn cancel_agent_requests(&mut self, agent: &Agent, device: &BluetoothAddress);

    /// Tell `agent` it is no longer used
    fn release_agent(&mut self, agent: &Agent);
}

/// Remote service discovery
pub trait Services {
    /// Start browsing the services of `device`
    ///
    /// Completion queues [`crate::Event::BrowseComplete`].
    ///
    /// # Errors
    /// Fails when the browse cannot be started
    fn browse(&mut self, device: &BluetoothAddress) -> Result<(), BluetoothError>;
}
