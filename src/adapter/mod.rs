//! Adapter aggregate - mode, sessions, discovery, bonding and device registry
//!
//! One [`Adapter`] exists per radio. It owns every piece of per-adapter state
//! and is handed, together with the [`Platform`], to each entry point by
//! exclusive reference. The entry points are split by concern:
//!
//! * `mode` - `SetMode`, the mode-commit sequence, agent confirmation and the
//!   discoverable timeout
//! * `session` - `RequestMode` / `ReleaseMode` and session teardown
//! * `discovery` - standard and periodic inquiry, name resolution, cancel
//! * `bonding` - bonding over a raw channel, PIN tracking, bonding removal
//! * `device` - device records, trust, pending disconnects, connections
//!
//! ## Single-owner state
//!
//! The "at most one" rules are carried by the types: `bonding` and
//! `pending_dc` are `Option`s, a discovery is one `Option<DiscoverySession>`,
//! and every deferred caller sits in exactly one [`PendingReply`] slot.
//!
//! ## Completions
//!
//! Watches, timers and agent calls are identified by the handles the platform
//! returned when they were set up. An [`crate::Event`] carrying a handle that
//! is no longer stored anywhere is stale and dropped.

mod bonding;
mod device;
mod discovery;
mod mode;
mod session;

pub use device::Device;
pub use discovery::{DiscoveryKind, FoundDevice, NameStatus};

use crate::{
    AdapterMethod, AdapterOptions, BluetoothAddress, BluetoothError, HciEvent, Mode, ObjectPath,
    PendingReply, ScanEnable,
    bus::{
        Agent, AgentRequestId, AgentResponse, Agents, Argument, Bus, ClientId, ReplyValue,
        Services, TimerId, Timers, WatchId,
    },
    constants::{
        MAX_AGENT_REQUESTS, MAX_CONNECTIONS, MAX_DEVICES, MAX_FOUND_DEVICES, MAX_PIN_REQUESTS,
        MAX_SESSIONS,
    },
    hci::{ChannelId, HciLink, IoCondition, RawChannels},
    storage::DeviceStore,
};
use bt_hci::param::ConnHandle;
use core::fmt::Write;
use heapless::{FnvIndexMap, Vec};

/// Collaborators the adapter drives
pub trait Platform: HciLink + RawChannels + DeviceStore + Bus + Timers + Agents + Services {}

impl<T> Platform for T where
    T: HciLink + RawChannels + DeviceStore + Bus + Timers + Agents + Services
{
}

/// Adapter property dictionary
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdapterProperties {
    /// Local address
    pub address: BluetoothAddress,
    /// Current mode
    pub mode: Mode,
    /// Discoverable timeout in seconds
    pub discoverable_timeout: u32,
    /// Whether periodic discovery is running
    pub periodic_discovery: bool,
}

#[derive(Debug)]
struct RegisteredAgent {
    agent: Agent,
    watch: WatchId,
}

enum AgentCallKind {
    /// `session` when the reply belongs to a `RequestMode` holding a session
    ModeChange {
        mode: Mode,
        session: bool,
        reply: PendingReply,
    },
    PinCode(BluetoothAddress),
}

struct AgentCall {
    id: AgentRequestId,
    agent_owner: ClientId,
    kind: AgentCallKind,
}

/// One local Bluetooth adapter
pub struct Adapter {
    address: BluetoothAddress,
    dev_id: u16,
    path: ObjectPath,
    options: AdapterOptions,
    up: bool,
    mode: Mode,
    global_mode: Mode,
    scan_enable: ScanEnable,
    discoverable_timeout: u32,
    discov_timeout_id: Option<TimerId>,
    sessions: Vec<session::ModeSession, MAX_SESSIONS>,
    agent: Option<RegisteredAgent>,
    agent_calls: Vec<AgentCall, MAX_AGENT_REQUESTS>,
    next_agent_request: u32,
    discovery: Option<discovery::DiscoverySession>,
    found_devices: Vec<FoundDevice, MAX_FOUND_DEVICES>,
    pdiscov_resolve_names: bool,
    bonding: Option<bonding::BondingRequest>,
    pin_reqs: FnvIndexMap<BluetoothAddress, bonding::PendingPinRequest, MAX_PIN_REQUESTS>,
    pending_dc: Option<device::PendingDisconnect>,
    active_conn: FnvIndexMap<BluetoothAddress, ConnHandle, MAX_CONNECTIONS>,
    devices: Vec<Device, MAX_DEVICES>,
}

impl Adapter {
    /// Create the adapter for HCI device `dev_id`, initially down and off
    #[must_use]
    pub fn new(address: BluetoothAddress, dev_id: u16, options: AdapterOptions) -> Self {
        let mut path = ObjectPath::new();
        let _ = write!(path, "/hci{dev_id}");
        Self {
            address,
            dev_id,
            path,
            options,
            up: false,
            mode: Mode::Off,
            global_mode: Mode::Off,
            scan_enable: ScanEnable::DISABLED,
            discoverable_timeout: options.discoverable_timeout,
            discov_timeout_id: None,
            sessions: Vec::new(),
            agent: None,
            agent_calls: Vec::new(),
            next_agent_request: 0,
            discovery: None,
            found_devices: Vec::new(),
            pdiscov_resolve_names: true,
            bonding: None,
            pin_reqs: FnvIndexMap::new(),
            pending_dc: None,
            active_conn: FnvIndexMap::new(),
            devices: Vec::new(),
        }
    }

    /// Restore persisted adapter settings
    pub fn load_settings<S: DeviceStore + ?Sized>(&mut self, store: &S) {
        if let Some(timeout) = store.read_discoverable_timeout(&self.address) {
            self.discoverable_timeout = timeout;
        }
    }

    /// Local address
    #[must_use]
    pub fn address(&self) -> BluetoothAddress {
        self.address
    }

    /// Object path, `/hci<dev_id>`
    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Whether the HCI device is up
    #[must_use]
    pub fn is_up(&self) -> bool {
        self.up
    }

    /// Currently enacted mode
    #[must_use]
    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// Mode to fall back to once no session is held
    #[must_use]
    pub fn global_mode(&self) -> Mode {
        self.global_mode
    }

    /// Last scan-enable bits written to the controller
    #[must_use]
    pub fn scan_enable(&self) -> ScanEnable {
        self.scan_enable
    }

    /// Discoverable timeout in seconds
    #[must_use]
    pub fn discoverable_timeout(&self) -> u32 {
        self.discoverable_timeout
    }

    /// Number of held mode sessions
    #[must_use]
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Whether a bonding is in flight
    #[must_use]
    pub fn is_bonding(&self) -> bool {
        self.bonding.is_some()
    }

    /// Kind of the running discovery, if any
    #[must_use]
    pub fn discovery_kind(&self) -> Option<DiscoveryKind> {
        self.discovery.as_ref().map(|d| d.kind)
    }

    /// Devices queued for name resolution by the running discovery
    #[must_use]
    pub fn found_devices(&self) -> &[FoundDevice] {
        &self.found_devices
    }

    /// Device records, temporary ones included
    #[must_use]
    pub fn devices(&self) -> &[Device] {
        &self.devices
    }

    /// Connection handle of an active ACL link
    #[must_use]
    pub fn connection(&self, address: &BluetoothAddress) -> Option<ConnHandle> {
        self.active_conn.get(address).copied()
    }

    /// Property dictionary
    #[must_use]
    pub fn properties(&self) -> AdapterProperties {
        AdapterProperties {
            address: self.address,
            mode: self.mode,
            discoverable_timeout: self.discoverable_timeout,
            periodic_discovery: self.is_periodic_discovery(),
        }
    }

    fn require_up(&self) -> Result<(), BluetoothError> {
        if self.up {
            Ok(())
        } else {
            Err(BluetoothError::NotReady)
        }
    }

    /// Dispatch one adapter method call
    pub fn handle_request<P: Platform>(
        &mut self,
        p: &mut P,
        reply: PendingReply,
        method: AdapterMethod,
    ) {
        defmt::debug!(
            "[ADAPTER] {} from {}",
            defmt::Debug2Format(&method),
            reply.sender().as_str()
        );
        match method {
            AdapterMethod::GetProperties => {
                let properties = self.properties();
                reply.send(p, Ok(ReplyValue::AdapterProperties(properties)));
            }
            AdapterMethod::GetMode => reply.send(p, Ok(ReplyValue::Mode(self.mode))),
            AdapterMethod::SetMode(name) => self.set_mode(p, reply, &name),
            AdapterMethod::RequestMode(name) => self.request_mode(p, reply, &name),
            AdapterMethod::ReleaseMode => {
                let result = self.release_mode(p, reply.sender());
                reply.ack(p, result);
            }
            AdapterMethod::GetDiscoverableTimeout => {
                reply.send(p, Ok(ReplyValue::Timeout(self.discoverable_timeout)));
            }
            AdapterMethod::SetDiscoverableTimeout(timeout) => {
                let result = self.set_discoverable_timeout(p, timeout);
                reply.ack(p, result);
            }
            AdapterMethod::DiscoverDevices => self.discover_devices(p, reply, true),
            AdapterMethod::DiscoverDevicesWithoutNameResolving => {
                self.discover_devices(p, reply, false);
            }
            AdapterMethod::CancelDiscovery => self.cancel_discovery(p, reply),
            AdapterMethod::StartPeriodicDiscovery => self.start_periodic_discovery(p, reply),
            AdapterMethod::StopPeriodicDiscovery => {
                let result = self.stop_periodic_discovery(p);
                reply.ack(p, result);
            }
            AdapterMethod::IsPeriodicDiscovery => {
                reply.send(p, Ok(ReplyValue::Bool(self.is_periodic_discovery())));
            }
            AdapterMethod::SetPeriodicDiscoveryNameResolving(resolve) => {
                self.set_periodic_name_resolving(resolve);
                reply.ack(p, Ok(()));
            }
            AdapterMethod::GetPeriodicDiscoveryNameResolving => {
                reply.send(p, Ok(ReplyValue::Bool(self.pdiscov_resolve_names)));
            }
            AdapterMethod::GetRemoteName(address) => {
                let result = self.get_remote_name(p, &address);
                reply.send(p, result.map(ReplyValue::Name));
            }
            AdapterMethod::CreateBonding(address) => {
                self.create_bonding(p, reply, &address, None);
            }
            AdapterMethod::CreatePairedDevice {
                address,
                agent,
                capability,
            } => self.create_bonding(p, reply, &address, Some((agent, capability))),
            AdapterMethod::CancelBondingProcess(address) => {
                let result = self.cancel_bonding(p, reply.sender(), &address);
                reply.ack(p, result);
            }
            AdapterMethod::RemoveBonding(address) => {
                let result = self.require_up().and_then(|()| {
                    let address = BluetoothAddress::from_hex(&address)?;
                    self.remove_bonding(p, &address, bonding::Removal::Client)
                });
                reply.ack(p, result);
            }
            AdapterMethod::HasBonding(address) => {
                let result = BluetoothAddress::from_hex(&address)
                    .map(|address| ReplyValue::Bool(p.has_link_key(&self.address, &address)));
                reply.send(p, result);
            }
            AdapterMethod::ListBondings => {
                let bondings = p.link_keys(&self.address);
                reply.send(p, Ok(ReplyValue::Addresses(bondings)));
            }
            AdapterMethod::DisconnectRemoteDevice(address) => {
                self.disconnect_remote_device(p, reply, &address);
            }
            AdapterMethod::SetTrusted(address) => {
                let result = self.set_trusted(p, &address, true);
                reply.ack(p, result);
            }
            AdapterMethod::RemoveTrust(address) => {
                let result = self.set_trusted(p, &address, false);
                reply.ack(p, result);
            }
            AdapterMethod::IsTrusted(address) => {
                let result = BluetoothAddress::from_hex(&address)
                    .map(|address| ReplyValue::Bool(p.read_trust(&self.address, &address)));
                reply.send(p, result);
            }
            AdapterMethod::ListTrusts => {
                let trusts = p.trusts(&self.address);
                reply.send(p, Ok(ReplyValue::Addresses(trusts)));
            }
            AdapterMethod::ListDevices => {
                reply.send(p, Ok(ReplyValue::Paths(self.list_devices())));
            }
            AdapterMethod::CreateDevice(address) => self.create_device(p, reply, &address),
            AdapterMethod::RemoveDevice(path) => {
                let result = self.remove_device(p, &path);
                reply.ack(p, result);
            }
            AdapterMethod::FindDevice(address) => {
                let result = self.find_device(&address).map(ReplyValue::Path);
                reply.send(p, result);
            }
            AdapterMethod::RegisterAgent { path, capability } => {
                let result = self.register_agent(p, reply.sender(), path, capability);
                reply.ack(p, result);
            }
            AdapterMethod::UnregisterAgent(path) => {
                let result = self.unregister_agent(p, reply.sender(), &path);
                reply.ack(p, result);
            }
        }
    }

    /// React to a controller event
    pub fn handle_hci_event<P: Platform>(&mut self, p: &mut P, event: HciEvent) {
        match event {
            HciEvent::DeviceUp(scan_enable) => self.device_up(scan_enable),
            HciEvent::DeviceDown => self.device_down(p),
            HciEvent::InquiryStarted => self.inquiry_started(p),
            HciEvent::InquiryResult {
                address,
                class,
                rssi,
            } => self.inquiry_result(p, address, class, rssi),
            HciEvent::InquiryComplete => self.inquiry_complete(p),
            HciEvent::RemoteNameComplete {
                address,
                status,
                name,
            } => self.remote_name_complete(p, address, status, &name),
            HciEvent::ConnectionComplete {
                address,
                handle,
                status,
            } => self.connection_complete(address, handle, status),
            HciEvent::DisconnectionComplete { handle, reason } => {
                self.disconnection_complete(p, handle, reason);
            }
            HciEvent::PinCodeRequest(address) => self.pin_code_request(p, address),
            HciEvent::LinkKeyNotification { address, key } => {
                if let Err(e) = p.write_link_key(&self.address, &address, &key) {
                    defmt::error!("[BONDING] Storing link key for {} failed: {}", address, e);
                }
            }
            HciEvent::AuthenticationComplete { handle, status } => {
                self.authentication_complete(p, handle, status);
            }
        }
    }

    /// A watched client left the bus
    pub fn handle_client_exit<P: Platform>(&mut self, p: &mut P, watch: WatchId) {
        if self.sessions.iter().any(|s| s.watch == watch) {
            self.session_exit(p, watch);
        } else if self.discovery.as_ref().is_some_and(|d| d.watch == watch) {
            self.discovery_requestor_exit(p);
        } else if self.bonding.as_ref().is_some_and(|b| b.exit_watch == watch) {
            self.bonding_requestor_exit(p);
        } else if self.agent.as_ref().is_some_and(|a| a.watch == watch) {
            self.agent_exit(p);
        } else if let Some(index) = self.device_agent_index(watch) {
            self.device_agent_exit(p, index);
        } else {
            defmt::debug!("[ADAPTER] Stale client watch {}", watch);
        }
    }

    /// A timer fired; returns `false` when it does not belong to the adapter
    pub fn handle_timer<P: Platform>(&mut self, p: &mut P, timer: TimerId) -> bool {
        if self.discov_timeout_id == Some(timer) {
            self.discoverable_timeout_expired(p);
            true
        } else if self.pending_dc.as_ref().is_some_and(|dc| dc.timer == timer) {
            self.pending_disconnect_expired(p);
            true
        } else {
            false
        }
    }

    /// An agent answered a call the adapter made
    pub fn handle_agent_response<P: Platform>(
        &mut self,
        p: &mut P,
        request: AgentRequestId,
        result: Result<AgentResponse, BluetoothError>,
    ) {
        let Some(index) = self.agent_calls.iter().position(|c| c.id == request) else {
            defmt::debug!("[AGENT] Stale agent reply {}", request);
            return;
        };
        let call = self.agent_calls.swap_remove(index);
        match call.kind {
            AgentCallKind::ModeChange {
                mode,
                session,
                reply,
            } => {
                self.mode_change_confirmed(p, reply, mode, session, result.map(|_| ()));
            }
            AgentCallKind::PinCode(address) => self.pin_code_answered(p, address, result),
        }
    }

    /// Readiness of the raw channel driving the bonding
    pub fn handle_bonding_io<P: Platform>(
        &mut self,
        p: &mut P,
        channel: ChannelId,
        watch: WatchId,
        condition: IoCondition,
    ) {
        self.bonding_conn_complete(p, channel, watch, condition);
    }

    /// Service discovery of a device finished
    pub fn handle_browse_complete<P: Platform>(
        &mut self,
        p: &mut P,
        device: BluetoothAddress,
        result: Result<(), BluetoothError>,
    ) {
        self.browse_complete(p, device, result);
    }

    fn device_up(&mut self, scan_enable: ScanEnable) {
        defmt::info!("[ADAPTER] hci{} up, scan {:#x}", self.dev_id, scan_enable.bits());
        self.up = true;
        self.scan_enable = scan_enable;
        self.mode = scan_enable.mode(self.mode);
        if self.sessions.is_empty() {
            self.global_mode = self.mode;
        }
    }

    fn device_down<P: Platform>(&mut self, p: &mut P) {
        defmt::info!("[ADAPTER] hci{} down", self.dev_id);
        self.up = false;
        self.scan_enable = ScanEnable::DISABLED;
        if let Some(timer) = self.discov_timeout_id.take() {
            p.cancel_timer(timer);
        }
        self.finish_discovery(p);
        if let Some(dc) = self.pending_dc.take() {
            p.cancel_timer(dc.timer);
            dc.reply.ack(p, Err(BluetoothError::NotReady));
        }
        self.active_conn.clear();
        if self.mode != Mode::Off {
            self.mode = Mode::Off;
            p.emit(crate::bus::Signal::ModeChanged(Mode::Off));
        }
        if self.sessions.is_empty() {
            self.global_mode = self.mode;
        }
    }

    fn allocate_agent_request(&mut self) -> AgentRequestId {
        self.next_agent_request = self.next_agent_request.wrapping_add(1);
        AgentRequestId(self.next_agent_request)
    }

    fn register_agent<P: Platform>(
        &mut self,
        p: &mut P,
        sender: &ClientId,
        path: ObjectPath,
        capability: Argument,
    ) -> Result<(), BluetoothError> {
        if self.agent.is_some() {
            return Err(BluetoothError::AlreadyExists("Agent already exists"));
        }
        let watch = p.watch_client(sender);
        defmt::info!(
            "[AGENT] Registered {} at {}",
            sender.as_str(),
            path.as_str()
        );
        self.agent = Some(RegisteredAgent {
            agent: Agent {
                owner: sender.clone(),
                path,
                capability,
            },
            watch,
        });
        Ok(())
    }

    fn unregister_agent<P: Platform>(
        &mut self,
        p: &mut P,
        sender: &ClientId,
        path: &str,
    ) -> Result<(), BluetoothError> {
        let matches = self
            .agent
            .as_ref()
            .is_some_and(|a| a.agent.owner == *sender && a.agent.path == path);
        if !matches {
            return Err(BluetoothError::DoesNotExist("Agent does not exist"));
        }
        if let Some(registered) = self.agent.take() {
            p.unwatch_client(registered.watch);
            self.fail_agent_calls(p, &registered.agent.owner);
        }
        Ok(())
    }

    fn agent_exit<P: Platform>(&mut self, p: &mut P) {
        if let Some(registered) = self.agent.take() {
            defmt::info!("[AGENT] {} exited", registered.agent.owner.as_str());
            self.fail_agent_calls(p, &registered.agent.owner);
        }
    }

    /// Settle every call made to agents owned by `owner`
    fn fail_agent_calls<P: Platform>(&mut self, p: &mut P, owner: &ClientId) {
        let mut i = 0;
        while i < self.agent_calls.len() {
            if self.agent_calls[i].agent_owner != *owner {
                i += 1;
                continue;
            }
            let call = self.agent_calls.swap_remove(i);
            match call.kind {
                AgentCallKind::ModeChange { session, reply, .. } => {
                    if session {
                        self.remove_session(p, reply.sender());
                    }
                    reply.ack(p, Err(BluetoothError::message("Agent released")));
                }
                AgentCallKind::PinCode(address) => {
                    let released = Err(BluetoothError::message("Agent released"));
                    self.pin_code_answered(p, address, released);
                }
            }
        }
    }

    /// Agent responsible for prompts about `address`
    fn agent_for(&self, address: &BluetoothAddress) -> Option<&Agent> {
        self.devices
            .iter()
            .find(|d| d.address == *address)
            .and_then(|d| d.agent.as_ref().map(|a| &a.agent))
            .or_else(|| self.agent.as_ref().map(|a| &a.agent))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MockPlatform, client, request};

    #[test]
    fn test_new_adapter_is_down_and_off() {
        let adapter = Adapter::new(
            BluetoothAddress::new([0, 1, 2, 3, 4, 5]),
            1,
            AdapterOptions::default(),
        );
        assert_eq!(adapter.path(), "/hci1");
        assert!(!adapter.is_up());
        assert_eq!(adapter.mode(), Mode::Off);
        assert_eq!(adapter.global_mode(), Mode::Off);
    }

    #[test]
    fn test_load_settings_restores_timeout() {
        let mut p = MockPlatform::new();
        let mut adapter = MockPlatform::adapter();
        p.store.discoverable_timeout = Some(42);
        adapter.load_settings(&p);
        assert_eq!(adapter.discoverable_timeout(), 42);
    }

    #[test]
    fn test_device_up_derives_mode() {
        let mut p = MockPlatform::new();
        let mut adapter = MockPlatform::adapter();
        adapter.handle_hci_event(&mut p, HciEvent::DeviceUp(ScanEnable::PAGE_AND_INQUIRY));
        assert!(adapter.is_up());
        assert_eq!(adapter.mode(), Mode::Discoverable);
        assert_eq!(adapter.global_mode(), Mode::Discoverable);
    }

    #[test]
    fn test_get_properties() {
        let mut p = MockPlatform::new();
        let mut adapter = MockPlatform::up_adapter(&mut p, Mode::Connectable);
        adapter.handle_request(&mut p, request(1, "a"), AdapterMethod::GetProperties);
        assert_eq!(
            p.take_reply(1),
            Ok(ReplyValue::AdapterProperties(AdapterProperties {
                address: adapter.address(),
                mode: Mode::Connectable,
                discoverable_timeout: 180,
                periodic_discovery: false,
            }))
        );
    }

    #[test]
    fn test_register_agent_twice() {
        let mut p = MockPlatform::new();
        let mut adapter = MockPlatform::up_adapter(&mut p, Mode::Connectable);
        p.register_agent(&mut adapter, "agent");
        adapter.handle_request(
            &mut p,
            request(2, "other"),
            AdapterMethod::RegisterAgent {
                path: "/other".try_into().unwrap(),
                capability: Argument::new(),
            },
        );
        assert_eq!(
            p.take_reply(2),
            Err(BluetoothError::AlreadyExists("Agent already exists"))
        );
    }

    #[test]
    fn test_unregister_agent_checks_owner() {
        let mut p = MockPlatform::new();
        let mut adapter = MockPlatform::up_adapter(&mut p, Mode::Connectable);
        p.register_agent(&mut adapter, "agent");

        adapter.handle_request(
            &mut p,
            request(2, "intruder"),
            AdapterMethod::UnregisterAgent("/agent".try_into().unwrap()),
        );
        assert_eq!(
            p.take_reply(2),
            Err(BluetoothError::DoesNotExist("Agent does not exist"))
        );

        adapter.handle_request(
            &mut p,
            request(3, "agent"),
            AdapterMethod::UnregisterAgent("/agent".try_into().unwrap()),
        );
        assert_eq!(p.take_reply(3), Ok(ReplyValue::Empty));
        assert_eq!(p.active_client_watches(&client("agent")), 0);
    }

    #[test]
    fn test_stale_watch_is_ignored() {
        let mut p = MockPlatform::new();
        let mut adapter = MockPlatform::up_adapter(&mut p, Mode::Connectable);
        adapter.handle_client_exit(&mut p, WatchId(999));
        assert!(p.replies.is_empty());
        assert!(!adapter.handle_timer(&mut p, TimerId(999)));
    }
}
