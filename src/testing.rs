//! Recording platform shared by the unit tests

use crate::{
    Adapter, AdapterMethod, AdapterOptions, Argument, BluetoothAddress, BluetoothError, ClientId,
    DeviceName, HciEvent, LinkError, Mode, OffMode, PendingReply, RequestId,
    audio::{AudioProfiles, SinkState},
    bus::{
        Agent, AgentRequestId, Agents, Bus, Reply, ReplyValue, Services, Signal, TimerId, Timers,
        WatchId,
    },
    constants::MAX_BONDINGS,
    hci::{ChannelId, Command, HciLink, IoInterest, RawChannels},
    storage::{DeviceStore, LinkKey, StoreError},
};
use bt_hci::param::ConnHandle;
use std::vec::Vec;

#[defmt::global_logger]
struct NullLogger;

unsafe impl defmt::Logger for NullLogger {
    fn acquire() {}
    unsafe fn flush() {}
    unsafe fn release() {}
    unsafe fn write(_bytes: &[u8]) {}
}

defmt::timestamp!("{=u32}", 0);

#[defmt::panic_handler]
fn defmt_panic() -> ! {
    panic!()
}

/// In-memory [`DeviceStore`]; the local address is ignored
#[derive(Default)]
pub struct MockStore {
    pub link_keys: Vec<BluetoothAddress>,
    pub on_mode: Option<Mode>,
    pub mode: Option<Mode>,
    pub discoverable_timeout: Option<u32>,
    pub names: Vec<(BluetoothAddress, DeviceName)>,
    pub trusts: Vec<BluetoothAddress>,
    pub deleted_profiles: Vec<BluetoothAddress>,
    pub read_only: bool,
}

impl MockStore {
    pub fn set_name(&mut self, peer: BluetoothAddress, name: &str) {
        self.names.retain(|(a, _)| *a != peer);
        self.names.push((peer, name.try_into().unwrap()));
    }

    pub fn name(&self, peer: BluetoothAddress) -> Option<DeviceName> {
        self.names
            .iter()
            .find(|(a, _)| *a == peer)
            .map(|(_, n)| n.clone())
    }

    fn check_writable(&self) -> Result<(), StoreError> {
        if self.read_only { Err(StoreError) } else { Ok(()) }
    }
}

/// Records everything the adapter and audio devices ask of their collaborators
pub struct MockPlatform {
    next_id: u32,
    pub store: MockStore,

    pub commands: Vec<Command>,
    failing: Vec<(Command, u8)>,
    default_status: u8,
    pub device_missing: bool,
    pub device_open: bool,
    pub power_changes: Vec<bool>,

    pub connect_error: Option<LinkError>,
    pub socket_error: i32,
    pub conn_handle: ConnHandle,
    pub channel_watches: Vec<(ChannelId, WatchId, IoInterest)>,
    unwatched_channels: Vec<WatchId>,
    pub closed_channels: Vec<ChannelId>,

    pub replies: Vec<Reply>,
    pub signals: Vec<Signal>,
    client_watches: Vec<(WatchId, ClientId)>,

    pub timers: Vec<(TimerId, u32)>,
    finished_timers: Vec<TimerId>,

    pub agent_unreachable: bool,
    agent_calls: Vec<(AgentRequestId, Agent)>,
    pub canceled_prompts: Vec<BluetoothAddress>,
    pub released_agents: Vec<Agent>,

    pub browsed: Vec<BluetoothAddress>,

    pub stream_setup: Result<Option<SinkState>, BluetoothError>,
    pub stream_setups: usize,
    pub sink_disconnects: usize,
    pub control_connects: usize,
    pub control_disconnects: usize,
    pub device_watches: Vec<WatchId>,
}

impl MockPlatform {
    pub fn new() -> Self {
        Self {
            next_id: 0,
            store: MockStore::default(),
            commands: Vec::new(),
            failing: Vec::new(),
            default_status: 0,
            device_missing: false,
            device_open: false,
            power_changes: Vec::new(),
            connect_error: None,
            socket_error: 0,
            conn_handle: ConnHandle::new(0),
            channel_watches: Vec::new(),
            unwatched_channels: Vec::new(),
            closed_channels: Vec::new(),
            replies: Vec::new(),
            signals: Vec::new(),
            client_watches: Vec::new(),
            timers: Vec::new(),
            finished_timers: Vec::new(),
            agent_unreachable: false,
            agent_calls: Vec::new(),
            canceled_prompts: Vec::new(),
            released_agents: Vec::new(),
            browsed: Vec::new(),
            stream_setup: Ok(None),
            stream_setups: 0,
            sink_disconnects: 0,
            control_connects: 0,
            control_disconnects: 0,
            device_watches: Vec::new(),
        }
    }

    /// A down adapter at `00:AA:BB:CC:DD:EE` with default options
    pub fn adapter() -> Adapter {
        Adapter::new(
            BluetoothAddress::new([0x00, 0xAA, 0xBB, 0xCC, 0xDD, 0xEE]),
            0,
            AdapterOptions::default(),
        )
    }

    pub fn up_adapter(p: &mut Self, mode: Mode) -> Adapter {
        Self::up_adapter_with(p, mode, OffMode::NoScan)
    }

    /// An adapter reported up with the scan state of `mode`
    pub fn up_adapter_with(p: &mut Self, mode: Mode, off_mode: OffMode) -> Adapter {
        let mut adapter = Adapter::new(
            BluetoothAddress::new([0x00, 0xAA, 0xBB, 0xCC, 0xDD, 0xEE]),
            0,
            AdapterOptions {
                off_mode,
                ..AdapterOptions::default()
            },
        );
        adapter.handle_hci_event(p, HciEvent::DeviceUp(mode.scan_enable()));
        adapter
    }

    /// Register `/agent` owned by `owner`, swallowing the reply
    pub fn register_agent(&mut self, adapter: &mut Adapter, owner: &str) {
        adapter.handle_request(
            self,
            PendingReply::new(RequestId(0), client(owner)),
            AdapterMethod::RegisterAgent {
                path: "/agent".try_into().unwrap(),
                capability: Argument::new(),
            },
        );
        assert_eq!(self.take_reply(0), Ok(ReplyValue::Empty));
    }

    /// Remove and return the reply to request `id`
    pub fn take_reply(&mut self, id: u32) -> Result<ReplyValue, BluetoothError> {
        let index = self
            .replies
            .iter()
            .position(|r| r.request == RequestId(id))
            .unwrap_or_else(|| panic!("no reply to request {id}"));
        self.replies.remove(index).result
    }

    pub fn fail_command(&mut self, command: Command, status: u8) {
        self.failing.push((command, status));
    }

    pub fn fail_all_commands(&mut self, status: u8) {
        self.default_status = status;
    }

    pub fn active_client_watches(&self, client: &ClientId) -> usize {
        self.client_watches.iter().filter(|(_, c)| c == client).count()
    }

    pub fn client_watch(&self, client: &ClientId) -> Option<WatchId> {
        self.client_watches
            .iter()
            .rev()
            .find(|(_, c)| c == client)
            .map(|(w, _)| *w)
    }

    pub fn live_channel_watch(&self) -> Option<(ChannelId, WatchId)> {
        self.channel_watches
            .iter()
            .rev()
            .find(|(channel, watch, _)| {
                !self.unwatched_channels.contains(watch) && !self.closed_channels.contains(channel)
            })
            .map(|(channel, watch, _)| (*channel, *watch))
    }

    /// Timers neither canceled nor fired
    pub fn armed_timers(&self) -> usize {
        self.timers
            .iter()
            .filter(|(t, _)| !self.finished_timers.contains(t))
            .count()
    }

    /// Fire the most recently armed timer, returning its handle
    pub fn live_timer(&mut self) -> Option<TimerId> {
        let timer = self
            .timers
            .iter()
            .rev()
            .find(|(t, _)| !self.finished_timers.contains(t))
            .map(|(t, _)| *t)?;
        self.finished_timers.push(timer);
        Some(timer)
    }

    pub fn last_agent_call(&self) -> Option<AgentRequestId> {
        self.agent_calls.last().map(|(id, _)| *id)
    }

    /// Agent the latest call went to
    pub fn last_prompted_agent(&self) -> Option<&Agent> {
        self.agent_calls.last().map(|(_, agent)| agent)
    }

    fn next(&mut self) -> u32 {
        self.next_id += 1;
        self.next_id
    }
}

pub fn client(name: &str) -> ClientId {
    name.try_into().unwrap()
}

pub fn arg(value: &str) -> Argument {
    value.try_into().unwrap()
}

pub fn request(id: u32, sender: &str) -> PendingReply {
    PendingReply::new(RequestId(id), client(sender))
}

/// `00:11:22:33:44:<n>`
pub fn peer(n: u8) -> BluetoothAddress {
    BluetoothAddress::new([0x00, 0x11, 0x22, 0x33, 0x44, n])
}

pub fn peer_arg(n: u8) -> Argument {
    arg(peer(n).format_hex().as_str())
}

impl HciLink for MockPlatform {
    fn open_device(&mut self) -> Result<(), LinkError> {
        if self.device_missing {
            return Err(LinkError::NoDevice);
        }
        self.device_open = true;
        Ok(())
    }

    fn send_command(&mut self, command: &Command, _timeout_ms: u32) -> Result<u8, LinkError> {
        assert!(self.device_open, "command sent on a closed device");
        self.commands.push(command.clone());
        let status = self
            .failing
            .iter()
            .find(|(c, _)| c == command)
            .map_or(self.default_status, |(_, s)| *s);
        Ok(status)
    }

    fn close_device(&mut self) {
        self.device_open = false;
    }

    fn device_up(&mut self) -> Result<(), LinkError> {
        self.power_changes.push(true);
        Ok(())
    }

    fn device_down(&mut self) -> Result<(), LinkError> {
        self.power_changes.push(false);
        Ok(())
    }
}

impl RawChannels for MockPlatform {
    fn connect_raw(
        &mut self,
        _local: &BluetoothAddress,
        _peer: &BluetoothAddress,
    ) -> Result<ChannelId, LinkError> {
        match self.connect_error {
            Some(e) => Err(e),
            None => Ok(ChannelId(self.next())),
        }
    }

    fn pending_error(&mut self, _channel: ChannelId) -> Result<i32, LinkError> {
        Ok(self.socket_error)
    }

    fn connection_handle(&mut self, _channel: ChannelId) -> Result<ConnHandle, LinkError> {
        Ok(self.conn_handle)
    }

    fn watch_channel(&mut self, channel: ChannelId, interest: IoInterest) -> WatchId {
        let watch = WatchId(self.next());
        self.channel_watches.push((channel, watch, interest));
        watch
    }

    fn unwatch_channel(&mut self, watch: WatchId) {
        self.unwatched_channels.push(watch);
    }

    fn close_channel(&mut self, channel: ChannelId) {
        if !self.closed_channels.contains(&channel) {
            self.closed_channels.push(channel);
        }
    }
}

impl DeviceStore for MockStore {
    fn has_link_key(&self, _local: &BluetoothAddress, peer: &BluetoothAddress) -> bool {
        self.link_keys.contains(peer)
    }

    fn write_link_key(
        &mut self,
        _local: &BluetoothAddress,
        peer: &BluetoothAddress,
        _key: &LinkKey,
    ) -> Result<(), StoreError> {
        self.check_writable()?;
        if !self.link_keys.contains(peer) {
            self.link_keys.push(*peer);
        }
        Ok(())
    }

    fn delete_link_key(
        &mut self,
        _local: &BluetoothAddress,
        peer: &BluetoothAddress,
    ) -> Result<(), StoreError> {
        self.check_writable()?;
        self.link_keys.retain(|a| a != peer);
        Ok(())
    }

    fn link_keys(
        &self,
        _local: &BluetoothAddress,
    ) -> heapless::Vec<BluetoothAddress, MAX_BONDINGS> {
        self.link_keys.iter().copied().collect()
    }

    fn read_on_mode(&self, _local: &BluetoothAddress) -> Option<Mode> {
        self.on_mode
    }

    fn write_device_mode(
        &mut self,
        _local: &BluetoothAddress,
        mode: Mode,
    ) -> Result<(), StoreError> {
        self.check_writable()?;
        self.mode = Some(mode);
        if mode != Mode::Off {
            self.on_mode = Some(mode);
        }
        Ok(())
    }

    fn read_discoverable_timeout(&self, _local: &BluetoothAddress) -> Option<u32> {
        self.discoverable_timeout
    }

    fn write_discoverable_timeout(
        &mut self,
        _local: &BluetoothAddress,
        timeout: u32,
    ) -> Result<(), StoreError> {
        self.check_writable()?;
        self.discoverable_timeout = Some(timeout);
        Ok(())
    }

    fn read_name(&self, _local: &BluetoothAddress, peer: &BluetoothAddress) -> Option<DeviceName> {
        self.name(*peer)
    }

    fn write_name(
        &mut self,
        _local: &BluetoothAddress,
        peer: &BluetoothAddress,
        name: &str,
    ) -> Result<(), StoreError> {
        self.check_writable()?;
        self.set_name(*peer, name);
        Ok(())
    }

    fn read_trust(&self, _local: &BluetoothAddress, peer: &BluetoothAddress) -> bool {
        self.trusts.contains(peer)
    }

    fn write_trust(
        &mut self,
        _local: &BluetoothAddress,
        peer: &BluetoothAddress,
        trusted: bool,
    ) -> Result<(), StoreError> {
        self.check_writable()?;
        self.trusts.retain(|a| a != peer);
        if trusted {
            self.trusts.push(*peer);
        }
        Ok(())
    }

    fn trusts(&self, _local: &BluetoothAddress) -> heapless::Vec<BluetoothAddress, MAX_BONDINGS> {
        self.trusts.iter().copied().collect()
    }

    fn delete_profiles(
        &mut self,
        _local: &BluetoothAddress,
        peer: &BluetoothAddress,
    ) -> Result<(), StoreError> {
        self.check_writable()?;
        self.deleted_profiles.push(*peer);
        Ok(())
    }
}

impl DeviceStore for MockPlatform {
    fn has_link_key(&self, local: &BluetoothAddress, peer: &BluetoothAddress) -> bool {
        self.store.has_link_key(local, peer)
    }

    fn write_link_key(
        &mut self,
        local: &BluetoothAddress,
        peer: &BluetoothAddress,
        key: &LinkKey,
    ) -> Result<(), StoreError> {
        self.store.write_link_key(local, peer, key)
    }

    fn delete_link_key(
        &mut self,
        local: &BluetoothAddress,
        peer: &BluetoothAddress,
    ) -> Result<(), StoreError> {
        self.store.delete_link_key(local, peer)
    }

    fn link_keys(&self, local: &BluetoothAddress) -> heapless::Vec<BluetoothAddress, MAX_BONDINGS> {
        self.store.link_keys(local)
    }

    fn read_on_mode(&self, local: &BluetoothAddress) -> Option<Mode> {
        self.store.read_on_mode(local)
    }

    fn write_device_mode(
        &mut self,
        local: &BluetoothAddress,
        mode: Mode,
    ) -> Result<(), StoreError> {
        self.store.write_device_mode(local, mode)
    }

    fn read_discoverable_timeout(&self, local: &BluetoothAddress) -> Option<u32> {
        self.store.read_discoverable_timeout(local)
    }

    fn write_discoverable_timeout(
        &mut self,
        local: &BluetoothAddress,
        timeout: u32,
    ) -> Result<(), StoreError> {
        self.store.write_discoverable_timeout(local, timeout)
    }

    fn read_name(&self, local: &BluetoothAddress, peer: &BluetoothAddress) -> Option<DeviceName> {
        self.store.read_name(local, peer)
    }

    fn write_name(
        &mut self,
        local: &BluetoothAddress,
        peer: &BluetoothAddress,
        name: &str,
    ) -> Result<(), StoreError> {
        self.store.write_name(local, peer, name)
    }

    fn read_trust(&self, local: &BluetoothAddress, peer: &BluetoothAddress) -> bool {
        self.store.read_trust(local, peer)
    }

    fn write_trust(
        &mut self,
        local: &BluetoothAddress,
        peer: &BluetoothAddress,
        trusted: bool,
    ) -> Result<(), StoreError> {
        self.store.write_trust(local, peer, trusted)
    }

    fn trusts(&self, local: &BluetoothAddress) -> heapless::Vec<BluetoothAddress, MAX_BONDINGS> {
        self.store.trusts(local)
    }

    fn delete_profiles(
        &mut self,
        local: &BluetoothAddress,
        peer: &BluetoothAddress,
    ) -> Result<(), StoreError> {
        self.store.delete_profiles(local, peer)
    }
}

impl Bus for MockPlatform {
    fn send_reply(&mut self, reply: Reply) {
        assert!(
            !self.replies.iter().any(|r| r.request == reply.request),
            "request answered twice"
        );
        self.replies.push(reply);
    }

    fn emit(&mut self, signal: Signal) {
        self.signals.push(signal);
    }

    fn watch_client(&mut self, client: &ClientId) -> WatchId {
        let watch = WatchId(self.next());
        self.client_watches.push((watch, client.clone()));
        watch
    }

    fn unwatch_client(&mut self, watch: WatchId) {
        self.client_watches.retain(|(w, _)| *w != watch);
    }
}

impl Timers for MockPlatform {
    fn start_timer(&mut self, timeout_ms: u32) -> TimerId {
        let timer = TimerId(self.next());
        self.timers.push((timer, timeout_ms));
        timer
    }

    fn cancel_timer(&mut self, timer: TimerId) {
        if !self.finished_timers.contains(&timer) {
            self.finished_timers.push(timer);
        }
    }
}

impl Agents for MockPlatform {
    fn confirm_mode_change(
        &mut self,
        agent: &Agent,
        _mode: Mode,
        request: AgentRequestId,
    ) -> Result<(), BluetoothError> {
        if self.agent_unreachable {
            return Err(BluetoothError::message("Agent unreachable"));
        }
        self.agent_calls.push((request, agent.clone()));
        Ok(())
    }

    fn request_pin_code(
        &mut self,
        agent: &Agent,
        _device: &BluetoothAddress,
        request: AgentRequestId,
    ) -> Result<(), BluetoothError> {
        if self.agent_unreachable {
            return Err(BluetoothError::message("Agent unreachable"));
        }
        self.agent_calls.push((request, agent.clone()));
        Ok(())
    }

    fn cancel_agent_requests(&mut self, _agent: &Agent, device: &BluetoothAddress) {
        self.canceled_prompts.push(*device);
    }

    fn release_agent(&mut self, agent: &Agent) {
        self.released_agents.push(agent.clone());
    }
}

impl Services for MockPlatform {
    fn browse(&mut self, device: &BluetoothAddress) -> Result<(), BluetoothError> {
        self.browsed.push(*device);
        Ok(())
    }
}

impl AudioProfiles for MockPlatform {
    fn setup_stream(
        &mut self,
        _device: &BluetoothAddress,
    ) -> Result<Option<SinkState>, BluetoothError> {
        self.stream_setups += 1;
        self.stream_setup
    }

    fn disconnect_sink(&mut self, _device: &BluetoothAddress) {
        self.sink_disconnects += 1;
    }

    fn connect_control(&mut self, _device: &BluetoothAddress) {
        self.control_connects += 1;
    }

    fn disconnect_control(&mut self, _device: &BluetoothAddress) {
        self.control_disconnects += 1;
    }

    fn watch_device_disconnect(&mut self, _device: &BluetoothAddress) -> WatchId {
        let watch = WatchId(self.next());
        self.device_watches.push(watch);
        watch
    }

    fn unwatch_device_disconnect(&mut self, watch: WatchId) {
        self.device_watches.retain(|w| *w != watch);
    }
}
