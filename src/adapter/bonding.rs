use super::{Adapter, AgentCall, AgentCallKind, Platform};
use crate::{
    BluetoothAddress, BluetoothError, ClientId, ObjectPath, PendingReply,
    bus::{Agent, AgentResponse, Argument, DeviceProperty, ReplyValue, Signal, WatchId},
    constants::{
        ENETDOWN, HCI_AUTHENTICATION_FAILURE, HCI_REMOTE_USER_TERMINATED, HCI_REQUEST_TIMEOUT_MS,
        HCI_STATUS_TIMEOUT_MS,
    },
    hci::{self, ChannelId, Command, IoCondition, IoInterest},
};
use bt_hci::param::ConnHandle;

/// The adapter's single in-flight bonding
pub(super) struct BondingRequest {
    pub(super) address: BluetoothAddress,
    reply: PendingReply,
    channel: ChannelId,
    io_watch: Option<WatchId>,
    pub(super) exit_watch: WatchId,
    handle: Option<ConnHandle>,
    auth_active: bool,
    cancel: bool,
    /// Last HCI status seen for the link, 0 when none
    pub(super) hci_status: u8,
    reply_with_path: bool,
}

pub(super) struct PendingPinRequest {
    replied: bool,
}

/// Who asked for a bonding to be removed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum Removal {
    /// A client call: every failure is reported
    Client,
    /// Device removal: best effort, nothing is reported
    Silent,
}

fn authentication_failure(hci_status: u8) -> BluetoothError {
    let status = if hci_status == 0 {
        HCI_AUTHENTICATION_FAILURE
    } else {
        hci_status
    };
    BluetoothError::AuthenticationFailed(status)
}

impl Adapter {
    /// `CreateBonding`, or `CreatePairedDevice` when `agent` is given
    pub(super) fn create_bonding<P: Platform>(
        &mut self,
        p: &mut P,
        reply: PendingReply,
        address: &str,
        agent: Option<(ObjectPath, Argument)>,
    ) {
        let channel = match self.open_bonding_channel(p, address) {
            Ok(opened) => opened,
            Err(e) => return reply.ack(p, Err(e)),
        };
        let (address, channel) = channel;

        let reply_with_path = agent.is_some();
        if let Some((path, capability)) = agent {
            let agent = Agent {
                owner: reply.sender().clone(),
                path,
                capability,
            };
            if let Err(e) = self.attach_device_agent(p, address, agent) {
                p.close_channel(channel);
                return reply.ack(p, Err(e));
            }
        }

        let io_watch = p.watch_channel(channel, IoInterest::Connect);
        let exit_watch = p.watch_client(reply.sender());
        defmt::info!(
            "[BONDING] Bonding {} for {}",
            address,
            reply.sender().as_str()
        );
        self.bonding = Some(BondingRequest {
            address,
            reply,
            channel,
            io_watch: Some(io_watch),
            exit_watch,
            handle: None,
            auth_active: false,
            cancel: false,
            hci_status: 0,
            reply_with_path,
        });
    }

    fn open_bonding_channel<P: Platform>(
        &mut self,
        p: &mut P,
        address: &str,
    ) -> Result<(BluetoothAddress, ChannelId), BluetoothError> {
        self.require_up()?;
        let address = BluetoothAddress::from_hex(address)?;

        if self.discovery.is_some() && !self.periodic_inquiry_idle() {
            return Err(BluetoothError::InProgress("Discover in progress"));
        }

        self.pending_remote_name_cancel(p);

        if self.bonding.is_some() || self.pin_reqs.contains_key(&address) {
            return Err(BluetoothError::InProgress("Bonding in progress"));
        }
        if p.has_link_key(&self.address, &address) {
            return Err(BluetoothError::AlreadyExists("Bonding already exists"));
        }

        let channel = p.connect_raw(&self.address, &address).map_err(|e| {
            defmt::warn!("[BONDING] Raw connect to {} failed: {}", address, e);
            BluetoothError::ConnectionAttemptFailed(e.errno())
        })?;
        Ok((address, channel))
    }

    /// Readiness of the bonding channel
    pub(super) fn bonding_conn_complete<P: Platform>(
        &mut self,
        p: &mut P,
        channel: ChannelId,
        watch: WatchId,
        condition: IoCondition,
    ) {
        let Some(bonding) = self.bonding.as_mut().filter(|b| b.channel == channel) else {
            defmt::debug!("[BONDING] No pending bonding on channel {}", channel);
            p.close_channel(channel);
            return;
        };
        if bonding.io_watch != Some(watch) {
            defmt::debug!("[BONDING] Stale channel watch {}", watch);
            return;
        }
        bonding.io_watch = None;

        match condition {
            IoCondition::Invalid => self.fail_bonding(p, BluetoothError::AuthenticationCanceled),
            IoCondition::Hangup | IoCondition::Error => {
                defmt::debug!("[BONDING] Hangup or error on bonding channel");
                let error = if bonding.auth_active {
                    authentication_failure(bonding.hci_status)
                } else {
                    BluetoothError::ConnectionAttemptFailed(ENETDOWN)
                };
                self.fail_bonding(p, error);
            }
            IoCondition::Writable => {
                let (auth_active, hci_status) = (bonding.auth_active, bonding.hci_status);
                match request_authentication(p, channel, auth_active, hci_status) {
                    Ok(handle) => {
                        let io_watch = p.watch_channel(channel, IoInterest::Teardown);
                        if let Some(bonding) = self.bonding.as_mut() {
                            bonding.handle = Some(handle);
                            bonding.auth_active = true;
                            bonding.io_watch = Some(io_watch);
                        }
                    }
                    Err(e) => self.fail_bonding(p, e),
                }
            }
        }
    }

    /// Answer the requester with `error` and drop the bonding
    fn fail_bonding<P: Platform>(&mut self, p: &mut P, error: BluetoothError) {
        let Some(bonding) = self.bonding.take() else {
            return;
        };
        defmt::info!("[BONDING] Bonding {} failed: {}", bonding.address, error);
        bonding.reply.ack(p, Err(error));

        if let Some(watch) = bonding.io_watch {
            p.unwatch_channel(watch);
        }
        p.close_channel(bonding.channel);
        self.remove_temporary_device(p, &bonding.address);
        p.unwatch_client(bonding.exit_watch);
    }

    /// `Authentication_Complete` for the bonding's link ends the bonding
    pub(super) fn authentication_complete<P: Platform>(
        &mut self,
        p: &mut P,
        handle: ConnHandle,
        status: u8,
    ) {
        if !self
            .bonding
            .as_ref()
            .is_some_and(|b| b.handle == Some(handle))
        {
            defmt::debug!("[BONDING] Authentication complete for unknown link {}", handle.raw());
            return;
        }
        let Some(bonding) = self.bonding.take() else {
            return;
        };
        let address = bonding.address;

        self.pin_reqs.remove(&address);
        if let Some(watch) = bonding.io_watch {
            p.unwatch_channel(watch);
        }
        p.close_channel(bonding.channel);
        p.unwatch_client(bonding.exit_watch);

        if status != 0 {
            let error = if bonding.cancel {
                BluetoothError::AuthenticationCanceled
            } else {
                BluetoothError::AuthenticationFailed(status)
            };
            defmt::info!("[BONDING] Authentication with {} failed: {}", address, error);
            self.remove_temporary_device(p, &address);
            return bonding.reply.ack(p, Err(error));
        }

        defmt::info!("[BONDING] Bonded with {}", address);
        let path = self.promote_device(p, &address);
        p.emit(Signal::BondingCreated(address));
        if let Some(path) = &path {
            p.emit(Signal::DevicePropertyChanged {
                path: path.clone(),
                property: DeviceProperty::Paired(true),
            });
        }

        let value = match path {
            Some(path) if bonding.reply_with_path => ReplyValue::Path(path),
            _ => ReplyValue::Empty,
        };
        bonding.reply.send(p, Ok(value));
    }

    /// The bonding requester left the bus
    pub(super) fn bonding_requestor_exit<P: Platform>(&mut self, p: &mut P) {
        // the requester is gone, its reply is dropped unanswered
        let Some(bonding) = self.bonding.take() else {
            return;
        };
        let address = bonding.address;
        defmt::info!("[BONDING] Requester exited before bonding {} completed", address);

        if let Some(agent) = self.agent_for(&address).cloned() {
            p.cancel_agent_requests(&agent, &address);
        }
        self.agent_calls
            .retain(|c| !matches!(c.kind, AgentCallKind::PinCode(a) if a == address));
        self.release_device_agent(p, &address);

        if let Some(pin) = self.pin_reqs.remove(&address) {
            if !pin.replied {
                pin_negative_reply(p, address);
            }
        }

        self.remove_temporary_device(p, &address);
        if let Some(watch) = bonding.io_watch {
            p.unwatch_channel(watch);
        }
        p.close_channel(bonding.channel);
    }

    /// `CancelBondingProcess`
    pub(super) fn cancel_bonding<P: Platform>(
        &mut self,
        p: &mut P,
        sender: &ClientId,
        address: &str,
    ) -> Result<(), BluetoothError> {
        self.require_up()?;
        let address = BluetoothAddress::from_hex(address)?;

        let Some(bonding) = self.bonding.as_mut().filter(|b| b.address == address) else {
            return Err(BluetoothError::NotInProgress("Bonding is not in progress"));
        };
        if bonding.reply.sender() != sender {
            return Err(BluetoothError::NotAuthorized);
        }
        bonding.cancel = true;
        let channel = bonding.channel;

        if let Some(pin) = self.pin_reqs.get(&address) {
            if pin.replied {
                p.close_channel(channel);
                return Err(BluetoothError::NotAuthorized);
            }
            hci::with_device(p, |p| {
                if let Err(e) = hci::execute(
                    p,
                    &Command::PinCodeNegativeReply(address),
                    HCI_REQUEST_TIMEOUT_MS,
                ) {
                    defmt::warn!("[BONDING] PIN negative reply for {} failed: {}", address, e);
                }
                Ok(())
            })?;
            self.pin_reqs.remove(&address);
        }

        defmt::info!("[BONDING] Bonding {} canceled", address);
        p.close_channel(channel);
        Ok(())
    }

    /// `RemoveBonding`, also used silently when a device is removed
    pub(super) fn remove_bonding<P: Platform>(
        &mut self,
        p: &mut P,
        address: &BluetoothAddress,
        removal: Removal,
    ) -> Result<(), BluetoothError> {
        let link_open = match p.open_device() {
            Ok(()) => true,
            Err(e) if removal == Removal::Silent => {
                defmt::warn!("[BONDING] Can't open device: {}", e);
                false
            }
            Err(e) => {
                defmt::error!("[BONDING] Can't open device: {}", e);
                return Err(BluetoothError::NoSuchAdapter);
            }
        };
        let result = self.forget_link_key(p, address, removal, link_open);
        if link_open {
            p.close_device();
        }

        if result? {
            defmt::info!("[BONDING] Bonding with {} removed", address);
            p.emit(Signal::BondingRemoved(*address));
            if let Some(path) = self.device_path(address) {
                p.emit(Signal::DevicePropertyChanged {
                    path,
                    property: DeviceProperty::Paired(false),
                });
            }
        }
        Ok(())
    }

    /// Returns whether a key was stored
    fn forget_link_key<P: Platform>(
        &mut self,
        p: &mut P,
        address: &BluetoothAddress,
        removal: Removal,
        link_open: bool,
    ) -> Result<bool, BluetoothError> {
        let client = removal == Removal::Client;
        let paired = p.has_link_key(&self.address, address);
        if !paired && client {
            return Err(BluetoothError::DoesNotExist("Bonding does not exist"));
        }

        if let Err(e) = p.delete_link_key(&self.address, address) {
            if client {
                return Err(e.into());
            }
            defmt::warn!("[BONDING] Deleting link key of {} failed: {}", address, e);
        }

        if !link_open {
            return Ok(paired);
        }

        if let Err(e) = hci::execute(
            p,
            &Command::DeleteStoredLinkKey(*address),
            HCI_REQUEST_TIMEOUT_MS,
        ) {
            defmt::warn!("[BONDING] Controller key delete for {} failed: {}", address, e);
        }

        if let Some(handle) = self.active_conn.get(address).copied() {
            let disconnect = Command::Disconnect {
                handle,
                reason: HCI_REMOTE_USER_TERMINATED,
            };
            if let Err(e) = hci::execute(p, &disconnect, HCI_STATUS_TIMEOUT_MS) {
                if client {
                    return Err(e);
                }
                defmt::warn!("[BONDING] Disconnecting {} failed: {}", address, e);
            }
        }
        Ok(paired)
    }

    /// `PIN_Code_Request`: ask the responsible agent, or refuse
    pub(super) fn pin_code_request<P: Platform>(&mut self, p: &mut P, address: BluetoothAddress) {
        if self
            .pin_reqs
            .insert(address, PendingPinRequest { replied: false })
            .is_err()
        {
            defmt::warn!("[BONDING] Too many PIN requests, refusing {}", address);
            return pin_negative_reply(p, address);
        }

        let Some(agent) = self.agent_for(&address).cloned() else {
            defmt::info!("[BONDING] No agent to answer PIN request of {}", address);
            self.pin_reqs.remove(&address);
            return pin_negative_reply(p, address);
        };

        let id = self.allocate_agent_request();
        let requested = if self.agent_calls.is_full() {
            Err(BluetoothError::message("Too many agent requests"))
        } else {
            p.request_pin_code(&agent, &address, id)
        };
        if let Err(e) = requested {
            defmt::warn!("[BONDING] PIN request of {} not forwarded: {}", address, e);
            self.pin_reqs.remove(&address);
            return pin_negative_reply(p, address);
        }

        // capacity checked above
        let _ = self.agent_calls.push(AgentCall {
            id,
            agent_owner: agent.owner,
            kind: AgentCallKind::PinCode(address),
        });
    }

    /// An agent answered a PIN request
    pub(super) fn pin_code_answered<P: Platform>(
        &mut self,
        p: &mut P,
        address: BluetoothAddress,
        answer: Result<AgentResponse, BluetoothError>,
    ) {
        let Some(pin) = self.pin_reqs.get_mut(&address) else {
            defmt::debug!("[BONDING] PIN answer for {} without request", address);
            return;
        };
        pin.replied = true;

        let command = match answer {
            Ok(AgentResponse::PinCode(code)) if !code.is_empty() => {
                Command::PinCodeReply(address, code)
            }
            Ok(_) => Command::PinCodeNegativeReply(address),
            Err(e) => {
                defmt::info!("[BONDING] Agent gave no PIN for {}: {}", address, e);
                Command::PinCodeNegativeReply(address)
            }
        };
        let result = hci::with_device(p, |p| hci::execute(p, &command, HCI_REQUEST_TIMEOUT_MS));
        if let Err(e) = result {
            defmt::error!("[BONDING] PIN reply for {} failed: {}", address, e);
        }
    }
}

/// Refuse a PIN request, best effort
fn pin_negative_reply<P: Platform>(p: &mut P, address: BluetoothAddress) {
    let result = hci::with_device(p, |p| {
        hci::execute(
            p,
            &Command::PinCodeNegativeReply(address),
            HCI_REQUEST_TIMEOUT_MS,
        )
    });
    if let Err(e) = result {
        defmt::warn!("[BONDING] PIN negative reply for {} failed: {}", address, e);
    }
}

/// Check the freshly connected channel and request authentication on its link
fn request_authentication<P: Platform>(
    p: &mut P,
    channel: ChannelId,
    auth_active: bool,
    hci_status: u8,
) -> Result<ConnHandle, BluetoothError> {
    let error = p.pending_error(channel).map_err(|e| {
        defmt::error!("[BONDING] Can't get socket error: {}", e);
        BluetoothError::from(e)
    })?;
    if error != 0 {
        return Err(if auth_active {
            authentication_failure(hci_status)
        } else {
            BluetoothError::ConnectionAttemptFailed(error)
        });
    }

    let handle = p.connection_handle(channel).map_err(|e| {
        defmt::error!("[BONDING] Can't get connection info: {}", e);
        BluetoothError::from(e)
    })?;
    hci::with_device(p, |p| {
        hci::execute(
            p,
            &Command::AuthenticationRequested(handle),
            HCI_STATUS_TIMEOUT_MS,
        )
    })?;
    Ok(handle)
}
