use super::{Adapter, Platform, RegisteredAgent, bonding::Removal};
use crate::{
    BluetoothAddress, BluetoothError, ObjectPath, PendingReply,
    bus::{Agent, DeviceProperty, ReplyValue, Signal, TimerId, WatchId},
    constants::{
        DC_PENDING_TIMEOUT_MS, HCI_REMOTE_USER_TERMINATED, HCI_STATUS_TIMEOUT_MS, MAX_DEVICES,
    },
    hci::{self, Command},
};
use bt_hci::param::ConnHandle;
use heapless::Vec;

/// A remote device object
#[derive(Debug)]
pub struct Device {
    pub(super) address: BluetoothAddress,
    path: ObjectPath,
    /// Created for a bonding and not announced yet
    temporary: bool,
    /// Pairing agent given to `CreatePairedDevice`, watched for its owner leaving
    pub(super) agent: Option<RegisteredAgent>,
    browse: Option<PendingReply>,
}

impl Device {
    fn new(address: BluetoothAddress, adapter_path: &str, temporary: bool) -> Self {
        Self {
            address,
            path: address.device_path(adapter_path),
            temporary,
            agent: None,
            browse: None,
        }
    }

    /// Remote address
    #[must_use]
    pub fn address(&self) -> BluetoothAddress {
        self.address
    }

    /// Object path, `<adapter>/dev_XX_XX_XX_XX_XX_XX`
    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Whether the record only backs an in-flight bonding
    #[must_use]
    pub fn is_temporary(&self) -> bool {
        self.temporary
    }
}

/// `DisconnectRemoteDevice` waiting for its grace period to end
pub(super) struct PendingDisconnect {
    address: BluetoothAddress,
    handle: ConnHandle,
    pub(super) timer: TimerId,
    pub(super) reply: PendingReply,
}

fn drop_device_agent<P: Platform>(p: &mut P, registered: RegisteredAgent) {
    p.unwatch_client(registered.watch);
    p.release_agent(&registered.agent);
}

impl Adapter {
    fn device_index(&self, address: &BluetoothAddress) -> Option<usize> {
        self.devices.iter().position(|d| d.address == *address)
    }

    pub(super) fn device_path(&self, address: &BluetoothAddress) -> Option<ObjectPath> {
        self.device_index(address)
            .map(|i| self.devices[i].path.clone())
    }

    /// `ListDevices`: announced devices only
    pub(super) fn list_devices(&self) -> Vec<ObjectPath, MAX_DEVICES> {
        self.devices
            .iter()
            .filter(|d| !d.temporary)
            .map(|d| d.path.clone())
            .collect()
    }

    /// `FindDevice`
    pub(super) fn find_device(&self, address: &str) -> Result<ObjectPath, BluetoothError> {
        let address = BluetoothAddress::from_hex(address)?;
        self.device_path(&address)
            .ok_or(BluetoothError::DoesNotExist("Device does not exist"))
    }

    /// `CreateDevice`: the reply waits for service discovery
    pub(super) fn create_device<P: Platform>(
        &mut self,
        p: &mut P,
        reply: PendingReply,
        address: &str,
    ) {
        let address = match BluetoothAddress::from_hex(address) {
            Ok(address) => address,
            Err(e) => return reply.ack(p, Err(e)),
        };
        if self.device_index(&address).is_some() {
            return reply.ack(p, Err(BluetoothError::AlreadyExists("Device already exists")));
        }

        if self.devices.is_full() {
            defmt::warn!("[DEVICE] Device table full, dropping {}", address);
            return reply.ack(p, Err(BluetoothError::message("Too many devices")));
        }
        if let Err(e) = p.browse(&address) {
            defmt::warn!("[DEVICE] Browsing {} failed to start: {}", address, e);
            return reply.ack(p, Err(e));
        }

        let mut device = Device::new(address, &self.path, false);
        device.browse = Some(reply);
        // capacity checked above
        let _ = self.devices.push(device);
        defmt::info!("[DEVICE] Browsing {}", address);
    }

    pub(super) fn browse_complete<P: Platform>(
        &mut self,
        p: &mut P,
        address: BluetoothAddress,
        result: Result<(), BluetoothError>,
    ) {
        let Some(index) = self.device_index(&address) else {
            defmt::debug!("[DEVICE] Browse result for unknown device {}", address);
            return;
        };
        let Some(reply) = self.devices[index].browse.take() else {
            return;
        };

        match result {
            Ok(()) => {
                let path = self.devices[index].path.clone();
                defmt::info!("[DEVICE] Created {}", path.as_str());
                p.emit(Signal::DeviceCreated(path.clone()));
                reply.send(p, Ok(ReplyValue::Path(path)));
            }
            Err(e) => {
                defmt::warn!("[DEVICE] Browsing {} failed: {}", address, e);
                let device = self.devices.swap_remove(index);
                if let Some(registered) = device.agent {
                    drop_device_agent(p, registered);
                }
                reply.ack(p, Err(e));
            }
        }
    }

    /// `RemoveDevice`
    pub(super) fn remove_device<P: Platform>(
        &mut self,
        p: &mut P,
        path: &str,
    ) -> Result<(), BluetoothError> {
        let index = self
            .devices
            .iter()
            .position(|d| d.path.eq_ignore_ascii_case(path))
            .ok_or(BluetoothError::DoesNotExist("Device does not exist"))?;
        self.retire_device(p, index);
        Ok(())
    }

    /// Drop a device record with its profiles and bonding
    fn retire_device<P: Platform>(&mut self, p: &mut P, index: usize) {
        let address = self.devices[index].address;
        if let Err(e) = p.delete_profiles(&self.address, &address) {
            defmt::warn!("[DEVICE] Deleting profiles of {} failed: {}", address, e);
        }
        if let Err(e) = self.remove_bonding(p, &address, Removal::Silent) {
            defmt::warn!("[DEVICE] Removing bonding of {} failed: {}", address, e);
        }

        let Some(index) = self.device_index(&address) else {
            return;
        };
        let device = self.devices.swap_remove(index);
        if !device.temporary {
            p.emit(Signal::DeviceRemoved(device.path.clone()));
        }
        if let Some(registered) = device.agent {
            drop_device_agent(p, registered);
        }
        if let Some(reply) = device.browse {
            reply.ack(p, Err(BluetoothError::message("Device removed")));
        }
        defmt::info!("[DEVICE] Removed {}", device.path.as_str());
    }

    /// Look up or create the bonding's device record and hand it `agent`
    pub(super) fn attach_device_agent<P: Platform>(
        &mut self,
        p: &mut P,
        address: BluetoothAddress,
        agent: Agent,
    ) -> Result<(), BluetoothError> {
        let index = match self.device_index(&address) {
            Some(index) => index,
            None => {
                let device = Device::new(address, &self.path, true);
                self.devices
                    .push(device)
                    .map_err(|_| BluetoothError::message("Too many devices"))?;
                self.devices.len() - 1
            }
        };
        let watch = p.watch_client(&agent.owner);
        if let Some(previous) = self.devices[index]
            .agent
            .replace(RegisteredAgent { agent, watch })
        {
            drop_device_agent(p, previous);
        }
        Ok(())
    }

    pub(super) fn release_device_agent<P: Platform>(
        &mut self,
        p: &mut P,
        address: &BluetoothAddress,
    ) {
        let agent = self
            .device_index(address)
            .and_then(|i| self.devices[i].agent.take());
        if let Some(registered) = agent {
            drop_device_agent(p, registered);
        }
    }

    /// Index of the device whose agent is watched by `watch`
    pub(super) fn device_agent_index(&self, watch: WatchId) -> Option<usize> {
        self.devices
            .iter()
            .position(|d| d.agent.as_ref().is_some_and(|a| a.watch == watch))
    }

    /// The owner of a device agent left the bus
    pub(super) fn device_agent_exit<P: Platform>(&mut self, p: &mut P, index: usize) {
        let Some(registered) = self.devices[index].agent.take() else {
            return;
        };
        defmt::info!("[DEVICE] Agent of {} exited", self.devices[index].address);
        self.fail_agent_calls(p, &registered.agent.owner);
    }

    pub(super) fn remove_temporary_device<P: Platform>(
        &mut self,
        p: &mut P,
        address: &BluetoothAddress,
    ) {
        if let Some(index) = self
            .device_index(address)
            .filter(|&i| self.devices[i].temporary)
        {
            self.retire_device(p, index);
        }
    }

    /// Announce the bonding's temporary device; returns the device path
    pub(super) fn promote_device<P: Platform>(
        &mut self,
        p: &mut P,
        address: &BluetoothAddress,
    ) -> Option<ObjectPath> {
        let index = self.device_index(address)?;
        let device = &mut self.devices[index];
        if device.temporary {
            device.temporary = false;
            p.emit(Signal::DeviceCreated(device.path.clone()));
        }
        Some(device.path.clone())
    }

    /// `SetTrusted` / `RemoveTrust`
    pub(super) fn set_trusted<P: Platform>(
        &mut self,
        p: &mut P,
        address: &str,
        trusted: bool,
    ) -> Result<(), BluetoothError> {
        let address = BluetoothAddress::from_hex(address)?;
        p.write_trust(&self.address, &address, trusted)?;

        p.emit(if trusted {
            Signal::TrustAdded(address)
        } else {
            Signal::TrustRemoved(address)
        });
        if let Some(path) = self.device_path(&address) {
            p.emit(Signal::DevicePropertyChanged {
                path,
                property: DeviceProperty::Trusted(trusted),
            });
        }
        Ok(())
    }

    /// `DisconnectRemoteDevice`: announce, then disconnect after a grace period
    pub(super) fn disconnect_remote_device<P: Platform>(
        &mut self,
        p: &mut P,
        reply: PendingReply,
        address: &str,
    ) {
        let checked = self.require_up().and_then(|()| {
            let address = BluetoothAddress::from_hex(address)?;
            let handle = self
                .active_conn
                .get(&address)
                .copied()
                .ok_or(BluetoothError::NotConnected)?;
            if self.pending_dc.is_some() {
                return Err(BluetoothError::InProgress("Disconnection in progress"));
            }
            Ok((address, handle))
        });
        let (address, handle) = match checked {
            Ok(target) => target,
            Err(e) => return reply.ack(p, Err(e)),
        };

        let timer = p.start_timer(DC_PENDING_TIMEOUT_MS);
        self.pending_dc = Some(PendingDisconnect {
            address,
            handle,
            timer,
            reply,
        });
        defmt::info!("[DEVICE] Disconnecting {} in {} ms", address, DC_PENDING_TIMEOUT_MS);
        p.emit(Signal::RemoteDeviceDisconnectRequested(address));
    }

    pub(super) fn pending_disconnect_expired<P: Platform>(&mut self, p: &mut P) {
        let Some(dc) = self.pending_dc.take() else {
            return;
        };
        let command = Command::Disconnect {
            handle: dc.handle,
            reason: HCI_REMOTE_USER_TERMINATED,
        };
        let result = hci::with_device(p, |p| hci::execute(p, &command, HCI_STATUS_TIMEOUT_MS));
        if let Err(e) = &result {
            defmt::error!("[DEVICE] Disconnecting {} failed: {}", dc.address, e);
        }
        dc.reply.ack(p, result);
    }

    pub(super) fn connection_complete(
        &mut self,
        address: BluetoothAddress,
        handle: ConnHandle,
        status: u8,
    ) {
        if status != 0 {
            if let Some(bonding) = self.bonding.as_mut().filter(|b| b.address == address) {
                bonding.hci_status = status;
            }
            return;
        }
        if self.active_conn.insert(address, handle).is_err() {
            defmt::warn!("[DEVICE] Connection table full, not tracking {}", address);
            return;
        }
        defmt::debug!("[DEVICE] Connected {} handle {}", address, handle.raw());
    }

    pub(super) fn disconnection_complete<P: Platform>(
        &mut self,
        p: &mut P,
        handle: ConnHandle,
        reason: u8,
    ) {
        let Some(address) = self
            .active_conn
            .iter()
            .find(|(_, h)| **h == handle)
            .map(|(address, _)| *address)
        else {
            defmt::debug!("[DEVICE] Disconnection of unknown handle {}", handle.raw());
            return;
        };
        self.active_conn.remove(&address);
        defmt::debug!("[DEVICE] Disconnected {} reason {:#x}", address, reason);

        if let Some(bonding) = self.bonding.as_mut().filter(|b| b.address == address) {
            bonding.hci_status = reason;
        }

        if self.pending_dc.as_ref().is_some_and(|dc| dc.handle == handle) {
            if let Some(dc) = self.pending_dc.take() {
                p.cancel_timer(dc.timer);
                dc.reply.ack(p, Ok(()));
            }
        }
    }
}
