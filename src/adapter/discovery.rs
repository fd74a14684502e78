use super::{Adapter, Platform};
use crate::{
    BluetoothAddress, BluetoothError, ClientId, DeviceName, PendingReply,
    bus::{Signal, WatchId},
    constants::{HCI_REQUEST_TIMEOUT_MS, HCI_STATUS_TIMEOUT_MS},
    hci::{self, Command},
};

/// Kind of a running discovery
#[derive(Debug, Clone, Copy, PartialEq, Eq, defmt::Format)]
pub enum DiscoveryKind {
    /// One-shot inquiry started by `DiscoverDevices`
    Standard,
    /// Repeating inquiry started by `StartPeriodicDiscovery`
    Periodic,
}

/// Name resolution state of a found device
#[derive(Debug, Clone, Copy, PartialEq, Eq, defmt::Format)]
pub enum NameStatus {
    /// `Remote_Name_Request` in flight
    Requested,
    /// Waiting for its turn in the resolution pass
    Required,
    /// Resolved, or served from the name cache
    Known,
    /// Resolution skipped or failed
    NotRequired,
}

/// A device seen by the running discovery
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FoundDevice {
    /// Remote address
    pub address: BluetoothAddress,
    /// Name resolution state
    pub name_status: NameStatus,
}

pub(super) struct DiscoverySession {
    pub(super) kind: DiscoveryKind,
    pub(super) requestor: ClientId,
    pub(super) watch: WatchId,
    resolve_names: bool,
    /// Periodic mode only: between two inquiry cycles
    inquiry_idle: bool,
    canceling: bool,
    cancel_reply: Option<PendingReply>,
}

impl Adapter {
    /// `DiscoverDevices` and `DiscoverDevicesWithoutNameResolving`
    pub(super) fn discover_devices<P: Platform>(
        &mut self,
        p: &mut P,
        reply: PendingReply,
        resolve_names: bool,
    ) {
        let result =
            self.start_discovery(p, reply.sender(), DiscoveryKind::Standard, resolve_names);
        reply.ack(p, result);
    }

    /// `StartPeriodicDiscovery`
    pub(super) fn start_periodic_discovery<P: Platform>(&mut self, p: &mut P, reply: PendingReply) {
        let resolve_names = self.pdiscov_resolve_names;
        let result =
            self.start_discovery(p, reply.sender(), DiscoveryKind::Periodic, resolve_names);
        reply.ack(p, result);
    }

    fn start_discovery<P: Platform>(
        &mut self,
        p: &mut P,
        requestor: &ClientId,
        kind: DiscoveryKind,
        resolve_names: bool,
    ) -> Result<(), BluetoothError> {
        self.require_up()?;
        if self.discovery.is_some() {
            return Err(BluetoothError::InProgress("Discover in progress"));
        }

        self.pending_remote_name_cancel(p);

        if self.bonding.is_some() {
            return Err(BluetoothError::InProgress("Bonding in progress"));
        }

        let options = self.options;
        let (command, timeout) = match kind {
            DiscoveryKind::Standard => (
                Command::Inquiry {
                    lap: options.lap,
                    length: options.inquiry_length,
                    num_responses: options.num_responses,
                },
                HCI_STATUS_TIMEOUT_MS,
            ),
            DiscoveryKind::Periodic => (
                Command::PeriodicInquiry {
                    lap: options.lap,
                    max_period: options.periodic_max_period,
                    min_period: options.periodic_min_period,
                    length: options.inquiry_length,
                    num_responses: options.num_responses,
                },
                HCI_REQUEST_TIMEOUT_MS,
            ),
        };
        hci::with_device(p, |p| hci::execute(p, &command, timeout))?;

        let watch = p.watch_client(requestor);
        self.found_devices.clear();
        self.discovery = Some(DiscoverySession {
            kind,
            requestor: requestor.clone(),
            watch,
            resolve_names,
            inquiry_idle: false,
            canceling: false,
            cancel_reply: None,
        });

        defmt::info!(
            "[DISCOVERY] {} discovery for {}, resolve names: {}",
            kind,
            requestor.as_str(),
            resolve_names
        );
        p.emit(match kind {
            DiscoveryKind::Standard => Signal::DiscoveryStarted,
            DiscoveryKind::Periodic => Signal::PeriodicDiscoveryStarted,
        });
        Ok(())
    }

    /// `CancelDiscovery`: the reply is held until discovery completes
    pub(super) fn cancel_discovery<P: Platform>(&mut self, p: &mut P, reply: PendingReply) {
        if let Err(e) = self.require_up() {
            return reply.ack(p, Err(e));
        }

        let authorized = self.discovery.as_ref().is_some_and(|d| {
            d.kind == DiscoveryKind::Standard && !d.canceling && d.requestor == *reply.sender()
        });
        if !authorized {
            return reply.ack(p, Err(BluetoothError::NotAuthorized));
        }

        if let Err(e) = self.stop_inquiry(p) {
            return reply.ack(p, Err(e));
        }

        if let Some(session) = self.discovery.as_mut() {
            session.canceling = true;
            session.cancel_reply = Some(reply);
        }
    }

    /// `StopPeriodicDiscovery`
    pub(super) fn stop_periodic_discovery<P: Platform>(
        &mut self,
        p: &mut P,
    ) -> Result<(), BluetoothError> {
        self.require_up()?;
        if !self.is_periodic_discovery() {
            return Err(BluetoothError::NotAuthorized);
        }
        self.stop_periodic(p)
    }

    fn stop_periodic<P: Platform>(&mut self, p: &mut P) -> Result<(), BluetoothError> {
        let pending_name = self.requested_name();
        hci::with_device(p, |p| {
            if let Some(address) = pending_name {
                hci::execute(
                    p,
                    &Command::RemoteNameRequestCancel(address),
                    HCI_REQUEST_TIMEOUT_MS,
                )?;
            }
            hci::execute(p, &Command::ExitPeriodicInquiry, HCI_REQUEST_TIMEOUT_MS)
        })?;
        self.finish_discovery(p);
        Ok(())
    }

    /// Abort the current inquiry step, or the name request that replaced it
    fn stop_inquiry<P: Platform>(&mut self, p: &mut P) -> Result<(), BluetoothError> {
        let command = match self.requested_name() {
            Some(address) => Command::RemoteNameRequestCancel(address),
            None => Command::InquiryCancel,
        };
        hci::with_device(p, |p| hci::execute(p, &command, HCI_REQUEST_TIMEOUT_MS))?;
        self.found_devices.clear();
        Ok(())
    }

    #[must_use]
    pub(super) fn is_periodic_discovery(&self) -> bool {
        self.discovery_kind() == Some(DiscoveryKind::Periodic)
    }

    /// `SetPeriodicDiscoveryNameResolving`
    pub(super) fn set_periodic_name_resolving(&mut self, resolve: bool) {
        self.pdiscov_resolve_names = resolve;
        if let Some(session) = self
            .discovery
            .as_mut()
            .filter(|d| d.kind == DiscoveryKind::Periodic)
        {
            session.resolve_names = resolve;
        }
    }

    /// Whether a periodic discovery sits between two inquiry cycles
    pub(super) fn periodic_inquiry_idle(&self) -> bool {
        self.discovery
            .as_ref()
            .is_some_and(|d| d.kind == DiscoveryKind::Periodic && d.inquiry_idle)
    }

    /// `GetRemoteName`: cached name, or queue resolution behind the running discovery
    pub(super) fn get_remote_name<P: Platform>(
        &mut self,
        p: &mut P,
        address: &str,
    ) -> Result<DeviceName, BluetoothError> {
        let address = BluetoothAddress::from_hex(address)?;
        if let Some(name) = p.read_name(&self.address, &address) {
            return Ok(name);
        }

        self.require_up()?;
        if self.discovery.is_none() {
            return Err(BluetoothError::NotAvailable);
        }

        match self.found_devices.iter_mut().find(|d| d.address == address) {
            Some(found) if found.name_status != NameStatus::Requested => {
                found.name_status = NameStatus::Required;
            }
            Some(_) => {}
            None => {
                let found = FoundDevice {
                    address,
                    name_status: NameStatus::Required,
                };
                if self.found_devices.push(found).is_err() {
                    defmt::warn!("[DISCOVERY] Found device list full, dropping {}", address);
                    return Err(BluetoothError::NotAvailable);
                }
            }
        }
        defmt::debug!("[DISCOVERY] Name of {} queued", address);
        Err(BluetoothError::RequestDeferred)
    }

    /// Cancel an in-flight `Remote_Name_Request` and forget the found devices
    pub(super) fn pending_remote_name_cancel<P: Platform>(&mut self, p: &mut P) {
        let Some(address) = self.requested_name() else {
            return;
        };
        let result = hci::with_device(p, |p| {
            hci::execute(
                p,
                &Command::RemoteNameRequestCancel(address),
                HCI_REQUEST_TIMEOUT_MS,
            )
        });
        if let Err(e) = result {
            defmt::warn!("[DISCOVERY] Remote name cancel for {} failed: {}", address, e);
        }
        self.found_devices.clear();
    }

    fn requested_name(&self) -> Option<BluetoothAddress> {
        self.found_devices
            .iter()
            .find(|d| d.name_status == NameStatus::Requested)
            .map(|d| d.address)
    }

    pub(super) fn inquiry_started<P: Platform>(&mut self, _p: &mut P) {
        if let Some(session) = self.discovery.as_mut() {
            defmt::debug!("[DISCOVERY] Inquiry cycle started");
            session.inquiry_idle = false;
        }
    }

    pub(super) fn inquiry_result<P: Platform>(
        &mut self,
        p: &mut P,
        address: BluetoothAddress,
        class: u32,
        rssi: i8,
    ) {
        p.emit(Signal::RemoteDeviceFound {
            address,
            class,
            rssi,
        });

        let Some(session) = self.discovery.as_ref() else {
            return;
        };
        if self.found_devices.iter().any(|d| d.address == address) {
            return;
        }

        let name_status = if let Some(name) = p.read_name(&self.address, &address) {
            p.emit(Signal::RemoteNameUpdated { address, name });
            NameStatus::Known
        } else if session.resolve_names {
            NameStatus::Required
        } else {
            NameStatus::NotRequired
        };

        let found = FoundDevice {
            address,
            name_status,
        };
        if self.found_devices.push(found).is_err() {
            defmt::warn!("[DISCOVERY] Found device list full, dropping {}", address);
        }
    }

    pub(super) fn inquiry_complete<P: Platform>(&mut self, p: &mut P) {
        let Some(session) = self.discovery.as_ref() else {
            return;
        };
        if session.canceling {
            return self.finish_discovery(p);
        }
        self.resolve_next_name(p);
    }

    pub(super) fn remote_name_complete<P: Platform>(
        &mut self,
        p: &mut P,
        address: BluetoothAddress,
        status: u8,
        name: &str,
    ) {
        if status == 0 {
            if let Err(e) = p.write_name(&self.address, &address, name) {
                defmt::warn!("[DISCOVERY] Caching name of {} failed: {}", address, e);
            }
            if let Ok(name) = DeviceName::try_from(name) {
                p.emit(Signal::RemoteNameUpdated { address, name });
            }
        }

        let Some(session) = self.discovery.as_ref() else {
            return;
        };
        if session.canceling {
            return self.finish_discovery(p);
        }

        if let Some(found) = self
            .found_devices
            .iter_mut()
            .find(|d| d.address == address && d.name_status == NameStatus::Requested)
        {
            found.name_status = if status == 0 {
                NameStatus::Known
            } else {
                NameStatus::NotRequired
            };
        }
        self.resolve_next_name(p);
    }

    /// Request the next required name; ends the pass when none is left
    fn resolve_next_name<P: Platform>(&mut self, p: &mut P) {
        let resolve = self.discovery.as_ref().is_some_and(|d| d.resolve_names);

        while resolve {
            let Some(found) = self
                .found_devices
                .iter_mut()
                .find(|d| d.name_status == NameStatus::Required)
            else {
                break;
            };
            let address = found.address;
            let result = hci::with_device(p, |p| {
                hci::execute(p, &Command::RemoteNameRequest(address), HCI_STATUS_TIMEOUT_MS)
            });
            match result {
                Ok(()) => {
                    found.name_status = NameStatus::Requested;
                    defmt::debug!("[DISCOVERY] Resolving name of {}", address);
                    return;
                }
                Err(e) => {
                    defmt::warn!("[DISCOVERY] Name request for {} failed: {}", address, e);
                    found.name_status = NameStatus::NotRequired;
                }
            }
        }

        match self.discovery_kind() {
            Some(DiscoveryKind::Periodic) => {
                if let Some(session) = self.discovery.as_mut() {
                    session.inquiry_idle = true;
                }
                self.found_devices.clear();
            }
            Some(DiscoveryKind::Standard) => self.finish_discovery(p),
            None => {}
        }
    }

    /// Close the discovery session, answering a held `CancelDiscovery`
    pub(super) fn finish_discovery<P: Platform>(&mut self, p: &mut P) {
        let Some(session) = self.discovery.take() else {
            return;
        };
        self.found_devices.clear();
        p.unwatch_client(session.watch);

        defmt::info!("[DISCOVERY] {} discovery finished", session.kind);
        p.emit(match session.kind {
            DiscoveryKind::Standard => Signal::DiscoveryCompleted,
            DiscoveryKind::Periodic => Signal::PeriodicDiscoveryStopped,
        });
        if let Some(reply) = session.cancel_reply {
            reply.ack(p, Ok(()));
        }
    }

    /// The discovery requestor left the bus
    pub(super) fn discovery_requestor_exit<P: Platform>(&mut self, p: &mut P) {
        let Some((kind, canceling)) = self.discovery.as_ref().map(|d| (d.kind, d.canceling)) else {
            return;
        };
        defmt::info!("[DISCOVERY] {} requestor exited", kind);

        let result = match kind {
            DiscoveryKind::Periodic => self.stop_periodic(p),
            DiscoveryKind::Standard if canceling => Ok(()),
            DiscoveryKind::Standard => {
                let result = self.stop_inquiry(p);
                if let Some(session) = self.discovery.as_mut() {
                    session.canceling = true;
                }
                result
            }
        };
        if let Err(e) = result {
            defmt::error!("[DISCOVERY] Stopping orphaned discovery failed: {}", e);
            self.finish_discovery(p);
        }
    }
}
