//! Host core - routes every [`Event`] to the adapter or an audio device
//!
//! [`BluetoothHost`] owns the [`Adapter`] and the audio devices registered on
//! it. It is the single consumer of the event queue: requests, client exits,
//! timer expiries, agent answers, controller events and sub-profile callbacks
//! all arrive through [`BluetoothHost::handle_event`] and are applied one at a
//! time, so no state needs locking.
//!
//! ## Routing
//!
//! * Adapter method calls, client exits, agent answers, HCI events, bonding
//!   channel readiness and browse results go to the adapter.
//! * Audio method calls and sub-profile callbacks go to the audio device of
//!   the addressed remote device.
//! * Timers are offered to the adapter first, then to each audio device.
//!
//! Removing a device record through `RemoveDevice` also retires the audio
//! device registered for it.

use crate::{
    Adapter, AdapterMethod, AudioMethod, BluetoothAddress, BluetoothError, BluetoothHost, Call,
    Event, HostPlatform, Request,
    audio::{AudioDevice, Profiles},
    bus::TimerId,
};
use heapless::FnvIndexMap;

impl BluetoothHost {
    /// Host around `adapter`, with no audio devices
    #[must_use]
    pub fn new(adapter: Adapter) -> Self {
        Self {
            adapter,
            audio_devices: FnvIndexMap::new(),
        }
    }

    /// The adapter
    #[must_use]
    pub fn adapter(&self) -> &Adapter {
        &self.adapter
    }

    /// Audio device registered for `address`
    #[must_use]
    pub fn audio_device(&self, address: &BluetoothAddress) -> Option<&AudioDevice> {
        self.audio_devices.get(address)
    }

    /// Expose the audio interface on the device object of `address`
    ///
    /// # Errors
    /// [`BluetoothError::AlreadyExists`] when one is registered already, a
    /// failure when the table is full
    pub fn register_audio_device(
        &mut self,
        address: BluetoothAddress,
        profiles: Profiles,
    ) -> Result<(), BluetoothError> {
        if self.audio_devices.contains_key(&address) {
            return Err(BluetoothError::AlreadyExists("Audio device already exists"));
        }
        let device = AudioDevice::new(address, self.adapter.path(), profiles);
        defmt::info!("[AUDIO] Registered {}", device.path());
        self.audio_devices
            .insert(address, device)
            .map_err(|_| BluetoothError::message("Too many audio devices"))?;
        Ok(())
    }

    /// Remove the audio interface of `address`
    ///
    /// # Errors
    /// [`BluetoothError::DoesNotExist`] when none is registered
    pub fn unregister_audio_device<P: HostPlatform>(
        &mut self,
        p: &mut P,
        address: &BluetoothAddress,
    ) -> Result<(), BluetoothError> {
        let device = self
            .audio_devices
            .remove(address)
            .ok_or(BluetoothError::DoesNotExist("Audio device does not exist"))?;
        device.unregister(p);
        Ok(())
    }

    /// Apply one event
    pub fn handle_event<P: HostPlatform>(&mut self, p: &mut P, event: Event) {
        match event {
            Event::Request(request) => self.handle_request(p, request),
            Event::ClientExited(watch) => self.adapter.handle_client_exit(p, watch),
            Event::Timer(timer) => self.handle_timer(p, timer),
            Event::Agent { request, result } => {
                self.adapter.handle_agent_response(p, request, result);
            }
            Event::Hci(event) => self.adapter.handle_hci_event(p, event),
            Event::BondingIo {
                channel,
                watch,
                condition,
            } => self.adapter.handle_bonding_io(p, channel, watch, condition),
            Event::BrowseComplete { device, result } => {
                self.adapter.handle_browse_complete(p, device, result);
            }
            Event::Audio { device, event } => match self.audio_devices.get_mut(&device) {
                Some(audio) => audio.handle_event(p, event),
                None => defmt::debug!("[AUDIO] Event {} for unknown device {}", event, device),
            },
        }
    }

    fn handle_request<P: HostPlatform>(&mut self, p: &mut P, request: Request) {
        let reply = crate::PendingReply::new(request.id, request.sender);
        match request.call {
            Call::Adapter(AdapterMethod::RemoveDevice(path)) => {
                let removed = self
                    .adapter
                    .devices()
                    .iter()
                    .find(|d| d.path().eq_ignore_ascii_case(&path))
                    .map(crate::adapter::Device::address);
                self.adapter
                    .handle_request(p, reply, AdapterMethod::RemoveDevice(path));
                if let Some(address) = removed {
                    self.retire_audio_device(p, &address);
                }
            }
            Call::Adapter(method) => self.adapter.handle_request(p, reply, method),
            Call::Audio { device, method } => {
                let Some(audio) = self.audio_devices.get_mut(&device) else {
                    let missing = BluetoothError::DoesNotExist("Audio device does not exist");
                    return reply.ack(p, Err(missing));
                };
                match method {
                    AudioMethod::Connect => audio.connect(p, reply),
                    AudioMethod::Disconnect => audio.disconnect(p, reply),
                    AudioMethod::GetProperties => audio.get_properties(p, reply),
                }
            }
        }
    }

    fn handle_timer<P: HostPlatform>(&mut self, p: &mut P, timer: TimerId) {
        if self.adapter.handle_timer(p, timer) {
            return;
        }
        for (_, audio) in &mut self.audio_devices {
            if audio.handle_timer(p, timer) {
                return;
            }
        }
        defmt::debug!("[PROCESSOR] Stale timer {}", timer);
    }

    fn retire_audio_device<P: HostPlatform>(&mut self, p: &mut P, address: &BluetoothAddress) {
        let still_present = self.adapter.devices().iter().any(|d| d.address() == *address);
        if still_present {
            return;
        }
        if let Some(device) = self.audio_devices.remove(address) {
            device.unregister(p);
        }
    }
}
