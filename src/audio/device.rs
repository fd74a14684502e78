use super::{AudioEvent, AudioPlatform, AudioState, ControlState, Profiles, SinkState};
use crate::{
    BluetoothAddress, BluetoothError, ObjectPath, PendingReply,
    bus::{ReplyValue, Signal, TimerId, WatchId},
    constants::{AVDTP_CONNECT_TIMEOUT_SECS, CONTROL_CONNECT_TIMEOUT_SECS},
};

/// Audio object of one remote device
#[derive(Debug)]
pub struct AudioDevice {
    address: BluetoothAddress,
    path: ObjectPath,
    profiles: Profiles,
    state: AudioState,
    sink_state: SinkState,
    control_state: ControlState,
    conn_req: Option<PendingReply>,
    dc_req: Option<PendingReply>,
    control_timer: Option<TimerId>,
    avdtp_timer: Option<TimerId>,
    dc_watch: Option<WatchId>,
    disconnecting: bool,
}

impl AudioDevice {
    /// Audio object for `address`, registered below `adapter_path`
    #[must_use]
    pub fn new(address: BluetoothAddress, adapter_path: &str, profiles: Profiles) -> Self {
        Self {
            address,
            path: address.device_path(adapter_path),
            profiles,
            state: AudioState::Disconnected,
            sink_state: SinkState::Disconnected,
            control_state: ControlState::Disconnected,
            conn_req: None,
            dc_req: None,
            control_timer: None,
            avdtp_timer: None,
            dc_watch: None,
            disconnecting: false,
        }
    }

    /// Remote address
    #[must_use]
    pub fn address(&self) -> BluetoothAddress {
        self.address
    }

    /// Object path
    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Aggregate state
    #[must_use]
    pub fn state(&self) -> AudioState {
        self.state
    }

    /// Last reported sink state
    #[must_use]
    pub fn sink_state(&self) -> SinkState {
        self.sink_state
    }

    /// Last reported control channel state
    #[must_use]
    pub fn control_state(&self) -> ControlState {
        self.control_state
    }

    /// `Connect()`: answered once the state resolves
    pub fn connect<P: AudioPlatform>(&mut self, p: &mut P, reply: PendingReply) {
        match self.state {
            AudioState::Connecting => {
                return reply.ack(p, Err(BluetoothError::InProgress("In Progress")));
            }
            AudioState::Connected => return reply.ack(p, Err(BluetoothError::AlreadyConnected)),
            AudioState::Disconnected => {}
        }

        if self.profiles.sink {
            match p.setup_stream(&self.address) {
                Ok(Some(sink_state)) => self.sink_changed(p, sink_state),
                Ok(None) => {}
                Err(e) => {
                    defmt::warn!("[AUDIO] Stream setup for {} failed: {}", self.address, e);
                    return reply.ack(p, Err(e));
                }
            }
        }

        if self.state != AudioState::Connecting {
            return reply.ack(p, Err(BluetoothError::ConnectFailed));
        }
        self.conn_req = Some(reply);
    }

    /// `Disconnect()`
    pub fn disconnect<P: AudioPlatform>(&mut self, p: &mut P, reply: PendingReply) {
        if self.state == AudioState::Disconnected {
            return reply.ack(p, Err(BluetoothError::NotConnected));
        }
        if self.dc_req.is_some() {
            return reply.ack(p, Ok(()));
        }

        if self.profiles.control {
            self.cancel_control_timer(p);
            p.disconnect_control(&self.address);
        }

        if self.profiles.sink && self.sink_state != SinkState::Disconnected {
            p.disconnect_sink(&self.address);
            self.dc_req = Some(reply);
        } else {
            reply.ack(p, Ok(()));
        }
    }

    /// `GetProperties()`
    pub fn get_properties<P: AudioPlatform>(&self, p: &mut P, reply: PendingReply) {
        reply.send(p, Ok(ReplyValue::AudioProperties(self.state)));
    }

    /// Apply a sub-profile callback
    pub fn handle_event<P: AudioPlatform>(&mut self, p: &mut P, event: AudioEvent) {
        match event {
            AudioEvent::Sink(state) => self.sink_changed(p, state),
            AudioEvent::Control(state) => self.control_changed(p, state),
            AudioEvent::SessionConnected {
                stream_setup_active,
            } => self.session_connected(p, stream_setup_active),
            AudioEvent::DeviceDisconnected(watch) => {
                if self.dc_watch == Some(watch) {
                    self.device_disconnected(p);
                } else {
                    defmt::debug!("[AUDIO] Stale disconnect watch {}", watch);
                }
            }
        }
    }

    /// A timer fired; returns `false` when it is not one of this device's
    pub fn handle_timer<P: AudioPlatform>(&mut self, p: &mut P, timer: TimerId) -> bool {
        if self.control_timer == Some(timer) {
            self.control_timer = None;
            if self.profiles.control {
                p.connect_control(&self.address);
            }
            true
        } else if self.avdtp_timer == Some(timer) {
            self.avdtp_timer = None;
            self.avdtp_connect(p);
            true
        } else {
            false
        }
    }

    /// Drop every resource held before the object goes away
    pub fn unregister<P: AudioPlatform>(mut self, p: &mut P) {
        self.cancel_control_timer(p);
        self.cancel_avdtp_timer(p);
        if let Some(watch) = self.dc_watch.take() {
            p.unwatch_device_disconnect(watch);
        }
        if let Some(reply) = self.conn_req.take() {
            reply.ack(p, Err(BluetoothError::ConnectFailed));
        }
        if let Some(reply) = self.dc_req.take() {
            reply.ack(p, Ok(()));
        }
        defmt::info!("[AUDIO] Unregistered {}", self.path.as_str());
    }

    fn sink_changed<P: AudioPlatform>(&mut self, p: &mut P, state: SinkState) {
        if !self.profiles.sink {
            return;
        }
        let old = core::mem::replace(&mut self.sink_state, state);
        defmt::debug!("[AUDIO] {} sink {} -> {}", self.address, old, state);

        match state {
            SinkState::Disconnected => {
                if self.profiles.control {
                    self.cancel_control_timer(p);
                    p.disconnect_control(&self.address);
                }
                self.set_state(p, AudioState::Disconnected);
            }
            SinkState::Connecting => {
                self.cancel_avdtp_timer(p);
                self.set_state(p, AudioState::Connecting);
            }
            SinkState::Connected => {
                if old != SinkState::Playing {
                    self.set_state(p, AudioState::Connected);
                }
            }
            SinkState::Playing => {}
        }
    }

    fn control_changed<P: AudioPlatform>(&mut self, p: &mut P, state: ControlState) {
        if !self.profiles.control {
            return;
        }
        self.control_state = state;

        match state {
            ControlState::Disconnected => {}
            ControlState::Connecting => self.cancel_control_timer(p),
            ControlState::Connected => {
                // remote opened control first; bring the stream up shortly
                if self.profiles.sink
                    && self.sink_state == SinkState::Disconnected
                    && self.avdtp_timer.is_none()
                {
                    self.avdtp_timer = Some(p.start_timer(AVDTP_CONNECT_TIMEOUT_SECS * 1000));
                }
            }
        }
    }

    fn session_connected<P: AudioPlatform>(&mut self, p: &mut P, stream_setup_active: bool) {
        if !self.profiles.control {
            return;
        }
        if stream_setup_active {
            if self.control_timer.is_none() {
                self.control_timer = Some(p.start_timer(CONTROL_CONNECT_TIMEOUT_SECS * 1000));
            }
        } else {
            p.connect_control(&self.address);
        }
    }

    fn avdtp_connect<P: AudioPlatform>(&mut self, p: &mut P) {
        if !self.profiles.sink || self.sink_state != SinkState::Disconnected {
            return;
        }
        match p.setup_stream(&self.address) {
            Ok(Some(state)) => self.sink_changed(p, state),
            Ok(None) => {}
            Err(e) => defmt::warn!("[AUDIO] Stream setup for {} failed: {}", self.address, e),
        }
    }

    fn device_disconnected<P: AudioPlatform>(&mut self, p: &mut P) {
        if self.state == AudioState::Disconnected || self.disconnecting {
            return;
        }
        defmt::info!("[AUDIO] {} disconnected, tearing down", self.address);
        self.disconnecting = true;

        self.cancel_control_timer(p);
        self.cancel_avdtp_timer(p);

        if self.profiles.control {
            p.disconnect_control(&self.address);
        }

        if self.profiles.sink && self.sink_state != SinkState::Disconnected {
            p.disconnect_sink(&self.address);
        } else {
            self.disconnecting = false;
        }
    }

    fn set_state<P: AudioPlatform>(&mut self, p: &mut P, state: AudioState) {
        match state {
            AudioState::Disconnected => {
                if let Some(watch) = self.dc_watch.take() {
                    p.unwatch_device_disconnect(watch);
                }
            }
            AudioState::Connecting => {
                if self.dc_watch.is_none() {
                    self.dc_watch = Some(p.watch_device_disconnect(&self.address));
                }
            }
            AudioState::Connected => {}
        }

        if self.state == state {
            defmt::debug!("[AUDIO] State change attempted from {} to {}", state, state);
            return;
        }
        defmt::info!("[AUDIO] {} {} -> {}", self.address, self.state, state);
        self.state = state;

        if state == AudioState::Disconnected {
            if let Some(reply) = self.dc_req.take() {
                reply.ack(p, Ok(()));
            }
            self.disconnecting = false;
        }

        if state != AudioState::Connecting {
            if let Some(reply) = self.conn_req.take() {
                let result = if state == AudioState::Connected {
                    Ok(())
                } else {
                    Err(BluetoothError::ConnectFailed)
                };
                reply.ack(p, result);
            }
        }

        p.emit(Signal::AudioStateChanged {
            path: self.path.clone(),
            state,
        });
    }

    fn cancel_control_timer<P: AudioPlatform>(&mut self, p: &mut P) {
        if let Some(timer) = self.control_timer.take() {
            p.cancel_timer(timer);
        }
    }

    fn cancel_avdtp_timer<P: AudioPlatform>(&mut self, p: &mut P) {
        if let Some(timer) = self.avdtp_timer.take() {
            p.cancel_timer(timer);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MockPlatform, peer, request};

    fn device(profiles: Profiles) -> AudioDevice {
        AudioDevice::new(peer(7), "/hci0", profiles)
    }

    fn state_signals(p: &MockPlatform) -> std::vec::Vec<AudioState> {
        p.signals
            .iter()
            .filter_map(|s| match s {
                Signal::AudioStateChanged { state, .. } => Some(*state),
                _ => None,
            })
            .collect()
    }

    fn connecting(p: &mut MockPlatform) -> AudioDevice {
        let mut dev = device(Profiles::SINK_AND_CONTROL);
        p.stream_setup = Ok(Some(SinkState::Connecting));
        dev.connect(p, request(1, "a"));
        dev
    }

    #[test]
    fn test_connect_resolves_on_sink_connected() {
        let mut p = MockPlatform::new();
        let mut dev = connecting(&mut p);
        assert_eq!(dev.state(), AudioState::Connecting);
        assert_eq!(p.device_watches.len(), 1);
        assert!(p.replies.is_empty());

        dev.handle_event(&mut p, AudioEvent::Sink(SinkState::Connected));

        assert_eq!(dev.state(), AudioState::Connected);
        assert_eq!(p.take_reply(1), Ok(ReplyValue::Empty));
        assert_eq!(
            state_signals(&p),
            [AudioState::Connecting, AudioState::Connected]
        );
    }

    #[test]
    fn test_connect_guards() {
        let mut p = MockPlatform::new();
        let mut dev = connecting(&mut p);

        dev.connect(&mut p, request(2, "b"));
        assert_eq!(p.take_reply(2), Err(BluetoothError::InProgress("In Progress")));

        dev.handle_event(&mut p, AudioEvent::Sink(SinkState::Connected));
        dev.connect(&mut p, request(3, "b"));
        assert_eq!(p.take_reply(3), Err(BluetoothError::AlreadyConnected));
    }

    #[test]
    fn test_connect_without_synchronous_progress_fails() {
        let mut p = MockPlatform::new();
        let mut dev = device(Profiles::SINK_AND_CONTROL);
        p.stream_setup = Ok(None);

        dev.connect(&mut p, request(1, "a"));

        assert_eq!(p.take_reply(1), Err(BluetoothError::ConnectFailed));
        assert_eq!(dev.state(), AudioState::Disconnected);
    }

    #[test]
    fn test_connect_without_session() {
        let mut p = MockPlatform::new();
        let mut dev = device(Profiles::SINK_AND_CONTROL);
        p.stream_setup = Err(BluetoothError::message("Failed to get AVDTP session"));

        dev.connect(&mut p, request(1, "a"));

        assert_eq!(
            p.take_reply(1),
            Err(BluetoothError::message("Failed to get AVDTP session"))
        );
    }

    #[test]
    fn test_connect_fails_when_sink_drops() {
        let mut p = MockPlatform::new();
        let mut dev = connecting(&mut p);

        dev.handle_event(&mut p, AudioEvent::Sink(SinkState::Disconnected));

        assert_eq!(p.take_reply(1), Err(BluetoothError::ConnectFailed));
        assert_eq!(dev.state(), AudioState::Disconnected);
        assert!(p.device_watches.is_empty());
    }

    #[test]
    fn test_disconnect_twice_is_idempotent() {
        let mut p = MockPlatform::new();
        let mut dev = connecting(&mut p);
        dev.handle_event(&mut p, AudioEvent::Sink(SinkState::Connected));

        dev.disconnect(&mut p, request(2, "a"));
        dev.disconnect(&mut p, request(3, "a"));

        assert_eq!(p.take_reply(3), Ok(ReplyValue::Empty));
        assert_eq!(p.sink_disconnects, 1);
        assert_eq!(p.control_disconnects, 1);

        dev.handle_event(&mut p, AudioEvent::Sink(SinkState::Disconnected));
        assert_eq!(p.take_reply(2), Ok(ReplyValue::Empty));
        assert_eq!(dev.state(), AudioState::Disconnected);
    }

    #[test]
    fn test_disconnect_when_disconnected() {
        let mut p = MockPlatform::new();
        let mut dev = device(Profiles::SINK_AND_CONTROL);
        dev.disconnect(&mut p, request(1, "a"));
        assert_eq!(p.take_reply(1), Err(BluetoothError::NotConnected));
    }

    #[test]
    fn test_playing_to_connected_is_not_a_transition() {
        let mut p = MockPlatform::new();
        let mut dev = connecting(&mut p);
        dev.handle_event(&mut p, AudioEvent::Sink(SinkState::Connected));
        dev.handle_event(&mut p, AudioEvent::Sink(SinkState::Playing));
        dev.handle_event(&mut p, AudioEvent::Sink(SinkState::Connected));

        assert_eq!(dev.state(), AudioState::Connected);
        assert_eq!(
            state_signals(&p),
            [AudioState::Connecting, AudioState::Connected]
        );
    }

    #[test]
    fn test_session_connected_staggers_control() {
        let mut p = MockPlatform::new();
        let mut dev = connecting(&mut p);

        dev.handle_event(
            &mut p,
            AudioEvent::SessionConnected {
                stream_setup_active: true,
            },
        );
        assert_eq!(p.control_connects, 0);
        assert_eq!(p.timers.last().map(|t| t.1), Some(2000));

        let timer = p.live_timer().unwrap();
        assert!(dev.handle_timer(&mut p, timer));
        assert_eq!(p.control_connects, 1);

        dev.handle_event(
            &mut p,
            AudioEvent::SessionConnected {
                stream_setup_active: false,
            },
        );
        assert_eq!(p.control_connects, 2);
    }

    #[test]
    fn test_control_connecting_cancels_control_timer() {
        let mut p = MockPlatform::new();
        let mut dev = connecting(&mut p);
        dev.handle_event(
            &mut p,
            AudioEvent::SessionConnected {
                stream_setup_active: true,
            },
        );

        dev.handle_event(&mut p, AudioEvent::Control(ControlState::Connecting));

        assert_eq!(p.armed_timers(), 0);
        assert_eq!(dev.control_state(), ControlState::Connecting);
    }

    #[test]
    fn test_remote_control_connect_brings_up_stream() {
        let mut p = MockPlatform::new();
        let mut dev = device(Profiles::SINK_AND_CONTROL);

        dev.handle_event(&mut p, AudioEvent::Control(ControlState::Connected));
        assert_eq!(p.timers.last().map(|t| t.1), Some(1000));

        p.stream_setup = Ok(Some(SinkState::Connecting));
        let timer = p.live_timer().unwrap();
        assert!(dev.handle_timer(&mut p, timer));

        assert_eq!(p.stream_setups, 1);
        assert_eq!(dev.state(), AudioState::Connecting);
    }

    #[test]
    fn test_device_disconnect_watch_tears_down() {
        let mut p = MockPlatform::new();
        let mut dev = connecting(&mut p);
        dev.handle_event(&mut p, AudioEvent::Sink(SinkState::Connected));
        let watch = p.device_watches[0];

        dev.handle_event(&mut p, AudioEvent::DeviceDisconnected(watch));
        dev.handle_event(&mut p, AudioEvent::DeviceDisconnected(watch));
        assert_eq!(p.sink_disconnects, 1);
        assert_eq!(p.control_disconnects, 1);

        dev.handle_event(&mut p, AudioEvent::Sink(SinkState::Disconnected));
        assert_eq!(dev.state(), AudioState::Disconnected);
        assert!(p.device_watches.is_empty());

        // a late watch callback after teardown is stale
        dev.handle_event(&mut p, AudioEvent::DeviceDisconnected(watch));
        assert_eq!(p.sink_disconnects, 1);
    }

    #[test]
    fn test_get_properties() {
        let mut p = MockPlatform::new();
        let dev = device(Profiles::SINK_AND_CONTROL);
        dev.get_properties(&mut p, request(1, "a"));
        assert_eq!(
            p.take_reply(1),
            Ok(ReplyValue::AudioProperties(AudioState::Disconnected))
        );
        assert_eq!(AudioState::Connecting.as_str(), "connecting");
    }

    #[test]
    fn test_unregister_answers_pending_connect() {
        let mut p = MockPlatform::new();
        let dev = connecting(&mut p);
        dev.unregister(&mut p);
        assert_eq!(p.take_reply(1), Err(BluetoothError::ConnectFailed));
        assert!(p.device_watches.is_empty());
    }
}
