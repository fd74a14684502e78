use super::{Adapter, AgentCall, AgentCallKind, Platform};
use crate::{
    BluetoothError, LinkError, Mode, OffMode, PendingReply, ScanEnable,
    bus::Signal,
    constants::HCI_REQUEST_TIMEOUT_MS,
    hci::{self, Command},
};

impl Adapter {
    /// `SetMode`: adopt `name` as the baseline mode and enact it
    pub(super) fn set_mode<P: Platform>(&mut self, p: &mut P, reply: PendingReply, name: &str) {
        let on_mode = p.read_on_mode(&self.address);
        let requested = match Mode::parse(name, on_mode) {
            Ok(mode) => mode,
            Err(e) => return reply.send(p, Err(e)),
        };

        self.global_mode = requested;

        if requested == self.mode {
            return reply.ack(p, Ok(()));
        }

        if !self.sessions.is_empty() && requested < self.mode && self.agent.is_some() {
            if let Err(reply) = self.request_mode_confirmation(p, reply, requested, false) {
                reply.ack(p, Err(BluetoothError::InvalidArguments));
            }
            return;
        }

        let result = self.commit_mode(p, requested);
        self.settle_global_mode();
        reply.ack(p, result);
    }

    /// Submit a mode change to the agent; hands the reply back if that fails
    pub(super) fn request_mode_confirmation<P: Platform>(
        &mut self,
        p: &mut P,
        reply: PendingReply,
        mode: Mode,
        session: bool,
    ) -> Result<(), PendingReply> {
        let Some(agent) = self.agent.as_ref().map(|a| a.agent.clone()) else {
            return Err(reply);
        };
        if self.agent_calls.is_full() {
            defmt::warn!("[MODE] Too many outstanding agent calls");
            return Err(reply);
        }

        let id = self.allocate_agent_request();
        if let Err(e) = p.confirm_mode_change(&agent, mode, id) {
            defmt::warn!("[MODE] Agent confirmation for {} failed: {}", mode, e);
            return Err(reply);
        }

        defmt::debug!("[MODE] Waiting for agent to confirm {}", mode);
        let call = AgentCall {
            id,
            agent_owner: agent.owner,
            kind: AgentCallKind::ModeChange {
                mode,
                session,
                reply,
            },
        };
        // capacity checked above
        let _ = self.agent_calls.push(call);
        Ok(())
    }

    /// The agent answered a mode confirmation
    pub(super) fn mode_change_confirmed<P: Platform>(
        &mut self,
        p: &mut P,
        reply: PendingReply,
        mode: Mode,
        session: bool,
        verdict: Result<(), BluetoothError>,
    ) {
        if let Err(e) = verdict {
            defmt::info!("[MODE] Agent refused {}: {}", mode, e);
            if session {
                self.remove_session(p, reply.sender());
            }
            return reply.ack(p, Err(e));
        }

        let result = self.commit_mode(p, mode);
        self.settle_global_mode();
        reply.ack(p, result);
    }

    /// Drive the controller into `mode` and record it
    ///
    /// Every hardware step must succeed before `mode` changes.
    pub(super) fn commit_mode<P: Platform>(
        &mut self,
        p: &mut P,
        mode: Mode,
    ) -> Result<(), BluetoothError> {
        let scan = mode.scan_enable();
        let off_mode = self.options.off_mode;
        let class = self.options.class;

        let written = hci::with_device(p, |p| {
            if !self.up
                && (off_mode == OffMode::NoScan
                    || (off_mode == OffMode::DeviceDown && scan != ScanEnable::DISABLED))
            {
                match p.device_up() {
                    Ok(()) => {
                        defmt::info!("[MODE] hci{} brought up", self.dev_id);
                        self.up = true;
                        return Ok(None);
                    }
                    Err(LinkError::AlreadyUp) => {}
                    Err(e) => {
                        defmt::error!("[MODE] Can't init device hci{}: {}", self.dev_id, e);
                        return Err(e.into());
                    }
                }
            }

            if self.up && scan == ScanEnable::DISABLED && off_mode == OffMode::DeviceDown {
                p.device_down()?;
                defmt::info!("[MODE] hci{} brought down", self.dev_id);
                self.up = false;
                return Ok(None);
            }

            hci::execute(
                p,
                &Command::SetLimitedDiscoverable {
                    class,
                    limited: mode == Mode::Limited,
                },
                HCI_REQUEST_TIMEOUT_MS,
            )?;

            if self.scan_enable != scan {
                hci::execute(p, &Command::WriteScanEnable(scan), HCI_REQUEST_TIMEOUT_MS)?;
                return Ok(Some(scan));
            }
            Ok(None)
        })?;

        if let Some(scan) = written {
            self.scan_enable = scan;
        }
        if let Err(e) = p.write_device_mode(&self.address, mode) {
            defmt::warn!("[MODE] Persisting mode {} failed: {}", mode, e);
        }

        let previous = self.mode;
        self.mode = mode;
        if previous != mode {
            defmt::info!("[MODE] {} -> {}", previous, mode);
            p.emit(Signal::ModeChanged(mode));
            self.rearm_discoverable_timer(p);
        }
        Ok(())
    }

    /// Restore `global_mode == mode` when no session holds the adapter
    pub(super) fn settle_global_mode(&mut self) {
        if self.sessions.is_empty() {
            self.global_mode = self.mode;
        }
    }

    /// Arm the discoverable timeout on entering discoverable mode, disarm it otherwise
    fn rearm_discoverable_timer<P: Platform>(&mut self, p: &mut P) {
        if let Some(timer) = self.discov_timeout_id.take() {
            p.cancel_timer(timer);
        }
        if self.mode.is_discoverable() && self.sessions.is_empty() && self.discoverable_timeout > 0
        {
            self.discov_timeout_id = Some(p.start_timer(self.discoverable_timeout * 1000));
        }
    }

    /// `SetDiscoverableTimeout`
    pub(super) fn set_discoverable_timeout<P: Platform>(
        &mut self,
        p: &mut P,
        timeout: u32,
    ) -> Result<(), BluetoothError> {
        self.require_up()?;

        if let Some(timer) = self.discov_timeout_id.take() {
            p.cancel_timer(timer);
        }
        if timeout != 0 && self.scan_enable.contains(ScanEnable::INQUIRY) {
            self.discov_timeout_id = Some(p.start_timer(timeout.saturating_mul(1000)));
        }

        self.discoverable_timeout = timeout;
        if let Err(e) = p.write_discoverable_timeout(&self.address, timeout) {
            defmt::warn!("[MODE] Persisting discoverable timeout failed: {}", e);
        }
        p.emit(Signal::DiscoverableTimeoutChanged(timeout));
        Ok(())
    }

    pub(super) fn discoverable_timeout_expired<P: Platform>(&mut self, p: &mut P) {
        self.discov_timeout_id = None;
        defmt::info!("[MODE] Discoverable timeout, back to connectable");
        if let Err(e) = self.commit_mode(p, Mode::Connectable) {
            defmt::error!("[MODE] Leaving discoverable mode failed: {}", e);
        }
        self.settle_global_mode();
    }
}
