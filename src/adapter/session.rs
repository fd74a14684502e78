use super::{Adapter, AgentCallKind, Platform};
use crate::{BluetoothError, ClientId, Mode, PendingReply, bus::WatchId};

/// A client holding the adapter in at least the mode it requested
pub(super) struct ModeSession {
    pub(super) owner: ClientId,
    pub(super) watch: WatchId,
}

impl Adapter {
    /// `RequestMode`: hold the adapter in at least `name` until released
    pub(super) fn request_mode<P: Platform>(
        &mut self,
        p: &mut P,
        reply: PendingReply,
        name: &str,
    ) {
        let on_mode = p.read_on_mode(&self.address);
        let requested = match Mode::parse(name, on_mode) {
            Ok(mode @ (Mode::Connectable | Mode::Discoverable)) => mode,
            Ok(_) | Err(_) => return reply.ack(p, Err(BluetoothError::InvalidArguments)),
        };

        if self.agent.is_none() {
            return reply.ack(p, Err(BluetoothError::message("No agent registered")));
        }
        if self.sessions.iter().any(|s| s.owner == *reply.sender()) {
            return reply.ack(p, Err(BluetoothError::message("Mode already requested")));
        }
        if self.sessions.is_full() {
            defmt::warn!("[SESSION] Session table full");
            return reply.ack(p, Err(BluetoothError::message("Too many mode requests")));
        }

        let watch = p.watch_client(reply.sender());
        if self.sessions.is_empty() {
            self.global_mode = self.mode;
        }
        let session = ModeSession {
            owner: reply.sender().clone(),
            watch,
        };
        // capacity checked above
        let _ = self.sessions.push(session);
        defmt::info!(
            "[SESSION] {} holds {}",
            reply.sender().as_str(),
            requested
        );

        if self.mode >= requested {
            return reply.ack(p, Ok(()));
        }

        if let Err(reply) = self.request_mode_confirmation(p, reply, requested, true) {
            self.remove_session(p, reply.sender());
            reply.ack(p, Err(BluetoothError::InvalidArguments));
        }
    }

    /// `ReleaseMode`
    pub(super) fn release_mode<P: Platform>(
        &mut self,
        p: &mut P,
        sender: &ClientId,
    ) -> Result<(), BluetoothError> {
        if !self.sessions.iter().any(|s| s.owner == *sender) {
            return Err(BluetoothError::message("No Mode to release"));
        }
        self.end_session(p, sender);
        Ok(())
    }

    /// The holder of a session left the bus
    pub(super) fn session_exit<P: Platform>(&mut self, p: &mut P, watch: WatchId) {
        let Some(owner) = self
            .sessions
            .iter()
            .find(|s| s.watch == watch)
            .map(|s| s.owner.clone())
        else {
            return;
        };
        defmt::info!("[SESSION] {} exited", owner.as_str());
        self.end_session(p, &owner);
    }

    fn end_session<P: Platform>(&mut self, p: &mut P, owner: &ClientId) {
        self.remove_session(p, owner);
        self.cancel_mode_confirmations(p, owner);

        if !self.sessions.is_empty() || self.mode == self.global_mode {
            return;
        }

        defmt::info!("[SESSION] Last session gone, restoring {}", self.global_mode);
        if let Err(e) = self.commit_mode(p, self.global_mode) {
            defmt::error!("[SESSION] Restoring {} failed: {}", self.global_mode, e);
        }
        self.global_mode = self.mode;
    }

    pub(super) fn remove_session<P: Platform>(&mut self, p: &mut P, owner: &ClientId) {
        if let Some(index) = self.sessions.iter().position(|s| s.owner == *owner) {
            let session = self.sessions.swap_remove(index);
            p.unwatch_client(session.watch);
        }
    }

    /// Answer outstanding confirmations requested on behalf of `owner`
    fn cancel_mode_confirmations<P: Platform>(&mut self, p: &mut P, owner: &ClientId) {
        let mut i = 0;
        while i < self.agent_calls.len() {
            let ours = matches!(
                &self.agent_calls[i].kind,
                AgentCallKind::ModeChange { reply, .. } if reply.sender() == owner
            );
            if !ours {
                i += 1;
                continue;
            }
            if let AgentCallKind::ModeChange { reply, .. } = self.agent_calls.swap_remove(i).kind {
                reply.ack(p, Err(BluetoothError::message("Mode request canceled")));
            }
        }
    }
}
