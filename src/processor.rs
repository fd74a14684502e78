//! Event loop - drains the event queue into a [`BluetoothHost`]
//!
//! Everything that changes host state arrives as an [`Event`] on one queue:
//! client method calls submitted through [`crate::api`], and completions the
//! platform reports (client exits, timers, agent answers, controller events,
//! raw channel readiness, browse results, audio sub-profile callbacks).
//! Draining it from a single task keeps every transition on one thread.
//!
//! # Usage
//!
//! ```rust,no_run
//! use roostbird::{Adapter, AdapterOptions, BluetoothAddress, BluetoothHost, processor};
//!
//! async fn bluetooth_task<P>(platform: &mut P, address: BluetoothAddress)
//! where
//!     P: roostbird::HostPlatform,
//! {
//!     let mut adapter = Adapter::new(address, 0, AdapterOptions::default());
//!     adapter.load_settings(&*platform);
//!     let mut host = BluetoothHost::new(adapter);
//!     processor::run(&mut host, platform).await;
//! }
//! ```
//!
//! The platform feeds completions back with the submitters in [`crate::api`],
//! e.g. [`crate::api::submit_hci_event`] from its controller reader task.

use crate::{BluetoothHost, EVENT_CHANNEL, Event, HostPlatform};
use embassy_sync::{blocking_mutex::raw::RawMutex, channel::Receiver};

/// Drain the global event queue forever
pub async fn run<P: HostPlatform>(host: &mut BluetoothHost, platform: &mut P) -> ! {
    run_with(host, platform, EVENT_CHANNEL.receiver()).await
}

/// Drain `receiver` forever
pub async fn run_with<P, M, const N: usize>(
    host: &mut BluetoothHost,
    platform: &mut P,
    receiver: Receiver<'_, M, Event, N>,
) -> !
where
    P: HostPlatform,
    M: RawMutex,
{
    defmt::info!("[PROCESSOR] Event loop started");
    loop {
        process_next(host, platform, &receiver).await;
    }
}

/// Wait for one event and apply it
pub async fn process_next<P, M, const N: usize>(
    host: &mut BluetoothHost,
    platform: &mut P,
    receiver: &Receiver<'_, M, Event, N>,
) where
    P: HostPlatform,
    M: RawMutex,
{
    let event = receiver.receive().await;
    defmt::debug!("[PROCESSOR] Event: {:?}", defmt::Debug2Format(&event));
    host.handle_event(platform, event);
}

/// Apply every event already queued on `receiver`; returns how many
pub fn process_pending<P, M, const N: usize>(
    host: &mut BluetoothHost,
    platform: &mut P,
    receiver: &Receiver<'_, M, Event, N>,
) -> usize
where
    P: HostPlatform,
    M: RawMutex,
{
    let mut processed = 0;
    while let Ok(event) = receiver.try_receive() {
        defmt::debug!("[PROCESSOR] Event: {:?}", defmt::Debug2Format(&event));
        host.handle_event(platform, event);
        processed += 1;
    }
    processed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        AdapterMethod, Call, HciEvent, Mode, Request, RequestId,
        bus::ReplyValue,
        testing::{MockPlatform, client},
    };
    use embassy_sync::{blocking_mutex::raw::NoopRawMutex, channel::Channel};

    fn get_mode(id: u32) -> Event {
        Event::Request(Request {
            id: RequestId(id),
            sender: client("a"),
            call: Call::Adapter(AdapterMethod::GetMode),
        })
    }

    #[test]
    fn test_process_next_applies_one_event() {
        let channel: Channel<NoopRawMutex, Event, 4> = Channel::new();
        let mut p = MockPlatform::new();
        let mut host = BluetoothHost::new(MockPlatform::up_adapter(&mut p, Mode::Discoverable));

        channel.try_send(get_mode(1)).unwrap();
        channel.try_send(get_mode(2)).unwrap();
        embassy_futures::block_on(process_next(&mut host, &mut p, &channel.receiver()));

        assert_eq!(p.take_reply(1), Ok(ReplyValue::Mode(Mode::Discoverable)));
        assert!(p.replies.is_empty());
        assert!(!channel.is_empty());
    }

    #[test]
    fn test_process_pending_keeps_order() {
        let channel: Channel<NoopRawMutex, Event, 4> = Channel::new();
        let mut p = MockPlatform::new();
        let mut host = BluetoothHost::new(MockPlatform::up_adapter(&mut p, Mode::Connectable));

        channel.try_send(get_mode(1)).unwrap();
        channel.try_send(Event::Hci(HciEvent::DeviceDown)).unwrap();
        channel.try_send(get_mode(2)).unwrap();

        assert_eq!(process_pending(&mut host, &mut p, &channel.receiver()), 3);
        assert_eq!(p.take_reply(1), Ok(ReplyValue::Mode(Mode::Connectable)));
        assert_eq!(p.take_reply(2), Ok(ReplyValue::Mode(Mode::Off)));
        assert_eq!(process_pending(&mut host, &mut p, &channel.receiver()), 0);
    }
}
