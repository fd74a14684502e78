//! `Roostbird` API Functions
//!
//! Submitters for the event queue drained by [`crate::processor::run`]. Bus
//! front-ends use [`submit_request`] for client method calls; the platform
//! uses the other submitters to report completions of the watches, timers and
//! agent calls the adapter set up, and controller events.
//!
//! Replies are not returned here: they go out through [`crate::bus::Bus`]
//! once the request has been processed, possibly much later for deferred
//! methods.
//!
//! # Usage
//!
//! ```rust,no_run
//! use roostbird::api::submit_request;
//! use roostbird::{AdapterMethod, Call, Request, RequestId};
//!
//! # async fn example() {
//! submit_request(Request {
//!     id: RequestId(7),
//!     sender: ":1.42".try_into().unwrap(),
//!     call: Call::Adapter(AdapterMethod::DiscoverDevices),
//! })
//! .await;
//! # }
//! ```

use crate::{
    BluetoothAddress, BluetoothError, EVENT_CHANNEL, Event, HciEvent, Request,
    audio::AudioEvent,
    bus::{AgentRequestId, AgentResponse, TimerId, WatchId},
    hci::{ChannelId, IoCondition},
};

/// Queue a client method call
pub async fn submit_request(request: Request) {
    EVENT_CHANNEL.sender().send(Event::Request(request)).await;
}

/// Queue a controller event
pub async fn submit_hci_event(event: HciEvent) {
    EVENT_CHANNEL.sender().send(Event::Hci(event)).await;
}

/// Report that the client behind a watch left the bus
pub async fn client_exited(watch: WatchId) {
    EVENT_CHANNEL.sender().send(Event::ClientExited(watch)).await;
}

/// Report a timer expiry
pub async fn timer_fired(timer: TimerId) {
    EVENT_CHANNEL.sender().send(Event::Timer(timer)).await;
}

/// Report an agent's answer
pub async fn agent_replied(
    request: AgentRequestId,
    result: Result<AgentResponse, BluetoothError>,
) {
    EVENT_CHANNEL
        .sender()
        .send(Event::Agent { request, result })
        .await;
}

/// Report readiness of a watched raw channel
pub async fn channel_ready(channel: ChannelId, watch: WatchId, condition: IoCondition) {
    EVENT_CHANNEL
        .sender()
        .send(Event::BondingIo {
            channel,
            watch,
            condition,
        })
        .await;
}

/// Report the outcome of a service browse
pub async fn browse_complete(device: BluetoothAddress, result: Result<(), BluetoothError>) {
    EVENT_CHANNEL
        .sender()
        .send(Event::BrowseComplete { device, result })
        .await;
}

/// Report an audio sub-profile callback
pub async fn submit_audio_event(device: BluetoothAddress, event: AudioEvent) {
    EVENT_CHANNEL
        .sender()
        .send(Event::Audio { device, event })
        .await;
}

/// Queue an event without waiting, e.g. from an interrupt handler
///
/// # Errors
///
/// Returns an error if the queue is full; the event is dropped.
pub fn try_submit(event: Event) -> Result<(), BluetoothError> {
    EVENT_CHANNEL.try_send(event).map_err(|_| {
        defmt::warn!("[PROCESSOR] Event queue full");
        BluetoothError::message("Event queue full")
    })
}
