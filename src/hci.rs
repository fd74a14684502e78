//! Hardware seams: the blocking HCI command link and raw link-layer channels
//!
//! Every command the adapter issues goes through [`HciLink`] as a short
//! blocking exchange: open the device, send one or more commands, close.
//! The returned byte is the HCI status of the command complete (or command
//! status) event, `0x00` meaning success.
//!
//! Bonding opens a raw L2CAP channel through [`RawChannels`] to trigger the
//! ACL connection, then watches it for readiness. Readiness is reported back
//! as [`crate::Event::BondingIo`].

use crate::{BluetoothAddress, LinkError, WatchId, constants::MAX_PIN_LENGTH, mode::ScanEnable};
use bt_hci::param::ConnHandle;
use heapless::Vec;

/// PIN code bytes as sent in `PIN_Code_Request_Reply`
pub type PinCode = Vec<u8, MAX_PIN_LENGTH>;

/// Commands the adapter core issues to the controller
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// `Write_Scan_Enable`
    WriteScanEnable(ScanEnable),
    /// Class of device and IAC update entering or leaving limited discoverable mode
    SetLimitedDiscoverable {
        /// Class of device before applying the limited bit
        class: u32,
        /// Whether limited discoverable mode is entered
        limited: bool,
    },
    /// `Inquiry`
    Inquiry {
        /// Inquiry access code
        lap: [u8; 3],
        /// Inquiry length in 1.28s units
        length: u8,
        /// Response limit, 0 for unlimited
        num_responses: u8,
    },
    /// `Periodic_Inquiry_Mode`
    PeriodicInquiry {
        /// Inquiry access code
        lap: [u8; 3],
        /// Maximum period length in 1.28s units
        max_period: u16,
        /// Minimum period length in 1.28s units
        min_period: u16,
        /// Inquiry length in 1.28s units
        length: u8,
        /// Response limit, 0 for unlimited
        num_responses: u8,
    },
    /// `Inquiry_Cancel`
    InquiryCancel,
    /// `Exit_Periodic_Inquiry_Mode`
    ExitPeriodicInquiry,
    /// `Remote_Name_Request`
    RemoteNameRequest(BluetoothAddress),
    /// `Remote_Name_Request_Cancel`
    RemoteNameRequestCancel(BluetoothAddress),
    /// `Authentication_Requested`
    AuthenticationRequested(ConnHandle),
    /// `PIN_Code_Request_Reply`
    PinCodeReply(BluetoothAddress, PinCode),
    /// `PIN_Code_Request_Negative_Reply`
    PinCodeNegativeReply(BluetoothAddress),
    /// `Delete_Stored_Link_Key` for one address
    DeleteStoredLinkKey(BluetoothAddress),
    /// `Disconnect`
    Disconnect {
        /// Connection to terminate
        handle: ConnHandle,
        /// HCI reason code
        reason: u8,
    },
}

/// Blocking command channel to the local controller
pub trait HciLink {
    /// Open the HCI device
    ///
    /// # Errors
    /// Fails when the device does not exist or cannot be opened
    fn open_device(&mut self) -> Result<(), LinkError>;

    /// Send one command and wait up to `timeout_ms` for its completion
    ///
    /// Returns the HCI status byte of the completion.
    ///
    /// # Errors
    /// Fails when the command cannot be sent or times out
    fn send_command(&mut self, command: &Command, timeout_ms: u32) -> Result<u8, LinkError>;

    /// Close the HCI device
    fn close_device(&mut self);

    /// Bring the HCI device up
    ///
    /// # Errors
    /// [`LinkError::AlreadyUp`] when it already is, other errors on failure
    fn device_up(&mut self) -> Result<(), LinkError>;

    /// Bring the HCI device down
    ///
    /// # Errors
    /// Fails when the device cannot be brought down
    fn device_down(&mut self) -> Result<(), LinkError>;
}

/// Handle of an open raw channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, defmt::Format)]
pub struct ChannelId(pub u32);

/// Readiness a raw channel watch waits for
#[derive(Debug, Clone, Copy, PartialEq, Eq, defmt::Format)]
pub enum IoInterest {
    /// Writability (connection established) plus hangup, error and invalid
    Connect,
    /// Hangup, error and invalid only
    Teardown,
}

/// Readiness reported for a raw channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, defmt::Format)]
pub enum IoCondition {
    /// Channel is writable
    Writable,
    /// Peer hung up
    Hangup,
    /// Socket error
    Error,
    /// Channel was closed underneath the watch
    Invalid,
}

/// Raw link-layer channels used to drive bonding
pub trait RawChannels {
    /// Start a non-blocking raw connection from `local` to `peer`
    ///
    /// # Errors
    /// Fails when the connection cannot be initiated
    fn connect_raw(
        &mut self,
        local: &BluetoothAddress,
        peer: &BluetoothAddress,
    ) -> Result<ChannelId, LinkError>;

    /// Pending socket error of a channel, 0 when none
    ///
    /// # Errors
    /// Fails when the socket option cannot be read
    fn pending_error(&mut self, channel: ChannelId) -> Result<i32, LinkError>;

    /// ACL connection handle behind a connected channel
    ///
    /// # Errors
    /// Fails when the connection info cannot be read
    fn connection_handle(&mut self, channel: ChannelId) -> Result<ConnHandle, LinkError>;

    /// Watch a channel for readiness
    fn watch_channel(&mut self, channel: ChannelId, interest: IoInterest) -> WatchId;

    /// Remove a channel watch; unknown ids are ignored
    fn unwatch_channel(&mut self, watch: WatchId);

    /// Close a channel; closing twice is harmless
    ///
    /// A watch still installed on the channel fires once more with
    /// [`IoCondition::Invalid`].
    fn close_channel(&mut self, channel: ChannelId);
}

/// Run `f` with the HCI device open, closing it on every path
pub(crate) fn with_device<P, R>(
    platform: &mut P,
    f: impl FnOnce(&mut P) -> Result<R, crate::BluetoothError>,
) -> Result<R, crate::BluetoothError>
where
    P: HciLink + ?Sized,
{
    platform.open_device().map_err(|e| {
        defmt::error!("[HCI] Can't open device: {}", e);
        crate::BluetoothError::NoSuchAdapter
    })?;
    let result = f(platform);
    platform.close_device();
    result
}

/// Send a command and turn a non-zero status into an error
pub(crate) fn execute<P>(
    platform: &mut P,
    command: &Command,
    timeout_ms: u32,
) -> Result<(), crate::BluetoothError>
where
    P: HciLink + ?Sized,
{
    match platform.send_command(command, timeout_ms) {
        Ok(0) => Ok(()),
        Ok(status) => {
            defmt::warn!(
                "[HCI] {} returned status {:#x}",
                defmt::Debug2Format(command),
                status
            );
            Err(crate::BluetoothError::status(status))
        }
        Err(e) => {
            defmt::error!(
                "[HCI] Sending {} failed: {}",
                defmt::Debug2Format(command),
                e
            );
            Err(e.into())
        }
    }
}
