//! Persistent per-device facts, keyed by local adapter address then remote address.

use crate::{
    BluetoothAddress, BluetoothError, DeviceName, Failure, Mode,
    constants::{LINK_KEY_LENGTH, MAX_BONDINGS},
};
use heapless::Vec;

/// Link key as stored after pairing
pub type LinkKey = [u8; LINK_KEY_LENGTH];

/// The store rejected a write or delete
#[derive(Debug, Clone, Copy, PartialEq, Eq, defmt::Format)]
pub struct StoreError;

/// Keyed storage of adapter settings and per-device facts
///
/// Reads are infallible lookups: a missing or unreadable entry is `None`.
pub trait DeviceStore {
    /// Whether a link key is stored for `peer`
    fn has_link_key(&self, local: &BluetoothAddress, peer: &BluetoothAddress) -> bool;

    /// Store the link key exchanged with `peer`
    ///
    /// # Errors
    /// Fails when the entry cannot be written
    fn write_link_key(
        &mut self,
        local: &BluetoothAddress,
        peer: &BluetoothAddress,
        key: &LinkKey,
    ) -> Result<(), StoreError>;

    /// Delete the link key of `peer`
    ///
    /// # Errors
    /// Fails when the entry cannot be deleted
    fn delete_link_key(
        &mut self,
        local: &BluetoothAddress,
        peer: &BluetoothAddress,
    ) -> Result<(), StoreError>;

    /// Addresses with a stored link key, in no particular order
    fn link_keys(&self, local: &BluetoothAddress) -> Vec<BluetoothAddress, MAX_BONDINGS>;

    /// Last mode the adapter was on in, if any
    fn read_on_mode(&self, local: &BluetoothAddress) -> Option<Mode>;

    /// Persist the adapter mode
    ///
    /// Non-off modes are also remembered as the mode `"on"` resolves to.
    ///
    /// # Errors
    /// Fails when the entry cannot be written
    fn write_device_mode(&mut self, local: &BluetoothAddress, mode: Mode) -> Result<(), StoreError>;

    /// Persisted discoverable timeout in seconds
    fn read_discoverable_timeout(&self, local: &BluetoothAddress) -> Option<u32>;

    /// Persist the discoverable timeout in seconds
    ///
    /// # Errors
    /// Fails when the entry cannot be written
    fn write_discoverable_timeout(
        &mut self,
        local: &BluetoothAddress,
        timeout: u32,
    ) -> Result<(), StoreError>;

    /// Cached remote name
    fn read_name(&self, local: &BluetoothAddress, peer: &BluetoothAddress) -> Option<DeviceName>;

    /// Cache a remote name
    ///
    /// # Errors
    /// Fails when the entry cannot be written
    fn write_name(
        &mut self,
        local: &BluetoothAddress,
        peer: &BluetoothAddress,
        name: &str,
    ) -> Result<(), StoreError>;

    /// Whether `peer` is trusted
    fn read_trust(&self, local: &BluetoothAddress, peer: &BluetoothAddress) -> bool;

    /// Set or clear the trust flag of `peer`
    ///
    /// # Errors
    /// Fails when the entry cannot be written
    fn write_trust(
        &mut self,
        local: &BluetoothAddress,
        peer: &BluetoothAddress,
        trusted: bool,
    ) -> Result<(), StoreError>;

    /// Trusted addresses, in no particular order
    fn trusts(&self, local: &BluetoothAddress) -> Vec<BluetoothAddress, MAX_BONDINGS>;

    /// Forget the service profiles recorded for `peer`
    ///
    /// # Errors
    /// Fails when the entry cannot be deleted
    fn delete_profiles(
        &mut self,
        local: &BluetoothAddress,
        peer: &BluetoothAddress,
    ) -> Result<(), StoreError>;
}

impl From<StoreError> for BluetoothError {
    fn from(_: StoreError) -> Self {
        Self::Failed(Failure::Storage)
    }
}
