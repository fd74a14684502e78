//! Error taxonomy shared by every adapter and audio operation.

/// Underlying cause carried by [`BluetoothError::Failed`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, defmt::Format)]
pub enum Failure {
    /// Command completed with a non-zero HCI status
    HciStatus(u8),
    /// The command link itself failed (send error, timeout)
    Link(LinkError),
    /// The persistent store rejected a write or delete
    Storage,
    /// Fixed diagnostic text
    Message(&'static str),
}

/// Errors reported by the hardware command link and raw channels
#[derive(Debug, Clone, Copy, PartialEq, Eq, defmt::Format)]
pub enum LinkError {
    /// No such HCI device
    NoDevice,
    /// Device is already up (tolerated by power-up)
    AlreadyUp,
    /// Command timed out waiting for the controller
    Timeout,
    /// Operating system error number
    Io(i32),
}

/// Bluetooth-related errors returned to bus clients
#[derive(Debug, Clone, Copy, PartialEq, Eq, defmt::Format)]
pub enum BluetoothError {
    /// Malformed or missing parameter, including malformed addresses
    InvalidArguments,
    /// Adapter is administratively down
    NotReady,
    /// HCI device could not be opened
    NoSuchAdapter,
    /// A conflicting operation is already running
    InProgress(&'static str),
    /// The object being created already exists
    AlreadyExists(&'static str),
    /// The object being removed or queried does not exist
    DoesNotExist(&'static str),
    /// Caller does not own the operation, or it is unsafe to cancel now
    NotAuthorized,
    /// Fact is neither cached nor obtainable synchronously
    NotAvailable,
    /// Device is not connected
    NotConnected,
    /// Device is already connected
    AlreadyConnected,
    /// No matching operation is in progress
    NotInProgress(&'static str),
    /// Raw connection could not be established (errno)
    ConnectionAttemptFailed(i32),
    /// Authentication failed with the given HCI status
    AuthenticationFailed(u8),
    /// Authentication was canceled
    AuthenticationCanceled,
    /// Audio device connection did not complete
    ConnectFailed,
    /// Answer will arrive later as a signal
    RequestDeferred,
    /// Generic hardware or command failure
    Failed(Failure),
}

impl BluetoothError {
    /// Bus error name for this error
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::InvalidArguments => "org.bluez.Error.InvalidArguments",
            Self::NotReady => "org.bluez.Error.NotReady",
            Self::NoSuchAdapter => "org.bluez.Error.NoSuchAdapter",
            Self::InProgress(_) => "org.bluez.Error.InProgress",
            Self::AlreadyExists(_) => "org.bluez.Error.AlreadyExists",
            Self::DoesNotExist(_) => "org.bluez.Error.DoesNotExist",
            Self::NotAuthorized => "org.bluez.Error.NotAuthorized",
            Self::NotAvailable => "org.bluez.Error.NotAvailable",
            Self::NotConnected => "org.bluez.Error.NotConnected",
            Self::AlreadyConnected => "org.bluez.Error.AlreadyConnected",
            Self::NotInProgress(_) => "org.bluez.Error.NotInProgress",
            Self::ConnectionAttemptFailed(_) => "org.bluez.Error.ConnectionAttemptFailed",
            Self::AuthenticationFailed(_) => "org.bluez.Error.AuthenticationFailed",
            Self::AuthenticationCanceled => "org.bluez.Error.AuthenticationCanceled",
            Self::ConnectFailed => "org.bluez.Error.ConnectFailed",
            Self::RequestDeferred => "org.bluez.Error.RequestDeferred",
            Self::Failed(_) => "org.bluez.Error.Failed",
        }
    }

    pub(crate) const fn status(status: u8) -> Self {
        Self::Failed(Failure::HciStatus(status))
    }

    pub(crate) const fn message(text: &'static str) -> Self {
        Self::Failed(Failure::Message(text))
    }
}

impl LinkError {
    /// Closest errno value, as carried by connection errors
    #[must_use]
    pub fn errno(&self) -> i32 {
        match self {
            Self::NoDevice => 19,
            Self::AlreadyUp => 114,
            Self::Timeout => 110,
            Self::Io(errno) => *errno,
        }
    }
}

impl From<LinkError> for BluetoothError {
    fn from(error: LinkError) -> Self {
        Self::Failed(Failure::Link(error))
    }
}

impl core::fmt::Display for Failure {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::HciStatus(status) => write!(f, "HCI status 0x{status:02x}"),
            Self::Link(error) => write!(f, "{error}"),
            Self::Storage => write!(f, "storage failure"),
            Self::Message(text) => f.write_str(text),
        }
    }
}

impl core::fmt::Display for LinkError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::NoDevice => write!(f, "No such device"),
            Self::AlreadyUp => write!(f, "Device already up"),
            Self::Timeout => write!(f, "Command timed out"),
            Self::Io(errno) => write!(f, "I/O error {errno}"),
        }
    }
}

impl core::fmt::Display for BluetoothError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::InvalidArguments => write!(f, "Invalid arguments"),
            Self::NotReady => write!(f, "Adapter is not ready"),
            Self::NoSuchAdapter => write!(f, "No such adapter"),
            Self::InProgress(what)
            | Self::AlreadyExists(what)
            | Self::DoesNotExist(what)
            | Self::NotInProgress(what) => f.write_str(what),
            Self::NotAuthorized => write!(f, "Not authorized"),
            Self::NotAvailable => write!(f, "Not available"),
            Self::NotConnected => write!(f, "Not connected"),
            Self::AlreadyConnected => write!(f, "Already connected"),
            Self::ConnectionAttemptFailed(errno) => {
                write!(f, "Connection attempt failed (errno {errno})")
            }
            Self::AuthenticationFailed(status) => {
                write!(f, "Authentication failed (status 0x{status:02x})")
            }
            Self::AuthenticationCanceled => write!(f, "Authentication canceled"),
            Self::ConnectFailed => write!(f, "Connect Failed"),
            Self::RequestDeferred => write!(f, "Request deferred"),
            Self::Failed(failure) => write!(f, "Failed: {failure}"),
        }
    }
}
