//! Unified error types for the HomeLink firmware.
//!
//! Follows embedded best practice: one enum per subsystem, each convertible
//! into the top-level `Error` so the supervisor's error handling stays
//! uniform. Storage and transport failures are always returned to the
//! immediate caller; nothing is silently swallowed.

use core::fmt;

// ---------------------------------------------------------------------------
// Top-level firmware error
// ---------------------------------------------------------------------------

/// Every fallible operation in the firmware funnels into this type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// A persistent-store operation failed.
    Store(StoreError),
    /// A provisioning operation failed.
    Provision(ProvisionError),
    /// A broker-session operation failed.
    Mqtt(MqttError),
    /// A firmware-update operation failed.
    Update(UpdateError),
    /// Component initialisation failed.
    Init(&'static str),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Store(e) => write!(f, "store: {e}"),
            Self::Provision(e) => write!(f, "provision: {e}"),
            Self::Mqtt(e) => write!(f, "mqtt: {e}"),
            Self::Update(e) => write!(f, "update: {e}"),
            Self::Init(msg) => write!(f, "init: {msg}"),
        }
    }
}

impl std::error::Error for Error {}

// ---------------------------------------------------------------------------
// Persistent store errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreError {
    /// Key, namespace, or backing partition does not exist.
    NotFound,
    /// Read requested under a type different from the stored type.
    TypeMismatch,
    /// Malformed base64 at the JSON boundary.
    Encoding,
    /// Persistence medium failure.
    Io,
    /// Write or erase attempted through a read-only handle.
    ReadOnly,
    /// Handle already closed.
    Closed,
    /// Type name not in the recognised tag set.
    UnknownType,
    /// Value does not fit the declared type (range or width).
    InvalidValue,
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound => write!(f, "key or namespace not found"),
            Self::TypeMismatch => write!(f, "stored type does not match requested type"),
            Self::Encoding => write!(f, "malformed base64 value"),
            Self::Io => write!(f, "persistence I/O error"),
            Self::ReadOnly => write!(f, "handle is read-only"),
            Self::Closed => write!(f, "handle is closed"),
            Self::UnknownType => write!(f, "unknown type name"),
            Self::InvalidValue => write!(f, "value out of range for type"),
        }
    }
}

impl From<StoreError> for Error {
    fn from(e: StoreError) -> Self {
        Self::Store(e)
    }
}

// ---------------------------------------------------------------------------
// Provisioning errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProvisionError {
    /// WiFi credentials were rejected by the access point.
    Credential(CredentialFailReason),
    /// The credential retry ceiling was reached; stored credentials were
    /// discarded and onboarding re-armed.
    ExhaustedRetries,
    /// The onboarding driver could not be started.
    DriverInit,
    /// Country/regulatory code was rejected.
    CountryCode,
}

/// Why a credential attempt failed (reported by the WiFi driver).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialFailReason {
    /// Station authentication failed (wrong passphrase).
    AuthError,
    /// The configured access point was not found.
    ApNotFound,
}

impl fmt::Display for ProvisionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Credential(CredentialFailReason::AuthError) => {
                write!(f, "station authentication failed")
            }
            Self::Credential(CredentialFailReason::ApNotFound) => {
                write!(f, "access point not found")
            }
            Self::ExhaustedRetries => write!(f, "credential retry ceiling reached"),
            Self::DriverInit => write!(f, "onboarding driver init failed"),
            Self::CountryCode => write!(f, "country code rejected"),
        }
    }
}

impl From<ProvisionError> for Error {
    fn from(e: ProvisionError) -> Self {
        Self::Provision(e)
    }
}

// ---------------------------------------------------------------------------
// Broker session errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MqttError {
    /// Publish or subscribe attempted without a live session.
    NotConnected,
    /// Network or broker failure reported by the transport.
    Transport,
    /// The underlying client could not be created or started.
    Init,
    /// Required broker settings are missing from the store.
    MissingConfig(&'static str),
}

impl fmt::Display for MqttError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotConnected => write!(f, "no live broker session"),
            Self::Transport => write!(f, "transport failure"),
            Self::Init => write!(f, "client init failed"),
            Self::MissingConfig(key) => write!(f, "missing broker setting '{key}'"),
        }
    }
}

impl From<MqttError> for Error {
    fn from(e: MqttError) -> Self {
        Self::Mqtt(e)
    }
}

// ---------------------------------------------------------------------------
// Firmware update errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateError {
    /// Network or HTTP failure while fetching the image. Aborts the attempt
    /// only; no reboot.
    Transport,
    /// Image signature/validation failure. Fatal for the attempt; the
    /// running image is untouched.
    Integrity,
    /// No inactive slot available or flash write failed.
    Flash,
    /// An update is already in flight; updates cannot be aborted mid-run.
    Busy,
    /// Boot-slot state could not be read.
    SlotState,
}

impl fmt::Display for UpdateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transport => write!(f, "image download failed"),
            Self::Integrity => write!(f, "image verification failed"),
            Self::Flash => write!(f, "flash write failed"),
            Self::Busy => write!(f, "update already in progress"),
            Self::SlotState => write!(f, "boot slot state unavailable"),
        }
    }
}

impl From<UpdateError> for Error {
    fn from(e: UpdateError) -> Self {
        Self::Update(e)
    }
}

// ---------------------------------------------------------------------------
// Convenience Result alias
// ---------------------------------------------------------------------------

/// Firmware-wide `Result` alias.
pub type Result<T> = core::result::Result<T, Error>;
