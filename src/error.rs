//! Error types.
//!
//! Two layers:
//! - [`TransportError`] is what a [`UsbHost`](crate::device::UsbHost) /
//!   [`DeviceChannels`](crate::device::DeviceChannels) implementation reports.
//! - [`GamepadError`] is what the rest of the crate returns.
//!
//! None of these are process-fatal. Construction-time failures mean "skip this
//! device"; runtime faults degrade a single session to dead.

use thiserror::Error;

/// Failures reported by a transport backend.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("failed to open device: {0}")]
    Open(String),

    #[error("failed to detach kernel driver from interface {interface}: {reason}")]
    DetachKernelDriver { interface: u8, reason: String },

    #[error("failed to claim interface {interface}: {reason}")]
    Claim { interface: u8, reason: String },

    #[error("no inbound endpoint found")]
    NoInboundEndpoint,

    #[error("I/O error: {0}")]
    Io(String),

    #[error("channel is closed")]
    Closed,
}

/// Crate-wide error type.
#[derive(Debug, Error)]
pub enum GamepadError {
    /// The device is not a known controller. Informational; the device is skipped.
    #[error("no known controller signature for {vendor_id:04x}:{product_id:04x}")]
    NoMatchingVendor { vendor_id: u16, product_id: u16 },

    /// Opening, claiming or endpoint discovery failed.
    #[error("could not acquire channels for {device}: {source}")]
    ChannelAcquisitionFailed {
        device: String,
        #[source]
        source: TransportError,
    },

    /// The host could not list attached devices.
    #[error("device enumeration failed: {0}")]
    Enumeration(#[source] TransportError),

    /// The report buffer is too short for the fields the decoder must read.
    #[error("malformed report: expected at least {expected} bytes, got {actual}")]
    MalformedReport { expected: usize, actual: usize },

    /// Runtime I/O failure on an established channel.
    #[error("channel fault: {0}")]
    ChannelFault(String),

    /// The session is dead; nothing is applied to it anymore.
    #[error("session {0} is dead")]
    SessionDead(String),

    #[error("{kind} index {index} out of range (len {len})")]
    IndexOutOfRange {
        kind: &'static str,
        index: usize,
        len: usize,
    },

    #[error("invalid vendor definition: {0}")]
    InvalidDefinition(String),

    /// A setting that would leave a backend unable to run.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Toml(#[from] toml::de::Error),
}

pub type Result<T> = std::result::Result<T, GamepadError>;
