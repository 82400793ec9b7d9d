//! Device identity and the transport seam.
//!
//! The crate never talks to USB directly. A backend implements [`UsbHost`] (list and
//! open devices) and [`DeviceChannels`] (claim interfaces, start inbound delivery,
//! write outbound packets). Inbound data crosses back into the crate as
//! [`ChannelEvent`]s pushed through an [`InboundSink`].
//!
//! ## Identity
//! Sessions are keyed by [`DeviceId`], derived from a [`DeviceFingerprint`]. Two
//! identical controllers share vid/pid, and cheap clones often share a serial
//! number too, so the id is `vid:pid[:serial][@path]`: each part is appended when
//! the backend knows it. The path keeps two pads with the same serial apart; the
//! cost is that a pad moved to another port comes back under a new id.

use crate::error::TransportError;
use std::fmt;
use std::sync::Weak;

/// Stable identity data for one physical device.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct DeviceFingerprint {
    pub vendor_id: u16,
    pub product_id: u16,
    pub serial_number: Option<String>,
    pub path: Option<String>,
}

impl fmt::Display for DeviceFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04x}:{:04x}", self.vendor_id, self.product_id)?;
        if let Some(serial) = self.serial_number.as_deref().filter(|s| !s.is_empty()) {
            write!(f, ":{serial}")?;
        }
        if let Some(path) = self.path.as_deref().filter(|p| !p.is_empty()) {
            write!(f, "@{path}")?;
        }
        Ok(())
    }
}

/// Key of a session in the directory.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeviceId(String);

impl DeviceId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&DeviceFingerprint> for DeviceId {
    fn from(fp: &DeviceFingerprint) -> Self {
        DeviceId(fp.to_string())
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// An attached device as reported by a [`UsbHost`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeviceCandidate {
    pub fingerprint: DeviceFingerprint,
    /// Product string from the device, if the backend could read it.
    pub product_string: Option<String>,
    /// HID interface number; `None` when not applicable.
    pub interface_number: Option<i32>,
}

impl DeviceCandidate {
    pub fn new(fingerprint: DeviceFingerprint) -> Self {
        Self {
            fingerprint,
            product_string: None,
            interface_number: None,
        }
    }

    pub fn id(&self) -> DeviceId {
        DeviceId::from(&self.fingerprint)
    }

    #[inline]
    pub fn vendor_id(&self) -> u16 {
        self.fingerprint.vendor_id
    }

    #[inline]
    pub fn product_id(&self) -> u16 {
        self.fingerprint.product_id
    }
}

/// Transfer direction of an endpoint.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    In,
    Out,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EndpointDesc {
    pub address: u8,
    pub direction: Direction,
}

impl EndpointDesc {
    /// Bit 7 of a USB endpoint address is set for IN endpoints.
    pub fn from_address(address: u8) -> Self {
        let direction = if address & 0x80 != 0 {
            Direction::In
        } else {
            Direction::Out
        };
        Self { address, direction }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InterfaceDesc {
    pub number: u8,
    pub endpoints: Vec<EndpointDesc>,
}

impl InterfaceDesc {
    pub fn first_endpoint(&self, direction: Direction) -> Option<EndpointDesc> {
        self.endpoints
            .iter()
            .copied()
            .find(|e| e.direction == direction)
    }
}

/// Something the inbound channel produced.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ChannelEvent {
    /// One input report.
    Report(Vec<u8>),
    /// The channel failed; no more reports will follow.
    Fault(String),
}

/// Receiving side of an inbound channel.
pub trait InboundHandler: Send + Sync {
    /// Handle one event. Returning `false` asks the transport to stop delivering.
    fn on_channel_event(&self, event: ChannelEvent) -> bool;
}

/// Handle a transport uses to push inbound events into a session.
///
/// Holds only a weak reference, so a transport thread never keeps a dropped
/// session alive.
#[derive(Clone)]
pub struct InboundSink {
    target: Weak<dyn InboundHandler>,
}

impl InboundSink {
    pub fn new(target: Weak<dyn InboundHandler>) -> Self {
        Self { target }
    }

    /// Deliver one event. `false` means the receiver is gone or no longer listening.
    pub fn deliver(&self, event: ChannelEvent) -> bool {
        match self.target.upgrade() {
            Some(handler) => handler.on_channel_event(event),
            None => false,
        }
    }
}

impl fmt::Debug for InboundSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InboundSink")
            .field("alive", &(self.target.strong_count() > 0))
            .finish()
    }
}

/// Device enumeration and opening.
pub trait UsbHost: Send + Sync {
    /// Devices currently attached.
    fn enumerate(&self) -> Result<Vec<DeviceCandidate>, TransportError>;

    /// Acquire a handle to `candidate`. Interfaces are not claimed yet.
    fn open(&self, candidate: &DeviceCandidate) -> Result<Box<dyn DeviceChannels>, TransportError>;
}

/// An opened device.
pub trait DeviceChannels: Send {
    fn interfaces(&self) -> Vec<InterfaceDesc>;

    fn kernel_driver_active(&self, interface: u8) -> Result<bool, TransportError>;

    fn detach_kernel_driver(&mut self, interface: u8) -> Result<(), TransportError>;

    fn claim_interface(&mut self, interface: u8) -> Result<(), TransportError>;

    /// Begin delivering reports from `endpoint` into `sink`, in arrival order.
    fn start_inbound(&mut self, endpoint: u8, sink: InboundSink) -> Result<(), TransportError>;

    fn write(&mut self, endpoint: u8, data: &[u8]) -> Result<usize, TransportError>;

    /// Stop delivery and release the device. Must be safe to call more than once.
    fn close(&mut self);
}
