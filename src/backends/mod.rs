//! Transport backends.
//!
//! Implementations of [`UsbHost`](crate::device::UsbHost) /
//! [`DeviceChannels`](crate::device::DeviceChannels).
//!
//! # Feature flags
//! - **`hid`**: enables the `hidapi` backend ([`hid::HidHost`]). Off by default
//!   because it links against the platform HID libraries.
//! - **`usb`**: enables the raw USB backend over `nusb` ([`usb::RawUsbHost`]),
//!   which claims vendor-class interfaces and writes startup packets. Wired Xbox
//!   One pads need this one.
//!
//! The in-memory [`virtual_input`] backend is always available; tests and demos
//! drive sessions through it without hardware.

#[cfg(feature = "hid")]
#[cfg_attr(docsrs, doc(cfg(feature = "hid")))]
pub mod hid;

#[cfg(feature = "usb")]
#[cfg_attr(docsrs, doc(cfg(feature = "usb")))]
pub mod usb;

pub mod virtual_input;
