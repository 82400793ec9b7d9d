//! padlink: USB game controller sessions for Rust.
//!
//! Recognizes attached controllers by vendor/product id, opens a session per
//! device, decodes its input reports into a normalized button/axis state and
//! publishes the changes as events.
//!
//! The USB side sits behind the [`UsbHost`] / [`DeviceChannels`] traits. The
//! `usb` feature provides a raw USB backend over `nusb` (needed for wired Xbox One
//! pads), the `hid` feature an `hidapi` backend; [`backends::virtual_input`] is an
//! in-memory backend for tests and demos.
//!
//! ```no_run
//! use padlink::backends::virtual_input::{VirtualDevice, VirtualHost};
//! use padlink::{EventFilter, GamepadContext, TracingListener};
//! use std::sync::Arc;
//!
//! # fn main() -> padlink::Result<()> {
//! let host = Arc::new(VirtualHost::new());
//! host.attach(VirtualDevice::xbox_one("pad-1"));
//!
//! let ctx = GamepadContext::new(host)?;
//! ctx.subscribe(TracingListener::new(), EventFilter::All, None);
//! ctx.refresh()?;
//! for pad in ctx.list_controllers().iter() {
//!     println!("{} connected={}", pad.id, pad.connected);
//! }
//! # Ok(())
//! # }
//! ```

pub mod backends;
pub mod config;
pub mod decoders;
pub mod device;
pub mod directory;
pub mod error;
pub mod event;
pub mod eventbus;
pub mod logger;
pub mod manager;
pub mod session;
pub mod snapshot;
pub mod state;
pub mod vendor;

pub use config::{GamepadConfig, HidConfig, UsbConfig};
pub use decoders::{DecodeOutcome, DecoderFamily, ReportDecoder};
pub use device::*;
pub use directory::{DeviceDirectory, ReconcileReport};
pub use error::{GamepadError, Result, TransportError};
pub use event::*;
pub use eventbus::*;
pub use logger::TracingListener;
pub use manager::*;
pub use session::{DeadReason, DeviceSession, SessionPhase, SessionStats};
pub use snapshot::{ControllerSnapshot, Snapshot};
pub use state::{ButtonState, ControllerState};
pub use vendor::{LoadReport, VendorDef, VendorRegistry, VendorSignature};
