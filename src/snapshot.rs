//! Point-in-time view of all tracked controllers.
//!
//! [`Snapshot`] is an **owned**, read-only copy produced by
//! [`GamepadContext::list_controllers`](crate::manager::GamepadContext::list_controllers).
//! It is cheap to clone for fan-out to multiple consumers.
//!
//! # Semantics
//! - Entries are ordered the way the directory tracks them (insertion order).
//! - Dead sessions are included with `connected == false` until they are evicted,
//!   so callers can see that a controller went away.
//! - A snapshot does **not** read devices; it reflects the last decoded reports.
//!
//! # Examples
//! ```no_run
//! use padlink::Snapshot;
//!
//! fn print_pads(snap: &Snapshot) {
//!     for pad in snap.iter().filter(|p| p.connected) {
//!         let a = pad.buttons.first().map(|b| b.pressed).unwrap_or(false);
//!         println!("{} ({}): A={a} axes={:?}", pad.id, pad.vendor_name, pad.axes);
//!     }
//! }
//! ```

use crate::session::SessionPhase;
use crate::state::ButtonState;
use serde::Serialize;

/// One controller as seen at snapshot time.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ControllerSnapshot {
    pub id: String,
    pub vendor_name: String,
    pub connected: bool,
    pub phase: SessionPhase,
    pub buttons: Vec<ButtonState>,
    pub axes: Vec<f32>,
}

/// Owned list of controller snapshots.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct Snapshot(pub Vec<ControllerSnapshot>);

impl Snapshot {
    /// Look up a controller by its device id string.
    #[inline]
    pub fn get(&self, device_id: &str) -> Option<&ControllerSnapshot> {
        self.0.iter().find(|c| c.id == device_id)
    }

    #[inline]
    pub fn iter(&self) -> impl Iterator<Item = &ControllerSnapshot> {
        self.0.iter()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Consume the snapshot and return the inner list.
    #[inline]
    pub fn into_inner(self) -> Vec<ControllerSnapshot> {
        self.0
    }
}
