//! Per-device controller state.
//!
//! [`ControllerState`] is the canonical, Gamepad-API style view of one controller:
//! a fixed number of [`ButtonState`]s, a fixed number of axis values, and the
//! liveness flags that decide whether the controller still counts as connected.
//!
//! ## Value conventions
//! - Buttons: `value` in `[0.0, 1.0]`. Digital buttons use exactly `0.0` / `1.0`
//!   and report `touched == pressed`.
//! - Axes: `[-1.0, 1.0]`. Values are **not** clamped here; decoders own the range.
//!
//! ## Liveness
//! `live` starts `true` and only ever goes to `false` ([`ControllerState::mark_dirty`]).
//! A reattached controller gets a brand new session and state.

use crate::error::{GamepadError, Result};
use serde::{Deserialize, Serialize};

/// State of a single button.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ButtonState {
    pub pressed: bool,
    pub touched: bool,
    pub value: f32,
}

impl ButtonState {
    /// A digital button: `value` is `1.0` when pressed, `touched` follows `pressed`.
    #[inline]
    pub fn digital(pressed: bool) -> Self {
        Self {
            pressed,
            touched: pressed,
            value: if pressed { 1.0 } else { 0.0 },
        }
    }
}

/// Buttons, axes and connection flags for one controller.
#[derive(Clone, Debug, PartialEq)]
pub struct ControllerState {
    buttons: Vec<ButtonState>,
    axes: Vec<f32>,
    live: bool,
    handle_present: bool,
}

impl ControllerState {
    /// Create a state with a fixed button/axis layout. Everything starts released/centered.
    pub fn new(button_count: usize, axis_count: usize) -> Self {
        Self {
            buttons: vec![ButtonState::default(); button_count],
            axes: vec![0.0; axis_count],
            live: true,
            handle_present: true,
        }
    }

    pub fn set_button(&mut self, index: usize, pressed: bool, touched: bool, value: f32) -> Result<()> {
        let len = self.buttons.len();
        let slot = self
            .buttons
            .get_mut(index)
            .ok_or(GamepadError::IndexOutOfRange {
                kind: "button",
                index,
                len,
            })?;
        *slot = ButtonState {
            pressed,
            touched,
            value,
        };
        Ok(())
    }

    /// Write an axis value as-is. Out-of-range values are stored unchanged.
    pub fn set_axis(&mut self, index: usize, value: f32) -> Result<()> {
        let len = self.axes.len();
        let slot = self.axes.get_mut(index).ok_or(GamepadError::IndexOutOfRange {
            kind: "axis",
            index,
            len,
        })?;
        *slot = value;
        Ok(())
    }

    /// Mark the controller as disconnected. Irreversible.
    pub fn mark_dirty(&mut self) {
        self.live = false;
    }

    /// Record whether the session still holds its device handle.
    pub fn set_handle_present(&mut self, present: bool) {
        self.handle_present = present;
    }

    #[inline]
    pub fn is_live(&self) -> bool {
        self.live
    }

    #[inline]
    pub fn is_connected(&self) -> bool {
        self.live && self.handle_present
    }

    pub fn button(&self, index: usize) -> Option<&ButtonState> {
        self.buttons.get(index)
    }

    pub fn axis(&self, index: usize) -> Option<f32> {
        self.axes.get(index).copied()
    }

    pub fn buttons(&self) -> &[ButtonState] {
        &self.buttons
    }

    pub fn axes(&self) -> &[f32] {
        &self.axes
    }
}
