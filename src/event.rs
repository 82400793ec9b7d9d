//! Change events and channel descriptions.
//!
//! The polling surface is [`ControllerState`](crate::state::ControllerState). On top of
//! that, sessions derive small deltas ([`InputKind`]) by diffing the state before and
//! after each applied report, and publish them on the
//! [`InputEventBus`](crate::eventbus::InputEventBus).
//!
//! ## Value conventions
//! - **Axes:** normalized to `[-1.0, 1.0]`.
//! - **Buttons:** press/release edges on the `pressed` flag.

use std::time::Instant;

/// Per-device input change (delta).
///
/// `axis`/`button` are the same indices used by the controller state.
#[derive(Clone, Debug, PartialEq)]
pub enum InputKind {
    AxisMoved { axis: u16, value: f32 },
    ButtonPressed { button: u16 },
    ButtonReleased { button: u16 },
    /// The session went dead. Emitted once.
    Disconnected,
}

/// Timestamped change for one device.
#[derive(Clone, Debug)]
pub struct InputEvent {
    /// Id of the device that produced the change (see [`DeviceId`](crate::device::DeviceId)).
    pub device_id: String,
    /// Capture time (monotonic).
    pub at: Instant,
    pub kind: InputKind,
}

impl InputEvent {
    pub fn now(device_id: impl Into<String>, kind: InputKind) -> Self {
        Self {
            device_id: device_id.into(),
            at: Instant::now(),
            kind,
        }
    }
}

/// Category of an input channel on a device.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChannelKind {
    Axis,
    Button,
}

/// Describes a channel exposed by a decoder.
///
/// Decoders publish a fixed table of these so UIs can label indices.
#[derive(Clone, Debug, PartialEq)]
pub struct ChannelDesc {
    pub kind: ChannelKind,
    /// Index into the state's button or axis list.
    pub idx: u16,
    pub name: Option<String>,
    pub logical_min: i32,
    pub logical_max: i32,
}

impl ChannelDesc {
    pub fn button(idx: u16, name: &str) -> Self {
        Self {
            kind: ChannelKind::Button,
            idx,
            name: Some(name.to_string()),
            logical_min: 0,
            logical_max: 1,
        }
    }

    pub fn axis(idx: u16, name: &str) -> Self {
        Self {
            kind: ChannelKind::Axis,
            idx,
            name: Some(name.to_string()),
            logical_min: -1,
            logical_max: 1,
        }
    }
}
