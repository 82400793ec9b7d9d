//! Xbox One (GIP) wired controller reports.
//!
//! Only the button report (`0x20`) is decoded. Every other report type the pad
//! sends (guide button `0x07`, heartbeats, acks) is ignored.
//!
//! ## Layout (0-indexed)
//! ```text
//! byte 0   report type          0x20 = buttons
//! byte 2   sequence counter     diagnostics only
//! byte 3   declared length
//! byte 4   bit 2 View  bit 3 Menu  bit 4 A  bit 5 B  bit 6 X  bit 7 Y
//! byte 5   bit 0 D-left  bit 1 D-right  bit 2 D-up  bit 3 D-down
//!          bit 4 LB      bit 5 RB
//! ```
//!
//! ## Indices
//! Buttons: `0 A, 1 B, 2 X, 3 Y, 4 LB, 5 RB, 6 Menu, 7 View, 8 Home, 9 unused`.
//! Home is never set: the pad reports it in a separate `0x07` report.
//!
//! Axes: `0..=4` are left at rest (this report carries no analog data),
//! `5` is the D-pad horizontal, `6` the D-pad vertical.
//!
//! ## Opposing D-pad bits
//! The horizontal pair checks right (+1) before left; the vertical pair checks up
//! (-1) before down. Existing consumers depend on that order, so a report with both
//! bits of a pair set resolves to +1 horizontally and -1 vertically.

use super::{DecodeOutcome, DecoderFamily, ReportDecoder};
use crate::error::{GamepadError, Result};
use crate::event::ChannelDesc;
use crate::state::{ButtonState, ControllerState};

pub const REPORT_TYPE_BUTTONS: u8 = 0x20;
pub const REPORT_TYPE_GUIDE: u8 = 0x07;

/// Bytes 0..=5 must be present in a button report.
pub const MIN_BUTTON_REPORT_LEN: usize = 6;

pub const BUTTON_COUNT: usize = 10;
pub const AXIS_COUNT: usize = 7;

pub const BUTTON_HOME: usize = 8;
pub const AXIS_DPAD_X: usize = 5;
pub const AXIS_DPAD_Y: usize = 6;

/// Power-on command; the pad stays silent until it receives this.
const POWER_ON: &[u8] = &[0x05, 0x20, 0x00, 0x01, 0x00];

/// `(button index, byte, bit)`
const BUTTON_MAP: [(usize, usize, u8); 8] = [
    (0, 4, 4), // A
    (1, 4, 5), // B
    (2, 4, 6), // X
    (3, 4, 7), // Y
    (4, 5, 4), // LB
    (5, 5, 5), // RB
    (6, 4, 3), // Menu
    (7, 4, 2), // View
];

const BUTTON_NAMES: [&str; BUTTON_COUNT] = [
    "A", "B", "X", "Y", "LB", "RB", "Menu", "View", "Home", "Unused",
];

const AXIS_NAMES: [&str; AXIS_COUNT] = [
    "Reserved0", "Reserved1", "Reserved2", "Reserved3", "Reserved4", "DPadX", "DPadY",
];

#[inline]
fn bit(byte: u8, pos: u8) -> bool {
    (byte >> pos) & 1 == 1
}

/// Fixed header fields shared by all report types.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ReportHeader {
    pub report_type: u8,
    pub sequence: u8,
    pub payload_len: u8,
}

impl ReportHeader {
    pub const LEN: usize = 4;

    pub fn parse(report: &[u8]) -> Result<Self> {
        match report {
            [report_type, _, sequence, payload_len, ..] => Ok(Self {
                report_type: *report_type,
                sequence: *sequence,
                payload_len: *payload_len,
            }),
            _ => Err(GamepadError::MalformedReport {
                expected: Self::LEN,
                actual: report.len(),
            }),
        }
    }
}

/// Stateless decoder for the Xbox One button report.
#[derive(Clone, Copy, Debug, Default)]
pub struct XboxOneDecoder;

impl XboxOneDecoder {
    fn dpad_x(byte: u8) -> f32 {
        if bit(byte, 1) {
            1.0
        } else if bit(byte, 0) {
            -1.0
        } else {
            0.0
        }
    }

    fn dpad_y(byte: u8) -> f32 {
        if bit(byte, 2) {
            -1.0
        } else if bit(byte, 3) {
            1.0
        } else {
            0.0
        }
    }
}

impl ReportDecoder for XboxOneDecoder {
    fn family(&self) -> DecoderFamily {
        DecoderFamily::XboxOne
    }

    fn button_count(&self) -> usize {
        BUTTON_COUNT
    }

    fn axis_count(&self) -> usize {
        AXIS_COUNT
    }

    fn decode(&self, report: &[u8], state: &mut ControllerState) -> Result<DecodeOutcome> {
        let Some(&report_type) = report.first() else {
            return Err(GamepadError::MalformedReport {
                expected: 1,
                actual: 0,
            });
        };
        if report_type != REPORT_TYPE_BUTTONS {
            return Ok(DecodeOutcome::Ignored { report_type });
        }
        if report.len() < MIN_BUTTON_REPORT_LEN {
            return Err(GamepadError::MalformedReport {
                expected: MIN_BUTTON_REPORT_LEN,
                actual: report.len(),
            });
        }
        // Refuse up front so a short state is never half-written.
        if state.buttons().len() < BUTTON_COUNT {
            return Err(GamepadError::IndexOutOfRange {
                kind: "button",
                index: BUTTON_COUNT - 1,
                len: state.buttons().len(),
            });
        }
        if state.axes().len() < AXIS_COUNT {
            return Err(GamepadError::IndexOutOfRange {
                kind: "axis",
                index: AXIS_COUNT - 1,
                len: state.axes().len(),
            });
        }

        for (index, byte, pos) in BUTTON_MAP {
            let b = ButtonState::digital(bit(report[byte], pos));
            state.set_button(index, b.pressed, b.touched, b.value)?;
        }
        state.set_button(BUTTON_HOME, false, false, 0.0)?;

        state.set_axis(AXIS_DPAD_X, Self::dpad_x(report[5]))?;
        state.set_axis(AXIS_DPAD_Y, Self::dpad_y(report[5]))?;

        Ok(DecodeOutcome::Applied)
    }

    fn describe(&self) -> Vec<ChannelDesc> {
        let mut out = Vec::with_capacity(BUTTON_COUNT + AXIS_COUNT);
        for (i, name) in BUTTON_NAMES.iter().enumerate() {
            out.push(ChannelDesc::button(i as u16, name));
        }
        for (i, name) in AXIS_NAMES.iter().enumerate() {
            out.push(ChannelDesc::axis(i as u16, name));
        }
        out
    }

    fn startup_packets(&self) -> &'static [&'static [u8]] {
        &[POWER_ON]
    }
}
