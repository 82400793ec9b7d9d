//! Report decoders.
//!
//! A [`ReportDecoder`] turns one raw input report into writes on a
//! [`ControllerState`]. Decoders are stateless: everything they need is in the
//! report, everything they produce goes into the state the caller passes in.
//!
//! Which decoder a device gets is decided by the [`DecoderFamily`] stored on its
//! [`VendorSignature`](crate::vendor::VendorSignature).

use crate::error::Result;
use crate::event::ChannelDesc;
use crate::state::ControllerState;
use serde::{Deserialize, Serialize};

pub mod xbox_one;

pub use xbox_one::XboxOneDecoder;

/// What a decoder did with a report.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DecodeOutcome {
    /// The report was understood and written into the state.
    Applied,
    /// The report type is not modeled by this decoder. Not an error.
    Ignored { report_type: u8 },
}

/// Protocol-specific report parser.
pub trait ReportDecoder: Send {
    fn family(&self) -> DecoderFamily;

    /// Number of button slots this family fills.
    fn button_count(&self) -> usize;

    /// Number of axis slots this family fills.
    fn axis_count(&self) -> usize;

    /// Decode `report` into `state`.
    ///
    /// Must check the buffer length before indexing and return
    /// [`GamepadError::MalformedReport`](crate::error::GamepadError::MalformedReport)
    /// without touching `state` when it is too short.
    fn decode(&self, report: &[u8], state: &mut ControllerState) -> Result<DecodeOutcome>;

    /// Stable channel names for the indices this decoder writes.
    fn describe(&self) -> Vec<ChannelDesc> {
        Vec::new()
    }

    /// Packets written to the outbound channel right after the interface is claimed.
    fn startup_packets(&self) -> &'static [&'static [u8]] {
        &[]
    }

    /// A fresh state sized for this family.
    fn new_state(&self) -> ControllerState {
        ControllerState::new(self.button_count(), self.axis_count())
    }
}

/// Known controller protocols.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DecoderFamily {
    #[default]
    XboxOne,
}

impl DecoderFamily {
    pub fn decoder(self) -> Box<dyn ReportDecoder> {
        match self {
            DecoderFamily::XboxOne => Box::new(XboxOneDecoder),
        }
    }
}
