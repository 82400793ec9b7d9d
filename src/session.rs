//! One physical controller bound to its decoded state.
//!
//! A [`DeviceSession`] moves through `Opening -> Active -> Dead`:
//!
//! - **Opening**: the handle is open; kernel drivers are detached, the interface
//!   carrying the inbound endpoint is claimed, startup packets are written. Any
//!   failure here aborts construction and nothing is returned, so a half-opened
//!   session is never observable.
//! - **Active**: reports arriving on the inbound channel are decoded into the
//!   session's [`ControllerState`]. A malformed report is dropped; the session stays
//!   active.
//! - **Dead** (terminal): entered on a channel fault, a detach, or when the device
//!   disappears. The state is marked dirty and later reports are dropped, not applied.
//!   The session stays readable so callers can see why a controller went away.

use crate::decoders::{DecodeOutcome, ReportDecoder};
use crate::device::{
    ChannelEvent, DeviceCandidate, DeviceChannels, DeviceId, Direction, InboundHandler,
    InboundSink, UsbHost,
};
use crate::error::{GamepadError, Result, TransportError};
use crate::event::{ChannelDesc, InputEvent, InputKind};
use crate::eventbus::SharedEventBus;
use crate::snapshot::ControllerSnapshot;
use crate::state::ControllerState;
use crate::vendor::SignatureHandle;
use serde::Serialize;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use tracing::{debug, info, warn};

/// Why a session died.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeadReason {
    /// Runtime I/O error on the inbound channel.
    Fault(String),
    /// The host reported the device as detached.
    Detached,
    /// The device was missing from an attached-device list during reconcile.
    Vanished,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    Opening,
    Active,
    Dead(DeadReason),
}

impl SessionPhase {
    pub fn is_dead(&self) -> bool {
        matches!(self, SessionPhase::Dead(_))
    }
}

/// Report counters, for diagnostics.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SessionStats {
    pub applied: u64,
    pub ignored: u64,
    pub malformed: u64,
    /// Reports that arrived after the session died.
    pub dropped: u64,
}

/// Endpoints picked during acquisition.
#[derive(Clone, Copy, Debug)]
struct Endpoints {
    interface: u8,
    inbound: u8,
    outbound: Option<u8>,
}

struct SessionInner {
    phase: SessionPhase,
    state: ControllerState,
    decoder: Box<dyn ReportDecoder>,
    channels: Option<Box<dyn DeviceChannels>>,
    stats: SessionStats,
}

/// Live binding between one device and its decoded state.
pub struct DeviceSession {
    id: DeviceId,
    candidate: DeviceCandidate,
    signature: SignatureHandle,
    endpoints: Endpoints,
    bus: Option<SharedEventBus>,
    inner: Mutex<SessionInner>,
}

/// Detach kernel drivers, claim the interface with the first IN endpoint.
fn acquire(channels: &mut dyn DeviceChannels) -> std::result::Result<Endpoints, TransportError> {
    let interfaces = channels.interfaces();
    let iface = interfaces
        .iter()
        .find(|i| i.first_endpoint(Direction::In).is_some())
        .ok_or(TransportError::NoInboundEndpoint)?;

    if channels.kernel_driver_active(iface.number)? {
        debug!(interface = iface.number, "detaching kernel driver");
        channels.detach_kernel_driver(iface.number)?;
    }
    channels.claim_interface(iface.number)?;

    let inbound = iface
        .first_endpoint(Direction::In)
        .ok_or(TransportError::NoInboundEndpoint)?;
    Ok(Endpoints {
        interface: iface.number,
        inbound: inbound.address,
        outbound: iface.first_endpoint(Direction::Out).map(|e| e.address),
    })
}

fn send_startup(
    channels: &mut dyn DeviceChannels,
    decoder: &dyn ReportDecoder,
    endpoints: Endpoints,
) -> std::result::Result<(), TransportError> {
    let Some(out) = endpoints.outbound else {
        return Ok(());
    };
    for packet in decoder.startup_packets() {
        channels.write(out, packet)?;
    }
    Ok(())
}

/// Button edges and axis moves between two states of the same layout.
fn diff(before: &ControllerState, after: &ControllerState) -> Vec<InputKind> {
    let mut out = Vec::new();
    for (i, (old, new)) in before.buttons().iter().zip(after.buttons()).enumerate() {
        if old.pressed != new.pressed {
            let button = i as u16;
            out.push(if new.pressed {
                InputKind::ButtonPressed { button }
            } else {
                InputKind::ButtonReleased { button }
            });
        }
    }
    for (i, (&old, &new)) in before.axes().iter().zip(after.axes()).enumerate() {
        if old != new {
            out.push(InputKind::AxisMoved {
                axis: i as u16,
                value: new,
            });
        }
    }
    out
}

impl DeviceSession {
    /// Open `candidate` through `host` and start receiving reports.
    ///
    /// Every failure is a [`GamepadError::ChannelAcquisitionFailed`]; the handle is
    /// closed before returning it.
    pub fn open(
        candidate: &DeviceCandidate,
        signature: SignatureHandle,
        host: &dyn UsbHost,
        bus: Option<SharedEventBus>,
    ) -> Result<Arc<Self>> {
        let id = candidate.id();
        let failed = |source: TransportError| GamepadError::ChannelAcquisitionFailed {
            device: id.to_string(),
            source,
        };

        let mut channels = host.open(candidate).map_err(failed)?;
        let decoder = signature.family.decoder();

        let endpoints = match acquire(channels.as_mut()) {
            Ok(ep) => ep,
            Err(e) => {
                channels.close();
                return Err(failed(e));
            }
        };
        if let Err(e) = send_startup(channels.as_mut(), decoder.as_ref(), endpoints) {
            channels.close();
            return Err(failed(e));
        }

        let session = Arc::new(Self {
            id: id.clone(),
            candidate: candidate.clone(),
            signature,
            endpoints,
            bus,
            inner: Mutex::new(SessionInner {
                phase: SessionPhase::Opening,
                state: decoder.new_state(),
                decoder,
                channels: None,
                stats: SessionStats::default(),
            }),
        });

        let weak: Weak<dyn InboundHandler> = Arc::downgrade(&session) as Weak<dyn InboundHandler>;
        {
            let mut inner = session.lock();
            if let Err(e) = channels.start_inbound(endpoints.inbound, InboundSink::new(weak)) {
                channels.close();
                return Err(failed(e));
            }
            inner.channels = Some(channels);
            inner.phase = SessionPhase::Active;
        }

        info!(
            device = %session.id,
            vendor = %session.signature.name,
            interface = endpoints.interface,
            inbound = endpoints.inbound,
            outbound = ?endpoints.outbound,
            "controller session active"
        );
        Ok(session)
    }

    fn lock(&self) -> MutexGuard<'_, SessionInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn publish(&self, kinds: Vec<InputKind>) {
        let Some(bus) = &self.bus else { return };
        if kinds.is_empty() {
            return;
        }
        let events: Vec<InputEvent> = kinds
            .into_iter()
            .map(|k| InputEvent::now(self.id.as_str(), k))
            .collect();
        bus.publish(&events);
    }

    /// Decode one inbound report into the state.
    ///
    /// Returns [`GamepadError::SessionDead`] without touching the state once the
    /// session is dead, and [`GamepadError::MalformedReport`] for short reports
    /// (the session stays active).
    pub fn handle_report(&self, report: &[u8]) -> Result<DecodeOutcome> {
        #[cfg(feature = "debug-log")]
        tracing::trace!(device = %self.id, len = report.len(), bytes = ?report, "report");

        let changes = {
            let mut guard = self.lock();
            let inner = &mut *guard;
            if inner.phase != SessionPhase::Active {
                inner.stats.dropped += 1;
                return Err(GamepadError::SessionDead(self.id.to_string()));
            }

            let before = self.bus.is_some().then(|| inner.state.clone());
            match inner.decoder.decode(report, &mut inner.state) {
                Ok(DecodeOutcome::Applied) => {
                    inner.stats.applied += 1;
                    before.map(|b| diff(&b, &inner.state)).unwrap_or_default()
                }
                Ok(outcome @ DecodeOutcome::Ignored { report_type }) => {
                    inner.stats.ignored += 1;
                    debug!(device = %self.id, report_type, "ignored report type");
                    return Ok(outcome);
                }
                Err(e @ GamepadError::MalformedReport { .. }) => {
                    inner.stats.malformed += 1;
                    debug!(device = %self.id, error = %e, "dropped malformed report");
                    return Err(e);
                }
                Err(e) => return Err(e),
            }
        };

        self.publish(changes);
        Ok(DecodeOutcome::Applied)
    }

    /// Runtime channel failure: mark dead, stop processing. No reconnect is attempted.
    pub fn handle_fault(&self, reason: &str) {
        if self.mark_dead(DeadReason::Fault(reason.to_string())) {
            warn!(device = %self.id, reason, "channel fault, controller marked dead");
        }
    }

    /// Move to `Dead` and publish `Disconnected`. Returns `false` if the session was
    /// already dead.
    pub fn mark_dead(&self, reason: DeadReason) -> bool {
        if !self.set_dead(reason) {
            return false;
        }
        self.publish_disconnected();
        true
    }

    /// State half of [`mark_dead`](Self::mark_dead). The directory calls this under
    /// its lock and publishes once the lock is released.
    pub(crate) fn set_dead(&self, reason: DeadReason) -> bool {
        let mut inner = self.lock();
        if inner.phase.is_dead() {
            return false;
        }
        debug!(device = %self.id, ?reason, "session dead");
        inner.phase = SessionPhase::Dead(reason);
        inner.state.mark_dirty();
        true
    }

    pub(crate) fn publish_disconnected(&self) {
        self.publish(vec![InputKind::Disconnected]);
    }

    /// Give up the device handle. The caller closes it, outside any directory lock.
    pub(crate) fn take_channels(&self) -> Option<Box<dyn DeviceChannels>> {
        let mut inner = self.lock();
        inner.state.set_handle_present(false);
        inner.channels.take()
    }

    /// Detach: mark dead and release the handle.
    pub fn mark_detached(&self) -> bool {
        let changed = self.mark_dead(DeadReason::Detached);
        self.close();
        changed
    }

    /// Close the device handle now.
    pub fn close(&self) {
        if let Some(mut channels) = self.take_channels() {
            channels.close();
        }
    }

    pub fn id(&self) -> &DeviceId {
        &self.id
    }

    pub fn candidate(&self) -> &DeviceCandidate {
        &self.candidate
    }

    pub fn signature(&self) -> &SignatureHandle {
        &self.signature
    }

    pub fn vendor_name(&self) -> &str {
        &self.signature.name
    }

    pub fn phase(&self) -> SessionPhase {
        self.lock().phase.clone()
    }

    pub fn is_connected(&self) -> bool {
        self.lock().state.is_connected()
    }

    /// Copy of the current controller state.
    pub fn state(&self) -> ControllerState {
        self.lock().state.clone()
    }

    pub fn stats(&self) -> SessionStats {
        self.lock().stats
    }

    pub fn describe(&self) -> Vec<ChannelDesc> {
        self.lock().decoder.describe()
    }

    pub fn snapshot(&self) -> ControllerSnapshot {
        let inner = self.lock();
        ControllerSnapshot {
            id: self.id.to_string(),
            vendor_name: self.signature.name.clone(),
            connected: inner.state.is_connected(),
            phase: inner.phase.clone(),
            buttons: inner.state.buttons().to_vec(),
            axes: inner.state.axes().to_vec(),
        }
    }
}

impl InboundHandler for DeviceSession {
    fn on_channel_event(&self, event: ChannelEvent) -> bool {
        match event {
            ChannelEvent::Report(bytes) => {
                !matches!(self.handle_report(&bytes), Err(GamepadError::SessionDead(_)))
            }
            ChannelEvent::Fault(reason) => {
                self.handle_fault(&reason);
                false
            }
        }
    }
}

impl Drop for DeviceSession {
    fn drop(&mut self) {
        let inner = self.inner.get_mut().unwrap_or_else(|e| e.into_inner());
        if let Some(mut channels) = inner.channels.take() {
            channels.close();
        }
    }
}

impl std::fmt::Debug for DeviceSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceSession")
            .field("id", &self.id)
            .field("vendor", &self.signature.name)
            .field("phase", &self.phase())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::virtual_input::{VirtualDevice, VirtualHost};
    use crate::decoders::xbox_one::{AXIS_DPAD_X, REPORT_TYPE_BUTTONS};
    use crate::eventbus::{EventFilter, InputEventBus, InputListener};
    use crate::vendor::VendorRegistry;

    fn xbox() -> SignatureHandle {
        VendorRegistry::new().register(0x045e, 0x02ea, "Xbox One S")
    }

    fn buttons(b4: u8, b5: u8) -> Vec<u8> {
        vec![REPORT_TYPE_BUTTONS, 0x00, 0x01, 0x0e, b4, b5, 0, 0, 0, 0]
    }

    fn open(dev: &VirtualDevice) -> Arc<DeviceSession> {
        let host = VirtualHost::new();
        host.attach(dev.clone());
        DeviceSession::open(dev.candidate(), xbox(), &host, None).unwrap()
    }

    #[test]
    fn open_claims_and_powers_on() {
        let dev = VirtualDevice::xbox_one("S1");
        let session = open(&dev);

        assert_eq!(session.phase(), SessionPhase::Active);
        assert!(session.is_connected());
        assert_eq!(dev.claimed(), [0]);
        assert_eq!(dev.written(), [vec![0x05, 0x20, 0x00, 0x01, 0x00]]);
        assert!(dev.is_streaming());
    }

    #[test]
    fn kernel_driver_is_detached_first() {
        let dev = VirtualDevice::xbox_one("S1").with_kernel_driver(0);
        let _session = open(&dev);
        assert!(!dev.kernel_driver_attached(0));
        assert_eq!(dev.claimed(), [0]);
    }

    #[test]
    fn detach_failure_aborts_construction() {
        let dev = VirtualDevice::xbox_one("S1")
            .with_kernel_driver(0)
            .failing_detach();
        let host = VirtualHost::new();
        host.attach(dev.clone());

        let err = DeviceSession::open(dev.candidate(), xbox(), &host, None).unwrap_err();
        assert!(matches!(
            err,
            GamepadError::ChannelAcquisitionFailed {
                source: TransportError::DetachKernelDriver { interface: 0, .. },
                ..
            }
        ));
        assert!(dev.claimed().is_empty());
        assert!(!dev.is_open());
    }

    #[test]
    fn missing_inbound_endpoint_aborts_construction() {
        let dev = VirtualDevice::xbox_one("S1").with_endpoints(0, &[0x01]);
        let host = VirtualHost::new();
        host.attach(dev.clone());

        let err = DeviceSession::open(dev.candidate(), xbox(), &host, None).unwrap_err();
        assert!(matches!(
            err,
            GamepadError::ChannelAcquisitionFailed {
                source: TransportError::NoInboundEndpoint,
                ..
            }
        ));
    }

    #[test]
    fn no_outbound_endpoint_skips_startup_packets() {
        let dev = VirtualDevice::xbox_one("S1").with_endpoints(0, &[0x81]);
        let session = open(&dev);
        assert_eq!(session.phase(), SessionPhase::Active);
        assert!(dev.written().is_empty());
    }

    #[test]
    fn reports_update_state() {
        let dev = VirtualDevice::xbox_one("S1");
        let session = open(&dev);

        assert!(dev.push_report(&buttons(0b0001_0000, 0b10)));
        let state = session.state();
        assert!(state.button(0).unwrap().pressed);
        assert_eq!(state.axis(AXIS_DPAD_X), Some(1.0));
        assert_eq!(session.stats().applied, 1);
    }

    #[test]
    fn malformed_report_keeps_session_active() {
        let dev = VirtualDevice::xbox_one("S1");
        let session = open(&dev);
        dev.push_report(&buttons(0b0001_0000, 0));
        let before = session.state();

        assert!(dev.push_report(&[REPORT_TYPE_BUTTONS, 0, 0]));
        assert_eq!(session.state(), before);
        assert_eq!(session.phase(), SessionPhase::Active);
        assert_eq!(session.stats().malformed, 1);
    }

    #[test]
    fn fault_is_terminal_and_later_reports_are_dropped() {
        let dev = VirtualDevice::xbox_one("S1");
        let session = open(&dev);

        assert!(!dev.fault("pipe error"));
        assert_eq!(
            session.phase(),
            SessionPhase::Dead(DeadReason::Fault("pipe error".into()))
        );
        assert!(!session.is_connected());

        let before = session.state();
        let err = session.handle_report(&buttons(0xff, 0xff)).unwrap_err();
        assert!(matches!(err, GamepadError::SessionDead(_)));
        assert_eq!(session.state(), before);
        assert_eq!(session.stats().dropped, 1);
        assert!(!session.is_connected());
    }

    #[test]
    fn close_releases_handle() {
        let dev = VirtualDevice::xbox_one("S1");
        let session = open(&dev);
        assert!(session.mark_detached());
        assert!(!session.mark_dead(DeadReason::Vanished));

        assert!(!dev.is_open());
        assert!(!session.is_connected());
        assert_eq!(session.phase(), SessionPhase::Dead(DeadReason::Detached));
    }

    #[test]
    fn dropping_session_closes_handle() {
        let dev = VirtualDevice::xbox_one("S1");
        let session = open(&dev);
        assert!(dev.is_open());
        drop(session);
        assert!(!dev.is_open());
        assert!(!dev.push_report(&buttons(0, 0)));
    }

    #[derive(Clone, Default)]
    struct Collect(Arc<Mutex<Vec<InputKind>>>);

    impl InputListener for Collect {
        fn on_input(&mut self, event: &InputEvent) {
            self.0.lock().unwrap().push(event.kind.clone());
        }
    }

    #[test]
    fn changes_are_published_as_deltas() {
        let bus: SharedEventBus = Arc::new(InputEventBus::new());
        let seen = Collect::default();
        bus.subscribe(seen.clone(), EventFilter::All, None);

        let dev = VirtualDevice::xbox_one("S1");
        let host = VirtualHost::new();
        host.attach(dev.clone());
        let session = DeviceSession::open(dev.candidate(), xbox(), &host, Some(bus)).unwrap();

        dev.push_report(&buttons(0b0001_0000, 0b01));
        dev.push_report(&buttons(0b0001_0000, 0b01)); // no change
        dev.push_report(&buttons(0, 0));
        session.mark_dead(DeadReason::Detached);

        assert_eq!(
            *seen.0.lock().unwrap(),
            [
                InputKind::ButtonPressed { button: 0 },
                InputKind::AxisMoved {
                    axis: AXIS_DPAD_X as u16,
                    value: -1.0
                },
                InputKind::ButtonReleased { button: 0 },
                InputKind::AxisMoved {
                    axis: AXIS_DPAD_X as u16,
                    value: 0.0
                },
                InputKind::Disconnected,
            ]
        );
    }
}
