//! The set of tracked controller sessions.
//!
//! [`DeviceDirectory`] owns one [`DeviceSession`] per physical device, keyed by
//! [`DeviceId`] and kept in insertion order. All inserts and evictions go through a
//! single mutex that is held for the whole of a `reconcile`, `on_attach` or
//! `on_detach` call. Device handles given up during those calls are closed, and the
//! `Disconnected` events of sessions that died are published, after the lock is
//! released. Listeners may therefore read the directory from `on_input`.
//!
//! Lifecycle rules:
//! - a candidate that matches no vendor signature is skipped,
//! - a candidate whose channels cannot be acquired is skipped, never inserted,
//! - a detached session stays listed (dead) until the next `reconcile` or
//!   [`DeviceDirectory::evict_dead`],
//! - a faulted session is never reopened by `reconcile`; only an explicit
//!   `on_attach` replaces it.

use crate::device::{DeviceCandidate, DeviceChannels, DeviceId, UsbHost};
use crate::error::{GamepadError, Result};
use crate::eventbus::SharedEventBus;
use crate::session::{DeadReason, DeviceSession, SessionPhase};
use crate::vendor::VendorRegistry;
use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info, warn};

/// What a [`DeviceDirectory::reconcile`] pass did.
#[derive(Debug, Default)]
pub struct ReconcileReport {
    /// Sessions created, including replacements of dead ones.
    pub opened: Vec<DeviceId>,
    /// Candidates with no matching vendor signature.
    pub unknown: Vec<DeviceId>,
    /// Candidates whose channels could not be acquired.
    pub failed: Vec<(DeviceId, GamepadError)>,
    /// Sessions removed because their device was no longer attached.
    pub evicted: Vec<DeviceId>,
}

impl ReconcileReport {
    /// Nothing was opened or evicted.
    pub fn is_unchanged(&self) -> bool {
        self.opened.is_empty() && self.evicted.is_empty()
    }
}

#[derive(Default)]
pub struct DeviceDirectory {
    sessions: Mutex<Vec<Arc<DeviceSession>>>,
    bus: Option<SharedEventBus>,
}

/// Work collected under the directory lock and carried out on drop, which must
/// happen after the lock guard is gone: handles are closed, then `Disconnected` is
/// published for every session that died.
#[derive(Default)]
struct Released {
    handles: Vec<Box<dyn DeviceChannels>>,
    died: Vec<Arc<DeviceSession>>,
}

impl Released {
    fn take_from(&mut self, session: &DeviceSession) {
        if let Some(channels) = session.take_channels() {
            self.handles.push(channels);
        }
    }

    /// Mark `session` dead and release its handle. `false` if it was already dead.
    fn kill(&mut self, session: &Arc<DeviceSession>, reason: DeadReason) -> bool {
        let changed = session.set_dead(reason);
        if changed {
            self.died.push(session.clone());
        }
        self.take_from(session);
        changed
    }
}

impl Drop for Released {
    fn drop(&mut self) {
        for mut channels in self.handles.drain(..) {
            channels.close();
        }
        for session in self.died.drain(..) {
            session.publish_disconnected();
        }
    }
}

/// Dead sessions that `reconcile` reopens when their device shows up again.
fn reopens_on_reconcile(phase: &SessionPhase) -> bool {
    matches!(
        phase,
        SessionPhase::Dead(DeadReason::Detached | DeadReason::Vanished)
    )
}

impl DeviceDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sessions created by this directory publish their input events to `bus`.
    pub fn with_event_bus(bus: SharedEventBus) -> Self {
        Self {
            sessions: Mutex::default(),
            bus: Some(bus),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Arc<DeviceSession>>> {
        self.sessions.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn open_session(
        &self,
        registry: &VendorRegistry,
        host: &dyn UsbHost,
        candidate: &DeviceCandidate,
    ) -> Result<Arc<DeviceSession>> {
        let signature = registry
            .lookup(candidate.vendor_id(), candidate.product_id())
            .ok_or(GamepadError::NoMatchingVendor {
                vendor_id: candidate.vendor_id(),
                product_id: candidate.product_id(),
            })?;
        DeviceSession::open(candidate, signature, host, self.bus.clone())
    }

    /// Bring the directory in line with `attached`.
    ///
    /// Untracked candidates are opened and inserted; tracked live sessions are left
    /// alone; sessions whose device is missing from `attached` are marked dead and
    /// evicted. Running it twice with the same list changes nothing the second time.
    pub fn reconcile(
        &self,
        registry: &VendorRegistry,
        host: &dyn UsbHost,
        attached: &[DeviceCandidate],
    ) -> ReconcileReport {
        let mut report = ReconcileReport::default();
        // Declared before the guard so it is dropped after it.
        let mut released = Released::default();
        let mut sessions = self.lock();

        let present: HashSet<DeviceId> = attached.iter().map(DeviceCandidate::id).collect();
        sessions.retain(|session| {
            if present.contains(session.id()) {
                return true;
            }
            released.kill(session, DeadReason::Vanished);
            debug!(device = %session.id(), "evicted: no longer attached");
            report.evicted.push(session.id().clone());
            false
        });

        for candidate in attached {
            let id = candidate.id();
            let existing = sessions.iter().position(|s| s.id() == &id);
            if let Some(pos) = existing {
                if !reopens_on_reconcile(&sessions[pos].phase()) {
                    continue;
                }
                // The old handle must be gone before the device is opened again.
                sessions[pos].close();
            }

            match self.open_session(registry, host, candidate) {
                Ok(session) => {
                    info!(
                        device = %id,
                        vendor = %session.vendor_name(),
                        "controller attached"
                    );
                    match existing {
                        Some(pos) => sessions[pos] = session,
                        None => sessions.push(session),
                    }
                    report.opened.push(id);
                }
                Err(GamepadError::NoMatchingVendor { .. }) => {
                    debug!(device = %id, "no matching vendor signature, skipped");
                    report.unknown.push(id);
                }
                Err(e) => {
                    warn!(device = %id, error = %e, "could not open controller");
                    report.failed.push((id, e));
                }
            }
        }

        drop(sessions);
        drop(released);
        report
    }

    /// Track one newly attached device.
    ///
    /// A live session with the same id is returned as-is. A dead one is replaced by
    /// a fresh session; if opening fails the directory is left unchanged.
    pub fn on_attach(
        &self,
        registry: &VendorRegistry,
        host: &dyn UsbHost,
        candidate: &DeviceCandidate,
    ) -> Result<Arc<DeviceSession>> {
        let id = candidate.id();
        let mut sessions = self.lock();

        let existing = sessions.iter().position(|s| s.id() == &id);
        if let Some(pos) = existing {
            if !sessions[pos].phase().is_dead() {
                return Ok(sessions[pos].clone());
            }
            sessions[pos].close();
        }

        let session = match self.open_session(registry, host, candidate) {
            Ok(session) => session,
            Err(e @ GamepadError::NoMatchingVendor { .. }) => {
                debug!(device = %id, "no matching vendor signature, skipped");
                return Err(e);
            }
            Err(e) => {
                warn!(device = %id, error = %e, "could not open controller");
                return Err(e);
            }
        };

        info!(device = %id, vendor = %session.vendor_name(), "controller attached");
        match existing {
            Some(pos) => sessions[pos] = session.clone(),
            None => sessions.push(session.clone()),
        }
        Ok(session)
    }

    /// Mark the session for `id` dead and release its handle. It stays listed until
    /// the next reconcile. Returns `false` if `id` is unknown or already dead.
    pub fn on_detach(&self, id: &DeviceId) -> bool {
        let mut released = Released::default();
        let changed = {
            let sessions = self.lock();
            let Some(session) = sessions.iter().find(|s| s.id() == id) else {
                debug!(device = %id, "detach for untracked device");
                return false;
            };
            released.kill(session, DeadReason::Detached)
        };
        drop(released);
        if changed {
            info!(device = %id, "controller detached");
        }
        changed
    }

    /// Drop every dead session now. Returns how many were removed.
    pub fn evict_dead(&self) -> usize {
        let mut released = Released::default();
        let mut sessions = self.lock();
        let before = sessions.len();
        sessions.retain(|session| {
            if !session.phase().is_dead() {
                return true;
            }
            released.take_from(session);
            false
        });
        before - sessions.len()
    }

    /// Tracked sessions in insertion order.
    pub fn all(&self) -> Vec<Arc<DeviceSession>> {
        self.lock().clone()
    }

    pub fn get(&self, id: &DeviceId) -> Option<Arc<DeviceSession>> {
        self.lock().iter().find(|s| s.id() == id).cloned()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

impl std::fmt::Debug for DeviceDirectory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceDirectory")
            .field("sessions", &*self.lock())
            .finish()
    }
}
