use crate::config::GamepadConfig;
use crate::device::{DeviceCandidate, DeviceId, UsbHost};
use crate::directory::{DeviceDirectory, ReconcileReport};
use crate::error::{GamepadError, Result};
use crate::eventbus::{EventFilter, InputEventBus, InputListener, SharedEventBus};
use crate::session::DeviceSession;
use crate::snapshot::Snapshot;
use crate::vendor::VendorRegistry;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, info};

/// Everything a running controller stack needs: the vendor registry, the tracked
/// sessions, the transport and the event bus.
///
/// Nothing here is global; build one context per host and share it by reference.
pub struct GamepadContext {
    config: GamepadConfig,
    registry: RwLock<VendorRegistry>,
    directory: DeviceDirectory,
    host: Arc<dyn UsbHost>,
    bus: SharedEventBus,
}

impl GamepadContext {
    /// Context with the built-in vendor table and default settings.
    pub fn new(host: Arc<dyn UsbHost>) -> Result<Self> {
        Self::from_config(GamepadConfig::default(), host)
    }

    /// Build the registry from `config` (defaults first, then each vendor file).
    pub fn from_config(config: GamepadConfig, host: Arc<dyn UsbHost>) -> Result<Self> {
        config.validate()?;
        let mut registry = VendorRegistry::new();
        if config.include_default_vendors {
            registry.load_defaults()?;
        }
        for path in &config.vendor_files {
            registry.load_file(path)?;
        }
        info!(signatures = registry.len(), "gamepad context ready");

        let bus: SharedEventBus = Arc::new(InputEventBus::new());
        Ok(Self {
            config,
            registry: RwLock::new(registry),
            directory: DeviceDirectory::with_event_bus(bus.clone()),
            host,
            bus,
        })
    }

    pub fn config(&self) -> &GamepadConfig {
        &self.config
    }

    pub fn registry(&self) -> RwLockReadGuard<'_, VendorRegistry> {
        self.registry.read().unwrap_or_else(|e| e.into_inner())
    }

    /// Write access for registering signatures at runtime. Already tracked
    /// sessions keep the signature they were opened with.
    pub fn registry_mut(&self) -> RwLockWriteGuard<'_, VendorRegistry> {
        self.registry.write().unwrap_or_else(|e| e.into_inner())
    }

    pub fn directory(&self) -> &DeviceDirectory {
        &self.directory
    }

    pub fn event_bus(&self) -> &SharedEventBus {
        &self.bus
    }

    /// Enumerate attached devices and reconcile the directory against them.
    pub fn refresh(&self) -> Result<ReconcileReport> {
        let attached = self.host.enumerate().map_err(GamepadError::Enumeration)?;
        let registry = self.registry();
        let report = self
            .directory
            .reconcile(&registry, self.host.as_ref(), &attached);
        debug!(
            attached = attached.len(),
            opened = report.opened.len(),
            evicted = report.evicted.len(),
            "refresh"
        );
        Ok(report)
    }

    pub fn on_attach(&self, candidate: &DeviceCandidate) -> Result<Arc<DeviceSession>> {
        let registry = self.registry();
        self.directory
            .on_attach(&registry, self.host.as_ref(), candidate)
    }

    pub fn on_detach(&self, id: &DeviceId) -> bool {
        self.directory.on_detach(id)
    }

    /// Current state of every tracked controller, live and dead.
    pub fn list_controllers(&self) -> Snapshot {
        Snapshot(
            self.directory
                .all()
                .iter()
                .map(|session| session.snapshot())
                .collect(),
        )
    }

    /// Register a listener for input events. Returns its id.
    ///
    /// Listeners run on transport threads and on the thread calling `refresh` or
    /// `on_detach`, with no directory lock held. They may call `list_controllers`,
    /// `subscribe` and `unsubscribe`; `registry_mut` would block behind the
    /// registry read held by a running `refresh`.
    pub fn subscribe<L: InputListener + 'static>(
        &self,
        listener: L,
        filter: EventFilter,
        tag: Option<String>,
    ) -> u64 {
        self.bus.subscribe(listener, filter, tag)
    }

    pub fn unsubscribe(&self, id: u64) -> bool {
        self.bus.unsubscribe(id)
    }

    /// Mute or unmute a listener without removing it.
    pub fn set_listener_enabled(&self, id: u64, enabled: bool) -> bool {
        self.bus.set_enabled(id, enabled)
    }
}

impl std::fmt::Debug for GamepadContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GamepadContext")
            .field("config", &self.config)
            .field("signatures", &self.registry().len())
            .field("directory", &self.directory)
            .finish()
    }
}
