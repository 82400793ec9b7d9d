//! In-memory transport.
//!
//! [`VirtualHost`] implements [`UsbHost`] over a list of scripted [`VirtualDevice`]s.
//! Reports and faults are injected with [`VirtualDevice::push_report`] /
//! [`VirtualDevice::fault`] and delivered synchronously on the caller's thread, the
//! same way a real backend delivers them from its I/O thread.
//!
//! Devices can be told to fail at each acquisition step (open, kernel driver
//! detach, claim, write) to exercise the construction error paths.

use crate::device::{
    ChannelEvent, DeviceCandidate, DeviceChannels, DeviceFingerprint, DeviceId, EndpointDesc,
    InboundSink, InterfaceDesc, UsbHost,
};
use crate::error::TransportError;
use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Default)]
struct VirtualState {
    interfaces: Vec<InterfaceDesc>,
    kernel_drivers: BTreeSet<u8>,
    fail_open: bool,
    fail_detach: bool,
    fail_claim: bool,
    fail_write: bool,
    claimed: Vec<u8>,
    written: Vec<Vec<u8>>,
    sink: Option<InboundSink>,
    open: bool,
}

/// A scripted device. Clones share the same underlying state.
#[derive(Clone)]
pub struct VirtualDevice {
    candidate: DeviceCandidate,
    shared: Arc<Mutex<VirtualState>>,
}

fn lock(shared: &Mutex<VirtualState>) -> MutexGuard<'_, VirtualState> {
    shared.lock().unwrap_or_else(|e| e.into_inner())
}

impl VirtualDevice {
    /// A device with one interface (0) carrying IN `0x81` and OUT `0x01`.
    pub fn new(vendor_id: u16, product_id: u16, serial: &str) -> Self {
        let fingerprint = DeviceFingerprint {
            vendor_id,
            product_id,
            serial_number: Some(serial.to_string()),
            path: Some(format!("virtual:{serial}")),
        };
        let mut candidate = DeviceCandidate::new(fingerprint);
        candidate.product_string = Some(format!("Virtual Controller {serial}"));
        candidate.interface_number = Some(0);

        let state = VirtualState {
            interfaces: vec![InterfaceDesc {
                number: 0,
                endpoints: vec![
                    EndpointDesc::from_address(0x81),
                    EndpointDesc::from_address(0x01),
                ],
            }],
            ..VirtualState::default()
        };
        Self {
            candidate,
            shared: Arc::new(Mutex::new(state)),
        }
    }

    /// Xbox One S controller (`045e:02ea`).
    pub fn xbox_one(serial: &str) -> Self {
        Self::new(0x045e, 0x02ea, serial)
    }

    /// Put the device on another port. Changes its id.
    pub fn with_path(mut self, path: &str) -> Self {
        self.candidate.fingerprint.path = Some(path.to_string());
        self
    }

    /// Replace the interface list with one interface holding `endpoints`.
    pub fn with_endpoints(self, interface: u8, endpoints: &[u8]) -> Self {
        lock(&self.shared).interfaces = vec![InterfaceDesc {
            number: interface,
            endpoints: endpoints.iter().map(|&a| EndpointDesc::from_address(a)).collect(),
        }];
        self
    }

    pub fn with_interfaces(self, interfaces: Vec<InterfaceDesc>) -> Self {
        lock(&self.shared).interfaces = interfaces;
        self
    }

    /// Pretend the OS bound its own driver to `interface`.
    pub fn with_kernel_driver(self, interface: u8) -> Self {
        lock(&self.shared).kernel_drivers.insert(interface);
        self
    }

    pub fn failing_open(self) -> Self {
        lock(&self.shared).fail_open = true;
        self
    }

    pub fn failing_detach(self) -> Self {
        lock(&self.shared).fail_detach = true;
        self
    }

    pub fn failing_claim(self) -> Self {
        lock(&self.shared).fail_claim = true;
        self
    }

    pub fn failing_write(self) -> Self {
        lock(&self.shared).fail_write = true;
        self
    }

    pub fn candidate(&self) -> &DeviceCandidate {
        &self.candidate
    }

    pub fn id(&self) -> DeviceId {
        self.candidate.id()
    }

    fn deliver(&self, event: ChannelEvent) -> bool {
        // Clone the sink out so the session can run without this lock held.
        let sink = lock(&self.shared).sink.clone();
        match sink {
            Some(sink) => sink.deliver(event),
            None => false,
        }
    }

    /// Deliver one input report. `false` if nothing is listening or the
    /// receiver asked to stop.
    pub fn push_report(&self, report: &[u8]) -> bool {
        self.deliver(ChannelEvent::Report(report.to_vec()))
    }

    /// Deliver a channel fault.
    pub fn fault(&self, reason: &str) -> bool {
        self.deliver(ChannelEvent::Fault(reason.to_string()))
    }

    pub fn claimed(&self) -> Vec<u8> {
        lock(&self.shared).claimed.clone()
    }

    /// Packets written to the outbound endpoint, in order.
    pub fn written(&self) -> Vec<Vec<u8>> {
        lock(&self.shared).written.clone()
    }

    pub fn kernel_driver_attached(&self, interface: u8) -> bool {
        lock(&self.shared).kernel_drivers.contains(&interface)
    }

    pub fn is_open(&self) -> bool {
        lock(&self.shared).open
    }

    /// Inbound delivery has been started and not closed.
    pub fn is_streaming(&self) -> bool {
        lock(&self.shared).sink.is_some()
    }
}

struct VirtualChannels {
    shared: Arc<Mutex<VirtualState>>,
}

impl DeviceChannels for VirtualChannels {
    fn interfaces(&self) -> Vec<InterfaceDesc> {
        lock(&self.shared).interfaces.clone()
    }

    fn kernel_driver_active(&self, interface: u8) -> Result<bool, TransportError> {
        Ok(lock(&self.shared).kernel_drivers.contains(&interface))
    }

    fn detach_kernel_driver(&mut self, interface: u8) -> Result<(), TransportError> {
        let mut st = lock(&self.shared);
        if st.fail_detach {
            return Err(TransportError::DetachKernelDriver {
                interface,
                reason: "resource busy".into(),
            });
        }
        st.kernel_drivers.remove(&interface);
        Ok(())
    }

    fn claim_interface(&mut self, interface: u8) -> Result<(), TransportError> {
        let mut st = lock(&self.shared);
        if st.fail_claim {
            return Err(TransportError::Claim {
                interface,
                reason: "access denied".into(),
            });
        }
        if st.kernel_drivers.contains(&interface) {
            return Err(TransportError::Claim {
                interface,
                reason: "kernel driver still attached".into(),
            });
        }
        st.claimed.push(interface);
        Ok(())
    }

    fn start_inbound(&mut self, _endpoint: u8, sink: InboundSink) -> Result<(), TransportError> {
        let mut st = lock(&self.shared);
        if !st.open {
            return Err(TransportError::Closed);
        }
        st.sink = Some(sink);
        Ok(())
    }

    fn write(&mut self, _endpoint: u8, data: &[u8]) -> Result<usize, TransportError> {
        let mut st = lock(&self.shared);
        if st.fail_write {
            return Err(TransportError::Io("write timed out".into()));
        }
        st.written.push(data.to_vec());
        Ok(data.len())
    }

    fn close(&mut self) {
        let mut st = lock(&self.shared);
        st.sink = None;
        st.claimed.clear();
        st.open = false;
    }
}

/// Host over a mutable list of attached virtual devices.
#[derive(Default)]
pub struct VirtualHost {
    devices: Mutex<Vec<VirtualDevice>>,
}

impl VirtualHost {
    pub fn new() -> Self {
        Self::default()
    }

    fn devices(&self) -> MutexGuard<'_, Vec<VirtualDevice>> {
        self.devices.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Plug a device in. A device with the same id is replaced.
    pub fn attach(&self, device: VirtualDevice) {
        let mut devices = self.devices();
        let id = device.id();
        devices.retain(|d| d.id() != id);
        devices.push(device);
    }

    /// Unplug a device. Its channels stop delivering.
    pub fn detach(&self, id: &DeviceId) -> Option<VirtualDevice> {
        let mut devices = self.devices();
        let pos = devices.iter().position(|d| &d.id() == id)?;
        let device = devices.remove(pos);
        lock(&device.shared).sink = None;
        Some(device)
    }

    pub fn device(&self, id: &DeviceId) -> Option<VirtualDevice> {
        self.devices().iter().find(|d| &d.id() == id).cloned()
    }
}

impl UsbHost for VirtualHost {
    fn enumerate(&self) -> Result<Vec<DeviceCandidate>, TransportError> {
        Ok(self.devices().iter().map(|d| d.candidate.clone()).collect())
    }

    fn open(&self, candidate: &DeviceCandidate) -> Result<Box<dyn DeviceChannels>, TransportError> {
        let id = candidate.id();
        let device = self
            .device(&id)
            .ok_or_else(|| TransportError::Open(format!("{id} is not attached")))?;

        let mut st = lock(&device.shared);
        if st.fail_open {
            return Err(TransportError::Open("permission denied".into()));
        }
        st.open = true;
        drop(st);

        Ok(Box::new(VirtualChannels {
            shared: device.shared.clone(),
        }))
    }
}
