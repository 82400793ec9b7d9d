//! Raw USB transport over `nusb`.
//!
//! Xbox One family pads speak GIP over a vendor-class interface (class `0xff`),
//! not HID. The OS HID stack does not list them on Linux or macOS, and the pad
//! stays silent until the host writes the power-on packet to its OUT endpoint. This
//! backend talks to the endpoints directly:
//! - interfaces and endpoints come from the active configuration (alt setting 0),
//! - on Linux a bound kernel driver (`xpad`) is found through sysfs and detached,
//! - each started device gets one reader thread that keeps
//!   [`UsbConfig::transfers_in_flight`] interrupt IN transfers queued and pushes
//!   every completed one into the session's [`InboundSink`],
//! - writes go to the interrupt OUT endpoint and wait for completion.
//!
//! On Windows the interface must be bound to WinUSB for the claim to succeed.

use crate::config::UsbConfig;
use crate::device::{
    ChannelEvent, DeviceCandidate, DeviceChannels, DeviceFingerprint, EndpointDesc, InboundSink,
    InterfaceDesc, UsbHost,
};
use crate::error::TransportError;
use nusb::transfer::{In, Interrupt, Out, TransferError};
use nusb::{Device, DeviceInfo, Endpoint, Interface, MaybeFuture};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, warn};

/// Physical location, `bus-port.port...` like Linux sysfs names. Stable across
/// replugs into the same port, unlike the device address.
fn location(info: &DeviceInfo) -> String {
    let ports = info.port_chain();
    if ports.is_empty() {
        return format!("{}-addr{}", info.bus_id(), info.device_address());
    }
    let ports: Vec<String> = ports.iter().map(u8::to_string).collect();
    format!("{}-{}", info.bus_id(), ports.join("."))
}

fn candidate(info: &DeviceInfo) -> DeviceCandidate {
    let mut candidate = DeviceCandidate::new(DeviceFingerprint {
        vendor_id: info.vendor_id(),
        product_id: info.product_id(),
        serial_number: info.serial_number().map(str::to_owned),
        path: Some(location(info)),
    });
    candidate.product_string = info.product_string().map(str::to_owned);
    candidate
}

/// [`UsbHost`] backed by `nusb`.
pub struct RawUsbHost {
    config: UsbConfig,
}

impl RawUsbHost {
    pub fn new(config: UsbConfig) -> Result<Self, TransportError> {
        config
            .validate()
            .map_err(|e| TransportError::Open(e.to_string()))?;
        Ok(Self { config })
    }

    fn find(&self, candidate: &DeviceCandidate) -> Result<DeviceInfo, TransportError> {
        let wanted = candidate
            .fingerprint
            .path
            .as_deref()
            .ok_or_else(|| TransportError::Open("device has no path".into()))?;
        nusb::list_devices()
            .wait()
            .map_err(|e| TransportError::Io(e.to_string()))?
            .find(|info| {
                info.vendor_id() == candidate.vendor_id()
                    && info.product_id() == candidate.product_id()
                    && location(info) == wanted
            })
            .ok_or_else(|| TransportError::Open(format!("{} is not attached", candidate.id())))
    }
}

impl UsbHost for RawUsbHost {
    fn enumerate(&self) -> Result<Vec<DeviceCandidate>, TransportError> {
        let devices = nusb::list_devices()
            .wait()
            .map_err(|e| TransportError::Io(e.to_string()))?;
        Ok(devices.map(|info| candidate(&info)).collect())
    }

    fn open(&self, candidate: &DeviceCandidate) -> Result<Box<dyn DeviceChannels>, TransportError> {
        let info = self.find(candidate)?;
        let device = info
            .open()
            .wait()
            .map_err(|e| TransportError::Open(e.to_string()))?;

        let config = device
            .active_configuration()
            .map_err(|e| TransportError::Open(e.to_string()))?;
        let interfaces: Vec<InterfaceDesc> = config
            .interface_alt_settings()
            .filter(|alt| alt.alternate_setting() == 0)
            .map(|alt| InterfaceDesc {
                number: alt.interface_number(),
                endpoints: alt
                    .endpoints()
                    .map(|ep| EndpointDesc::from_address(ep.address()))
                    .collect(),
            })
            .collect();

        debug!(
            device = %candidate.id(),
            interfaces = interfaces.len(),
            "usb device opened"
        );
        Ok(Box::new(UsbChannels {
            label: candidate.id().to_string(),
            #[cfg(target_os = "linux")]
            sysfs_dir: info.sysfs_path().to_path_buf(),
            #[cfg(target_os = "linux")]
            configuration: config.configuration_value(),
            device,
            interfaces,
            claimed: None,
            outbound: None,
            stop: Arc::new(AtomicBool::new(false)),
            reader: None,
            config: self.config.clone(),
        }))
    }
}

/// One opened USB device.
struct UsbChannels {
    label: String,
    /// `/sys/.../1-2`; interface drivers show up under `1-2:<config>.<iface>/driver`.
    #[cfg(target_os = "linux")]
    sysfs_dir: std::path::PathBuf,
    #[cfg(target_os = "linux")]
    configuration: u8,
    device: Device,
    interfaces: Vec<InterfaceDesc>,
    claimed: Option<Interface>,
    /// Interrupt OUT endpoint, opened on first write.
    outbound: Option<(u8, Endpoint<Interrupt, Out>)>,
    stop: Arc<AtomicBool>,
    reader: Option<JoinHandle<()>>,
    config: UsbConfig,
}

impl UsbChannels {
    fn interface(&self) -> Result<&Interface, TransportError> {
        self.claimed.as_ref().ok_or(TransportError::Closed)
    }
}

fn read_loop(
    mut endpoint: Endpoint<Interrupt, In>,
    sink: InboundSink,
    stop: Arc<AtomicBool>,
    config: UsbConfig,
    label: String,
) {
    while !stop.load(Ordering::Relaxed) {
        while endpoint.pending() < config.transfers_in_flight {
            let buffer = endpoint.allocate(config.report_buffer_len);
            endpoint.submit(buffer);
        }

        // None: timed out, check the stop flag.
        let Some(completion) = endpoint.wait_next_complete(config.read_timeout()) else {
            continue;
        };
        match completion.status {
            Ok(()) => {
                let len = completion.actual_len.min(completion.buffer.len());
                if len == 0 {
                    continue;
                }
                if !sink.deliver(ChannelEvent::Report(completion.buffer[..len].to_vec())) {
                    break;
                }
            }
            Err(TransferError::Cancelled) => break,
            Err(e) => {
                warn!(device = %label, error = %e, "usb read failed");
                sink.deliver(ChannelEvent::Fault(e.to_string()));
                break;
            }
        }
    }
    endpoint.cancel_all();
    debug!(device = %label, "usb reader stopped");
}

impl DeviceChannels for UsbChannels {
    fn interfaces(&self) -> Vec<InterfaceDesc> {
        self.interfaces.clone()
    }

    #[cfg(target_os = "linux")]
    fn kernel_driver_active(&self, interface: u8) -> Result<bool, TransportError> {
        let Some(name) = self.sysfs_dir.file_name().and_then(|n| n.to_str()) else {
            return Ok(false);
        };
        Ok(self
            .sysfs_dir
            .join(format!("{name}:{}.{interface}", self.configuration))
            .join("driver")
            .exists())
    }

    #[cfg(not(target_os = "linux"))]
    fn kernel_driver_active(&self, _interface: u8) -> Result<bool, TransportError> {
        Ok(false)
    }

    #[cfg(target_os = "linux")]
    fn detach_kernel_driver(&mut self, interface: u8) -> Result<(), TransportError> {
        self.device
            .detach_kernel_driver(interface)
            .map_err(|e| TransportError::DetachKernelDriver {
                interface,
                reason: e.to_string(),
            })
    }

    #[cfg(not(target_os = "linux"))]
    fn detach_kernel_driver(&mut self, _interface: u8) -> Result<(), TransportError> {
        Ok(())
    }

    fn claim_interface(&mut self, interface: u8) -> Result<(), TransportError> {
        let claimed = self
            .device
            .claim_interface(interface)
            .wait()
            .map_err(|e| TransportError::Claim {
                interface,
                reason: e.to_string(),
            })?;
        self.claimed = Some(claimed);
        Ok(())
    }

    fn start_inbound(&mut self, endpoint: u8, sink: InboundSink) -> Result<(), TransportError> {
        let inbound = self
            .interface()?
            .endpoint::<Interrupt, In>(endpoint)
            .map_err(|e| TransportError::Io(e.to_string()))?;
        let stop = self.stop.clone();
        let config = self.config.clone();
        let label = self.label.clone();

        let handle = std::thread::Builder::new()
            .name(format!("padlink-usb-{}", self.label))
            .spawn(move || read_loop(inbound, sink, stop, config, label))
            .map_err(|e| TransportError::Io(e.to_string()))?;
        self.reader = Some(handle);
        Ok(())
    }

    fn write(&mut self, endpoint: u8, data: &[u8]) -> Result<usize, TransportError> {
        if self.outbound.as_ref().map(|(addr, _)| *addr) != Some(endpoint) {
            // An endpoint can be open only once per interface.
            self.outbound = None;
            let opened = self
                .interface()?
                .endpoint::<Interrupt, Out>(endpoint)
                .map_err(|e| TransportError::Io(e.to_string()))?;
            self.outbound = Some((endpoint, opened));
        }
        let Some((_, out)) = self.outbound.as_mut() else {
            return Err(TransportError::Closed);
        };

        out.submit(data.to_vec().into());
        let Some(completion) = out.wait_next_complete(self.config.write_timeout()) else {
            out.cancel_all();
            // Collect the cancelled transfer so the next write sees its own completion.
            let _ = out.wait_next_complete(Duration::from_millis(100));
            return Err(TransportError::Io(format!(
                "write to endpoint {endpoint:#04x} timed out"
            )));
        };
        completion
            .status
            .map_err(|e| TransportError::Io(e.to_string()))?;
        Ok(completion.actual_len)
    }

    fn close(&mut self) {
        // Not joined, same as the hid reader: close may run on the reader thread.
        self.stop.store(true, Ordering::Relaxed);
        self.reader = None;
        self.outbound = None;
        self.claimed = None;
    }
}

impl Drop for UsbChannels {
    fn drop(&mut self) {
        self.close();
    }
}
