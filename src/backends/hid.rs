//! `hidapi` transport.
//!
//! Devices are listed and opened through `hidapi`; each started device gets one
//! reader thread that blocks in `read_timeout` and pushes every report into the
//! session's [`InboundSink`]. That thread is the transport's I/O thread: the
//! session decodes on it.
//!
//! `hidapi` talks to the OS HID driver (hidraw, IOHIDManager, HID.dll) rather than
//! to raw USB endpoints, so:
//! - every device exposes a single interface with a single IN endpoint (`0x81`),
//! - there is no kernel driver to detach; claiming is implicit in opening,
//! - no OUT endpoint is advertised, so decoder startup packets are not sent.
//!
//! This only reaches pads that present themselves as HID, or that an OS driver has
//! already powered on and re-exported as HID (the Windows XInput HID shim, some
//! Bluetooth pads). Wired Xbox One pads are vendor-class USB: `hidapi` does not list
//! them on Linux or macOS, and they stay silent without the power-on packet. Use
//! the `usb` feature (`backends::usb::RawUsbHost`) for those.

use crate::config::HidConfig;
use crate::device::{
    ChannelEvent, DeviceCandidate, DeviceChannels, DeviceFingerprint, EndpointDesc, InboundSink,
    InterfaceDesc, UsbHost,
};
use crate::error::TransportError;
use hidapi::{DeviceInfo, HidApi, HidDevice};
use std::ffi::CString;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use tracing::{debug, warn};

const INBOUND_ENDPOINT: u8 = 0x81;

fn fingerprint(info: &DeviceInfo) -> DeviceFingerprint {
    DeviceFingerprint {
        vendor_id: info.vendor_id(),
        product_id: info.product_id(),
        serial_number: info.serial_number().map(|s| s.to_owned()),
        path: Some(info.path().to_string_lossy().to_string()),
    }
}

fn candidate(info: &DeviceInfo) -> DeviceCandidate {
    let interface_number = {
        let n = info.interface_number();
        if n >= 0 {
            Some(n)
        } else {
            None
        }
    };
    DeviceCandidate {
        fingerprint: fingerprint(info),
        product_string: info.product_string().map(|s| s.to_string()),
        interface_number,
    }
}

/// [`UsbHost`] backed by `hidapi`.
pub struct HidHost {
    api: Mutex<HidApi>,
    config: HidConfig,
}

impl HidHost {
    pub fn new(config: HidConfig) -> Result<Self, TransportError> {
        config
            .validate()
            .map_err(|e| TransportError::Open(e.to_string()))?;
        let api = HidApi::new().map_err(|e| TransportError::Open(e.to_string()))?;
        Ok(Self {
            api: Mutex::new(api),
            config,
        })
    }
}

impl UsbHost for HidHost {
    fn enumerate(&self) -> Result<Vec<DeviceCandidate>, TransportError> {
        let mut api = self.api.lock().unwrap_or_else(|e| e.into_inner());
        api.refresh_devices()
            .map_err(|e| TransportError::Io(e.to_string()))?;
        Ok(api.device_list().map(candidate).collect())
    }

    fn open(&self, candidate: &DeviceCandidate) -> Result<Box<dyn DeviceChannels>, TransportError> {
        let path = candidate
            .fingerprint
            .path
            .as_deref()
            .ok_or_else(|| TransportError::Open("device has no path".into()))?;
        let path = CString::new(path).map_err(|e| TransportError::Open(e.to_string()))?;

        let device = {
            let api = self.api.lock().unwrap_or_else(|e| e.into_inner());
            api.open_path(&path)
                .map_err(|e| TransportError::Open(e.to_string()))?
        };

        debug!(device = %candidate.id(), "hid device opened");
        Ok(Box::new(HidChannels {
            label: candidate.id().to_string(),
            interface: candidate
                .interface_number
                .and_then(|n| u8::try_from(n).ok())
                .unwrap_or(0),
            device: Some(device),
            stop: Arc::new(AtomicBool::new(false)),
            reader: None,
            config: self.config.clone(),
        }))
    }
}

/// One opened hidapi device.
struct HidChannels {
    label: String,
    interface: u8,
    /// Moved into the reader thread by `start_inbound`.
    device: Option<HidDevice>,
    stop: Arc<AtomicBool>,
    reader: Option<JoinHandle<()>>,
    config: HidConfig,
}

fn read_loop(
    device: HidDevice,
    sink: InboundSink,
    stop: Arc<AtomicBool>,
    config: HidConfig,
    label: String,
) {
    let mut buf = vec![0u8; config.report_buffer_len];
    let timeout = i32::try_from(config.read_timeout().as_millis()).unwrap_or(i32::MAX);

    while !stop.load(Ordering::Relaxed) {
        match device.read_timeout(&mut buf, timeout) {
            Ok(0) => continue, // timed out, check the stop flag
            Ok(n) => {
                if !sink.deliver(ChannelEvent::Report(buf[..n].to_vec())) {
                    break;
                }
            }
            Err(e) => {
                warn!(device = %label, error = %e, "hid read failed");
                sink.deliver(ChannelEvent::Fault(e.to_string()));
                break;
            }
        }
    }
    debug!(device = %label, "hid reader stopped");
}

impl DeviceChannels for HidChannels {
    fn interfaces(&self) -> Vec<InterfaceDesc> {
        vec![InterfaceDesc {
            number: self.interface,
            endpoints: vec![EndpointDesc::from_address(INBOUND_ENDPOINT)],
        }]
    }

    fn kernel_driver_active(&self, _interface: u8) -> Result<bool, TransportError> {
        Ok(false)
    }

    fn detach_kernel_driver(&mut self, _interface: u8) -> Result<(), TransportError> {
        Ok(())
    }

    fn claim_interface(&mut self, _interface: u8) -> Result<(), TransportError> {
        if self.device.is_none() {
            return Err(TransportError::Closed);
        }
        Ok(())
    }

    fn start_inbound(&mut self, _endpoint: u8, sink: InboundSink) -> Result<(), TransportError> {
        let device = self.device.take().ok_or(TransportError::Closed)?;
        let stop = self.stop.clone();
        let config = self.config.clone();
        let label = self.label.clone();

        let handle = std::thread::Builder::new()
            .name(format!("padlink-hid-{}", self.label))
            .spawn(move || read_loop(device, sink, stop, config, label))
            .map_err(|e| TransportError::Io(e.to_string()))?;
        self.reader = Some(handle);
        Ok(())
    }

    fn write(&mut self, _endpoint: u8, _data: &[u8]) -> Result<usize, TransportError> {
        Err(TransportError::Io("hidapi backend has no outbound endpoint".into()))
    }

    fn close(&mut self) {
        // Not joined: close may run on the reader thread itself when it drops the
        // last session reference. The thread exits within one read timeout.
        self.stop.store(true, Ordering::Relaxed);
        self.reader = None;
        self.device = None;
    }
}

impl Drop for HidChannels {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_length_buffer_is_refused_before_opening_hidapi() {
        let config = HidConfig {
            report_buffer_len: 0,
            ..HidConfig::default()
        };
        assert!(matches!(
            HidHost::new(config),
            Err(TransportError::Open(msg)) if msg.contains("report_buffer_len")
        ));
    }
}
