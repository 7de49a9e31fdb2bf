//! nusb-based USB transport implementation.

use nusb::transfer::{Bulk, ControlIn, ControlOut, ControlType, In, Out, Recipient};
use nusb::{Device, Interface, MaybeFuture, list_devices};
use std::io::{Read, Write};
use tracing::{debug, info, instrument};

use super::traits::{AntTransport, TransportError};

/// Dynastream USB stick, used with Garmin/Suunto equipment.
pub const DYNASTREAM_VID: u16 = 0x0FCF;
pub const DYNASTREAM_PID: u16 = 0x1008;

/// Tracker base station. Carries extra hardware for tracker charging and
/// needs a vendor control-transfer bring-up before bulk traffic flows.
pub const TRACKER_BASE_VID: u16 = 0x10C4;
pub const TRACKER_BASE_PID: u16 = 0x84C4;

/// All supported (VID, PID) pairs for device discovery.
pub const SUPPORTED_DEVICES: &[(u16, u16)] = &[
    (TRACKER_BASE_VID, TRACKER_BASE_PID),
    (DYNASTREAM_VID, DYNASTREAM_PID),
];

/// nusb-based USB transport.
pub struct NusbTransport {
    interface: Interface,
    in_endpoint: u8,
    out_endpoint: u8,
    vid: u16,
    pid: u16,
}

impl NusbTransport {
    /// Open any matching transceiver (tries all supported VID/PID pairs).
    #[instrument(level = "info")]
    pub fn open() -> Result<Self, TransportError> {
        let devices = list_devices()
            .wait()
            .map_err(|e| TransportError::OpenFailed(e.to_string()))?;

        for device_info in devices {
            if SUPPORTED_DEVICES
                .contains(&(device_info.vendor_id(), device_info.product_id()))
            {
                return Self::open_device_info(device_info);
            }
        }

        Err(TransportError::DeviceNotFound {
            vid: TRACKER_BASE_VID,
            pid: TRACKER_BASE_PID,
        })
    }

    /// Open a device with specific VID/PID.
    #[instrument(level = "info", fields(vid = format!("{:04X}", vid), pid = format!("{:04X}", pid)))]
    pub fn open_with_ids(vid: u16, pid: u16) -> Result<Self, TransportError> {
        let device_info = list_devices()
            .wait()
            .map_err(|e| TransportError::OpenFailed(e.to_string()))?
            .find(|d| d.vendor_id() == vid && d.product_id() == pid)
            .ok_or(TransportError::DeviceNotFound { vid, pid })?;

        Self::open_device_info(device_info)
    }

    fn open_device_info(device_info: nusb::DeviceInfo) -> Result<Self, TransportError> {
        let vid = device_info.vendor_id();
        let pid = device_info.product_id();

        info!(
            vendor_id = %format!("{:04X}", vid),
            product_id = %format!("{:04X}", pid),
            "Found transceiver"
        );

        let device = device_info
            .open()
            .wait()
            .map_err(|e| TransportError::OpenFailed(e.to_string()))?;

        let interface =
            device
                .claim_interface(0)
                .wait()
                .map_err(|e| TransportError::ClaimInterfaceFailed {
                    interface: 0,
                    message: e.to_string(),
                })?;

        // Find BULK endpoints
        let mut in_endpoint: u8 = 0;
        let mut out_endpoint: u8 = 0;

        for config in device.configurations() {
            for iface in config.interfaces() {
                if iface.interface_number() == 0 {
                    for alt in iface.alt_settings() {
                        for ep in alt.endpoints() {
                            if ep.transfer_type() == nusb::descriptors::TransferType::Bulk {
                                if ep.direction() == nusb::transfer::Direction::In {
                                    in_endpoint = ep.address();
                                } else {
                                    out_endpoint = ep.address();
                                }
                            }
                        }
                    }
                }
            }
        }

        if in_endpoint == 0 {
            return Err(TransportError::EndpointNotFound {
                ep_type: "Bulk".into(),
                direction: "In".into(),
            });
        }
        if out_endpoint == 0 {
            return Err(TransportError::EndpointNotFound {
                ep_type: "Bulk".into(),
                direction: "Out".into(),
            });
        }

        let transport = Self {
            interface,
            in_endpoint,
            out_endpoint,
            vid,
            pid,
        };

        if vid == TRACKER_BASE_VID && pid == TRACKER_BASE_PID {
            transport.init_tracker_base(&device)?;
        }

        info!(
            in_ep = %format!("0x{:02X}", in_endpoint),
            out_ep = %format!("0x{:02X}", out_endpoint),
            "Transceiver opened successfully"
        );

        Ok(transport)
    }

    /// Vendor control-transfer bring-up for the tracker base station.
    ///
    /// The sequence (baud/latch setup for the bridge chip) is undocumented;
    /// it is replayed exactly as captured from the vendor driver.
    fn init_tracker_base(&self, device: &Device) -> Result<(), TransportError> {
        let out = |request: u8, value: u16, data: &[u8]| -> Result<(), TransportError> {
            device
                .control_out(ControlOut {
                    control_type: ControlType::Vendor,
                    recipient: Recipient::Device,
                    request,
                    value,
                    index: 0,
                    data,
                }, std::time::Duration::from_millis(1000))
                .wait()
                .map_err(|e| TransportError::OpenFailed(e.to_string()))
        };

        out(0x00, 0xFFFF, &[])?;
        out(0x01, 0x2000, &[])?;
        out(0x00, 0x0000, &[])?;
        out(0x00, 0xFFFF, &[])?;
        out(0x01, 0x2000, &[])?;
        out(0x01, 0x004A, &[])?;

        // Bridge status, expected to read back 0x02.
        let status = device
            .control_in(ControlIn {
                control_type: ControlType::Vendor,
                recipient: Recipient::Device,
                request: 0xFF,
                value: 0x370B,
                index: 0,
                length: 1,
            }, std::time::Duration::from_millis(1000))
            .wait()
            .map_err(|e| TransportError::OpenFailed(e.to_string()))?;
        debug!(status = ?status, "Base bridge status");

        out(0x03, 0x0800, &[])?;
        out(
            0x13,
            0x0000,
            &[
                0x08, 0x00, 0x00, 0x00, 0x40, 0x00, 0x00, 0x00, //
                0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
            ],
        )?;
        out(0x12, 0x000C, &[])?;

        // Drain whatever the base queued during bring-up.
        let _ = self.read(1024);
        Ok(())
    }
}

impl AntTransport for NusbTransport {
    #[instrument(skip(self, data), fields(len = data.len()))]
    fn write(&self, data: &[u8]) -> Result<usize, TransportError> {
        let ep = self
            .interface
            .endpoint::<Bulk, Out>(self.out_endpoint)
            .map_err(|e| TransportError::WriteFailed(e.to_string()))?;

        let mut writer = ep.writer(4096);
        writer
            .write_all(data)
            .map_err(|e| TransportError::WriteFailed(e.to_string()))?;
        writer
            .flush()
            .map_err(|e| TransportError::WriteFailed(e.to_string()))?;

        debug!(bytes_written = data.len(), "Write complete");
        Ok(data.len())
    }

    #[instrument(skip(self), fields(max_len))]
    fn read(&self, max_len: usize) -> Result<Vec<u8>, TransportError> {
        let ep = self
            .interface
            .endpoint::<Bulk, In>(self.in_endpoint)
            .map_err(|e| TransportError::ReadFailed(e.to_string()))?;

        let mut reader = ep.reader(4096);
        let mut buf = vec![0u8; max_len];

        let n = reader.read(&mut buf).map_err(|e| {
            if e.kind() == std::io::ErrorKind::TimedOut {
                TransportError::Timeout { timeout_ms: 1000 }
            } else {
                TransportError::ReadFailed(e.to_string())
            }
        })?;

        buf.truncate(n);
        debug!(bytes_read = n, "Read complete");
        Ok(buf)
    }

    fn is_connected(&self) -> bool {
        // nusb doesn't provide a direct "is connected" check.
        // We could try a zero-length read, but for now just return true.
        true
    }

    fn vendor_id(&self) -> u16 {
        self.vid
    }

    fn product_id(&self) -> u16 {
        self.pid
    }
}
