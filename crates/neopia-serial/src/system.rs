//! 系统串口后端（基于 `serialport`）

use crate::{PortInfo, PortKind, PortSettings, SerialAdapter, SerialBackend, SerialError};
use serialport::{ClearBuffer, DataBits, FlowControl, Parity, SerialPort, StopBits};
use std::io::{ErrorKind, Read, Write};
use std::time::Duration;
use tracing::{debug, trace};

impl From<serialport::Error> for SerialError {
    fn from(e: serialport::Error) -> Self {
        match e.kind() {
            serialport::ErrorKind::NoDevice => SerialError::NotFound(e.description),
            serialport::ErrorKind::Io(kind) => {
                SerialError::Io(std::io::Error::new(kind, e.description))
            },
            _ => SerialError::Device(e.description),
        }
    }
}

/// 系统串口后端
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemSerial;

impl SystemSerial {
    pub fn new() -> Self {
        Self
    }
}

impl SerialBackend for SystemSerial {
    fn available_ports(&self) -> Result<Vec<PortInfo>, SerialError> {
        let ports = serialport::available_ports()?;
        Ok(ports
            .into_iter()
            .map(|p| {
                let kind = match p.port_type {
                    serialport::SerialPortType::UsbPort(usb) => PortKind::Usb {
                        vid: usb.vid,
                        pid: usb.pid,
                        product: usb.product,
                    },
                    _ => PortKind::Other,
                };
                PortInfo {
                    name: p.port_name,
                    kind,
                }
            })
            .collect())
    }

    fn open(
        &self,
        port: &str,
        settings: &PortSettings,
    ) -> Result<Box<dyn SerialAdapter>, SerialError> {
        debug!("Opening {} @ {} baud", port, settings.baud_rate);
        let handle = serialport::new(port, settings.baud_rate)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::None)
            .timeout(settings.read_timeout)
            .open()?;
        Ok(Box::new(SerialPortAdapter {
            name: port.to_string(),
            port: handle,
        }))
    }
}

/// `serialport` 端口适配器
pub struct SerialPortAdapter {
    name: String,
    port: Box<dyn SerialPort>,
}

impl SerialAdapter for SerialPortAdapter {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, SerialError> {
        match self.port.read(buf) {
            Ok(n) => {
                trace!("{} read {} bytes", self.name, n);
                Ok(n)
            },
            Err(e) if matches!(e.kind(), ErrorKind::TimedOut | ErrorKind::WouldBlock) => {
                Err(SerialError::Timeout)
            },
            Err(e) => Err(SerialError::Io(e)),
        }
    }

    fn write_all(&mut self, data: &[u8]) -> Result<(), SerialError> {
        self.port.write_all(data)?;
        self.port.flush()?;
        Ok(())
    }

    fn clear(&mut self) -> Result<(), SerialError> {
        self.port.clear(ClearBuffer::All)?;
        Ok(())
    }

    fn set_read_timeout(&mut self, timeout: Duration) -> Result<(), SerialError> {
        self.port.set_timeout(timeout)?;
        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }
}
