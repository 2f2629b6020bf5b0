use crate::{Driver, Error, Handle};
use cp210x::{Gpio, Latch, PartNumber};
use rusb::{DeviceHandle, Direction, GlobalContext, Recipient, RequestType};
use serialport::{SerialPort, SerialPortType, UsbPortInfo};
use std::time::Duration;

const TIMEOUT: Duration = Duration::from_millis(500);

/// The serial ports and USB devices of this machine.
#[derive(Clone, Copy, Debug, Default)]
pub struct System;

/// A serial port held open together with the USB device behind it.
pub struct Port {
    // holds the port exclusively while the board is in use
    _serial: Box<dyn SerialPort>,
    usb: DeviceHandle<GlobalContext>,
}

impl Driver for System {
    type Handle = Port;

    fn ports(&self) -> Result<Vec<String>, Error> {
        let mut ports = serialport::available_ports()?
            .into_iter()
            .map(|port_info| port_info.port_name)
            .collect::<Vec<_>>();
        ports.sort();
        Ok(ports)
    }

    #[tracing::instrument(level = "debug", err, skip(self))]
    fn open(&self, port: &str) -> Result<Port, Error> {
        let port_type = serialport::available_ports()?
            .into_iter()
            .find(|port_info| port_info.port_name == port)
            .map(|port_info| port_info.port_type);
        let usb_info = cp210x_usb_info(port, port_type)?;
        let serial = serialport::new(port, 115_200).timeout(TIMEOUT).open()?;
        let usb = open_usb(&usb_info)?.ok_or_else(|| Error::NoUsbDevice(port.to_owned()))?;
        Ok(Port {
            _serial: serial,
            usb,
        })
    }
}

/// Only Silicon Labs bridges get vendor requests.
fn cp210x_usb_info(port: &str, port_type: Option<SerialPortType>) -> Result<UsbPortInfo, Error> {
    match port_type {
        Some(SerialPortType::UsbPort(usb_info)) if usb_info.vid == cp210x::VID => Ok(usb_info),
        Some(SerialPortType::UsbPort(_)) => Err(Error::NotCp210x(port.to_owned())),
        _ => Err(Error::NotUsb(port.to_owned())),
    }
}

fn open_usb(usb_info: &UsbPortInfo) -> Result<Option<DeviceHandle<GlobalContext>>, Error> {
    for device in rusb::devices()?.iter() {
        let desc = device.device_descriptor()?;
        if desc.vendor_id() != usb_info.vid || desc.product_id() != usb_info.pid {
            continue;
        }
        let handle = match device.open() {
            Ok(handle) => handle,
            Err(e) => {
                tracing::debug!(bus = device.bus_number(), address = device.address(), error = %e);
                continue;
            }
        };
        if let Some(serial_number) = &usb_info.serial_number {
            let read = handle.read_serial_number_string_ascii(&desc).ok();
            if read.as_ref() != Some(serial_number) {
                continue;
            }
        }
        return Ok(Some(handle));
    }
    Ok(None)
}

impl Port {
    fn read_vendor(&mut self, value: u16) -> Result<u8, Error> {
        let mut buf = [0; 1];
        let request_type = rusb::request_type(Direction::In, RequestType::Vendor, Recipient::Device);
        let n = self.usb.read_control(
            request_type,
            cp210x::VENDOR_SPECIFIC,
            value,
            0,
            &mut buf,
            TIMEOUT,
        )?;
        if n != buf.len() {
            return Err(Error::ShortRead);
        }
        Ok(buf[0])
    }
}

impl Handle for Port {
    #[tracing::instrument(level = "debug", err, ret, skip(self))]
    fn part_number(&mut self) -> Result<PartNumber, Error> {
        Ok(self.read_vendor(cp210x::GET_PARTNUM)?.into())
    }

    #[tracing::instrument(level = "debug", err, skip(self))]
    fn write_latch(&mut self, latch: Latch) -> Result<(), Error> {
        let request_type =
            rusb::request_type(Direction::Out, RequestType::Vendor, Recipient::Device);
        self.usb.write_control(
            request_type,
            cp210x::VENDOR_SPECIFIC,
            cp210x::WRITE_LATCH,
            latch.index(),
            &[],
            TIMEOUT,
        )?;
        Ok(())
    }

    #[tracing::instrument(level = "debug", err, ret, skip(self))]
    fn read_latch(&mut self) -> Result<Gpio, Error> {
        Ok(Gpio::from_bits_truncate(self.read_vendor(cp210x::READ_LATCH)?))
    }
}
