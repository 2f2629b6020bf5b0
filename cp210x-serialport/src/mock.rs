//! Simulated driver for exercising relay boards without hardware.

use crate::{Driver, Error, Handle};
use cp210x::{Gpio, Latch, PartNumber};
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

#[derive(Debug)]
struct State {
    part_number: Option<PartNumber>,
    latch: Gpio,
    writes: Vec<Latch>,
    fail_writes: bool,
    opened: usize,
    open_handles: usize,
}

/// A simulated device. Clones share state with the driver that created it.
#[derive(Clone, Debug)]
pub struct MockDevice(Rc<RefCell<State>>);

impl MockDevice {
    /// Every latch write attempted so far, failed ones included.
    pub fn writes(&self) -> Vec<Latch> {
        self.0.borrow().writes.clone()
    }

    pub fn latch(&self) -> Gpio {
        self.0.borrow().latch
    }

    /// How many times the device was opened.
    pub fn opened(&self) -> usize {
        self.0.borrow().opened
    }

    pub fn open_handles(&self) -> usize {
        self.0.borrow().open_handles
    }

    pub fn fail_writes(&self, fail: bool) {
        self.0.borrow_mut().fail_writes = fail;
    }
}

#[derive(Debug, Default)]
pub struct MockDriver {
    devices: BTreeMap<String, MockDevice>,
}

impl MockDriver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_device(self, port: &str, part_number: PartNumber) -> Self {
        self.insert(port, Some(part_number))
    }

    /// A port whose part number query fails.
    pub fn with_unresponsive(self, port: &str) -> Self {
        self.insert(port, None)
    }

    fn insert(mut self, port: &str, part_number: Option<PartNumber>) -> Self {
        // GPIO latches come out of reset high, all relays off
        let state = State {
            part_number,
            latch: Gpio::all(),
            writes: Vec::new(),
            fail_writes: false,
            opened: 0,
            open_handles: 0,
        };
        self.devices
            .insert(port.to_owned(), MockDevice(Rc::new(RefCell::new(state))));
        self
    }

    pub fn device(&self, port: &str) -> Option<MockDevice> {
        self.devices.get(port).cloned()
    }

    /// Total number of opens over all devices.
    pub fn opened(&self) -> usize {
        self.devices.values().map(MockDevice::opened).sum()
    }

    /// Sum of the open handles over all devices.
    pub fn open_handles(&self) -> usize {
        self.devices.values().map(MockDevice::open_handles).sum()
    }
}

impl Driver for MockDriver {
    type Handle = MockHandle;

    fn ports(&self) -> Result<Vec<String>, Error> {
        Ok(self.devices.keys().cloned().collect())
    }

    fn open(&self, port: &str) -> Result<MockHandle, Error> {
        let device = self.device(port).ok_or_else(|| {
            serialport::Error::new(serialport::ErrorKind::NoDevice, format!("{port} not found"))
        })?;
        {
            let mut state = device.0.borrow_mut();
            state.opened += 1;
            state.open_handles += 1;
        }
        Ok(MockHandle(device))
    }
}

#[derive(Debug)]
pub struct MockHandle(MockDevice);

impl Drop for MockHandle {
    fn drop(&mut self) {
        self.0.0.borrow_mut().open_handles -= 1;
    }
}

impl Handle for MockHandle {
    fn part_number(&mut self) -> Result<PartNumber, Error> {
        self.0.0.borrow().part_number.ok_or(Error::ShortRead)
    }

    fn write_latch(&mut self, latch: Latch) -> Result<(), Error> {
        let mut state = self.0.0.borrow_mut();
        state.writes.push(latch);
        if state.fail_writes {
            return Err(rusb::Error::Io.into());
        }
        state.latch = latch.apply(state.latch);
        Ok(())
    }

    fn read_latch(&mut self) -> Result<Gpio, Error> {
        Ok(self.0.latch())
    }
}
