use cp210x::{Gpio, Latch, PartNumber, Relay};
use std::thread;
use std::time::Duration;

#[cfg(any(test, feature = "mock"))]
pub mod mock;
mod system;

pub use system::{Port, System};

/// Part number the relay board is built on.
pub const PART_NUMBER: PartNumber = PartNumber::Cp2104;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Cp210x(#[from] cp210x::Error),
    #[error(transparent)]
    SerialPort(#[from] serialport::Error),
    #[error(transparent)]
    Usb(#[from] rusb::Error),

    #[error("no RelayBox found")]
    NoDevice(#[source] Option<Box<Error>>),
    #[error("multiple RelayBoxes found ({}), use --port to choose which one to use", .0.join(", "))]
    Ambiguous(Vec<String>),
    #[error("could not find RelayBox at {0}")]
    NotFound(String, #[source] Option<Box<Error>>),
    #[error("{0} is not a USB serial port")]
    NotUsb(String),
    #[error("{0} is not a CP210x")]
    NotCp210x(String),
    #[error("no USB device behind {0}")]
    NoUsbDevice(String),
    #[error("short read")]
    ShortRead,
}

impl Error {
    /// The port is not a candidate at all, as opposed to a CP210x that failed to answer.
    pub fn is_foreign(&self) -> bool {
        matches!(self, Self::NotUsb(_) | Self::NotCp210x(_))
    }
}

/// Enumerates serial ports and opens them as CP210x handles.
pub trait Driver {
    type Handle: Handle;

    fn ports(&self) -> Result<Vec<String>, Error>;
    fn open(&self, port: &str) -> Result<Self::Handle, Error>;
}

/// An open CP210x device. Dropping it releases the OS handle.
pub trait Handle {
    fn part_number(&mut self) -> Result<PartNumber, Error>;
    fn write_latch(&mut self, latch: Latch) -> Result<(), Error>;
    fn read_latch(&mut self) -> Result<Gpio, Error>;
}

/// A probed relay board.
pub struct RelayBox<H> {
    handle: H,
    port: String,
}

impl<H> RelayBox<H>
where
    H: Handle,
{
    /// Opens `port` and checks that a relay board is behind it.
    #[tracing::instrument(level = "debug", err, skip(driver))]
    pub fn open<D>(driver: &D, port: &str) -> Result<Self, Error>
    where
        D: Driver<Handle = H>,
    {
        match Self::probe(driver, port) {
            Ok(Some(relay_box)) => Ok(relay_box),
            Ok(None) => Err(Error::NotFound(port.to_owned(), None)),
            Err(e) => {
                tracing::warn!(port, error = %e, "probe failed");
                Err(Error::NotFound(port.to_owned(), Some(Box::new(e))))
            }
        }
    }

    /// Probes every port and returns the only relay board found.
    #[tracing::instrument(level = "debug", err, skip(driver))]
    pub fn scan<D>(driver: &D) -> Result<Self, Error>
    where
        D: Driver<Handle = H>,
    {
        let mut found: Option<Self> = None;
        let mut ambiguous = Vec::new();
        let mut last_error = None;
        for port in driver.ports()? {
            match Self::probe(driver, &port) {
                Ok(Some(relay_box)) => {
                    if let Some(first) = found.as_ref() {
                        if ambiguous.is_empty() {
                            ambiguous.push(first.port.clone());
                        }
                        ambiguous.push(port);
                    } else {
                        found = Some(relay_box);
                    }
                }
                Ok(None) => {}
                Err(e) if e.is_foreign() => tracing::debug!(%port, error = %e, "skipped"),
                Err(e) => {
                    tracing::debug!(%port, error = %e, "probe failed");
                    last_error = Some(e);
                }
            }
        }
        if !ambiguous.is_empty() {
            return Err(Error::Ambiguous(ambiguous));
        }
        match found {
            Some(relay_box) => Ok(relay_box),
            None => {
                if let Some(e) = &last_error {
                    tracing::warn!(error = %e, "probe failed");
                }
                Err(Error::NoDevice(last_error.map(Box::new)))
            }
        }
    }

    fn probe<D>(driver: &D, port: &str) -> Result<Option<Self>, Error>
    where
        D: Driver<Handle = H>,
    {
        let mut handle = driver.open(port)?;
        let part_number = handle.part_number()?;
        tracing::debug!(port, ?part_number);
        Ok((part_number == PART_NUMBER).then(|| Self {
            handle,
            port: port.to_owned(),
        }))
    }

    pub fn port(&self) -> &str {
        &self.port
    }

    #[tracing::instrument(level = "debug", err, skip(self), fields(port = %self.port))]
    pub fn set(&mut self, relay: Relay, on: bool) -> Result<(), Error> {
        self.handle.write_latch(Latch::relay(relay, on))
    }

    #[tracing::instrument(level = "debug", err, ret, skip(self), fields(port = %self.port))]
    pub fn get(&mut self, relay: Relay) -> Result<bool, Error> {
        Ok(relay.is_on(self.handle.read_latch()?))
    }

    pub fn states(&mut self) -> Result<[bool; Relay::COUNT], Error> {
        let latch = self.handle.read_latch()?;
        Ok(Relay::ALL.map(|relay| relay.is_on(latch)))
    }

    /// Turns every relay on, then off again, waiting `delay` after each step.
    /// A failed write is logged and the sequence goes on.
    pub fn cycle(&mut self, delay: Duration) {
        for on in [true, false] {
            for relay in Relay::ALL {
                if let Err(e) = self.set(relay, on) {
                    tracing::warn!(%relay, on, error = %e, "write failed");
                }
                thread::sleep(delay);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::mock::MockDriver;
    use super::{Error, RelayBox};
    use cp210x::{Gpio, Latch, PartNumber, Relay};
    use std::time::{Duration, Instant};

    #[test]
    fn test_scan_single() {
        let driver = MockDriver::new()
            .with_device("COM1", PartNumber::Cp2102)
            .with_device("COM3", PartNumber::Cp2104)
            .with_unresponsive("COM4");

        let relay_box = RelayBox::scan(&driver).unwrap();
        assert_eq!(relay_box.port(), "COM3");

        // only the kept board is still open
        assert_eq!(driver.device("COM1").unwrap().open_handles(), 0);
        assert_eq!(driver.device("COM3").unwrap().open_handles(), 1);
        assert_eq!(driver.device("COM4").unwrap().open_handles(), 0);
        drop(relay_box);
        assert_eq!(driver.device("COM3").unwrap().open_handles(), 0);
    }

    #[test]
    fn test_scan_none() {
        let driver = MockDriver::new().with_device("COM1", PartNumber::Cp2102);
        assert!(matches!(RelayBox::scan(&driver), Err(Error::NoDevice(None))));

        let driver = MockDriver::new();
        assert!(matches!(RelayBox::scan(&driver), Err(Error::NoDevice(None))));
    }

    #[test]
    fn test_scan_keeps_cause() {
        let driver = MockDriver::new()
            .with_device("COM1", PartNumber::Cp2102)
            .with_unresponsive("COM4");

        let e = RelayBox::scan(&driver).err().unwrap();
        assert_eq!(e.to_string(), "no RelayBox found");
        let source = std::error::Error::source(&e).unwrap();
        assert_eq!(source.to_string(), "short read");
    }

    #[test]
    fn test_scan_ambiguous() {
        let driver = MockDriver::new()
            .with_device("COM3", PartNumber::Cp2104)
            .with_device("COM5", PartNumber::Cp2104)
            .with_device("COM7", PartNumber::Cp2104);

        match RelayBox::scan(&driver) {
            Err(Error::Ambiguous(ports)) => assert_eq!(ports, ["COM3", "COM5", "COM7"]),
            _ => panic!("expected an ambiguous scan"),
        }
        for port in ["COM3", "COM5", "COM7"] {
            let device = driver.device(port).unwrap();
            assert_eq!(device.open_handles(), 0);
            assert!(device.writes().is_empty());
        }
    }

    #[test]
    fn test_open() {
        let driver = MockDriver::new()
            .with_device("COM1", PartNumber::Cp2102)
            .with_device("COM3", PartNumber::Cp2104)
            .with_unresponsive("COM4");

        assert_eq!(RelayBox::open(&driver, "COM3").unwrap().port(), "COM3");
        for port in ["COM1", "COM4", "COM9"] {
            match RelayBox::open(&driver, port) {
                Err(Error::NotFound(p, _)) => assert_eq!(p, port),
                _ => panic!("expected {port} to be rejected"),
            }
        }
        match RelayBox::open(&driver, "COM4") {
            Err(Error::NotFound(_, Some(source))) => assert!(matches!(*source, Error::ShortRead)),
            _ => panic!("expected the failed query as source"),
        }
        assert_eq!(driver.device("COM1").unwrap().open_handles(), 0);
        assert_eq!(driver.device("COM4").unwrap().open_handles(), 0);
    }

    #[test]
    fn test_set_get() {
        let driver = MockDriver::new().with_device("COM3", PartNumber::Cp2104);
        let mut relay_box = RelayBox::scan(&driver).unwrap();

        for relay in Relay::ALL {
            for on in [true, false, false, true] {
                relay_box.set(relay, on).unwrap();
                assert_eq!(relay_box.get(relay).unwrap(), on);
            }
        }
        assert_eq!(relay_box.states().unwrap(), [true; Relay::COUNT]);

        let device = driver.device("COM3").unwrap();
        assert_eq!(device.writes().len(), 16);
        assert_eq!(device.latch(), Gpio::empty());
    }

    #[test]
    fn test_set_failure() {
        let driver = MockDriver::new().with_device("COM3", PartNumber::Cp2104);
        let mut relay_box = RelayBox::scan(&driver).unwrap();
        driver.device("COM3").unwrap().fail_writes(true);

        assert!(relay_box.set(Relay::ALL[0], true).is_err());
        assert_eq!(relay_box.states().unwrap(), [false; Relay::COUNT]);
    }

    #[test]
    fn test_cycle() {
        let driver = MockDriver::new().with_device("COM3", PartNumber::Cp2104);
        let mut relay_box = RelayBox::scan(&driver).unwrap();

        let delay = Duration::from_millis(5);
        let start = Instant::now();
        relay_box.cycle(delay);
        assert!(start.elapsed() >= delay * 8);

        let expected: Vec<_> = [true, false]
            .into_iter()
            .flat_map(|on| Relay::ALL.map(|relay| Latch::relay(relay, on)))
            .collect();
        let device = driver.device("COM3").unwrap();
        assert_eq!(device.writes(), expected);
        assert_eq!(device.latch(), Gpio::all());
    }

    #[test]
    fn test_cycle_failure() {
        let driver = MockDriver::new().with_device("COM3", PartNumber::Cp2104);
        let mut relay_box = RelayBox::scan(&driver).unwrap();
        let device = driver.device("COM3").unwrap();
        device.fail_writes(true);

        relay_box.cycle(Duration::ZERO);
        assert_eq!(device.writes().len(), 8);
    }
}
