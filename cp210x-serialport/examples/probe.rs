use cp210x_serialport::{Driver, Handle, System};

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    for port in System.ports()? {
        match System.open(&port).and_then(|mut handle| {
            let part_number = handle.part_number()?;
            let latch = handle.read_latch()?;
            Ok((part_number, latch))
        }) {
            Ok((part_number, latch)) => {
                let relay_box = part_number == cp210x_serialport::PART_NUMBER;
                println!("{port}: {part_number:?} latch={latch:?} relay_box={relay_box}");
            }
            Err(e) => println!("{port}: {e}"),
        }
    }

    Ok(())
}
