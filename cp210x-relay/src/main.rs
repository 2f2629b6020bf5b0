use anyhow::Context;
use clap::{ArgAction, CommandFactory, Parser};
use cp210x::Relay;
use cp210x_serialport::{Driver, RelayBox, System};
use std::env;
use std::ffi::OsString;
use std::io;
use std::process::ExitCode;
use std::time::Duration;

const CYCLE_DELAY: Duration = Duration::from_millis(100);

/// Control the state of a CP210x GPIO based relay board.
///
/// All serial ports are probed by default to find the relay board. If exactly
/// one relay board is found, it is used without the need to specify it
/// explicitly.
#[derive(Parser)]
#[clap(name = "relayctl")]
struct Args {
    /// Serial port of the relay board to control, e.g. "/dev/ttyUSB0"
    #[clap(short, long)]
    port: Option<String>,
    /// Cycle all relays on and off
    #[clap(long, conflicts_with = "status")]
    test: bool,
    /// Print the state of every relay
    #[clap(long)]
    status: bool,
    /// Log more (repeat for even more)
    #[clap(short, long, action = ArgAction::Count)]
    verbose: u8,

    /// Which relay to control (0 to 3)
    #[clap(allow_negative_numbers = true)]
    relay_number: Option<String>,
    /// 1 turns on the relay, 0 turns it off
    #[clap(allow_negative_numbers = true)]
    new_state: Option<String>,
}

#[derive(Debug, PartialEq)]
enum Action {
    Test,
    Status,
    Set { relay: Relay, on: bool },
}

impl Action {
    /// `None` if RELAY_NUMBER or NEW_STATE is missing.
    fn from_args(args: &Args) -> anyhow::Result<Option<Self>> {
        if args.test {
            return Ok(Some(Self::Test));
        }
        if args.status {
            return Ok(Some(Self::Status));
        }
        let (Some(relay_number), Some(new_state)) = (&args.relay_number, &args.new_state) else {
            return Ok(None);
        };
        let (Ok(relay_number), Ok(new_state)) =
            (relay_number.parse::<i64>(), new_state.parse::<i64>())
        else {
            anyhow::bail!("RELAY_NUMBER and NEW_STATE must be numeric.");
        };
        let Ok(relay) = Relay::new(relay_number) else {
            anyhow::bail!("RELAY_NUMBER must be in range 0-3.");
        };
        Ok(Some(Self::Set {
            relay,
            on: new_state != 0,
        }))
    }
}

const FAILURE: u8 = 1;

/// Parses the command line, or prints clap's message and returns the exit
/// status. --help lands here too and exits 1 like any other misuse.
fn parse_args<I, T>(args: I) -> Result<Args, u8>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    Args::try_parse_from(args).map_err(|e| {
        let _ = e.print();
        FAILURE
    })
}

fn main() -> ExitCode {
    let args = match parse_args(env::args_os()) {
        Ok(args) => args,
        Err(status) => return ExitCode::from(status),
    };

    tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_max_level(match args.verbose {
            0 => tracing::Level::WARN,
            1 => tracing::Level::INFO,
            2 => tracing::Level::DEBUG,
            _ => tracing::Level::TRACE,
        })
        .init();

    match run(&args, &System) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{e:#}");
            ExitCode::from(FAILURE)
        }
    }
}

fn run<D>(args: &Args, driver: &D) -> anyhow::Result<()>
where
    D: Driver,
{
    let Some(action) = Action::from_args(args)? else {
        Args::command().print_help()?;
        anyhow::bail!("missing RELAY_NUMBER and NEW_STATE");
    };

    let mut relay_box = match &args.port {
        Some(port) => RelayBox::open(driver, port)?,
        None => RelayBox::scan(driver)?,
    };
    tracing::info!(port = relay_box.port(), ?action);

    match action {
        Action::Test => relay_box.cycle(CYCLE_DELAY),
        Action::Status => {
            let states = relay_box.states().context("failed to read relay states")?;
            for (relay, on) in Relay::ALL.into_iter().zip(states) {
                println!("{relay}: {}", if on { "on" } else { "off" });
            }
        }
        Action::Set { relay, on } => relay_box
            .set(relay, on)
            .with_context(|| format!("failed to switch relay {relay}"))?,
    }

    Ok(())
}
