mod common;
mod config;
mod dispatch;
mod error;
mod gpio;
mod layer2;
mod magic;
mod wake;

use clap::Parser;
use log::LevelFilter;
use simple_logger::SimpleLogger;
use tokio_util::sync::CancellationToken;

use crate::config::{Settings, WakeMode, DEFAULT_CONFIG_PATH};
use crate::dispatch::WakeWorker;
use crate::error::Result;
use crate::gpio::{PowerSense, ThreadDelay};
use crate::layer2::{DatalinkSource, RetryPolicy};
use crate::magic::MagicPacket;
use crate::wake::WakeSequencer;

/// Wakes a machine by GPIO when a Wake-on-LAN magic packet for it is seen.
#[derive(Parser)]
#[command(version, about)]
struct Cli {
    /// File holding the target MAC address
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    config: String,

    /// YAML file with GPIO, capture and timing settings
    #[arg(short, long)]
    settings: Option<String>,

    /// Interface to listen on (overrides the settings file)
    #[arg(short, long)]
    interface: Option<String>,

    /// Run wake sequences on a separate thread instead of pausing capture
    #[arg(short, long, default_value_t = false)]
    dedicated: bool,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn main() {
    let opts = Cli::parse();

    let level = match opts.verbose {
        0 => LevelFilter::Info,
        1 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };
    SimpleLogger::new()
        .with_level(level)
        .env()
        .init()
        .expect("Failed to install logger");

    let cancel_token: CancellationToken = CancellationToken::new();
    let sigint_token = cancel_token.clone();

    ctrlc::set_handler(move || {
        log::info!("Received SIGINT");
        sigint_token.cancel();
    }).expect("Failed to install SIGINT handler");

    if let Err(e) = run(&opts, cancel_token) {
        if e.is_startup() {
            log::error!("startup failed: {e}");
        } else {
            log::error!("{e}");
        }
        std::process::exit(1);
    }
}

fn run(opts: &Cli, token: CancellationToken) -> Result<()> {
    let settings = match &opts.settings {
        Some(path) => Settings::load(path)?,
        None => Settings::default(),
    };

    let target = config::load_target_mac(&opts.config)?;
    let matcher = MagicPacket::new(target);
    log::info!("Proxying Wake-on-LAN for {target}");

    let pins = &settings.gpio;
    let (sense_line, strobe_line) = gpio::open_lines(&pins.chip, pins.sense_line, pins.strobe_line)?;
    let mut sense = PowerSense::new(sense_line, pins.sense_active_low);
    log::info!("At start, computer is {}", sense.state()?);

    let iface = opts.interface.as_deref().or(settings.interface.as_deref());
    let mut source = DatalinkSource::open(iface, &settings.capture)?;

    let mut sequencer = WakeSequencer::new(target, sense, strobe_line, ThreadDelay)
        .with_wait_for_power_on(settings.wait_for_power_on);
    let policy = RetryPolicy::from(&settings.capture);

    let mode = if opts.dedicated { WakeMode::Dedicated } else { settings.wake_mode };
    match mode {
        WakeMode::Inline => layer2::run(&mut source, &matcher, &mut sequencer, policy, &token),
        WakeMode::Dedicated => {
            let mut worker = WakeWorker::spawn(sequencer, token.clone());
            let captured = layer2::run(&mut source, &matcher, &mut worker, policy, &token);
            token.cancel();
            // a worker failure is what stopped capture, report it first
            worker.join()?;
            captured
        }
    }
}
