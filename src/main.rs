//! Binary entrypoint for the meshtac field test tool.
//!
//! Linear flow: parse flags, subscribe the signature watcher to both event
//! topics, open the device connection, send one tactical quick-message
//! request directly to the radio stack, then poll for the firmware
//! acknowledgement until the listen window expires. Any failure along the
//! way is reported once at this level; cleanup (listener de-registration,
//! connection close) runs regardless of how the flow ended, and the process
//! always exits 0 - the verdict is the printed text.
use anyhow::Result;
use clap::Parser;
use log::{error, info, warn};
use std::sync::Arc;
use tokio::time::{sleep, Duration, Instant};

use meshtac::config::Config;
use meshtac::device::RadioDevice;
use meshtac::events::EventBus;
use meshtac::probe::{
    ProbeReport, SignatureWatcher, TacticalRequest, FIRMWARE_ACK_SIGNATURE,
};

#[derive(Parser)]
#[command(name = "meshtac")]
#[command(about = "Send a tactical quick-message request to a mesh radio and confirm receipt")]
#[command(version)]
struct Cli {
    /// Serial port of the radio (e.g., /dev/ttyACM0); auto-detected when omitted
    #[arg(long)]
    port: Option<String>,

    /// Contact index (0-8)
    #[arg(short = 'c', long, default_value_t = 0)]
    contact: u32,

    /// Distance index (0-8)
    #[arg(short = 'd', long, default_value_t = 0)]
    distance: u32,

    /// Order index (0-8)
    #[arg(short = 'o', long, default_value_t = 0)]
    order: u32,

    /// Baud rate (default 115200, or [device].baud_rate from the config file)
    #[arg(short = 'b', long)]
    baud: Option<u32>,

    /// Seconds to listen for the acknowledgement (default 10)
    #[arg(short = 't', long)]
    timeout: Option<u64>,

    /// Configuration file path
    #[arg(long, default_value = "meshtac.toml")]
    config: String,

    /// Verbose logging (-v, -vv for more)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Config file is optional; defaults apply when it is absent.
    let loaded = Config::load(&cli.config).await.ok();
    init_logging(&loaded, cli.verbose);
    info!("Starting meshtac v{}", env!("CARGO_PKG_VERSION"));

    let config = loaded.unwrap_or_default();
    let baud = cli.baud.unwrap_or(config.device.baud_rate);
    let window = Duration::from_secs(cli.timeout.unwrap_or(config.probe.listen_seconds));
    // CLI port overrides config; empty config port means auto-detect.
    let port = cli.port.clone().or_else(|| {
        if config.device.port.is_empty() {
            None
        } else {
            Some(config.device.port.clone())
        }
    });

    let request = TacticalRequest {
        contact: cli.contact,
        distance: cli.distance,
        order: cli.order,
    };
    println!("Using {}", request.describe());

    // Subscribe before the connection opens so no early event is missed.
    let bus = Arc::new(EventBus::new());
    let mut watcher = SignatureWatcher::register(bus.clone(), FIRMWARE_ACK_SIGNATURE);

    let mut device: Option<RadioDevice> = None;
    let outcome = run_probe(&mut device, bus, &watcher, port.as_deref(), baud, request, window).await;

    match outcome {
        Ok(report) => {
            if report.found {
                println!("TARGET LOG SIGNATURE '{}' FOUND.", FIRMWARE_ACK_SIGNATURE);
            } else {
                println!(
                    "TARGET LOG SIGNATURE '{}' NOT found in received data within {}s.",
                    FIRMWARE_ACK_SIGNATURE,
                    window.as_secs()
                );
            }
            println!("{}", report.summary_json(window));
        }
        Err(e) => {
            // One taxonomy: whatever failed, report it with its full chain
            // and fall through to cleanup.
            error!("Probe failed: {:#}", e);
            println!("An error occurred: {:?}", e);
        }
    }

    // Cleanup runs no matter how the flow above exited.
    watcher.detach();
    if let Some(mut dev) = device.take() {
        println!("Closing device connection.");
        if let Err(e) = dev.disconnect().await {
            warn!("Device close failed: {:#}", e);
        }
    }

    Ok(())
}

/// The probe sequence proper. The device lands in `device_slot` as soon as it
/// is open so the caller can close it even when a later step fails.
async fn run_probe(
    device_slot: &mut Option<RadioDevice>,
    bus: Arc<EventBus>,
    watcher: &SignatureWatcher,
    port: Option<&str>,
    baud: u32,
    request: TacticalRequest,
    window: Duration,
) -> Result<ProbeReport> {
    println!(
        "Connecting to device via {}...",
        port.unwrap_or("auto-detected port")
    );
    let mut dev = RadioDevice::connect(port, baud).await?;
    println!("Successfully connected on {}.", dev.port_name());

    dev.start_reader(bus);
    let dev = device_slot.insert(dev);

    // Small delay to let the interface settle and early events arrive.
    sleep(Duration::from_secs(1)).await;

    info!("Sending SendTacticalMessageRequest via ToRadio: {}", request.describe());
    dev.send_tactical_request(request.to_proto())?;
    println!(
        "Request sent. Listening for device logs/responses for {} seconds...",
        window.as_secs()
    );

    let started = Instant::now();
    let found = watcher.wait(window).await;

    Ok(ProbeReport {
        request,
        found,
        matches: watcher.matches(),
        elapsed: started.elapsed(),
    })
}

fn init_logging(config: &Option<Config>, verbosity: u8) {
    use std::io::Write;
    let mut builder = env_logger::Builder::new();
    // Base level comes from config; CLI verbosity only raises it.
    let base_level = match verbosity {
        0 => config
            .as_ref()
            .map(|c| c.logging.level.as_str())
            .unwrap_or("info")
            .parse()
            .unwrap_or(log::LevelFilter::Info),
        1 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };
    builder.filter_level(base_level);

    let log_file = config.as_ref().and_then(|c| c.logging.file.clone());
    if let Some(ref file) = log_file {
        if let Ok(f) = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(file)
        {
            let write_mutex = std::sync::Arc::new(std::sync::Mutex::new(f));
            // When stdout is a terminal, echo log lines there as well.
            let is_tty = atty::is(atty::Stream::Stdout);
            builder.format(move |fmt, record| {
                let ts = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ");
                let line = format!("{} [{}] {}", ts, record.level(), record.args());
                if let Ok(mut guard) = write_mutex.lock() {
                    let _ = writeln!(guard, "{}", line);
                }
                if is_tty {
                    writeln!(fmt, "{}", line)
                } else {
                    Ok(())
                }
            });
        } else {
            builder.format(|fmt, record| {
                writeln!(
                    fmt,
                    "{} [{}] {}",
                    chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ"),
                    record.level(),
                    record.args()
                )
            });
        }
    } else {
        builder.format(|fmt, record| {
            writeln!(
                fmt,
                "{} [{}] {}",
                chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ"),
                record.level(),
                record.args()
            )
        });
    }
    let _ = builder.try_init();
}
