mod demokit;

use std::path::PathBuf;

use anyhow::{Context, Result};
use aoa_core::{
    AccessoryError, AccessoryEvent, AccessoryIdentity, AccessoryObserver, AccessorySession,
    ConnectionHandle, NusbHost, ReadOutcome, SessionConfig, TracingObserver, UsbHost,
};
use clap::{Args, Parser, Subcommand};
use tracing::{error, info, warn};

use demokit::{MESSAGE_LEN, Message};

#[derive(Parser, Debug)]
#[command(author, version, about = "Android Open Accessory host (Pure Rust)", long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Open the accessory and log DemoKit messages
    Run(RunArgs),
    /// List attached USB devices
    Scan,
    /// Write the default configuration to a file
    InitConfig {
        /// Destination TOML file
        file: PathBuf,
    },
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Path to a TOML session config
    #[arg(long)]
    config: Option<PathBuf>,

    #[arg(long)]
    manufacturer: Option<String>,

    #[arg(long)]
    model: Option<String>,

    #[arg(long)]
    description: Option<String>,

    #[arg(long = "accessory-version")]
    accessory_version: Option<String>,

    #[arg(long)]
    uri: Option<String>,

    #[arg(long)]
    serial: Option<String>,

    /// Echo every received message back to the device
    #[arg(long)]
    echo: bool,
}

impl RunArgs {
    fn apply(&self, identity: &mut AccessoryIdentity) {
        let overrides = [
            (&mut identity.manufacturer, &self.manufacturer),
            (&mut identity.model, &self.model),
            (&mut identity.description, &self.description),
            (&mut identity.version, &self.accessory_version),
            (&mut identity.uri, &self.uri),
            (&mut identity.serial, &self.serial),
        ];
        for (field, value) in overrides {
            if let Some(value) = value {
                field.clone_from(value);
            }
        }
    }
}

fn main() {
    let cli = Cli::parse();

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::builder()
                .with_default_directive(if cli.verbose {
                    tracing::Level::DEBUG.into()
                } else {
                    tracing::Level::INFO.into()
                })
                .from_env_lossy(),
        )
        .with_writer(std::io::stderr)
        .finish();

    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    let result = match cli.command {
        Commands::Run(args) => run(args),
        Commands::Scan => scan(),
        Commands::InitConfig { file } => SessionConfig::default()
            .save_to_file(&file)
            .with_context(|| format!("writing {}", file.display())),
    };

    if let Err(e) = result {
        error!("Error: {:#}", e);
        std::process::exit(1);
    }
}

fn scan() -> Result<()> {
    let devices = NusbHost::scan_devices()?;
    if devices.is_empty() {
        println!("No USB devices found");
    }
    for dev in devices {
        println!(
            "{:04X}:{:04X}  class 0x{:02X}  {:<17}  {}",
            dev.vendor_id,
            dev.product_id,
            dev.interface_class,
            dev.class.to_string(),
            dev.product.as_deref().unwrap_or("-"),
        );
    }
    Ok(())
}

fn run(args: RunArgs) -> Result<()> {
    let mut config = match &args.config {
        Some(path) => SessionConfig::load_from_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => SessionConfig::default(),
    };
    args.apply(&mut config.identity);

    info!(model = %config.identity.model, "Starting AOA host (nusb backend)...");

    let host = NusbHost::new(config.control_timeout(), config.scan_interval());
    let poll_interval = config.poll_interval();
    let identity = config.identity.clone();
    let mut session = AccessorySession::new(host, config);
    let handle = session.open(identity)?;
    let observer = TracingObserver;

    // Cleared when the link drops; reads resume once the bus reports it.
    let mut link_up = true;
    loop {
        if let Err(e) = session.poll_bus() {
            warn!(error = %e, "Bus poll failed");
        }
        for event in session.drain_events() {
            observer.on_event(&event);
            if matches!(event, AccessoryEvent::Open | AccessoryEvent::Close) {
                link_up = true;
            }
        }

        if link_up && session.is_connected(handle) {
            link_up = pump(&mut session, handle, args.echo);
        }

        std::thread::sleep(poll_interval);
    }
}

/// Read one DemoKit message and optionally echo it. Returns false once the
/// link is unusable.
fn pump<H: UsbHost>(session: &mut AccessorySession<H>, handle: ConnectionHandle, echo: bool) -> bool {
    let mut buf = [0u8; MESSAGE_LEN];
    let n = match session.read(handle, &mut buf) {
        Ok(ReadOutcome::Data(n)) => n,
        Ok(ReadOutcome::Timeout) => return true,
        Ok(ReadOutcome::ConnectionLost) => {
            warn!("Accessory connection lost");
            return false;
        }
        Err(e) => {
            warn!(error = %e, "Read failed");
            return false;
        }
    };

    if let Some(msg) = Message::decode(&buf[..n]) {
        info!(message = %msg, "{}", msg.describe());
    } else {
        warn!(bytes = n, "Short DemoKit message");
    }

    if echo && let Err(e) = session.write(handle, &buf[..n]) {
        warn!(error = %e, "Echo failed");
        return !matches!(e, AccessoryError::ConnectionLost);
    }
    true
}
