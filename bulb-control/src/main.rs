use std::cmp::max;
use std::net::IpAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use log::{info, warn};
use serde::Serialize;
use tokio::time::{interval, timeout_at, Instant};

use bulb_control_lib::control_interface::{CommandOutcome, ControlInterface};
use bulb_control_lib::device::Device;
use bulb_control_lib::event::{Event, EventReceiver};
use bulb_control_lib::led::rgb::{CliColors, RGB};
use bulb_control_lib::util::options::DiscoveryOptions;

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    let cli = Cli::parse();

    handle_cli(cli).await
}

/// This struct defines the command line interface of the application
#[derive(Parser)]
#[clap(
    name = "bulb_control",
    about = "Discovers and controls smart bulbs on the local network",
    version
)]
pub struct Cli {
    /// YAML file with discovery options
    #[clap(long, global = true)]
    config: Option<PathBuf>,

    /// Local UDP port for discovery
    #[clap(long, global = true)]
    port: Option<u16>,

    /// Address of this host, used to ignore our own search requests
    #[clap(long, global = true)]
    local_address: Option<IpAddr>,

    #[clap(subcommand)]
    pub command: Commands,
}

/// Supported output formats for the `discover` command.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, ValueEnum)]
pub enum OutputFormat {
    /// Plain text format.
    Plaintext,
    /// JSON format.
    Json,
    /// YAML format.
    Yaml,
}

#[derive(Copy, Clone, PartialEq, Eq, ValueEnum)]
pub enum PowerArg {
    On,
    Off,
}

/// Subcommands available for the CLI
#[derive(Subcommand)]
pub enum Commands {
    /// Searches for bulbs and prints what answered
    #[clap(name = "discover")]
    Discover {
        /// Output format (plaintext, json, yaml)
        #[clap(short, long, value_enum, default_value_t = OutputFormat::Plaintext)]
        output: OutputFormat,

        /// Search timeout in milliseconds
        #[clap(short = 't', long = "timeout", default_value_t = 3000)]
        timeout: u64,
    },
    /// Connects to every bulb found and flips its power on an interval
    #[clap(name = "toggle")]
    Toggle {
        /// Time between flips in milliseconds
        #[clap(long, value_parser = parse_duration, default_value = "3000")]
        interval: Duration,
    },
    /// Sends one command to one bulb
    #[clap(name = "set")]
    Set {
        /// Device id as reported in discovery
        #[clap(long)]
        id: String,

        /// Transition duration in milliseconds
        #[clap(long, value_parser = parse_duration)]
        duration: Option<Duration>,

        /// How long to wait for the bulb, in milliseconds
        #[clap(short = 't', long = "timeout", default_value_t = 5000)]
        timeout: u64,

        #[clap(subcommand)]
        action: SetAction,
    },
}

/// Commands available under the `set` subcommand
#[derive(Subcommand)]
pub enum SetAction {
    /// Turns the bulb on or off.
    #[clap(name = "power")]
    Power {
        #[clap(value_enum)]
        state: PowerArg,
    },
    /// Sets the brightness, turning the bulb on if needed.
    #[clap(name = "brightness")]
    Brightness {
        /// Brightness in percent (0-100)
        #[clap(value_parser = clap::value_parser!(u8).range(0..=100))]
        percent: u8,
    },
    /// Sets the color by name or by channels.
    #[clap(name = "color")]
    Color {
        /// The color to display by name
        #[clap(value_enum)]
        color: Option<CliColors>,

        /// Red component of the color (0-255)
        #[clap(short = 'r', long = "red", value_parser = clap::value_parser!(u8))]
        red: Option<u8>,

        /// Green component of the color (0-255)
        #[clap(short = 'g', long = "green", value_parser = clap::value_parser!(u8))]
        green: Option<u8>,

        /// Blue component of the color (0-255)
        #[clap(short = 'b', long = "blue", value_parser = clap::value_parser!(u8))]
        blue: Option<u8>,
    },
}

fn parse_duration(s: &str) -> Result<Duration, &'static str> {
    let millis = s
        .parse::<u64>()
        .map_err(|_| "could not parse duration in milliseconds")?;
    Ok(Duration::from_millis(millis))
}

fn load_options(cli: &Cli) -> Result<DiscoveryOptions> {
    let mut options = match &cli.config {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            serde_yaml::from_str(&text)
                .with_context(|| format!("Failed to parse {}", path.display()))?
        }
        None => DiscoveryOptions::default(),
    };
    if let Some(port) = cli.port {
        options.port = port;
    }
    if let Some(local_address) = cli.local_address {
        options.local_address = Some(local_address);
    }
    Ok(options)
}

async fn handle_cli(cli: Cli) -> Result<()> {
    let options = load_options(&cli)?;
    let (control, events) = ControlInterface::new(options);
    control.start().await?;

    match cli.command {
        Commands::Discover { output, timeout } => {
            discover(&control, events, Duration::from_millis(timeout)).await?;
            let rows: Vec<DeviceRow> = control.list().iter().map(DeviceRow::from).collect();
            match output {
                OutputFormat::Plaintext => pretty_print_devices(&rows),
                OutputFormat::Json => println!("{}", serde_json::to_string(&rows)?),
                OutputFormat::Yaml => println!("{}", serde_yaml::to_string(&rows)?),
            }
        }
        Commands::Toggle { interval } => toggle(control, events, interval).await?,
        Commands::Set {
            id,
            duration,
            timeout,
            action,
        } => {
            let deadline = Instant::now() + Duration::from_millis(timeout);
            let mut events = events;
            control.discover().await?;
            let device = wait_for_connection(&control, &mut events, &id, deadline).await?;

            let outcome = match action {
                SetAction::Power { state } => {
                    control
                        .set_power(&device, state == PowerArg::On, duration)
                        .await
                }
                SetAction::Brightness { percent } => {
                    control.set_brightness(&device, percent, duration).await
                }
                SetAction::Color {
                    color,
                    red,
                    green,
                    blue,
                } => {
                    let rgb = match (color, red, green, blue) {
                        (Some(color_name), None, None, None) => color_name.into(),
                        (None, Some(r), Some(g), Some(b)) => RGB::new(r, g, b),
                        _ => return Err(anyhow!("Invalid color specification")),
                    };
                    control.set_color(&device, rgb, duration).await
                }
            };

            if outcome != CommandOutcome::Written {
                bail!("Command for {} was not sent ({:?})", id, outcome);
            }
            if let Some(device) = control.get(&id) {
                println!("{}", DeviceRow::from(&device));
            }
        }
    }

    Ok(())
}

/// Broadcasts once and lets replies come in until `window` has passed.
async fn discover(control: &ControlInterface, mut events: EventReceiver, window: Duration) -> Result<()> {
    control.discover().await?;
    let deadline = Instant::now() + window;
    loop {
        match timeout_at(deadline, events.recv()).await {
            Ok(Some(event)) => info!("{}", event),
            Ok(None) => break,
            Err(_) => {
                eprintln!("Discovery time complete. If devices are missing, try increasing the search timeout.");
                break;
            }
        }
    }
    Ok(())
}

async fn wait_for_connection(
    control: &ControlInterface,
    events: &mut EventReceiver,
    id: &str,
    deadline: Instant,
) -> Result<Device> {
    loop {
        let event = match timeout_at(deadline, events.recv()).await {
            Ok(Some(event)) => event,
            Ok(None) => bail!("Event stream closed"),
            Err(_) => bail!("Device {} did not show up in time", id),
        };
        let Some(device) = event.device().filter(|device| device.id() == id).cloned() else {
            continue;
        };

        match event {
            Event::DeviceAdded(_) | Event::DeviceUpdated(_) => control.connect(&device).await,
            Event::DeviceConnected(_) => return Ok(device),
            Event::DeviceDisconnected(_) => bail!("Could not connect to {}", id),
            _ => {}
        }
    }
}

/// Mirrors the classic demo: connect to every bulb and flip its power.
async fn toggle(control: ControlInterface, mut events: EventReceiver, every: Duration) -> Result<()> {
    control.discover().await?;

    loop {
        let event = tokio::select! {
            event = events.recv() => match event {
                Some(event) => event,
                None => break,
            },
            _ = tokio::signal::ctrl_c() => break,
        };
        info!("{}", event);

        match event {
            Event::DeviceAdded(device) => control.connect(&device).await,
            Event::DeviceConnected(device) => {
                let control = control.clone();
                tokio::spawn(async move {
                    let mut ticker = interval(every);
                    let mut on = true;
                    loop {
                        ticker.tick().await;
                        if control.set_power(&device, on, None).await != CommandOutcome::Written {
                            warn!("Stopped toggling {}", device.id());
                            break;
                        }
                        on = !on;
                    }
                });
            }
            _ => {}
        }
    }

    Ok(())
}

/// One line of `discover` output.
#[derive(Serialize)]
struct DeviceRow {
    id: String,
    name: String,
    location: String,
    model: String,
    power: String,
    brightness: Option<u8>,
    rgb: Option<String>,
}

impl From<&Device> for DeviceRow {
    fn from(device: &Device) -> Self {
        let properties = device.properties();
        DeviceRow {
            id: device.id().to_string(),
            name: properties.name.clone().unwrap_or_default(),
            location: properties.location.clone().unwrap_or_default(),
            model: properties.model.clone().unwrap_or_default(),
            power: properties
                .power
                .map(|power| power.to_string())
                .unwrap_or_default(),
            brightness: properties.brightness,
            rgb: properties.rgb.map(|rgb| rgb.to_string()),
        }
    }
}

impl std::fmt::Display for DeviceRow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} {} power={} brightness={}",
            self.id,
            self.location,
            self.power,
            self.brightness
                .map(|b| b.to_string())
                .unwrap_or_else(|| "-".to_string())
        )
    }
}

fn pretty_print_devices(devices: &[DeviceRow]) {
    let width = |f: fn(&DeviceRow) -> usize, header: &str| {
        devices.iter().map(f).max().map_or(header.len(), |w| max(w, header.len())) + 2
    };
    let id_width = width(|d| d.id.len(), "Device ID");
    let name_width = width(|d| d.name.len(), "Name");
    let location_width = width(|d| d.location.len(), "Location");
    let model_width = width(|d| d.model.len(), "Model");

    println!(
        "{:<id_width$}{:<name_width$}{:<location_width$}{:<model_width$}{:<7}{:<12}{}",
        "Device ID", "Name", "Location", "Model", "Power", "Brightness", "Color",
    );
    println!(
        "{:<id_width$}{:<name_width$}{:<location_width$}{:<model_width$}{:<7}{:<12}{}",
        "-".repeat(id_width - 2),
        "-".repeat(name_width - 2),
        "-".repeat(location_width - 2),
        "-".repeat(model_width - 2),
        "-----",
        "----------",
        "-------",
    );

    for device in devices {
        println!(
            "{:<id_width$}{:<name_width$}{:<location_width$}{:<model_width$}{:<7}{:<12}{}",
            device.id,
            device.name,
            device.location,
            device.model,
            device.power,
            device
                .brightness
                .map(|b| b.to_string())
                .unwrap_or_default(),
            device.rgb.as_deref().unwrap_or(""),
        );
    }
}
