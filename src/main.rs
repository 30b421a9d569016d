mod modem;
mod transport;
mod uplink;

use anyhow::{Context, Result};
use bytes::Bytes;
use clap::{Args, Parser, Subcommand};
use modem::{
    synthetic_position, ModemSession, MqttEndpoint, PowerKey, RecordedPowerKey, SysfsPowerKey,
    TlsConfig, DEFAULT_POWER_PIN,
};
use oceanwatch_shared::{FrameMetadata, DEFAULT_CHUNK_SIZE};
use std::path::PathBuf;
use transport::{ModemChannel, SerialChannel, SerialConfig, SimulatedModem};
use uplink::{EncoderConfig, FrameTransmitter};

use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Field sensor unit uplink over a SIM7600X cellular hat
#[derive(Parser, Debug)]
#[command(name = "oceanwatch-edge", version)]
struct Cli {
    /// Serial device of the modem's AT port
    #[arg(long, default_value = "/dev/ttyS0")]
    port: String,

    #[arg(long, default_value_t = 115_200)]
    baud: u32,

    /// BCM pin wired to the modem's power key
    #[arg(long, default_value_t = DEFAULT_POWER_PIN)]
    power_pin: u32,

    /// Talk to an in-process simulated modem instead of the hat
    #[arg(long)]
    simulate: bool,

    /// Skip the power-key sequence (modem already on)
    #[arg(long)]
    no_power_cycle: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Send one detection image with its telemetry
    Send(SendArgs),
    /// Send a text message
    Sms { number: String, text: String },
    /// Print SIM, registration and bearer status
    Diagnose,
    /// Read one GPS fix
    Gps {
        /// Generate a position in the bench-test area instead
        #[arg(long)]
        synthetic: bool,
    },
}

#[derive(Args, Debug)]
struct SendArgs {
    /// Image file to send
    image: PathBuf,

    #[arg(long, default_value_t = 0)]
    clusters: u32,

    /// Capture label; defaults to the local time as `%H-%M-%S_%d-%m-%y`
    #[arg(long)]
    label: Option<String>,

    /// Latitude; queried from GPS when omitted
    #[arg(long, allow_hyphen_values = true, requires = "longitude")]
    latitude: Option<f64>,

    #[arg(long, allow_hyphen_values = true, requires = "latitude")]
    longitude: Option<f64>,

    /// Use a synthetic position when no coordinates are given
    #[arg(long)]
    synthetic_gps: bool,

    #[arg(long, default_value_t = 0.0, allow_hyphen_values = true)]
    temperature: f64,
    #[arg(long, default_value_t = 0.0)]
    humidity: f64,
    #[arg(long, default_value_t = 0.0)]
    pressure: f64,
    #[arg(long, default_value_t = 0.0, allow_hyphen_values = true)]
    pitch: f64,
    #[arg(long, default_value_t = 0.0, allow_hyphen_values = true)]
    roll: f64,
    #[arg(long, default_value_t = 0.0, allow_hyphen_values = true)]
    yaw: f64,

    /// MQTT broker host
    #[arg(long)]
    host: Option<String>,

    /// Topic the frame tokens are published to
    #[arg(long)]
    topic: Option<String>,

    #[arg(long, default_value_t = DEFAULT_CHUNK_SIZE)]
    chunk_size: usize,

    /// Append a `seq=<n>` field to the start token
    #[arg(long)]
    sequence_numbers: bool,
}

/// How the sender reaches and powers its modem
#[derive(Debug, Clone)]
struct SessionConfig {
    serial: SerialConfig,
    power_pin: u32,
    simulate: bool,
    power_cycle: bool,
}

impl From<&Cli> for SessionConfig {
    fn from(cli: &Cli) -> Self {
        Self {
            serial: SerialConfig {
                port: cli.port.clone(),
                baud: cli.baud,
            },
            power_pin: cli.power_pin,
            simulate: cli.simulate,
            power_cycle: !cli.no_power_cycle,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    let cli = Cli::parse();
    let config = SessionConfig::from(&cli);

    if config.simulate {
        info!("Using simulated modem");
        let (channel, log) = SimulatedModem::new().spawn();
        let session = ModemSession::new(channel, RecordedPowerKey::new());
        let result = run(session, &config, cli.command).await;
        let body_bytes: usize = log.bodies().iter().map(Vec::len).sum();
        info!(
            "Simulated modem received {} commands and {} body bytes",
            log.commands().len(),
            body_bytes
        );
        result
    } else {
        info!("Opening modem on {}", config.serial.port);
        let channel = SerialChannel::open(&config.serial)?;
        let power_key = SysfsPowerKey::open(config.power_pin).await?;
        run(ModemSession::new(channel, power_key), &config, cli.command).await
    }
}

async fn run<C: ModemChannel, P: PowerKey>(
    mut session: ModemSession<C, P>,
    config: &SessionConfig,
    command: Command,
) -> Result<()> {
    if config.power_cycle {
        session.power_on().await?;
    } else {
        session.assume_powered();
    }

    let result = execute(&mut session, command).await;
    if let Err(e) = &result {
        error!("Command failed: {:#}", e);
    }
    if config.power_cycle {
        session.power_down().await?;
    }
    result
}

async fn execute<C: ModemChannel, P: PowerKey>(
    session: &mut ModemSession<C, P>,
    command: Command,
) -> Result<()> {
    match command {
        Command::Send(args) => send_image(session, args).await,
        Command::Sms { number, text } => {
            if !session.send_sms(&number, &text).await? {
                warn!("Message to {} not confirmed", number);
            }
            Ok(())
        }
        Command::Diagnose => {
            let report = session.check_network().await?;
            for line in &report.lines {
                let text = line.outcome.response().unwrap_or("<no response>");
                println!("{:<12} {}", line.command, text.trim().replace("\r\n", " | "));
            }
            Ok(())
        }
        Command::Gps { synthetic } => {
            let position = if synthetic {
                Some(synthetic_position(&mut rand::thread_rng()))
            } else {
                session.gps_enable().await?;
                let position = session.gps_position().await?;
                session.gps_disable().await?;
                position
            };
            match position {
                Some(p) => println!("{:.6},{:.6}", p.latitude, p.longitude),
                None => println!("no fix"),
            }
            Ok(())
        }
    }
}

async fn send_image<C: ModemChannel, P: PowerKey>(
    session: &mut ModemSession<C, P>,
    args: SendArgs,
) -> Result<()> {
    let image = tokio::fs::read(&args.image)
        .await
        .with_context(|| format!("Failed to read {}", args.image.display()))?;

    let (latitude, longitude) = match (args.latitude, args.longitude) {
        (Some(lat), Some(lon)) => (lat, lon),
        _ if args.synthetic_gps => {
            let p = synthetic_position(&mut rand::thread_rng());
            (p.latitude, p.longitude)
        }
        _ => {
            session.gps_enable().await?;
            let fix = session.gps_position().await?;
            session.gps_disable().await?;
            let p = fix.context("No GPS fix; pass --latitude/--longitude or --synthetic-gps")?;
            (p.latitude, p.longitude)
        }
    };

    let metadata = FrameMetadata {
        latitude,
        longitude,
        cluster_count: args.clusters,
        capture_label: args
            .label
            .unwrap_or_else(|| chrono::Local::now().format("%H-%M-%S_%d-%m-%y").to_string()),
        temperature: args.temperature,
        humidity: args.humidity,
        pressure: args.pressure,
        pitch: args.pitch,
        roll: args.roll,
        yaw: args.yaw,
        sequence: None,
    };

    let mut endpoint = MqttEndpoint::default();
    if let Some(host) = args.host {
        endpoint.host = host;
    }
    let mut encoder = EncoderConfig {
        chunk_size: args.chunk_size,
        sequence_numbers: args.sequence_numbers,
        ..Default::default()
    };
    if let Some(topic) = args.topic {
        encoder.topic = topic;
    }

    session.check_network().await?;
    session.configure_tls(&TlsConfig::default()).await?;
    let report = session.connect(&endpoint).await?;
    if !report.is_connected() {
        warn!("Failed connect steps: {:?}", report.failed_steps());
    }

    let mut transmitter = FrameTransmitter::new(encoder);
    let sent = transmitter
        .transmit(session, Bytes::from(image), Some(metadata))
        .await;
    session.disconnect().await?;

    let sent = sent?;
    info!(
        "Sent {} bytes as {} chunks ({} unconfirmed tokens)",
        sent.payload_bytes, sent.chunks, sent.unconfirmed
    );
    Ok(())
}
