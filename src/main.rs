use std::path::PathBuf;
use std::time::{Duration, Instant};

use clap::{Parser, ValueEnum};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use vr_teleop::config::{ArmMode, TeleopConfig};
use vr_teleop::error::AppError;
use vr_teleop::video::{CameraSource, TestPatternCamera};
use vr_teleop::VrTeleoperator;

/// Log level for the application
#[derive(Debug, Clone, Copy, Default, ValueEnum)]
enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Verbose,
    Debug,
    Trace,
}

/// vr-teleop command line arguments
#[derive(Parser, Debug)]
#[command(name = "vr-teleop")]
#[command(version, about = "Teleoperate a robot from a WebXR headset", long_about = None)]
struct CliArgs {
    /// TOML configuration file
    #[arg(short = 'c', long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Listen address (overrides config file)
    #[arg(short = 'a', long, value_name = "ADDRESS")]
    address: Option<String>,

    /// Listen port (overrides config file)
    #[arg(short = 'p', long, value_name = "PORT")]
    port: Option<u16>,

    /// Serve plain HTTP (the headset only accepts this on localhost)
    #[arg(long)]
    no_tls: bool,

    /// Path to SSL certificate file (generates self-signed if not provided)
    #[arg(long, value_name = "FILE", requires = "ssl_key")]
    ssl_cert: Option<PathBuf>,

    /// Path to SSL private key file
    #[arg(long, value_name = "FILE", requires = "ssl_cert")]
    ssl_key: Option<PathBuf>,

    /// Directory holding the headset web client, served under /static
    #[arg(long, value_name = "DIR")]
    static_dir: Option<PathBuf>,

    /// Comma separated camera names, one video track each
    #[arg(long, value_name = "NAMES", value_delimiter = ',')]
    cameras: Option<Vec<String>>,

    /// Feed every camera track with a synthetic test pattern
    #[arg(long)]
    test_pattern: bool,

    /// Controller displacement multiplier
    #[arg(long, value_name = "SCALE")]
    position_scale: Option<f64>,

    /// bimanual or single
    #[arg(long, value_name = "MODE")]
    arm_mode: Option<ArmMode>,

    /// Start the control loop without waiting for calibration
    #[arg(long)]
    skip_calibration: bool,

    /// Log level (error, warn, info, verbose, debug, trace)
    #[arg(short = 'l', long, value_name = "LEVEL", default_value = "info")]
    log_level: LogLevel,

    /// Increase verbosity (-v for verbose, -vv for debug, -vvv for trace)
    #[arg(short = 'v', long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn main() -> anyhow::Result<()> {
    let args = CliArgs::parse();

    init_logging(args.log_level, args.verbose);

    // Required by rustls 0.23+
    vr_teleop::tls::install_crypto_provider();

    tracing::info!("Starting vr-teleop v{}", env!("CARGO_PKG_VERSION"));

    let config = load_config(&args)?;
    let rate_hz = config.control.control_rate_hz;
    let camera_names = config.video.camera_names.clone();
    let resolution = config.video.resolution();

    let mut teleop = VrTeleoperator::new(config)?;
    if args.test_pattern {
        let cameras = camera_names
            .into_iter()
            .map(|name| {
                let camera: Box<dyn CameraSource> = Box::new(TestPatternCamera::new(resolution));
                (name, camera)
            })
            .collect();
        teleop.set_cameras(cameras);
    }

    let stop = CancellationToken::new();
    let handler_stop = stop.clone();
    ctrlc::set_handler(move || {
        tracing::info!("Shutdown signal received");
        handler_stop.cancel();
    })?;

    teleop.connect(false)?;

    if !args.skip_calibration {
        match teleop.calibrate_with(&stop, None) {
            Ok(()) => {}
            Err(AppError::CalibrationCancelled(_)) => {
                tracing::info!("Calibration cancelled");
                teleop.disconnect()?;
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        }
    }

    run_control_loop(&mut teleop, &stop, rate_hz)?;

    let report = teleop.disconnect()?;
    for (session, error) in &report.failed {
        tracing::warn!("Session {} failed to close: {}", session, error);
    }
    tracing::info!("vr-teleop stopped");
    Ok(())
}

/// Config file (or defaults) with CLI overrides applied
fn load_config(args: &CliArgs) -> anyhow::Result<TeleopConfig> {
    let mut config = match &args.config {
        Some(path) => {
            tracing::info!("Loading configuration from {}", path.display());
            TeleopConfig::load(path)?
        }
        None => TeleopConfig::default(),
    };

    if let Some(address) = &args.address {
        config.server.host = address.clone();
    }
    if let Some(port) = args.port {
        config.server.port = port;
    }
    if args.no_tls {
        config.server.tls = false;
    }
    if args.ssl_cert.is_some() {
        config.server.ssl_cert_path = args.ssl_cert.clone();
        config.server.ssl_key_path = args.ssl_key.clone();
    }
    if let Some(dir) = &args.static_dir {
        config.server.static_dir = Some(dir.clone());
    }
    if let Some(cameras) = &args.cameras {
        config.video.camera_names = cameras.clone();
    }
    if let Some(scale) = args.position_scale {
        config.control.position_scale = scale;
    }
    if let Some(mode) = args.arm_mode {
        config.control.arm_mode = mode;
    }

    config.validate()?;
    Ok(config)
}

/// Map actions at a fixed rate until `stop` is cancelled
fn run_control_loop(
    teleop: &mut VrTeleoperator,
    stop: &CancellationToken,
    rate_hz: u32,
) -> anyhow::Result<()> {
    let period = Duration::from_secs_f64(1.0 / f64::from(rate_hz.max(1)));
    let started = Instant::now();
    let mut ticks: u32 = 0;

    tracing::info!("Control loop running at {} Hz", rate_hz);
    while !stop.is_cancelled() {
        let action = teleop.get_action()?;
        tracing::debug!(action = ?action, "tick {}", ticks);

        // Absolute schedule so the loop does not drift
        ticks += 1;
        let target = started + period * ticks;
        let now = Instant::now();
        if target > now {
            std::thread::sleep(target - now);
        }
    }
    Ok(())
}

fn init_logging(level: LogLevel, verbose_count: u8) {
    // Verbose count overrides log level
    let effective_level = match verbose_count {
        0 => level,
        1 => LogLevel::Verbose,
        2 => LogLevel::Debug,
        _ => LogLevel::Trace,
    };

    let filter = match effective_level {
        LogLevel::Error => "vr_teleop=error,tower_http=error,webrtc=error",
        LogLevel::Warn => "vr_teleop=warn,tower_http=warn,webrtc=warn",
        LogLevel::Info => "vr_teleop=info,tower_http=info,webrtc=warn",
        LogLevel::Verbose => "vr_teleop=debug,tower_http=info,webrtc=warn",
        LogLevel::Debug => "vr_teleop=debug,tower_http=debug,webrtc=info",
        LogLevel::Trace => "vr_teleop=trace,tower_http=debug,webrtc=debug",
    };

    // Environment variable takes highest priority
    let env_filter =
        tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into());

    if let Err(err) = tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .try_init()
    {
        eprintln!("failed to initialize tracing: {}", err);
    }
}
