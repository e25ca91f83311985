use anyhow::Result;
use clap::Parser;
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tracing::{error, info, warn};
use turbocam::{
    EventBus, ReplayFrameSource, SessionController, SessionState, StaticPermission,
    TurbocamConfig,
};

#[derive(Parser, Debug)]
#[command(name = "turbocam")]
#[command(about = "Camera scanning session for barcodes and printed text")]
#[command(version)]
#[command(long_about = "Runs a camera scanning session: frames are gated one at a time \
into a barcode or text detector and every result is printed as a JSON line. \
Without a camera attached, still images can be replayed as the frame source.")]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "turbocam.toml", help = "Path to TOML configuration file")]
    config: String,

    /// Enable debug logging (most verbose)
    #[arg(short, long, help = "Enable debug level logging")]
    debug: bool,

    /// Enable verbose logging (info level)
    #[arg(short, long, help = "Enable verbose info level logging")]
    verbose: bool,

    /// Enable quiet mode (errors only)
    #[arg(short, long, help = "Enable quiet mode - only log errors")]
    quiet: bool,

    /// Validate configuration and exit
    #[arg(long, help = "Validate configuration file and exit without scanning")]
    validate_config: bool,

    /// Print the effective configuration and exit
    #[arg(long, help = "Print the effective configuration in TOML format and exit")]
    print_config: bool,

    /// Override log format (json, pretty, compact)
    #[arg(long, value_name = "FORMAT", help = "Log output format: json, pretty, or compact")]
    log_format: Option<String>,

    /// Images to replay as camera frames
    #[arg(long, value_name = "FILE", num_args = 1.., help = "Still images to replay as the frame source")]
    frames: Vec<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(&args)?;

    info!("Starting turbocam v{}", env!("CARGO_PKG_VERSION"));
    info!("Configuration file: {}", args.config);

    let config = match TurbocamConfig::load_from_file(&args.config) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            return Err(e.into());
        }
    };

    if args.print_config {
        println!("# turbocam configuration");
        println!("{}", config.to_toml()?);
        return Ok(());
    }

    if args.validate_config {
        match config.validate() {
            Ok(()) => {
                info!("Configuration validation successful");
                println!("✓ Configuration is valid");
                return Ok(());
            }
            Err(e) => {
                error!("Configuration validation failed: {}", e);
                eprintln!("✗ Configuration validation failed: {}", e);
                std::process::exit(1);
            }
        }
    }

    if args.frames.is_empty() {
        anyhow::bail!("no frame source: pass still images with --frames");
    }

    let source = ReplayFrameSource::from_paths(&args.frames, config.camera.fps)?;
    let one_shot = config.detector.one_shot();

    let bus = Arc::new(if args.debug {
        EventBus::with_debug_logging(config.system.event_bus_capacity)
    } else {
        EventBus::new(config.system.event_bus_capacity)
    });
    let mut events = bus.subscribe();

    let controller = SessionController::builder()
        .config(config)
        .source(Arc::new(source))
        .permission(Arc::new(StaticPermission::granted()))
        .sink(bus.clone())
        .build()
        .map_err(|e| {
            error!("Failed to create session controller: {}", e);
            e
        })?;

    controller.start().await?;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, stopping session");
                break;
            }
            event = events.recv() => match event {
                Ok(event) => {
                    let line = json!({
                        "event": event.event_name(),
                        "payload": event.payload(),
                    });
                    println!("{}", line);

                    if let turbocam::ScanEvent::StateChanged { next, .. } = event {
                        if next == SessionState::Faulted {
                            warn!("Session faulted");
                            break;
                        }
                        if one_shot && next == SessionState::Idle {
                            break;
                        }
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!("Event output lagged, skipped {} event(s)", skipped);
                }
                Err(RecvError::Closed) => break,
            }
        }
    }

    controller.shutdown().await;
    info!("turbocam exited");

    Ok(())
}

fn init_logging(args: &Args) -> Result<()> {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

    let log_level = if args.debug {
        "debug"
    } else if args.verbose {
        "info"
    } else if args.quiet {
        "error"
    } else {
        "warn"
    };

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("turbocam={}", log_level)));

    // Logs go to stderr; stdout carries the event stream.
    let fmt_layer = match args.log_format.as_deref() {
        Some("json") => fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .with_target(true)
            .with_thread_ids(true)
            .with_file(true)
            .with_line_number(true)
            .boxed(),
        Some("compact") => fmt::layer()
            .compact()
            .with_writer(std::io::stderr)
            .with_target(false)
            .with_thread_ids(false)
            .with_file(false)
            .with_line_number(false)
            .boxed(),
        Some("pretty") | None => fmt::layer()
            .pretty()
            .with_writer(std::io::stderr)
            .with_target(true)
            .with_thread_ids(args.debug)
            .with_file(args.debug)
            .with_line_number(args.debug)
            .boxed(),
        Some(format) => {
            eprintln!("Warning: Unknown log format '{}', using default", format);
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(true)
                .with_thread_ids(args.debug)
                .with_file(args.debug)
                .with_line_number(args.debug)
                .boxed()
        }
    };

    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(env_filter)
        .init();

    Ok(())
}
