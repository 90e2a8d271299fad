use crate::capture::{Capturer, StillImageSource};
use crate::config::{PipelineConfig, app_name, app_version};
use crate::display::LogPresenter;
use crate::pipeline::{CoordinatorHandle, PipelineCoordinator, PipelineEvent, PipelineHealth};
use crate::utils::net::websocket::{ConnectOptions, WsChannel, realtime_url};
use anyhow::Context;
use clap::{Arg, ArgAction, ArgMatches, Command, value_parser};
use log::{error, info, warn};
use std::path::PathBuf;
use std::sync::Arc;
use std::{panic, process};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

pub mod assets;
pub mod capture;
pub mod config;
pub mod display;
pub mod pipeline;
pub mod utils;

fn cli() -> Command {
    Command::new(app_name())
        .version(app_version())
        .author(env!("CARGO_PKG_AUTHORS"))
        .about(env!("CARGO_PKG_DESCRIPTION"))
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("JSON configuration file.")
                .value_parser(value_parser!(PathBuf)),
        )
        .arg(
            Arg::new("source")
                .short('s')
                .long("source")
                .value_name("PATH")
                .help("Still image, or directory of stills, used as the camera.")
                .required(true)
                .value_parser(value_parser!(PathBuf)),
        )
        .arg(
            Arg::new("url")
                .short('u')
                .long("url")
                .value_name("URL")
                .help("WebSocket endpoint of the inference service."),
        )
        .arg(
            Arg::new("device-id")
                .long("device-id")
                .value_name("ID")
                .help("Device id sent to the service (defaults to a time based id)."),
        )
        .arg(
            Arg::new("fps")
                .long("fps")
                .value_name("FPS")
                .help("Target capture rate.")
                .value_parser(value_parser!(u32).range(1..=i64::from(assets::MAX_FRAME_RATE))),
        )
        .arg(
            Arg::new("max-pending")
                .long("max-pending")
                .value_name("FRAMES")
                .help("Frames allowed in flight before capture is held back.")
                .value_parser(value_parser!(usize)),
        )
        .arg(
            Arg::new("max-frame-kib")
                .long("max-frame-kib")
                .value_name("KIB")
                .help("Largest frame that will be sent.")
                .value_parser(value_parser!(usize)),
        )
        .arg(
            Arg::new("strict-correlation")
                .long("strict-correlation")
                .help("Only time results that echo a frame id.")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("autostart")
                .short('a')
                .long("autostart")
                .help("Start the session as soon as the device is ready.")
                .action(ArgAction::SetTrue),
        )
}

fn load_config(matches: &ArgMatches) -> anyhow::Result<PipelineConfig> {
    let mut config = match matches.get_one::<PathBuf>("config") {
        Some(path) => PipelineConfig::load(path)?,
        None => PipelineConfig::default(),
    };

    if let Some(url) = matches.get_one::<String>("url") {
        config.service_url = url.clone();
    }
    if let Some(id) = matches.get_one::<String>("device-id") {
        config.device_id = Some(id.clone());
    }
    if let Some(fps) = matches.get_one::<u32>("fps") {
        config.target_fps = *fps;
    }
    if let Some(pending) = matches.get_one::<usize>("max-pending") {
        config.max_pending_frames = *pending;
    }
    if let Some(kib) = matches.get_one::<usize>("max-frame-kib") {
        config.max_frame_size = kib * 1024;
    }
    if matches.get_flag("strict-correlation") {
        config.strict_correlation = true;
    }

    config.validate()?;
    Ok(config)
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let matches = cli().get_matches();
    let config = load_config(&matches)?;
    let source = matches
        .get_one::<PathBuf>("source")
        .cloned()
        .context("missing --source")?;
    let autostart = matches.get_flag("autostart");

    // kill the main thread as soon as a secondary thread panics
    let orig_hook = panic::take_hook();
    panic::set_hook(Box::new(move |panic_info| {
        orig_hook(panic_info);
        process::exit(105);
    }));

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("building tokio runtime")?;

    runtime.block_on(run(config, source, autostart))
}

async fn run(config: PipelineConfig, source: PathBuf, autostart: bool) -> anyhow::Result<()> {
    let device_id = config.resolve_device_id();
    info!("{} {} starting as device {}", app_name(), app_version(), device_id);

    let (channel, channel_events) = WsChannel::connect(
        realtime_url(&config.service_url, &device_id),
        ConnectOptions {
            timeout: config.connect_timeout(),
            attempts: config.connect_attempts,
            ..ConnectOptions::default()
        },
    );
    let channel = Arc::new(channel);

    let capturer = Capturer::new(Box::new(StillImageSource::new(source)), config.max_frame_size);
    let presenter = LogPresenter::new(config.viewport);
    let (coordinator, events) = PipelineCoordinator::new(
        config,
        device_id,
        capturer,
        channel.clone(),
        Box::new(presenter),
    );

    let (handle, commands) = CoordinatorHandle::new();

    // gracefully close the app when receiving SIGINT, SIGTERM, or SIGHUP
    let ctrlc_handle = handle.clone();
    ctrlc::set_handler(move || {
        if !ctrlc_handle.shutdown() {
            process::exit(130);
        }
    })
    .context("setting Ctrl-C handler")?;

    tokio::spawn(log_health(coordinator.health()));
    tokio::spawn(report_events(events));
    tokio::spawn(read_console(handle.clone()));

    if autostart {
        handle.start();
    } else {
        info!("Type 's' to start, 'x' to stop, 't' to toggle, 'q' to quit");
    }

    let outcome = coordinator.run(commands, channel_events).await;
    channel.close();
    outcome.context("pipeline failed")
}

async fn log_health(health: Arc<PipelineHealth>) {
    let mut ticker = tokio::time::interval(assets::HEALTH_LOG_INTERVAL);
    ticker.tick().await;
    loop {
        ticker.tick().await;
        info!("{}", health.summary());
    }
}

async fn report_events(mut events: mpsc::UnboundedReceiver<PipelineEvent>) {
    while let Some(event) = events.recv().await {
        match event {
            PipelineEvent::Started { device_id } => info!("Session started ({})", device_id),
            PipelineEvent::Stopped { summary } => info!("Session stopped: {}", summary),
            PipelineEvent::Disconnected { reason } => warn!("Connection lost: {}", reason),
            PipelineEvent::InitFailed { reason } => error!("Camera unavailable: {}", reason),
        }
    }
}

async fn read_console(handle: CoordinatorHandle) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        let delivered = match line.trim() {
            "s" | "start" => handle.start(),
            "x" | "stop" => handle.stop(),
            "t" | "toggle" => handle.toggle(),
            "q" | "quit" => handle.shutdown(),
            "" => true,
            other => {
                warn!("Unknown command '{}'", other);
                true
            }
        };
        if !delivered {
            break;
        }
    }
}
