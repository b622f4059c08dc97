use color_eyre::{eyre::eyre, Result};
use padlink::config::AppConfig;
use padlink::consumer::{ChannelConsumer, ConsumerEvent};
use padlink::control::ControlSurface;
use padlink::discovery::SystemInterfaces;
use padlink::platform::desktop::DesktopPlatform;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> Result<()> {
    setup()?;

    let config = setup_config().await?;
    info!("Using config: {:?}", config);

    let platform =
        DesktopPlatform::spawn().map_err(|e| eyre!("Failed to spawn gamepad platform: {}", e))?;

    let (consumer, consumer_events) = ChannelConsumer::channel(1000);
    let control = ControlSurface::new(
        &config,
        platform.capture_platform(),
        Arc::new(SystemInterfaces),
        Arc::new(consumer),
    )?;

    control.initialize_device_detection();
    control.start_discovery().await?;
    if let Err(e) = control.start_capture(config.capture.haptics_enabled) {
        // Discovery stays useful without capture.
        error!("Capture unavailable: {}", e);
    }

    info!("padlink running, press Ctrl-C to stop");
    run_until_interrupted(consumer_events).await;

    control.shutdown().await?;
    platform.backend().shutdown();
    info!("padlink stopped");
    Ok(())
}

async fn run_until_interrupted(mut events: mpsc::Receiver<ConsumerEvent>) {
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupt received, shutting down");
                break;
            }
            event = events.recv() => match event {
                Some(event) => log_event(event),
                None => {
                    warn!("Consumer channel closed");
                    break;
                }
            }
        }
    }
}

fn log_event(event: ConsumerEvent) {
    match event {
        ConsumerEvent::ServerFound(server) => info!(
            "Server {} at {} (seen {})",
            server.name,
            server.address,
            server.seen_at.format("%H:%M:%S")
        ),
        ConsumerEvent::GamepadConnected {
            device_name,
            device_id,
        } => info!("Gamepad connected: {} ({})", device_name, device_id),
        ConsumerEvent::GamepadDisconnected => info!("Gamepad disconnected"),
        ConsumerEvent::GamepadInput(input) => match input.to_json() {
            Ok(json) => debug!("Input: {}", json),
            Err(e) => warn!("Failed to serialize input: {}", e),
        },
        ConsumerEvent::ServiceStatus(status) => info!("Service status: {}", status.as_str()),
    }
}

fn setup() -> Result<()> {
    if std::env::var("RUST_LIB_BACKTRACE").is_err() {
        std::env::set_var("RUST_LIB_BACKTRACE", "0")
    }
    color_eyre::install()?;
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "info")
    }
    setup_logging_env();
    Ok(())
}

fn setup_logging_env() {
    FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .with_target(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .pretty()
        .init();
}

async fn setup_config() -> Result<AppConfig> {
    let path = AppConfig::default_path();
    AppConfig::ensure_default_config(&path).await?;

    match AppConfig::load(&path).await {
        Ok(config) => Ok(config),
        Err(e) => {
            warn!("Falling back to default config: {}", e);
            Ok(AppConfig::default())
        }
    }
}
