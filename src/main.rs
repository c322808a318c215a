pub mod config;
pub mod device;
pub mod router;
pub mod server;
pub mod session;
pub mod steering;

use crate::config::BridgeConfig;
use crate::device::{SharedSink, WindowFocus};
use crate::router::CommandRouter;
use crate::server::BridgeServer;
use color_eyre::{eyre::WrapErr, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> Result<()> {
    setup()?;

    let config_path = config::config_path(std::env::args().nth(1));
    let config = BridgeConfig::load_or_create(&config_path)
        .await
        .wrap_err("Invalid configuration")?;

    // Devices first: no session is accepted without both of them
    let sink = create_sink(Duration::from_millis(config.gamepad.settle_ms))
        .await
        .wrap_err("Failed to set up virtual devices")?;
    let focus = Arc::new(WindowFocus::from_config(&config.focus).await);

    let router = CommandRouter::new(sink, focus, config.router_settings());

    let shutdown = CancellationToken::new();
    let ctrl_c = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Interrupt received"),
            Err(e) => warn!("Failed to listen for ctrl-c: {}", e),
        }
        ctrl_c.cancel();
    });

    info!(
        "DriveBridge running on port {} with {} ms PWM cycle",
        config.server.port, config.steering.cycle_ms
    );
    BridgeServer::new(config.server.clone(), router, shutdown)
        .run()
        .await
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
        .with_file(true)
        .with_line_number(true)
        .init();
}

#[cfg(target_os = "linux")]
async fn create_sink(settle: Duration) -> Result<SharedSink, device::StartupError> {
    let sink = device::uinput::UinputSink::create(settle).await?;
    Ok(Arc::new(sink))
}

#[cfg(not(target_os = "linux"))]
async fn create_sink(_settle: Duration) -> Result<SharedSink, device::StartupError> {
    Err(device::StartupError::Unsupported)
}
