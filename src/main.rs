use anyhow::{Context, Result};
use log::{info, warn, LevelFilter};
use std::path::PathBuf;
use std::sync::Arc;

use ota_agent::config;
use ota_agent::host::{FileBootloader, FileDownloadClient, LogTelemetry, ProcessControl};
use ota_agent::logging;
use ota_agent::ota::{Collaborators, OtaController};
use ota_agent::system::{FileSettings, SettingsBackend, Storage};

const USAGE: &str = "usage: ota-agent <state-dir> [command-json]";

fn main() -> Result<()> {
    logging::init_logger(LevelFilter::Info)?;
    if let Ok(level) = std::env::var("OTA_LOG") {
        if !logging::set_max_level_from_str(&level) {
            warn!("Ignoring unknown OTA_LOG level {:?}", level);
        }
    }

    let mut args = std::env::args().skip(1);
    let state_dir = PathBuf::from(args.next().context(USAGE)?);
    let command = args.next();

    info!("=== OTA agent v{} ===", env!("CARGO_PKG_VERSION"));
    info!("State directory: {}", state_dir.display());

    // Settings
    let settings = Arc::new(FileSettings::new(state_dir.join("settings")));
    settings.init()?;
    let config = config::load_or_default(&Storage::new(
        settings.clone(),
        config::CONFIG_NAMESPACE,
    ))?;
    info!(
        "OTA config: {} attempts, {}% progress step",
        config.max_attempts, config.progress_step
    );

    // Bootloader pass, as at power-on
    let bootloader = Arc::new(FileBootloader::new(state_dir.join("banks")));
    let action = bootloader.boot()?;
    info!("Bootloader: {:?}", action);

    let controller = OtaController::new(
        config,
        Collaborators {
            settings,
            bootloader,
            downloader: Arc::new(FileDownloadClient::default()),
            telemetry: Arc::new(LogTelemetry::default()),
            system: Arc::new(ProcessControl),
        },
    );

    match controller.recover() {
        Ok(outcome) => info!("Boot recovery: {:?}", outcome),
        Err(e) => warn!("Boot recovery skipped: {}", e),
    }

    let Some(command) = command else {
        info!("No command given, exiting");
        return Ok(());
    };

    if let Err(e) = controller.handle_command_json(command.as_bytes()) {
        warn!("OTA command rejected: {}", e);
    }
    if let Some(outcome) = controller.wait_idle() {
        info!("OTA worker finished: {:?}", outcome);
    }

    Ok(())
}
