// OTA (Over-The-Air) update module
//
// Update flow:
// 1. Controller admits the request and spawns the worker
// 2. Worker persists intent and downloads into the inactive bank (with retry)
// 3. Worker persists PendingReboot, requests a test boot and restarts
// 4. On the next boot, recovery confirms the new image or reports the failure

pub mod bootloader;
pub mod controller;
pub mod download;
pub mod events;
pub mod pipeline;
pub mod recovery;
pub mod request;
pub mod run_state;
pub mod state;
pub mod worker;

use std::sync::Arc;

use crate::config::OtaConfig;
use crate::system::SettingsBackend;

pub use bootloader::{Bank, Bootloader, FlashError, ImageHeader, ImageWriter, SwapType, SystemControl};
pub use controller::OtaController;
pub use download::{DownloadChunk, DownloadClient, Transfer};
pub use events::{EventPublisher, OtaEvent, OtaEventPhase, OtaNotification, TelemetryChannel};
pub use recovery::RecoveryOutcome;
pub use request::{OtaCommand, UpdateRequest};
pub use run_state::OtaRunState;
pub use state::{OtaState, OtaStateStore, PersistedOtaRecord};
pub use worker::WorkerOutcome;

/// External collaborators the OTA core drives.
#[derive(Clone)]
pub struct Collaborators {
    pub settings: Arc<dyn SettingsBackend>,
    pub bootloader: Arc<dyn Bootloader>,
    pub downloader: Arc<dyn DownloadClient>,
    pub telemetry: Arc<dyn TelemetryChannel>,
    pub system: Arc<dyn SystemControl>,
}

/// State shared by the admission path and the worker thread.
pub struct OtaContext {
    pub config: OtaConfig,
    pub run_state: OtaRunState,
    pub store: OtaStateStore,
    pub publisher: EventPublisher,
    pub bootloader: Arc<dyn Bootloader>,
    pub downloader: Arc<dyn DownloadClient>,
    pub system: Arc<dyn SystemControl>,
}

impl OtaContext {
    pub fn new(config: OtaConfig, collaborators: Collaborators) -> Self {
        Self {
            config,
            run_state: OtaRunState::new(),
            store: OtaStateStore::new(collaborators.settings),
            publisher: EventPublisher::new(collaborators.telemetry),
            bootloader: collaborators.bootloader,
            downloader: collaborators.downloader,
            system: collaborators.system,
        }
    }
}
