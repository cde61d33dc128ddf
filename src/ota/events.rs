// OTA event publication
//
// Internal phases and errors are mapped onto the fixed outward vocabulary of
// the device management interface. Publishing is best effort: failures are
// logged and never affect the update itself.

use serde::{Deserialize, Serialize};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};

use crate::error::{OtaError, StatusCode};

pub const OTA_EVENT_INTERFACE: &str = "io.edgehog.devicemanager.OTAEvent";
pub const OTA_EVENT_PATH: &str = "/event";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum OtaEventPhase {
    Acknowledged = 0,
    Downloading,
    Deploying,
    Deployed,
    Rebooting,
    Success,
    Error,
    Failure,
}

const PHASE_STATUS_TABLE: [&str; 8] = [
    "Acknowledged",
    "Downloading",
    "Deploying",
    "Deployed",
    "Rebooting",
    "Success",
    "Error",
    "Failure",
];

impl OtaEventPhase {
    pub const ALL: [OtaEventPhase; 8] = [
        OtaEventPhase::Acknowledged,
        OtaEventPhase::Downloading,
        OtaEventPhase::Deploying,
        OtaEventPhase::Deployed,
        OtaEventPhase::Rebooting,
        OtaEventPhase::Success,
        OtaEventPhase::Error,
        OtaEventPhase::Failure,
    ];

    pub fn status(self) -> &'static str {
        PHASE_STATUS_TABLE[self as usize]
    }

    fn notification(self) -> Option<OtaNotification> {
        match self {
            OtaEventPhase::Acknowledged => Some(OtaNotification::Init),
            OtaEventPhase::Success => Some(OtaNotification::Success),
            OtaEventPhase::Error | OtaEventPhase::Failure => Some(OtaNotification::Failed),
            _ => None,
        }
    }
}

/// Record streamed on the device management channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OtaEvent {
    #[serde(rename = "requestUUID")]
    pub request_uuid: String,
    pub status: String,
    #[serde(rename = "statusProgress")]
    pub status_progress: i32,
    #[serde(rename = "statusCode")]
    pub status_code: String,
    pub message: String,
    pub timestamp: i64,
}

/// Coarse notifications for local listeners (UI, LEDs, application logic).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OtaNotification {
    Init,
    Success,
    Failed,
}

/// Outbound transport for OTA events.
pub trait TelemetryChannel: Send + Sync {
    fn publish(&self, interface: &str, path: &str, event: &OtaEvent) -> anyhow::Result<()>;
}

pub struct EventPublisher {
    channel: Arc<dyn TelemetryChannel>,
    subscribers: Mutex<Vec<Sender<OtaNotification>>>,
}

impl EventPublisher {
    pub fn new(channel: Arc<dyn TelemetryChannel>) -> Self {
        Self {
            channel,
            subscribers: Mutex::new(Vec::new()),
        }
    }

    /// Register a local listener. Dropped receivers are pruned on the next
    /// notification.
    pub fn subscribe(&self) -> Receiver<OtaNotification> {
        let (tx, rx) = mpsc::channel();
        match self.subscribers.lock() {
            Ok(mut subscribers) => subscribers.push(tx),
            Err(e) => log::error!("OTA subscribers lock poisoned: {}", e),
        }
        rx
    }

    pub fn publish(
        &self,
        request_uuid: &str,
        phase: OtaEventPhase,
        progress: i32,
        error: Option<&OtaError>,
        message: &str,
    ) {
        let status_code = error.map_or(StatusCode::None, OtaError::status_code);
        let event = OtaEvent {
            request_uuid: request_uuid.to_string(),
            status: phase.status().to_string(),
            status_progress: progress.clamp(0, 100),
            status_code: status_code.as_str().to_string(),
            message: message.to_string(),
            timestamp: unix_timestamp(),
        };

        if let Some(notification) = phase.notification() {
            self.notify(notification);
        }

        if let Err(e) = self
            .channel
            .publish(OTA_EVENT_INTERFACE, OTA_EVENT_PATH, &event)
        {
            log::error!("Unable to send ota_event {}: {:?}", event.status, e);
        }
    }

    fn notify(&self, notification: OtaNotification) {
        match self.subscribers.lock() {
            Ok(mut subscribers) => {
                subscribers.retain(|tx| tx.send(notification).is_ok());
            }
            Err(e) => log::error!("OTA subscribers lock poisoned: {}", e),
        }
    }
}

fn unix_timestamp() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}
