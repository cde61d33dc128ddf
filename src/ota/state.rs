// Durable OTA lifecycle record
//
// Two keys under the `ota` namespace:
//   state  - one byte, see `OtaState`
//   req_id - request uuid, NUL terminated, fixed length
//
// Every transition is saved before the side effect it guards becomes visible,
// so the boot-time recovery can always tell how far the last update got.

use heapless::String as FixedString;
use std::sync::Arc;

use crate::error::SettingsError;
use crate::system::{SettingsBackend, Storage};

pub const OTA_NAMESPACE: &str = "ota";
pub const OTA_STATE_KEY: &str = "state";
pub const OTA_REQUEST_ID_KEY: &str = "req_id";

/// Length of a canonical textual UUID.
pub const UUID_STR_LEN: usize = 36;

pub type RequestId = FixedString<UUID_STR_LEN>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum OtaState {
    Idle = 1,
    InProgress = 2,
    PendingReboot = 3,
}

impl OtaState {
    pub fn from_byte(value: u8) -> Option<Self> {
        match value {
            1 => Some(OtaState::Idle),
            2 => Some(OtaState::InProgress),
            3 => Some(OtaState::PendingReboot),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersistedOtaRecord {
    pub state: OtaState,
    /// Only meaningful when `state != Idle`.
    pub uuid: Option<RequestId>,
}

impl Default for PersistedOtaRecord {
    fn default() -> Self {
        Self {
            state: OtaState::Idle,
            uuid: None,
        }
    }
}

/// Build a fixed-capacity request id; `None` unless `uuid` is exactly
/// `UUID_STR_LEN` characters.
pub fn request_id(uuid: &str) -> Option<RequestId> {
    if uuid.len() != UUID_STR_LEN {
        return None;
    }
    let mut id = RequestId::new();
    id.push_str(uuid).ok()?;
    Some(id)
}

fn encode_request_id(uuid: &RequestId) -> [u8; UUID_STR_LEN + 1] {
    let mut raw = [0u8; UUID_STR_LEN + 1];
    raw[..uuid.len()].copy_from_slice(uuid.as_bytes());
    raw
}

fn decode_request_id(raw: &[u8]) -> Option<RequestId> {
    let end = raw.iter().position(|b| *b == 0).unwrap_or(raw.len());
    let text = std::str::from_utf8(&raw[..end]).ok()?;
    request_id(text)
}

/// Typed access to the persisted OTA record.
#[derive(Clone)]
pub struct OtaStateStore {
    storage: Storage,
}

impl OtaStateStore {
    pub fn new(backend: Arc<dyn SettingsBackend>) -> Self {
        Self {
            storage: Storage::new(backend, OTA_NAMESPACE),
        }
    }

    pub fn init(&self) -> Result<(), SettingsError> {
        self.storage.init().map_err(|e| {
            log::error!("Settings init failed: {:?}", e);
            SettingsError::Init
        })
    }

    pub fn save_state(&self, state: OtaState) -> Result<(), SettingsError> {
        self.storage
            .write_raw(OTA_STATE_KEY, &[state as u8])
            .map_err(|e| {
                log::error!("Unable to persist OTA state {:?}: {:?}", state, e);
                SettingsError::Save
            })
    }

    pub fn save_request_id(&self, uuid: &RequestId) -> Result<(), SettingsError> {
        self.storage
            .write_raw(OTA_REQUEST_ID_KEY, &encode_request_id(uuid))
            .map_err(|e| {
                log::error!("Unable to persist OTA request id: {:?}", e);
                SettingsError::Save
            })
    }

    pub fn delete_request_id(&self) -> Result<(), SettingsError> {
        self.storage.delete(OTA_REQUEST_ID_KEY).map_err(|e| {
            log::error!("Unable to delete OTA request id: {:?}", e);
            SettingsError::Delete
        })
    }

    /// Read the current record. Missing keys decode as `Idle` / no uuid.
    pub fn load(&self) -> Result<PersistedOtaRecord, SettingsError> {
        let state_raw = self.storage.read_raw(OTA_STATE_KEY).map_err(|e| {
            log::error!("Unable to read OTA state from settings: {:?}", e);
            SettingsError::Load
        })?;
        let id_raw = self.storage.read_raw(OTA_REQUEST_ID_KEY).map_err(|e| {
            log::error!("Unable to read OTA request uuid from settings: {:?}", e);
            SettingsError::Load
        })?;

        let state = match state_raw.as_deref() {
            None | Some([]) => OtaState::Idle,
            Some([byte, ..]) => OtaState::from_byte(*byte).unwrap_or_else(|| {
                log::warn!("Unknown persisted OTA state {}, treating as idle", byte);
                OtaState::Idle
            }),
        };
        let uuid = id_raw.as_deref().and_then(decode_request_id);

        Ok(PersistedOtaRecord { state, uuid })
    }

    /// Final step of every update lifecycle: scrub the request id and go idle.
    pub fn reset(&self) -> Result<(), SettingsError> {
        let deleted = self.delete_request_id();
        self.save_state(OtaState::Idle)?;
        deleted
    }
}
