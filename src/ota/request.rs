use serde::Deserialize;
use std::collections::TryReserveError;

use crate::error::OtaError;
use crate::ota::state::UUID_STR_LEN;

/// Update request owned by the worker for the whole attempt sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateRequest {
    pub uuid: String,
    pub download_url: String,
}

impl UpdateRequest {
    pub fn new(uuid: impl Into<String>, download_url: impl Into<String>) -> Self {
        Self {
            uuid: uuid.into(),
            download_url: download_url.into(),
        }
    }

    pub fn validate(&self) -> Result<(), OtaError> {
        if self.uuid.is_empty() {
            return Err(OtaError::InvalidRequest("missing request uuid"));
        }
        if self.download_url.is_empty() {
            return Err(OtaError::InvalidRequest("missing download url"));
        }
        if !is_canonical_uuid(&self.uuid) {
            return Err(OtaError::InvalidRequest("malformed request uuid"));
        }
        Ok(())
    }

    /// Copy the request into storage owned by the worker, independent of the
    /// inbound buffer.
    pub fn try_duplicate(&self) -> Result<UpdateRequest, OtaError> {
        let uuid = try_copy(&self.uuid).map_err(|_| OtaError::OutOfMemory)?;
        let download_url = try_copy(&self.download_url).map_err(|_| OtaError::OutOfMemory)?;
        Ok(UpdateRequest { uuid, download_url })
    }
}

fn try_copy(src: &str) -> Result<String, TryReserveError> {
    let mut dst = String::new();
    dst.try_reserve_exact(src.len())?;
    dst.push_str(src);
    Ok(dst)
}

/// `8-4-4-4-12` hex groups, the only shape the durable record can hold.
pub fn is_canonical_uuid(uuid: &str) -> bool {
    uuid.len() == UUID_STR_LEN
        && uuid.char_indices().all(|(idx, c)| match idx {
            8 | 13 | 18 | 23 => c == '-',
            _ => c.is_ascii_hexdigit(),
        })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OtaOperation {
    Update,
    Cancel,
}

impl OtaOperation {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "Update" => Some(OtaOperation::Update),
            "Cancel" => Some(OtaOperation::Cancel),
            _ => None,
        }
    }
}

/// Inbound object received on the management channel.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct OtaCommand {
    pub uuid: Option<String>,
    pub url: Option<String>,
    pub operation: Option<String>,
}

impl OtaCommand {
    pub fn update(uuid: &str, url: &str) -> Self {
        Self {
            uuid: Some(uuid.to_string()),
            url: Some(url.to_string()),
            operation: Some("Update".to_string()),
        }
    }

    pub fn cancel(uuid: &str) -> Self {
        Self {
            uuid: Some(uuid.to_string()),
            url: None,
            operation: Some("Cancel".to_string()),
        }
    }
}
