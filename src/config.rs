use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::system::Storage;

pub const CONFIG_NAMESPACE: &str = "ota_cfg";
const CONFIG_KEY: &str = "config";

const MIN_WORKER_STACK: usize = 4096;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OtaConfig {
    // Attempt loop
    pub max_attempts: u8,
    pub attempt_backoff_ms: u64,

    // Transport
    pub download_timeout_ms: u64,
    pub download_headers: Vec<(String, String)>,

    // Progress reporting granularity, in percent
    pub progress_step: u8,

    // Deploy
    pub reboot_grace_secs: u64,

    // Worker thread
    pub worker_stack_size: usize,
}

impl Default for OtaConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            attempt_backoff_ms: 2000,
            download_timeout_ms: 60 * 1000,
            download_headers: Vec::new(),
            progress_step: 10,
            reboot_grace_secs: 5,
            worker_stack_size: 64 * 1024,
        }
    }
}

impl OtaConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            bail!("max_attempts must be at least 1");
        }
        if self.progress_step == 0 || self.progress_step > 100 {
            bail!("progress_step must be within 1..=100");
        }
        if self.worker_stack_size < MIN_WORKER_STACK {
            bail!("worker_stack_size must be at least {} bytes", MIN_WORKER_STACK);
        }
        Ok(())
    }

    /// Delay slept after the failed attempt with index `attempt` (0-based).
    pub fn backoff(&self, attempt: u8) -> Duration {
        Duration::from_millis(self.attempt_backoff_ms.saturating_mul(u64::from(attempt)))
    }

    pub fn download_timeout(&self) -> Duration {
        Duration::from_millis(self.download_timeout_ms)
    }

    pub fn reboot_grace(&self) -> Duration {
        Duration::from_secs(self.reboot_grace_secs)
    }

    pub fn save(&self, storage: &Storage) -> Result<()> {
        storage.write_json(CONFIG_KEY, self)?;
        log::info!("OTA configuration saved");
        Ok(())
    }
}

pub fn load_or_default(storage: &Storage) -> Result<OtaConfig> {
    match storage.read_json::<OtaConfig>(CONFIG_KEY) {
        Ok(Some(config)) => {
            if let Err(e) = config.validate() {
                log::warn!("Stored OTA configuration rejected: {:?}, using defaults", e);
                return Ok(OtaConfig::default());
            }
            log::info!("Loaded OTA configuration from settings");
            Ok(config)
        }
        Ok(None) => {
            log::info!("No OTA configuration stored, using defaults");
            let config = OtaConfig::default();

            // Try to save default config for next time
            if let Err(e) = config.save(storage) {
                log::warn!("Failed to save default OTA configuration: {:?}", e);
            }

            Ok(config)
        }
        Err(e) => {
            log::warn!("Failed to load OTA configuration: {:?}, using defaults", e);
            let config = OtaConfig::default();

            if let Err(save_err) = config.save(storage) {
                log::warn!("Failed to save default OTA configuration: {:?}", save_err);
            }

            Ok(config)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::system::MemorySettings;
    use std::sync::Arc;

    fn storage() -> Storage {
        Storage::new(Arc::new(MemorySettings::new()), CONFIG_NAMESPACE)
    }

    #[test]
    fn defaults_match_device_constants() {
        let config = OtaConfig::default();
        assert_eq!(config.max_attempts, 5);
        assert_eq!(config.attempt_backoff_ms, 2000);
        assert_eq!(config.reboot_grace(), Duration::from_secs(5));
        assert_eq!(config.download_timeout(), Duration::from_secs(60));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn backoff_grows_linearly_from_zero() {
        let config = OtaConfig::default();
        assert_eq!(config.backoff(0), Duration::ZERO);
        assert_eq!(config.backoff(1), Duration::from_millis(2000));
        assert_eq!(config.backoff(4), Duration::from_millis(8000));
    }

    #[test]
    fn missing_config_is_defaulted_and_persisted() {
        let storage = storage();
        let config = load_or_default(&storage).unwrap();
        assert_eq!(config, OtaConfig::default());

        let stored: Option<OtaConfig> = storage.read_json(CONFIG_KEY).unwrap();
        assert_eq!(stored, Some(OtaConfig::default()));
    }

    #[test]
    fn corrupt_config_falls_back_to_defaults() {
        let storage = storage();
        storage.write_raw(CONFIG_KEY, b"{not json").unwrap();
        assert_eq!(load_or_default(&storage).unwrap(), OtaConfig::default());
    }

    #[test]
    fn partial_config_keeps_remaining_defaults() {
        let storage = storage();
        storage
            .write_raw(CONFIG_KEY, br#"{"max_attempts":3,"reboot_grace_secs":0}"#)
            .unwrap();

        let config = load_or_default(&storage).unwrap();
        assert_eq!(config.max_attempts, 3);
        assert_eq!(config.reboot_grace_secs, 0);
        assert_eq!(config.progress_step, 10);
    }

    #[test]
    fn invalid_values_are_rejected() {
        let mut config = OtaConfig::default();
        config.max_attempts = 0;
        assert!(config.validate().is_err());

        let mut config = OtaConfig::default();
        config.progress_step = 101;
        assert!(config.validate().is_err());

        let mut config = OtaConfig::default();
        config.worker_stack_size = 1024;
        assert!(config.validate().is_err());
    }
}
