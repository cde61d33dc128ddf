use std::collections::VecDeque;
use std::sync::Mutex;

use crate::ota::events::{OtaEvent, TelemetryChannel};

/// Emits each OTA event as one JSON line on the `telemetry` log target.
/// Recent events are kept for diagnostics.
pub struct LogTelemetry {
    history: Mutex<VecDeque<OtaEvent>>,
    capacity: usize,
}

impl LogTelemetry {
    /// Keep up to `capacity` recent events. Zero disables the history.
    pub fn new(capacity: usize) -> Self {
        Self {
            history: Mutex::new(VecDeque::new()),
            capacity,
        }
    }

    /// Most recent events, oldest first.
    pub fn history(&self) -> Vec<OtaEvent> {
        self.history
            .lock()
            .map(|history| history.iter().cloned().collect())
            .unwrap_or_default()
    }
}

impl Default for LogTelemetry {
    fn default() -> Self {
        Self::new(32)
    }
}

impl TelemetryChannel for LogTelemetry {
    fn publish(&self, interface: &str, path: &str, event: &OtaEvent) -> anyhow::Result<()> {
        let line = serde_json::to_string(event)?;
        log::info!(target: "telemetry", "{}{} {}", interface, path, line);

        if self.capacity == 0 {
            return Ok(());
        }
        let mut history = self
            .history
            .lock()
            .map_err(|_| anyhow::anyhow!("telemetry history lock poisoned"))?;
        while history.len() >= self.capacity {
            history.pop_front();
        }
        history.push_back(event.clone());
        Ok(())
    }
}
