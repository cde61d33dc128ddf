// Host-side collaborators: file-backed banks, local downloads, log-based
// telemetry and process restart. Used by the agent binary and for bench
// testing the update flow without hardware.

pub mod bootloader;
pub mod download;
pub mod system;
pub mod telemetry;

pub use bootloader::{BootAction, FileBootloader};
pub use download::FileDownloadClient;
pub use system::ProcessControl;
pub use telemetry::LogTelemetry;
