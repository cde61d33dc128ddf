pub mod storage;

pub use storage::{FileSettings, MemorySettings, SettingsBackend, Storage};
