//! Crash-safe OTA update orchestration for dual-bank devices.
//!
//! The [`ota::OtaController`] admits update and cancel requests, runs at most
//! one worker that streams the image into the inactive bank, and resolves the
//! outcome after the restart. Every lifecycle transition is written to the
//! settings store before it takes effect.

pub mod config;
pub mod error;
pub mod host;
pub mod logging;
pub mod ota;
pub mod system;

pub use error::{OtaError, SettingsError, StatusCode};
