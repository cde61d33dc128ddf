// Download-to-flash pipeline
//
// Streams one download attempt straight into the inactive bank, checking for
// cancellation at every chunk boundary and debouncing progress reports to
// whole steps.

use std::time::Duration;

use crate::error::OtaError;
use crate::ota::bootloader::ImageWriter;
use crate::ota::download::{DownloadChunk, DownloadClient, Transfer};
use crate::ota::run_state::OtaRunState;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DownloadProgress {
    pub bytes_written: usize,
    pub total_size: usize,
    pub last_reported_percent: u8,
}

impl DownloadProgress {
    /// Percentage rounded down to `step`, returned only when it moves past the
    /// last reported value. Never goes backwards, even if the announced total
    /// changes mid-stream.
    pub fn advance(&mut self, step: u8) -> Option<u8> {
        if self.total_size == 0 {
            return None;
        }
        let percent = (self.bytes_written as u64 * 100 / self.total_size as u64).min(100) as u8;
        let rounded = percent - (percent % step.max(1));

        if rounded > self.last_reported_percent {
            self.last_reported_percent = rounded;
            Some(rounded)
        } else {
            None
        }
    }
}

pub struct FlashPipeline<'a> {
    writer: Box<dyn ImageWriter>,
    run_state: &'a OtaRunState,
    progress: DownloadProgress,
    step: u8,
}

impl<'a> FlashPipeline<'a> {
    pub fn new(writer: Box<dyn ImageWriter>, run_state: &'a OtaRunState, step: u8) -> Self {
        Self {
            writer,
            run_state,
            progress: DownloadProgress::default(),
            step,
        }
    }

    pub fn progress(&self) -> DownloadProgress {
        self.progress
    }

    /// Run one attempt. `report` receives each debounced progress value.
    pub fn run(
        &mut self,
        client: &dyn DownloadClient,
        url: &str,
        headers: &[(String, String)],
        timeout: Duration,
        report: &mut dyn FnMut(u8),
    ) -> Result<(), OtaError> {
        let result = client.download(url, headers, timeout, &mut |transfer, chunk| {
            if let Some(percent) = self.handle_chunk(transfer, chunk)? {
                report(percent);
            }
            Ok(())
        });

        if !self.run_state.is_running() {
            log::debug!("OTA canceled");
            return Err(OtaError::Canceled);
        }
        result?;

        self.finish()
    }

    pub fn handle_chunk(
        &mut self,
        transfer: &mut dyn Transfer,
        chunk: DownloadChunk<'_>,
    ) -> Result<Option<u8>, OtaError> {
        if !self.run_state.is_running() {
            transfer.abort();
            return Err(OtaError::Canceled);
        }

        if let Err(e) = self.writer.write(chunk.data, chunk.last) {
            log::error!("Flash write error: {}", e);
            transfer.abort();
            return Err(OtaError::WriteFlash);
        }

        self.progress.bytes_written = self.writer.bytes_written();
        self.progress.total_size = chunk.total_size;

        let reported = self.progress.advance(self.step);
        if let Some(percent) = reported {
            log::debug!(
                "Downloading {}% chunk {} written {} size {}",
                percent,
                chunk.data.len(),
                self.progress.bytes_written,
                self.progress.total_size
            );
        }
        Ok(reported)
    }

    /// Validate a stream that completed without faults.
    pub fn finish(&self) -> Result<(), OtaError> {
        let DownloadProgress {
            bytes_written,
            total_size,
            ..
        } = self.progress;
        if bytes_written == 0 || bytes_written != total_size {
            log::error!(
                "Download incomplete: written {} of {} bytes",
                bytes_written,
                total_size
            );
            return Err(OtaError::Network);
        }
        Ok(())
    }
}
