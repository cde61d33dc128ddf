// Download client collaborator interface

use std::time::Duration;

use crate::error::OtaError;

/// One unit of streamed image data.
#[derive(Debug, Clone, Copy)]
pub struct DownloadChunk<'a> {
    pub data: &'a [u8],
    /// Bytes received so far, this chunk included.
    pub received: usize,
    /// Total size announced by the server; may be refined mid-stream.
    pub total_size: usize,
    pub last: bool,
}

/// Handle on the transfer in flight.
pub trait Transfer {
    /// Stop the transfer. No further chunks are delivered after the current
    /// callback returns.
    fn abort(&mut self);
}

pub type ChunkHandler<'h> =
    dyn FnMut(&mut dyn Transfer, DownloadChunk<'_>) -> Result<(), OtaError> + 'h;

pub trait DownloadClient: Send + Sync {
    /// Fetch `url`, delivering the body to `on_chunk` in order.
    ///
    /// If the handler returns an error the transfer stops and that error is
    /// returned. A transfer aborted by the handler without an error returns
    /// `Ok(())`.
    fn download(
        &self,
        url: &str,
        headers: &[(String, String)],
        timeout: Duration,
        on_chunk: &mut ChunkHandler<'_>,
    ) -> Result<(), OtaError>;
}
