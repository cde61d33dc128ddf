use std::fs::File;
use std::io::{ErrorKind, Read};
use std::time::{Duration, Instant};

use crate::error::OtaError;
use crate::ota::download::{ChunkHandler, DownloadChunk, DownloadClient, Transfer};

const FILE_SCHEME: &str = "file://";
const DEFAULT_CHUNK_SIZE: usize = 4096;

/// Serves `file://` URLs chunk by chunk, the way an HTTP client streams a
/// response body.
pub struct FileDownloadClient {
    chunk_size: usize,
}

impl Default for FileDownloadClient {
    fn default() -> Self {
        Self::new(DEFAULT_CHUNK_SIZE)
    }
}

impl FileDownloadClient {
    pub fn new(chunk_size: usize) -> Self {
        Self {
            chunk_size: chunk_size.max(1),
        }
    }
}

#[derive(Default)]
struct FileTransfer {
    aborted: bool,
}

impl Transfer for FileTransfer {
    fn abort(&mut self) {
        self.aborted = true;
    }
}

impl DownloadClient for FileDownloadClient {
    fn download(
        &self,
        url: &str,
        headers: &[(String, String)],
        timeout: Duration,
        on_chunk: &mut ChunkHandler<'_>,
    ) -> Result<(), OtaError> {
        let Some(path) = url.strip_prefix(FILE_SCHEME) else {
            log::error!("Unsupported download url {}", url);
            return Err(OtaError::HttpRequest);
        };
        for (name, _) in headers {
            log::debug!("Ignoring header {} for local download", name);
        }

        let mut file = File::open(path).map_err(|e| {
            log::error!("Unable to open {}: {}", path, e);
            match e.kind() {
                ErrorKind::NotFound | ErrorKind::PermissionDenied => OtaError::HttpRequest,
                _ => OtaError::Network,
            }
        })?;
        let total_size = file
            .metadata()
            .map_err(|_| OtaError::Network)?
            .len() as usize;

        let started = Instant::now();
        let mut transfer = FileTransfer::default();
        let mut buf = vec![0u8; self.chunk_size];
        let mut received = 0usize;

        loop {
            if started.elapsed() > timeout {
                log::error!("Download timed out after {:?}", timeout);
                return Err(OtaError::Network);
            }

            let n = file.read(&mut buf).map_err(|e| {
                log::error!("Read error at {} bytes: {}", received, e);
                OtaError::Network
            })?;
            received += n;
            let last = n == 0 || received >= total_size;

            if n > 0 || received == 0 {
                on_chunk(
                    &mut transfer,
                    DownloadChunk {
                        data: &buf[..n],
                        received,
                        total_size,
                        last,
                    },
                )?;
            }

            if transfer.aborted {
                log::debug!("Download aborted at {} bytes", received);
                return Ok(());
            }
            if last {
                return Ok(());
            }
        }
    }
}
