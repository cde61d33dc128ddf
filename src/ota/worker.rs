// Per-update state machine
//
// Acknowledged -> Downloading (bounded retry) -> Deploying -> Rebooting
// Any failure ends in a single Failure event; cancellation ends silently.

use std::thread;

use crate::error::OtaError;
use crate::ota::bootloader::Bank;
use crate::ota::events::OtaEventPhase;
use crate::ota::pipeline::FlashPipeline;
use crate::ota::request::UpdateRequest;
use crate::ota::state::{request_id, OtaState};
use crate::ota::OtaContext;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerOutcome {
    /// Test-upgrade requested and restart issued.
    Rebooting,
    Canceled,
    Failed(OtaError),
}

// Clears the busy flag if the worker unwinds, so a panic cannot wedge
// admission forever.
struct PanicGuard<'a>(&'a OtaContext);

impl Drop for PanicGuard<'_> {
    fn drop(&mut self) {
        if thread::panicking() {
            log::error!("OTA worker panicked");
            let _ = self.0.store.reset();
            self.0.run_state.finish();
        }
    }
}

pub fn run(ctx: &OtaContext, request: UpdateRequest) -> WorkerOutcome {
    let _guard = PanicGuard(ctx);
    let uuid = request.uuid.as_str();

    ctx.publisher
        .publish(uuid, OtaEventPhase::Acknowledged, 0, None, "");
    log::info!("OTA INIT");

    let outcome = match execute(ctx, &request) {
        // The restart should not return; if it does, the persisted
        // PendingReboot record is left for the next boot to resolve.
        Ok(()) => return WorkerOutcome::Rebooting,
        Err(OtaError::Canceled) => {
            log::info!("OTA canceled");
            WorkerOutcome::Canceled
        }
        Err(err) => {
            log::warn!("OTA FAILED: {}", err);
            ctx.publisher
                .publish(uuid, OtaEventPhase::Failure, 0, Some(&err), "");
            WorkerOutcome::Failed(err)
        }
    };

    if let Err(e) = ctx.store.reset() {
        log::error!("Unable to reset the OTA record: {}", e);
    }
    ctx.run_state.finish();
    outcome
}

fn execute(ctx: &OtaContext, request: &UpdateRequest) -> Result<(), OtaError> {
    ctx.store.init()?;

    log::info!("DOWNLOAD_AND_DEPLOY");
    ctx.store.save_state(OtaState::InProgress)?;

    download(ctx, request)?;
    deploy(ctx, &request.uuid)
}

fn download(ctx: &OtaContext, request: &UpdateRequest) -> Result<(), OtaError> {
    let id = request_id(&request.uuid).ok_or(OtaError::InvalidRequest("malformed request uuid"))?;
    ctx.store.save_request_id(&id).map_err(|e| {
        log::error!("Unable to write OTA req_uuid into settings, OTA canceled");
        e
    })?;

    let mut last_error = OtaError::Internal;
    for attempt in 0..ctx.config.max_attempts {
        if !ctx.run_state.is_running() {
            return Err(OtaError::Canceled);
        }

        ctx.publisher
            .publish(&request.uuid, OtaEventPhase::Downloading, 0, None, "");

        match attempt_download(ctx, request) {
            Ok(()) => return Ok(()),
            Err(err) if !err.is_retryable() => return Err(err),
            Err(err) => {
                thread::sleep(ctx.config.backoff(attempt));
                ctx.publisher
                    .publish(&request.uuid, OtaEventPhase::Error, 0, Some(&err), "");
                log::warn!("! OTA FAILED, ATTEMPT #{} ! {}", attempt, err);
                last_error = err;
            }
        }
    }

    // A cancel during the final backoff still ends quietly
    if !ctx.run_state.is_running() {
        return Err(OtaError::Canceled);
    }
    Err(last_error)
}

// Each attempt starts from a freshly erased bank: the write cursor is
// sequential, so a retry can never append to a partial image.
fn attempt_download(ctx: &OtaContext, request: &UpdateRequest) -> Result<(), OtaError> {
    ctx.bootloader.erase_bank(Bank::Secondary).map_err(|e| {
        log::error!("Failed to erase second slot: {}", e);
        OtaError::EraseSecondSlot
    })?;

    let writer = ctx.bootloader.image_writer(Bank::Secondary).map_err(|e| {
        log::error!("Unable to init flash area: {}", e);
        OtaError::InitFlash
    })?;

    let mut pipeline = FlashPipeline::new(writer, &ctx.run_state, ctx.config.progress_step);
    pipeline.run(
        ctx.downloader.as_ref(),
        &request.download_url,
        &ctx.config.download_headers,
        ctx.config.download_timeout(),
        &mut |percent| {
            ctx.publisher.publish(
                &request.uuid,
                OtaEventPhase::Downloading,
                i32::from(percent),
                None,
                "",
            )
        },
    )
}

fn deploy(ctx: &OtaContext, uuid: &str) -> Result<(), OtaError> {
    ctx.publisher
        .publish(uuid, OtaEventPhase::Deploying, 0, None, "");

    log::info!("OTA PREPARE REBOOT");
    ctx.store.save_state(OtaState::PendingReboot)?;

    let header = ctx.bootloader.read_header(Bank::Secondary).map_err(|e| {
        log::error!("Failed to read secondary bank header: {}", e);
        OtaError::Internal
    })?;
    log::info!(
        "Staged image {} ({} bytes)",
        header.version,
        header.image_size
    );

    ctx.bootloader.request_test_upgrade().map_err(|e| {
        log::error!("Failed to mark the image in the secondary bank as pending: {}", e);
        OtaError::Internal
    })?;

    ctx.publisher
        .publish(uuid, OtaEventPhase::Deployed, 0, None, "");
    ctx.publisher
        .publish(uuid, OtaEventPhase::Rebooting, 0, None, "");

    let grace = ctx.config.reboot_grace();
    log::info!("Device restart in {} seconds", grace.as_secs());
    thread::sleep(grace);
    log::info!("Device restart now");
    ctx.system.reboot();

    Ok(())
}
