// Boot-time recovery
//
// Runs once at startup, before any worker exists. Resolves a persisted
// PendingReboot into Success or Failure, then always returns the record to
// Idle so a second run is a silent no-op.

use crate::error::OtaError;
use crate::ota::bootloader::SwapType;
use crate::ota::events::OtaEventPhase;
use crate::ota::state::{OtaState, PersistedOtaRecord, RequestId};
use crate::ota::OtaContext;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecoveryOutcome {
    /// Nothing to resolve (or the record could not be read).
    NoPendingUpdate,
    /// Running image marked permanent.
    Confirmed(RequestId),
    Failed(RequestId, OtaError),
}

pub fn run(ctx: &OtaContext) -> RecoveryOutcome {
    let outcome = match ctx.store.load() {
        Ok(record) => resolve(ctx, record),
        Err(e) => {
            log::error!("Unable to load the pending OTA record: {}", e);
            RecoveryOutcome::NoPendingUpdate
        }
    };

    if let Err(e) = ctx.store.reset() {
        log::error!("Unable to reset the OTA record: {}", e);
    }
    outcome
}

fn resolve(ctx: &OtaContext, record: PersistedOtaRecord) -> RecoveryOutcome {
    let Some(uuid) = record.uuid else {
        log::info!("No OTA update request UUID found");
        return RecoveryOutcome::NoPendingUpdate;
    };
    log::info!("Found pending OTA request {} in state {:?}", uuid, record.state);

    let fail = |err: OtaError| {
        ctx.publisher
            .publish(&uuid, OtaEventPhase::Failure, 0, Some(&err), "");
        RecoveryOutcome::Failed(uuid.clone(), err)
    };

    if record.state != OtaState::PendingReboot {
        log::error!("OTA interrupted before the reboot, state {:?}", record.state);
        return fail(OtaError::Internal);
    }

    let swap = ctx.bootloader.swap_type();
    if swap != SwapType::None {
        log::error!("Unable to swap the image, swap type: {}", swap.as_str());
        return fail(OtaError::SwapFail);
    }

    if ctx.bootloader.is_image_confirmed() {
        log::error!("Running image already confirmed, the new image was not booted");
        return fail(OtaError::SwapFail);
    }

    if let Err(e) = ctx.bootloader.confirm_image() {
        log::error!("Unable to mark the running image as OK: {}", e);
        return fail(OtaError::Internal);
    }

    log::info!("Marked image as OK");
    ctx.publisher
        .publish(&uuid, OtaEventPhase::Success, 0, None, "");
    RecoveryOutcome::Confirmed(uuid)
}
