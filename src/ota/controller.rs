// OTA controller
//
// Front door for update and cancel requests. Enforces single flight and owns
// the worker thread handle.

use std::sync::mpsc::Receiver;
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};

use crate::config::OtaConfig;
use crate::error::OtaError;
use crate::ota::events::{OtaEventPhase, OtaNotification};
use crate::ota::recovery::{self, RecoveryOutcome};
use crate::ota::request::{OtaCommand, OtaOperation, UpdateRequest};
use crate::ota::worker::{self, WorkerOutcome};
use crate::ota::{Collaborators, OtaContext};

const WORKER_THREAD_NAME: &str = "ota-worker";
const CANCEL_NOT_RUNNING_MSG: &str = "Unable to cancel OTA update request, no OTA update running.";

pub struct OtaController {
    ctx: Arc<OtaContext>,
    worker: Mutex<Option<JoinHandle<WorkerOutcome>>>,
}

impl OtaController {
    pub fn new(config: OtaConfig, collaborators: Collaborators) -> Self {
        Self {
            ctx: Arc::new(OtaContext::new(config, collaborators)),
            worker: Mutex::new(None),
        }
    }

    /// Resolve an update left pending by the previous boot. Call once at
    /// startup, before accepting requests.
    pub fn recover(&self) -> Result<RecoveryOutcome, OtaError> {
        if self.ctx.run_state.is_busy() {
            log::warn!("Recovery skipped, an OTA update is already running");
            return Err(OtaError::AlreadyInProgress);
        }
        Ok(recovery::run(&self.ctx))
    }

    pub fn submit_update(&self, request: &UpdateRequest) -> Result<(), OtaError> {
        if let Err(e) = request.validate() {
            log::error!("Rejected OTA request: {}", e);
            return Err(e);
        }

        if !self.ctx.run_state.try_start() {
            log::warn!("OTA update already in progress, rejecting {}", request.uuid);
            let err = OtaError::AlreadyInProgress;
            self.ctx
                .publisher
                .publish(&request.uuid, OtaEventPhase::Failure, 0, Some(&err), "");
            return Err(err);
        }

        let owned = match request.try_duplicate() {
            Ok(owned) => owned,
            Err(e) => {
                log::error!("Out of memory copying the OTA request");
                self.ctx.run_state.finish();
                return Err(e);
            }
        };

        // Held from spawn until the handle is stored, so handles land in
        // admission order.
        let mut slot = self.lock_worker_slot();
        if let Some(previous) = slot.take() {
            // Already released the run state, only returning.
            let _ = previous.join();
        }

        let ctx = self.ctx.clone();
        let spawned = thread::Builder::new()
            .name(WORKER_THREAD_NAME.to_string())
            .stack_size(self.ctx.config.worker_stack_size)
            .spawn(move || worker::run(&ctx, owned));

        match spawned {
            Ok(handle) => {
                *slot = Some(handle);
                log::info!("OTA worker started for {}", request.uuid);
                Ok(())
            }
            Err(e) => {
                log::error!("Unable to create OTA worker thread: {}", e);
                self.ctx.publisher.publish(
                    &request.uuid,
                    OtaEventPhase::Failure,
                    0,
                    Some(&OtaError::Internal),
                    "",
                );
                self.ctx.run_state.finish();
                Err(OtaError::ThreadCreate)
            }
        }
    }

    /// Ask the running worker to stop. It notices at the next chunk boundary
    /// or before the next attempt, cleans up and exits without a Failure.
    pub fn cancel_update(&self, uuid: &str) -> Result<(), OtaError> {
        if !self.ctx.run_state.request_cancel() {
            log::warn!("{}", CANCEL_NOT_RUNNING_MSG);
            let err = OtaError::InvalidRequest("no OTA update running");
            self.ctx.publisher.publish(
                uuid,
                OtaEventPhase::Failure,
                0,
                Some(&err),
                CANCEL_NOT_RUNNING_MSG,
            );
            return Err(err);
        }
        log::info!("OTA cancel requested for {}", uuid);
        Ok(())
    }

    /// Dispatch an inbound management command.
    pub fn handle_command(&self, command: &OtaCommand) -> Result<(), OtaError> {
        let (Some(uuid), Some(operation)) = (command.uuid.as_deref(), command.operation.as_deref())
        else {
            log::error!("Unable to extract data from the OTA request");
            return Err(OtaError::InvalidRequest("unable to extract data from request"));
        };

        match OtaOperation::parse(operation) {
            Some(OtaOperation::Update) => {
                let url = command.url.as_deref().unwrap_or_default();
                self.submit_update(&UpdateRequest::new(uuid, url))
            }
            Some(OtaOperation::Cancel) => self.cancel_update(uuid),
            None => {
                log::error!("Unknown OTA operation {:?}", operation);
                let err = OtaError::InvalidRequest("unknown operation");
                self.ctx
                    .publisher
                    .publish(uuid, OtaEventPhase::Failure, 0, Some(&err), "");
                Err(err)
            }
        }
    }

    pub fn handle_command_json(&self, payload: &[u8]) -> Result<(), OtaError> {
        let command: OtaCommand = serde_json::from_slice(payload).map_err(|e| {
            log::error!("Malformed OTA request: {}", e);
            OtaError::InvalidRequest("malformed request")
        })?;
        self.handle_command(&command)
    }

    pub fn subscribe(&self) -> Receiver<OtaNotification> {
        self.ctx.publisher.subscribe()
    }

    pub fn is_busy(&self) -> bool {
        self.ctx.run_state.is_busy()
    }

    /// Block until the current worker (if any) exits.
    pub fn wait_idle(&self) -> Option<WorkerOutcome> {
        let handle = self.lock_worker_slot().take()?;

        match handle.join() {
            Ok(outcome) => Some(outcome),
            Err(_) => {
                log::error!("OTA worker thread panicked");
                None
            }
        }
    }

    fn lock_worker_slot(&self) -> MutexGuard<'_, Option<JoinHandle<WorkerOutcome>>> {
        self.worker.lock().unwrap_or_else(|poisoned| {
            log::error!("OTA worker handle lock poisoned");
            poisoned.into_inner()
        })
    }
}
