// Scripted collaborators for driving the controller end to end.
#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use ota_agent::config::OtaConfig;
use ota_agent::error::OtaError;
use ota_agent::ota::bootloader::ImageVersion;
use ota_agent::ota::download::ChunkHandler;
use ota_agent::ota::state::request_id;
use ota_agent::ota::{
    Bank, Bootloader, Collaborators, DownloadChunk, DownloadClient, FlashError, ImageHeader,
    ImageWriter, OtaController, OtaEvent, OtaState, OtaStateStore, SwapType, SystemControl,
    TelemetryChannel, Transfer,
};
use ota_agent::system::{MemorySettings, SettingsBackend};

pub const UUID: &str = "11111111-2222-3333-4444-555555555555";
pub const OTHER_UUID: &str = "aaaaaaaa-bbbb-cccc-dddd-eeeeeeeeeeee";
pub const URL: &str = "https://example/img.bin";

pub fn test_config() -> OtaConfig {
    OtaConfig {
        attempt_backoff_ms: 0,
        reboot_grace_secs: 0,
        worker_stack_size: 256 * 1024,
        ..OtaConfig::default()
    }
}

// ---------------------------------------------------------------------------
// Telemetry

#[derive(Default)]
pub struct Recorder {
    events: Mutex<Vec<OtaEvent>>,
    gate: Mutex<Option<(String, usize, Gate)>>,
}

impl Recorder {
    /// Hold the publishing thread right after the `nth` event with `status`
    /// is recorded.
    pub fn pause_after(&self, status: &str, nth: usize) -> (Receiver<()>, Sender<()>) {
        let (started_tx, started_rx) = mpsc::channel();
        let (resume_tx, resume_rx) = mpsc::channel();
        *self.gate.lock().unwrap() = Some((
            status.to_string(),
            nth,
            Gate {
                started: started_tx,
                resume: resume_rx,
            },
        ));
        (started_rx, resume_tx)
    }

    pub fn events(&self) -> Vec<OtaEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn statuses(&self) -> Vec<String> {
        self.events().into_iter().map(|e| e.status).collect()
    }

    pub fn count(&self, status: &str) -> usize {
        self.events().iter().filter(|e| e.status == status).count()
    }

    pub fn last(&self) -> Option<OtaEvent> {
        self.events().pop()
    }
}

impl TelemetryChannel for Recorder {
    fn publish(&self, _interface: &str, _path: &str, event: &OtaEvent) -> anyhow::Result<()> {
        let seen = {
            let mut events = self.events.lock().unwrap();
            events.push(event.clone());
            events.iter().filter(|e| e.status == event.status).count()
        };

        let gate = {
            let mut slot = self.gate.lock().unwrap();
            let hit = slot
                .as_ref()
                .is_some_and(|(status, nth, _)| *status == event.status && *nth == seen);
            if hit {
                slot.take()
            } else {
                None
            }
        };
        if let Some((_, _, gate)) = gate {
            gate.started.send(()).unwrap();
            gate.resume.recv().unwrap();
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Bootloader

#[derive(Default)]
pub struct ScriptedBootloader {
    pub image: Arc<Mutex<Vec<u8>>>,
    pub erase_calls: AtomicUsize,
    pub test_upgrades: AtomicUsize,
    pub confirms: AtomicUsize,
    pub fail_erase: AtomicBool,
    pub fail_header: AtomicBool,
    pub fail_test_upgrade: AtomicBool,
    pub fail_confirm: AtomicBool,
    pub swap_pending: AtomicBool,
    pub confirmed: AtomicBool,
}

struct MemWriter {
    image: Arc<Mutex<Vec<u8>>>,
    written: usize,
}

impl ImageWriter for MemWriter {
    fn write(&mut self, data: &[u8], _last: bool) -> Result<(), FlashError> {
        self.image.lock().unwrap().extend_from_slice(data);
        self.written += data.len();
        Ok(())
    }

    fn bytes_written(&self) -> usize {
        self.written
    }
}

impl Bootloader for ScriptedBootloader {
    fn erase_bank(&self, bank: Bank) -> Result<(), FlashError> {
        assert_eq!(bank, Bank::Secondary);
        self.erase_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_erase.load(Ordering::SeqCst) {
            return Err(FlashError(-5));
        }
        self.image.lock().unwrap().clear();
        Ok(())
    }

    fn image_writer(&self, bank: Bank) -> Result<Box<dyn ImageWriter>, FlashError> {
        assert_eq!(bank, Bank::Secondary);
        Ok(Box::new(MemWriter {
            image: self.image.clone(),
            written: 0,
        }))
    }

    fn read_header(&self, _bank: Bank) -> Result<ImageHeader, FlashError> {
        if self.fail_header.load(Ordering::SeqCst) {
            return Err(FlashError(-22));
        }
        Ok(ImageHeader {
            magic: 0x96f3_b83d,
            image_size: self.image.lock().unwrap().len() as u32,
            version: ImageVersion {
                major: 1,
                minor: 2,
                revision: 3,
                build_num: 4,
            },
        })
    }

    fn swap_type(&self) -> SwapType {
        if self.swap_pending.load(Ordering::SeqCst) {
            SwapType::Test
        } else {
            SwapType::None
        }
    }

    fn is_image_confirmed(&self) -> bool {
        self.confirmed.load(Ordering::SeqCst)
    }

    fn confirm_image(&self) -> Result<(), FlashError> {
        self.confirms.fetch_add(1, Ordering::SeqCst);
        if self.fail_confirm.load(Ordering::SeqCst) {
            return Err(FlashError(-5));
        }
        self.confirmed.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn request_test_upgrade(&self) -> Result<(), FlashError> {
        if self.fail_test_upgrade.load(Ordering::SeqCst) {
            return Err(FlashError(-5));
        }
        self.test_upgrades.fetch_add(1, Ordering::SeqCst);
        self.swap_pending.store(true, Ordering::SeqCst);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Download client

/// Scripted outcome of one download attempt.
#[derive(Debug, Clone)]
pub enum Attempt {
    Chunks { sizes: Vec<usize>, total: usize },
    Fail(OtaError),
}

impl Attempt {
    pub fn image(total: usize, chunk: usize) -> Self {
        let mut sizes = vec![chunk; total / chunk];
        if total % chunk != 0 {
            sizes.push(total % chunk);
        }
        Attempt::Chunks { sizes, total }
    }
}

struct Gate {
    started: Sender<()>,
    resume: Receiver<()>,
}

#[derive(Default)]
pub struct ScriptedDownloader {
    script: Mutex<VecDeque<Attempt>>,
    gate: Mutex<Option<Gate>>,
    pub calls: AtomicUsize,
    pub last_url: Mutex<String>,
}

struct NullTransfer {
    aborted: bool,
}

impl Transfer for NullTransfer {
    fn abort(&mut self) {
        self.aborted = true;
    }
}

impl ScriptedDownloader {
    pub fn new(script: Vec<Attempt>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            ..Default::default()
        }
    }

    /// Hold the next attempt after its first chunk. Returns a receiver that
    /// fires once the worker is parked and a sender that releases it.
    pub fn pause_after_first_chunk(&self) -> (Receiver<()>, Sender<()>) {
        let (started_tx, started_rx) = mpsc::channel();
        let (resume_tx, resume_rx) = mpsc::channel();
        *self.gate.lock().unwrap() = Some(Gate {
            started: started_tx,
            resume: resume_rx,
        });
        (started_rx, resume_tx)
    }
}

impl DownloadClient for ScriptedDownloader {
    fn download(
        &self,
        url: &str,
        _headers: &[(String, String)],
        _timeout: Duration,
        on_chunk: &mut ChunkHandler<'_>,
    ) -> Result<(), OtaError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_url.lock().unwrap() = url.to_string();

        let attempt = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Attempt::Fail(OtaError::Network));

        let (sizes, total) = match attempt {
            Attempt::Fail(err) => return Err(err),
            Attempt::Chunks { sizes, total } => (sizes, total),
        };

        let gate = self.gate.lock().unwrap().take();
        let mut transfer = NullTransfer { aborted: false };
        let mut received = 0;
        let count = sizes.len();

        for (idx, size) in sizes.into_iter().enumerate() {
            received += size;
            let data = vec![0xA5; size];
            on_chunk(
                &mut transfer,
                DownloadChunk {
                    data: &data,
                    received,
                    total_size: total,
                    last: idx + 1 == count,
                },
            )?;
            if transfer.aborted {
                return Ok(());
            }

            if idx == 0 {
                if let Some(gate) = &gate {
                    gate.started.send(()).unwrap();
                    gate.resume.recv().unwrap();
                }
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Settings and system control

/// In-memory settings with injectable faults.
#[derive(Default)]
pub struct ScriptedSettings {
    inner: MemorySettings,
    pub fail_init: AtomicBool,
    pub fail_load: AtomicBool,
    /// Fail writes of this state byte.
    pub fail_state: Mutex<Option<u8>>,
}

impl SettingsBackend for ScriptedSettings {
    fn init(&self) -> anyhow::Result<()> {
        if self.fail_init.load(Ordering::SeqCst) {
            anyhow::bail!("flash not mounted");
        }
        self.inner.init()
    }

    fn save(&self, namespace: &str, key: &str, value: &[u8]) -> anyhow::Result<()> {
        let fail_state = *self.fail_state.lock().unwrap();
        if key == "state" && fail_state.is_some() && value.first().copied() == fail_state {
            anyhow::bail!("write failed");
        }
        self.inner.save(namespace, key, value)
    }

    fn load(&self, namespace: &str, key: &str) -> anyhow::Result<Option<Vec<u8>>> {
        if self.fail_load.load(Ordering::SeqCst) {
            anyhow::bail!("read failed");
        }
        self.inner.load(namespace, key)
    }

    fn delete(&self, namespace: &str, key: &str) -> anyhow::Result<()> {
        self.inner.delete(namespace, key)
    }
}

#[derive(Default)]
pub struct RebootCounter {
    pub reboots: AtomicUsize,
}

impl SystemControl for RebootCounter {
    fn reboot(&self) {
        self.reboots.fetch_add(1, Ordering::SeqCst);
    }
}

// ---------------------------------------------------------------------------
// Harness

pub struct Harness {
    pub controller: OtaController,
    pub telemetry: Arc<Recorder>,
    pub bootloader: Arc<ScriptedBootloader>,
    pub downloader: Arc<ScriptedDownloader>,
    pub settings: Arc<ScriptedSettings>,
    pub system: Arc<RebootCounter>,
}

impl Harness {
    pub fn new(script: Vec<Attempt>) -> Self {
        Self::with_settings(Arc::new(ScriptedSettings::default()), script)
    }

    pub fn with_settings(settings: Arc<ScriptedSettings>, script: Vec<Attempt>) -> Self {
        Self::with_config(test_config(), settings, script)
    }

    pub fn with_config(
        config: OtaConfig,
        settings: Arc<ScriptedSettings>,
        script: Vec<Attempt>,
    ) -> Self {
        let telemetry = Arc::new(Recorder::default());
        let bootloader = Arc::new(ScriptedBootloader::default());
        let downloader = Arc::new(ScriptedDownloader::new(script));
        let system = Arc::new(RebootCounter::default());

        let controller = OtaController::new(
            config,
            Collaborators {
                settings: settings.clone(),
                bootloader: bootloader.clone(),
                downloader: downloader.clone(),
                telemetry: telemetry.clone(),
                system: system.clone(),
            },
        );

        Self {
            controller,
            telemetry,
            bootloader,
            downloader,
            settings,
            system,
        }
    }

    pub fn store(&self) -> OtaStateStore {
        OtaStateStore::new(self.settings.clone())
    }

    /// Leave the record as a worker does right before restarting.
    pub fn seed_record(&self, state: OtaState, uuid: &str) {
        let store = self.store();
        store.save_state(state).unwrap();
        store.save_request_id(&request_id(uuid).unwrap()).unwrap();
    }
}
