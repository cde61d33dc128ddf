// File-backed dual-bank bootloader
//
// Each bank is a file in the state directory. The swap trailer (test request
// and confirmation flag) lives in the settings store under `boot/swap`.
// `boot()` plays the part of the bootloader at power-on.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use crate::ota::bootloader::{
    Bank, Bootloader, FlashError, ImageHeader, ImageVersion, ImageWriter, SwapType,
};
use crate::system::{FileSettings, Storage};

pub const IMAGE_MAGIC: u32 = 0x96f3_b83d;
pub const IMAGE_HEADER_SIZE: usize = 32;

const BOOT_NAMESPACE: &str = "boot";
const SWAP_KEY: &str = "swap";

const EIO: i32 = 5;
const EINVAL: i32 = 22;

fn flash_error(e: &std::io::Error) -> FlashError {
    FlashError(-e.raw_os_error().unwrap_or(EIO))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
struct SwapTrailer {
    /// Secondary bank should be booted on trial at the next restart.
    test_pending: bool,
    /// Running image was marked permanent.
    confirmed: bool,
}

impl Default for SwapTrailer {
    fn default() -> Self {
        Self {
            test_pending: false,
            confirmed: true,
        }
    }
}

/// What the simulated bootloader did at power-on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootAction {
    /// Booted the primary bank unchanged.
    Normal,
    /// Swapped in the secondary bank for a trial boot.
    TestSwap,
    /// Trial image was never confirmed; restored the previous image.
    Revert,
    /// Test requested but the secondary bank holds no valid image.
    Rejected,
}

pub struct FileBootloader {
    dir: PathBuf,
    trailer: Storage,
    lock: Mutex<()>,
}

impl FileBootloader {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        let trailer = Storage::new(Arc::new(FileSettings::new(dir.clone())), BOOT_NAMESPACE);
        Self {
            dir,
            trailer,
            lock: Mutex::new(()),
        }
    }

    pub fn bank_path(&self, bank: Bank) -> PathBuf {
        match bank {
            Bank::Primary => self.dir.join("primary.bin"),
            Bank::Secondary => self.dir.join("secondary.bin"),
        }
    }

    fn load_trailer(&self) -> SwapTrailer {
        match self.trailer.read_json::<SwapTrailer>(SWAP_KEY) {
            Ok(Some(trailer)) => trailer,
            Ok(None) => SwapTrailer::default(),
            Err(e) => {
                log::warn!("Corrupt swap trailer, assuming confirmed image: {:?}", e);
                SwapTrailer::default()
            }
        }
    }

    fn store_trailer(&self, trailer: &SwapTrailer) -> Result<(), FlashError> {
        self.trailer.write_json(SWAP_KEY, trailer).map_err(|e| {
            log::error!("Unable to write swap trailer: {:?}", e);
            FlashError(-EIO)
        })
    }

    /// Run the bootloader decision for a fresh power-on.
    pub fn boot(&self) -> Result<BootAction> {
        let _guard = self
            .lock
            .lock()
            .map_err(|_| anyhow::anyhow!("bootloader lock poisoned"))?;
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("creating bank dir {}", self.dir.display()))?;

        let trailer = self.load_trailer();
        let action = if trailer.test_pending {
            if read_header_from(&self.bank_path(Bank::Secondary)).is_ok() {
                self.swap_banks()?;
                BootAction::TestSwap
            } else {
                BootAction::Rejected
            }
        } else if !trailer.confirmed {
            self.swap_banks()?;
            BootAction::Revert
        } else {
            BootAction::Normal
        };

        let next = match action {
            BootAction::TestSwap => SwapTrailer {
                test_pending: false,
                confirmed: false,
            },
            _ => SwapTrailer::default(),
        };
        self.store_trailer(&next)
            .map_err(|e| anyhow::anyhow!("{}", e))?;

        log::info!("Boot: {:?}", action);
        Ok(action)
    }

    fn swap_banks(&self) -> Result<()> {
        let primary = self.bank_path(Bank::Primary);
        let secondary = self.bank_path(Bank::Secondary);
        let scratch = self.dir.join("scratch.bin");

        if !primary.exists() {
            File::create(&primary)?;
        }
        fs::rename(&primary, &scratch)?;
        fs::rename(&secondary, &primary)?;
        fs::rename(&scratch, &secondary)?;
        Ok(())
    }
}

impl Bootloader for FileBootloader {
    fn erase_bank(&self, bank: Bank) -> Result<(), FlashError> {
        fs::create_dir_all(&self.dir).map_err(|e| flash_error(&e))?;
        File::create(self.bank_path(bank))
            .and_then(|file| file.sync_all())
            .map_err(|e| flash_error(&e))
    }

    fn image_writer(&self, bank: Bank) -> Result<Box<dyn ImageWriter>, FlashError> {
        let file = OpenOptions::new()
            .append(true)
            .open(self.bank_path(bank))
            .map_err(|e| flash_error(&e))?;
        Ok(Box::new(FileImageWriter {
            out: BufWriter::new(file),
            written: 0,
        }))
    }

    fn read_header(&self, bank: Bank) -> Result<ImageHeader, FlashError> {
        read_header_from(&self.bank_path(bank))
    }

    fn swap_type(&self) -> SwapType {
        if self.load_trailer().test_pending {
            SwapType::Test
        } else {
            SwapType::None
        }
    }

    fn is_image_confirmed(&self) -> bool {
        self.load_trailer().confirmed
    }

    fn confirm_image(&self) -> Result<(), FlashError> {
        let _guard = self.lock.lock().map_err(|_| FlashError(-EIO))?;
        let mut trailer = self.load_trailer();
        trailer.confirmed = true;
        self.store_trailer(&trailer)
    }

    fn request_test_upgrade(&self) -> Result<(), FlashError> {
        let _guard = self.lock.lock().map_err(|_| FlashError(-EIO))?;
        let mut trailer = self.load_trailer();
        trailer.test_pending = true;
        self.store_trailer(&trailer)
    }
}

struct FileImageWriter {
    out: BufWriter<File>,
    written: usize,
}

impl ImageWriter for FileImageWriter {
    fn write(&mut self, data: &[u8], last: bool) -> Result<(), FlashError> {
        self.out.write_all(data).map_err(|e| flash_error(&e))?;
        self.written += data.len();
        if last {
            self.out.flush().map_err(|e| flash_error(&e))?;
            self.out.get_ref().sync_all().map_err(|e| flash_error(&e))?;
        }
        Ok(())
    }

    fn bytes_written(&self) -> usize {
        self.written
    }
}

fn read_header_from(path: &Path) -> Result<ImageHeader, FlashError> {
    let mut raw = [0u8; IMAGE_HEADER_SIZE];
    let mut file = File::open(path).map_err(|e| flash_error(&e))?;
    file.read_exact(&mut raw).map_err(|e| match e.kind() {
        ErrorKind::UnexpectedEof => FlashError(-EINVAL),
        _ => flash_error(&e),
    })?;
    parse_header(&raw)
}

/// Decode the fixed 32-byte little-endian image header.
///
/// | off | size | field          |
/// |-----|------|----------------|
/// | 0   | 4    | magic          |
/// | 4   | 4    | load address   |
/// | 8   | 2    | header size    |
/// | 10  | 2    | protected TLVs |
/// | 12  | 4    | image size     |
/// | 16  | 4    | flags          |
/// | 20  | 8    | version        |
/// | 28  | 4    | padding        |
pub fn parse_header(raw: &[u8; IMAGE_HEADER_SIZE]) -> Result<ImageHeader, FlashError> {
    let u32_at = |off: usize| u32::from_le_bytes([raw[off], raw[off + 1], raw[off + 2], raw[off + 3]]);

    let magic = u32_at(0);
    if magic != IMAGE_MAGIC {
        return Err(FlashError(-EINVAL));
    }

    Ok(ImageHeader {
        magic,
        image_size: u32_at(12),
        version: ImageVersion {
            major: raw[20],
            minor: raw[21],
            revision: u16::from_le_bytes([raw[22], raw[23]]),
            build_num: u32_at(24),
        },
    })
}

/// Build a header for `image_size` payload bytes. Used by tooling and tests
/// to stage images.
pub fn encode_header(image_size: u32, version: ImageVersion) -> [u8; IMAGE_HEADER_SIZE] {
    let mut raw = [0u8; IMAGE_HEADER_SIZE];
    raw[0..4].copy_from_slice(&IMAGE_MAGIC.to_le_bytes());
    raw[8..10].copy_from_slice(&(IMAGE_HEADER_SIZE as u16).to_le_bytes());
    raw[12..16].copy_from_slice(&image_size.to_le_bytes());
    raw[20] = version.major;
    raw[21] = version.minor;
    raw[22..24].copy_from_slice(&version.revision.to_le_bytes());
    raw[24..28].copy_from_slice(&version.build_num.to_le_bytes());
    raw
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn version() -> ImageVersion {
        ImageVersion {
            major: 2,
            minor: 1,
            revision: 7,
            build_num: 42,
        }
    }

    fn stage_image(boot: &FileBootloader, payload: &[u8]) {
        boot.erase_bank(Bank::Secondary).unwrap();
        let mut writer = boot.image_writer(Bank::Secondary).unwrap();
        writer
            .write(&encode_header(payload.len() as u32, version()), false)
            .unwrap();
        writer.write(payload, true).unwrap();
        assert_eq!(writer.bytes_written(), IMAGE_HEADER_SIZE + payload.len());
    }

    #[test]
    fn header_roundtrip_and_bad_magic() {
        let raw = encode_header(1234, version());
        let header = parse_header(&raw).unwrap();
        assert_eq!(header.image_size, 1234);
        assert_eq!(header.version, version());

        let mut bad = raw;
        bad[0] ^= 0xFF;
        assert_eq!(parse_header(&bad), Err(FlashError(-EINVAL)));
    }

    #[test]
    fn erase_then_write_replaces_bank_contents() {
        let dir = TempDir::new().unwrap();
        let boot = FileBootloader::new(dir.path());

        stage_image(&boot, &[1; 64]);
        stage_image(&boot, &[2; 16]);

        let data = fs::read(boot.bank_path(Bank::Secondary)).unwrap();
        assert_eq!(data.len(), IMAGE_HEADER_SIZE + 16);
        assert_eq!(boot.read_header(Bank::Secondary).unwrap().image_size, 16);
    }

    #[test]
    fn short_bank_has_no_header() {
        let dir = TempDir::new().unwrap();
        let boot = FileBootloader::new(dir.path());
        boot.erase_bank(Bank::Secondary).unwrap();
        assert_eq!(boot.read_header(Bank::Secondary), Err(FlashError(-EINVAL)));
    }

    #[test]
    fn test_upgrade_swaps_then_confirm_sticks() {
        let dir = TempDir::new().unwrap();
        let boot = FileBootloader::new(dir.path());
        fs::write(boot.bank_path(Bank::Primary), b"old image").unwrap();
        stage_image(&boot, b"new image");

        boot.request_test_upgrade().unwrap();
        assert_eq!(boot.swap_type(), SwapType::Test);

        assert_eq!(boot.boot().unwrap(), BootAction::TestSwap);
        assert_eq!(boot.swap_type(), SwapType::None);
        assert!(!boot.is_image_confirmed());
        assert_eq!(boot.read_header(Bank::Primary).unwrap().version, version());

        boot.confirm_image().unwrap();
        assert_eq!(boot.boot().unwrap(), BootAction::Normal);
        assert!(boot.is_image_confirmed());
    }

    #[test]
    fn unconfirmed_trial_is_reverted() {
        let dir = TempDir::new().unwrap();
        let boot = FileBootloader::new(dir.path());
        fs::write(boot.bank_path(Bank::Primary), b"old image").unwrap();
        stage_image(&boot, b"new image");

        boot.request_test_upgrade().unwrap();
        assert_eq!(boot.boot().unwrap(), BootAction::TestSwap);
        assert_eq!(boot.boot().unwrap(), BootAction::Revert);

        assert_eq!(
            fs::read(boot.bank_path(Bank::Primary)).unwrap(),
            b"old image"
        );
        assert!(boot.is_image_confirmed());
    }

    #[test]
    fn invalid_secondary_is_not_booted() {
        let dir = TempDir::new().unwrap();
        let boot = FileBootloader::new(dir.path());
        boot.erase_bank(Bank::Secondary).unwrap();

        boot.request_test_upgrade().unwrap();
        assert_eq!(boot.boot().unwrap(), BootAction::Rejected);
        assert!(boot.is_image_confirmed());
        assert_eq!(boot.swap_type(), SwapType::None);
    }
}
