// Bootloader / flash collaborator interface
//
// Physical erase, write and bank swap live behind these traits. The OTA core
// only ever targets the inactive (secondary) bank.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bank {
    Primary,
    Secondary,
}

/// Result of the last swap as reported by the bootloader.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwapType {
    /// No swap pending: the running image is whatever was booted.
    None,
    Test,
    Perm,
    Revert,
    Fail,
    Unknown,
}

impl SwapType {
    pub fn as_str(self) -> &'static str {
        match self {
            SwapType::None => "none",
            SwapType::Test => "test",
            SwapType::Perm => "perm",
            SwapType::Revert => "revert",
            SwapType::Fail => "fail",
            SwapType::Unknown => "unknown",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ImageVersion {
    pub major: u8,
    pub minor: u8,
    pub revision: u16,
    pub build_num: u32,
}

impl fmt::Display for ImageVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{}.{}+{}",
            self.major, self.minor, self.revision, self.build_num
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageHeader {
    pub magic: u32,
    pub image_size: u32,
    pub version: ImageVersion,
}

/// Error code reported by a bootloader or flash driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlashError(pub i32);

impl fmt::Display for FlashError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "flash error {}", self.0)
    }
}

impl std::error::Error for FlashError {}

/// Sequential writer into a freshly erased bank.
pub trait ImageWriter: Send {
    /// Append `data`. `last` flushes any buffered tail.
    fn write(&mut self, data: &[u8], last: bool) -> Result<(), FlashError>;
    fn bytes_written(&self) -> usize;
}

pub trait Bootloader: Send + Sync {
    fn erase_bank(&self, bank: Bank) -> Result<(), FlashError>;
    /// Open a write cursor at the start of `bank`.
    fn image_writer(&self, bank: Bank) -> Result<Box<dyn ImageWriter>, FlashError>;
    fn read_header(&self, bank: Bank) -> Result<ImageHeader, FlashError>;
    fn swap_type(&self) -> SwapType;
    fn is_image_confirmed(&self) -> bool;
    /// Mark the running image permanent.
    fn confirm_image(&self) -> Result<(), FlashError>;
    /// Boot the secondary bank once on trial at the next restart.
    fn request_test_upgrade(&self) -> Result<(), FlashError>;
}

/// Platform control used once the new image is staged.
pub trait SystemControl: Send + Sync {
    /// Warm restart. Real platforms do not return; test doubles may.
    fn reboot(&self);
}
