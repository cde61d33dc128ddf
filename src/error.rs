use std::fmt;

/// Failures of the durable settings layer. All of them surface as `IOError`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettingsError {
    Init,
    Save,
    Load,
    Delete,
}

impl fmt::Display for SettingsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let op = match self {
            SettingsError::Init => "init",
            SettingsError::Save => "save",
            SettingsError::Load => "load",
            SettingsError::Delete => "delete",
        };
        write!(f, "settings {} failed", op)
    }
}

impl std::error::Error for SettingsError {}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OtaError {
    InvalidRequest(&'static str),
    AlreadyInProgress,
    OutOfMemory,
    ThreadCreate,
    EraseSecondSlot,
    InitFlash,
    WriteFlash,
    Network,
    HttpRequest,
    SwapFail,
    Canceled,
    Internal,
    Settings(SettingsError),
}

impl OtaError {
    /// Outward status code reported in OTA events.
    pub fn status_code(&self) -> StatusCode {
        match self {
            OtaError::InvalidRequest(_) => StatusCode::InvalidRequest,
            OtaError::AlreadyInProgress => StatusCode::UpdateAlreadyInProgress,
            OtaError::Network => StatusCode::ErrorNetwork,
            OtaError::Settings(_) => StatusCode::IoError,
            OtaError::Canceled => StatusCode::Canceled,
            OtaError::OutOfMemory
            | OtaError::ThreadCreate
            | OtaError::EraseSecondSlot
            | OtaError::InitFlash
            | OtaError::WriteFlash
            | OtaError::SwapFail
            | OtaError::HttpRequest
            | OtaError::Internal => StatusCode::InternalError,
        }
    }

    /// Transport and flash-write faults are worth another download attempt.
    /// Everything else aborts the update.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            OtaError::WriteFlash | OtaError::Network | OtaError::HttpRequest
        )
    }
}

impl fmt::Display for OtaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OtaError::InvalidRequest(reason) => write!(f, "invalid OTA request: {}", reason),
            OtaError::AlreadyInProgress => write!(f, "an OTA update is already in progress"),
            OtaError::OutOfMemory => write!(f, "out of memory"),
            OtaError::ThreadCreate => write!(f, "unable to create the OTA worker thread"),
            OtaError::EraseSecondSlot => write!(f, "failed to erase the inactive bank"),
            OtaError::InitFlash => write!(f, "unable to init the flash write context"),
            OtaError::WriteFlash => write!(f, "flash write error"),
            OtaError::Network => write!(f, "network error"),
            OtaError::HttpRequest => write!(f, "http request error"),
            OtaError::SwapFail => write!(f, "bank swap failed"),
            OtaError::Canceled => write!(f, "OTA update canceled"),
            OtaError::Internal => write!(f, "OTA internal error"),
            OtaError::Settings(err) => write!(f, "{}", err),
        }
    }
}

impl std::error::Error for OtaError {}

impl From<SettingsError> for OtaError {
    fn from(err: SettingsError) -> Self {
        OtaError::Settings(err)
    }
}

/// Outward vocabulary for the `statusCode` field of an OTA event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum StatusCode {
    None = 0,
    InvalidRequest,
    UpdateAlreadyInProgress,
    ErrorNetwork,
    IoError,
    InvalidBaseImage,
    SystemRollback,
    Canceled,
    InternalError,
}

const STATUS_CODE_TABLE: [&str; 9] = [
    "",
    "InvalidRequest",
    "UpdateAlreadyInProgress",
    "ErrorNetwork",
    "IOError",
    "InvalidBaseImage",
    "SystemRollback",
    "Canceled",
    "InternalError",
];

impl StatusCode {
    pub const ALL: [StatusCode; 9] = [
        StatusCode::None,
        StatusCode::InvalidRequest,
        StatusCode::UpdateAlreadyInProgress,
        StatusCode::ErrorNetwork,
        StatusCode::IoError,
        StatusCode::InvalidBaseImage,
        StatusCode::SystemRollback,
        StatusCode::Canceled,
        StatusCode::InternalError,
    ];

    pub fn as_str(self) -> &'static str {
        STATUS_CODE_TABLE[self as usize]
    }
}
