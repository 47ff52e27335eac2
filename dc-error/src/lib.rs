//! Unified error handling for dcpipe
//!
//! This crate provides the status codes reported by the display core and the
//! single error type used across all dcpipe components.
//! It uses thiserror for ergonomic error definitions with proper Display and Error trait impls.

use std::fmt;
use std::io;

/// Result type alias using DcError
pub type Result<T> = std::result::Result<T, DcError>;

/// Status codes reported to callers of the display core.
///
/// The numeric values are part of the driver interface and must not change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum DcStatus {
    Ok = 1,
    NoControllerResource = 2,
    NoStreamEngResource = 3,
    NoClockSourceResource = 4,
    FailControllerValidate = 5,
    FailEncValidate = 6,
    FailAttachSurfaces = 7,
    NoDpLinkBandwidth = 8,
    ExceedDongleMaxClk = 9,
    SurfacePixelFormatUnsupported = 10,
    /// Bandwidth and watermark validation
    FailBandwidthValidate = 11,
    ErrorUnexpected = -1,
}

impl DcStatus {
    /// Numeric status code
    pub fn code(self) -> i32 {
        self as i32
    }

    pub fn is_ok(self) -> bool {
        self == DcStatus::Ok
    }

    /// Symbolic name as used in driver logs
    pub fn name(self) -> &'static str {
        match self {
            DcStatus::Ok => "DC_OK",
            DcStatus::NoControllerResource => "DC_NO_CONTROLLER_RESOURCE",
            DcStatus::NoStreamEngResource => "DC_NO_STREAM_ENG_RESOURCE",
            DcStatus::NoClockSourceResource => "DC_NO_CLOCK_SOURCE_RESOURCE",
            DcStatus::FailControllerValidate => "DC_FAIL_CONTROLLER_VALIDATE",
            DcStatus::FailEncValidate => "DC_FAIL_ENC_VALIDATE",
            DcStatus::FailAttachSurfaces => "DC_FAIL_ATTACH_SURFACES",
            DcStatus::NoDpLinkBandwidth => "DC_NO_DP_LINK_BANDWIDTH",
            DcStatus::ExceedDongleMaxClk => "DC_EXCEED_DONGLE_MAX_CLK",
            DcStatus::SurfacePixelFormatUnsupported => "DC_SURFACE_PIXEL_FORMAT_UNSUPPORTED",
            DcStatus::FailBandwidthValidate => "DC_FAIL_BANDWIDTH_VALIDATE",
            DcStatus::ErrorUnexpected => "DC_ERROR_UNEXPECTED",
        }
    }
}

impl fmt::Display for DcStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Unified error type for all dcpipe operations
#[derive(thiserror::Error, Debug)]
pub enum DcError {
    // ============================================================================
    // Resource Assignment Errors
    // ============================================================================
    #[error("Resource exhausted: {0}")]
    ResourceExhausted(DcStatus),

    #[error("Validation failed: {0}")]
    ValidationFailed(DcStatus),

    #[error("Dongle clock ceiling exceeded: {required_khz} kHz requested, max {max_khz} kHz")]
    ProtocolLimitExceeded {
        required_khz: u32,
        max_khz: u32,
    },

    #[error("Too many {what}: {requested} (max {max})")]
    BoundExceeded {
        what: &'static str,
        requested: usize,
        max: usize,
    },

    // ============================================================================
    // State Errors
    // ============================================================================
    #[error("Unexpected state: {0}")]
    UnexpectedState(String),

    #[error("Allocation failed: {0}")]
    Allocation(String),

    #[error("Hardware programming failed: {0}")]
    Programming(String),

    #[error("Invalid link index: {0}")]
    InvalidLink(u32),

    // ============================================================================
    // Sink and Sideband Errors
    // ============================================================================
    #[error("EDID too large: {size} bytes (max {max_size} bytes)")]
    EdidTooLarge {
        size: usize,
        max_size: usize,
    },

    #[error("Invalid EDID: {0}")]
    InvalidEdid(String),

    #[error("Sideband transaction failed on link {link_index}: {reason}")]
    Sideband {
        link_index: u32,
        reason: String,
    },

    // ============================================================================
    // Configuration Errors
    // ============================================================================
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration value for {field}: {reason}")]
    InvalidConfig {
        field: String,
        reason: String,
    },

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Failed to parse JSON: {0}")]
    JsonParse(#[from] serde_json::Error),
}

impl DcError {
    /// Create an error for an exhausted resource class
    pub fn resource(status: DcStatus) -> Self {
        Self::ResourceExhausted(status)
    }

    /// Create an error for a resource that cannot meet the requested timing
    pub fn validation(status: DcStatus) -> Self {
        Self::ValidationFailed(status)
    }

    /// Create an unexpected-state error from a string
    pub fn unexpected(msg: impl Into<String>) -> Self {
        Self::UnexpectedState(msg.into())
    }

    /// Create a config error from a string
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create an invalid config error
    pub fn invalid_config(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Status code reported to the driver for this error
    pub fn status(&self) -> DcStatus {
        match self {
            Self::ResourceExhausted(status) | Self::ValidationFailed(status) => *status,
            Self::ProtocolLimitExceeded { .. } => DcStatus::ExceedDongleMaxClk,
            _ => DcStatus::ErrorUnexpected,
        }
    }

    /// Whether the caller may retry with a different configuration.
    ///
    /// Recoverable errors never leave the committed configuration modified.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::ResourceExhausted(_)
                | Self::ValidationFailed(_)
                | Self::ProtocolLimitExceeded { .. }
                | Self::Allocation(_)
        )
    }
}
