// corebridge — Error Types
//
// `ErrorCode` is the taxonomy carried in every reply record. `IpmError` is
// what Rust code returns; each variant collapses onto one wire code.

use thiserror::Error;

use crate::ipm::message::ChannelId;

/// Error code carried by reply records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ErrorCode {
    #[default]
    None,
    InvalidParameter,
    NotSupported,
    OperationFailed,
}

impl ErrorCode {
    pub fn is_error(self) -> bool {
        self != ErrorCode::None
    }
}

/// Failure reported by a device capability (ADC, I2C, LCD, IMU).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DriverError {
    #[error("device returned error code {0}")]
    Code(i32),
    #[error("device is busy")]
    Busy,
    #[error("bus transaction failed")]
    Bus,
    #[error("operation not supported by device")]
    Unsupported,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IpmError {
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
    #[error("unsupported {channel:?} operation {operation}")]
    NotSupported { channel: ChannelId, operation: u32 },
    #[error("no handler registered for channel {0:?}")]
    ChannelNotRegistered(ChannelId),
    #[error("{0}")]
    OperationFailed(String),
    #[error("device {0} is not bound")]
    DeviceUnbound(&'static str),
    #[error("driver failure: {0}")]
    Driver(#[from] DriverError),
    #[error("gave up after {attempts} attempts")]
    RetryExhausted { attempts: u32 },
    #[error("inbound queue is full")]
    QueueFull,
    #[error("no reply within {ticks} ticks")]
    Timeout { ticks: u32 },
    #[error("remote replied with {code:?}")]
    Remote { code: ErrorCode },
    #[error("mailbox peer is gone")]
    MailboxClosed,
}

impl IpmError {
    /// Wire code reported to the peer for this failure.
    pub fn code(&self) -> ErrorCode {
        match self {
            IpmError::InvalidParameter(_) => ErrorCode::InvalidParameter,
            IpmError::NotSupported { .. } | IpmError::ChannelNotRegistered(_) => {
                ErrorCode::NotSupported
            }
            IpmError::Remote { code } => *code,
            IpmError::OperationFailed(_)
            | IpmError::DeviceUnbound(_)
            | IpmError::Driver(_)
            | IpmError::RetryExhausted { .. }
            | IpmError::QueueFull
            | IpmError::Timeout { .. }
            | IpmError::MailboxClosed => ErrorCode::OperationFailed,
        }
    }
}

pub type Result<T> = core::result::Result<T, IpmError>;
