//! Completion status encoding and the admin command error type.
//!
//! Every failure an admin handler can report is an [`AdminError`]. Errors never escape the
//! controller as Rust errors: the dispatcher folds them into an [`NvmeStatus`] that lands in the
//! status field of the completion queue entry.

use thiserror::Error;

/// Status Code Type: generic command status.
pub const SCT_GENERIC: u8 = 0x0;
/// Status Code Type: command specific status.
pub const SCT_COMMAND_SPECIFIC: u8 = 0x1;

/// Status field of a completion queue entry (without the phase tag).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NvmeStatus {
    pub sct: u8,
    pub sc: u8,
    pub dnr: bool,
}

impl NvmeStatus {
    pub const SUCCESS: NvmeStatus = NvmeStatus {
        sct: SCT_GENERIC,
        sc: 0,
        dnr: false,
    };

    const fn generic(sc: u8, dnr: bool) -> Self {
        NvmeStatus {
            sct: SCT_GENERIC,
            sc,
            dnr,
        }
    }

    const fn command_specific(sc: u8, dnr: bool) -> Self {
        NvmeStatus {
            sct: SCT_COMMAND_SPECIFIC,
            sc,
            dnr,
        }
    }

    pub fn is_success(self) -> bool {
        self.sct == SCT_GENERIC && self.sc == 0
    }

    /// Encodes bits 15:1 of CQE DW3[31:16]; bit 0 (phase) is owned by the completion queue.
    pub fn encode_without_phase(self) -> u16 {
        let mut val: u16 = 0;
        val |= (self.sc as u16) << 1;
        val |= ((self.sct & 0x7) as u16) << 9;
        if self.dnr {
            val |= 1 << 14;
        }
        val
    }

    pub fn decode(status: u16) -> Self {
        NvmeStatus {
            sc: ((status >> 1) & 0xff) as u8,
            sct: ((status >> 9) & 0x7) as u8,
            dnr: status & (1 << 14) != 0,
        }
    }
}

impl Default for NvmeStatus {
    fn default() -> Self {
        Self::SUCCESS
    }
}

/// Reasons an admin command can fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
pub enum AdminError {
    #[error("invalid command opcode")]
    InvalidOpcode,

    #[error("invalid field in command")]
    InvalidField,

    #[error("internal error while transferring command data")]
    InternalError,

    #[error("invalid namespace or format")]
    InvalidNamespace,

    #[error("completion queue invalid")]
    CompletionQueueInvalid,

    #[error("invalid queue identifier")]
    InvalidQueueIdentifier,

    #[error("maximum queue size exceeded")]
    MaxQueueSizeExceeded,

    #[error("abort command limit exceeded")]
    AbortCommandLimitExceeded,

    #[error("requested command to abort not found")]
    AbortNotFound,

    #[error("asynchronous event request limit exceeded")]
    AsyncEventLimitExceeded,

    #[error("invalid interrupt vector")]
    InvalidInterruptVector,

    #[error("invalid log page")]
    InvalidLogPage,
}

impl AdminError {
    pub fn status(self) -> NvmeStatus {
        match self {
            AdminError::InvalidOpcode => NvmeStatus::generic(0x01, true),
            AdminError::InvalidField => NvmeStatus::generic(0x02, true),
            AdminError::InternalError => NvmeStatus::generic(0x06, false),
            AdminError::InvalidNamespace => NvmeStatus::generic(0x0b, true),
            AdminError::CompletionQueueInvalid => NvmeStatus::command_specific(0x00, true),
            AdminError::InvalidQueueIdentifier => NvmeStatus::command_specific(0x01, true),
            AdminError::MaxQueueSizeExceeded => NvmeStatus::command_specific(0x02, true),
            // Both limits free up as outstanding commands complete, so the host may retry.
            AdminError::AbortCommandLimitExceeded => NvmeStatus::command_specific(0x03, false),
            AdminError::AbortNotFound => NvmeStatus::command_specific(0x04, true),
            AdminError::AsyncEventLimitExceeded => NvmeStatus::command_specific(0x05, false),
            AdminError::InvalidInterruptVector => NvmeStatus::command_specific(0x08, true),
            AdminError::InvalidLogPage => NvmeStatus::command_specific(0x09, true),
        }
    }
}

impl From<AdminError> for NvmeStatus {
    fn from(err: AdminError) -> Self {
        err.status()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_encodes_to_zero() {
        assert_eq!(NvmeStatus::SUCCESS.encode_without_phase(), 0);
        assert!(NvmeStatus::SUCCESS.is_success());
    }

    #[test]
    fn command_specific_errors_set_sct_and_dnr() {
        let status = AdminError::InvalidQueueIdentifier.status();
        let raw = status.encode_without_phase();
        assert_eq!(raw & 1, 0, "phase bit must be left for the CQ");
        assert_eq!((raw >> 1) & 0xff, 0x01);
        assert_eq!((raw >> 9) & 0x7, 0x1);
        assert_ne!(raw & (1 << 14), 0);
        assert_eq!(NvmeStatus::decode(raw), status);
    }

    #[test]
    fn limit_errors_are_retryable() {
        assert!(!AdminError::AbortCommandLimitExceeded.status().dnr);
        assert!(!AdminError::AsyncEventLimitExceeded.status().dnr);
        assert!(AdminError::AbortNotFound.status().dnr);
    }

    #[test]
    fn generic_and_command_specific_codes_do_not_collide() {
        // InvalidOpcode and InvalidQueueIdentifier share SC=1 and differ only in SCT.
        let a = AdminError::InvalidOpcode.status();
        let b = AdminError::InvalidQueueIdentifier.status();
        assert_eq!(a.sc, b.sc);
        assert_ne!(a.encode_without_phase(), b.encode_without_phase());
    }
}
