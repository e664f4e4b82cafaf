//! Get Log Page.
//!
//! The controller keeps no error history and has no media, so the pages are synthesized: the
//! error log is all zeroes, SMART reports a healthy device at a fixed temperature and the
//! firmware slot page advertises the Identify firmware revision in slot 1.

use crate::command::GetLogPage;
use crate::identify::{copy_to_host, IdentifyController};
use crate::status::AdminError;
use crate::{MemoryBus, PAGE_SIZE};

/// Size of one Error Information log entry.
const ERROR_LOG_ENTRY_SIZE: usize = 64;
const SMART_LOG_SIZE: usize = 512;
const FIRMWARE_SLOT_LOG_SIZE: usize = 512;

/// Composite temperature reported in the SMART log, in kelvin.
const SMART_TEMPERATURE_KELVIN: u16 = 310;
const SMART_AVAILABLE_SPARE: u8 = 100;
const SMART_AVAILABLE_SPARE_THRESHOLD: u8 = 10;

/// Namespace identifier meaning "all namespaces".
const NSID_BROADCAST: u32 = 0xffff_ffff;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum LogPageId {
    ErrorInformation = 0x01,
    SmartHealth = 0x02,
    FirmwareSlot = 0x03,
}

impl LogPageId {
    pub fn from_raw(lid: u8) -> Option<Self> {
        match lid {
            0x01 => Some(LogPageId::ErrorInformation),
            0x02 => Some(LogPageId::SmartHealth),
            0x03 => Some(LogPageId::FirmwareSlot),
            _ => None,
        }
    }
}

/// Builds the full contents of a log page.
pub fn build_page(id: LogPageId, controller: &IdentifyController) -> Vec<u8> {
    match id {
        LogPageId::ErrorInformation => {
            vec![0u8; ERROR_LOG_ENTRY_SIZE * (controller.elpe as usize + 1)]
        }
        LogPageId::SmartHealth => {
            let mut page = vec![0u8; SMART_LOG_SIZE];
            page[1..3].copy_from_slice(&SMART_TEMPERATURE_KELVIN.to_le_bytes());
            page[3] = SMART_AVAILABLE_SPARE;
            page[4] = SMART_AVAILABLE_SPARE_THRESHOLD;
            page
        }
        LogPageId::FirmwareSlot => {
            let mut page = vec![0u8; FIRMWARE_SLOT_LOG_SIZE];
            // AFI: running from slot 1.
            page[0] = 1;
            let frs1 = &mut page[8..16];
            frs1.fill(b' ');
            let rev = controller.firmware_revision.as_bytes();
            let len = rev.len().min(frs1.len());
            frs1[..len].copy_from_slice(&rev[..len]);
            page
        }
    }
}

pub fn get_log_page(
    controller: &IdentifyController,
    memory: &mut dyn MemoryBus,
    req: &GetLogPage,
) -> Result<(), AdminError> {
    let id = LogPageId::from_raw(req.lid).ok_or_else(|| {
        tracing::debug!(lid = req.lid, "get log page: unsupported log page");
        AdminError::InvalidLogPage
    })?;
    if req.nsid != 0 && req.nsid != NSID_BROADCAST {
        return Err(AdminError::InvalidNamespace);
    }
    if req.prp1 == 0 {
        return Err(AdminError::InvalidField);
    }

    let mut page = build_page(id, controller);
    // At most one page is returned; reads past the end of the log return zeroes.
    page.resize(req.transfer_len().min(PAGE_SIZE), 0);
    copy_to_host(memory, req.prp1, req.prp2, &page)
}
