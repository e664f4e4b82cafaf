//! Submission/completion entry layouts and typed admin commands.
//!
//! A 64-byte submission entry is first split into its raw dwords ([`NvmeCommand`]) and then
//! decoded into a per-opcode struct that only exposes the fields that command defines.

use bitflags::bitflags;

use crate::status::NvmeStatus;

/// Size of a submission queue entry in bytes.
pub const SQE_SIZE: usize = 64;
/// Size of a completion queue entry in bytes.
pub const CQE_SIZE: usize = 16;

/// Every admin opcode at or above this value is outside the recognized range.
pub const ADMIN_OPCODE_LIMIT: u8 = 0x0d;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum AdminOpcode {
    DeleteIoSq = 0x00,
    CreateIoSq = 0x01,
    GetLogPage = 0x02,
    DeleteIoCq = 0x04,
    CreateIoCq = 0x05,
    Identify = 0x06,
    Abort = 0x08,
    SetFeatures = 0x09,
    GetFeatures = 0x0a,
    AsyncEventRequest = 0x0c,
}

impl AdminOpcode {
    pub const ALL: [AdminOpcode; 10] = [
        AdminOpcode::DeleteIoSq,
        AdminOpcode::CreateIoSq,
        AdminOpcode::GetLogPage,
        AdminOpcode::DeleteIoCq,
        AdminOpcode::CreateIoCq,
        AdminOpcode::Identify,
        AdminOpcode::Abort,
        AdminOpcode::SetFeatures,
        AdminOpcode::GetFeatures,
        AdminOpcode::AsyncEventRequest,
    ];

    pub fn from_raw(opc: u8) -> Option<Self> {
        if opc >= ADMIN_OPCODE_LIMIT {
            return None;
        }
        Self::ALL.into_iter().find(|op| *op as u8 == opc)
    }

    pub fn raw(self) -> u8 {
        self as u8
    }
}

bitflags! {
    /// Queue attribute bits carried in CDW11 of the queue creation commands.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct QueueFlags: u16 {
        /// PC: the queue occupies physically contiguous host memory.
        const PHYS_CONTIG = 1 << 0;
        /// IEN: interrupts are enabled for this completion queue.
        const IRQ_ENABLED = 1 << 1;
    }
}

fn le_u16(bytes: &[u8; SQE_SIZE], off: usize) -> u16 {
    u16::from_le_bytes([bytes[off], bytes[off + 1]])
}

fn le_u32(bytes: &[u8; SQE_SIZE], off: usize) -> u32 {
    u32::from_le_bytes([bytes[off], bytes[off + 1], bytes[off + 2], bytes[off + 3]])
}

fn le_u64(bytes: &[u8; SQE_SIZE], off: usize) -> u64 {
    (le_u32(bytes, off + 4) as u64) << 32 | le_u32(bytes, off) as u64
}

/// Raw view of a submission queue entry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NvmeCommand {
    pub opc: u8,
    pub fuse: u8,
    pub psdt: u8,
    pub cid: u16,
    pub nsid: u32,
    pub mptr: u64,
    pub prp1: u64,
    pub prp2: u64,
    pub cdw10: u32,
    pub cdw11: u32,
    pub cdw12: u32,
    pub cdw13: u32,
    pub cdw14: u32,
    pub cdw15: u32,
}

impl NvmeCommand {
    pub fn parse(bytes: &[u8; SQE_SIZE]) -> NvmeCommand {
        let dw0 = le_u32(bytes, 0);
        NvmeCommand {
            opc: (dw0 & 0xff) as u8,
            fuse: ((dw0 >> 8) & 0x3) as u8,
            psdt: ((dw0 >> 14) & 0x3) as u8,
            cid: le_u16(bytes, 2),
            nsid: le_u32(bytes, 4),
            mptr: le_u64(bytes, 16),
            prp1: le_u64(bytes, 24),
            prp2: le_u64(bytes, 32),
            cdw10: le_u32(bytes, 40),
            cdw11: le_u32(bytes, 44),
            cdw12: le_u32(bytes, 48),
            cdw13: le_u32(bytes, 52),
            cdw14: le_u32(bytes, 56),
            cdw15: le_u32(bytes, 60),
        }
    }

    pub fn to_bytes(&self) -> [u8; SQE_SIZE] {
        let mut out = [0u8; SQE_SIZE];
        let dw0 = self.opc as u32
            | (self.fuse as u32 & 0x3) << 8
            | (self.psdt as u32 & 0x3) << 14
            | (self.cid as u32) << 16;
        out[0..4].copy_from_slice(&dw0.to_le_bytes());
        out[4..8].copy_from_slice(&self.nsid.to_le_bytes());
        out[16..24].copy_from_slice(&self.mptr.to_le_bytes());
        out[24..32].copy_from_slice(&self.prp1.to_le_bytes());
        out[32..40].copy_from_slice(&self.prp2.to_le_bytes());
        out[40..44].copy_from_slice(&self.cdw10.to_le_bytes());
        out[44..48].copy_from_slice(&self.cdw11.to_le_bytes());
        out[48..52].copy_from_slice(&self.cdw12.to_le_bytes());
        out[52..56].copy_from_slice(&self.cdw13.to_le_bytes());
        out[56..60].copy_from_slice(&self.cdw14.to_le_bytes());
        out[60..64].copy_from_slice(&self.cdw15.to_le_bytes());
        out
    }
}

/// Create I/O Submission Queue (opcode 0x01).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CreateIoSq {
    pub nsid: u32,
    pub qid: u16,
    /// Zero-based entry count (QSIZE).
    pub qsize: u16,
    pub flags: QueueFlags,
    pub priority: u8,
    pub cqid: u16,
    pub prp1: u64,
}

impl CreateIoSq {
    pub fn decode(cmd: &NvmeCommand) -> Self {
        CreateIoSq {
            nsid: cmd.nsid,
            qid: (cmd.cdw10 & 0xffff) as u16,
            qsize: (cmd.cdw10 >> 16) as u16,
            flags: QueueFlags::from_bits_truncate((cmd.cdw11 & 0x1) as u16),
            priority: ((cmd.cdw11 >> 1) & 0x3) as u8,
            cqid: (cmd.cdw11 >> 16) as u16,
            prp1: cmd.prp1,
        }
    }
}

/// Create I/O Completion Queue (opcode 0x05).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CreateIoCq {
    pub nsid: u32,
    pub qid: u16,
    /// Zero-based entry count (QSIZE).
    pub qsize: u16,
    pub flags: QueueFlags,
    pub vector: u16,
    pub prp1: u64,
}

impl CreateIoCq {
    pub fn decode(cmd: &NvmeCommand) -> Self {
        CreateIoCq {
            nsid: cmd.nsid,
            qid: (cmd.cdw10 & 0xffff) as u16,
            qsize: (cmd.cdw10 >> 16) as u16,
            flags: QueueFlags::from_bits_truncate((cmd.cdw11 & 0x3) as u16),
            vector: (cmd.cdw11 >> 16) as u16,
            prp1: cmd.prp1,
        }
    }
}

/// Delete I/O Submission Queue (0x00) and Delete I/O Completion Queue (0x04).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeleteIoQueue {
    pub nsid: u32,
    pub qid: u16,
}

impl DeleteIoQueue {
    pub fn decode(cmd: &NvmeCommand) -> Self {
        DeleteIoQueue {
            nsid: cmd.nsid,
            qid: (cmd.cdw10 & 0xffff) as u16,
        }
    }
}

/// Identify CNS values understood by the controller.
pub const CNS_NAMESPACE: u8 = 0x00;
pub const CNS_CONTROLLER: u8 = 0x01;

/// Identify (opcode 0x06).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Identify {
    pub nsid: u32,
    pub cns: u8,
    pub prp1: u64,
    pub prp2: u64,
}

impl Identify {
    pub fn decode(cmd: &NvmeCommand) -> Self {
        Identify {
            nsid: cmd.nsid,
            cns: (cmd.cdw10 & 0xff) as u8,
            prp1: cmd.prp1,
            prp2: cmd.prp2,
        }
    }
}

/// Abort (opcode 0x08).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Abort {
    pub nsid: u32,
    pub sqid: u16,
    /// Command identifier of the command to abort.
    pub target_cid: u16,
}

impl Abort {
    pub fn decode(cmd: &NvmeCommand) -> Self {
        Abort {
            nsid: cmd.nsid,
            sqid: (cmd.cdw10 & 0xffff) as u16,
            target_cid: (cmd.cdw10 >> 16) as u16,
        }
    }
}

/// Set Features (0x09) and Get Features (0x0a).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Features {
    pub nsid: u32,
    pub fid: u8,
    pub value: u32,
}

impl Features {
    pub fn decode(cmd: &NvmeCommand) -> Self {
        Features {
            nsid: cmd.nsid,
            fid: (cmd.cdw10 & 0xff) as u8,
            value: cmd.cdw11,
        }
    }
}

/// Get Log Page (opcode 0x02).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GetLogPage {
    pub nsid: u32,
    pub lid: u8,
    /// Zero-based number of dwords to transfer.
    pub numd: u16,
    pub prp1: u64,
    pub prp2: u64,
}

impl GetLogPage {
    pub fn decode(cmd: &NvmeCommand) -> Self {
        GetLogPage {
            nsid: cmd.nsid,
            lid: (cmd.cdw10 & 0xff) as u8,
            numd: ((cmd.cdw10 >> 16) & 0x0fff) as u16,
            prp1: cmd.prp1,
            prp2: cmd.prp2,
        }
    }

    pub fn transfer_len(&self) -> usize {
        (self.numd as usize + 1) * 4
    }
}

/// Completion queue entry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CqEntry {
    pub dw0: u32,
    pub dw1: u32,
    pub sqhd: u16,
    pub sqid: u16,
    pub cid: u16,
    /// Status field including the phase tag in bit 0.
    pub status: u16,
}

impl CqEntry {
    pub fn to_bytes(self) -> [u8; CQE_SIZE] {
        let mut out = [0u8; CQE_SIZE];
        out[0..4].copy_from_slice(&self.dw0.to_le_bytes());
        out[4..8].copy_from_slice(&self.dw1.to_le_bytes());
        let dw2 = (self.sqid as u32) << 16 | self.sqhd as u32;
        out[8..12].copy_from_slice(&dw2.to_le_bytes());
        let dw3 = (self.status as u32) << 16 | self.cid as u32;
        out[12..16].copy_from_slice(&dw3.to_le_bytes());
        out
    }

    pub fn from_bytes(bytes: &[u8; CQE_SIZE]) -> Self {
        let dw = |i: usize| {
            u32::from_le_bytes([bytes[i], bytes[i + 1], bytes[i + 2], bytes[i + 3]])
        };
        let dw2 = dw(8);
        let dw3 = dw(12);
        CqEntry {
            dw0: dw(0),
            dw1: dw(4),
            sqhd: (dw2 & 0xffff) as u16,
            sqid: (dw2 >> 16) as u16,
            cid: (dw3 & 0xffff) as u16,
            status: (dw3 >> 16) as u16,
        }
    }

    pub fn phase(&self) -> bool {
        self.status & 1 != 0
    }

    pub fn nvme_status(&self) -> NvmeStatus {
        NvmeStatus::decode(self.status)
    }
}
