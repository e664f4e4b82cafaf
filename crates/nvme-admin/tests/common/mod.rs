#![allow(dead_code)]

use nvme_admin::command::{NvmeCommand, SQE_SIZE};
use nvme_admin::config::ControllerConfig;
use nvme_admin::identify::{IdentifyController, IdentifyData, IdentifyNamespace};
use nvme_admin::{AdminCompletion, AdminController, AdminOpcode, MemoryBus, MemoryError};

pub const ASQ: u64 = 0x10000;
pub const ACQ: u64 = 0x20000;
pub const ADMIN_ENTRIES: u16 = 16;
pub const MEM_SIZE: usize = 0x100000;

pub struct TestMem {
    pub buf: Vec<u8>,
}

impl TestMem {
    pub fn new(size: usize) -> Self {
        Self { buf: vec![0u8; size] }
    }
}

impl MemoryBus for TestMem {
    fn read_physical(&self, paddr: u64, buf: &mut [u8]) -> Result<(), MemoryError> {
        let start = paddr as usize;
        let end = start.checked_add(buf.len()).ok_or(MemoryError::OutOfBounds {
            addr: paddr,
            len: buf.len(),
        })?;
        if end > self.buf.len() {
            return Err(MemoryError::OutOfBounds {
                addr: paddr,
                len: buf.len(),
            });
        }
        buf.copy_from_slice(&self.buf[start..end]);
        Ok(())
    }

    fn write_physical(&mut self, paddr: u64, buf: &[u8]) -> Result<(), MemoryError> {
        let start = paddr as usize;
        let end = start.checked_add(buf.len()).ok_or(MemoryError::OutOfBounds {
            addr: paddr,
            len: buf.len(),
        })?;
        if end > self.buf.len() {
            return Err(MemoryError::OutOfBounds {
                addr: paddr,
                len: buf.len(),
            });
        }
        self.buf[start..end].copy_from_slice(buf);
        Ok(())
    }
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init();
}

pub fn namespaces(count: usize) -> Vec<IdentifyNamespace> {
    (0..count)
        .map(|i| IdentifyNamespace::with_capacity(1024 * (i as u64 + 1), 9))
        .collect()
}

pub fn make_controller(config: ControllerConfig) -> AdminController {
    let identify = IdentifyData::new(IdentifyController::default(), namespaces(2));
    let mut ctrl = AdminController::new(config, identify).unwrap();
    ctrl.provision_admin_queues(ASQ, ADMIN_ENTRIES, ACQ, ADMIN_ENTRIES)
        .unwrap();
    ctrl
}

pub fn small_controller() -> AdminController {
    make_controller(ControllerConfig {
        max_queues: 8,
        ..ControllerConfig::default()
    })
}

pub fn execute(
    ctrl: &mut AdminController,
    mem: &mut TestMem,
    cmd: NvmeCommand,
) -> AdminCompletion {
    ctrl.process_admin_command(cmd.opc, &cmd.to_bytes(), mem)
}

/// Writes `cmds` at the admin SQ tail and rings the doorbell.
pub fn submit_admin(ctrl: &mut AdminController, mem: &mut TestMem, cmds: &[NvmeCommand]) {
    let sq = ctrl.queues().sq(0).unwrap().clone();
    let mut tail = sq.tail;
    for cmd in cmds {
        mem.write_physical(sq.base + tail as u64 * SQE_SIZE as u64, &cmd.to_bytes())
            .unwrap();
        tail = (tail + 1) % sq.size;
    }
    assert!(ctrl.ring_sq_tail(0, tail));
}

pub fn create_cq(cid: u16, qid: u16, qsize: u16, vector: u16, base: u64) -> NvmeCommand {
    NvmeCommand {
        opc: AdminOpcode::CreateIoCq.raw(),
        cid,
        prp1: base,
        cdw10: (qsize as u32) << 16 | qid as u32,
        cdw11: (vector as u32) << 16 | 0x3,
        ..NvmeCommand::default()
    }
}

pub fn create_sq(cid: u16, qid: u16, qsize: u16, cqid: u16, base: u64) -> NvmeCommand {
    NvmeCommand {
        opc: AdminOpcode::CreateIoSq.raw(),
        cid,
        prp1: base,
        cdw10: (qsize as u32) << 16 | qid as u32,
        cdw11: (cqid as u32) << 16 | 0x1,
        ..NvmeCommand::default()
    }
}

pub fn delete_sq(cid: u16, qid: u16) -> NvmeCommand {
    NvmeCommand {
        opc: AdminOpcode::DeleteIoSq.raw(),
        cid,
        cdw10: qid as u32,
        ..NvmeCommand::default()
    }
}

pub fn delete_cq(cid: u16, qid: u16) -> NvmeCommand {
    NvmeCommand {
        opc: AdminOpcode::DeleteIoCq.raw(),
        cid,
        cdw10: qid as u32,
        ..NvmeCommand::default()
    }
}

pub fn identify(cid: u16, nsid: u32, cns: u8, prp1: u64, prp2: u64) -> NvmeCommand {
    NvmeCommand {
        opc: AdminOpcode::Identify.raw(),
        cid,
        nsid,
        prp1,
        prp2,
        cdw10: cns as u32,
        ..NvmeCommand::default()
    }
}

pub fn abort(cid: u16, sqid: u16, target_cid: u16) -> NvmeCommand {
    NvmeCommand {
        opc: AdminOpcode::Abort.raw(),
        cid,
        cdw10: (target_cid as u32) << 16 | sqid as u32,
        ..NvmeCommand::default()
    }
}

pub fn set_features(cid: u16, fid: u8, value: u32) -> NvmeCommand {
    NvmeCommand {
        opc: AdminOpcode::SetFeatures.raw(),
        cid,
        cdw10: fid as u32,
        cdw11: value,
        ..NvmeCommand::default()
    }
}

pub fn get_features(cid: u16, fid: u8) -> NvmeCommand {
    NvmeCommand {
        opc: AdminOpcode::GetFeatures.raw(),
        cid,
        cdw10: fid as u32,
        ..NvmeCommand::default()
    }
}

/// Places fake I/O commands with the given CIDs at the tail of an I/O SQ.
pub fn queue_io_commands(ctrl: &mut AdminController, mem: &mut TestMem, sqid: u16, cids: &[u16]) {
    let sq = ctrl.queues().sq(sqid).unwrap().clone();
    let mut tail = sq.tail;
    for cid in cids {
        let cmd = NvmeCommand {
            opc: 0x02,
            cid: *cid,
            nsid: 1,
            ..NvmeCommand::default()
        };
        mem.write_physical(sq.base + tail as u64 * SQE_SIZE as u64, &cmd.to_bytes())
            .unwrap();
        tail = (tail + 1) % sq.size;
    }
    assert!(ctrl.ring_sq_tail(sqid, tail));
}
