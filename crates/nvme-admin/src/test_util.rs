use crate::command::{CqEntry, CQE_SIZE};
use crate::{MemoryBus, MemoryError};

/// Flat guest memory starting at physical address 0.
pub(crate) struct TestMem {
    pub(crate) buf: Vec<u8>,
}

impl TestMem {
    pub(crate) fn new(size: usize) -> Self {
        Self { buf: vec![0u8; size] }
    }

    pub(crate) fn write_sqe_cid(&mut self, entry_addr: u64, cid: u16) {
        self.write_u16(entry_addr + 2, cid).unwrap();
    }

    pub(crate) fn read_cqe(&self, addr: u64) -> CqEntry {
        let mut bytes = [0u8; CQE_SIZE];
        self.read_physical(addr, &mut bytes).unwrap();
        CqEntry::from_bytes(&bytes)
    }

    fn range(&self, paddr: u64, len: usize) -> Result<std::ops::Range<usize>, MemoryError> {
        let start = paddr as usize;
        let end = start
            .checked_add(len)
            .ok_or(MemoryError::OutOfBounds { addr: paddr, len })?;
        if end > self.buf.len() {
            return Err(MemoryError::OutOfBounds { addr: paddr, len });
        }
        Ok(start..end)
    }
}

impl MemoryBus for TestMem {
    fn read_physical(&self, paddr: u64, buf: &mut [u8]) -> Result<(), MemoryError> {
        let range = self.range(paddr, buf.len())?;
        buf.copy_from_slice(&self.buf[range]);
        Ok(())
    }

    fn write_physical(&mut self, paddr: u64, buf: &[u8]) -> Result<(), MemoryError> {
        let range = self.range(paddr, buf.len())?;
        self.buf[range].copy_from_slice(buf);
        Ok(())
    }
}
