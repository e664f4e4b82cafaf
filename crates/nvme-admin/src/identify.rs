//! Identify Controller / Identify Namespace data and the host copy.

use crate::command::{Identify, CNS_CONTROLLER, CNS_NAMESPACE};
use crate::status::AdminError;
use crate::{MemoryBus, PAGE_SIZE};

/// Size of every Identify data structure.
pub const IDENTIFY_DATA_SIZE: usize = 4096;

/// Maximum number of LBA formats an Identify Namespace structure can describe.
pub const MAX_LBA_FORMATS: usize = 16;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentifyController {
    pub vid: u16,
    pub ssvid: u16,
    pub serial_number: String,
    pub model_number: String,
    pub firmware_revision: String,
    /// Recommended arbitration burst.
    pub rab: u8,
    pub ieee: [u8; 3],
    /// Maximum data transfer size (power of two, 0 = unlimited).
    pub mdts: u8,
    /// Abort command limit, zero-based.
    pub acl: u8,
    /// Asynchronous event request limit, zero-based.
    pub aerl: u8,
    /// Firmware updates.
    pub frmw: u8,
    /// Log page attributes.
    pub lpa: u8,
    /// Error log page entries, zero-based.
    pub elpe: u8,
    pub sqes: u8,
    pub cqes: u8,
    /// Number of namespaces.
    pub nn: u32,
    /// Volatile write cache present.
    pub vwc: u8,
}

impl Default for IdentifyController {
    fn default() -> Self {
        IdentifyController {
            vid: 0x1d1d,
            ssvid: 0x1d1d,
            serial_number: "NVMEADM0000000000001".to_string(),
            model_number: "Emulated NVMe Controller".to_string(),
            firmware_revision: "0.1".to_string(),
            rab: 0,
            ieee: [0; 3],
            mdts: 0,
            acl: 3,
            aerl: 3,
            frmw: 0x03, // slot 1 read-only, one slot
            lpa: 0,
            elpe: 0,
            sqes: 0x66, // 64-byte entries
            cqes: 0x44, // 16-byte entries
            nn: 0,
            vwc: 0,
        }
    }
}

impl IdentifyController {
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut data = vec![0u8; IDENTIFY_DATA_SIZE];

        data[0..2].copy_from_slice(&self.vid.to_le_bytes());
        data[2..4].copy_from_slice(&self.ssvid.to_le_bytes());
        write_ascii_padded(&mut data[4..24], &self.serial_number);
        write_ascii_padded(&mut data[24..64], &self.model_number);
        write_ascii_padded(&mut data[64..72], &self.firmware_revision);
        data[72] = self.rab;
        data[73..76].copy_from_slice(&self.ieee);
        data[77] = self.mdts;

        // Admin command set attributes.
        data[258] = self.acl;
        data[259] = self.aerl;
        data[260] = self.frmw;
        data[261] = self.lpa;
        data[262] = self.elpe;

        // NVM command set attributes.
        data[512] = self.sqes;
        data[513] = self.cqes;
        data[516..520].copy_from_slice(&self.nn.to_le_bytes());
        data[525] = self.vwc;

        data
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LbaFormat {
    /// Metadata size in bytes.
    pub ms: u16,
    /// LBA data size as a power of two.
    pub lbads: u8,
    /// Relative performance.
    pub rp: u8,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentifyNamespace {
    pub nsze: u64,
    pub ncap: u64,
    pub nuse: u64,
    pub nsfeat: u8,
    /// Formatted LBA size: index into `lba_formats`.
    pub flbas: u8,
    pub lba_formats: Vec<LbaFormat>,
}

impl IdentifyNamespace {
    /// A fully allocated namespace of `blocks` LBAs of `1 << lbads` bytes.
    pub fn with_capacity(blocks: u64, lbads: u8) -> Self {
        IdentifyNamespace {
            nsze: blocks,
            ncap: blocks,
            nuse: blocks,
            nsfeat: 0,
            flbas: 0,
            lba_formats: vec![LbaFormat {
                ms: 0,
                lbads,
                rp: 0,
            }],
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut data = vec![0u8; IDENTIFY_DATA_SIZE];

        data[0..8].copy_from_slice(&self.nsze.to_le_bytes());
        data[8..16].copy_from_slice(&self.ncap.to_le_bytes());
        data[16..24].copy_from_slice(&self.nuse.to_le_bytes());
        data[24] = self.nsfeat;

        let formats = &self.lba_formats[..self.lba_formats.len().min(MAX_LBA_FORMATS)];
        // NLBAF is zero-based.
        data[25] = formats.len().saturating_sub(1) as u8;
        data[26] = self.flbas;

        for (i, format) in formats.iter().enumerate() {
            let off = 128 + i * 4;
            data[off..off + 2].copy_from_slice(&format.ms.to_le_bytes());
            data[off + 2] = format.lbads;
            data[off + 3] = format.rp & 0x3;
        }

        data
    }
}

/// Identify structures served by the controller, populated at controller construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentifyData {
    controller: IdentifyController,
    namespaces: Vec<IdentifyNamespace>,
}

impl IdentifyData {
    /// `controller.nn` is overwritten with the number of namespaces supplied.
    pub fn new(mut controller: IdentifyController, namespaces: Vec<IdentifyNamespace>) -> Self {
        controller.nn = namespaces.len() as u32;
        Self {
            controller,
            namespaces,
        }
    }

    pub fn controller(&self) -> &IdentifyController {
        &self.controller
    }

    pub(crate) fn controller_mut(&mut self) -> &mut IdentifyController {
        &mut self.controller
    }

    pub fn namespace_count(&self) -> u32 {
        self.controller.nn
    }

    /// Looks up a namespace by its 1-based identifier.
    pub fn namespace(&self, nsid: u32) -> Option<&IdentifyNamespace> {
        let idx = usize::try_from(nsid).ok()?.checked_sub(1)?;
        self.namespaces.get(idx)
    }
}

impl Default for IdentifyData {
    fn default() -> Self {
        Self::new(IdentifyController::default(), Vec::new())
    }
}

/// Serves an Identify command.
pub fn identify(
    data: &IdentifyData,
    memory: &mut dyn MemoryBus,
    req: &Identify,
) -> Result<(), AdminError> {
    if req.prp1 == 0 {
        tracing::debug!("identify: PRP1 absent");
        return Err(AdminError::InvalidField);
    }

    let bytes = match req.cns {
        CNS_CONTROLLER => {
            if req.nsid != 0 {
                return Err(AdminError::InvalidNamespace);
            }
            data.controller.to_bytes()
        }
        CNS_NAMESPACE => {
            if req.nsid == 0 || req.nsid > data.namespace_count() {
                tracing::debug!(nsid = req.nsid, "identify: invalid namespace");
                return Err(AdminError::InvalidNamespace);
            }
            data.namespace(req.nsid)
                .ok_or(AdminError::InvalidNamespace)?
                .to_bytes()
        }
        cns => {
            tracing::debug!(cns, "identify: unsupported CNS");
            return Err(AdminError::InvalidField);
        }
    };

    copy_to_host(memory, req.prp1, req.prp2, &bytes)
}

/// Copies `data` to host memory described by a PRP pair.
///
/// PRP1 receives everything up to the next page boundary; anything left over goes to PRP2,
/// which must then be non-zero and the remainder must fit in one page. PRP lists are not
/// supported.
pub(crate) fn copy_to_host(
    memory: &mut dyn MemoryBus,
    prp1: u64,
    prp2: u64,
    data: &[u8],
) -> Result<(), AdminError> {
    if prp1 == 0 {
        return Err(AdminError::InvalidField);
    }
    let first_span = PAGE_SIZE - (prp1 % PAGE_SIZE as u64) as usize;
    let (first, rest) = data.split_at(first_span.min(data.len()));
    if !rest.is_empty() && (prp2 == 0 || rest.len() > PAGE_SIZE) {
        tracing::debug!(prp2, remaining = rest.len(), "transfer needs a second PRP page");
        return Err(AdminError::InvalidField);
    }

    memory.write_physical(prp1, first).map_err(|err| {
        tracing::warn!(%err, prp1, "DMA write to PRP1 failed");
        AdminError::InternalError
    })?;
    if !rest.is_empty() {
        memory.write_physical(prp2, rest).map_err(|err| {
            tracing::warn!(%err, prp2, "DMA write to PRP2 failed");
            AdminError::InternalError
        })?;
    }
    Ok(())
}

fn write_ascii_padded(dst: &mut [u8], s: &str) {
    dst.fill(b' ');
    let bytes = s.as_bytes();
    let len = bytes.len().min(dst.len());
    dst[..len].copy_from_slice(&bytes[..len]);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::TestMem;

    fn data() -> IdentifyData {
        IdentifyData::new(
            IdentifyController::default(),
            vec![
                IdentifyNamespace::with_capacity(1024, 9),
                IdentifyNamespace::with_capacity(2048, 12),
            ],
        )
    }

    fn identify_ns(nsid: u32, prp1: u64, prp2: u64) -> Identify {
        Identify {
            nsid,
            cns: CNS_NAMESPACE,
            prp1,
            prp2,
        }
    }

    #[test]
    fn controller_layout() {
        let bytes = data().controller().to_bytes();
        assert_eq!(bytes.len(), IDENTIFY_DATA_SIZE);
        assert_eq!(u16::from_le_bytes([bytes[0], bytes[1]]), 0x1d1d);
        assert_eq!(&bytes[4..10], b"NVMEAD");
        assert_eq!(bytes[258], 3);
        assert_eq!(bytes[512], 0x66);
        assert_eq!(u32::from_le_bytes(bytes[516..520].try_into().unwrap()), 2);
    }

    #[test]
    fn namespace_layout() {
        let bytes = data().namespace(2).unwrap().to_bytes();
        assert_eq!(u64::from_le_bytes(bytes[0..8].try_into().unwrap()), 2048);
        assert_eq!(bytes[25], 0);
        assert_eq!(bytes[130], 12);
    }

    #[test]
    fn namespace_ids_are_one_based_and_bounded() {
        let data = data();
        let mut mem = TestMem::new(0x10000);
        for nsid in [0, 3, u32::MAX] {
            assert_eq!(
                identify(&data, &mut mem, &identify_ns(nsid, 0x1000, 0)),
                Err(AdminError::InvalidNamespace)
            );
        }
        assert!(mem.buf.iter().all(|b| *b == 0));
    }

    #[test]
    fn page_aligned_destination_takes_one_region() {
        let data = data();
        let mut mem = TestMem::new(0x10000);
        identify(&data, &mut mem, &identify_ns(1, 0x2000, 0)).unwrap();
        let expected = data.namespace(1).unwrap().to_bytes();
        assert_eq!(&mem.buf[0x2000..0x3000], expected.as_slice());
    }

    #[test]
    fn unaligned_destination_splits_across_prp2() {
        let data = data();
        let mut mem = TestMem::new(0x10000);
        let prp1 = 0x2000 + 0xc00;
        let prp2 = 0x8000;
        identify(&data, &mut mem, &identify_ns(2, prp1, prp2)).unwrap();

        let expected = data.namespace(2).unwrap().to_bytes();
        assert_eq!(&mem.buf[0x2c00..0x3000], &expected[..0x400]);
        assert_eq!(&mem.buf[0x8000..0x8c00], &expected[0x400..]);
        // Nothing is written past the first region's page boundary.
        assert!(mem.buf[0x3000..0x4000].iter().all(|b| *b == 0));
        assert!(mem.buf[0x8c00..0x9000].iter().all(|b| *b == 0));
    }

    #[test]
    fn split_without_prp2_is_invalid_field() {
        let data = data();
        let mut mem = TestMem::new(0x10000);
        assert_eq!(
            identify(&data, &mut mem, &identify_ns(1, 0x2010, 0)),
            Err(AdminError::InvalidField)
        );
        assert!(mem.buf.iter().all(|b| *b == 0));
    }

    #[test]
    fn controller_identify_rejects_namespace_and_missing_prp1() {
        let data = data();
        let mut mem = TestMem::new(0x10000);
        let req = Identify {
            nsid: 1,
            cns: CNS_CONTROLLER,
            prp1: 0x1000,
            prp2: 0,
        };
        assert_eq!(
            identify(&data, &mut mem, &req),
            Err(AdminError::InvalidNamespace)
        );
        assert_eq!(
            identify(&data, &mut mem, &Identify { prp1: 0, ..req }),
            Err(AdminError::InvalidField)
        );
        assert_eq!(
            identify(&data, &mut mem, &Identify { cns: 0x10, nsid: 0, ..req }),
            Err(AdminError::InvalidField)
        );
    }

    #[test]
    fn dma_failure_is_internal_error() {
        let data = data();
        let mut mem = TestMem::new(0x1800);
        let req = Identify {
            nsid: 0,
            cns: CNS_CONTROLLER,
            prp1: 0x1000,
            prp2: 0,
        };
        assert_eq!(
            identify(&data, &mut mem, &req),
            Err(AdminError::InternalError)
        );
    }
}
