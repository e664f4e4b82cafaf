//! Best-effort command cancellation.
//!
//! An accepted Abort only *marks* the target command: its CID is recorded in a free abort slot
//! of the target SQ. The I/O completion path checks the mark through
//! [`AbortRegistry::retire`] when the command finishes. The target may complete or vanish between
//! the Abort submission and the scan; that is reported as "not found", never as an internal error.

use crate::command::{Abort, SQE_SIZE};
use crate::queues::{QueueRegistry, SubmissionQueue};
use crate::status::AdminError;
use crate::MemoryBus;

/// Byte offset of the command identifier inside a submission queue entry.
const SQE_CID_OFFSET: u64 = 2;

#[derive(Debug, Clone)]
pub struct AbortRegistry {
    limit: usize,
    in_flight: usize,
}

impl AbortRegistry {
    pub fn new(limit: u8) -> Self {
        Self {
            limit: limit as usize,
            in_flight: 0,
        }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Number of abort slots currently occupied across all SQs.
    pub fn in_flight(&self) -> usize {
        self.in_flight
    }

    pub fn request_abort(
        &mut self,
        queues: &mut QueueRegistry,
        memory: &dyn MemoryBus,
        req: &Abort,
    ) -> Result<(), AdminError> {
        if req.nsid != 0 {
            return Err(AdminError::InvalidNamespace);
        }
        if req.sqid as usize >= queues.capacity() {
            return Err(AdminError::InvalidField);
        }
        if req.sqid == 0 {
            tracing::debug!("abort of admin queue commands is not supported");
            return Err(AdminError::AbortNotFound);
        }
        let sq = queues.sq_mut(req.sqid).ok_or(AdminError::AbortNotFound)?;
        if self.in_flight >= self.limit {
            return Err(AdminError::AbortCommandLimitExceeded);
        }
        let slot = sq
            .abort_slots
            .iter()
            .position(Option::is_none)
            .ok_or(AdminError::AbortCommandLimitExceeded)?;

        if !scan_for_cid(sq, memory, req.target_cid) {
            tracing::debug!(
                sqid = req.sqid,
                cid = req.target_cid,
                "command to abort not found"
            );
            return Err(AdminError::AbortNotFound);
        }

        sq.abort_slots[slot] = Some(req.target_cid);
        self.in_flight += 1;
        tracing::debug!(
            sqid = req.sqid,
            cid = req.target_cid,
            in_flight = self.in_flight,
            "command marked for abort"
        );
        Ok(())
    }

    /// Clears the abort mark of `cid` on `sqid`, if any.
    ///
    /// Returns `true` if the command had been marked, i.e. the caller should complete it with an
    /// "aborted" status instead of executing it.
    pub fn retire(&mut self, queues: &mut QueueRegistry, sqid: u16, cid: u16) -> bool {
        let Some(sq) = queues.sq_mut(sqid) else {
            return false;
        };
        let Some(slot) = sq.abort_slots.iter_mut().find(|slot| **slot == Some(cid)) else {
            return false;
        };
        *slot = None;
        self.in_flight = self.in_flight.saturating_sub(1);
        true
    }

    /// Returns the marks held by a queue that is being deleted to the global pool.
    pub fn release_queue(&mut self, sq: &SubmissionQueue) {
        let marked = sq.pending_aborts().count();
        if marked > 0 {
            tracing::debug!(sqid = sq.id.get(), marked, "dropping abort marks of deleted SQ");
        }
        self.in_flight = self.in_flight.saturating_sub(marked);
    }
}

/// Walks the SQ entries from head to tail looking for `cid`.
fn scan_for_cid(sq: &SubmissionQueue, memory: &dyn MemoryBus, cid: u16) -> bool {
    if sq.size == 0 {
        return false;
    }
    let mut idx = sq.head % sq.size;
    // Bounded by the queue size in case head/tail were never in range.
    for _ in 0..sq.size {
        if idx == sq.tail {
            break;
        }
        let addr = sq
            .base
            .wrapping_add(idx as u64 * SQE_SIZE as u64 + SQE_CID_OFFSET);
        match memory.read_u16(addr) {
            Ok(entry_cid) if entry_cid == cid => return true,
            Ok(_) => {}
            Err(err) => {
                tracing::warn!(sqid = sq.id.get(), %err, "abort scan could not read SQ entry");
                return false;
            }
        }
        idx += 1;
        if idx == sq.size {
            idx = 0;
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::{CreateIoCq, CreateIoSq, DeleteIoQueue, QueueFlags};
    use crate::config::ControllerConfig;
    use crate::test_util::TestMem;

    const SQ_BASE: u64 = 0x10000;

    fn setup(limit: u8) -> (QueueRegistry, AbortRegistry, TestMem) {
        let config = ControllerConfig {
            max_queues: 4,
            abort_command_limit: limit,
            ..ControllerConfig::default()
        };
        let mut queues = QueueRegistry::new(&config);
        queues.provision_admin(0x1000, 4, 0x2000, 4).unwrap();
        queues
            .create_cq(&CreateIoCq {
                nsid: 0,
                qid: 1,
                qsize: 7,
                flags: QueueFlags::PHYS_CONTIG,
                vector: 0,
                prp1: 0x3000,
            })
            .unwrap();
        for (qid, base) in [(1, SQ_BASE), (2, SQ_BASE + 0x1000)] {
            queues
                .create_sq(&CreateIoSq {
                    nsid: 0,
                    qid,
                    qsize: 7,
                    flags: QueueFlags::PHYS_CONTIG,
                    priority: 0,
                    cqid: 1,
                    prp1: base,
                })
                .unwrap();
        }
        (queues, AbortRegistry::new(limit), TestMem::new(0x20000))
    }

    fn submit(queues: &mut QueueRegistry, mem: &mut TestMem, sqid: u16, cids: &[u16]) {
        let sq = queues.sq(sqid).unwrap().clone();
        let mut tail = sq.tail;
        for cid in cids {
            mem.write_sqe_cid(sq.base + tail as u64 * SQE_SIZE as u64, *cid);
            tail = (tail + 1) % sq.size;
        }
        assert!(queues.set_sq_tail(sqid, tail));
    }

    fn abort(sqid: u16, target_cid: u16) -> Abort {
        Abort {
            nsid: 0,
            sqid,
            target_cid,
        }
    }

    #[test]
    fn marks_queued_command() {
        let (mut queues, mut aborts, mut mem) = setup(4);
        submit(&mut queues, &mut mem, 1, &[10, 11, 12]);

        aborts.request_abort(&mut queues, &mem, &abort(1, 11)).unwrap();
        assert_eq!(aborts.in_flight(), 1);
        assert_eq!(
            queues.sq(1).unwrap().pending_aborts().collect::<Vec<_>>(),
            vec![11]
        );
    }

    #[test]
    fn scan_wraps_around_the_end_of_the_queue() {
        let (mut queues, mut aborts, mut mem) = setup(4);
        assert!(queues.set_sq_head(1, 6));
        assert!(queues.set_sq_tail(1, 6));
        submit(&mut queues, &mut mem, 1, &[1, 2, 3]);
        assert_eq!(queues.sq(1).unwrap().tail, 1);

        aborts.request_abort(&mut queues, &mem, &abort(1, 3)).unwrap();
    }

    #[test]
    fn consumed_entries_are_not_found() {
        let (mut queues, mut aborts, mut mem) = setup(4);
        submit(&mut queues, &mut mem, 1, &[10, 11]);
        assert!(queues.set_sq_head(1, 1));

        assert_eq!(
            aborts.request_abort(&mut queues, &mem, &abort(1, 10)),
            Err(AdminError::AbortNotFound)
        );
        assert_eq!(aborts.in_flight(), 0);
    }

    #[test]
    fn admin_queue_and_missing_queues() {
        let (mut queues, mut aborts, mem) = setup(4);
        assert_eq!(
            aborts.request_abort(&mut queues, &mem, &abort(0, 0)),
            Err(AdminError::AbortNotFound)
        );
        assert_eq!(
            aborts.request_abort(&mut queues, &mem, &abort(3, 0)),
            Err(AdminError::AbortNotFound)
        );
        assert_eq!(
            aborts.request_abort(&mut queues, &mem, &abort(4, 0)),
            Err(AdminError::InvalidField)
        );
        assert_eq!(
            aborts.request_abort(
                &mut queues,
                &mem,
                &Abort {
                    nsid: 1,
                    ..abort(1, 0)
                }
            ),
            Err(AdminError::InvalidNamespace)
        );
    }

    #[test]
    fn global_limit_is_shared_between_queues() {
        let (mut queues, mut aborts, mut mem) = setup(2);
        submit(&mut queues, &mut mem, 1, &[1, 2]);
        submit(&mut queues, &mut mem, 2, &[3]);

        aborts.request_abort(&mut queues, &mem, &abort(1, 1)).unwrap();
        aborts.request_abort(&mut queues, &mem, &abort(2, 3)).unwrap();
        assert_eq!(
            aborts.request_abort(&mut queues, &mem, &abort(1, 2)),
            Err(AdminError::AbortCommandLimitExceeded)
        );
        assert_eq!(aborts.in_flight(), 2);
        assert_eq!(queues.sq(1).unwrap().pending_aborts().collect::<Vec<_>>(), vec![1]);
        assert_eq!(queues.sq(2).unwrap().pending_aborts().collect::<Vec<_>>(), vec![3]);

        assert!(aborts.retire(&mut queues, 2, 3));
        assert!(!aborts.retire(&mut queues, 2, 3));
        aborts.request_abort(&mut queues, &mem, &abort(1, 2)).unwrap();
        assert_eq!(aborts.in_flight(), 2);
    }

    #[test]
    fn deleting_queue_releases_its_marks() {
        let (mut queues, mut aborts, mut mem) = setup(4);
        submit(&mut queues, &mut mem, 2, &[5, 6]);
        aborts.request_abort(&mut queues, &mem, &abort(2, 5)).unwrap();
        aborts.request_abort(&mut queues, &mem, &abort(2, 6)).unwrap();

        let sq = queues
            .delete_sq(&DeleteIoQueue { nsid: 0, qid: 2 })
            .unwrap();
        aborts.release_queue(&sq);
        assert_eq!(aborts.in_flight(), 0);
    }
}
