//! Submission/completion queue descriptor tables.
//!
//! Both tables have a fixed number of slots (`ControllerConfig::max_queues`) and are indexed by
//! queue identifier. Slot 0 holds the admin queue pair, which is provisioned by the register
//! layer through [`QueueRegistry::provision_admin`] and is never touched by admin commands.
//!
//! Cross references are counted: every SQ names exactly one CQ and bumps that CQ's usage counter,
//! so a CQ can only be deleted once all of its SQs are gone.

use crate::command::{CqEntry, CreateIoCq, CreateIoSq, DeleteIoQueue, QueueFlags, CQE_SIZE};
use crate::config::{ControllerConfig, InterruptMode};
use crate::status::AdminError;
use crate::{MemoryBus, MemoryError};

/// A queue identifier that has been checked against the table size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct QueueId(u16);

impl QueueId {
    pub const ADMIN: QueueId = QueueId(0);

    pub fn get(self) -> u16 {
        self.0
    }

    fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmissionQueue {
    pub id: QueueId,
    pub base: u64,
    /// Capacity in entries.
    pub size: u16,
    pub head: u16,
    pub tail: u16,
    pub priority: u8,
    pub phys_contig: bool,
    pub cqid: QueueId,
    /// Command identifiers marked for abort; `None` is a free slot.
    pub(crate) abort_slots: Vec<Option<u16>>,
}

impl SubmissionQueue {
    pub fn is_empty(&self) -> bool {
        self.head == self.tail
    }

    /// Number of entries the host has produced that the controller has not consumed yet.
    pub fn outstanding(&self) -> u16 {
        if self.size == 0 {
            return 0;
        }
        ((self.tail as u32 + self.size as u32 - self.head as u32) % self.size as u32) as u16
    }

    pub fn abort_slots(&self) -> &[Option<u16>] {
        &self.abort_slots
    }

    pub fn pending_aborts(&self) -> impl Iterator<Item = u16> + '_ {
        self.abort_slots.iter().filter_map(|slot| *slot)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletionQueue {
    pub id: QueueId,
    pub base: u64,
    /// Capacity in entries.
    pub size: u16,
    pub head: u16,
    pub tail: u16,
    pub phys_contig: bool,
    pub irq_enabled: bool,
    pub vector: u16,
    /// Phase tag written into the next posted entry.
    pub phase: bool,
    /// Number of SQs currently linked to this CQ.
    pub usage: u16,
}

impl CompletionQueue {
    pub fn is_full(&self) -> bool {
        self.size == 0 || (self.tail + 1) % self.size == self.head
    }

    pub fn has_pending(&self) -> bool {
        self.head != self.tail
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueRegistry {
    sqs: Vec<Option<SubmissionQueue>>,
    cqs: Vec<Option<CompletionQueue>>,
    mqes: u16,
    contiguous_required: bool,
    interrupts: InterruptMode,
    abort_slots_per_sq: usize,
}

impl QueueRegistry {
    pub fn new(config: &ControllerConfig) -> Self {
        let slots = config.max_queues as usize;
        Self {
            sqs: vec![None; slots],
            cqs: vec![None; slots],
            mqes: config.mqes,
            contiguous_required: config.contiguous_queues_required,
            interrupts: config.interrupts,
            abort_slots_per_sq: config.abort_command_limit as usize,
        }
    }

    /// Number of slots in each table, admin slot included.
    pub fn capacity(&self) -> usize {
        self.sqs.len()
    }

    pub fn queue_id(&self, qid: u16) -> Option<QueueId> {
        ((qid as usize) < self.sqs.len()).then_some(QueueId(qid))
    }

    pub fn sq(&self, qid: u16) -> Option<&SubmissionQueue> {
        let id = self.queue_id(qid)?;
        self.sqs[id.index()].as_ref()
    }

    pub fn cq(&self, qid: u16) -> Option<&CompletionQueue> {
        let id = self.queue_id(qid)?;
        self.cqs[id.index()].as_ref()
    }

    pub(crate) fn sq_mut(&mut self, qid: u16) -> Option<&mut SubmissionQueue> {
        let id = self.queue_id(qid)?;
        self.sqs[id.index()].as_mut()
    }

    fn cq_mut(&mut self, qid: u16) -> Option<&mut CompletionQueue> {
        let id = self.queue_id(qid)?;
        self.cqs[id.index()].as_mut()
    }

    pub fn allocated_sqs(&self) -> impl Iterator<Item = &SubmissionQueue> + '_ {
        self.sqs.iter().flatten()
    }

    pub fn allocated_cqs(&self) -> impl Iterator<Item = &CompletionQueue> + '_ {
        self.cqs.iter().flatten()
    }

    /// Installs the admin queue pair programmed through AQA/ASQ/ACQ.
    ///
    /// Sizes are entry counts (not zero-based). Any previous admin pair is replaced.
    pub fn provision_admin(
        &mut self,
        asq: u64,
        asq_entries: u16,
        acq: u64,
        acq_entries: u16,
    ) -> Result<(), AdminError> {
        if asq == 0 || acq == 0 || asq_entries < 2 || acq_entries < 2 {
            return Err(AdminError::InvalidField);
        }

        self.sqs[0] = Some(SubmissionQueue {
            id: QueueId::ADMIN,
            base: asq,
            size: asq_entries,
            head: 0,
            tail: 0,
            priority: 0,
            phys_contig: true,
            cqid: QueueId::ADMIN,
            abort_slots: vec![None; self.abort_slots_per_sq],
        });
        self.cqs[0] = Some(CompletionQueue {
            id: QueueId::ADMIN,
            base: acq,
            size: acq_entries,
            head: 0,
            tail: 0,
            phys_contig: true,
            irq_enabled: true,
            vector: 0,
            phase: true,
            usage: 1,
        });
        Ok(())
    }

    /// Validates an I/O queue identifier carried by a create/delete command.
    fn io_queue_id(&self, qid: u16) -> Result<QueueId, AdminError> {
        match self.queue_id(qid) {
            Some(id) if id != QueueId::ADMIN => Ok(id),
            _ => Err(AdminError::InvalidQueueIdentifier),
        }
    }

    /// Checks shared by both create commands: queue size, contiguity and base address.
    fn check_queue_geometry(
        &self,
        qsize: u16,
        flags: QueueFlags,
        base: u64,
    ) -> Result<(), AdminError> {
        // A one-entry queue can never hold an entry: head == tail means empty.
        if qsize == 0 || qsize > self.mqes || qsize == u16::MAX {
            tracing::debug!(qsize, mqes = self.mqes, "invalid queue size");
            return Err(AdminError::MaxQueueSizeExceeded);
        }
        if self.contiguous_required && !flags.contains(QueueFlags::PHYS_CONTIG) {
            tracing::debug!("CAP.CQR set, non-contiguous queue rejected");
            return Err(AdminError::InvalidField);
        }
        if base == 0 {
            return Err(AdminError::InvalidField);
        }
        Ok(())
    }

    pub fn create_sq(&mut self, req: &CreateIoSq) -> Result<QueueId, AdminError> {
        let id = self.io_queue_id(req.qid)?;
        if req.cqid == 0 {
            return Err(AdminError::CompletionQueueInvalid);
        }
        if req.nsid != 0 {
            return Err(AdminError::InvalidNamespace);
        }
        if self.sqs[id.index()].is_some() {
            tracing::debug!(qid = req.qid, "SQ already allocated");
            return Err(AdminError::InvalidQueueIdentifier);
        }
        let cqid = self
            .queue_id(req.cqid)
            .filter(|cqid| self.cqs[cqid.index()].is_some())
            .ok_or(AdminError::CompletionQueueInvalid)?;
        self.check_queue_geometry(req.qsize, req.flags, req.prp1)?;

        self.sqs[id.index()] = Some(SubmissionQueue {
            id,
            base: req.prp1,
            size: req.qsize + 1,
            head: 0,
            tail: 0,
            priority: req.priority,
            phys_contig: req.flags.contains(QueueFlags::PHYS_CONTIG),
            cqid,
            abort_slots: vec![None; self.abort_slots_per_sq],
        });
        if let Some(cq) = self.cqs[cqid.index()].as_mut() {
            cq.usage += 1;
        }

        tracing::debug!(
            qid = req.qid,
            cqid = req.cqid,
            entries = req.qsize as u32 + 1,
            base = req.prp1,
            "created I/O submission queue"
        );
        Ok(id)
    }

    /// Deletes an I/O SQ and returns its final descriptor.
    ///
    /// Entries still queued between head and tail are abandoned: the slot is reset and nothing
    /// will fetch them again. The caller must hand the returned queue to
    /// [`crate::abort::AbortRegistry::release_queue`] so its abort marks go back to the pool.
    #[must_use = "the deleted queue's abort marks must be released"]
    pub(crate) fn delete_sq(&mut self, req: &DeleteIoQueue) -> Result<SubmissionQueue, AdminError> {
        let id = self.io_queue_id(req.qid)?;
        if req.nsid != 0 {
            return Err(AdminError::InvalidNamespace);
        }
        let cqid = match &self.sqs[id.index()] {
            Some(sq) => sq.cqid,
            None => {
                tracing::debug!(qid = req.qid, "no such SQ");
                return Err(AdminError::InvalidQueueIdentifier);
            }
        };
        if self.cqs[cqid.index()].is_none() {
            return Err(AdminError::InvalidQueueIdentifier);
        }

        let Some(sq) = self.sqs[id.index()].take() else {
            return Err(AdminError::InvalidQueueIdentifier);
        };
        if !sq.is_empty() {
            tracing::debug!(
                qid = req.qid,
                abandoned = sq.outstanding(),
                "deleting non-empty SQ"
            );
        }
        if let Some(cq) = self.cqs[cqid.index()].as_mut() {
            if cq.usage == 0 {
                tracing::warn!(cqid = cqid.get(), "CQ usage counter underflow");
            }
            cq.usage = cq.usage.saturating_sub(1);
        }
        Ok(sq)
    }

    pub fn create_cq(&mut self, req: &CreateIoCq) -> Result<QueueId, AdminError> {
        let id = self.io_queue_id(req.qid)?;
        if req.nsid != 0 {
            return Err(AdminError::InvalidNamespace);
        }
        if self.cqs[id.index()].is_some() {
            tracing::debug!(qid = req.qid, "CQ already allocated");
            return Err(AdminError::InvalidQueueIdentifier);
        }
        self.check_queue_geometry(req.qsize, req.flags, req.prp1)?;
        if let InterruptMode::Msix { vectors } = self.interrupts {
            if req.vector >= vectors {
                return Err(AdminError::InvalidInterruptVector);
            }
        }

        self.cqs[id.index()] = Some(CompletionQueue {
            id,
            base: req.prp1,
            size: req.qsize + 1,
            head: 0,
            tail: 0,
            phys_contig: req.flags.contains(QueueFlags::PHYS_CONTIG),
            irq_enabled: req.flags.contains(QueueFlags::IRQ_ENABLED),
            vector: req.vector,
            phase: true,
            usage: 0,
        });

        tracing::debug!(
            qid = req.qid,
            entries = req.qsize as u32 + 1,
            vector = req.vector,
            irq_enabled = req.flags.contains(QueueFlags::IRQ_ENABLED),
            "created I/O completion queue"
        );
        Ok(id)
    }

    pub fn delete_cq(&mut self, req: &DeleteIoQueue) -> Result<(), AdminError> {
        let id = self.io_queue_id(req.qid)?;
        if req.nsid != 0 {
            return Err(AdminError::InvalidNamespace);
        }
        let cq = self.cqs[id.index()].as_ref().ok_or_else(|| {
            tracing::debug!(qid = req.qid, "no such CQ");
            AdminError::InvalidQueueIdentifier
        })?;
        if cq.has_pending() {
            tracing::debug!(qid = req.qid, "deleting CQ with unconsumed entries");
        }
        if cq.usage != 0 {
            tracing::warn!(qid = req.qid, usage = cq.usage, "CQ still referenced by SQs");
            return Err(AdminError::InvalidField);
        }

        self.cqs[id.index()] = None;
        Ok(())
    }

    /// SQ tail doorbell. Returns `false` if the queue is absent or the value is out of range.
    pub fn set_sq_tail(&mut self, qid: u16, tail: u16) -> bool {
        match self.sq_mut(qid) {
            Some(sq) if tail < sq.size => {
                sq.tail = tail;
                true
            }
            _ => false,
        }
    }

    /// Advances the consumer cursor of an SQ (used by the fetch loop).
    pub fn set_sq_head(&mut self, qid: u16, head: u16) -> bool {
        match self.sq_mut(qid) {
            Some(sq) if head < sq.size => {
                sq.head = head;
                true
            }
            _ => false,
        }
    }

    /// CQ head doorbell.
    pub fn set_cq_head(&mut self, qid: u16, head: u16) -> bool {
        match self.cq_mut(qid) {
            Some(cq) if head < cq.size => {
                cq.head = head;
                true
            }
            _ => false,
        }
    }

    /// Writes `entry` at the tail of CQ `cqid` with the current phase tag.
    ///
    /// Returns `Ok(false)` if the queue does not exist or is full; the host is expected to avoid
    /// overrunning its completion queues, so the entry is dropped.
    pub fn post_completion(
        &mut self,
        cqid: u16,
        mut entry: CqEntry,
        memory: &mut dyn MemoryBus,
    ) -> Result<bool, MemoryError> {
        let Some(cq) = self.cq_mut(cqid) else {
            tracing::warn!(cqid, "completion for unallocated CQ dropped");
            return Ok(false);
        };
        if cq.is_full() {
            tracing::warn!(cqid, cid = entry.cid, "CQ full, completion dropped");
            return Ok(false);
        }

        entry.status = (entry.status & !1) | cq.phase as u16;
        let addr = cq.base.wrapping_add(cq.tail as u64 * CQE_SIZE as u64);
        memory.write_physical(addr, &entry.to_bytes())?;

        cq.tail = (cq.tail + 1) % cq.size;
        if cq.tail == 0 {
            cq.phase = !cq.phase;
        }
        Ok(true)
    }
}
