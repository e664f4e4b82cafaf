//! NVMe admin command processor.
//!
//! This crate interprets the management commands a host driver submits on the NVMe admin
//! submission queue and produces their completions. The only external input is a memory bus
//! (guest physical memory access for DMA); register decoding, interrupt delivery and I/O command
//! processing belong to the embedding transport.
//!
//! Supported:
//! - Create/Delete I/O Submission Queue, Create/Delete I/O Completion Queue
//! - Identify (controller, namespace)
//! - Set/Get Features
//! - Abort (best effort: queued commands are marked, never cancelled in flight)
//! - Asynchronous Event Request
//! - Get Log Page (error information, SMART / health, firmware slot)
//!
//! Data transfers use PRP1/PRP2 only. SGL and PRP lists are not supported.

pub mod abort;
pub mod command;
pub mod config;
pub mod dispatch;
pub mod events;
pub mod features;
pub mod identify;
pub mod log_page;
pub mod queues;
pub mod status;

#[cfg(test)]
mod test_util;

use thiserror::Error;

use crate::abort::AbortRegistry;
use crate::command::{CqEntry, NvmeCommand, SQE_SIZE};
use crate::config::{ConfigError, ControllerConfig};
use crate::dispatch::{AdminDispatcher, CommandOutcome};
use crate::events::{AsyncEvent, AsyncEventRegistry};
use crate::features::FeatureStore;
use crate::identify::IdentifyData;
use crate::queues::{QueueId, QueueRegistry};
use crate::status::{AdminError, NvmeStatus};

pub use crate::command::AdminOpcode;
pub use crate::dispatch::AdminCommandHandler;

pub const PAGE_SIZE: usize = 4096;

/// Errors returned by the controller when it cannot access guest memory.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MemoryError {
    #[error("guest memory access out of bounds: {len} bytes at {addr:#x}")]
    OutOfBounds { addr: u64, len: usize },
}

/// Guest physical memory access used for DMA.
pub trait MemoryBus {
    fn read_physical(&self, paddr: u64, buf: &mut [u8]) -> Result<(), MemoryError>;
    fn write_physical(&mut self, paddr: u64, buf: &[u8]) -> Result<(), MemoryError>;

    fn read_u16(&self, paddr: u64) -> Result<u16, MemoryError> {
        let mut buf = [0u8; 2];
        self.read_physical(paddr, &mut buf)?;
        Ok(u16::from_le_bytes(buf))
    }

    fn read_u32(&self, paddr: u64) -> Result<u32, MemoryError> {
        let mut buf = [0u8; 4];
        self.read_physical(paddr, &mut buf)?;
        Ok(u32::from_le_bytes(buf))
    }

    fn read_u64(&self, paddr: u64) -> Result<u64, MemoryError> {
        let mut buf = [0u8; 8];
        self.read_physical(paddr, &mut buf)?;
        Ok(u64::from_le_bytes(buf))
    }

    fn write_u16(&mut self, paddr: u64, val: u16) -> Result<(), MemoryError> {
        self.write_physical(paddr, &val.to_le_bytes())
    }

    fn write_u32(&mut self, paddr: u64, val: u32) -> Result<(), MemoryError> {
        self.write_physical(paddr, &val.to_le_bytes())
    }

    fn write_u64(&mut self, paddr: u64, val: u64) -> Result<(), MemoryError> {
        self.write_physical(paddr, &val.to_le_bytes())
    }
}

/// Everything admin command handlers read and mutate.
#[derive(Debug, Clone)]
pub struct AdminState {
    pub config: ControllerConfig,
    pub queues: QueueRegistry,
    pub features: FeatureStore,
    pub aborts: AbortRegistry,
    pub events: AsyncEventRegistry,
    pub identify: IdentifyData,
}

impl AdminState {
    /// Builds the initial state. `config` is expected to have been validated.
    pub fn new(config: ControllerConfig, mut identify: IdentifyData) -> Self {
        // ACL and AERL are zero-based.
        let controller = identify.controller_mut();
        controller.acl = config.abort_command_limit.saturating_sub(1);
        controller.aerl = config.async_event_request_limit.saturating_sub(1);

        let mut features = config.features;
        features.clamp_number_of_queues(config.max_queues);

        Self {
            queues: QueueRegistry::new(&config),
            features: FeatureStore::new(features),
            aborts: AbortRegistry::new(config.abort_command_limit),
            events: AsyncEventRegistry::new(config.async_event_request_limit),
            identify,
            config,
        }
    }
}

/// Result of one admin command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdminCompletion {
    pub status: NvmeStatus,
    /// Completion DW0.
    pub result: u32,
    /// No completion entry must be posted now; the command completes later.
    pub deferred: bool,
}

impl AdminCompletion {
    pub fn success(result: u32) -> Self {
        Self {
            status: NvmeStatus::SUCCESS,
            result,
            deferred: false,
        }
    }

    pub fn error(err: AdminError) -> Self {
        Self {
            status: err.status(),
            result: 0,
            deferred: false,
        }
    }

    /// Completion queue entry for this result. The phase tag is left clear for the CQ to set.
    pub fn to_entry(&self, cid: u16, sqid: u16, sqhd: u16) -> CqEntry {
        CqEntry {
            dw0: self.result,
            dw1: 0,
            sqhd,
            sqid,
            cid,
            status: self.status.encode_without_phase(),
        }
    }
}

/// The admin command processor of one controller.
#[derive(Debug)]
pub struct AdminController {
    state: AdminState,
    dispatcher: AdminDispatcher,
}

impl AdminController {
    pub fn new(config: ControllerConfig, identify: IdentifyData) -> Result<Self, ConfigError> {
        Self::with_dispatcher(config, identify, AdminDispatcher::with_default_handlers())
    }

    pub fn with_dispatcher(
        config: ControllerConfig,
        identify: IdentifyData,
        dispatcher: AdminDispatcher,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        tracing::debug!(
            max_queues = config.max_queues,
            mqes = config.mqes,
            namespaces = identify.namespace_count(),
            "admin controller created"
        );
        Ok(Self {
            state: AdminState::new(config, identify),
            dispatcher,
        })
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.state.config
    }

    pub fn queues(&self) -> &QueueRegistry {
        &self.state.queues
    }

    pub fn features(&self) -> &FeatureStore {
        &self.state.features
    }

    pub fn aborts(&self) -> &AbortRegistry {
        &self.state.aborts
    }

    pub fn events(&self) -> &AsyncEventRegistry {
        &self.state.events
    }

    pub fn identify(&self) -> &IdentifyData {
        &self.state.identify
    }

    pub fn dispatcher_mut(&mut self) -> &mut AdminDispatcher {
        &mut self.dispatcher
    }

    /// Installs the admin queue pair (AQA/ASQ/ACQ). Entry counts are not zero-based.
    pub fn provision_admin_queues(
        &mut self,
        asq: u64,
        asq_entries: u16,
        acq: u64,
        acq_entries: u16,
    ) -> Result<(), AdminError> {
        self.state
            .queues
            .provision_admin(asq, asq_entries, acq, acq_entries)?;
        tracing::debug!(asq, asq_entries, acq, acq_entries, "admin queues provisioned");
        Ok(())
    }

    pub fn ring_sq_tail(&mut self, qid: u16, tail: u16) -> bool {
        let accepted = self.state.queues.set_sq_tail(qid, tail);
        if !accepted {
            tracing::warn!(qid, tail, "ignoring SQ tail doorbell");
        }
        accepted
    }

    pub fn ring_cq_head(&mut self, qid: u16, head: u16) -> bool {
        let accepted = self.state.queues.set_cq_head(qid, head);
        if !accepted {
            tracing::warn!(qid, head, "ignoring CQ head doorbell");
        }
        accepted
    }

    /// Executes one admin command.
    pub fn process_admin_command(
        &mut self,
        opcode: u8,
        bytes: &[u8; SQE_SIZE],
        memory: &mut dyn MemoryBus,
    ) -> AdminCompletion {
        let cmd = NvmeCommand::parse(bytes);
        tracing::debug!(opcode, cid = cmd.cid, nsid = cmd.nsid, "admin command");

        match self
            .dispatcher
            .dispatch(&mut self.state, opcode, &cmd, memory)
        {
            Ok(CommandOutcome::Complete(result)) => AdminCompletion::success(result),
            Ok(CommandOutcome::Deferred) => AdminCompletion {
                status: NvmeStatus::SUCCESS,
                result: 0,
                deferred: true,
            },
            Err(err) => {
                tracing::warn!(opcode, cid = cmd.cid, %err, "admin command failed");
                AdminCompletion::error(err)
            }
        }
    }

    /// Consumes every entry between the admin SQ head and tail and posts the completions to the
    /// admin CQ. Returns the number of commands executed.
    pub fn process_admin_queue(&mut self, memory: &mut dyn MemoryBus) -> Result<usize, MemoryError> {
        let mut processed = 0;
        loop {
            let Some(sq) = self.state.queues.sq(QueueId::ADMIN.get()) else {
                return Ok(processed);
            };
            if sq.is_empty() {
                break;
            }
            let addr = sq.base.wrapping_add(sq.head as u64 * SQE_SIZE as u64);
            let next_head = (sq.head + 1) % sq.size;

            let mut bytes = [0u8; SQE_SIZE];
            memory.read_physical(addr, &mut bytes)?;
            self.state.queues.set_sq_head(QueueId::ADMIN.get(), next_head);

            let cid = u16::from_le_bytes([bytes[2], bytes[3]]);
            let completion = self.process_admin_command(bytes[0], &bytes, memory);
            processed += 1;
            if completion.deferred {
                continue;
            }
            let entry = completion.to_entry(cid, QueueId::ADMIN.get(), next_head);
            self.state
                .queues
                .post_completion(QueueId::ADMIN.get(), entry, memory)?;
        }

        self.flush_async_events(memory)?;
        Ok(processed)
    }

    /// Clears an abort mark when the I/O path completes `cid` on `sqid`.
    ///
    /// Returns `true` if the command had been marked for abort.
    pub fn retire_command(&mut self, sqid: u16, cid: u16) -> bool {
        self.state
            .aborts
            .retire(&mut self.state.queues, sqid, cid)
    }

    pub fn raise_async_event(&mut self, event: AsyncEvent) {
        tracing::debug!(?event, "async event raised");
        self.state.events.raise(event);
    }

    /// Completes the oldest armed Asynchronous Event Request with the oldest pending event.
    ///
    /// Returns the request's CID together with its completion.
    pub fn take_async_event_completion(&mut self) -> Option<(u16, AdminCompletion)> {
        let (cid, dw0) = self.state.events.take_completion()?;
        Some((cid, AdminCompletion::success(dw0)))
    }

    /// Posts every completable Asynchronous Event Request to the admin CQ.
    pub fn flush_async_events(&mut self, memory: &mut dyn MemoryBus) -> Result<usize, MemoryError> {
        let admin = QueueId::ADMIN.get();
        let sqhd = self.state.queues.sq(admin).map_or(0, |sq| sq.head);
        let mut posted = 0;
        while let Some((cid, completion)) = self.take_async_event_completion() {
            let entry = completion.to_entry(cid, admin, sqhd);
            if self.state.queues.post_completion(admin, entry, memory)? {
                posted += 1;
            }
        }
        Ok(posted)
    }
}
