//! Opcode-indexed admin command handlers.
//!
//! Each recognized admin opcode is served by one [`AdminCommandHandler`]. The table can be
//! customized (a transport that does not support Abort simply unregisters it), and anything
//! without a handler is answered with Invalid Opcode.

use std::collections::BTreeMap;
use std::fmt;

use crate::command::{
    Abort, AdminOpcode, CreateIoCq, CreateIoSq, DeleteIoQueue, Features, GetLogPage, Identify,
    NvmeCommand, ADMIN_OPCODE_LIMIT,
};
use crate::identify::identify;
use crate::log_page::get_log_page;
use crate::status::AdminError;
use crate::{AdminState, MemoryBus};

/// What a successful handler produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandOutcome {
    /// Post a completion with this DW0.
    Complete(u32),
    /// The command stays outstanding; its completion is posted later (AER).
    Deferred,
}

pub trait AdminCommandHandler: Send + Sync {
    fn opcode(&self) -> AdminOpcode;

    fn execute(
        &self,
        state: &mut AdminState,
        cmd: &NvmeCommand,
        memory: &mut dyn MemoryBus,
    ) -> Result<CommandOutcome, AdminError>;
}

/// Rejects commands routed to a handler that does not own their opcode.
fn ensure_opcode(expected: AdminOpcode, cmd: &NvmeCommand) -> Result<(), AdminError> {
    if cmd.opc != expected.raw() {
        tracing::warn!(
            expected = expected.raw(),
            found = cmd.opc,
            "command routed to the wrong handler"
        );
        return Err(AdminError::InvalidOpcode);
    }
    Ok(())
}

pub struct DeleteIoSqHandler;

impl AdminCommandHandler for DeleteIoSqHandler {
    fn opcode(&self) -> AdminOpcode {
        AdminOpcode::DeleteIoSq
    }

    fn execute(
        &self,
        state: &mut AdminState,
        cmd: &NvmeCommand,
        _memory: &mut dyn MemoryBus,
    ) -> Result<CommandOutcome, AdminError> {
        ensure_opcode(self.opcode(), cmd)?;
        let sq = state.queues.delete_sq(&DeleteIoQueue::decode(cmd))?;
        state.aborts.release_queue(&sq);
        Ok(CommandOutcome::Complete(0))
    }
}

pub struct CreateIoSqHandler;

impl AdminCommandHandler for CreateIoSqHandler {
    fn opcode(&self) -> AdminOpcode {
        AdminOpcode::CreateIoSq
    }

    fn execute(
        &self,
        state: &mut AdminState,
        cmd: &NvmeCommand,
        _memory: &mut dyn MemoryBus,
    ) -> Result<CommandOutcome, AdminError> {
        ensure_opcode(self.opcode(), cmd)?;
        state.queues.create_sq(&CreateIoSq::decode(cmd))?;
        Ok(CommandOutcome::Complete(0))
    }
}

pub struct GetLogPageHandler;

impl AdminCommandHandler for GetLogPageHandler {
    fn opcode(&self) -> AdminOpcode {
        AdminOpcode::GetLogPage
    }

    fn execute(
        &self,
        state: &mut AdminState,
        cmd: &NvmeCommand,
        memory: &mut dyn MemoryBus,
    ) -> Result<CommandOutcome, AdminError> {
        ensure_opcode(self.opcode(), cmd)?;
        get_log_page(
            state.identify.controller(),
            memory,
            &GetLogPage::decode(cmd),
        )?;
        Ok(CommandOutcome::Complete(0))
    }
}

pub struct DeleteIoCqHandler;

impl AdminCommandHandler for DeleteIoCqHandler {
    fn opcode(&self) -> AdminOpcode {
        AdminOpcode::DeleteIoCq
    }

    fn execute(
        &self,
        state: &mut AdminState,
        cmd: &NvmeCommand,
        _memory: &mut dyn MemoryBus,
    ) -> Result<CommandOutcome, AdminError> {
        ensure_opcode(self.opcode(), cmd)?;
        state.queues.delete_cq(&DeleteIoQueue::decode(cmd))?;
        Ok(CommandOutcome::Complete(0))
    }
}

pub struct CreateIoCqHandler;

impl AdminCommandHandler for CreateIoCqHandler {
    fn opcode(&self) -> AdminOpcode {
        AdminOpcode::CreateIoCq
    }

    fn execute(
        &self,
        state: &mut AdminState,
        cmd: &NvmeCommand,
        _memory: &mut dyn MemoryBus,
    ) -> Result<CommandOutcome, AdminError> {
        ensure_opcode(self.opcode(), cmd)?;
        state.queues.create_cq(&CreateIoCq::decode(cmd))?;
        Ok(CommandOutcome::Complete(0))
    }
}

pub struct IdentifyHandler;

impl AdminCommandHandler for IdentifyHandler {
    fn opcode(&self) -> AdminOpcode {
        AdminOpcode::Identify
    }

    fn execute(
        &self,
        state: &mut AdminState,
        cmd: &NvmeCommand,
        memory: &mut dyn MemoryBus,
    ) -> Result<CommandOutcome, AdminError> {
        ensure_opcode(self.opcode(), cmd)?;
        identify(&state.identify, memory, &Identify::decode(cmd))?;
        Ok(CommandOutcome::Complete(0))
    }
}

pub struct AbortHandler;

impl AdminCommandHandler for AbortHandler {
    fn opcode(&self) -> AdminOpcode {
        AdminOpcode::Abort
    }

    fn execute(
        &self,
        state: &mut AdminState,
        cmd: &NvmeCommand,
        memory: &mut dyn MemoryBus,
    ) -> Result<CommandOutcome, AdminError> {
        ensure_opcode(self.opcode(), cmd)?;
        state
            .aborts
            .request_abort(&mut state.queues, &*memory, &Abort::decode(cmd))?;
        // DW0 bit 0 clear: the command will be aborted.
        Ok(CommandOutcome::Complete(0))
    }
}

pub struct SetFeaturesHandler;

impl AdminCommandHandler for SetFeaturesHandler {
    fn opcode(&self) -> AdminOpcode {
        AdminOpcode::SetFeatures
    }

    fn execute(
        &self,
        state: &mut AdminState,
        cmd: &NvmeCommand,
        _memory: &mut dyn MemoryBus,
    ) -> Result<CommandOutcome, AdminError> {
        ensure_opcode(self.opcode(), cmd)?;
        let req = Features::decode(cmd);
        let dw0 = state.features.set(req.fid, req.value)?;
        Ok(CommandOutcome::Complete(dw0))
    }
}

pub struct GetFeaturesHandler;

impl AdminCommandHandler for GetFeaturesHandler {
    fn opcode(&self) -> AdminOpcode {
        AdminOpcode::GetFeatures
    }

    fn execute(
        &self,
        state: &mut AdminState,
        cmd: &NvmeCommand,
        _memory: &mut dyn MemoryBus,
    ) -> Result<CommandOutcome, AdminError> {
        ensure_opcode(self.opcode(), cmd)?;
        let req = Features::decode(cmd);
        Ok(CommandOutcome::Complete(state.features.get(req.fid)?))
    }
}

pub struct AsyncEventRequestHandler;

impl AdminCommandHandler for AsyncEventRequestHandler {
    fn opcode(&self) -> AdminOpcode {
        AdminOpcode::AsyncEventRequest
    }

    fn execute(
        &self,
        state: &mut AdminState,
        cmd: &NvmeCommand,
        _memory: &mut dyn MemoryBus,
    ) -> Result<CommandOutcome, AdminError> {
        ensure_opcode(self.opcode(), cmd)?;
        state.events.arm(cmd.cid)?;
        Ok(CommandOutcome::Deferred)
    }
}

/// Opcode → handler table.
pub struct AdminDispatcher {
    handlers: BTreeMap<AdminOpcode, Box<dyn AdminCommandHandler>>,
}

impl AdminDispatcher {
    /// A dispatcher that rejects every opcode.
    pub fn empty() -> Self {
        Self {
            handlers: BTreeMap::new(),
        }
    }

    /// A dispatcher serving every admin opcode the controller implements.
    pub fn with_default_handlers() -> Self {
        let mut dispatcher = Self::empty();
        dispatcher.register(Box::new(DeleteIoSqHandler));
        dispatcher.register(Box::new(CreateIoSqHandler));
        dispatcher.register(Box::new(GetLogPageHandler));
        dispatcher.register(Box::new(DeleteIoCqHandler));
        dispatcher.register(Box::new(CreateIoCqHandler));
        dispatcher.register(Box::new(IdentifyHandler));
        dispatcher.register(Box::new(AbortHandler));
        dispatcher.register(Box::new(SetFeaturesHandler));
        dispatcher.register(Box::new(GetFeaturesHandler));
        dispatcher.register(Box::new(AsyncEventRequestHandler));
        dispatcher
    }

    /// Installs `handler` for its opcode, returning the handler it replaced.
    pub fn register(
        &mut self,
        handler: Box<dyn AdminCommandHandler>,
    ) -> Option<Box<dyn AdminCommandHandler>> {
        self.handlers.insert(handler.opcode(), handler)
    }

    pub fn unregister(&mut self, opcode: AdminOpcode) -> Option<Box<dyn AdminCommandHandler>> {
        self.handlers.remove(&opcode)
    }

    pub fn handles(&self, opcode: AdminOpcode) -> bool {
        self.handlers.contains_key(&opcode)
    }

    /// Routes `cmd` to the handler registered for `opcode`.
    ///
    /// Nothing in `state` is touched when no handler accepts the opcode.
    pub fn dispatch(
        &self,
        state: &mut AdminState,
        opcode: u8,
        cmd: &NvmeCommand,
        memory: &mut dyn MemoryBus,
    ) -> Result<CommandOutcome, AdminError> {
        if opcode >= ADMIN_OPCODE_LIMIT {
            tracing::debug!(opcode, "admin opcode out of range");
            return Err(AdminError::InvalidOpcode);
        }
        let handler = AdminOpcode::from_raw(opcode)
            .and_then(|op| self.handlers.get(&op))
            .ok_or_else(|| {
                tracing::debug!(opcode, "no handler for admin opcode");
                AdminError::InvalidOpcode
            })?;
        if cmd.psdt != 0 {
            tracing::debug!(psdt = cmd.psdt, "SGL data pointers are not supported");
            return Err(AdminError::InvalidField);
        }
        handler.execute(state, cmd, memory)
    }
}

impl Default for AdminDispatcher {
    fn default() -> Self {
        Self::with_default_handlers()
    }
}

impl fmt::Debug for AdminDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdminDispatcher")
            .field("opcodes", &self.handlers.keys().collect::<Vec<_>>())
            .finish()
    }
}
