//! Asynchronous Event Request bookkeeping.
//!
//! AERs are armed by the host and completed by the controller whenever something noteworthy
//! happens, so their completions are deferred: arming produces no completion entry at all.

use std::collections::VecDeque;

use crate::status::AdminError;

/// Events queued while no request is armed are capped; further events are dropped.
const MAX_PENDING_EVENTS: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum AsyncEventType {
    ErrorStatus = 0x0,
    SmartHealth = 0x1,
    Notice = 0x2,
    IoCommandSet = 0x6,
    VendorSpecific = 0x7,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AsyncEvent {
    pub event_type: AsyncEventType,
    pub info: u8,
    /// Log page the host should read to clear the event.
    pub log_page: u8,
}

impl AsyncEvent {
    /// Completion DW0 for this event.
    pub fn dw0(&self) -> u32 {
        (self.event_type as u32 & 0x7) | (self.info as u32) << 8 | (self.log_page as u32) << 16
    }
}

#[derive(Debug, Clone)]
pub struct AsyncEventRegistry {
    limit: usize,
    armed: VecDeque<u16>,
    pending: VecDeque<AsyncEvent>,
}

impl AsyncEventRegistry {
    pub fn new(limit: u8) -> Self {
        Self {
            limit: limit as usize,
            armed: VecDeque::new(),
            pending: VecDeque::new(),
        }
    }

    pub fn armed(&self) -> usize {
        self.armed.len()
    }

    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    pub fn arm(&mut self, cid: u16) -> Result<(), AdminError> {
        if self.armed.len() >= self.limit {
            return Err(AdminError::AsyncEventLimitExceeded);
        }
        self.armed.push_back(cid);
        Ok(())
    }

    pub fn raise(&mut self, event: AsyncEvent) {
        if self.pending.len() >= MAX_PENDING_EVENTS {
            tracing::warn!(?event, "async event queue full, dropping event");
            return;
        }
        self.pending.push_back(event);
    }

    /// Pairs the oldest armed request with the oldest pending event.
    ///
    /// Returns the request's CID and the completion DW0.
    pub fn take_completion(&mut self) -> Option<(u16, u32)> {
        if self.armed.is_empty() {
            return None;
        }
        let event = self.pending.pop_front()?;
        let cid = self.armed.pop_front()?;
        Some((cid, event.dw0()))
    }
}
