//! Request/response correlation over the framed wire.
//!
//! The engine is sans-io and policy-free: it allocates request ids,
//! tracks pending requests with deadlines, and matches responses back to
//! the handler tag installed at send time. What a handler tag *means* is
//! the peer machine's business.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use bytes::Bytes;

use crate::error::ProtocolError;
use crate::frame::{Frame, OpCode};

/// Default time a request may wait for its response.
pub const RESPONSE_TIMEOUT: Duration = Duration::from_secs(30);

/// What to do with a response (or its absence). One tag per call site;
/// the peer machine matches on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseHandler {
    /// Response to our outgoing `hello`.
    Hello,
    /// Response to a `getblocks` download request.
    GetBlocks,
    /// Fire-and-forget; response (if any) is dropped.
    Discard,
}

struct Pending {
    handler: ResponseHandler,
    deadline: Instant,
}

/// Per-connection correlation state.
pub struct ProtocolEngine {
    next_request_id: u32,
    response_timeout: Duration,
    pending: HashMap<u32, Pending>,
}

impl ProtocolEngine {
    pub fn new(response_timeout: Duration) -> Self {
        Self {
            next_request_id: 0,
            response_timeout,
            pending: HashMap::new(),
        }
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Build a request frame and remember its handler. Ids are monotonic
    /// per connection, wrapping mod 2^32; an id colliding with one still
    /// outstanding is skipped (unreachable at realistic rates).
    pub fn request(
        &mut self,
        now: Instant,
        operation: OpCode,
        payload: Bytes,
        handler: ResponseHandler,
    ) -> Frame {
        loop {
            self.next_request_id = self.next_request_id.wrapping_add(1);
            if !self.pending.contains_key(&self.next_request_id) {
                break;
            }
        }
        let request_id = self.next_request_id;

        self.pending.insert(
            request_id,
            Pending {
                handler,
                deadline: now + self.response_timeout,
            },
        );
        Frame::request(operation, request_id, payload)
    }

    /// Build a notification frame; nothing is retained.
    pub fn notification(&self, operation: OpCode, payload: Bytes) -> Frame {
        Frame::notification(operation, payload)
    }

    /// Match an incoming response to its pending request. An id nothing
    /// is waiting on is a protocol violation.
    pub fn take_response(&mut self, frame: &Frame) -> Result<ResponseHandler, ProtocolError> {
        self.pending
            .remove(&frame.request_id)
            .map(|p| p.handler)
            .ok_or(ProtocolError::UnmatchedResponse(frame.request_id))
    }

    /// Evict requests whose deadline has passed; the caller delivers the
    /// `None` outcome to each returned handler.
    pub fn expire(&mut self, now: Instant) -> Vec<ResponseHandler> {
        let overdue: Vec<u32> = self
            .pending
            .iter()
            .filter(|(_, p)| p.deadline <= now)
            .map(|(id, _)| *id)
            .collect();

        overdue
            .into_iter()
            .filter_map(|id| self.pending.remove(&id))
            .map(|p| p.handler)
            .collect()
    }

    /// Drop every pending request, handing the handlers back so the
    /// caller can deliver the cancellation outcome.
    pub fn cancel_all(&mut self) -> Vec<ResponseHandler> {
        self.pending.drain().map(|(_, p)| p.handler).collect()
    }
}

impl Default for ProtocolEngine {
    fn default() -> Self {
        Self::new(RESPONSE_TIMEOUT)
    }
}
