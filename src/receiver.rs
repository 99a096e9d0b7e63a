//! Ingestion context shared between the receive interrupt and the boot loop.
//!
//! The interrupt side calls [`Receiver::receive`] for every byte, the loop side
//! takes completed frames and pending errors. Both take `&mut self`; on target
//! the receiver lives in the board's interrupt-safe cell and the loop only
//! holds it long enough to take a frame out, so ingestion resuming mid-dispatch
//! can never overwrite the frame being handled.

use crate::error::ErrorCode;
use crate::parser::{Frame, Parser};

pub struct Receiver {
    parser: Parser,
    frame: Frame,
    ready: bool,
    error: ErrorCode,
}

impl Default for Receiver {
    fn default() -> Self {
        Self::new()
    }
}

impl Receiver {
    pub const fn new() -> Self {
        Self {
            parser: Parser::new(),
            frame: Frame::new(crate::protocol::Command::Ack),
            ready: false,
            error: ErrorCode::NoError,
        }
    }

    /// Ingestion entry point, one received byte
    pub fn receive(&mut self, byte: u8) {
        match self.parser.ingest(byte) {
            Ok(None) => (),
            Ok(Some(frame)) => {
                if self.ready {
                    warn!("Dropping unhandled {:?} frame", self.frame.command());
                }
                self.frame.clone_from(frame);
                self.ready = true;
            }
            Err(e) => {
                debug!("Receive error: {}", e);
                self.error = ErrorCode::from(e);
            }
        }
    }
}

/// Loop-side view of the ingestion context.
///
/// Implemented by [`Receiver`] directly; boards sharing the receiver with an
/// interrupt implement it on a wrapper taking a short critical section per
/// call.
pub trait Inbox {
    /// Whether a complete frame is waiting
    fn frame_pending(&self) -> bool;

    /// Take the pending frame, clearing the ready flag
    fn take_frame(&mut self) -> Option<Frame>;

    /// The pending error, `NoError` if none
    fn pending_error(&self) -> ErrorCode;

    /// Take the pending error, clearing it
    fn take_error(&mut self) -> Option<ErrorCode>;

    /// Record an error to be reported on the next bootloader tick
    fn raise(&mut self, code: ErrorCode);
}

impl Inbox for Receiver {
    fn frame_pending(&self) -> bool {
        self.ready
    }

    fn take_frame(&mut self) -> Option<Frame> {
        if !self.ready {
            return None;
        }
        self.ready = false;
        Some(self.frame.clone())
    }

    fn pending_error(&self) -> ErrorCode {
        self.error
    }

    fn take_error(&mut self) -> Option<ErrorCode> {
        let e = core::mem::replace(&mut self.error, ErrorCode::NoError);
        if e.is_error() {
            Some(e)
        } else {
            None
        }
    }

    fn raise(&mut self, code: ErrorCode) {
        self.error = code;
    }
}
