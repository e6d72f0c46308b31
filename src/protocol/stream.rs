//! Streaming reader over a chained reply.
//!
//! A reply is one or more framed messages: `MORE_DATA` messages followed by a
//! final `OK`. The stream reads fixed-width integers and VLQs out of the
//! current payload and requests the next chained message transparently when
//! it runs out. Errors are sticky: the first failure (overrun past the final
//! message, framing desync, daemon error code, I/O failure, shutdown) is
//! recorded, every later read zero-fills its destination, and the recorded
//! error is checked once when the decode pass finishes.

use crate::error::{Error, Result};
use crate::protocol::codec::WireRead;
use crate::protocol::{response, MessageHeader, HEADER_LEN, SIZE_UNKNOWN, SIZE_UNKNOWN_NARROW};
use crate::transport::{PipeStream, ShutdownHandle};
use parking_lot::MutexGuard;
use tracing::trace;

pub(crate) struct ResponseStream<'c> {
    pipe: MutexGuard<'c, PipeStream>,
    shutdown: ShutdownHandle,
    /// Code of the message currently being consumed
    code: u32,
    /// Unread payload bytes of the current message
    remaining: u32,
    /// Size fields are 64-bit in this reply
    wide: bool,
    err: Option<Error>,
}

impl<'c> ResponseStream<'c> {
    /// Read the first header of a reply. A leading error code drains its
    /// payload and surfaces immediately so the byte stream stays
    /// synchronized for the next request.
    pub fn begin(
        mut pipe: MutexGuard<'c, PipeStream>,
        shutdown: ShutdownHandle,
    ) -> Result<Self> {
        let header = read_header(&mut pipe, &shutdown)?;
        trace!(code = header.code, length = header.length, "reply header");
        if !header.is_ok() {
            drain(&mut pipe, &shutdown, header.length)?;
            return Err(header.to_error());
        }
        Ok(Self {
            pipe,
            shutdown,
            code: header.code,
            remaining: header.length,
            wide: false,
            err: None,
        })
    }

    pub fn set_wide(&mut self, wide: bool) {
        self.wide = wide;
    }

    pub fn is_wide(&self) -> bool {
        self.wide
    }

    /// Read one size field at the reply's width, mapping the narrow unknown
    /// sentinel to the wide one
    pub fn read_size(&mut self) -> u64 {
        if self.wide {
            self.read_u64()
        } else {
            match self.read_u32() {
                SIZE_UNKNOWN_NARROW => SIZE_UNKNOWN,
                v => v as u64,
            }
        }
    }

    /// First recorded error, if any
    pub fn error(&self) -> Option<&Error> {
        self.err.as_ref()
    }

    /// Take the recorded error, leaving the stream clean.
    /// The journal loop surfaces errors per record through this.
    pub fn take_error(&mut self) -> Option<Error> {
        self.err.take()
    }

    fn record(&mut self, err: Error) {
        if self.err.is_none() {
            trace!(%err, "stream error recorded");
            self.err = Some(err);
        }
    }

    /// Advance to the next chained message. Returns false when no payload
    /// can follow (final message consumed, or an error was recorded).
    fn advance(&mut self) -> bool {
        if self.err.is_some() {
            return false;
        }
        if self.code == response::OK {
            return false;
        }
        match read_header(&mut self.pipe, &self.shutdown) {
            Ok(header) if header.is_ok() => {
                self.code = header.code;
                self.remaining = header.length;
                true
            }
            Ok(header) => {
                // daemon error mid-chain: drain it so the pipe stays in sync
                let err = header.to_error();
                if let Err(e) = drain(&mut self.pipe, &self.shutdown, header.length) {
                    self.record(e);
                } else {
                    self.record(err);
                }
                self.code = response::OK;
                self.remaining = 0;
                false
            }
            Err(e) => {
                self.record(e);
                false
            }
        }
    }

    /// Copy up to `buf.len()` bytes, stopping without error at the clean end
    /// of the final message. Used by readers that buffer a whole reply.
    pub fn read_up_to(&mut self, buf: &mut [u8]) -> usize {
        let mut copied = 0;
        while copied < buf.len() {
            if self.err.is_some() {
                break;
            }
            if self.remaining == 0 {
                if !self.advance() {
                    break;
                }
                continue;
            }
            let n = (buf.len() - copied).min(self.remaining as usize);
            match self.pipe.read_full(&mut buf[copied..copied + n], &self.shutdown) {
                Ok(()) => {
                    self.remaining -= n as u32;
                    copied += n;
                }
                Err(e) => {
                    let err = Error::from_io(e, self.shutdown.is_signalled());
                    self.record(err);
                    break;
                }
            }
        }
        copied
    }

    /// Consume the rest of the reply and surface the recorded error, if any.
    ///
    /// Every exchange ends here (or in an early hard error) so the next
    /// request starts at a message boundary.
    pub fn finish(mut self) -> Result<()> {
        if let Some(err) = self.err.take() {
            return Err(err);
        }
        loop {
            drain(&mut self.pipe, &self.shutdown, self.remaining)?;
            self.remaining = 0;
            if self.code == response::OK {
                return Ok(());
            }
            let header = read_header(&mut self.pipe, &self.shutdown)?;
            if !header.is_ok() {
                drain(&mut self.pipe, &self.shutdown, header.length)?;
                return Err(header.to_error());
            }
            self.code = header.code;
            self.remaining = header.length;
        }
    }
}

impl WireRead for ResponseStream<'_> {
    fn read_exact_or_zero(&mut self, buf: &mut [u8]) {
        let mut filled = 0;
        while filled < buf.len() {
            if self.err.is_some() {
                break;
            }
            if self.remaining == 0 {
                if self.code == response::OK {
                    // read past the final message: sticky, zero-filled
                    self.record(Error::BadResponse);
                    break;
                }
                if !self.advance() {
                    break;
                }
                continue;
            }
            let n = (buf.len() - filled).min(self.remaining as usize);
            match self.pipe.read_full(&mut buf[filled..filled + n], &self.shutdown) {
                Ok(()) => {
                    self.remaining -= n as u32;
                    filled += n;
                }
                Err(e) => {
                    let err = Error::from_io(e, self.shutdown.is_signalled());
                    self.record(err);
                    break;
                }
            }
        }
        buf[filled..].fill(0);
    }

    fn mark_bad(&mut self) {
        self.record(Error::BadResponse);
    }
}

fn read_header(pipe: &mut PipeStream, shutdown: &ShutdownHandle) -> Result<MessageHeader> {
    let mut bytes = [0u8; HEADER_LEN];
    pipe.read_full(&mut bytes, shutdown)
        .map_err(|e| Error::from_io(e, shutdown.is_signalled()))?;
    Ok(MessageHeader::decode(&bytes))
}

/// Read and discard `len` payload bytes
fn drain(pipe: &mut PipeStream, shutdown: &ShutdownHandle, len: u32) -> Result<()> {
    let mut scratch = [0u8; 512];
    let mut left = len as usize;
    while left > 0 {
        let n = left.min(scratch.len());
        pipe.read_full(&mut scratch[..n], shutdown)
            .map_err(|e| Error::from_io(e, shutdown.is_signalled()))?;
        left -= n;
    }
    Ok(())
}
