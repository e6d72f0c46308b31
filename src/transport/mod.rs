//! Connection ownership, endpoint naming, and request serialization.
//!
//! One [`Connection`] owns one pipe. All requests on it are strictly
//! serialized: the connection mutex is held from the first header byte of a
//! request until the last byte of its reply has been consumed. A
//! [`ShutdownHandle`] can be signalled from any thread at any time; it is
//! sticky, aborts the operation currently blocked on the pipe, and fails
//! every later operation fast.

#[cfg(unix)]
#[path = "pipe_unix.rs"]
mod pipe;
#[cfg(windows)]
#[path = "pipe_windows.rs"]
mod pipe;

pub(crate) use pipe::PipeStream;

use crate::error::{Error, Result};
use crate::protocol::stream::ResponseStream;
use crate::protocol::MessageHeader;
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::debug;

/// Fixed first component of every endpoint name
const ENDPOINT_PREFIX: &str = "fsd";

/// Bounded retry while the endpoint reports busy
const CONNECT_RETRIES: u32 = 20;
const CONNECT_RETRY_DELAY: Duration = Duration::from_millis(50);

#[derive(Debug)]
struct ShutdownState {
    flag: AtomicBool,
    aborter: Mutex<Option<pipe::PipeAbort>>,
}

/// Cloneable, cross-thread shutdown signal for one connection
#[derive(Clone, Debug)]
pub struct ShutdownHandle(Arc<ShutdownState>);

impl ShutdownHandle {
    fn new() -> Self {
        Self(Arc::new(ShutdownState {
            flag: AtomicBool::new(false),
            aborter: Mutex::new(None),
        }))
    }

    /// Signal shutdown. Idempotent; callable from any thread. Any operation
    /// currently blocked on the pipe is aborted and returns
    /// [`Error::Shutdown`] promptly.
    pub fn shutdown(&self) {
        if !self.0.flag.swap(true, Ordering::SeqCst) {
            debug!("shutdown signalled");
        }
        if let Some(aborter) = self.0.aborter.lock().as_ref() {
            aborter.abort();
        }
    }

    pub fn is_signalled(&self) -> bool {
        self.0.flag.load(Ordering::SeqCst)
    }
}

/// Percent-escape an instance qualifier: `%`, `:` and path separators become
/// `%` plus two uppercase hex digits
fn escape_instance(instance: &str) -> String {
    let mut out = String::with_capacity(instance.len());
    for ch in instance.chars() {
        match ch {
            '%' | ':' | '/' | '\\' => {
                out.push('%');
                out.push_str(&format!("{:02X}", ch as u32));
            }
            _ => out.push(ch),
        }
    }
    out
}

/// Build the endpoint name: fixed prefix, plus a parenthesized escaped
/// instance qualifier when one is given
fn endpoint_name(instance: Option<&str>) -> String {
    match instance {
        None | Some("") => ENDPOINT_PREFIX.to_string(),
        Some(inst) => format!("{} ({})", ENDPOINT_PREFIX, escape_instance(inst)),
    }
}

/// One pipe connection to the daemon
#[derive(Debug)]
pub(crate) struct Connection {
    pipe: Mutex<PipeStream>,
    shutdown: ShutdownHandle,
}

impl Connection {
    /// Connect to the daemon instance, retrying while the endpoint is busy.
    /// Any other connect failure maps to [`Error::NotFound`].
    pub fn connect(instance: Option<&str>) -> Result<Self> {
        let path = pipe::endpoint_path(&endpoint_name(instance));
        Self::connect_path(&path)
    }

    /// Connect to an explicit endpoint path
    pub fn connect_path(path: &Path) -> Result<Self> {
        debug!(path = %path.display(), "connecting");
        let mut attempt = 0;
        let stream = loop {
            match PipeStream::connect(path) {
                Ok(s) => break s,
                Err(e) if pipe::is_busy(&e) && attempt < CONNECT_RETRIES => {
                    attempt += 1;
                    std::thread::sleep(CONNECT_RETRY_DELAY);
                }
                Err(_) => return Err(Error::NotFound),
            }
        };

        let shutdown = ShutdownHandle::new();
        if let Ok(aborter) = stream.abort_handle() {
            *shutdown.0.aborter.lock() = Some(aborter);
        }
        Ok(Self { pipe: Mutex::new(stream), shutdown })
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.shutdown.clone()
    }

    /// Send one framed request and return the reply stream.
    ///
    /// The connection mutex is taken here and travels inside the returned
    /// stream, so no other request can start until the reply is finished.
    pub fn exchange(&self, code: u32, payload: &[u8]) -> Result<ResponseStream<'_>> {
        if self.shutdown.is_signalled() {
            return Err(Error::Shutdown);
        }
        let mut guard = self.pipe.lock();
        debug!(code, payload_len = payload.len(), "request");

        let header = MessageHeader { code, length: payload.len() as u32 };
        let shutdown = self.shutdown.clone();
        guard
            .write_full(&header.encode(), &shutdown)
            .map_err(|e| Error::from_io(e, shutdown.is_signalled()))?;
        guard
            .write_full(payload, &shutdown)
            .map_err(|e| Error::from_io(e, shutdown.is_signalled()))?;

        ResponseStream::begin(guard, shutdown)
    }
}

/// Resolve the endpoint path an instance name maps to (diagnostics and tests)
pub fn resolve_endpoint(instance: Option<&str>) -> PathBuf {
    pipe::endpoint_path(&endpoint_name(instance))
}
