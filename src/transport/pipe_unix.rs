//! Unix transport: a Unix-domain socket stands in for the daemon's named pipe.
//!
//! Reads and writes run with a short socket timeout so a blocked operation
//! re-checks the shutdown flag at a bounded interval; `shutdown()` also
//! half-closes the socket from the signalling thread, which wakes a blocked
//! peer immediately rather than at the next poll tick.

use std::io::{self, Read, Write};
use std::net::Shutdown as SocketShutdown;
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::transport::ShutdownHandle;

/// How often a blocked read or write re-checks the shutdown flag
const POLL_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Debug)]
pub(crate) struct PipeStream {
    stream: UnixStream,
}

/// Cloned socket handle used to abort a blocked peer from another thread
#[derive(Debug)]
pub(crate) struct PipeAbort {
    stream: UnixStream,
}

impl PipeAbort {
    pub fn abort(&self) {
        let _ = self.stream.shutdown(SocketShutdown::Both);
    }
}

impl PipeStream {
    pub fn connect(path: &Path) -> io::Result<Self> {
        let stream = UnixStream::connect(path)?;
        stream.set_read_timeout(Some(POLL_INTERVAL))?;
        stream.set_write_timeout(Some(POLL_INTERVAL))?;
        Ok(Self { stream })
    }

    pub fn abort_handle(&self) -> io::Result<PipeAbort> {
        Ok(PipeAbort { stream: self.stream.try_clone()? })
    }

    /// Fill `buf` completely, racing the shutdown flag
    pub fn read_full(&mut self, buf: &mut [u8], shutdown: &ShutdownHandle) -> io::Result<()> {
        let mut done = 0;
        while done < buf.len() {
            if shutdown.is_signalled() {
                return Err(shutdown_err());
            }
            match self.stream.read(&mut buf[done..]) {
                Ok(0) => {
                    return Err(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "connection closed mid-message",
                    ));
                }
                Ok(n) => done += n,
                Err(e) if is_poll_tick(&e) => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    /// Write `buf` completely, racing the shutdown flag
    pub fn write_full(&mut self, buf: &[u8], shutdown: &ShutdownHandle) -> io::Result<()> {
        let mut done = 0;
        while done < buf.len() {
            if shutdown.is_signalled() {
                return Err(shutdown_err());
            }
            match self.stream.write(&buf[done..]) {
                Ok(0) => {
                    return Err(io::Error::new(io::ErrorKind::WriteZero, "pipe closed"));
                }
                Ok(n) => done += n,
                Err(e) if is_poll_tick(&e) => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }
}

fn is_poll_tick(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut | io::ErrorKind::Interrupted
    )
}

fn shutdown_err() -> io::Error {
    io::Error::new(io::ErrorKind::Interrupted, "shutdown signalled")
}

/// True for connect failures worth a bounded retry (endpoint exists but is
/// briefly unable to accept)
pub(crate) fn is_busy(e: &io::Error) -> bool {
    matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::ResourceBusy)
        || e.raw_os_error() == Some(libc::EAGAIN)
}

/// Resolve an endpoint name to a socket path, preferring the per-user
/// runtime directory
pub(crate) fn endpoint_path(endpoint: &str) -> PathBuf {
    if let Ok(runtime_dir) = std::env::var("XDG_RUNTIME_DIR") {
        return PathBuf::from(runtime_dir).join(format!("{endpoint}.sock"));
    }

    if let Some(home) = dirs::home_dir() {
        return home.join(".local").join("run").join(format!("{endpoint}.sock"));
    }

    let uid = unsafe { libc::getuid() };
    PathBuf::from(format!("/tmp/{endpoint}-{uid}.sock"))
}
