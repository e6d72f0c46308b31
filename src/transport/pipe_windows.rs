//! Windows transport: the daemon's named pipe opened as a file handle.
//!
//! Named-pipe handles opened through `std::fs` have no read timeout, so a
//! shutdown cancels the in-flight operation with `CancelIoEx` from the
//! signalling thread; the flag is also re-checked before every I/O call so
//! an operation issued after the signal fails fast.

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Write};
use std::os::windows::io::AsRawHandle;
use std::path::{Path, PathBuf};

use windows_sys::Win32::System::IO::CancelIoEx;

use crate::transport::ShutdownHandle;

/// ERROR_PIPE_BUSY: all pipe instances are in use, retry shortly
const ERROR_PIPE_BUSY: i32 = 231;

#[derive(Debug)]
pub(crate) struct PipeStream {
    handle: File,
}

/// Duplicated pipe handle used to cancel a blocked peer from another thread.
/// Both handles refer to the same file object, so cancellation reaches I/O
/// issued on the original.
#[derive(Debug)]
pub(crate) struct PipeAbort {
    handle: File,
}

impl PipeAbort {
    pub fn abort(&self) {
        unsafe {
            CancelIoEx(self.handle.as_raw_handle() as _, std::ptr::null());
        }
    }
}

impl PipeStream {
    pub fn connect(path: &Path) -> io::Result<Self> {
        let handle = OpenOptions::new().read(true).write(true).open(path)?;
        Ok(Self { handle })
    }

    pub fn abort_handle(&self) -> io::Result<PipeAbort> {
        Ok(PipeAbort { handle: self.handle.try_clone()? })
    }

    pub fn read_full(&mut self, buf: &mut [u8], shutdown: &ShutdownHandle) -> io::Result<()> {
        let mut done = 0;
        while done < buf.len() {
            if shutdown.is_signalled() {
                return Err(shutdown_err());
            }
            match self.handle.read(&mut buf[done..]) {
                Ok(0) => {
                    return Err(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "pipe closed mid-message",
                    ));
                }
                Ok(n) => done += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    pub fn write_full(&mut self, buf: &[u8], shutdown: &ShutdownHandle) -> io::Result<()> {
        let mut done = 0;
        while done < buf.len() {
            if shutdown.is_signalled() {
                return Err(shutdown_err());
            }
            match self.handle.write(&buf[done..]) {
                Ok(0) => return Err(io::Error::new(io::ErrorKind::WriteZero, "pipe closed")),
                Ok(n) => done += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }
}

fn shutdown_err() -> io::Error {
    io::Error::new(io::ErrorKind::Interrupted, "shutdown signalled")
}

pub(crate) fn is_busy(e: &io::Error) -> bool {
    e.raw_os_error() == Some(ERROR_PIPE_BUSY)
}

pub(crate) fn endpoint_path(endpoint: &str) -> PathBuf {
    PathBuf::from(format!(r"\\.\pipe\{endpoint}"))
}
