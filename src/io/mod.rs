//! File-descriptor level IO abstraction (`spec.md` §4.3 "IO").
//!
//! Grounded in `examples/original_source/src/utils/iosystem.h`: a thin wrapper
//! around an OS file descriptor with an explicit inheritance flag, a pipe
//! constructor and a listening-socket constructor, plus an RAII guard that
//! temporarily swaps the process's own stdio for the purpose of relaying a
//! debuggee's IO through a different channel.

pub mod redirect;
pub mod stream_buffer;

pub use redirect::IoRedirect;

use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};

use nix::fcntl::{fcntl, FcntlArg, FdFlag};
use nix::unistd::{close, dup, dup2, pipe};

use crate::error::{DebuggerError, Result};

fn to_result<T>(r: std::result::Result<T, nix::Error>) -> Result<T> {
    r.map_err(|e| DebuggerError::runtime_failure(0x8000_0020, format!("OS error: {e}")))
}

/// A single, owned OS file descriptor.
pub struct FileHandle(OwnedFd);

impl FileHandle {
    fn from_owned(fd: OwnedFd) -> Self {
        FileHandle(fd)
    }

    pub fn raw(&self) -> RawFd {
        self.0.as_raw_fd()
    }

    /// Creates an anonymous pipe, returning `(read_end, write_end)`.
    pub fn unnamed_pipe() -> Result<(FileHandle, FileHandle)> {
        let (read_fd, write_fd) = to_result(pipe())?;
        Ok((FileHandle::from_owned(read_fd), FileHandle::from_owned(write_fd)))
    }

    /// Binds and listens on `port` on all interfaces, for the `--server`
    /// launch mode (`spec.md` §6 `--server[=port]`).
    pub fn listen_socket(port: u16) -> Result<FileHandle> {
        use nix::sys::socket::{
            bind, listen, socket, AddressFamily, Backlog, SockFlag, SockType, SockaddrIn,
        };
        let fd = to_result(socket(
            AddressFamily::Inet,
            SockType::Stream,
            SockFlag::empty(),
            None,
        ))?;
        let addr = SockaddrIn::new(0, 0, 0, 0, port);
        to_result(bind(fd.as_raw_fd(), &addr))?;
        to_result(listen(&fd, Backlog::new(1).unwrap()))?;
        Ok(FileHandle::from_owned(fd))
    }

    /// Dups stdin (0), stdout (1) and stderr (2) of the current process.
    pub fn get_std_files() -> Result<(FileHandle, FileHandle, FileHandle)> {
        let dup_fd = |fd: RawFd| -> Result<FileHandle> {
            let owned = to_result(dup(fd))?;
            Ok(FileHandle::from_owned(unsafe { OwnedFd::from_raw_fd(owned) }))
        };
        Ok((dup_fd(0)?, dup_fd(1)?, dup_fd(2)?))
    }

    /// Sets whether this descriptor survives an `exec` in a child process.
    pub fn set_inherit(&self, inherit: bool) -> Result<()> {
        let mut flags = to_result(fcntl(self.raw(), FcntlArg::F_GETFD))
            .map(FdFlag::from_bits_truncate)?;
        flags.set(FdFlag::FD_CLOEXEC, !inherit);
        to_result(fcntl(self.raw(), FcntlArg::F_SETFD(flags)))?;
        Ok(())
    }
}

/// RAII guard: swaps one of the process's own standard descriptors (0, 1 or
/// 2) for `replacement` and restores the original on drop. Used when a CLI
/// dialect session temporarily wants its own stdio to talk to a remote
/// control channel instead of the terminal (`spec.md` §6 `--server`).
pub struct StdIOSwap {
    target_fd: RawFd,
    saved: OwnedFd,
}

impl StdIOSwap {
    pub fn install(target_fd: RawFd, replacement: &FileHandle) -> Result<Self> {
        let saved = to_result(dup(target_fd))?;
        to_result(dup2(replacement.raw(), target_fd))?;
        Ok(StdIOSwap { target_fd, saved })
    }
}

impl Drop for StdIOSwap {
    fn drop(&mut self) {
        let _ = dup2(self.saved.as_raw_fd(), self.target_fd);
        let _ = close(self.saved.as_raw_fd());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};
    use std::os::unix::io::FromRawFd;

    #[test]
    fn unnamed_pipe_roundtrips_bytes() {
        let (read_end, write_end) = FileHandle::unnamed_pipe().unwrap();
        let mut writer = unsafe { std::fs::File::from_raw_fd(nix::unistd::dup(write_end.raw()).unwrap()) };
        let mut reader = unsafe { std::fs::File::from_raw_fd(nix::unistd::dup(read_end.raw()).unwrap()) };
        writer.write_all(b"ping").unwrap();
        drop(writer);

        let mut buf = [0u8; 4];
        reader.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"ping");
    }

    #[test]
    fn set_inherit_toggles_cloexec() {
        let (read_end, _write_end) = FileHandle::unnamed_pipe().unwrap();
        read_end.set_inherit(true).unwrap();
        let flags = FdFlag::from_bits_truncate(fcntl(read_end.raw(), FcntlArg::F_GETFD).unwrap());
        assert!(!flags.contains(FdFlag::FD_CLOEXEC));

        read_end.set_inherit(false).unwrap();
        let flags = FdFlag::from_bits_truncate(fcntl(read_end.raw(), FcntlArg::F_GETFD).unwrap());
        assert!(flags.contains(FdFlag::FD_CLOEXEC));
    }
}
