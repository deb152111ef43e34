use std::io;
use std::os::unix::io::RawFd;

/// A cross-thread wakeup handle backed by Linux `eventfd(2)`.
///
/// Grounded directly on `Platform::create_event_fd` /
/// `Platform::write_to_fd` / `Platform::read_from_fd` in the source: one
/// `eventfd` in non-blocking, close-on-exec mode. A write of any nonzero
/// value makes the fd readable; a read drains the accumulated counter back
/// to zero and returns it as a single `u64`, so concurrent wakeups coalesce
/// into one readiness notification rather than queuing.
pub(crate) struct Waker {
    fd: RawFd,
}

impl Waker {
    pub(crate) fn new() -> io::Result<Waker> {
        let fd = unsafe { libc::eventfd(0, libc::EFD_NONBLOCK | libc::EFD_CLOEXEC) };
        if fd < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(Waker { fd })
    }

    pub(crate) fn as_raw_fd(&self) -> RawFd {
        self.fd
    }

    /// Writes one token, making the fd readable if it wasn't already.
    pub(crate) fn wake(&self) -> io::Result<()> {
        let buf: u64 = 1;
        let n = unsafe {
            libc::write(self.fd, &buf as *const u64 as *const libc::c_void, 8)
        };
        if n < 0 {
            let err = io::Error::last_os_error();
            // Concurrent wakes can transiently overflow the eventfd counter
            // into EAGAIN; the fd is already readable in that case, so the
            // wakeup has effectively already happened.
            if err.raw_os_error() == Some(libc::EAGAIN) {
                return Ok(());
            }
            return Err(err);
        }
        Ok(())
    }

    /// Drains the accumulated token(s). Called from the loop's own read
    /// callback on its wakeup channel.
    pub(crate) fn drain(&self) -> io::Result<()> {
        let mut buf: u64 = 0;
        let n = unsafe {
            libc::read(self.fd, &mut buf as *mut u64 as *mut libc::c_void, 8)
        };
        if n < 0 {
            let err = io::Error::last_os_error();
            if err.raw_os_error() == Some(libc::EAGAIN) {
                return Ok(());
            }
            return Err(err);
        }
        Ok(())
    }
}

impl Drop for Waker {
    fn drop(&mut self) {
        super::close(self.fd);
    }
}
