pub(crate) mod addr;
mod selector;
pub(crate) mod tcp;
pub(crate) mod waker;

pub(crate) use selector::Selector;

use std::io;

/// Maps an OS errno to the §4.1 `classify_error` taxonomy.
///
/// `RetryLater` means "stop draining, wait for the next readiness
/// notification"; `Transient` means "this particular syscall attempt failed
/// but the connection is fine, try again right now"; `Fatal` means "the
/// connection is dead, run the close handler".
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) enum ErrorAction {
    RetryLater,
    Transient,
    Fatal,
}

pub(crate) fn classify_error(err: &io::Error) -> ErrorAction {
    match err.raw_os_error() {
        Some(libc::EAGAIN) => ErrorAction::RetryLater,
        #[allow(unreachable_patterns)] // EAGAIN == EWOULDBLOCK on Linux
        Some(libc::EWOULDBLOCK) => ErrorAction::RetryLater,
        Some(libc::EPROTO) | Some(libc::ECONNABORTED) | Some(libc::EINTR) => {
            ErrorAction::Transient
        }
        _ => ErrorAction::Fatal,
    }
}

pub(crate) fn close(fd: std::os::unix::io::RawFd) {
    // Best-effort: a failing close(2) here (almost always EINTR or EBADF on
    // an already-closed fd) has no actionable recovery.
    unsafe {
        let _ = libc::close(fd);
    }
}

pub(crate) fn set_non_blocking(fd: std::os::unix::io::RawFd) -> io::Result<()> {
    unsafe {
        let flags = libc::fcntl(fd, libc::F_GETFL, 0);
        if flags < 0 {
            return Err(io::Error::last_os_error());
        }
        if libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) < 0 {
            return Err(io::Error::last_os_error());
        }
    }
    Ok(())
}
