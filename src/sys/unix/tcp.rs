use std::io;
use std::mem;
use std::net::SocketAddr;
use std::os::unix::io::RawFd;
use std::time::Duration;

use crate::types::{ProtocolStack, SocketOption};

/// Raw socket/bind/listen/accept/connect primitives for TCP over IPv4/IPv6,
/// grounded on `platform_api_for_linux.cc`'s `listen`, `accept`, `connect`
/// and `shut_wr` free functions. Every socket this module hands back is
/// already non-blocking and close-on-exec; callers register it with a
/// [`super::Selector`](crate::sys::Selector) rather than calling any of
/// these functions again on the same fd except [`shutdown_write`] and
/// [`take_error`].
pub(crate) fn listen(
    addr: SocketAddr,
    backlog: i32,
    stack: ProtocolStack,
    options: SocketOption,
) -> io::Result<RawFd> {
    let fd = new_stream_socket(addr)?;

    if addr.is_ipv6() {
        set_ipv6_only(fd, stack == ProtocolStack::IPv6Only)?;
    }
    if options.contains(SocketOption::REUSE_ADDR) {
        set_reuseaddr(fd)?;
    }
    if options.contains(SocketOption::REUSE_PORT) {
        set_reuseport(fd)?;
    }
    super::set_non_blocking(fd)?;

    let (raw_addr, raw_len) = socket_addr_to_storage(addr);
    let res = unsafe { libc::bind(fd, &raw_addr as *const _ as *const libc::sockaddr, raw_len) };
    if res < 0 {
        let err = io::Error::last_os_error();
        super::close(fd);
        return Err(err);
    }

    let res = unsafe { libc::listen(fd, backlog) };
    if res < 0 {
        let err = io::Error::last_os_error();
        super::close(fd);
        return Err(err);
    }

    Ok(fd)
}

/// Accepts as many pending connections as are currently queued, the way the
/// source's acceptor drains `accept4` in a loop until it sees `EAGAIN`.
/// Stops and returns what it has so far on any other error, leaving the
/// listening fd itself untouched (the acceptor's channel stays registered).
pub(crate) fn accept_many(listen_fd: RawFd, max: usize) -> io::Result<Vec<(RawFd, SocketAddr)>> {
    let mut accepted = Vec::new();
    loop {
        if accepted.len() >= max {
            break;
        }
        let mut storage: libc::sockaddr_storage = unsafe { mem::zeroed() };
        let mut len = mem::size_of::<libc::sockaddr_storage>() as libc::socklen_t;

        let fd = unsafe {
            libc::accept4(
                listen_fd,
                &mut storage as *mut _ as *mut libc::sockaddr,
                &mut len,
                libc::SOCK_NONBLOCK | libc::SOCK_CLOEXEC,
            )
        };

        if fd < 0 {
            let err = io::Error::last_os_error();
            match super::classify_error(&err) {
                super::ErrorAction::RetryLater => break,
                super::ErrorAction::Transient => continue,
                super::ErrorAction::Fatal => return Err(err),
            }
        }

        match storage_to_socket_addr(&storage) {
            Some(peer) => accepted.push((fd, peer)),
            None => super::close(fd),
        }
    }
    Ok(accepted)
}

/// Starts a non-blocking connect. Returns `Ok(fd)` immediately whether the
/// connection completed synchronously or is still in progress
/// (`EINPROGRESS`) — callers register the fd for write-readiness and use
/// [`take_error`] once it fires, mirroring the source's async connect path.
pub(crate) fn connect(addr: SocketAddr) -> io::Result<RawFd> {
    let fd = new_stream_socket(addr)?;
    super::set_non_blocking(fd)?;

    let (raw_addr, raw_len) = socket_addr_to_storage(addr);
    let res = unsafe { libc::connect(fd, &raw_addr as *const _ as *const libc::sockaddr, raw_len) };
    if res < 0 {
        let err = io::Error::last_os_error();
        if err.raw_os_error() != Some(libc::EINPROGRESS) {
            super::close(fd);
            return Err(err);
        }
    }
    Ok(fd)
}

/// Blocking connect with a fixed timeout, used by the synchronous connector
/// entry point. Grounded on the source's `select()`-based blocking variant
/// of `Platform::connect`.
pub(crate) fn connect_blocking(addr: SocketAddr, timeout: Duration) -> io::Result<RawFd> {
    let fd = connect(addr)?;

    let mut write_set: libc::fd_set = unsafe { mem::zeroed() };
    unsafe { libc::FD_ZERO(&mut write_set) };
    unsafe { libc::FD_SET(fd, &mut write_set) };

    let mut tv = libc::timeval {
        tv_sec: timeout.as_secs() as libc::time_t,
        tv_usec: timeout.subsec_micros() as libc::suseconds_t,
    };

    let res = unsafe {
        libc::select(
            fd + 1,
            std::ptr::null_mut(),
            &mut write_set,
            std::ptr::null_mut(),
            &mut tv,
        )
    };

    if res <= 0 {
        super::close(fd);
        return Err(if res == 0 {
            io::Error::new(io::ErrorKind::TimedOut, "connect timed out")
        } else {
            io::Error::last_os_error()
        });
    }

    match take_error(fd)? {
        Some(err) => {
            super::close(fd);
            Err(err)
        }
        None => Ok(fd),
    }
}

pub(crate) fn local_addr(fd: RawFd) -> io::Result<SocketAddr> {
    let mut storage: libc::sockaddr_storage = unsafe { mem::zeroed() };
    let mut len = mem::size_of::<libc::sockaddr_storage>() as libc::socklen_t;
    let res = unsafe { libc::getsockname(fd, &mut storage as *mut _ as *mut libc::sockaddr, &mut len) };
    if res < 0 {
        return Err(io::Error::last_os_error());
    }
    storage_to_socket_addr(&storage)
        .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "unsupported address family"))
}

pub(crate) fn shutdown_write(fd: RawFd) -> io::Result<()> {
    let res = unsafe { libc::shutdown(fd, libc::SHUT_WR) };
    if res < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// Reads and clears `SO_ERROR`, the way the source samples pending errors
/// after a write-ready event fires during an in-progress connect.
pub(crate) fn take_error(fd: RawFd) -> io::Result<Option<io::Error>> {
    let mut err: libc::c_int = 0;
    let mut len = mem::size_of::<libc::c_int>() as libc::socklen_t;
    let res = unsafe {
        libc::getsockopt(
            fd,
            libc::SOL_SOCKET,
            libc::SO_ERROR,
            &mut err as *mut _ as *mut libc::c_void,
            &mut len,
        )
    };
    if res < 0 {
        return Err(io::Error::last_os_error());
    }
    if err == 0 {
        Ok(None)
    } else {
        Ok(Some(io::Error::from_raw_os_error(err)))
    }
}

pub(crate) fn read_from_fd(fd: RawFd, buf: &mut [u8]) -> io::Result<usize> {
    let n = unsafe { libc::read(fd, buf.as_mut_ptr() as *mut libc::c_void, buf.len()) };
    if n < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(n as usize)
}

pub(crate) fn write_to_fd(fd: RawFd, buf: &[u8]) -> io::Result<usize> {
    let n = unsafe { libc::write(fd, buf.as_ptr() as *const libc::c_void, buf.len()) };
    if n < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(n as usize)
}

fn new_stream_socket(addr: SocketAddr) -> io::Result<RawFd> {
    let domain = if addr.is_ipv6() {
        libc::AF_INET6
    } else {
        libc::AF_INET
    };
    let fd = unsafe { libc::socket(domain, libc::SOCK_STREAM | libc::SOCK_CLOEXEC, 0) };
    if fd < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(fd)
}

fn set_reuseaddr(fd: RawFd) -> io::Result<()> {
    set_bool_opt(fd, libc::SO_REUSEADDR)
}

fn set_reuseport(fd: RawFd) -> io::Result<()> {
    set_bool_opt(fd, libc::SO_REUSEPORT)
}

fn set_ipv6_only(fd: RawFd, only: bool) -> io::Result<()> {
    let value: libc::c_int = if only { 1 } else { 0 };
    let res = unsafe {
        libc::setsockopt(
            fd,
            libc::IPPROTO_IPV6,
            libc::IPV6_V6ONLY,
            &value as *const _ as *const libc::c_void,
            mem::size_of::<libc::c_int>() as libc::socklen_t,
        )
    };
    if res < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

fn set_bool_opt(fd: RawFd, opt: libc::c_int) -> io::Result<()> {
    let value: libc::c_int = 1;
    let res = unsafe {
        libc::setsockopt(
            fd,
            libc::SOL_SOCKET,
            opt,
            &value as *const _ as *const libc::c_void,
            mem::size_of::<libc::c_int>() as libc::socklen_t,
        )
    };
    if res < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

fn socket_addr_to_storage(addr: SocketAddr) -> (libc::sockaddr_storage, libc::socklen_t) {
    let mut storage: libc::sockaddr_storage = unsafe { mem::zeroed() };
    let len = match addr {
        SocketAddr::V4(v4) => {
            let raw = libc::sockaddr_in {
                sin_family: libc::AF_INET as libc::sa_family_t,
                sin_port: v4.port().to_be(),
                sin_addr: libc::in_addr {
                    s_addr: u32::from_ne_bytes(v4.ip().octets()),
                },
                sin_zero: [0; 8],
            };
            unsafe {
                std::ptr::write(&mut storage as *mut _ as *mut libc::sockaddr_in, raw);
            }
            mem::size_of::<libc::sockaddr_in>() as libc::socklen_t
        }
        SocketAddr::V6(v6) => {
            let raw = libc::sockaddr_in6 {
                sin6_family: libc::AF_INET6 as libc::sa_family_t,
                sin6_port: v6.port().to_be(),
                sin6_flowinfo: v6.flowinfo(),
                sin6_addr: libc::in6_addr {
                    s6_addr: v6.ip().octets(),
                },
                sin6_scope_id: v6.scope_id(),
            };
            unsafe {
                std::ptr::write(&mut storage as *mut _ as *mut libc::sockaddr_in6, raw);
            }
            mem::size_of::<libc::sockaddr_in6>() as libc::socklen_t
        }
    };
    (storage, len)
}

fn storage_to_socket_addr(storage: &libc::sockaddr_storage) -> Option<SocketAddr> {
    match storage.ss_family as libc::c_int {
        libc::AF_INET => {
            let raw = unsafe { &*(storage as *const _ as *const libc::sockaddr_in) };
            let ip = std::net::Ipv4Addr::from(raw.sin_addr.s_addr.to_ne_bytes());
            let port = u16::from_be(raw.sin_port);
            Some(SocketAddr::new(std::net::IpAddr::V4(ip), port))
        }
        libc::AF_INET6 => {
            let raw = unsafe { &*(storage as *const _ as *const libc::sockaddr_in6) };
            let ip = std::net::Ipv6Addr::from(raw.sin6_addr.s6_addr);
            let port = u16::from_be(raw.sin6_port);
            Some(SocketAddr::new(std::net::IpAddr::V6(ip), port))
        }
        _ => None,
    }
}

/// Takes ownership of a raw listening/connection fd as a `std::net::TcpStream`
/// value purely for `Drop`-based cleanup when a caller needs RAII semantics
/// around a single syscall sequence (e.g. tests). The reactor's own
/// `Connection`/`Acceptor` types manage fd lifetime themselves and never go
/// through this helper.
#[cfg(test)]
pub(crate) unsafe fn owned_stream(fd: RawFd) -> std::net::TcpStream {
    use std::os::unix::io::FromRawFd;
    std::net::TcpStream::from_raw_fd(fd)
}
