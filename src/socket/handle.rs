//! Exclusive-ownership socket handle.
//!
//! A [`Handle`] owns at most one OS socket. It starts out invalid, becomes
//! valid on [`Handle::open`], and becomes invalid again when it is closed,
//! taken from, or detached. The descriptor is closed exactly once: by
//! [`Handle::close`], by assignment over a valid handle, or on drop.
//!
//! Fallible primitives come in two forms. The `*_code` form never fails and
//! reports through an [`ErrorCode`] out-parameter; the plain form wraps it
//! and returns [`Error::System`] on failure.
//!
//! I/O methods take `&self`, so a handle shared between threads can be
//! interrupted with [`Handle::shutdown`] while another thread is blocked in
//! `accept`/`recv`. The descriptor stays allocated until the owner drops the
//! handle, so a blocked thread never observes a recycled descriptor number.

use crate::error::{Error, ErrorCode, Result};
use crate::socket::addr::Address;
use crate::socket::buffer::{ConstBuffer, MutableBuffer};
use crate::socket::option::SockOpt;
use socket2::{Domain, Protocol, SockAddr, Socket, Type};
use std::io;
use std::mem::{self, MaybeUninit};
use std::net::Shutdown;
use std::os::unix::io::{AsRawFd, FromRawFd, IntoRawFd, RawFd};
use tracing::{trace, warn};

/// Default depth of the pending-connection queue.
pub const LISTEN_BACKLOG_DEFAULT: i32 = 64;

/// Transport kind of a socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    /// Connection-oriented byte stream (TCP).
    Stream,
    /// Connectionless datagrams (UDP).
    Datagram,
}

impl Kind {
    fn socket_type(self) -> Type {
        match self {
            Kind::Stream => Type::STREAM,
            Kind::Datagram => Type::DGRAM,
        }
    }
}

/// Move-only owner of one OS socket.
#[derive(Debug, Default)]
pub struct Handle {
    socket: Option<Socket>,
}

impl Handle {
    /// An invalid handle that owns nothing.
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a new IPv4 socket of the given kind with the default protocol.
    pub fn open(kind: Kind) -> Result<Self> {
        let mut handle = Handle::new();
        handle.open_with(kind, None, Domain::IPV4)?;
        Ok(handle)
    }

    /// Open a socket into this handle, closing whatever it held before.
    pub fn open_code(
        &mut self,
        ec: &mut ErrorCode,
        kind: Kind,
        protocol: Option<Protocol>,
        domain: Domain,
    ) {
        self.close();
        match Socket::new(domain, kind.socket_type(), protocol) {
            Ok(socket) => {
                trace!(fd = socket.as_raw_fd(), ?kind, "socket opened");
                self.socket = Some(socket);
            }
            Err(e) => ec.assign(&e),
        }
    }

    pub fn open_with(
        &mut self,
        kind: Kind,
        protocol: Option<Protocol>,
        domain: Domain,
    ) -> Result<()> {
        let mut ec = ErrorCode::default();
        self.open_code(&mut ec, kind, protocol, domain);
        ec.check("socket")
    }

    /// Whether the handle currently owns a socket.
    pub fn is_open(&self) -> bool {
        self.socket.is_some()
    }

    pub fn raw_fd(&self) -> Option<RawFd> {
        self.socket.as_ref().map(|s| s.as_raw_fd())
    }

    /// Move the owned socket out, leaving this handle invalid.
    pub fn take(&mut self) -> Handle {
        mem::take(self)
    }

    /// Give up ownership of the descriptor without closing it.
    ///
    /// Returns `None` if the handle was invalid.
    pub fn into_raw(mut self) -> Option<RawFd> {
        self.socket.take().map(IntoRawFd::into_raw_fd)
    }

    /// Adopt a raw descriptor. Negative values give an invalid handle.
    ///
    /// # Safety
    /// `fd` must be an open socket that nothing else will close.
    pub unsafe fn from_raw(fd: RawFd) -> Handle {
        if fd < 0 {
            return Handle::new();
        }
        Handle {
            socket: Some(Socket::from_raw_fd(fd)),
        }
    }

    /// Release the socket. Closing an invalid handle does nothing.
    pub fn close(&mut self) {
        if let Some(socket) = self.socket.take() {
            trace!(fd = socket.as_raw_fd(), "socket closed");
            drop(socket);
        }
    }

    /// Shut down both directions without releasing the descriptor.
    ///
    /// Wakes any thread blocked in `accept`, `recv` or `recv_from` on this
    /// handle; those calls then fail or report zero bytes. `ENOTCONN` from
    /// unconnected sockets is not an error here since the wakeup still
    /// happens.
    pub fn shutdown(&self) -> Result<()> {
        let Some(socket) = self.socket.as_ref() else {
            return Ok(());
        };
        match socket.shutdown(Shutdown::Both) {
            Err(e) if e.raw_os_error() != Some(libc::ENOTCONN) => {
                Err(Error::system("shutdown", &e))
            }
            _ => Ok(()),
        }
    }

    pub fn bind_code(&self, ec: &mut ErrorCode, addr: &Address) {
        self.code_op(ec, |s| s.bind(&SockAddr::from(*addr)));
    }

    /// Associate the handle with a local address.
    pub fn bind(&self, addr: &Address) -> Result<()> {
        self.require_open()?;
        let mut ec = ErrorCode::default();
        self.bind_code(&mut ec, addr);
        ec.check("bind")
    }

    pub fn listen_code(&self, ec: &mut ErrorCode, backlog: i32) {
        self.code_op(ec, |s| s.listen(backlog));
    }

    /// Start accepting connections on a bound stream handle.
    pub fn listen(&self, backlog: i32) -> Result<()> {
        self.require_open()?;
        let mut ec = ErrorCode::default();
        self.listen_code(&mut ec, backlog);
        ec.check("listen")
    }

    /// Block until a connection arrives and move it into `client`.
    ///
    /// Returns `false` once the listening handle is closed or shut down, or
    /// on any other accept failure; that is the normal end of an accept
    /// loop, not an exceptional condition.
    pub fn accept(&self, client: &mut Handle, peer: Option<&mut Address>) -> bool {
        let Some(socket) = self.socket.as_ref() else {
            return false;
        };
        loop {
            match socket.accept() {
                Ok((conn, addr)) => {
                    if let Some(peer) = peer {
                        if let Ok(addr) = Address::try_from(&addr) {
                            *peer = addr;
                        }
                    }
                    *client = Handle { socket: Some(conn) };
                    return true;
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) if is_shutdown_wakeup(&e) => {
                    trace!(error = %e, "accept interrupted by shutdown");
                    return false;
                }
                Err(e) => {
                    warn!(error = %e, "accept failed");
                    return false;
                }
            }
        }
    }

    pub fn connect_code(&self, ec: &mut ErrorCode, addr: &Address) {
        self.code_op(ec, |s| s.connect(&SockAddr::from(*addr)));
    }

    /// Connect a stream handle, or fix the default peer of a datagram handle.
    pub fn connect(&self, addr: &Address) -> Result<()> {
        self.require_open()?;
        let mut ec = ErrorCode::default();
        self.connect_code(&mut ec, addr);
        ec.check("connect")
    }

    pub fn set_opt_code<O: SockOpt>(&self, ec: &mut ErrorCode, opt: &O) {
        let Some(fd) = self.raw_fd() else {
            *ec = ErrorCode::from_raw(libc::EBADF);
            return;
        };
        let raw = opt.to_raw();
        // SAFETY: `raw` lives for the duration of the call and the length
        // passed matches its layout.
        let rc = unsafe {
            libc::setsockopt(
                fd,
                O::LEVEL,
                O::NAME,
                &raw as *const O::Raw as *const libc::c_void,
                mem::size_of::<O::Raw>() as libc::socklen_t,
            )
        };
        if rc < 0 {
            *ec = ErrorCode::last_os_error();
        }
    }

    /// Apply one option object.
    pub fn set_opt<O: SockOpt>(&self, opt: &O) -> Result<()> {
        self.require_open()?;
        let mut ec = ErrorCode::default();
        self.set_opt_code(&mut ec, opt);
        ec.check("setsockopt")
    }

    /// Read an option back from the OS.
    pub fn get_opt<O: SockOpt>(&self) -> Result<O> {
        let fd = self.require_open()?.as_raw_fd();
        let mut raw = MaybeUninit::<O::Raw>::zeroed();
        let mut len = mem::size_of::<O::Raw>() as libc::socklen_t;
        // SAFETY: `raw` is writable for `len` bytes and `len` is updated by
        // the kernel to the number of bytes actually written.
        let rc = unsafe {
            libc::getsockopt(
                fd,
                O::LEVEL,
                O::NAME,
                raw.as_mut_ptr() as *mut libc::c_void,
                &mut len,
            )
        };
        if rc < 0 {
            return Err(Error::system("getsockopt", &io::Error::last_os_error()));
        }
        // SAFETY: zero-initialized above, and the raw option types are plain
        // integers/structs for which any bit pattern is valid.
        O::from_raw(unsafe { raw.assume_init() })
    }

    pub fn local_addr(&self) -> Result<Address> {
        let addr = self
            .require_open()?
            .local_addr()
            .map_err(|e| Error::system("getsockname", &e))?;
        Address::try_from(&addr)
    }

    pub fn peer_addr(&self) -> Result<Address> {
        let addr = self
            .require_open()?
            .peer_addr()
            .map_err(|e| Error::system("getpeername", &e))?;
        Address::try_from(&addr)
    }

    /// Send on a connected handle. `Ok(0)` means nothing could be sent.
    pub fn send(&self, buf: ConstBuffer<'_>, flags: i32) -> Result<usize> {
        self.require_open()?
            .send_with_flags(&buf, flags)
            .map_err(|e| Error::system("send", &e))
    }

    /// Send the whole buffer, resuming after partial sends.
    pub fn send_all(&self, mut buf: ConstBuffer<'_>, flags: i32) -> Result<()> {
        while !buf.is_empty() {
            match self.send(buf, flags) {
                Ok(0) => return Err(Error::PeerClosed("send")),
                Ok(n) => buf = buf.advance(n),
                Err(e) if e.is_os(libc::EINTR) => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    /// Receive into `buf`. `Ok(0)` is an orderly shutdown by the peer (or a
    /// local [`Handle::shutdown`]).
    pub fn recv(&self, buf: &mut MutableBuffer<'_>, flags: i32) -> Result<usize> {
        self.require_open()?
            .recv_with_flags(buf.as_uninit(), flags)
            .map_err(|e| Error::system("recv", &e))
    }

    /// Send one datagram to `peer`.
    pub fn send_to(&self, buf: ConstBuffer<'_>, peer: &Address, flags: i32) -> Result<usize> {
        self.require_open()?
            .send_to_with_flags(&buf, &SockAddr::from(*peer), flags)
            .map_err(|e| Error::system("sendto", &e))
    }

    /// Receive one datagram and report where it came from.
    ///
    /// `peer` is left untouched when the OS reports no source address, which
    /// is the case when the receive was ended by [`Handle::shutdown`].
    pub fn recv_from(
        &self,
        buf: &mut MutableBuffer<'_>,
        peer: &mut Address,
        flags: i32,
    ) -> Result<usize> {
        let (n, addr) = self
            .require_open()?
            .recv_from_with_flags(buf.as_uninit(), flags)
            .map_err(|e| Error::system("recvfrom", &e))?;
        if let Ok(addr) = Address::try_from(&addr) {
            *peer = addr;
        }
        Ok(n)
    }

    fn require_open(&self) -> Result<&Socket> {
        self.socket
            .as_ref()
            .ok_or(Error::ProtocolMisuse("handle is not open"))
    }

    fn code_op(&self, ec: &mut ErrorCode, op: impl FnOnce(&Socket) -> io::Result<()>) {
        match self.socket.as_ref() {
            Some(socket) => {
                if let Err(e) = op(socket) {
                    ec.assign(&e);
                }
            }
            None => *ec = ErrorCode::from_raw(libc::EBADF),
        }
    }
}

/// `accept` on a listener that was shut down fails with `EINVAL`, or with
/// `EBADF` once the descriptor is gone.
fn is_shutdown_wakeup(err: &io::Error) -> bool {
    matches!(err.raw_os_error(), Some(libc::EINVAL) | Some(libc::EBADF))
}

impl Drop for Handle {
    fn drop(&mut self) {
        self.close();
    }
}
