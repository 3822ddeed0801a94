//! IPv4 endpoint addresses.
//!
//! The port is exposed in host byte order; conversion to the wire layout
//! (`sockaddr_in`, network byte order) happens in [`Address::as_raw`] and in
//! the `socket2::SockAddr` conversion used by the handle.

use crate::error::{Error, Result};
use socket2::SockAddr;
use std::fmt;
use std::mem;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};

/// Host used when an address is built without one.
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// A network endpoint: family, port and IPv4 address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Address {
    inner: SocketAddrV4,
}

impl Default for Address {
    /// `0.0.0.0:0`, the all-zero address.
    fn default() -> Self {
        Self {
            inner: SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 0),
        }
    }
}

impl Address {
    /// Build an address from a port and a dotted-decimal IPv4 literal.
    pub fn v4(port: u16, ip: &str) -> Result<Self> {
        let mut addr = Address::default();
        addr.set_port(port);
        addr.set_ip(ip)?;
        Ok(addr)
    }

    /// `127.0.0.1:<port>`.
    pub fn localhost(port: u16) -> Self {
        Self {
            inner: SocketAddrV4::new(Ipv4Addr::LOCALHOST, port),
        }
    }

    /// Address family, always `AF_INET`.
    pub fn family(&self) -> i32 {
        libc::AF_INET
    }

    pub fn port(&self) -> u16 {
        self.inner.port()
    }

    pub fn set_port(&mut self, port: u16) {
        self.inner.set_port(port);
    }

    pub fn ip(&self) -> Ipv4Addr {
        *self.inner.ip()
    }

    /// Replace the IP from a dotted-decimal literal.
    pub fn set_ip(&mut self, ip: &str) -> Result<()> {
        let parsed: Ipv4Addr = ip
            .trim()
            .parse()
            .map_err(|_| Error::InvalidAddress(ip.to_string()))?;
        self.inner.set_ip(parsed);
        Ok(())
    }

    /// Wire layout of this address. Every byte not set explicitly is zero.
    pub fn as_raw(&self) -> libc::sockaddr_in {
        // SAFETY: sockaddr_in is plain old data; the all-zero pattern is valid.
        let mut raw: libc::sockaddr_in = unsafe { mem::zeroed() };
        #[cfg(any(target_os = "macos", target_os = "ios", target_os = "freebsd"))]
        {
            raw.sin_len = mem::size_of::<libc::sockaddr_in>() as u8;
        }
        raw.sin_family = libc::AF_INET as libc::sa_family_t;
        raw.sin_port = self.port().to_be();
        raw.sin_addr = libc::in_addr {
            s_addr: u32::from_ne_bytes(self.ip().octets()),
        };
        raw
    }

    /// Read an address back from its wire layout.
    pub fn from_raw(raw: &libc::sockaddr_in) -> Self {
        let ip = Ipv4Addr::from(raw.sin_addr.s_addr.to_ne_bytes());
        Self {
            inner: SocketAddrV4::new(ip, u16::from_be(raw.sin_port)),
        }
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.ip(), self.port())
    }
}

impl From<SocketAddrV4> for Address {
    fn from(inner: SocketAddrV4) -> Self {
        Self { inner }
    }
}

impl From<Address> for SocketAddrV4 {
    fn from(addr: Address) -> Self {
        addr.inner
    }
}

impl From<Address> for SockAddr {
    fn from(addr: Address) -> Self {
        SockAddr::from(addr.inner)
    }
}

impl TryFrom<&SockAddr> for Address {
    type Error = Error;

    fn try_from(addr: &SockAddr) -> Result<Self> {
        match addr.as_socket() {
            Some(SocketAddr::V4(v4)) => Ok(v4.into()),
            _ => Err(Error::ProtocolMisuse("peer address is not IPv4")),
        }
    }
}
