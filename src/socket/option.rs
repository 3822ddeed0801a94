//! Typed socket options.
//!
//! Each option type carries its protocol level and option name as const
//! parameters, so `ReuseAddr` and `ReusePort` are distinct types even though
//! both hold a single flag. Values are immutable once built.

use crate::error::{Error, Result};
use std::time::Duration;

/// A socket tunable that can be applied with `setsockopt` and read back with
/// `getsockopt`.
pub trait SockOpt: Sized {
    /// Protocol level (`SOL_SOCKET`, `IPPROTO_TCP`, ...).
    const LEVEL: libc::c_int;
    /// Option name within the level.
    const NAME: libc::c_int;
    /// Layout the OS expects for the value.
    type Raw: Copy;

    fn to_raw(&self) -> Self::Raw;

    fn from_raw(raw: Self::Raw) -> Result<Self>;
}

/// An on/off option, passed to the OS as an `int`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoolOpt<const L: i32, const N: i32> {
    on: bool,
}

impl<const L: i32, const N: i32> BoolOpt<L, N> {
    pub const fn new(on: bool) -> Self {
        Self { on }
    }

    /// Build from an integer flag. Anything but 0 or 1 is rejected.
    pub fn try_from_int(value: i32) -> Result<Self> {
        match value {
            0 => Ok(Self::new(false)),
            1 => Ok(Self::new(true)),
            _ => Err(Error::ProtocolMisuse("boolean option set from a non-boolean value")),
        }
    }

    pub fn enabled(&self) -> bool {
        self.on
    }
}

impl<const L: i32, const N: i32> Default for BoolOpt<L, N> {
    fn default() -> Self {
        Self::new(true)
    }
}

impl<const L: i32, const N: i32> SockOpt for BoolOpt<L, N> {
    const LEVEL: libc::c_int = L;
    const NAME: libc::c_int = N;
    type Raw = libc::c_int;

    fn to_raw(&self) -> libc::c_int {
        self.on as libc::c_int
    }

    // The kernel reports some flags (e.g. SO_REUSEADDR on BSDs) as the
    // option bit rather than 1, so any non-zero value reads as enabled.
    fn from_raw(raw: libc::c_int) -> Result<Self> {
        Ok(Self::new(raw != 0))
    }
}

/// A send/receive timeout, passed to the OS as a `timeval`.
///
/// A zero duration means "block forever" to the OS.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeoutOpt<const L: i32, const N: i32> {
    timeout: Duration,
}

impl<const L: i32, const N: i32> TimeoutOpt<L, N> {
    pub const fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    pub const fn from_secs(secs: u64) -> Self {
        Self::new(Duration::from_secs(secs))
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

impl<const L: i32, const N: i32> SockOpt for TimeoutOpt<L, N> {
    const LEVEL: libc::c_int = L;
    const NAME: libc::c_int = N;
    type Raw = libc::timeval;

    fn to_raw(&self) -> libc::timeval {
        libc::timeval {
            tv_sec: self.timeout.as_secs() as libc::time_t,
            tv_usec: self.timeout.subsec_micros() as libc::suseconds_t,
        }
    }

    fn from_raw(raw: libc::timeval) -> Result<Self> {
        if raw.tv_sec < 0 || raw.tv_usec < 0 {
            return Err(Error::ProtocolMisuse("negative timeout reported by the OS"));
        }
        let timeout =
            Duration::from_secs(raw.tv_sec as u64) + Duration::from_micros(raw.tv_usec as u64);
        Ok(Self::new(timeout))
    }
}

pub type RecvTimeout = TimeoutOpt<{ libc::SOL_SOCKET }, { libc::SO_RCVTIMEO }>;

pub type SendTimeout = TimeoutOpt<{ libc::SOL_SOCKET }, { libc::SO_SNDTIMEO }>;

pub type ReuseAddr = BoolOpt<{ libc::SOL_SOCKET }, { libc::SO_REUSEADDR }>;

pub type ReusePort = BoolOpt<{ libc::SOL_SOCKET }, { libc::SO_REUSEPORT }>;

pub type KeepAlive = BoolOpt<{ libc::SOL_SOCKET }, { libc::SO_KEEPALIVE }>;

pub type Broadcast = BoolOpt<{ libc::SOL_SOCKET }, { libc::SO_BROADCAST }>;

pub type TcpNoDelay = BoolOpt<{ libc::IPPROTO_TCP }, { libc::TCP_NODELAY }>;
