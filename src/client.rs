//! Stream echo client.

use crate::error::{Error, Result};
use crate::socket::{
    create_handle, with_bind, with_reuse, with_timeouts, Address, BoxedStep, ConstBuffer, Handle,
    Kind, MutableBuffer,
};
use tracing::debug;

/// Default receive/send timeout for the client, in seconds.
pub const DEFAULT_TIMEOUT_SECS: i64 = 2;

/// How the client handle is set up before connecting.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Local address to bind before connecting; ephemeral when `None`.
    pub local: Option<Address>,
    pub remote: Address,
    pub reuse_addr: bool,
    pub reuse_port: bool,
    /// Non-positive leaves the timeout unset.
    pub rcv_timeout_secs: i64,
    pub snd_timeout_secs: i64,
    pub buffer_size: usize,
}

impl ClientConfig {
    pub fn new(remote: Address) -> Self {
        Self {
            local: None,
            remote,
            reuse_addr: false,
            reuse_port: false,
            rcv_timeout_secs: DEFAULT_TIMEOUT_SECS,
            snd_timeout_secs: DEFAULT_TIMEOUT_SECS,
            buffer_size: crate::server::DEFAULT_BUFFER_SIZE,
        }
    }
}

/// A connected stream handle that sends a message and reads the reply.
#[derive(Debug)]
pub struct EchoClient {
    handle: Handle,
    buffer: Vec<u8>,
}

impl EchoClient {
    /// Build the handle (reuse options, timeouts, optional bind) and connect.
    pub fn connect(config: &ClientConfig) -> Result<Self> {
        let mut steps: Vec<BoxedStep> = vec![
            with_reuse(config.reuse_addr, config.reuse_port),
            with_timeouts(config.rcv_timeout_secs, config.snd_timeout_secs),
        ];
        if let Some(local) = config.local {
            steps.push(with_bind(local));
        }

        let handle = create_handle(Kind::Stream, steps)?;
        handle.connect(&config.remote)?;
        debug!(remote = %config.remote, "client connected");

        Ok(Self {
            handle,
            buffer: vec![0u8; config.buffer_size.max(1)],
        })
    }

    pub fn local_addr(&self) -> Result<Address> {
        self.handle.local_addr()
    }

    /// Send `msg` and return whatever the first read brings back.
    ///
    /// Sending or receiving zero bytes ends the exchange with
    /// [`Error::PeerClosed`].
    pub fn round_trip(&mut self, msg: &[u8]) -> Result<&[u8]> {
        let sent = self.handle.send(ConstBuffer::new(msg), 0)?;
        if sent == 0 && !msg.is_empty() {
            return Err(Error::PeerClosed("send"));
        }

        let mut buf = MutableBuffer::from(&mut self.buffer);
        let n = self.handle.recv(&mut buf, 0)?;
        if n == 0 {
            return Err(Error::PeerClosed("recv"));
        }
        Ok(&self.buffer[..n])
    }

    pub fn close(&mut self) {
        self.handle.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::{ListenConfig, StreamServer};

    #[test]
    fn test_round_trip_against_server() {
        let mut server = StreamServer::new(ListenConfig::new(Address::localhost(0)));
        server.start().unwrap();

        let config = ClientConfig::new(server.local_addr().unwrap());
        let mut client = EchoClient::connect(&config).unwrap();
        assert_eq!(client.round_trip(b"ping").unwrap(), b"ping");
        assert_eq!(client.round_trip(b"again").unwrap(), b"again");
    }

    #[test]
    fn test_bind_local_port() {
        let mut server = StreamServer::new(ListenConfig::new(Address::localhost(0)));
        server.start().unwrap();

        // Reserve a free local port, then release it for the client.
        let probe = Handle::open(Kind::Stream).unwrap();
        probe.bind(&Address::localhost(0)).unwrap();
        let local = probe.local_addr().unwrap();
        drop(probe);

        let mut config = ClientConfig::new(server.local_addr().unwrap());
        config.local = Some(local);
        config.reuse_addr = true;
        let client = EchoClient::connect(&config).unwrap();
        assert_eq!(client.local_addr().unwrap(), local);
    }

    #[test]
    fn test_server_stop_ends_exchange() {
        let mut server = StreamServer::new(ListenConfig::new(Address::localhost(0)));
        server.start().unwrap();
        let mut client = EchoClient::connect(&ClientConfig::new(server.local_addr().unwrap()))
            .unwrap();
        assert_eq!(client.round_trip(b"1").unwrap(), b"1");

        server.stop();
        let err = client.round_trip(b"2").unwrap_err();
        assert!(matches!(err, Error::PeerClosed(_)) || err.code().is_some());
    }

    #[test]
    fn test_connect_refused() {
        let probe = Handle::open(Kind::Stream).unwrap();
        probe.bind(&Address::localhost(0)).unwrap();
        let addr = probe.local_addr().unwrap();
        drop(probe);

        let err = EchoClient::connect(&ClientConfig::new(addr)).unwrap_err();
        assert!(err.is_os(libc::ECONNREFUSED));
    }
}
