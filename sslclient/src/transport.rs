use core::fmt;
use std::io::{self, Read, Write};
use std::net::{IpAddr, SocketAddr, TcpStream, ToSocketAddrs};
use std::time::Duration;

use pki_types::ServerName;

use crate::error::Error;
#[allow(unused_imports)]
use crate::log::{debug, trace};

/// The byte-stream capability a [`Connection`](crate::Connection) runs over.
///
/// Implementations are expected to be non-blocking, or to apply their own
/// short internal timeout: the pump polls `available()` and never relies on
/// `read()` blocking until data arrives.
pub trait Transport {
    /// Opens a connection to `host:port`.
    fn connect(&mut self, host: &Host, port: u16) -> io::Result<()>;

    /// Whether the transport is still open.
    fn connected(&self) -> bool;

    /// Bytes that can be read without waiting.  Zero means none yet.
    fn available(&mut self) -> io::Result<usize>;

    /// Reads up to `buf.len()` bytes.
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Writes some prefix of `buf`, returning how much was taken.
    fn write(&mut self, buf: &[u8]) -> io::Result<usize>;

    /// Pushes out anything the transport itself is buffering.
    fn flush(&mut self) -> io::Result<()>;

    /// Closes the transport.  Calling this on a closed transport does nothing.
    fn stop(&mut self);

    /// Bounds individual blocking operations on the transport.
    fn set_timeout(&mut self, timeout: Duration);
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn connect(&mut self, host: &Host, port: u16) -> io::Result<()> {
        (**self).connect(host, port)
    }

    fn connected(&self) -> bool {
        (**self).connected()
    }

    fn available(&mut self) -> io::Result<usize> {
        (**self).available()
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        (**self).read(buf)
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        (**self).write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        (**self).flush()
    }

    fn stop(&mut self) {
        (**self).stop()
    }

    fn set_timeout(&mut self, timeout: Duration) {
        (**self).set_timeout(timeout)
    }
}

impl<T: Transport + ?Sized> Transport for &mut T {
    fn connect(&mut self, host: &Host, port: u16) -> io::Result<()> {
        (**self).connect(host, port)
    }

    fn connected(&self) -> bool {
        (**self).connected()
    }

    fn available(&mut self) -> io::Result<usize> {
        (**self).available()
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        (**self).read(buf)
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        (**self).write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        (**self).flush()
    }

    fn stop(&mut self) {
        (**self).stop()
    }

    fn set_timeout(&mut self, timeout: Duration) {
        (**self).set_timeout(timeout)
    }
}

/// A DNS host name we will connect to.
///
/// Between 1 and 253 bytes, with no NUL and no whitespace.  No other
/// syntax is enforced here; certificate name checks happen during
/// verification.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct HostName(String);

impl HostName {
    /// The longest host name we accept.
    pub const MAX_LEN: usize = 253;

    /// Returns the name as a `&str`.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<&str> for HostName {
    type Error = Error;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        if value.is_empty()
            || value.len() > Self::MAX_LEN
            || value
                .bytes()
                .any(|b| b == 0 || b.is_ascii_whitespace())
        {
            return Err(Error::InvalidHostName);
        }
        Ok(Self(value.to_owned()))
    }
}

impl TryFrom<String> for HostName {
    type Error = Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::try_from(value.as_str())
    }
}

impl fmt::Debug for HostName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.0)
    }
}

impl fmt::Display for HostName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A connection target: a host name or an IP address.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Host {
    /// A name, resolved by the transport.
    Name(HostName),
    /// A literal address.
    Ip(IpAddr),
}

impl Host {
    /// The name sent in SNI and matched against the certificate.
    ///
    /// Returns `None` for names that are not valid DNS names; such
    /// targets are connected without SNI and fail name verification.
    pub fn server_name(&self) -> Option<ServerName<'static>> {
        match self {
            Self::Name(name) => ServerName::try_from(name.as_str())
                .ok()
                .map(|n| n.to_owned()),
            Self::Ip(ip) => Some(ServerName::IpAddress((*ip).into())),
        }
    }

    /// The host name, if this target is a name.
    pub fn dns_name(&self) -> Option<&str> {
        match self {
            Self::Name(name) => Some(name.as_str()),
            Self::Ip(_) => None,
        }
    }
}

impl TryFrom<&str> for Host {
    type Error = Error;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value.parse::<IpAddr>() {
            Ok(ip) => Ok(Self::Ip(ip)),
            Err(_) => HostName::try_from(value).map(Self::Name),
        }
    }
}

impl From<IpAddr> for Host {
    fn from(ip: IpAddr) -> Self {
        Self::Ip(ip)
    }
}

impl fmt::Display for Host {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Name(name) => name.fmt(f),
            Self::Ip(ip) => ip.fmt(f),
        }
    }
}

/// Well-known ports whose services speak TLS from the first byte.
pub const SECURE_PORTS: [u16; 26] = [
    443,  // HTTPS
    465,  // SMTP
    563,  // NNTP
    636,  // LDAPS
    695,  // IEEE-MMS-SSL
    832,  // NETCONF
    853,  // DNS
    989,  // FTPS data
    990,  // FTPS
    992,  // Telnet
    993,  // IMAP
    995,  // POP3
    4116, // Smartcard
    4843, // OPC UA
    5061, // SIP
    5085, // LLIP
    5349, // STUN/TURN
    5671, // AMQP
    5986, // WinRM-HTTPS
    6513, // NETCONF
    6514, // Syslog
    6515, // Elipse RPC
    6619, // OFTP
    8243, // Apache Synapse
    8403, // GxFWD
    8883, // MQTT
];

/// Whether a connection to `port` should default to TLS.
pub fn is_secure_port(port: u16) -> bool {
    SECURE_PORTS.contains(&port)
}

/// A [`Transport`] over `std::net::TcpStream`.
#[derive(Debug)]
pub struct TcpTransport {
    stream: Option<TcpStream>,
    timeout: Duration,
}

impl TcpTransport {
    /// A disconnected transport with a 15 second operation timeout.
    pub fn new() -> Self {
        Self {
            stream: None,
            timeout: Duration::from_secs(15),
        }
    }

    /// Wraps an already-connected stream.
    pub fn from_stream(stream: TcpStream) -> Self {
        Self {
            stream: Some(stream),
            timeout: Duration::from_secs(15),
        }
    }

    fn stream(&mut self) -> io::Result<&mut TcpStream> {
        self.stream
            .as_mut()
            .ok_or_else(|| io::Error::from(io::ErrorKind::NotConnected))
    }

    fn addrs(&self) -> Option<(SocketAddr, SocketAddr)> {
        let stream = self.stream.as_ref()?;
        Some((stream.local_addr().ok()?, stream.peer_addr().ok()?))
    }
}

impl Default for TcpTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl PartialEq for TcpTransport {
    /// Two transports are the same socket if both ends match.
    fn eq(&self, other: &Self) -> bool {
        match (self.addrs(), other.addrs()) {
            (Some(a), Some(b)) => a == b,
            _ => false,
        }
    }
}

impl Transport for TcpTransport {
    fn connect(&mut self, host: &Host, port: u16) -> io::Result<()> {
        self.stop();
        let addrs: Vec<SocketAddr> = match host {
            Host::Ip(ip) => vec![SocketAddr::new(*ip, port)],
            Host::Name(name) => (name.as_str(), port)
                .to_socket_addrs()?
                .collect(),
        };

        let mut last_err = io::Error::from(io::ErrorKind::AddrNotAvailable);
        for addr in addrs {
            trace!("tcp connect to {}", addr);
            match TcpStream::connect_timeout(&addr, self.timeout) {
                Ok(stream) => {
                    stream.set_nodelay(true)?;
                    stream.set_read_timeout(Some(self.timeout))?;
                    stream.set_write_timeout(Some(self.timeout))?;
                    self.stream = Some(stream);
                    return Ok(());
                }
                Err(err) => last_err = err,
            }
        }
        debug!("tcp connect to {}:{} failed: {}", host, port, last_err);
        Err(last_err)
    }

    fn connected(&self) -> bool {
        self.stream.is_some()
    }

    fn available(&mut self) -> io::Result<usize> {
        let mut probe = [0u8; 2048];
        let stream = self.stream()?;
        stream.set_nonblocking(true)?;
        let peeked = stream.peek(&mut probe);
        stream.set_nonblocking(false)?;
        match peeked {
            Ok(0) => {
                // orderly shutdown from the peer
                self.stream = None;
                Ok(0)
            }
            Ok(n) => Ok(n),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(0),
            Err(e) => Err(e),
        }
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.stream()?.read(buf)
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.stream()?.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.stream()?.flush()
    }

    fn stop(&mut self) {
        if let Some(stream) = self.stream.take() {
            let _ = stream.shutdown(std::net::Shutdown::Both);
        }
    }

    fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
        if let Some(stream) = &self.stream {
            let _ = stream.set_read_timeout(Some(timeout));
            let _ = stream.set_write_timeout(Some(timeout));
        }
    }
}
