use std::{
    io,
    net::{Ipv4Addr, SocketAddr, SocketAddrV4},
    os::fd::AsRawFd,
    time::Duration,
};

use socket2::{Domain, Protocol, SockAddr, Socket, Type};

use crate::error::ScanError;

use super::{Handle, PortState, Probe};

/// Windows family stacks report `EINVAL` for a connect that is still going.
const INVALID_ARGUMENT_PENDING: bool = cfg!(windows);

/// Outcome of a non-blocking connect call.
#[derive(Debug)]
pub enum ConnectStatus {
    Connected,
    InProgress,
    Already,
    WouldBlock,
    InvalidArgument(io::Error),
    Fault(io::Error),
}

impl ConnectStatus {
    /// Turns the status into an error unless the attempt connected or is
    /// still under way.
    pub fn into_result(self) -> io::Result<()> {
        match self {
            ConnectStatus::Connected
            | ConnectStatus::InProgress
            | ConnectStatus::Already
            | ConnectStatus::WouldBlock => Ok(()),
            ConnectStatus::InvalidArgument(_) if INVALID_ARGUMENT_PENDING => Ok(()),
            ConnectStatus::InvalidArgument(e) | ConnectStatus::Fault(e) => Err(e),
        }
    }
}

impl From<io::Result<()>> for ConnectStatus {
    fn from(res: io::Result<()>) -> Self {
        let Err(e) = res else {
            return ConnectStatus::Connected;
        };

        match e.raw_os_error() {
            Some(libc::EISCONN) => ConnectStatus::Connected,
            Some(libc::EINPROGRESS) => ConnectStatus::InProgress,
            Some(libc::EALREADY) => ConnectStatus::Already,
            Some(libc::EWOULDBLOCK) => ConnectStatus::WouldBlock,
            Some(libc::EINVAL) => ConnectStatus::InvalidArgument(e),
            _ => ConnectStatus::Fault(e),
        }
    }
}

/// Error left on the socket once the connect attempt resolved.
#[derive(Debug)]
pub enum PendingError {
    Clear,
    TimedOut,
    Refused,
    Other(io::Error),
}

impl From<Option<io::Error>> for PendingError {
    fn from(err: Option<io::Error>) -> Self {
        let Some(e) = err else {
            return PendingError::Clear;
        };

        match e.raw_os_error() {
            Some(libc::ETIMEDOUT) => PendingError::TimedOut,
            Some(libc::ECONNREFUSED) => PendingError::Refused,
            _ => PendingError::Other(e),
        }
    }
}

/// What asking for the remote address of a socket without a pending error said.
#[derive(Debug)]
pub enum PeerStatus {
    Connected,
    NotConnected,
    /// The peer accepted and then reset the connection right away.
    Reset,
    Fault(io::Error),
}

impl<T> From<io::Result<T>> for PeerStatus {
    fn from(res: io::Result<T>) -> Self {
        let Err(e) = res else {
            return PeerStatus::Connected;
        };

        match e.raw_os_error() {
            Some(libc::ENOTCONN) => PeerStatus::NotConnected,
            Some(libc::EINVAL) => PeerStatus::Reset,
            _ => PeerStatus::Fault(e),
        }
    }
}

/// Maps the socket's pending error, and the peer lookup when there is none,
/// into a port state. Only calls `peer` for a clear socket.
pub fn classify<F, T>(
    port: u16,
    pending: PendingError,
    peer: F,
) -> Result<PortState, ScanError>
where
    F: FnOnce() -> io::Result<T>,
{
    let state = match pending {
        PendingError::Clear => match PeerStatus::from(peer()) {
            PeerStatus::Connected => PortState::Open,
            PeerStatus::NotConnected => PortState::Unknown,
            // Accepted then torn down, best effort guess.
            PeerStatus::Reset => PortState::Open,
            PeerStatus::Fault(e) => return Err(ScanError::InspectFailed(port, e)),
        },
        PendingError::TimedOut => PortState::Filtered,
        PendingError::Refused => PortState::Closed,
        PendingError::Other(e) => {
            log::debug!("Port {} reported unclassified error: {}", port, e);
            PortState::Unknown
        }
    };

    Ok(state)
}

/// Non-blocking TCP connect to a single port that resets on close.
#[derive(Debug)]
pub struct TcpProbe {
    socket: Option<Socket>,
    handle: Handle,
    port: u16,
    state: PortState,
}

impl TcpProbe {
    pub fn connect(ip: Ipv4Addr, port: u16) -> Result<Self, ScanError> {
        let setup_err = |e| ScanError::SocketSetupFailed(port, e);

        let socket = Socket::new(Domain::IPV4, Type::STREAM, Some(Protocol::TCP))
            .map_err(setup_err)?;
        socket.set_nonblocking(true).map_err(setup_err)?;
        // Zero linger makes close send RST instead of FIN.
        socket
            .set_linger(Some(Duration::ZERO))
            .map_err(setup_err)?;

        let addr = SockAddr::from(SocketAddr::V4(SocketAddrV4::new(ip, port)));
        ConnectStatus::from(socket.connect(&addr))
            .into_result()
            .map_err(|e| ScanError::ConnectFailed(port, e))?;

        Ok(Self {
            handle: socket.as_raw_fd(),
            socket: Some(socket),
            port,
            state: PortState::Unknown,
        })
    }

    #[inline]
    pub fn is_closed(&self) -> bool {
        self.socket.is_none()
    }
}

impl Probe for TcpProbe {
    #[inline]
    fn handle(&self) -> Handle {
        self.handle
    }

    #[inline]
    fn port(&self) -> u16 {
        self.port
    }

    fn analyze(&mut self) -> Result<PortState, ScanError> {
        if self.state != PortState::Unknown {
            return Ok(self.state);
        }

        let Some(socket) = self.socket.as_ref() else {
            return Ok(self.state);
        };

        let pending = socket
            .take_error()
            .map_err(|e| ScanError::InspectFailed(self.port, e))?;
        self.state = classify(self.port, PendingError::from(pending), || {
            socket.peer_addr()
        })?;

        Ok(self.state)
    }

    fn close(&mut self) {
        // Dropping the socket closes it.
        self.socket.take();
    }
}
