use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ScanError {
    #[error("chunk bounds must satisfy 0 <= lower <= upper (got lower {lower}, upper {upper})")]
    ChunkBounds { lower: i64, upper: i64 },
    #[error("port `{0}` is not in the pool, it may have already been removed")]
    PortRemoval(u16),
    #[error("`{0}` uses invalid syntax for a port list")]
    InvalidPortSyntax(String),
    #[error("`{0}` is an invalid port range")]
    InvalidPortRange(String),
    #[error("failed to check target kind (ensure it's a domain or IPv4)")]
    HostParseFailed(#[source] url::ParseError),
    #[error("failed to resolve the given target: {0}")]
    ResolverFailed(#[source] io::Error),
    #[error("resolver didn't find any IPv4 address mapped by `{0}`")]
    DomainLookupFailed(String),
    #[error("only supports IPv4 addresses or domains that map addresses with this IP version")]
    OnlyIpv4TargetSupported,
    #[error("failed to set up socket for port {0}: {1}")]
    SocketSetupFailed(u16, #[source] io::Error),
    #[error("failed to connect to port {0}: {1}")]
    ConnectFailed(u16, #[source] io::Error),
    #[error("failed to inspect connection on port {0}: {1}")]
    InspectFailed(u16, #[source] io::Error),
    #[error("failed to wait for socket readiness: {0}")]
    PollFailed(#[source] io::Error),
}
