use std::{
    collections::{BTreeMap, HashMap, HashSet},
    fmt::Display,
    net::Ipv4Addr,
    os::fd::RawFd,
    thread,
    time::{Duration, Instant},
};

use rand::{rngs::StdRng, SeedableRng};

use crate::{
    chunk::{Chunker, CHUNK_SIZE_LOWER_LIMIT, CHUNK_SIZE_UPPER_LIMIT},
    error::ScanError,
    port::HIGHEST_PORT,
    resolver,
};

pub use self::{
    poller::SystemNetwork,
    probe::{ConnectStatus, PeerStatus, PendingError, TcpProbe},
};

mod poller;
mod probe;

/// Time budget given to each poll of a chunk.
pub const INTERVAL_TIME: Duration = Duration::from_millis(110);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PortState {
    /// Not classified yet. Never left in the results of a finished run.
    Unknown,
    Open,
    Closed,
    Filtered,
}

impl PortState {
    #[inline]
    pub fn is_final(self) -> bool {
        matches!(self, PortState::Open | PortState::Closed)
    }
}

impl Display for PortState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}",
            match self {
                PortState::Unknown => "unknown",
                PortState::Open => "open",
                PortState::Closed => "closed",
                PortState::Filtered => "filtered",
            }
        )
    }
}

/// Key the multiplexer knows a probe by.
pub type Handle = RawFd;

/// One outbound connection attempt.
pub trait Probe {
    fn handle(&self) -> Handle;

    fn port(&self) -> u16;

    /// Classifies the attempt once its handle was reported ready. After a
    /// final state was returned it is returned again without touching the socket.
    fn analyze(&mut self) -> Result<PortState, ScanError>;

    /// Releases the socket. Calling it more than once is harmless.
    fn close(&mut self);
}

/// Source of probes and the readiness multiplexer that waits on them.
pub trait Network {
    type Probe: Probe;

    fn probe(&mut self, ip: Ipv4Addr, port: u16) -> Result<Self::Probe, ScanError>;

    /// Blocks for at most `timeout` until some of `handles` are writable and
    /// returns those.
    fn wait_writable(
        &mut self,
        handles: &[Handle],
        timeout: Duration,
    ) -> Result<Vec<Handle>, ScanError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanConfig {
    pub interval: Duration,
    pub chunk_lower: i64,
    pub chunk_upper: i64,
    pub highest_port: u16,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            interval: INTERVAL_TIME,
            chunk_lower: CHUNK_SIZE_LOWER_LIMIT,
            chunk_upper: CHUNK_SIZE_UPPER_LIMIT,
            highest_port: HIGHEST_PORT,
        }
    }
}

pub struct Scanner<N = SystemNetwork> {
    ip: Ipv4Addr,
    ports: Vec<i64>,
    config: ScanConfig,
    network: N,
    rng: StdRng,
    results: BTreeMap<u16, PortState>,
}

impl Scanner<SystemNetwork> {
    /// Resolves `host` up front, failing before anything is probed.
    pub fn new(host: &str, ports: Vec<i64>) -> Result<Self, ScanError> {
        let ip = resolver::lookup(host)?;

        Ok(Self::with_network(
            ip,
            ports,
            SystemNetwork,
            StdRng::from_entropy(),
        ))
    }
}

impl<N: Network> Scanner<N> {
    pub fn with_network(ip: Ipv4Addr, ports: Vec<i64>, network: N, rng: StdRng) -> Self {
        Self {
            ip,
            ports,
            config: ScanConfig::default(),
            network,
            rng,
            results: BTreeMap::new(),
        }
    }

    pub fn config(mut self, config: ScanConfig) -> Self {
        self.config = config;
        self
    }

    #[inline]
    pub fn address(&self) -> Ipv4Addr {
        self.ip
    }

    #[inline]
    pub fn ports(&self) -> &[i64] {
        &self.ports
    }

    #[inline]
    pub fn results(&self) -> &BTreeMap<u16, PortState> {
        &self.results
    }

    #[inline]
    pub fn network(&self) -> &N {
        &self.network
    }

    pub fn clear(&mut self) {
        self.results.clear();
    }

    /// Starts a probe for every port of `chunk` that doesn't have a final
    /// state yet. Filtered ports are tried again.
    pub fn launch_probes(&mut self, chunk: &[u16]) -> Result<HashMap<Handle, N::Probe>, ScanError> {
        let mut probes = HashMap::with_capacity(chunk.len());

        for &port in chunk {
            if self.results.get(&port).is_some_and(|state| state.is_final()) {
                continue;
            }

            let probe = self.network.probe(self.ip, port)?;
            log::trace!("Launched probe for port {} on handle {}", port, probe.handle());
            probes.insert(probe.handle(), probe);
        }

        Ok(probes)
    }

    /// Probes `chunk` and spends exactly `budget` doing it: waiting on the
    /// probes while some are pending, then sleeping out whatever is left.
    /// Probes still pending when the budget runs out are recorded as filtered.
    pub fn poll(&mut self, chunk: &[u16], budget: Duration) -> Result<(), ScanError> {
        let deadline = Instant::now() + budget;
        let mut probes = self.launch_probes(chunk)?;
        let mut pending: HashSet<Handle> = probes.keys().copied().collect();

        let mut remaining = budget;
        while !remaining.is_zero() && !pending.is_empty() {
            let handles: Vec<Handle> = pending.iter().copied().collect();
            let ready = self.network.wait_writable(&handles, remaining)?;
            remaining = deadline.saturating_duration_since(Instant::now());

            for handle in ready {
                if !pending.remove(&handle) {
                    continue;
                }
                let Some(probe) = probes.get_mut(&handle) else {
                    continue;
                };

                let state = match probe.analyze()? {
                    PortState::Unknown => {
                        log::debug!(
                            "Port {} woke up without a verdict, counting it as filtered",
                            probe.port()
                        );
                        PortState::Filtered
                    }
                    state => state,
                };
                log::trace!("Port {} is {}", probe.port(), state);

                self.results.insert(probe.port(), state);
                probe.close();
            }
        }

        for handle in pending {
            if let Some(probe) = probes.get_mut(&handle) {
                log::debug!("Port {} didn't answer in time", probe.port());
                self.results.insert(probe.port(), PortState::Filtered);
                probe.close();
            }
        }

        let remaining = deadline.saturating_duration_since(Instant::now());
        if !remaining.is_zero() {
            thread::sleep(remaining);
        }

        Ok(())
    }

    /// Clears previous results and scans every port, chunk by chunk. Each
    /// chunk is polled twice, the second time in reverse order so the ports
    /// launched last get a full budget as well.
    pub fn run(&mut self, interval: Duration) -> Result<&BTreeMap<u16, PortState>, ScanError> {
        self.clear();

        let ScanConfig {
            chunk_lower,
            chunk_upper,
            highest_port,
            ..
        } = self.config;

        let rng = StdRng::from_rng(&mut self.rng).unwrap_or_else(|_| StdRng::from_entropy());
        let mut chunker = Chunker::with_limit(self.ports.iter().copied(), highest_port, rng);

        while let Some(chunk) = chunker.get_chunk(chunk_lower, chunk_upper)? {
            self.poll(&chunk, interval)?;

            let reversed: Vec<u16> = chunk.iter().rev().copied().collect();
            self.poll(&reversed, interval)?;
        }

        log::debug!(
            "Scan of `{}` finished with {} ports classified",
            self.ip,
            self.results.len()
        );

        Ok(&self.results)
    }

    /// Runs with the interval stored in the scanner's config.
    pub fn run_with_config(&mut self) -> Result<&BTreeMap<u16, PortState>, ScanError> {
        let interval = self.config.interval;
        self.run(interval)
    }
}
