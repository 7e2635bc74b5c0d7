use std::{
    collections::{BTreeSet, HashMap},
    io,
    net::{Ipv4Addr, TcpListener},
    thread,
    time::{Duration, Instant},
};

use chunkscan::{
    error::ScanError,
    scan::{Handle, Network, PortState, Probe, ScanConfig, Scanner, SystemNetwork},
};
use rand::{rngs::StdRng, seq::IteratorRandom, SeedableRng};

const TARGET: Ipv4Addr = Ipv4Addr::new(192, 0, 2, 1);

/// What the fake host does with a connection attempt to `port`.
fn verdict(port: u16) -> Option<PortState> {
    match port % 3 {
        0 => Some(PortState::Open),
        1 => Some(PortState::Closed),
        _ => None,
    }
}

struct MockProbe {
    handle: Handle,
    port: u16,
    verdict: PortState,
    analyzed: usize,
}

impl Probe for MockProbe {
    fn handle(&self) -> Handle {
        self.handle
    }

    fn port(&self) -> u16 {
        self.port
    }

    fn analyze(&mut self) -> Result<PortState, ScanError> {
        self.analyzed += 1;
        Ok(self.verdict)
    }

    fn close(&mut self) {}
}

#[derive(Default)]
struct MockNetwork {
    next_handle: Handle,
    answering: HashMap<Handle, u16>,
    launched: Vec<u16>,
    /// Every answering probe is reported ready but says nothing useful.
    mute: bool,
    failing_port: Option<u16>,
}

impl Network for MockNetwork {
    type Probe = MockProbe;

    fn probe(&mut self, _ip: Ipv4Addr, port: u16) -> Result<MockProbe, ScanError> {
        if self.failing_port == Some(port) {
            return Err(ScanError::ConnectFailed(
                port,
                io::Error::from_raw_os_error(libc::EMFILE),
            ));
        }

        self.next_handle += 1;
        self.launched.push(port);

        let state = verdict(port);
        if state.is_some() {
            self.answering.insert(self.next_handle, port);
        }

        Ok(MockProbe {
            handle: self.next_handle,
            port,
            verdict: match state {
                Some(_) if self.mute => PortState::Unknown,
                Some(state) => state,
                None => PortState::Unknown,
            },
            analyzed: 0,
        })
    }

    fn wait_writable(
        &mut self,
        handles: &[Handle],
        timeout: Duration,
    ) -> Result<Vec<Handle>, ScanError> {
        // Answer a few at a time so the scanner has to come back for more.
        let ready: Vec<Handle> = handles
            .iter()
            .copied()
            .filter(|h| self.answering.contains_key(h))
            .take(3)
            .collect();

        if ready.is_empty() {
            thread::sleep(timeout);
        } else {
            thread::sleep(timeout.min(Duration::from_millis(1)));
        }

        Ok(ready)
    }
}

fn mock_scanner(ports: Vec<i64>) -> Scanner<MockNetwork> {
    Scanner::with_network(
        TARGET,
        ports,
        MockNetwork::default(),
        StdRng::seed_from_u64(42),
    )
}

#[test]
fn unresolvable_host_fails_before_scanning() {
    assert!(matches!(
        Scanner::new("bad host", vec![80]),
        Err(ScanError::HostParseFailed(_))
    ));
}

#[test]
fn run_classifies_every_port() {
    let mut rng = StdRng::seed_from_u64(7);
    let ports: Vec<i64> = (1..=65335).choose_multiple(&mut rng, 100);

    let mut scanner = mock_scanner(ports.clone());
    let results = scanner.run(Duration::from_millis(5)).unwrap();

    assert_eq!(results.len(), 100);
    for port in ports {
        let port = port as u16;
        let expected = verdict(port).unwrap_or(PortState::Filtered);
        assert_eq!(results.get(&port), Some(&expected), "port {}", port);
    }
    assert!(results.values().all(|s| *s != PortState::Unknown));
}

#[test]
fn poll_spends_the_whole_budget() {
    let budget = Duration::from_millis(100);

    for chunk in [
        // All of them answer right away.
        vec![3, 6, 9, 12, 15, 18],
        // None of them answer.
        vec![2, 5, 8, 11, 14, 17],
        // Mixed.
        (1..=20).collect(),
    ] {
        let mut scanner = mock_scanner(Vec::new());

        let start = Instant::now();
        scanner.poll(&chunk, budget).unwrap();
        let elapsed = start.elapsed();

        assert!(elapsed >= budget, "took {:?}", elapsed);
        assert!(elapsed <= budget + Duration::from_millis(30), "took {:?}", elapsed);
        assert!(chunk.iter().all(|p| scanner.results().contains_key(p)));
    }
}

#[test]
fn poll_records_silent_ports_as_filtered() {
    let mut scanner = mock_scanner(Vec::new());
    scanner.poll(&[2, 3, 4], Duration::from_millis(10)).unwrap();

    assert_eq!(scanner.results().get(&2), Some(&PortState::Filtered));
    assert_eq!(scanner.results().get(&3), Some(&PortState::Open));
    assert_eq!(scanner.results().get(&4), Some(&PortState::Closed));
}

#[test]
fn wake_without_verdict_counts_as_filtered() {
    let mut scanner = Scanner::with_network(
        TARGET,
        Vec::new(),
        MockNetwork {
            mute: true,
            ..Default::default()
        },
        StdRng::seed_from_u64(1),
    );
    scanner.poll(&[3, 4], Duration::from_millis(10)).unwrap();

    assert_eq!(scanner.results().get(&3), Some(&PortState::Filtered));
    assert_eq!(scanner.results().get(&4), Some(&PortState::Filtered));
}

#[test]
fn launch_skips_final_ports_but_retries_filtered() {
    let mut scanner = mock_scanner(Vec::new());
    scanner.poll(&[2, 3, 4], Duration::from_millis(10)).unwrap();

    let probes = scanner.launch_probes(&[2, 3, 4, 5]).unwrap();
    let ports: BTreeSet<u16> = probes.values().map(|p| p.port()).collect();

    assert_eq!(ports, BTreeSet::from([2, 5]));
    for (handle, probe) in &probes {
        assert_eq!(*handle, probe.handle());
        assert_eq!(probe.analyzed, 0);
    }
}

#[test]
fn reversed_pass_repeats_the_chunk_backwards() {
    // Only silent main pool ports, four per chunk.
    let ports: Vec<i64> = (1..=12).map(|i| i * 3 + 1001).collect();
    let mut scanner = mock_scanner(ports.clone()).config(ScanConfig {
        chunk_lower: 4,
        chunk_upper: 4,
        ..Default::default()
    });
    scanner.run(Duration::from_millis(2)).unwrap();

    let launched = &scanner.network().launched;
    assert_eq!(launched.len(), 24);

    let mut covered = BTreeSet::new();
    for pair in launched.chunks(8) {
        let (forward, backward) = pair.split_at(4);
        let reversed: Vec<u16> = forward.iter().rev().copied().collect();
        assert_eq!(backward, reversed.as_slice());
        covered.extend(forward.iter().copied());
    }

    let expected: BTreeSet<u16> = ports.iter().map(|&p| p as u16).collect();
    assert_eq!(covered, expected);
}

#[test]
fn faults_propagate_out_of_run() {
    let mut scanner = Scanner::with_network(
        TARGET,
        vec![10, 20, 30],
        MockNetwork {
            failing_port: Some(20),
            ..Default::default()
        },
        StdRng::seed_from_u64(3),
    );

    assert!(matches!(
        scanner.run(Duration::from_millis(1)),
        Err(ScanError::ConnectFailed(20, _))
    ));
}

#[test]
fn clear_keeps_candidate_ports() {
    let mut scanner = mock_scanner(vec![3, 4]);
    scanner.run(Duration::from_millis(1)).unwrap();
    assert_eq!(scanner.results().len(), 2);

    scanner.clear();

    assert!(scanner.results().is_empty());
    assert_eq!(scanner.ports(), &[3, 4]);
}

#[test]
fn run_starts_from_scratch() {
    let mut scanner = mock_scanner(vec![3]);
    scanner.poll(&[4, 5], Duration::from_millis(1)).unwrap();

    let results = scanner.run(Duration::from_millis(1)).unwrap();

    assert_eq!(results.keys().copied().collect::<Vec<_>>(), vec![3]);
}

#[test]
fn loopback_listener_is_found_open() {
    let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
    let port = listener.local_addr().unwrap().port();

    let mut scanner = Scanner::with_network(
        Ipv4Addr::LOCALHOST,
        vec![port as i64],
        SystemNetwork,
        StdRng::seed_from_u64(5),
    )
    .config(ScanConfig {
        highest_port: u16::MAX,
        ..Default::default()
    });

    let results = scanner.run(Duration::from_millis(50)).unwrap();
    assert_eq!(results.get(&port), Some(&PortState::Open));
}
