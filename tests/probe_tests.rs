use std::{
    net::{Ipv4Addr, TcpListener},
    time::Duration,
};

use chunkscan::{
    error::ScanError,
    scan::{Network, PortState, Probe, SystemNetwork, TcpProbe},
};

const WAIT: Duration = Duration::from_secs(2);

fn wait_ready(probe: &TcpProbe) {
    let ready = SystemNetwork
        .wait_writable(&[probe.handle()], WAIT)
        .unwrap();
    assert_eq!(ready, vec![probe.handle()]);
}

#[test]
fn listening_port_is_open() {
    let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
    let port = listener.local_addr().unwrap().port();

    let mut probe = TcpProbe::connect(Ipv4Addr::LOCALHOST, port).unwrap();
    assert_eq!(probe.port(), port);

    wait_ready(&probe);
    assert_eq!(probe.analyze().unwrap(), PortState::Open);
}

#[test]
fn open_verdict_survives_close() {
    let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
    let port = listener.local_addr().unwrap().port();

    let mut probe = TcpProbe::connect(Ipv4Addr::LOCALHOST, port).unwrap();
    wait_ready(&probe);
    assert_eq!(probe.analyze().unwrap(), PortState::Open);

    probe.close();
    probe.close();
    assert!(probe.is_closed());

    // The socket is gone, so the cached verdict is all that's left.
    assert_eq!(probe.analyze().unwrap(), PortState::Open);
}

#[test]
fn port_without_listener_is_closed() {
    let port = {
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
        listener.local_addr().unwrap().port()
    };

    match TcpProbe::connect(Ipv4Addr::LOCALHOST, port) {
        Ok(mut probe) => {
            wait_ready(&probe);
            assert_eq!(probe.analyze().unwrap(), PortState::Closed);
        }
        // Loopback may refuse before connect even returns.
        Err(ScanError::ConnectFailed(p, e)) => {
            assert_eq!(p, port);
            assert_eq!(e.raw_os_error(), Some(libc::ECONNREFUSED));
        }
        Err(e) => panic!("unexpected error: {}", e),
    }
}

#[test]
fn unready_probe_is_unknown() {
    let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
    let port = listener.local_addr().unwrap().port();

    let mut probe = TcpProbe::connect(Ipv4Addr::LOCALHOST, port).unwrap();
    probe.close();

    assert_eq!(probe.analyze().unwrap(), PortState::Unknown);
}

#[test]
fn probes_get_distinct_handles() {
    let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
    let port = listener.local_addr().unwrap().port();

    let a = SystemNetwork.probe(Ipv4Addr::LOCALHOST, port).unwrap();
    let b = SystemNetwork.probe(Ipv4Addr::LOCALHOST, port).unwrap();

    assert_ne!(a.handle(), b.handle());
}
