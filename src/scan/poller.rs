use std::{io, net::Ipv4Addr, time::Duration};

use crate::error::ScanError;

use super::{Handle, Network, TcpProbe};

const READY_EVENTS: libc::c_short = libc::POLLOUT | libc::POLLERR | libc::POLLHUP | libc::POLLNVAL;

/// Real sockets multiplexed with `poll(2)`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemNetwork;

impl Network for SystemNetwork {
    type Probe = TcpProbe;

    fn probe(&mut self, ip: Ipv4Addr, port: u16) -> Result<TcpProbe, ScanError> {
        TcpProbe::connect(ip, port)
    }

    fn wait_writable(
        &mut self,
        handles: &[Handle],
        timeout: Duration,
    ) -> Result<Vec<Handle>, ScanError> {
        let mut fds: Vec<libc::pollfd> = handles
            .iter()
            .map(|&fd| libc::pollfd {
                fd,
                events: libc::POLLOUT,
                revents: 0,
            })
            .collect();

        // SAFETY: `fds` is a valid, exclusively borrowed buffer of `fds.len()` entries.
        let ret = unsafe {
            libc::poll(
                fds.as_mut_ptr(),
                fds.len() as libc::nfds_t,
                timeout_millis(timeout),
            )
        };

        if ret < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                log::trace!("Readiness wait interrupted");
                return Ok(Vec::new());
            }
            return Err(ScanError::PollFailed(err));
        }

        Ok(fds
            .iter()
            .filter(|pfd| pfd.revents & READY_EVENTS != 0)
            .map(|pfd| pfd.fd)
            .collect())
    }
}

/// Rounds up so a sub-millisecond budget still blocks instead of spinning.
fn timeout_millis(timeout: Duration) -> libc::c_int {
    let millis = timeout.as_micros().div_ceil(1000);
    millis.min(libc::c_int::MAX as u128) as libc::c_int
}
