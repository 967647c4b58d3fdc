//! Listening port negotiation.
//!
//! A port is probed by binding a throwaway listener and releasing it at once.
//! When the preferred port is taken and auto-find is enabled the search walks
//! upward one port at a time, for at most `max_attempts` probes.

use std::io::ErrorKind;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use thiserror::Error;
use tokio::net::TcpListener;

/// Errors raised while negotiating the listening port.
#[derive(Debug, Error)]
pub enum PortError {
    #[error("port {0} is already in use and auto_find_port is disabled")]
    PortUnavailable(u16),

    #[error("no free port found after {attempts} attempts starting at {start}")]
    PortSearchExhausted { start: u16, attempts: u32 },

    #[error("failed to bind port {port}: {source}")]
    Bind {
        port: u16,
        #[source]
        source: std::io::Error,
    },

    #[error("probe of port {0} timed out")]
    ProbeTimedOut(u16),
}

/// Parameters of a port search.
#[derive(Debug, Clone)]
pub struct PortSearch {
    /// Interface to probe.
    pub bind_address: IpAddr,
    /// First port tried.
    pub preferred: u16,
    /// Walk upward when the port is taken.
    pub auto_find: bool,
    /// Upper bound on probes.
    pub max_attempts: u32,
    /// Timeout of a single probe.
    pub probe_timeout: Duration,
}

/// Outcome of a single probe.
enum Probe {
    Free,
    InUse,
}

async fn probe(addr: SocketAddr, timeout: Duration) -> Result<Probe, PortError> {
    match tokio::time::timeout(timeout, TcpListener::bind(addr)).await {
        Ok(Ok(listener)) => {
            drop(listener);
            Ok(Probe::Free)
        }
        Ok(Err(e)) if e.kind() == ErrorKind::AddrInUse => Ok(Probe::InUse),
        Ok(Err(source)) => Err(PortError::Bind {
            port: addr.port(),
            source,
        }),
        Err(_) => Err(PortError::ProbeTimedOut(addr.port())),
    }
}

/// Finds a port the listener can bind.
///
/// Only "address in use" is retried. Any other bind failure (permission
/// denied, address not available) is returned immediately.
pub async fn negotiate_port(search: &PortSearch) -> Result<u16, PortError> {
    let attempts = search.max_attempts.max(1);
    let mut port = search.preferred;

    for attempt in 1..=attempts {
        let addr = SocketAddr::new(search.bind_address, port);
        match probe(addr, search.probe_timeout).await? {
            Probe::Free => {
                if port != search.preferred {
                    tracing::info!(
                        preferred = search.preferred,
                        port,
                        "Preferred port in use, using next free port"
                    );
                }
                return Ok(port);
            }
            Probe::InUse if !search.auto_find => {
                return Err(PortError::PortUnavailable(port));
            }
            Probe::InUse => {
                tracing::debug!(port, attempt, "Port in use, trying next");
                match port.checked_add(1) {
                    Some(next) => port = next,
                    None => {
                        return Err(PortError::PortSearchExhausted {
                            start: search.preferred,
                            attempts: attempt,
                        })
                    }
                }
            }
        }
    }

    Err(PortError::PortSearchExhausted {
        start: search.preferred,
        attempts,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{Ipv4Addr, TcpListener as StdListener};

    const LOCALHOST: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);

    fn search(preferred: u16, auto_find: bool, max_attempts: u32) -> PortSearch {
        PortSearch {
            bind_address: LOCALHOST,
            preferred,
            auto_find,
            max_attempts,
            probe_timeout: Duration::from_millis(500),
        }
    }

    /// Occupies `count` consecutive ports and checks the one after is free.
    fn occupy_consecutive(count: u16) -> (u16, Vec<StdListener>) {
        for _ in 0..64 {
            let first = StdListener::bind((LOCALHOST, 0)).unwrap();
            let base = first.local_addr().unwrap().port();
            if base > u16::MAX - count - 1 {
                continue;
            }
            let mut held = vec![first];
            let mut ok = true;
            for offset in 1..count {
                match StdListener::bind((LOCALHOST, base + offset)) {
                    Ok(listener) => held.push(listener),
                    Err(_) => {
                        ok = false;
                        break;
                    }
                }
            }
            if ok && StdListener::bind((LOCALHOST, base + count)).is_ok() {
                return (base, held);
            }
        }
        panic!("could not find a run of free ports");
    }

    #[tokio::test]
    async fn test_free_port_returned() {
        let (base, held) = occupy_consecutive(1);
        drop(held);

        assert_eq!(negotiate_port(&search(base, false, 10)).await.unwrap(), base);
    }

    #[tokio::test]
    async fn test_auto_find_skips_taken_ports() {
        let (base, _held) = occupy_consecutive(2);

        let port = negotiate_port(&search(base, true, 10)).await.unwrap();
        assert_eq!(port, base + 2);
    }

    #[tokio::test]
    async fn test_taken_port_without_auto_find() {
        let (base, _held) = occupy_consecutive(1);

        let err = negotiate_port(&search(base, false, 10)).await.unwrap_err();
        assert!(matches!(err, PortError::PortUnavailable(p) if p == base));
    }

    #[tokio::test]
    async fn test_search_is_bounded() {
        let (base, _held) = occupy_consecutive(3);

        let err = negotiate_port(&search(base, true, 2)).await.unwrap_err();
        assert!(matches!(
            err,
            PortError::PortSearchExhausted { start, attempts: 2 } if start == base
        ));
    }

    #[tokio::test]
    async fn test_non_retryable_bind_error() {
        // TEST-NET-1 is never assigned to a local interface.
        let mut search = search(40000, true, 10);
        search.bind_address = IpAddr::V4(Ipv4Addr::new(192, 0, 2, 1));

        let err = negotiate_port(&search).await.unwrap_err();
        assert!(matches!(err, PortError::Bind { port: 40000, .. }));
    }
}
