//! Active network scan: TCP connect probes across the local /24 segment.

use std::future::Future;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, UdpSocket};
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpStream;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info};

use crate::discovery::{Device, DeviceRegistry};

/// Ports Bambu printers commonly answer on.
pub const SCAN_PORTS: [u16; 4] = [8883, 1883, 80, 443];

/// Upper bound on concurrent connection attempts. A full /24 sweep across
/// four ports would otherwise open hundreds of sockets at once.
pub const MAX_IN_FLIGHT: usize = 20;

/// Host addresses scanned on either side of the local machine's own octet.
const SCAN_WINDOW: u8 = 25;

/// Per-attempt connect timeout. Presence check only; no handshake.
const ATTEMPT_TIMEOUT: Duration = Duration::from_secs(1);

/// Probe the local segment for listening printers.
///
/// Successes are pushed to the registry as they happen, labelled with a
/// synthesized name and an `"unknown"` model pending identification. A
/// refused or timed-out connection is simply "no device here"; the scan as
/// a whole cannot fail — it can only find nothing.
pub(crate) async fn scan_network(registry: Arc<DeviceRegistry>) {
    let Some(local) = local_ipv4() else {
        debug!("no routable local IPv4 address; skipping active scan");
        return;
    };

    let hosts = host_window(local, SCAN_WINDOW);
    info!(hosts = hosts.len(), ports = SCAN_PORTS.len(), "scanning local segment");
    sweep(hosts, &SCAN_PORTS, MAX_IN_FLIGHT, tcp_probe, registry).await;
}

/// Fan the probe out over every (host, port) pair, admission-gated so at
/// most `max_in_flight` attempts are outstanding at any time.
async fn sweep<F, Fut>(
    hosts: Vec<Ipv4Addr>,
    ports: &[u16],
    max_in_flight: usize,
    probe: F,
    registry: Arc<DeviceRegistry>,
) where
    F: Fn(Ipv4Addr, u16) -> Fut + Clone + Send + 'static,
    Fut: Future<Output = bool> + Send + 'static,
{
    let gate = Arc::new(Semaphore::new(max_in_flight));
    let mut attempts = JoinSet::new();

    for host in hosts {
        for &port in ports {
            let gate = gate.clone();
            let probe = probe.clone();
            let registry = registry.clone();
            attempts.spawn(async move {
                let Ok(_permit) = gate.acquire_owned().await else {
                    return;
                };
                if probe(host, port).await {
                    let device = Device::new(
                        format!("Bambu-{}", host.octets()[3]),
                        IpAddr::V4(host),
                        port,
                        "unknown",
                    );
                    if registry.insert(device) {
                        debug!(%host, port, "open port on local segment");
                    }
                }
            });
        }
    }

    while attempts.join_next().await.is_some() {}
}

/// One presence probe: does the endpoint accept a TCP connection in time?
async fn tcp_probe(host: Ipv4Addr, port: u16) -> bool {
    matches!(
        tokio::time::timeout(ATTEMPT_TIMEOUT, TcpStream::connect((IpAddr::V4(host), port))).await,
        Ok(Ok(_))
    )
}

/// The scanned host addresses: the half-open window
/// `[center - window, center + window)`, clamped to the valid host range
/// of a /24.
fn host_window(local: Ipv4Addr, window: u8) -> Vec<Ipv4Addr> {
    let [a, b, c, center] = local.octets();
    let start = center.saturating_sub(window).max(1);
    let end = center.saturating_add(window).min(255);
    (start..end).map(|octet| Ipv4Addr::new(a, b, c, octet)).collect()
}

/// Local address as seen by the default route. No packets are sent; the
/// connect only selects a source address.
fn local_ipv4() -> Option<Ipv4Addr> {
    let socket = UdpSocket::bind("0.0.0.0:0").ok()?;
    socket.connect("8.8.8.8:80").ok()?;
    match socket.local_addr().ok()? {
        SocketAddr::V4(addr) if !addr.ip().is_loopback() => Some(*addr.ip()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_host_window_is_half_open_around_center() {
        let hosts = host_window(Ipv4Addr::new(192, 168, 1, 100), 25);
        assert_eq!(hosts.first(), Some(&Ipv4Addr::new(192, 168, 1, 75)));
        // Upper bound is exclusive: 125 itself is not probed.
        assert_eq!(hosts.last(), Some(&Ipv4Addr::new(192, 168, 1, 124)));
        assert_eq!(hosts.len(), 50);
    }

    #[test]
    fn test_host_window_clamps_to_valid_host_range() {
        let low = host_window(Ipv4Addr::new(192, 168, 1, 3), 25);
        assert_eq!(low.first(), Some(&Ipv4Addr::new(192, 168, 1, 1)));
        assert_eq!(low.last(), Some(&Ipv4Addr::new(192, 168, 1, 27)));

        let high = host_window(Ipv4Addr::new(192, 168, 1, 250), 25);
        assert_eq!(high.first(), Some(&Ipv4Addr::new(192, 168, 1, 225)));
        assert_eq!(high.last(), Some(&Ipv4Addr::new(192, 168, 1, 254)));
    }

    #[tokio::test]
    async fn test_sweep_never_exceeds_concurrency_bound() {
        let registry = Arc::new(DeviceRegistry::new());
        let in_flight = Arc::new(AtomicUsize::new(0));
        let high_water = Arc::new(AtomicUsize::new(0));
        let attempted = Arc::new(AtomicUsize::new(0));

        let probe = {
            let in_flight = in_flight.clone();
            let high_water = high_water.clone();
            let attempted = attempted.clone();
            move |_host: Ipv4Addr, _port: u16| {
                let in_flight = in_flight.clone();
                let high_water = high_water.clone();
                let attempted = attempted.clone();
                async move {
                    let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                    high_water.fetch_max(now, Ordering::SeqCst);
                    tokio::task::yield_now().await;
                    tokio::time::sleep(Duration::from_millis(2)).await;
                    in_flight.fetch_sub(1, Ordering::SeqCst);
                    attempted.fetch_add(1, Ordering::SeqCst);
                    false
                }
            }
        };

        // 100 hosts x 4 ports: far wider than the admission gate.
        let hosts: Vec<Ipv4Addr> = (1..=100).map(|o| Ipv4Addr::new(10, 0, 0, o)).collect();
        sweep(hosts, &[1, 2, 3, 4], MAX_IN_FLIGHT, probe, registry.clone()).await;

        assert_eq!(attempted.load(Ordering::SeqCst), 400);
        assert!(
            high_water.load(Ordering::SeqCst) <= MAX_IN_FLIGHT,
            "high water {} exceeded the bound",
            high_water.load(Ordering::SeqCst)
        );
        assert_eq!(registry.len(), 0);
    }

    #[tokio::test]
    async fn test_sweep_records_successful_probes_with_unknown_model() {
        let registry = Arc::new(DeviceRegistry::new());
        let target = Ipv4Addr::new(10, 0, 0, 7);

        let probe = move |host: Ipv4Addr, port: u16| async move { host == target && port == 8883 };

        let hosts: Vec<Ipv4Addr> = (1..=20).map(|o| Ipv4Addr::new(10, 0, 0, o)).collect();
        sweep(hosts, &SCAN_PORTS, MAX_IN_FLIGHT, probe, registry.clone()).await;

        let devices = registry.snapshot();
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].name, "Bambu-7");
        assert_eq!(devices[0].model, "unknown");
        assert_eq!(devices[0].ip, IpAddr::V4(target));
    }
}
