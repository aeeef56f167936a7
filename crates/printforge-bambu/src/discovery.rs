//! Printer discovery: passive SSDP listening combined with an active scan.

use std::net::IpAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::net::UdpSocket;
use tokio::sync::Notify;
use tokio::task::JoinSet;
use tracing::{debug, info};

use crate::scan::scan_network;

/// How long discovery keeps waiting after a find before returning early.
pub const SETTLE_WINDOW: Duration = Duration::from_secs(1);

/// SSDP multicast address Bambu printers announce on.
const SSDP_ADDR: &str = "239.255.255.250:1990";

/// Service categories solicited on the discovery socket: the vendor type
/// plus the generic printer, IPP, and root-device (HTTP) categories the
/// devices also answer under.
const SSDP_SEARCH_TYPES: [&str; 4] = [
    "urn:bambulab-com:device:3dprinter:1",
    "urn:schemas-upnp-org:device:printer:1",
    "urn:schemas-upnp-org:service:ipp:1",
    "upnp:rootdevice",
];

/// M-SEARCH request for one service type.
fn build_search(search_target: &str) -> String {
    format!(
        "M-SEARCH * HTTP/1.1\r\n\
         HOST: 239.255.255.250:1990\r\n\
         MAN: \"ssdp:discover\"\r\n\
         MX: 3\r\n\
         ST: {search_target}\r\n\
         \r\n"
    )
}

/// A printer located on the local network.
///
/// Immutable once constructed; two devices are the same printer when their
/// IP addresses match, regardless of which discovery path found them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Device {
    /// Stable identifier, `{ip}:{port}`.
    pub id: String,
    /// Display name, advertised or synthesized from the address.
    pub name: String,
    /// Printer IP address.
    pub ip: IpAddr,
    /// Port the printer answered on.
    pub port: u16,
    /// Model label; `"unknown"` until the printer identifies itself.
    pub model: String,
}

impl Device {
    /// Create a device record.
    pub fn new(name: impl Into<String>, ip: IpAddr, port: u16, model: impl Into<String>) -> Self {
        Self {
            id: format!("{ip}:{port}"),
            name: name.into(),
            ip,
            port,
            model: model.into(),
        }
    }
}

// One device per IP: metadata differs depending on which discovery path
// saw the printer first, so identity is the address alone.
impl PartialEq for Device {
    fn eq(&self, other: &Self) -> bool {
        self.ip == other.ip
    }
}

impl Eq for Device {}

/// Append-only list of discovered devices shared by both discovery paths.
///
/// Insertion deduplicates by IP with first-seen-wins semantics, so the two
/// concurrent sub-searches cannot race a duplicate in.
#[derive(Debug, Default)]
pub(crate) struct DeviceRegistry {
    devices: Mutex<Vec<Device>>,
    new_device: Notify,
}

impl DeviceRegistry {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Add a device unless one with the same IP is already present.
    /// Returns `true` when the device was genuinely new.
    pub(crate) fn insert(&self, device: Device) -> bool {
        {
            let mut devices = self.devices.lock().expect("registry lock poisoned");
            if devices.iter().any(|d| d.ip == device.ip) {
                return false;
            }
            devices.push(device);
        }
        self.new_device.notify_waiters();
        true
    }

    pub(crate) fn len(&self) -> usize {
        self.devices.lock().expect("registry lock poisoned").len()
    }

    pub(crate) fn snapshot(&self) -> Vec<Device> {
        self.devices.lock().expect("registry lock poisoned").clone()
    }

    /// Resolves once the registry holds more than `n` devices.
    pub(crate) async fn wait_past(&self, n: usize) {
        loop {
            let notified = self.new_device.notified();
            if self.len() > n {
                return;
            }
            notified.await;
        }
    }
}

/// Locate printers on the local network.
///
/// Runs the passive SSDP listener and the active TCP scan concurrently and
/// merges their finds by IP address. Returns as soon as at least one
/// printer is known and [`SETTLE_WINDOW`] passes with no new finds, or when
/// `timeout` elapses — whichever is first. Discovery never fails; an empty
/// network yields an empty list.
///
/// Both sub-searches are cancelled and the listening socket is torn down on
/// every exit path.
pub async fn discover(timeout: Duration) -> Vec<Device> {
    let registry = Arc::new(DeviceRegistry::new());

    let mut searches = JoinSet::new();
    {
        let registry = registry.clone();
        searches.spawn(async move { listen_ssdp(registry).await });
    }
    {
        let registry = registry.clone();
        searches.spawn(async move { scan_network(registry).await });
    }

    await_settled(&registry, SETTLE_WINDOW, timeout).await;

    searches.abort_all();
    while searches.join_next().await.is_some() {}

    let devices = registry.snapshot();
    info!(count = devices.len(), "discovery completed");
    devices
}

/// Two-phase discovery wait: an event-triggered early exit plus a hard
/// ceiling. Each new find re-arms the settle window; the deadline bounds
/// the worst case when nothing is on the network.
pub(crate) async fn await_settled(registry: &DeviceRegistry, settle: Duration, timeout: Duration) {
    let deadline = tokio::time::Instant::now() + timeout;
    let mut seen = 0usize;

    loop {
        let now = tokio::time::Instant::now();
        if now >= deadline {
            return;
        }
        let remaining = deadline - now;
        let window = if seen == 0 { remaining } else { settle.min(remaining) };

        match tokio::time::timeout(window, registry.wait_past(seen)).await {
            Ok(()) => seen = registry.len(),
            // Either the settle window passed with no new finds or the
            // ceiling was reached.
            Err(_) => return,
        }
    }
}

/// Passive discovery path: solicit and collect SSDP announcements.
async fn listen_ssdp(registry: Arc<DeviceRegistry>) {
    if let Err(e) = ssdp_loop(&registry).await {
        debug!("SSDP listener stopped: {e}");
    }
}

// One socket watches every candidate service type; dropping it tears the
// whole passive path down together.
async fn ssdp_loop(registry: &DeviceRegistry) -> std::io::Result<()> {
    let socket = UdpSocket::bind("0.0.0.0:0").await?;
    for search_target in SSDP_SEARCH_TYPES {
        socket
            .send_to(build_search(search_target).as_bytes(), SSDP_ADDR)
            .await?;
    }

    let mut buf = vec![0u8; 2048];
    loop {
        let (len, addr) = socket.recv_from(&mut buf).await?;
        let Ok(response) = std::str::from_utf8(&buf[..len]) else {
            continue;
        };
        if let Some(device) = parse_ssdp_response(response, addr.ip()) {
            if registry.insert(device.clone()) {
                info!(name = %device.name, ip = %device.ip, model = %device.model,
                    "printer advertised itself");
            }
        }
    }
}

/// Parse an SSDP response or announcement into a device record.
///
/// Bambu printers carry their metadata in vendor headers
/// (`DevName.bambu.com`, `DevModel.bambu.com`); anything that does not
/// identify itself as a Bambu device is ignored. Announcements carry no
/// port header, so the control channel port is assumed.
fn parse_ssdp_response(response: &str, ip: IpAddr) -> Option<Device> {
    if !response.contains("bambulab") && !response.contains("Bambu") {
        return None;
    }

    let mut model = None;
    let mut name = None;

    for line in response.lines() {
        let line = line.trim();
        if let Some(value) = line.strip_prefix("DevModel.bambu.com:") {
            model = Some(value.trim().to_string());
        } else if let Some(value) = line.strip_prefix("DevName.bambu.com:") {
            name = Some(value.trim().to_string());
        }
    }

    let model = model.unwrap_or_else(|| "unknown".into());
    let name = name.unwrap_or_else(|| format!("Bambu {model}"));

    Some(Device::new(name, ip, 8883, model))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_ssdp_response() {
        let response = "HTTP/1.1 200 OK\r\n\
            CACHE-CONTROL: max-age=1800\r\n\
            USN: uuid:00M00A2B012345::urn:bambulab-com:device:3dprinter:1\r\n\
            DevModel.bambu.com: X1C\r\n\
            DevName.bambu.com: Workshop Printer\r\n\
            DevVersion.bambu.com: 01.07.00.00\r\n\r\n";
        let ip: IpAddr = "192.168.1.100".parse().unwrap();

        let device = parse_ssdp_response(response, ip).unwrap();
        assert_eq!(device.name, "Workshop Printer");
        assert_eq!(device.model, "X1C");
        assert_eq!(device.port, 8883);
        assert_eq!(device.id, "192.168.1.100:8883");
    }

    #[test]
    fn test_search_requests_cover_all_watched_service_types() {
        assert!(SSDP_SEARCH_TYPES.contains(&"urn:bambulab-com:device:3dprinter:1"));
        assert!(SSDP_SEARCH_TYPES.iter().any(|st| st.contains("printer")));
        assert!(SSDP_SEARCH_TYPES.iter().any(|st| st.contains("ipp")));
        assert!(SSDP_SEARCH_TYPES.iter().any(|st| st.contains("rootdevice")));

        for search_target in SSDP_SEARCH_TYPES {
            let request = build_search(search_target);
            assert!(request.starts_with("M-SEARCH * HTTP/1.1\r\n"));
            assert!(request.contains(&format!("ST: {search_target}\r\n")));
            assert!(request.contains("MAN: \"ssdp:discover\"\r\n"));
            assert!(request.ends_with("\r\n\r\n"));
        }
    }

    #[test]
    fn test_device_equality_is_address_only() {
        let ip: IpAddr = "192.168.1.100".parse().unwrap();
        let scanned = Device::new("Bambu-100", ip, 1883, "unknown");
        let advertised = Device::new("Workshop Printer", ip, 8883, "X1C");
        assert_eq!(scanned, advertised);

        let other = Device::new("Bambu-101", "192.168.1.101".parse().unwrap(), 1883, "unknown");
        assert_ne!(scanned, other);
    }

    #[test]
    fn test_parse_ssdp_response_ignores_other_vendors() {
        let response = "HTTP/1.1 200 OK\r\nST: urn:schemas-upnp-org:device:MediaRenderer:1\r\n\r\n";
        let ip: IpAddr = "192.168.1.50".parse().unwrap();
        assert!(parse_ssdp_response(response, ip).is_none());
    }

    #[test]
    fn test_registry_dedups_by_ip_first_seen_wins() {
        let registry = DeviceRegistry::new();
        let ip: IpAddr = "192.168.1.100".parse().unwrap();

        // Scanner finds the bare TCP endpoint first.
        assert!(registry.insert(Device::new("Bambu-100", ip, 8883, "unknown")));
        // The SSDP path then reports the same printer with richer metadata.
        assert!(!registry.insert(Device::new("Workshop Printer", ip, 8883, "X1C")));
        // A different port on the same IP is still the same printer.
        assert!(!registry.insert(Device::new("Bambu-100", ip, 1883, "unknown")));

        let devices = registry.snapshot();
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].name, "Bambu-100");
    }

    #[test]
    fn test_registry_keeps_distinct_addresses() {
        let registry = DeviceRegistry::new();
        registry.insert(Device::new("a", "192.168.1.10".parse().unwrap(), 8883, "unknown"));
        registry.insert(Device::new("b", "192.168.1.11".parse().unwrap(), 8883, "unknown"));
        assert_eq!(registry.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_await_settled_returns_soon_after_single_find() {
        let registry = Arc::new(DeviceRegistry::new());
        let start = tokio::time::Instant::now();

        let inserter = {
            let registry = registry.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_secs(2)).await;
                registry.insert(Device::new(
                    "Workshop Printer",
                    "192.168.1.100".parse().unwrap(),
                    8883,
                    "X1C",
                ));
            })
        };

        await_settled(&registry, Duration::from_secs(1), Duration::from_secs(10)).await;
        inserter.await.unwrap();

        // One find at t=2s plus the 1s settle window; well under the ceiling.
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_secs(3), "elapsed {elapsed:?}");
        assert!(elapsed < Duration::from_secs(4), "elapsed {elapsed:?}");
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_await_settled_hits_ceiling_when_nothing_found() {
        let registry = Arc::new(DeviceRegistry::new());
        let start = tokio::time::Instant::now();

        await_settled(&registry, Duration::from_secs(1), Duration::from_secs(5)).await;

        assert!(start.elapsed() >= Duration::from_secs(5));
        assert_eq!(registry.len(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_await_settled_extends_while_finds_keep_arriving() {
        let registry = Arc::new(DeviceRegistry::new());
        let start = tokio::time::Instant::now();

        let inserter = {
            let registry = registry.clone();
            tokio::spawn(async move {
                for i in 0..3u8 {
                    tokio::time::sleep(Duration::from_millis(600)).await;
                    registry.insert(Device::new(
                        format!("Bambu-{i}"),
                        format!("192.168.1.{}", 10 + i).parse().unwrap(),
                        8883,
                        "unknown",
                    ));
                }
            })
        };

        await_settled(&registry, Duration::from_secs(1), Duration::from_secs(10)).await;
        inserter.await.unwrap();

        // Finds at 0.6s, 1.2s, 1.8s; settles 1s after the last one.
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(2800), "elapsed {elapsed:?}");
        assert!(elapsed < Duration::from_secs(4), "elapsed {elapsed:?}");
        assert_eq!(registry.len(), 3);
    }
}
