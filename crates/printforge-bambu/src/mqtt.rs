//! Device link: the authenticated MQTT control channel to one printer.

use std::sync::{Arc, Mutex as StdMutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use rumqttc::{
    AsyncClient, Event, EventLoop, MqttOptions, Packet, QoS, TlsConfiguration, Transport,
};
use serde::Serialize;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::commands::PrinterCommand;
use crate::config::{PrinterConfig, PRINTER_USERNAME};
use crate::error::{BambuError, Result};
use crate::status::TelemetrySnapshot;
use crate::telemetry::TelemetryCache;

/// Lifecycle of the control channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum LinkState {
    /// No transport resources held.
    Disconnected,
    /// Connection attempt in progress.
    Connecting,
    /// Subscribed and receiving reports.
    Connected,
}

/// Connection configuration summary for the orchestration layer.
///
/// Never carries the access code itself, only whether one is present.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectionInfo {
    /// Configured printer address.
    pub host: String,
    /// Configured device serial.
    pub serial: String,
    /// Whether an access code is configured.
    pub access_code_configured: bool,
    /// Current link state.
    pub state: LinkState,
}

/// Command-publish seam between the job submitter and the device link.
#[async_trait]
pub trait CommandChannel: Send + Sync {
    /// Establish the link if it is not already connected.
    async fn ensure_connected(&self) -> Result<()>;

    /// Hand a command to the transport. Returns once the message is queued;
    /// the printer's reaction is only observable later via telemetry.
    async fn publish_command(&self, command: PrinterCommand) -> Result<()>;
}

struct LinkInner {
    client: AsyncClient,
    event_task: JoinHandle<()>,
}

/// Persistent, authenticated control channel to one printer.
///
/// All printer state flows through the single `device/{serial}/report`
/// subscription; a dedicated background task drives the network loop and
/// is the telemetry cache's only writer. Reconnection after a drop is the
/// caller's responsibility — print jobs are short interactive sessions,
/// not unattended links.
pub struct DeviceLink {
    config: PrinterConfig,
    cache: Arc<TelemetryCache>,
    state: Arc<StdMutex<LinkState>>,
    inner: Mutex<Option<LinkInner>>,
}

impl DeviceLink {
    /// Create a link for `config`. No network activity until
    /// [`DeviceLink::connect`].
    pub fn new(config: PrinterConfig) -> Self {
        Self {
            config,
            cache: Arc::new(TelemetryCache::new()),
            state: Arc::new(StdMutex::new(LinkState::Disconnected)),
            inner: Mutex::new(None),
        }
    }

    /// Establish the control channel: TLS connect, authenticate, subscribe
    /// to the report topic, and start the background network loop.
    ///
    /// A no-op when already connected.
    ///
    /// # Errors
    ///
    /// [`BambuError::Configuration`] when address, access code, or serial
    /// is missing — checked before any network attempt.
    /// [`BambuError::Timeout`] when the broker does not acknowledge within
    /// the configured deadline, [`BambuError::Connectivity`] on transport
    /// failure.
    pub async fn connect(&self) -> Result<()> {
        self.config.validate()?;

        let mut inner = self.inner.lock().await;
        if let Some(existing) = inner.as_ref() {
            if self.state() == LinkState::Connected && !existing.event_task.is_finished() {
                return Ok(());
            }
        }
        // A dead event task means the previous session is gone; drop it.
        if let Some(stale) = inner.take() {
            stale.event_task.abort();
        }
        self.set_state(LinkState::Connecting);

        let client_id = format!("printforge_{}", uuid::Uuid::new_v4());
        let mut options =
            MqttOptions::new(client_id, self.config.host.clone(), self.config.mqtt_port);
        options.set_credentials(PRINTER_USERNAME, self.config.access_code.clone());
        options.set_keep_alive(Duration::from_secs(30));
        options.set_clean_session(true);

        // Bambu printers present a factory self-signed certificate. With no
        // pinned CA configured the handshake proceeds without verification;
        // see `PrinterConfig::ca_certificate` for the documented trade-off.
        let tls = TlsConfiguration::Simple {
            ca: self.config.ca_certificate.clone().unwrap_or_default(),
            alpn: None,
            client_auth: None,
        };
        options.set_transport(Transport::tls_with_config(tls));

        let (client, mut event_loop) = AsyncClient::new(options, 100);

        if let Err(e) = wait_for_connack(&mut event_loop, self.config.connect_timeout).await {
            self.set_state(LinkState::Disconnected);
            return Err(e);
        }

        if let Err(e) = client
            .subscribe(self.config.report_topic(), QoS::AtMostOnce)
            .await
        {
            self.set_state(LinkState::Disconnected);
            return Err(BambuError::Connectivity(e.to_string()));
        }

        let event_task = tokio::spawn(run_event_loop(
            event_loop,
            self.cache.clone(),
            self.config.report_topic(),
            self.state.clone(),
        ));

        // Prime the cache without waiting for the next periodic report.
        let push = PrinterCommand::PushAll.to_json().to_string();
        if let Err(e) = client
            .publish(self.config.request_topic(), QoS::AtMostOnce, false, push)
            .await
        {
            warn!("status push request failed: {e}");
        }

        *inner = Some(LinkInner { client, event_task });
        self.set_state(LinkState::Connected);
        info!(host = %self.config.host, serial = %self.config.serial,
            "control channel established");
        Ok(())
    }

    /// Publish a command to the printer's request topic.
    ///
    /// Fire-and-forget: returns once the message is handed to the
    /// transport. No acknowledgment is awaited.
    pub async fn publish(&self, command: PrinterCommand) -> Result<()> {
        let inner = self.inner.lock().await;
        let Some(link) = inner.as_ref() else {
            return Err(BambuError::Connectivity("device link is not connected".into()));
        };

        let payload = command.to_json().to_string();
        link.client
            .publish(self.config.request_topic(), QoS::AtMostOnce, false, payload)
            .await
            .map_err(|e| BambuError::Connectivity(e.to_string()))?;
        debug!(?command, "command handed to transport");
        Ok(())
    }

    /// Tear down the control channel and release transport resources.
    /// Idempotent; disconnecting an already-disconnected link is a no-op.
    pub async fn disconnect(&self) {
        let mut inner = self.inner.lock().await;
        if let Some(link) = inner.take() {
            link.event_task.abort();
            if let Err(e) = link.client.disconnect().await {
                debug!("disconnect notice not delivered: {e}");
            }
            info!("control channel closed");
        }
        self.set_state(LinkState::Disconnected);
    }

    /// The most recent telemetry snapshot, or `None` before the first
    /// report arrives. "No telemetry yet" is distinct from an idle printer.
    pub fn status(&self) -> Option<TelemetrySnapshot> {
        self.cache.latest()
    }

    /// Subscribe to decoded telemetry snapshots.
    pub fn subscribe_status(&self) -> watch::Receiver<Option<TelemetrySnapshot>> {
        self.cache.subscribe()
    }

    /// Current link state.
    pub fn state(&self) -> LinkState {
        *self.state.lock().expect("state lock poisoned")
    }

    /// Whether the control channel is currently established.
    pub fn is_connected(&self) -> bool {
        self.state() == LinkState::Connected
    }

    /// Connection configuration summary.
    pub fn connection_info(&self) -> ConnectionInfo {
        ConnectionInfo {
            host: self.config.host.clone(),
            serial: self.config.serial.clone(),
            access_code_configured: !self.config.access_code.is_empty(),
            state: self.state(),
        }
    }

    fn set_state(&self, state: LinkState) {
        *self.state.lock().expect("state lock poisoned") = state;
    }
}

#[async_trait]
impl CommandChannel for DeviceLink {
    async fn ensure_connected(&self) -> Result<()> {
        if self.is_connected() {
            return Ok(());
        }
        self.connect().await
    }

    async fn publish_command(&self, command: PrinterCommand) -> Result<()> {
        self.publish(command).await
    }
}

/// Poll until the broker acknowledges the session or the deadline passes.
async fn wait_for_connack(event_loop: &mut EventLoop, timeout: Duration) -> Result<()> {
    let deadline = Instant::now() + timeout;
    loop {
        let now = Instant::now();
        if now >= deadline {
            return Err(BambuError::Timeout("control channel connect deadline elapsed".into()));
        }

        match tokio::time::timeout(deadline - now, event_loop.poll()).await {
            Ok(Ok(Event::Incoming(Packet::ConnAck(_)))) => return Ok(()),
            Ok(Ok(_)) => continue,
            Ok(Err(e)) => return Err(BambuError::Connectivity(e.to_string())),
            Err(_) => {
                return Err(BambuError::Timeout(
                    "control channel connect deadline elapsed".into(),
                ))
            }
        }
    }
}

/// The link's network loop, run on a dedicated background task. Decodes
/// report messages into telemetry snapshots; this task is the cache's only
/// writer.
async fn run_event_loop(
    mut event_loop: EventLoop,
    cache: Arc<TelemetryCache>,
    report_topic: String,
    state: Arc<StdMutex<LinkState>>,
) {
    loop {
        match event_loop.poll().await {
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                if publish.topic == report_topic {
                    handle_report(&publish.payload, &cache);
                }
            }
            Ok(_) => {}
            Err(e) => {
                warn!("control channel lost: {e}");
                *state.lock().expect("state lock poisoned") = LinkState::Disconnected;
                return;
            }
        }
    }
}

/// Decode one report message. Malformed payloads are logged and dropped;
/// they never crash the link and never partially update the cache.
fn handle_report(payload: &[u8], cache: &TelemetryCache) {
    let value: serde_json::Value = match serde_json::from_slice(payload) {
        Ok(value) => value,
        Err(e) => {
            warn!("undecodable report payload dropped: {e}");
            return;
        }
    };

    match TelemetrySnapshot::from_report(&value) {
        Some(snapshot) => cache.store(snapshot),
        None => debug!("report without print section dropped"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::status::PrintState;

    fn unconfigured_link() -> DeviceLink {
        DeviceLink::new(PrinterConfig::new("", "", ""))
    }

    fn configured_link() -> DeviceLink {
        DeviceLink::new(PrinterConfig::new("192.168.1.100", "12345678", "01S00C123"))
    }

    #[tokio::test]
    async fn test_connect_without_config_fails_fast() {
        let link = unconfigured_link();
        let err = link.connect().await.unwrap_err();
        assert!(matches!(err, BambuError::Configuration(_)));
        assert_eq!(link.state(), LinkState::Disconnected);
    }

    #[tokio::test]
    async fn test_publish_on_disconnected_link_is_an_error() {
        let link = configured_link();
        let err = link.publish(PrinterCommand::PushAll).await.unwrap_err();
        assert!(matches!(err, BambuError::Connectivity(_)));
    }

    #[tokio::test]
    async fn test_disconnect_is_idempotent() {
        let link = configured_link();
        link.disconnect().await;
        link.disconnect().await;
        assert_eq!(link.state(), LinkState::Disconnected);
    }

    #[test]
    fn test_no_telemetry_before_first_report() {
        let link = configured_link();
        assert!(link.status().is_none());
    }

    #[test]
    fn test_connection_info_never_exposes_access_code() {
        let link = configured_link();
        let info = link.connection_info();
        assert_eq!(info.host, "192.168.1.100");
        assert_eq!(info.serial, "01S00C123");
        assert!(info.access_code_configured);
        assert_eq!(info.state, LinkState::Disconnected);

        let serialized = serde_json::to_string(&info).unwrap();
        assert!(!serialized.contains("12345678"));
    }

    #[test]
    fn test_handle_report_updates_cache_atomically() {
        let cache = TelemetryCache::new();
        let payload = br#"{"print":{"gcode_state":"RUNNING","mc_percent":42,"subtask_name":"Vase"}}"#;

        handle_report(payload, &cache);

        let snapshot = cache.latest().unwrap();
        assert_eq!(snapshot.state, PrintState::Printing);
        assert_eq!(snapshot.progress, 42.0);
        assert_eq!(snapshot.current_job.unwrap().name, "Vase");
    }

    #[test]
    fn test_handle_report_drops_malformed_payloads() {
        let cache = TelemetryCache::new();

        handle_report(b"not json at all", &cache);
        assert!(cache.latest().is_none());

        handle_report(br#"{"system":{"command":"ledctrl"}}"#, &cache);
        assert!(cache.latest().is_none());

        // A prior good snapshot survives a later malformed message intact.
        handle_report(br#"{"print":{"gcode_state":"RUNNING","mc_percent":10}}"#, &cache);
        handle_report(b"\xff\xfe garbage", &cache);
        assert_eq!(cache.latest().unwrap().progress, 10.0);
    }
}
