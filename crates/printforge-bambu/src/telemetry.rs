//! Telemetry cache: the latest known printer state.

use tokio::sync::watch;

use crate::status::TelemetrySnapshot;

/// Single-writer, multi-reader cache of the most recent telemetry snapshot.
///
/// The device link's event task is the only writer; every update replaces
/// the stored snapshot wholesale, so readers never observe a torn mix of
/// fields from two different reports. `None` means no telemetry has been
/// received yet — callers must treat that as distinct from an idle printer.
#[derive(Debug)]
pub struct TelemetryCache {
    tx: watch::Sender<Option<TelemetrySnapshot>>,
    rx: watch::Receiver<Option<TelemetrySnapshot>>,
}

impl TelemetryCache {
    /// Create an empty cache.
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(None);
        Self { tx, rx }
    }

    /// Replace the cached snapshot atomically.
    pub fn store(&self, snapshot: TelemetrySnapshot) {
        self.tx.send_replace(Some(snapshot));
    }

    /// The most recent snapshot, or `None` if nothing has arrived yet.
    pub fn latest(&self) -> Option<TelemetrySnapshot> {
        self.rx.borrow().clone()
    }

    /// Subscribe to snapshot updates.
    ///
    /// The receiver observes each replacement; await
    /// [`watch::Receiver::changed`] to react to new reports.
    pub fn subscribe(&self) -> watch::Receiver<Option<TelemetrySnapshot>> {
        self.rx.clone()
    }
}

impl Default for TelemetryCache {
    fn default() -> Self {
        Self::new()
    }
}
