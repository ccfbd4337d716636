//! The three-way reconciliation engine.
//!
//! Owns the working configuration document and reconciles it between
//! the local cache, the device, and the hub's version-numbered store.
//! Telemetry acknowledgements are the only steady-state signal: every
//! flush response is inspected for configuration drift, device info
//! drift, and pending commands.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, info, instrument, warn};

use crate::device::Device;
use crate::model::{Command, CommandStatus, ConfigDocument, TelemetryAck};
use crate::remote::RemoteApi;
use crate::store::ConfigStore;
use crate::telemetry::Telemetry;

/// Command executed by the engine itself: collect the device dump
/// and upload it to the hub.
const DUMP_COMMAND: &str = "dump";

pub struct SyncEngine {
    remote: RemoteApi,
    store: ConfigStore,
    device: Arc<dyn Device>,
    telemetry: Telemetry,
    keep_alive: Duration,

    /// Working document. The lock spans whole read-modify-push
    /// sequences so concurrent pushes cannot interleave their
    /// version increments.
    doc: Mutex<ConfigDocument>,

    /// Version of the last fetched device info document.
    info_version: AtomicU64,

    /// Id of the last command reported done; re-deliveries of it are
    /// dropped so non-idempotent commands never run twice.
    last_done_command: StdMutex<Option<u64>>,

    // Apply coalescing: whoever holds the guard drains the pending
    // flag; everyone else just sets it.
    apply_guard: Mutex<()>,
    apply_pending: AtomicBool,
}

impl SyncEngine {
    pub fn new(
        remote: RemoteApi,
        store: ConfigStore,
        device: Arc<dyn Device>,
        keep_alive: Duration,
    ) -> Self {
        Self {
            remote,
            store,
            device,
            // Status is offline until the device reports otherwise
            telemetry: Telemetry::new("offline", env!("CARGO_PKG_VERSION")),
            keep_alive,
            doc: Mutex::new(ConfigDocument::default()),
            info_version: AtomicU64::new(0),
            last_done_command: StdMutex::new(None),
            apply_guard: Mutex::new(()),
            apply_pending: AtomicBool::new(false),
        }
    }

    pub fn telemetry(&self) -> &Telemetry {
        &self.telemetry
    }

    pub async fn working_document(&self) -> ConfigDocument {
        self.doc.lock().await.clone()
    }

    /// Startup reconciliation: decide which of cache, hub, and
    /// built-in defaults is authoritative, and report the outcome
    /// back to the hub.
    ///
    /// Network failures never block startup; the engine proceeds
    /// with the best locally available document.
    #[instrument(skip_all, fields(uuid = %self.remote.uuid()))]
    pub async fn initial_sync(&self) {
        self.refresh_device_info().await;

        {
            let mut doc = self.doc.lock().await;
            self.device.collect_local_values(&mut doc);
        }

        let cached = match self.store.read(self.remote.uuid()).await {
            Ok(cached) => cached,
            Err(e) => {
                // treated the same as not-found
                warn!("failed to read cached configuration: {e}");
                None
            }
        };

        if let Some(mut cached_doc) = cached {
            debug!(version = cached_doc.version, "adopting cached configuration");
            self.device.override_read_only_fields(&mut cached_doc);
            let mut doc = self.doc.lock().await;
            *doc = cached_doc;
            // report what we have; the hub ignores stale versions
            self.push_locked(&mut doc).await;
            return;
        }

        match self.remote.get_config().await {
            Ok(fetched) if fetched.version > 0 => {
                debug!(version = fetched.version, "adopting hub configuration");
                // persist before any push so a crash mid-sync still
                // finds the provisioned document on the next start
                if let Err(e) = self.store.write(self.remote.uuid(), &fetched).await {
                    warn!("failed to cache configuration: {e}");
                }
                let mut adopted = fetched;
                self.device.override_read_only_fields(&mut adopted);
                let mut doc = self.doc.lock().await;
                *doc = adopted;
                // push back to normalize read-only fields on the hub
                self.push_locked(&mut doc).await;
            }
            Ok(_) => {
                debug!("device not provisioned on the hub, reporting defaults");
                let mut doc = self.doc.lock().await;
                self.push_locked(&mut doc).await;
            }
            Err(e) => {
                warn!("could not fetch configuration: {e}; continuing with local defaults");
            }
        }
    }

    /// Push the working document to the hub.
    ///
    /// The version is incremented before transmission and replaced
    /// with the hub's acknowledged version on success. On failure the
    /// incremented version stays in place; the next successful push
    /// reconciles it.
    async fn push_locked(&self, doc: &mut ConfigDocument) -> bool {
        doc.version += 1;
        doc.last_updated = Utc::now();
        match self.remote.set_config(doc).await {
            Ok(res) => {
                doc.version = res.version;
                true
            }
            Err(e) => {
                warn!(version = doc.version, "failed to push configuration: {e}");
                false
            }
        }
    }

    /// Inspect a telemetry acknowledgement for server-driven signals
    /// and run the follow-up actions.
    #[instrument(skip_all, fields(uuid = %self.remote.uuid()))]
    pub async fn handle_ack(&self, ack: &TelemetryAck) {
        let current = self.doc.lock().await.version;
        if ack.config_version > current {
            info!(
                local = current,
                remote = ack.config_version,
                "configuration drift detected"
            );
            self.maybe_apply().await;
        }

        if ack.info_version > self.info_version.load(Ordering::Acquire) {
            self.refresh_device_info().await;
        }

        if ack.command_pending {
            self.run_command_cycle().await;
        }

        if ack.new_licenses_pending {
            // surfaced to logs only; license handling lives outside
            // this agent
            debug!("license updates pending");
        }
    }

    /// Run at most one apply at a time; drift signals arriving while
    /// an apply is in flight are coalesced into a re-check once the
    /// current one completes.
    async fn maybe_apply(&self) {
        self.apply_pending.store(true, Ordering::SeqCst);

        let Ok(_guard) = self.apply_guard.try_lock() else {
            // the current holder will drain the pending flag
            return;
        };

        while self.apply_pending.swap(false, Ordering::SeqCst) {
            self.fetch_and_apply().await;
        }
    }

    /// Fetch the hub's document and adopt it: device hooks first,
    /// then cache, then the working document, then the push that
    /// obtains the canonical version. A failure at any step leaves
    /// the previously committed document and cache entry intact.
    async fn fetch_and_apply(&self) {
        let fetched = match self.remote.get_config().await {
            Ok(doc) => doc,
            Err(e) => {
                warn!("could not fetch configuration: {e}");
                return;
            }
        };

        let current = self.doc.lock().await.version;
        if fetched.version <= current {
            // a coalesced re-check after a completed apply lands here
            debug!(version = fetched.version, "fetched configuration is not newer");
            return;
        }

        let mut incoming = fetched;
        self.device.override_read_only_fields(&mut incoming);

        let applied = match self.device.apply_configuration(&incoming) {
            Ok(applied) => applied,
            Err(e) => {
                warn!(version = incoming.version, "device rejected configuration: {e}");
                return;
            }
        };

        if let Err(e) = self.store.write(self.remote.uuid(), &incoming).await {
            warn!("failed to cache configuration: {e}");
            return;
        }

        let (pushed, committed) = {
            let mut doc = self.doc.lock().await;
            *doc = incoming;
            let pushed = self.push_locked(&mut doc).await;
            (pushed, doc.clone())
        };

        self.device.on_config_applied(&committed);
        info!(version = committed.version, "configuration applied");

        if applied.restart_required {
            if pushed {
                info!("new configuration requires a restart");
                self.device.request_restart();
            } else {
                warn!("restart deferred: configuration push did not succeed");
            }
        }
    }

    async fn refresh_device_info(&self) {
        match self.remote.get_device_info().await {
            Ok(info) => {
                debug!(version = info.version, "device info updated");
                self.info_version.store(info.version, Ordering::Release);
                self.device.on_device_info_updated(&info);
            }
            Err(e) => warn!("could not fetch device info: {e}"),
        }
    }

    /// One poll/apply cycle: fetch the pending command, dispatch it,
    /// report completion. Failures are logged and left for the next
    /// drift signal to retry.
    async fn run_command_cycle(&self) {
        let cmd = match self.remote.get_command().await {
            Ok(Some(cmd)) => cmd,
            Ok(None) => {
                debug!("no command queued");
                return;
            }
            Err(e) => {
                warn!("could not fetch command: {e}");
                return;
            }
        };

        if cmd.status != CommandStatus::Pending {
            debug!(id = cmd.id, status = ?cmd.status, "ignoring non-pending command");
            return;
        }

        {
            let last_done = self
                .last_done_command
                .lock()
                .expect("command lock poisoned");
            if *last_done == Some(cmd.id) {
                debug!(id = cmd.id, "command already completed, ignoring re-delivery");
                return;
            }
        }

        if cmd.name == DUMP_COMMAND {
            self.run_dump_command(&cmd).await;
            return;
        }

        if !self.device.recognizes_command(&cmd.name) {
            // no status report either, to avoid poisoning the
            // server-side queue
            warn!(id = cmd.id, name = %cmd.name, "unknown command, ignoring");
            return;
        }

        // best effort; never block device action on an unreliable ack
        if let Err(e) = self
            .remote
            .report_command_status(CommandStatus::InProgress)
            .await
        {
            warn!(id = cmd.id, "failed to report command progress: {e}");
        }

        if let Err(e) = self.device.apply_command(&cmd) {
            warn!(id = cmd.id, name = %cmd.name, "command failed: {e}");
            return;
        }

        self.finish_command(&cmd).await;
    }

    async fn run_dump_command(&self, cmd: &Command) {
        if let Err(e) = self
            .remote
            .report_command_status(CommandStatus::InProgress)
            .await
        {
            warn!(id = cmd.id, "failed to report command progress: {e}");
        }

        let dump = match self.device.collect_diagnostic_dump() {
            Ok(dump) => dump,
            Err(e) => {
                warn!(id = cmd.id, "failed to collect diagnostic dump: {e}");
                return;
            }
        };

        if let Err(e) = self.remote.send_dump(dump).await {
            warn!(id = cmd.id, "failed to upload dump: {e}");
            return;
        }

        self.finish_command(cmd).await;
    }

    /// Record local completion, then report it. The command counts
    /// as complete even if the report fails; re-running a
    /// non-idempotent command is worse than a missed ack.
    async fn finish_command(&self, cmd: &Command) {
        {
            let mut last_done = self
                .last_done_command
                .lock()
                .expect("command lock poisoned");
            *last_done = Some(cmd.id);
        }

        if let Err(e) = self.remote.report_command_status(CommandStatus::Done).await {
            warn!(id = cmd.id, "failed to report command completion: {e}");
        }

        info!(id = cmd.id, name = %cmd.name, "command completed");
    }

    /// Flush the full telemetry snapshot and feed the
    /// acknowledgement back into drift detection. On failure the
    /// maps are untouched, so the next flush retries the same data.
    pub async fn flush_telemetry(&self) {
        let snapshot = self.telemetry.snapshot();
        match self.remote.send_telemetry(&snapshot).await {
            Ok(ack) => {
                if !ack.success {
                    warn!("hub flagged telemetry flush as failed");
                }
                self.handle_ack(&ack).await;
            }
            Err(e) => warn!("telemetry flush failed: {e}"),
        }
    }

    /// The engine's lifetime loop: change-triggered flushes and the
    /// fixed keep-alive interval, both serialized through this single
    /// flush path.
    #[instrument(name = "sync", skip_all, fields(uuid = %self.remote.uuid()))]
    pub async fn run(&self, mut shutdown: broadcast::Receiver<()>) {
        // The first keep-alive fires one full interval after
        // startup; initial sync already talked to the hub.
        let mut keep_alive = tokio::time::interval_at(
            tokio::time::Instant::now() + self.keep_alive,
            self.keep_alive,
        );

        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    info!("shutting down");
                    break;
                }

                _ = self.telemetry.changed() => {
                    self.flush_telemetry().await;
                }

                _ = keep_alive.tick() => {
                    debug!("keep-alive flush");
                    self.flush_telemetry().await;
                }
            }
        }
    }
}
