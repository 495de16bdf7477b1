// SPDX-License-Identifier: GPL-3.0-only
use chrono::Utc;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time::{Instant, sleep_until};
use tracing::{debug, info, warn};
use url::Url;

use crate::checker::{CheckError, CheckItem, UpdateChecker, UpdateResults};
use crate::config::Configurator;
use crate::crx::{CrxComponent, ItemDetails, ReadyCallback, State, VersionedItem, crx_id_from_pk_hash};
use crate::downloader::{CrxDownloader, DownloadMode, DownloadOutcome, ProgressCallback};
use crate::engine::events::{Event, Status};
use crate::engine::service::ComponentUpdateService;
use crate::errors::{ErrorCategory, SERVICE_UPDATES_DISABLED};
use crate::ping::PingManager;
use crate::unpacker::{ComponentUnpacker, UnpackError, UnpackJob};
use crate::version::Version;

const EVENT_CAPACITY: usize = 256;

/// Requests sent by `ComponentUpdateService` handles.
pub(crate) enum Command {
    Start,
    Stop,
    /// Stop, finish the operation in flight and exit, even while handles
    /// are still alive.
    Shutdown,
    Register {
        component: CrxComponent,
        reply: oneshot::Sender<Status>,
    },
    Unregister {
        id: String,
        reply: oneshot::Sender<Status>,
    },
    OnDemandUpdate {
        id: String,
        reply: oneshot::Sender<Status>,
    },
    MaybeThrottle {
        id: String,
        callback: ReadyCallback,
    },
    ComponentIds {
        reply: oneshot::Sender<Vec<String>>,
    },
    ComponentDetails {
        id: String,
        reply: oneshot::Sender<Option<ItemDetails>>,
    },
}

/// Results of work the engine handed to other tasks.
enum Completion {
    CheckComplete(Result<UpdateResults, CheckError>),
    DownloadProgress { id: String, bytes: u64 },
    DownloadComplete { id: String, outcome: DownloadOutcome },
    InstallComplete { id: String, result: Result<(), UnpackError> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StepDelay {
    /// More work is ready in this cycle
    Short,
    /// An item just finished its download and install
    Medium,
    /// The cycle is over
    Long,
}

/// The scheduler and state machine.
///
/// Owns every `VersionedItem` and runs as a single task. Checks, downloads
/// and installs run elsewhere and report back through the completion
/// channel, so item state is only ever touched here. At most one of those
/// operations is in flight at any time.
pub struct UpdateEngine {
    config: Arc<dyn Configurator>,
    checker: Arc<dyn UpdateChecker>,
    downloader: Arc<dyn CrxDownloader>,
    unpacker: ComponentUnpacker,
    pings: PingManager,

    items: Vec<VersionedItem>,
    running: bool,
    busy: bool,
    timer: Option<Instant>,

    events: broadcast::Sender<Event>,
    outcomes: broadcast::Sender<ItemDetails>,
    commands: mpsc::UnboundedReceiver<Command>,
    commands_open: bool,
    completions_tx: mpsc::UnboundedSender<Completion>,
    completions: mpsc::UnboundedReceiver<Completion>,
}

impl UpdateEngine {
    pub fn new(
        config: Arc<dyn Configurator>,
        checker: Arc<dyn UpdateChecker>,
        downloader: Arc<dyn CrxDownloader>,
        pings: PingManager,
    ) -> (Self, ComponentUpdateService) {
        let (commands_tx, commands) = mpsc::unbounded_channel();
        let (completions_tx, completions) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let (outcomes, _) = broadcast::channel(EVENT_CAPACITY);
        let scratch_root: PathBuf = config.download_dir();

        let engine = Self {
            unpacker: ComponentUnpacker::new(scratch_root),
            config,
            checker,
            downloader,
            pings,
            items: Vec::new(),
            running: false,
            busy: false,
            timer: None,
            events: events.clone(),
            outcomes: outcomes.clone(),
            commands,
            commands_open: true,
            completions_tx,
            completions,
        };

        (engine, ComponentUpdateService::new(commands_tx, events, outcomes))
    }

    /// Drive the engine until every service handle is dropped and the
    /// operation in flight, if any, has completed.
    pub async fn run(mut self) {
        info!("Update engine running");

        loop {
            let deadline = self.timer;
            tokio::select! {
                biased;
                command = self.commands.recv(), if self.commands_open => match command {
                    Some(command) => self.on_command(command),
                    None => {
                        debug!("All service handles dropped");
                        self.commands_open = false;
                        self.stop();
                    }
                },
                Some(completion) = self.completions.recv() => self.on_completion(completion),
                _ = wait_until(deadline) => {
                    self.timer = None;
                    self.process_pending_items();
                }
            }

            if !self.commands_open && !self.busy {
                break;
            }
        }

        info!("Update engine stopped");
    }

    fn on_command(&mut self, command: Command) {
        match command {
            Command::Start => self.start(),
            Command::Stop => self.stop(),
            Command::Shutdown => {
                info!("Update engine shutting down");
                self.commands_open = false;
                self.stop();
            }
            Command::Register { component, reply } => {
                let _ = reply.send(self.register_component(component));
            }
            Command::Unregister { id, reply } => {
                let _ = reply.send(self.unregister_component(&id));
            }
            Command::OnDemandUpdate { id, reply } => {
                let status = match self.position(&id) {
                    Some(index) => self.on_demand_update_internal(index),
                    None => Status::Error,
                };
                let _ = reply.send(status);
            }
            Command::MaybeThrottle { id, callback } => self.maybe_throttle(&id, callback),
            Command::ComponentIds { reply } => {
                let _ = reply.send(self.items.iter().map(|item| item.id.clone()).collect());
            }
            Command::ComponentDetails { id, reply } => {
                let _ = reply.send(self.position(&id).map(|index| self.items[index].details()));
            }
        }
    }

    fn on_completion(&mut self, completion: Completion) {
        match completion {
            Completion::CheckComplete(result) => self.on_check_complete(result),
            Completion::DownloadProgress { id, bytes } => {
                debug!(id = %id, bytes, "Download progress");
                self.notify(Event::UpdateDownloading(id));
            }
            Completion::DownloadComplete { id, outcome } => self.on_download_complete(&id, outcome),
            Completion::InstallComplete { id, result } => self.on_install_complete(&id, result),
        }
    }

    fn start(&mut self) {
        self.running = true;
        if self.items.is_empty() {
            return;
        }

        self.notify(Event::UpdaterStarted);
        let delay = self.config.initial_delay();
        info!(?delay, "First update pass scheduled");
        self.arm_timer(delay);
    }

    fn stop(&mut self) {
        info!("Update engine stopping");
        self.running = false;
        self.timer = None;
    }

    fn register_component(&mut self, component: CrxComponent) -> Status {
        if component.pk_hash.is_empty() {
            warn!(name = %component.name, "Rejecting component without public key hash");
            return Status::Error;
        }

        let id = crx_id_from_pk_hash(&component.pk_hash);
        if let Some(index) = self.position(&id) {
            info!(id = %id, name = %component.name, "Replacing registered component");
            let item = &mut self.items[index];
            item.component = component;
            item.unregistered = false;
            return Status::Replaced;
        }

        info!(id = %id, name = %component.name, version = %component.version, "Registering component");
        self.items.push(VersionedItem::new(id, component));

        // The first component starts the loop. Later ones restart a sleeping
        // loop; a busy loop picks them up on its next pass.
        if self.running {
            if self.items.len() == 1 {
                self.start();
            } else if self.timer.is_some() || !self.busy {
                self.arm_timer(self.config.initial_delay());
            }
        }

        Status::Ok
    }

    fn unregister_component(&mut self, id: &str) -> Status {
        let Some(index) = self.position(id) else {
            return Status::Error;
        };

        info!(id = %id, "Unregistering component");
        self.items[index].unregistered = true;

        if !self.busy {
            self.schedule_next_run(StepDelay::Short);
        }
        Status::Ok
    }

    fn maybe_throttle(&mut self, id: &str, callback: ReadyCallback) {
        let status = match self.position(id) {
            Some(index) => self.on_demand_update_with_cooldown(index),
            None => Status::Error,
        };

        match (status, self.position(id)) {
            (Status::Ok | Status::InProgress, Some(index)) => {
                self.items[index].ready_callbacks.push(callback);
            }
            _ => callback(),
        }
    }

    fn on_demand_update_with_cooldown(&mut self, index: usize) -> Status {
        let cooldown = self.config.on_demand_delay();
        if let Some(elapsed) = self.items[index].since_last_check(Utc::now()) {
            if too_soon(elapsed, cooldown) {
                debug!(id = %self.items[index].id, "On-demand request inside cooldown");
                return Status::Error;
            }
        }

        self.on_demand_update_internal(index)
    }

    fn on_demand_update_internal(&mut self, index: usize) -> Status {
        self.items[index].on_demand = true;

        // An item that already has an update keeps going; anything else gets
        // a fresh check unless it is in the middle of one.
        let state = self.items[index].state;
        if state != State::CanUpdate {
            let status = service_status(state);
            if status == Status::InProgress {
                return status;
            }
            self.change_item_state(index, State::New);
        }

        if self.timer.is_some() || (self.running && !self.busy) {
            self.arm_timer(self.config.step_delay());
        }

        info!(id = %self.items[index].id, "On-demand update requested");
        Status::Ok
    }

    /// One pass of the main loop: update one ready item, otherwise drop
    /// unregistered items and check for updates, otherwise sleep.
    fn process_pending_items(&mut self) {
        if self.busy {
            debug!("Operation in flight, skipping pass");
            return;
        }

        if let Some(index) = self.find_ready_component() {
            self.update_component(index);
            return;
        }

        self.uninstall_unregistered_items();

        if !self.check_for_updates() {
            self.schedule_next_run(StepDelay::Long);
        }
    }

    fn find_ready_component(&self) -> Option<usize> {
        let ready =
            |item: &VersionedItem| item.state == State::CanUpdate && !item.unregistered;

        self.items
            .iter()
            .position(|item| item.on_demand && ready(item))
            .or_else(|| self.items.iter().position(ready))
    }

    fn uninstall_unregistered_items(&mut self) {
        let (gone, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut self.items)
            .into_iter()
            .partition(|item| item.unregistered);
        self.items = kept;

        for item in gone {
            info!(id = %item.id, name = %item.component.name, "Uninstalling unregistered component");
            let installer = Arc::clone(&item.component.installer);
            let id = item.id.clone();
            tokio::task::spawn_blocking(move || {
                if let Err(e) = installer.uninstall() {
                    warn!(id = %id, error = %e, "Uninstall failed");
                }
            });

            for callback in item.ready_callbacks {
                callback();
            }
        }
    }

    fn check_for_updates(&mut self) -> bool {
        let now = Utc::now();
        let minimum_wait = self.config.minimum_recheck_wait();

        let mut batch = Vec::new();
        for index in 0..self.items.len() {
            let item = &self.items[index];
            if !item.state.is_checkable() {
                continue;
            }
            if !item.on_demand {
                if let Some(elapsed) = item.since_last_check(now) {
                    if too_soon(elapsed, minimum_wait) {
                        debug!(id = %item.id, "Checked recently, skipping");
                        continue;
                    }
                }
            }

            let item = &mut self.items[index];
            item.reset_for_check(now);
            batch.push(CheckItem::from_item(item));
            self.change_item_state(index, State::Checking);
        }

        if batch.is_empty() {
            return false;
        }

        info!(components = batch.len(), "Checking for updates");
        self.busy = true;

        let checker = Arc::clone(&self.checker);
        let extra = self.config.extra_request_params();
        let tx = self.completions_tx.clone();
        tokio::spawn(async move {
            let result = checker.check_for_updates(batch, &extra).await;
            let _ = tx.send(Completion::CheckComplete(result));
        });

        true
    }

    fn on_check_complete(&mut self, result: Result<UpdateResults, CheckError>) {
        self.busy = false;

        match result {
            Ok(results) => self.on_update_check_succeeded(results),
            Err(e) => {
                warn!(error = %e, "Update check failed");
                for index in 0..self.items.len() {
                    if self.items[index].state == State::Checking {
                        self.items[index].error_category = ErrorCategory::Network;
                        self.items[index].error_code = e.code();
                        self.change_item_state(index, State::NoUpdate);
                    }
                }
                self.schedule_next_run(StepDelay::Long);
            }
        }
    }

    fn on_update_check_succeeded(&mut self, results: UpdateResults) {
        let host_version = self.config.host_version();
        let mut pending = 0;

        for result in results.list {
            let Some(index) = self.position(&result.extension_id) else {
                continue;
            };
            if self.items[index].state != State::Checking {
                continue;
            }

            let manifest = &result.manifest;
            let id = self.items[index].id.clone();

            if manifest.version.is_empty() {
                debug!(id = %id, "No update available");
                self.change_item_state(index, State::NoUpdate);
                continue;
            }

            if !self.items[index].component.version.is_older_than(&manifest.version) {
                debug!(id = %id, offered = %manifest.version, "Component already up to date");
                self.change_item_state(index, State::UpToDate);
                continue;
            }

            if !manifest.browser_min_version.is_empty()
                && host_version.is_older_than(&manifest.browser_min_version)
            {
                info!(id = %id, required = %manifest.browser_min_version, "Update needs a newer host");
                self.change_item_state(index, State::NoUpdate);
                continue;
            }

            if manifest.packages.len() != 1 {
                warn!(id = %id, packages = manifest.packages.len(), "Ignoring update without exactly one package");
                self.change_item_state(index, State::NoUpdate);
                continue;
            }

            if !self.items[index].component.updates_enabled {
                info!(id = %id, "Update found but updates are disabled for this component");
                self.items[index].error_category = ErrorCategory::Service;
                self.items[index].error_code = SERVICE_UPDATES_DISABLED;
                self.change_item_state(index, State::NoUpdate);
                self.send_ping(index);
                continue;
            }

            let package = &manifest.packages[0];
            let item = &mut self.items[index];
            item.next_version = Version::parse(&manifest.version);
            item.next_fp = package.fingerprint.clone();
            item.package_hash = non_empty(&package.hash_sha256);
            item.package_hashdiff = non_empty(&package.hashdiff_sha256);
            item.crx_urls = resolve_urls(&result.crx_urls, &package.name);
            item.crx_diffurls = if package.namediff.is_empty() {
                Vec::new()
            } else {
                resolve_urls(&result.crx_diffurls, &package.namediff)
            };

            info!(id = %id, version = %manifest.version, "Update found");
            self.change_item_state(index, State::CanUpdate);
            pending += 1;
        }

        // Anything the server didn't mention has nothing new.
        self.change_items_from(State::Checking, State::UpToDate);

        self.schedule_next_run(if pending > 0 {
            StepDelay::Short
        } else {
            StepDelay::Long
        });
    }

    fn update_component(&mut self, index: usize) {
        let use_diff = {
            let item = &self.items[index];
            item.has_diff_update() && !item.diff_update_failed && self.config.deltas_enabled()
        };

        // Background transfers only ever carry full packages.
        let (urls, allow_background): (Vec<Url>, bool) = if use_diff {
            self.change_item_state(index, State::DownloadingDiff);
            (self.items[index].crx_diffurls.clone(), false)
        } else {
            self.change_item_state(index, State::Downloading);
            let item = &self.items[index];
            (item.crx_urls.clone(), item.component.allow_background_download)
        };

        let item = &self.items[index];
        let mode = if !item.on_demand && allow_background && self.config.use_background_downloader() {
            DownloadMode::Background
        } else {
            DownloadMode::Foreground
        };

        info!(id = %item.id, diff = use_diff, ?mode, urls = urls.len(), "Downloading update");
        self.busy = true;

        let id = item.id.clone();
        let downloader = Arc::clone(&self.downloader);
        let tx = self.completions_tx.clone();
        tokio::spawn(async move {
            let progress_tx = tx.clone();
            let progress_id = id.clone();
            let progress: ProgressCallback = Arc::new(move |bytes| {
                let _ = progress_tx.send(Completion::DownloadProgress {
                    id: progress_id.clone(),
                    bytes,
                });
            });

            let outcome = downloader.download(&urls, mode, progress).await;
            let _ = tx.send(Completion::DownloadComplete { id, outcome });
        });
    }

    fn on_download_complete(&mut self, id: &str, outcome: DownloadOutcome) {
        self.busy = false;

        let Some(index) = self.position(id) else {
            warn!(id = %id, "Download finished for unknown component");
            if let Ok(path) = outcome.result {
                let _ = std::fs::remove_file(path);
            }
            self.schedule_next_run(StepDelay::Medium);
            return;
        };

        let item = &mut self.items[index];
        item.download_metrics.extend(outcome.metrics);
        let is_diff = item.state == State::DownloadingDiff;

        match outcome.result {
            Err(e) if is_diff => {
                warn!(id = %id, error = %e, "Differential download failed, falling back to full package");
                item.diff_error_category = ErrorCategory::Network;
                item.diff_error_code = e.code();
                item.diff_update_failed = true;
                self.change_item_state(index, State::CanUpdate);
                self.schedule_next_run(StepDelay::Short);
            }
            Err(e) => {
                warn!(id = %id, error = %e, "Download failed");
                item.error_category = ErrorCategory::Network;
                item.error_code = e.code();
                self.change_item_state(index, State::NoUpdate);
                self.send_ping(index);
                self.schedule_next_run(StepDelay::Medium);
            }
            Ok(path) => {
                let next = if is_diff { State::UpdatingDiff } else { State::Updating };
                self.change_item_state(index, next);
                self.install(index, path, is_diff);
            }
        }
    }

    fn install(&mut self, index: usize, crx_path: PathBuf, is_diff: bool) {
        let item = &self.items[index];
        let job = UnpackJob {
            crx_path,
            expected_hash: if is_diff {
                item.package_hashdiff.clone()
            } else {
                item.package_hash.clone()
            },
            is_delta: is_diff,
            fingerprint: item.next_fp.clone(),
        };

        let id = item.id.clone();
        let installer = Arc::clone(&item.component.installer);
        let unpacker = self.unpacker.clone();
        let tx = self.completions_tx.clone();
        self.busy = true;

        tokio::spawn(async move {
            let result = tokio::task::spawn_blocking(move || unpacker.unpack(&job, installer.as_ref()))
                .await
                .unwrap_or_else(|e| {
                    Err(UnpackError::Io(std::io::Error::other(format!(
                        "install worker failed: {}",
                        e
                    ))))
                });
            let _ = tx.send(Completion::InstallComplete { id, result });
        });
    }

    fn on_install_complete(&mut self, id: &str, result: Result<(), UnpackError>) {
        self.busy = false;

        let Some(index) = self.position(id) else {
            warn!(id = %id, "Install finished for unknown component");
            self.schedule_next_run(StepDelay::Medium);
            return;
        };

        let category = match &result {
            Ok(()) => ErrorCategory::None,
            Err(e) if e.is_installer_error() => ErrorCategory::Install,
            Err(_) => ErrorCategory::Unpack,
        };

        let item = &mut self.items[index];
        match result {
            Err(e) if item.state == State::UpdatingDiff => {
                warn!(id = %id, error = %e, "Differential install failed, falling back to full package");
                item.diff_error_category = category;
                item.diff_error_code = e.code();
                item.diff_extra_code1 = e.extra_code();
                item.diff_update_failed = true;
                self.change_item_state(index, State::CanUpdate);
                self.schedule_next_run(StepDelay::Short);
                return;
            }
            Ok(()) => {
                if let Some(next) = item.next_version.clone() {
                    item.component.version = next;
                }
                item.component.fingerprint = item.next_fp.clone();
                info!(id = %id, version = %item.component.version, "Component updated");
                self.change_item_state(index, State::Updated);
            }
            Err(e) => {
                warn!(id = %id, error = %e, "Install failed");
                item.error_category = category;
                item.error_code = e.code();
                item.extra_code1 = e.extra_code();
                self.change_item_state(index, State::NoUpdate);
            }
        }

        self.send_ping(index);
        self.schedule_next_run(StepDelay::Medium);
    }

    fn schedule_next_run(&mut self, step: StepDelay) {
        // Stop() may have landed while an operation was in flight.
        if !self.running {
            debug!("Engine stopped, not scheduling another pass");
            return;
        }

        let delay = if self.items.iter().any(|item| item.on_demand) {
            self.config.step_delay()
        } else {
            match step {
                StepDelay::Short => self.config.step_delay(),
                StepDelay::Medium => self.config.step_delay_medium(),
                StepDelay::Long => self.config.next_check_delay(),
            }
        };

        if step != StepDelay::Short {
            self.notify(Event::UpdaterSleeping);
            if delay.is_zero() {
                debug!("Zero delay, waiting for the next request");
                self.timer = None;
                return;
            }
        }

        debug!(?delay, ?step, "Next pass scheduled");
        self.arm_timer(delay);
    }

    /// A delay too large to represent parks the loop like a zero one.
    fn arm_timer(&mut self, delay: Duration) {
        self.timer = Instant::now().checked_add(delay);
        if self.timer.is_none() {
            warn!(?delay, "Delay out of range, waiting for the next request");
        }
    }

    /// The only place an item's state changes.
    fn change_item_state(&mut self, index: usize, to: State) {
        let item = &mut self.items[index];
        if to.is_terminal() {
            item.on_demand = false;
        }
        debug!(id = %item.id, from = ?item.state, to = ?to, "State change");
        item.state = to;

        let id = item.id.clone();
        let event = match to {
            State::Checking => Some(Event::CheckingForUpdates(id)),
            State::CanUpdate => Some(Event::UpdateFound(id)),
            State::UpdatingDiff | State::Updating => Some(Event::UpdateReady(id)),
            State::Updated => Some(Event::Updated(id)),
            State::UpToDate | State::NoUpdate => Some(Event::NotUpdated(id)),
            State::New | State::Downloading | State::DownloadingDiff => None,
        };
        if let Some(event) = event {
            self.notify(event);
        }

        if to.is_terminal() {
            let _ = self.outcomes.send(self.items[index].details());
            for callback in std::mem::take(&mut self.items[index].ready_callbacks) {
                callback();
            }
        }
    }

    fn change_items_from(&mut self, from: State, to: State) -> usize {
        let mut count = 0;
        for index in 0..self.items.len() {
            if self.items[index].state == from {
                self.change_item_state(index, to);
                count += 1;
            }
        }
        count
    }

    fn send_ping(&self, index: usize) {
        self.pings.on_update_complete(&self.items[index].details());
    }

    fn notify(&self, event: Event) {
        debug!(id = event.id(), ?event, "Engine event");
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    fn position(&self, id: &str) -> Option<usize> {
        self.items.iter().position(|item| item.id == id)
    }
}

fn service_status(state: State) -> Status {
    match state {
        State::Checking | State::CanUpdate => Status::InProgress,
        state if state.is_downloading() || state.is_updating() => Status::InProgress,
        _ => Status::Ok,
    }
}

/// A negative elapsed time (clock moved back) also counts as too soon.
fn too_soon(elapsed: chrono::Duration, wait: Duration) -> bool {
    elapsed.to_std().map_or(true, |elapsed| elapsed < wait)
}

fn non_empty(value: &str) -> Option<String> {
    (!value.is_empty()).then(|| value.to_string())
}

fn resolve_urls(bases: &[Url], name: &str) -> Vec<Url> {
    bases.iter().filter_map(|base| base.join(name).ok()).collect()
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending::<()>().await,
    }
}
