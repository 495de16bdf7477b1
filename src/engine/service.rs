// SPDX-License-Identifier: GPL-3.0-only
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::warn;

use crate::checker::UpdateChecker;
use crate::config::Configurator;
use crate::crx::{CrxComponent, ItemDetails, ReadyCallback};
use crate::downloader::CrxDownloader;
use crate::engine::engine::{Command, UpdateEngine};
use crate::engine::events::{Event, Status};
use crate::ping::PingManager;

/// Cloneable handle to a running `UpdateEngine`.
///
/// Every request is a message to the engine task. Once the engine is gone,
/// requests answer `Status::Error` or empty results.
#[derive(Clone)]
pub struct ComponentUpdateService {
    commands: mpsc::UnboundedSender<Command>,
    events: broadcast::Sender<Event>,
    outcomes: broadcast::Sender<ItemDetails>,
}

impl ComponentUpdateService {
    pub(crate) fn new(
        commands: mpsc::UnboundedSender<Command>,
        events: broadcast::Sender<Event>,
        outcomes: broadcast::Sender<ItemDetails>,
    ) -> Self {
        Self {
            commands,
            events,
            outcomes,
        }
    }

    /// Build an engine and run it on its own task. The task ends after every
    /// handle has been dropped.
    pub fn spawn(
        config: Arc<dyn Configurator>,
        checker: Arc<dyn UpdateChecker>,
        downloader: Arc<dyn CrxDownloader>,
        pings: PingManager,
    ) -> (Self, JoinHandle<()>) {
        let (engine, service) = UpdateEngine::new(config, checker, downloader, pings);
        (service, tokio::spawn(engine.run()))
    }

    pub fn start(&self) {
        self.send(Command::Start);
    }

    pub fn stop(&self) {
        self.send(Command::Stop);
    }

    /// Stop the engine and let its task end once the operation in flight,
    /// if any, completes. Later requests answer `Status::Error`.
    pub fn shutdown(&self) {
        self.send(Command::Shutdown);
    }

    pub async fn register_component(&self, component: CrxComponent) -> Status {
        self.request(|reply| Command::Register { component, reply })
            .await
            .unwrap_or(Status::Error)
    }

    pub async fn unregister_component(&self, id: &str) -> Status {
        let id = id.to_string();
        self.request(|reply| Command::Unregister { id, reply })
            .await
            .unwrap_or(Status::Error)
    }

    /// Check `id` as soon as possible, bypassing the recheck wait.
    pub async fn on_demand_update(&self, id: &str) -> Status {
        let id = id.to_string();
        self.request(|reply| Command::OnDemandUpdate { id, reply })
            .await
            .unwrap_or(Status::Error)
    }

    /// Run `callback` once `id` has been brought up to date, or right away
    /// if no update can be started for it.
    pub fn maybe_throttle(&self, id: &str, callback: ReadyCallback) {
        let command = Command::MaybeThrottle {
            id: id.to_string(),
            callback,
        };
        if let Err(mpsc::error::SendError(command)) = self.commands.send(command) {
            warn!(id = %id, "Update engine is gone, not throttling");
            if let Command::MaybeThrottle { callback, .. } = command {
                callback();
            }
        }
    }

    /// Async form of `maybe_throttle`.
    pub async fn throttle(&self, id: &str) {
        let (tx, rx) = oneshot::channel();
        self.maybe_throttle(
            id,
            Box::new(move || {
                let _ = tx.send(());
            }),
        );
        let _ = rx.await;
    }

    pub async fn component_ids(&self) -> Vec<String> {
        self.request(|reply| Command::ComponentIds { reply })
            .await
            .unwrap_or_default()
    }

    pub async fn component_details(&self, id: &str) -> Option<ItemDetails> {
        let id = id.to_string();
        self.request(|reply| Command::ComponentDetails { id, reply })
            .await
            .flatten()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.events.subscribe()
    }

    /// Snapshot of each item taken as it reaches a terminal state.
    pub fn subscribe_outcomes(&self) -> broadcast::Receiver<ItemDetails> {
        self.outcomes.subscribe()
    }

    fn send(&self, command: Command) {
        if self.commands.send(command).is_err() {
            warn!("Update engine is gone");
        }
    }

    async fn request<T>(&self, build: impl FnOnce(oneshot::Sender<T>) -> Command) -> Option<T> {
        let (tx, rx) = oneshot::channel();
        if self.commands.send(build(tx)).is_err() {
            warn!("Update engine is gone");
            return None;
        }
        rx.await.ok()
    }
}
