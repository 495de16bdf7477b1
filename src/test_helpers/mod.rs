// SPDX-License-Identifier: GPL-3.0-only
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::collections::{HashMap, VecDeque};
use std::io::{Cursor, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{Semaphore, broadcast};
use url::Url;

use crate::checker::{CheckError, CheckItem, Manifest, Package, UpdateChecker, UpdateResult, UpdateResults};
use crate::config::Configurator;
use crate::crx::{CrxComponent, ItemDetails, VersionedItem, crx_id_from_pk_hash};
use crate::downloader::{
    CrxDownloader, DownloadError, DownloadMetrics, DownloadMode, DownloadOutcome, ProgressCallback,
};
use crate::engine::Event;
use crate::installer::{CrxInstaller, InstallError, InstallManifest, InstallerTraits};
use crate::version::Version;

/// Configurator with zero delays so tests run at full speed.
#[derive(Debug, Clone)]
pub struct TestConfigurator {
    pub update_urls: Vec<Url>,
    pub ping_urls: Vec<Url>,
    pub download_dir: PathBuf,
    pub initial_delay: Duration,
    pub next_check_delay: Duration,
    pub step_delay: Duration,
    pub step_delay_medium: Duration,
    pub minimum_recheck_wait: Duration,
    pub on_demand_delay: Duration,
    pub host_version: Version,
    pub deltas_enabled: bool,
    pub background: bool,
    pub extra: String,
}

impl Default for TestConfigurator {
    fn default() -> Self {
        Self {
            update_urls: Vec::new(),
            ping_urls: Vec::new(),
            download_dir: std::env::temp_dir().join("crx-updater-test"),
            initial_delay: Duration::ZERO,
            // Zero parks the loop once a cycle is over
            next_check_delay: Duration::ZERO,
            step_delay: Duration::ZERO,
            step_delay_medium: Duration::from_millis(1),
            minimum_recheck_wait: Duration::from_secs(3600),
            on_demand_delay: Duration::ZERO,
            host_version: Version::parse("30.0").unwrap(),
            deltas_enabled: true,
            background: false,
            extra: String::new(),
        }
    }
}

impl Configurator for TestConfigurator {
    fn initial_delay(&self) -> Duration {
        self.initial_delay
    }

    fn next_check_delay(&self) -> Duration {
        self.next_check_delay
    }

    fn step_delay(&self) -> Duration {
        self.step_delay
    }

    fn step_delay_medium(&self) -> Duration {
        self.step_delay_medium
    }

    fn minimum_recheck_wait(&self) -> Duration {
        self.minimum_recheck_wait
    }

    fn on_demand_delay(&self) -> Duration {
        self.on_demand_delay
    }

    fn update_urls(&self) -> Vec<Url> {
        self.update_urls.clone()
    }

    fn ping_urls(&self) -> Vec<Url> {
        self.ping_urls.clone()
    }

    fn host_version(&self) -> Version {
        self.host_version.clone()
    }

    fn channel(&self) -> String {
        "test".to_string()
    }

    fn lang(&self) -> String {
        "en".to_string()
    }

    fn extra_request_params(&self) -> String {
        self.extra.clone()
    }

    fn deltas_enabled(&self) -> bool {
        self.deltas_enabled
    }

    fn use_background_downloader(&self) -> bool {
        self.background
    }

    fn download_dir(&self) -> PathBuf {
        self.download_dir.clone()
    }
}

/// Counts how many guarded sections run at the same time.
#[derive(Debug, Default)]
pub struct ConcurrencyProbe {
    current: AtomicUsize,
    peak: AtomicUsize,
}

pub struct ProbeGuard<'a>(&'a ConcurrencyProbe);

impl ConcurrencyProbe {
    pub fn enter(&self) -> ProbeGuard<'_> {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        ProbeGuard(self)
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

impl Drop for ProbeGuard<'_> {
    fn drop(&mut self) {
        self.0.current.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Update checker answering from a script. An empty script means nothing
/// is offered.
#[derive(Default)]
pub struct FakeChecker {
    responses: Mutex<VecDeque<Result<UpdateResults, CheckError>>>,
    batches: Mutex<Vec<Vec<CheckItem>>>,
    /// When set, every check waits for a permit before answering
    pub gate: Option<Arc<Semaphore>>,
    pub probe: Option<Arc<ConcurrencyProbe>>,
}

impl FakeChecker {
    pub fn with_gate(gate: Arc<Semaphore>) -> Self {
        Self {
            gate: Some(gate),
            ..Self::default()
        }
    }

    pub fn push(&self, response: Result<UpdateResults, CheckError>) {
        self.responses.lock().unwrap().push_back(response);
    }

    pub fn batches(&self) -> Vec<Vec<CheckItem>> {
        self.batches.lock().unwrap().clone()
    }

    pub fn calls(&self) -> usize {
        self.batches.lock().unwrap().len()
    }
}

#[async_trait]
impl UpdateChecker for FakeChecker {
    async fn check_for_updates(
        &self,
        items: Vec<CheckItem>,
        _extra: &str,
    ) -> Result<UpdateResults, CheckError> {
        let _guard = self.probe.as_ref().map(|probe| probe.enter());
        self.batches.lock().unwrap().push(items);

        if let Some(gate) = &self.gate {
            let permit = gate.acquire().await.unwrap();
            permit.forget();
        }
        tokio::time::sleep(Duration::from_millis(5)).await;

        let next = self.responses.lock().unwrap().pop_front();
        next.unwrap_or_else(|| Ok(UpdateResults::default()))
    }
}

/// Downloader serving canned bodies by URL. Unknown URLs answer 404.
pub struct FakeDownloader {
    dir: PathBuf,
    bodies: Mutex<HashMap<String, Result<Vec<u8>, u16>>>,
    modes: Mutex<Vec<DownloadMode>>,
    requests: Mutex<Vec<Vec<Url>>>,
    pub probe: Option<Arc<ConcurrencyProbe>>,
}

impl FakeDownloader {
    pub fn new(dir: PathBuf) -> Self {
        Self {
            dir,
            bodies: Mutex::new(HashMap::new()),
            modes: Mutex::new(Vec::new()),
            requests: Mutex::new(Vec::new()),
            probe: None,
        }
    }

    pub fn serve(&self, url: &str, body: Vec<u8>) {
        self.bodies.lock().unwrap().insert(url.to_string(), Ok(body));
    }

    pub fn fail(&self, url: &str, status: u16) {
        self.bodies.lock().unwrap().insert(url.to_string(), Err(status));
    }

    pub fn modes(&self) -> Vec<DownloadMode> {
        self.modes.lock().unwrap().clone()
    }

    pub fn requests(&self) -> Vec<Vec<Url>> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl CrxDownloader for FakeDownloader {
    async fn download(
        &self,
        urls: &[Url],
        mode: DownloadMode,
        progress: ProgressCallback,
    ) -> DownloadOutcome {
        let _guard = self.probe.as_ref().map(|probe| probe.enter());
        self.modes.lock().unwrap().push(mode);
        self.requests.lock().unwrap().push(urls.to_vec());
        tokio::time::sleep(Duration::from_millis(5)).await;

        let mut metrics = Vec::new();
        let mut last_error = DownloadError::NoUrls;

        for url in urls {
            let body = self.bodies.lock().unwrap().get(url.as_str()).cloned();
            match body.unwrap_or(Err(404)) {
                Ok(bytes) => {
                    std::fs::create_dir_all(&self.dir).unwrap();
                    let path = self.dir.join(format!("{}.crx", uuid::Uuid::new_v4()));
                    std::fs::write(&path, &bytes).unwrap();
                    progress(bytes.len() as u64);
                    metrics.push(DownloadMetrics {
                        url: url.to_string(),
                        downloader: mode,
                        error: 0,
                        downloaded_bytes: bytes.len() as i64,
                        total_bytes: bytes.len() as i64,
                        download_time_ms: 1,
                    });
                    return DownloadOutcome {
                        result: Ok(path),
                        metrics,
                    };
                }
                Err(status) => {
                    metrics.push(DownloadMetrics {
                        url: url.to_string(),
                        downloader: mode,
                        error: i32::from(status),
                        downloaded_bytes: 0,
                        total_bytes: -1,
                        download_time_ms: 1,
                    });
                    last_error = DownloadError::Status(status);
                }
            }
        }

        DownloadOutcome {
            result: Err(last_error),
            metrics,
        }
    }
}

/// Installer traits that record what the installer asked of them.
pub struct RecordingTraits {
    base: PathBuf,
    name: String,
    pk_hash: Vec<u8>,
    pub verify_result: AtomicBool,
    pub custom_install_result: AtomicBool,
    pub auto_update: AtomicBool,
    pub background: AtomicBool,
    pub uninstall_calls: AtomicUsize,
    ready: Mutex<Vec<String>>,
}

impl RecordingTraits {
    pub fn new(base: PathBuf) -> Self {
        Self::with_key(base, "recording", 7)
    }

    pub fn with_key(base: PathBuf, name: &str, key: u8) -> Self {
        Self {
            base,
            name: name.to_string(),
            pk_hash: vec![key; 32],
            verify_result: AtomicBool::new(true),
            custom_install_result: AtomicBool::new(true),
            auto_update: AtomicBool::new(true),
            background: AtomicBool::new(false),
            uninstall_calls: AtomicUsize::new(0),
            ready: Mutex::new(Vec::new()),
        }
    }

    pub fn id(&self) -> String {
        crx_id_from_pk_hash(&self.pk_hash)
    }

    pub fn ready_versions(&self) -> Vec<String> {
        self.ready.lock().unwrap().clone()
    }
}

impl InstallerTraits for RecordingTraits {
    fn verify_installation(&self, _manifest: &InstallManifest, _install_dir: &Path) -> bool {
        self.verify_result.load(Ordering::SeqCst)
    }

    fn can_auto_update(&self) -> bool {
        self.auto_update.load(Ordering::SeqCst)
    }

    fn on_custom_install(&self, _manifest: &InstallManifest, _install_dir: &Path) -> bool {
        self.custom_install_result.load(Ordering::SeqCst)
    }

    fn on_component_ready(&self, version: &Version, _install_dir: &Path, _manifest: &InstallManifest) {
        self.ready.lock().unwrap().push(version.to_string());
    }

    fn base_directory(&self) -> PathBuf {
        self.base.clone()
    }

    fn public_key_hash(&self) -> Vec<u8> {
        self.pk_hash.clone()
    }

    fn name(&self) -> String {
        self.name.clone()
    }

    fn uninstall(&self) -> bool {
        self.uninstall_calls.fetch_add(1, Ordering::SeqCst);
        true
    }

    fn allow_background_download(&self) -> bool {
        self.background.load(Ordering::SeqCst)
    }
}

/// Installer that accepts everything and has no files.
pub struct NullInstaller;

impl CrxInstaller for NullInstaller {
    fn install(&self, _manifest: &InstallManifest, _unpack_path: &Path) -> Result<(), InstallError> {
        Ok(())
    }

    fn installed_file(&self, _relative: &str) -> Option<PathBuf> {
        None
    }

    fn uninstall(&self) -> Result<(), InstallError> {
        Ok(())
    }
}

/// Wraps an installer so its installs are counted by a probe.
pub struct ProbedInstaller {
    pub inner: Arc<dyn CrxInstaller>,
    pub probe: Arc<ConcurrencyProbe>,
}

impl CrxInstaller for ProbedInstaller {
    fn install(&self, manifest: &InstallManifest, unpack_path: &Path) -> Result<(), InstallError> {
        let _guard = self.probe.enter();
        std::thread::sleep(Duration::from_millis(5));
        self.inner.install(manifest, unpack_path)
    }

    fn installed_file(&self, relative: &str) -> Option<PathBuf> {
        self.inner.installed_file(relative)
    }

    fn uninstall(&self) -> Result<(), InstallError> {
        self.inner.uninstall()
    }
}

pub fn zip_bytes(entries: &[(&str, &str)]) -> Vec<u8> {
    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
    let options = zip::write::FileOptions::default();
    for (name, contents) in entries {
        writer.start_file(*name, options).unwrap();
        writer.write_all(contents.as_bytes()).unwrap();
    }
    writer.finish().unwrap().into_inner()
}

pub fn write_zip(path: &Path, entries: &[(&str, &str)]) {
    std::fs::write(path, zip_bytes(entries)).unwrap();
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// A full package for `version` with one payload file.
pub fn package_bytes(version: &str) -> Vec<u8> {
    let manifest = serde_json::json!({"name": "test", "version": version}).to_string();
    zip_bytes(&[("manifest.json", manifest.as_str()), ("data.txt", version)])
}

/// Check result offering `version` as `name` (and `namediff`, if not empty)
/// under `base`.
pub fn offer(id: &str, version: &str, base: &str, package: Package) -> UpdateResult {
    let base = Url::parse(base).unwrap();
    UpdateResult {
        extension_id: id.to_string(),
        manifest: Manifest {
            version: version.to_string(),
            browser_min_version: String::new(),
            packages: vec![package],
        },
        crx_urls: vec![base.clone()],
        crx_diffurls: vec![base],
    }
}

pub fn no_update(id: &str) -> UpdateResult {
    UpdateResult {
        extension_id: id.to_string(),
        ..UpdateResult::default()
    }
}

pub fn results(list: Vec<UpdateResult>) -> Result<UpdateResults, CheckError> {
    Ok(UpdateResults { list })
}

pub fn sample_details() -> ItemDetails {
    let component = CrxComponent::new(
        "sample",
        vec![1; 32],
        Version::parse("1.0").unwrap(),
        Arc::new(NullInstaller),
    );
    VersionedItem::new(crx_id_from_pk_hash(&[1; 32]), component).details()
}

/// Collect events until `wanted` shows up. Panics after ten seconds.
pub async fn wait_for(events: &mut broadcast::Receiver<Event>, wanted: &Event) -> Vec<Event> {
    let mut seen = Vec::new();
    let found = tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            match events.recv().await {
                Ok(event) => {
                    let done = &event == wanted;
                    seen.push(event);
                    if done {
                        return true;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return false,
            }
        }
    })
    .await;

    assert!(
        matches!(found, Ok(true)),
        "never saw {:?}, got {:?}",
        wanted,
        seen
    );
    seen
}
