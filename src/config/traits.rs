// SPDX-License-Identifier: GPL-3.0-only
use std::path::PathBuf;
use std::time::Duration;
use url::Url;

use crate::version::Version;

/// Policy and timing knobs consumed by the update engine.
pub trait Configurator: Send + Sync {
    /// Delay before the first pass after the engine starts
    fn initial_delay(&self) -> Duration;

    /// Delay between full check cycles
    fn next_check_delay(&self) -> Duration;

    /// Delay between steps of a cycle that still has work
    fn step_delay(&self) -> Duration;

    /// Delay after an item finished its download/install step
    fn step_delay_medium(&self) -> Duration;

    /// Minimum time between two background checks of the same item
    fn minimum_recheck_wait(&self) -> Duration;

    /// Minimum time between two throttled on-demand requests for the same item
    fn on_demand_delay(&self) -> Duration;

    fn update_urls(&self) -> Vec<Url>;

    /// Endpoints for completion pings. Empty disables pings.
    fn ping_urls(&self) -> Vec<Url>;

    /// Version of the host application, used for the minimum version gate
    fn host_version(&self) -> Version;

    fn channel(&self) -> String;

    fn lang(&self) -> String;

    fn os_name(&self) -> String {
        std::env::consts::OS.to_string()
    }

    fn arch(&self) -> String {
        std::env::consts::ARCH.to_string()
    }

    fn extra_request_params(&self) -> String;

    fn deltas_enabled(&self) -> bool;

    fn use_background_downloader(&self) -> bool;

    /// Where downloads land, including resumable background partials
    fn download_dir(&self) -> PathBuf;
}
