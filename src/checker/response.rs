// SPDX-License-Identifier: GPL-3.0-only
use serde::Deserialize;
use tracing::warn;
use url::Url;

use crate::checker::traits::CheckError;

/// Package described by an update manifest.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Package {
    pub name: String,
    pub namediff: String,
    pub fingerprint: String,
    pub hash_sha256: String,
    pub hashdiff_sha256: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Manifest {
    /// Empty when the server has no update for the app
    pub version: String,
    /// Minimum host version the update requires, empty if unrestricted
    pub browser_min_version: String,
    pub packages: Vec<Package>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpdateResult {
    pub extension_id: String,
    pub manifest: Manifest,
    /// Base URLs the full package name is resolved against
    pub crx_urls: Vec<Url>,
    /// Base URLs the differential package name is resolved against
    pub crx_diffurls: Vec<Url>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpdateResults {
    pub list: Vec<UpdateResult>,
}

#[derive(Debug, Deserialize)]
struct ResponseEnvelope {
    response: ResponseBody,
}

#[derive(Debug, Deserialize)]
struct ResponseBody {
    #[serde(default)]
    apps: Vec<AppResponse>,
}

#[derive(Debug, Deserialize)]
struct AppResponse {
    appid: String,
    #[serde(default)]
    status: Option<String>,
    updatecheck: Option<UpdateCheckResponse>,
}

#[derive(Debug, Deserialize)]
struct UpdateCheckResponse {
    status: String,
    #[serde(default)]
    urls: Option<UrlList>,
    #[serde(default)]
    manifest: Option<ManifestResponse>,
}

#[derive(Debug, Deserialize)]
struct UrlList {
    #[serde(default)]
    url: Vec<UrlEntry>,
}

#[derive(Debug, Deserialize)]
struct UrlEntry {
    codebase: Option<String>,
    codebasediff: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ManifestResponse {
    version: String,
    #[serde(default)]
    prodversionmin: String,
    #[serde(default)]
    packages: Option<PackagesResponse>,
}

#[derive(Debug, Deserialize)]
struct PackagesResponse {
    #[serde(default)]
    package: Vec<PackageResponse>,
}

#[derive(Debug, Deserialize)]
struct PackageResponse {
    name: String,
    #[serde(default)]
    namediff: String,
    #[serde(default)]
    fp: String,
    #[serde(default)]
    hash_sha256: String,
    #[serde(default)]
    hashdiff_sha256: String,
}

/// Parse the body returned by the update server.
///
/// Apps answering `noupdate` come back with an empty manifest version. Apps
/// with an error status or no `updatecheck` element are left out, which the
/// engine treats as "nothing to do".
pub fn parse_update_response(body: &str) -> Result<UpdateResults, CheckError> {
    let envelope: ResponseEnvelope =
        serde_json::from_str(body).map_err(|e| CheckError::Parse(e.to_string()))?;

    let mut list = Vec::with_capacity(envelope.response.apps.len());
    for app in envelope.response.apps {
        if let Some(status) = app.status.as_deref().filter(|status| *status != "ok") {
            warn!(appid = %app.appid, status, "Update server rejected app");
            continue;
        }

        let Some(check) = app.updatecheck else {
            continue;
        };

        match check.status.as_str() {
            "noupdate" => list.push(UpdateResult {
                extension_id: app.appid,
                ..UpdateResult::default()
            }),
            "ok" => list.push(parse_update(app.appid, check)?),
            other => {
                warn!(appid = %app.appid, status = other, "Unexpected updatecheck status");
            }
        }
    }

    Ok(UpdateResults { list })
}

fn parse_update(appid: String, check: UpdateCheckResponse) -> Result<UpdateResult, CheckError> {
    let manifest = check
        .manifest
        .ok_or_else(|| CheckError::Parse(format!("missing manifest for {}", appid)))?;

    let mut crx_urls = Vec::new();
    let mut crx_diffurls = Vec::new();
    for entry in check.urls.map(|urls| urls.url).unwrap_or_default() {
        if let Some(codebase) = entry.codebase.as_deref().and_then(parse_base_url) {
            crx_urls.push(codebase);
        }
        if let Some(codebase) = entry.codebasediff.as_deref().and_then(parse_base_url) {
            crx_diffurls.push(codebase);
        }
    }

    let packages = manifest
        .packages
        .map(|packages| packages.package)
        .unwrap_or_default()
        .into_iter()
        .map(|package| Package {
            name: package.name,
            namediff: package.namediff,
            fingerprint: package.fp,
            hash_sha256: package.hash_sha256,
            hashdiff_sha256: package.hashdiff_sha256,
        })
        .collect();

    Ok(UpdateResult {
        extension_id: appid,
        manifest: Manifest {
            version: manifest.version,
            browser_min_version: manifest.prodversionmin,
            packages,
        },
        crx_urls,
        crx_diffurls,
    })
}

fn parse_base_url(raw: &str) -> Option<Url> {
    match Url::parse(raw) {
        Ok(url) => Some(url),
        Err(e) => {
            warn!(url = raw, error = %e, "Dropping unparseable codebase URL");
            None
        }
    }
}
