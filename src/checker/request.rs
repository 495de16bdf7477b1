// SPDX-License-Identifier: GPL-3.0-only
use serde::Serialize;
use std::collections::BTreeMap;

use crate::checker::traits::CheckItem;
use crate::config::Configurator;

pub const PROTOCOL_VERSION: &str = "3.0";

#[derive(Debug, Serialize)]
pub struct UpdateRequest {
    pub request: RequestBody,
}

#[derive(Debug, Serialize)]
pub struct RequestBody {
    pub protocol: &'static str,
    pub prodversion: String,
    pub updaterchannel: String,
    pub lang: String,
    pub os: OsInfo,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub extra: String,
    pub apps: Vec<AppRequest>,
}

#[derive(Debug, Serialize)]
pub struct OsInfo {
    pub platform: String,
    pub arch: String,
}

#[derive(Debug, Serialize)]
pub struct AppRequest {
    pub appid: String,
    pub version: String,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub installsource: Option<&'static str>,
    pub packages: PackageList,
    pub updatecheck: UpdateCheckTag,
}

#[derive(Debug, Serialize)]
pub struct PackageList {
    pub package: Vec<PackageFingerprint>,
}

#[derive(Debug, Serialize)]
pub struct PackageFingerprint {
    pub fp: String,
}

/// Serializes as `{}`.
#[derive(Debug, Serialize)]
pub struct UpdateCheckTag {}

/// Build the body of one update check covering every item in `items`.
pub fn build_update_request(
    config: &dyn Configurator,
    items: &[CheckItem],
    extra: &str,
) -> UpdateRequest {
    let apps = items
        .iter()
        .map(|item| AppRequest {
            appid: item.id.clone(),
            version: item.version.to_string(),
            attributes: item.installer_attributes.clone(),
            installsource: item.on_demand.then_some("ondemand"),
            packages: PackageList {
                package: vec![PackageFingerprint {
                    fp: item.fingerprint.clone(),
                }],
            },
            updatecheck: UpdateCheckTag {},
        })
        .collect();

    UpdateRequest {
        request: RequestBody {
            protocol: PROTOCOL_VERSION,
            prodversion: config.host_version().to_string(),
            updaterchannel: config.channel(),
            lang: config.lang(),
            os: OsInfo {
                platform: config.os_name(),
                arch: config.arch(),
            },
            extra: extra.to_string(),
            apps,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::TestConfigurator;
    use crate::version::Version;

    fn item(id: &str, on_demand: bool) -> CheckItem {
        CheckItem {
            id: id.to_string(),
            version: Version::parse("1.2.3").unwrap(),
            fingerprint: "fp1".to_string(),
            installer_attributes: BTreeMap::new(),
            on_demand,
        }
    }

    #[test]
    fn test_request_shape() {
        let config = TestConfigurator::default();
        let request = build_update_request(&config, &[item("a".repeat(32).as_str(), false)], "");
        let json = serde_json::to_value(&request).unwrap();

        assert_eq!(json["request"]["protocol"], "3.0");
        assert_eq!(json["request"]["prodversion"], config.host_version().to_string());
        assert!(json["request"].get("extra").is_none());

        let app = &json["request"]["apps"][0];
        assert_eq!(app["appid"], "a".repeat(32));
        assert_eq!(app["version"], "1.2.3");
        assert_eq!(app["packages"]["package"][0]["fp"], "fp1");
        assert_eq!(app["updatecheck"], serde_json::json!({}));
        assert!(app.get("installsource").is_none());
        assert!(app.get("attributes").is_none());
    }

    #[test]
    fn test_request_marks_on_demand_and_attributes() {
        let config = TestConfigurator::default();
        let mut on_demand = item("b".repeat(32).as_str(), true);
        on_demand
            .installer_attributes
            .insert("ap".to_string(), "beta".to_string());

        let request = build_update_request(&config, &[on_demand], "brand=XYZ");
        let json = serde_json::to_value(&request).unwrap();

        assert_eq!(json["request"]["extra"], "brand=XYZ");
        let app = &json["request"]["apps"][0];
        assert_eq!(app["installsource"], "ondemand");
        assert_eq!(app["attributes"]["ap"], "beta");
    }
}
