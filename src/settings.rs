use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use config::{Config, Environment, File, FileFormat};
use serde::Deserialize;

use crate::error::ConfigError;

pub const DEFAULT_CONFIG: &str = "endpoints.toml";
const ENV_PREFIX: &str = "CDNIP";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Catalog destination; also the cache source for the next run.
    pub output: PathBuf,
    /// Port-bearing endpoints sort before portless ones within a region.
    pub prefer_port: bool,
    pub target_regions: Vec<String>,
    pub default_quota: usize,
    pub per_region_quota: BTreeMap<String, usize>,
    pub tie_break: TieBreak,
    pub fetch: FetchSettings,
    pub geo: GeoSettings,
    pub sources: Vec<SourceSpec>,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            output: PathBuf::from("ip.txt"),
            prefer_port: true,
            target_regions: ["HK", "JP", "SG", "KR", "TW"]
                .iter()
                .map(|r| r.to_string())
                .collect(),
            default_quota: 10,
            per_region_quota: BTreeMap::new(),
            tie_break: TieBreak::Declared,
            fetch: FetchSettings::default(),
            geo: GeoSettings::default(),
            sources: vec![
                SourceSpec::generic("uouin", "https://api.uouin.com/cloudflare.html", "tr"),
                SourceSpec::generic("164746", "https://ip.164746.xyz", "tr"),
            ],
        }
    }
}

/// Order in which ingestor results are merged, which decides whose tag wins
/// when an endpoint is pre-tagged by more than one source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TieBreak {
    /// Configured source order.
    Declared,
    /// Multi-source region ingestors first, then declared order.
    MultiFirst,
    /// Single-source region ingestors first, then declared order.
    RegionalFirst,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FetchSettings {
    pub timeout_secs: u64,
    pub max_attempts: u32,
    pub base_backoff_ms: u64,
    pub retry_statuses: Vec<u16>,
    pub max_concurrent_sources: usize,
    /// Pause between consecutive URLs of a multi-source region ingestor.
    pub source_delay_ms: u64,
    pub user_agent: String,
}

impl Default for FetchSettings {
    fn default() -> Self {
        FetchSettings {
            timeout_secs: 15,
            max_attempts: 3,
            base_backoff_ms: 1000,
            retry_statuses: vec![429, 500, 502, 503, 504],
            max_concurrent_sources: 4,
            source_delay_ms: 1000,
            user_agent: "Mozilla/5.0 (compatible; cdn_endpoints/0.1)".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GeoSettings {
    /// `{ip}` is replaced with the bare address.
    pub url_template: String,
    pub timeout_secs: u64,
    pub min_interval_ms: u64,
    pub concurrency: usize,
    pub flag_emoji: bool,
}

impl Default for GeoSettings {
    fn default() -> Self {
        GeoSettings {
            url_template: "http://ip-api.com/json/{ip}?lang=zh-CN".to_string(),
            timeout_secs: 5,
            min_interval_ms: 100,
            concurrency: 4,
            flag_emoji: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    Generic,
    Regional,
    MultiRegional,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SourceSpec {
    pub name: String,
    pub kind: SourceKind,
    pub urls: Vec<String>,
    /// CSS selector scoping extraction to matching elements.
    #[serde(default)]
    pub selector: Option<String>,
    /// Reject octets above 255 and ports above 65535.
    #[serde(default)]
    pub strict: bool,
    /// Provenance recorded in place of the ISP for pre-tagged endpoints.
    #[serde(default)]
    pub label: Option<String>,
}

impl SourceSpec {
    pub fn generic(name: &str, url: &str, selector: &str) -> Self {
        SourceSpec {
            name: name.to_string(),
            kind: SourceKind::Generic,
            urls: vec![url.to_string()],
            selector: Some(selector.to_string()),
            strict: false,
            label: None,
        }
    }

    pub fn provenance(&self) -> &str {
        self.label.as_deref().unwrap_or(&self.name)
    }
}

impl Settings {
    /// Defaults, then the TOML file, then `CDNIP__*` environment variables
    /// (`CDNIP__OUTPUT`, `CDNIP__GEO__CONCURRENCY`, ...).
    pub fn load(path: Option<&Path>) -> Result<Settings, ConfigError> {
        let file = match path {
            Some(p) => File::from(p).required(true),
            None => File::new(DEFAULT_CONFIG, FileFormat::Toml).required(false),
        };
        let settings: Settings = Config::builder()
            .add_source(file)
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;
        let settings = settings.normalized();
        settings.validate()?;
        Ok(settings)
    }

    /// Region codes are compared uppercase everywhere.
    pub fn normalized(mut self) -> Self {
        self.target_regions = self
            .target_regions
            .iter()
            .map(|r| r.trim().to_uppercase())
            .filter(|r| !r.is_empty())
            .collect();
        self.per_region_quota = self
            .per_region_quota
            .into_iter()
            .map(|(k, v)| (k.trim().to_uppercase(), v))
            .collect();
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut needs_targets = false;
        for source in &self.sources {
            let fail = |reason: &str| ConfigError::Source {
                name: source.name.clone(),
                reason: reason.to_string(),
            };
            match (source.kind, source.urls.len()) {
                (_, 0) => return Err(fail("no urls configured")),
                (SourceKind::Generic | SourceKind::Regional, n) if n > 1 => {
                    return Err(fail("only multi_regional sources take several urls"))
                }
                _ => {}
            }
            if let Some(sel) = &source.selector {
                if scraper::Selector::parse(sel).is_err() {
                    return Err(fail(&format!("invalid selector {:?}", sel)));
                }
            }
            needs_targets |= source.kind != SourceKind::Generic;
        }
        if needs_targets && self.target_regions.is_empty() {
            return Err(ConfigError::NoTargets);
        }
        Ok(())
    }

    pub fn quota_for(&self, region: &str) -> usize {
        self.per_region_quota
            .get(region)
            .copied()
            .unwrap_or(self.default_quota)
    }

    pub fn source(&self, name: &str) -> Option<&SourceSpec> {
        self.sources.iter().find(|s| s.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn regional(name: &str, urls: &[&str]) -> SourceSpec {
        SourceSpec {
            name: name.to_string(),
            kind: SourceKind::Regional,
            urls: urls.iter().map(|u| u.to_string()).collect(),
            selector: None,
            strict: false,
            label: Some("github".to_string()),
        }
    }

    #[test]
    fn defaults_are_valid() {
        let s = Settings::default();
        s.validate().unwrap();
        assert!(s.prefer_port);
        assert_eq!(s.fetch.retry_statuses, vec![429, 500, 502, 503, 504]);
        assert!(s.geo.url_template.contains("{ip}"));
    }

    #[test]
    fn quota_falls_back_to_default() {
        let mut s = Settings::default();
        s.per_region_quota.insert("jp".into(), 3);
        let s = s.normalized();
        assert_eq!(s.quota_for("JP"), 3);
        assert_eq!(s.quota_for("SG"), s.default_quota);
    }

    #[test]
    fn regional_source_rejects_several_urls() {
        let mut s = Settings::default();
        s.sources.push(regional("gh", &["https://a", "https://b"]));
        assert!(matches!(s.validate(), Err(ConfigError::Source { .. })));
    }

    #[test]
    fn regional_source_needs_targets() {
        let mut s = Settings::default();
        s.target_regions.clear();
        s.sources.push(regional("gh", &["https://a"]));
        assert!(matches!(s.validate(), Err(ConfigError::NoTargets)));
    }

    #[test]
    fn bad_selector_is_rejected() {
        let mut s = Settings::default();
        s.sources[0].selector = Some("tr[".into());
        assert!(s.validate().is_err());
    }

    #[test]
    fn loads_toml_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("endpoints.toml");
        std::fs::write(
            &path,
            r#"
prefer_port = false
target_regions = ["jp", "hk"]
default_quota = 2

[per_region_quota]
JP = 5

[[sources]]
name = "gh"
kind = "regional"
urls = ["https://example.invalid/list.txt"]
label = "github"
"#,
        )
        .unwrap();
        let s = Settings::load(Some(&path)).unwrap();
        assert!(!s.prefer_port);
        assert_eq!(s.target_regions, vec!["JP", "HK"]);
        assert_eq!(s.quota_for("JP"), 5);
        assert_eq!(s.quota_for("HK"), 2);
        assert_eq!(s.sources.len(), 1);
        assert_eq!(s.sources[0].provenance(), "github");
        assert_eq!(s.fetch.max_attempts, 3);
    }
}
