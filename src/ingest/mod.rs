pub mod generic;
pub mod regional;

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use tracing::warn;

use crate::error::FetchError;
use crate::extract::ExtractRule;
use crate::fetch::Fetcher;
use crate::model::Ingested;
use crate::settings::{Settings, SourceKind, SourceSpec};

pub use generic::GenericIngestor;
pub use regional::RegionalIngestor;

/// What one source produced. Failed URLs contributed nothing.
#[derive(Debug, Default)]
pub struct Harvest {
    pub items: Vec<Ingested>,
    pub failed_urls: Vec<String>,
}

impl Harvest {
    pub fn tagged(&self) -> usize {
        self.items.iter().filter(|i| i.tag.is_some()).count()
    }
}

/// Fetch a source and turn it into endpoints. Never fails as a whole: fetch
/// errors are logged and recorded in the harvest.
#[async_trait]
pub trait Ingestor: Send + Sync {
    fn name(&self) -> &str;
    fn kind(&self) -> SourceKind;
    async fn ingest(&self, fetcher: &dyn Fetcher) -> Harvest;
}

/// Per-region caps for one ingestor.
#[derive(Debug, Clone)]
pub struct RegionQuota {
    pub targets: Vec<String>,
    pub limits: BTreeMap<String, usize>,
}

impl RegionQuota {
    pub fn from_settings(settings: &Settings) -> Self {
        RegionQuota {
            targets: settings.target_regions.clone(),
            limits: settings
                .target_regions
                .iter()
                .map(|r| (r.clone(), settings.quota_for(r)))
                .collect(),
        }
    }

    pub fn limit(&self, region: &str) -> usize {
        self.limits.get(region).copied().unwrap_or(0)
    }
}

fn log_unavailable(source: &str, err: &FetchError) {
    if err.is_timeout() {
        warn!("Source {} timed out: {}", source, err);
    } else {
        warn!("Source {} unavailable: {}", source, err);
    }
}

pub fn build(spec: &SourceSpec, settings: &Settings) -> Box<dyn Ingestor> {
    let rule = ExtractRule::new(spec.selector.as_deref(), spec.strict);
    match spec.kind {
        SourceKind::Generic => {
            let url = spec.urls.first().map(String::as_str).unwrap_or_default();
            Box::new(GenericIngestor::new(&spec.name, url, rule))
        }
        SourceKind::Regional | SourceKind::MultiRegional => Box::new(RegionalIngestor {
            name: spec.name.clone(),
            kind: spec.kind,
            urls: spec.urls.clone(),
            rule,
            provenance: spec.provenance().to_string(),
            quota: RegionQuota::from_settings(settings),
            source_delay: Duration::from_millis(settings.fetch.source_delay_ms),
        }),
    }
}
