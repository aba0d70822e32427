use std::collections::{HashMap, HashSet};
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info};

use super::{log_unavailable, Harvest, Ingestor, RegionQuota};
use crate::extract::ExtractRule;
use crate::fetch::Fetcher;
use crate::model::Ingested;
use crate::region::classify;
use crate::settings::SourceKind;

/// Collects endpoints from lines naming a target region, up to a per-region
/// quota. With several URLs the quota is shared and URLs are read in order,
/// so earlier sources win once a region fills up.
pub struct RegionalIngestor {
    pub name: String,
    pub kind: SourceKind,
    pub urls: Vec<String>,
    pub rule: ExtractRule,
    pub provenance: String,
    pub quota: RegionQuota,
    /// Pause between consecutive URLs.
    pub source_delay: Duration,
}

struct QuotaBook<'a> {
    quota: &'a RegionQuota,
    counts: HashMap<String, usize>,
    seen: HashSet<String>,
}

impl<'a> QuotaBook<'a> {
    fn new(quota: &'a RegionQuota) -> Self {
        QuotaBook {
            quota,
            counts: HashMap::new(),
            seen: HashSet::new(),
        }
    }

    fn is_full(&self, region: &str) -> bool {
        self.counts.get(region).copied().unwrap_or(0) >= self.quota.limit(region)
    }

    fn all_full(&self) -> bool {
        self.quota.targets.iter().all(|r| self.is_full(r))
    }

    fn admit(&mut self, region: &str, endpoint: &str) -> bool {
        if self.is_full(region) || !self.seen.insert(endpoint.to_string()) {
            return false;
        }
        *self.counts.entry(region.to_string()).or_default() += 1;
        true
    }
}

impl RegionalIngestor {
    fn scan(&self, body: &str, book: &mut QuotaBook<'_>, out: &mut Vec<Ingested>) {
        for line in self.rule.lines(body) {
            if book.all_full() {
                break;
            }
            let Some(region) = classify(&line, &self.quota.targets) else {
                continue;
            };
            for endpoint in self.rule.find_in(&line) {
                if book.admit(region, &endpoint) {
                    debug!("{}: {} -> {}", self.name, endpoint, region);
                    out.push(Ingested::tagged(endpoint, region, &self.provenance));
                }
            }
        }
    }
}

#[async_trait]
impl Ingestor for RegionalIngestor {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> SourceKind {
        self.kind
    }

    async fn ingest(&self, fetcher: &dyn Fetcher) -> Harvest {
        let mut book = QuotaBook::new(&self.quota);
        let mut harvest = Harvest::default();

        for (i, url) in self.urls.iter().enumerate() {
            if book.all_full() {
                debug!("{}: all regions full, skipping remaining sources", self.name);
                break;
            }
            if i > 0 && !self.source_delay.is_zero() {
                tokio::time::sleep(self.source_delay).await;
            }

            info!("Fetching {} from {}", self.name, url);
            match fetcher.fetch(url).await {
                Ok(body) => {
                    let before = harvest.items.len();
                    self.scan(&body, &mut book, &mut harvest.items);
                    info!(
                        "Found {} region-tagged endpoints at {}",
                        harvest.items.len() - before,
                        url
                    );
                }
                Err(e) => {
                    log_unavailable(&self.name, &e);
                    harvest.failed_urls.push(url.clone());
                }
            }
        }

        harvest
    }
}
