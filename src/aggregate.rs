use std::collections::btree_map::Entry;
use std::collections::BTreeMap;

use futures::stream::{self, StreamExt};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::info;

use crate::cache::EnrichmentCache;
use crate::geo::Resolver;
use crate::model::{EndpointInfo, Enrichment, Ingested, Tag, LOOKUP_FAILED, REGION_UNKNOWN};

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct AggregateStats {
    pub ingested: usize,
    pub unique: usize,
    pub pre_tagged: usize,
    pub cache_hits: usize,
    pub resolved: usize,
    pub lookup_unknown: usize,
    pub lookup_failed: usize,
}

pub struct Aggregation {
    pub entries: BTreeMap<String, EndpointInfo>,
    pub stats: AggregateStats,
}

/// Merge ingested endpoints and attach region/ISP to each one exactly once.
///
/// Precedence per endpoint: the first tag seen in `ingested` order, then the
/// cache, then one resolver call. Resolver calls run at most `concurrency`
/// at a time; the resolver applies its own rate limit.
pub async fn aggregate(
    ingested: impl IntoIterator<Item = Ingested>,
    cache: &EnrichmentCache,
    resolver: &dyn Resolver,
    concurrency: usize,
) -> Aggregation {
    let mut stats = AggregateStats::default();
    let mut merged: BTreeMap<String, Option<Tag>> = BTreeMap::new();
    for item in ingested {
        stats.ingested += 1;
        match merged.entry(item.endpoint) {
            Entry::Vacant(v) => {
                v.insert(item.tag);
            }
            Entry::Occupied(mut o) => {
                if o.get().is_none() && item.tag.is_some() {
                    o.insert(item.tag);
                }
            }
        }
    }
    stats.unique = merged.len();

    let mut entries = BTreeMap::new();
    let mut misses = Vec::new();
    for (endpoint, tag) in merged {
        let enrichment = match tag {
            Some(tag) => {
                stats.pre_tagged += 1;
                Enrichment::new(tag.region, tag.provenance)
            }
            None => match cache.get(&endpoint) {
                Some(hit) => {
                    stats.cache_hits += 1;
                    hit.clone()
                }
                None => {
                    misses.push(endpoint);
                    continue;
                }
            },
        };
        entries.insert(endpoint.clone(), EndpointInfo::new(&endpoint, enrichment));
    }

    info!(
        "{} unique endpoints: {} pre-tagged, {} cached, {} to resolve",
        stats.unique,
        stats.pre_tagged,
        stats.cache_hits,
        misses.len()
    );

    let pb = progress_bar(misses.len());
    let resolved: Vec<(String, Enrichment)> = stream::iter(misses)
        .map(|endpoint| {
            let pb = &pb;
            async move {
                let enrichment = resolver.resolve(&endpoint).await;
                pb.inc(1);
                (endpoint, enrichment)
            }
        })
        .buffer_unordered(concurrency.max(1))
        .collect()
        .await;
    pb.finish_and_clear();

    for (endpoint, enrichment) in resolved {
        stats.resolved += 1;
        match enrichment.region.as_str() {
            REGION_UNKNOWN => stats.lookup_unknown += 1,
            LOOKUP_FAILED => stats.lookup_failed += 1,
            _ => {}
        }
        entries.insert(endpoint.clone(), EndpointInfo::new(&endpoint, enrichment));
    }

    Aggregation { entries, stats }
}

fn progress_bar(len: usize) -> ProgressBar {
    let pb = ProgressBar::new(len as u64);
    if let Ok(style) =
        ProgressStyle::default_bar().template("[{elapsed_precise}] {bar:40} {pos}/{len} ({per_sec}, eta {eta})")
    {
        pb.set_style(style.progress_chars("=> "));
    }
    pb
}
