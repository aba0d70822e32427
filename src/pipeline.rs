use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::Semaphore;
use tracing::{error, info, warn};

use crate::aggregate::{aggregate, AggregateStats};
use crate::cache::EnrichmentCache;
use crate::catalog;
use crate::fetch::{Fetcher, HttpFetcher};
use crate::geo::{GeoResolver, HttpGeoLookup, Resolver};
use crate::ingest::{self, Harvest, Ingestor};
use crate::model::Ingested;
use crate::settings::{Settings, SourceKind, TieBreak};

pub struct SourceReport {
    pub name: String,
    pub kind: SourceKind,
    pub endpoints: usize,
    pub tagged: usize,
    pub failed_urls: Vec<String>,
}

pub struct RunSummary {
    pub output: PathBuf,
    pub sources: Vec<SourceReport>,
    pub stats: AggregateStats,
    /// Entries per catalog region.
    pub regions: BTreeMap<String, usize>,
}

impl RunSummary {
    pub fn print(&self) {
        for s in &self.sources {
            let status = if s.failed_urls.is_empty() {
                String::new()
            } else {
                format!(" ({} failed)", s.failed_urls.len())
            };
            println!(
                "  {:<16} {:<14} {:>5} endpoints, {:>5} tagged{}",
                s.name,
                format!("{:?}", s.kind),
                s.endpoints,
                s.tagged,
                status
            );
        }
        println!(
            "{} unique ({} pre-tagged, {} cached, {} resolved; {} unknown, {} failed lookups)",
            self.stats.unique,
            self.stats.pre_tagged,
            self.stats.cache_hits,
            self.stats.resolved,
            self.stats.lookup_unknown,
            self.stats.lookup_failed
        );
        for (region, n) in &self.regions {
            println!("  {:<24} {:>5}", region, n);
        }
        println!("Catalog saved to {:?}", self.output);
    }
}

/// Merge rank of a source kind; lower merges first.
fn rank(tie_break: TieBreak, kind: SourceKind) -> u8 {
    match (tie_break, kind) {
        (TieBreak::Declared, _) => 0,
        (TieBreak::MultiFirst, SourceKind::MultiRegional) => 0,
        (TieBreak::MultiFirst, SourceKind::Regional) => 1,
        (TieBreak::RegionalFirst, SourceKind::Regional) => 0,
        (TieBreak::RegionalFirst, SourceKind::MultiRegional) => 1,
        (_, SourceKind::Generic) => 2,
    }
}

/// Run every ingestor, at most `max_concurrent` at a time, and merge their
/// output in tie-break order regardless of completion order.
pub async fn ingest_all(
    ingestors: Vec<Arc<dyn Ingestor>>,
    fetcher: Arc<dyn Fetcher>,
    max_concurrent: usize,
    tie_break: TieBreak,
) -> (Vec<Ingested>, Vec<SourceReport>) {
    let semaphore = Arc::new(Semaphore::new(max_concurrent.max(1)));
    let (tx, mut rx) = tokio::sync::mpsc::channel::<(usize, Harvest)>(ingestors.len().max(1));

    for (idx, ingestor) in ingestors.iter().enumerate() {
        let ingestor = Arc::clone(ingestor);
        let fetcher = Arc::clone(&fetcher);
        let sem = Arc::clone(&semaphore);
        let tx = tx.clone();

        tokio::spawn(async move {
            let Ok(_permit) = sem.acquire().await else {
                return;
            };
            let harvest = ingestor.ingest(fetcher.as_ref()).await;
            let _ = tx.send((idx, harvest)).await;
        });
    }
    drop(tx);

    let mut harvests: Vec<Option<Harvest>> = ingestors.iter().map(|_| None).collect();
    while let Some((idx, harvest)) = rx.recv().await {
        harvests[idx] = Some(harvest);
    }

    let mut order: Vec<usize> = (0..ingestors.len()).collect();
    order.sort_by_key(|&i| (rank(tie_break, ingestors[i].kind()), i));

    let mut merged = Vec::new();
    let mut reports: Vec<Option<SourceReport>> = ingestors.iter().map(|_| None).collect();
    for i in order {
        let ingestor = &ingestors[i];
        let harvest = harvests[i].take().unwrap_or_else(|| {
            warn!("Ingestor {} did not finish", ingestor.name());
            Harvest::default()
        });
        reports[i] = Some(SourceReport {
            name: ingestor.name().to_string(),
            kind: ingestor.kind(),
            endpoints: harvest.items.len(),
            tagged: harvest.tagged(),
            failed_urls: harvest.failed_urls,
        });
        merged.extend(harvest.items);
    }

    (merged, reports.into_iter().flatten().collect())
}

/// One full run against injected collaborators.
pub async fn run_with(
    settings: &Settings,
    fetcher: Arc<dyn Fetcher>,
    resolver: &dyn Resolver,
) -> Result<RunSummary> {
    if let Err(e) = catalog::ensure_writable(&settings.output) {
        error!("{}", e);
        return Err(e).context("Catalog destination is not writable");
    }
    let cache = EnrichmentCache::load(&settings.output);

    let ingestors: Vec<Arc<dyn Ingestor>> = settings
        .sources
        .iter()
        .map(|spec| Arc::from(ingest::build(spec, settings)))
        .collect();
    info!("Ingesting from {} sources", ingestors.len());

    let (ingested, sources) = ingest_all(
        ingestors,
        fetcher,
        settings.fetch.max_concurrent_sources,
        settings.tie_break,
    )
    .await;
    info!("Collected {} endpoints", ingested.len());

    let agg = aggregate(ingested, &cache, resolver, settings.geo.concurrency).await;

    let regions = catalog::group(agg.entries.values(), settings.prefer_port)
        .into_iter()
        .map(|(region, members)| (region, members.len()))
        .collect();

    if let Err(e) = catalog::write(agg.entries.values(), &settings.output, settings.prefer_port) {
        error!("{}", e);
        return Err(e).context("Failed to save catalog");
    }

    Ok(RunSummary {
        output: settings.output.clone(),
        sources,
        stats: agg.stats,
        regions,
    })
}

pub fn http_fetcher(settings: &Settings) -> Result<Arc<dyn Fetcher>> {
    let fetcher = HttpFetcher::new(&settings.fetch, Duration::from_secs(settings.fetch.timeout_secs))
        .context("Failed to build HTTP client")?;
    Ok(Arc::new(fetcher))
}

pub fn geo_resolver(settings: &Settings) -> Result<GeoResolver> {
    let fetcher = HttpFetcher::new(&settings.fetch, Duration::from_secs(settings.geo.timeout_secs))
        .context("Failed to build lookup client")?;
    let lookup = HttpGeoLookup::new(Arc::new(fetcher), &settings.geo.url_template);
    Ok(GeoResolver::new(Box::new(lookup), &settings.geo))
}

/// Full run with the HTTP fetcher and the configured geolocation provider.
pub async fn run(settings: &Settings) -> Result<RunSummary> {
    let fetcher = http_fetcher(settings)?;
    let resolver = geo_resolver(settings)?;
    run_with(settings, fetcher, &resolver).await
}

/// Fetch a single configured source and return what it yields.
pub async fn probe(settings: &Settings, name: &str) -> Result<Harvest> {
    let spec = settings
        .source(name)
        .with_context(|| format!("No source named {:?}", name))?;
    let fetcher = http_fetcher(settings)?;
    Ok(ingest::build(spec, settings).ingest(fetcher.as_ref()).await)
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::*;
    use crate::fetch::testing::FakeFetcher;
    use crate::model::Enrichment;
    use crate::settings::SourceSpec;

    #[derive(Default)]
    struct FakeResolver {
        calls: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Resolver for FakeResolver {
        async fn resolve(&self, endpoint: &str) -> Enrichment {
            self.calls.lock().unwrap().push(endpoint.to_string());
            Enrichment::new("日本 东京", "Cloudflare")
        }
    }

    const GENERIC_A: &str = "https://a.test/";
    const GENERIC_C: &str = "https://c.test/";
    const REGIONAL_B: &str = "https://b.test/list.txt";
    const REGIONAL_D: &str = "https://d.test/list.txt";

    fn source(name: &str, kind: SourceKind, url: &str) -> SourceSpec {
        SourceSpec {
            name: name.to_string(),
            kind,
            urls: vec![url.to_string()],
            selector: None,
            strict: false,
            label: Some("github".to_string()),
        }
    }

    fn settings(dir: &tempfile::TempDir, sources: Vec<SourceSpec>) -> Settings {
        let mut s = Settings {
            output: dir.path().join("ip.txt"),
            sources,
            ..Settings::default()
        };
        s.geo.concurrency = 2;
        s
    }

    #[tokio::test]
    async fn tagged_and_resolved_groups_side_by_side() {
        let dir = tempfile::tempdir().unwrap();
        let mut s = settings(
            &dir,
            vec![
                source("a", SourceKind::Generic, GENERIC_A),
                source("b", SourceKind::Regional, REGIONAL_B),
            ],
        );
        s.target_regions = vec!["JP".into()];
        s.per_region_quota.insert("JP".into(), 1);

        let fetcher = FakeFetcher::default()
            .with_page(GENERIC_A, "<p>1.2.3.4</p>")
            .with_page(REGIONAL_B, "5.6.7.8 JP\n9.9.9.9 JP\n");
        let resolver = FakeResolver::default();

        let summary = run_with(&s, Arc::new(fetcher), &resolver).await.unwrap();
        assert_eq!(*resolver.calls.lock().unwrap(), vec!["1.2.3.4"]);

        let text = std::fs::read_to_string(&s.output).unwrap();
        assert_eq!(
            text,
            "5.6.7.8#JP-1#github\n\n1.2.3.4#日本 东京-1#Cloudflare\n\n"
        );
        assert_eq!(summary.regions.len(), 2);
        assert_eq!(summary.stats.pre_tagged, 1);
    }

    #[tokio::test]
    async fn failing_source_does_not_reduce_others() {
        let dir = tempfile::tempdir().unwrap();
        let s = settings(
            &dir,
            vec![
                source("a", SourceKind::Generic, GENERIC_A),
                source("broken", SourceKind::Generic, GENERIC_C),
            ],
        );
        let fetcher = FakeFetcher::default()
            .with_page(GENERIC_A, "1.1.1.1 2.2.2.2 3.3.3.3:443")
            .with_status(GENERIC_C, 500);

        let summary = run_with(&s, Arc::new(fetcher), &FakeResolver::default())
            .await
            .unwrap();
        assert_eq!(summary.stats.unique, 3);
        assert_eq!(summary.sources[0].endpoints, 3);
        assert_eq!(summary.sources[1].failed_urls, vec![GENERIC_C.to_string()]);
    }

    #[tokio::test]
    async fn second_run_uses_previous_catalog_as_cache() {
        let dir = tempfile::tempdir().unwrap();
        let s = settings(&dir, vec![source("a", SourceKind::Generic, GENERIC_A)]);
        std::fs::write(&s.output, "1.1.1.1#新加坡-1#Akamai\n\n").unwrap();

        let fetcher = FakeFetcher::default().with_page(GENERIC_A, "1.1.1.1 2.2.2.2");
        let resolver = FakeResolver::default();
        run_with(&s, Arc::new(fetcher), &resolver).await.unwrap();

        assert_eq!(*resolver.calls.lock().unwrap(), vec!["2.2.2.2"]);
        let text = std::fs::read_to_string(&s.output).unwrap();
        assert!(text.contains("1.1.1.1#新加坡-1#Akamai\n"));
        assert!(text.contains("2.2.2.2#日本 东京-1#Cloudflare\n"));
    }

    #[tokio::test]
    async fn tie_break_decides_conflicting_tags() {
        let dir = tempfile::tempdir().unwrap();
        let mut regional = source("single", SourceKind::Regional, REGIONAL_B);
        regional.label = Some("single".into());
        let mut multi = source("multi", SourceKind::MultiRegional, REGIONAL_D);
        multi.label = Some("multi".into());
        let fetcher = Arc::new(
            FakeFetcher::default()
                .with_page(REGIONAL_B, "7.7.7.7 JP\n")
                .with_page(REGIONAL_D, "7.7.7.7 HK\n"),
        );

        let mut s = settings(&dir, vec![regional, multi]);
        s.target_regions = vec!["JP".into(), "HK".into()];

        let summary = run_with(&s, fetcher.clone(), &FakeResolver::default()).await.unwrap();
        assert!(summary.regions.contains_key("JP"));
        assert!(!summary.regions.contains_key("HK"));

        s.tie_break = TieBreak::MultiFirst;
        let summary = run_with(&s, fetcher, &FakeResolver::default()).await.unwrap();
        assert!(summary.regions.contains_key("HK"));
        assert!(!summary.regions.contains_key("JP"));
    }

    #[tokio::test]
    async fn unwritable_output_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let mut s = settings(&dir, vec![source("a", SourceKind::Generic, GENERIC_A)]);
        s.output = dir.path().join("no-such-dir").join("ip.txt");
        let fetcher = Arc::new(FakeFetcher::default().with_page(GENERIC_A, "1.1.1.1"));
        let resolver = FakeResolver::default();
        assert!(run_with(&s, fetcher.clone(), &resolver).await.is_err());
        assert!(fetcher.calls().is_empty());
        assert!(resolver.calls.lock().unwrap().is_empty());
    }

    #[test]
    fn rank_orders_kinds() {
        assert_eq!(rank(TieBreak::Declared, SourceKind::Generic), 0);
        assert!(
            rank(TieBreak::MultiFirst, SourceKind::MultiRegional)
                < rank(TieBreak::MultiFirst, SourceKind::Regional)
        );
        assert!(
            rank(TieBreak::RegionalFirst, SourceKind::Regional)
                < rank(TieBreak::RegionalFirst, SourceKind::Generic)
        );
    }
}
