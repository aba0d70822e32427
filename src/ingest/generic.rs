use async_trait::async_trait;
use tracing::info;

use super::{log_unavailable, Harvest, Ingestor};
use crate::extract::ExtractRule;
use crate::fetch::Fetcher;
use crate::model::Ingested;
use crate::settings::SourceKind;

/// Every endpoint on a page, without region attribution.
pub struct GenericIngestor {
    name: String,
    url: String,
    rule: ExtractRule,
}

impl GenericIngestor {
    pub fn new(name: &str, url: &str, rule: ExtractRule) -> Self {
        GenericIngestor {
            name: name.to_string(),
            url: url.to_string(),
            rule,
        }
    }
}

#[async_trait]
impl Ingestor for GenericIngestor {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> SourceKind {
        SourceKind::Generic
    }

    async fn ingest(&self, fetcher: &dyn Fetcher) -> Harvest {
        info!("Fetching {} from {}", self.name, self.url);
        let body = match fetcher.fetch(&self.url).await {
            Ok(body) => body,
            Err(e) => {
                log_unavailable(&self.name, &e);
                return Harvest {
                    items: Vec::new(),
                    failed_urls: vec![self.url.clone()],
                };
            }
        };

        let items: Vec<Ingested> = self
            .rule
            .extract(&body)
            .into_iter()
            .map(Ingested::untagged)
            .collect();
        info!("Found {} endpoints at {}", items.len(), self.name);
        Harvest {
            items,
            failed_urls: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::testing::FakeFetcher;

    const URL: &str = "https://api.uouin.test/cloudflare.html";

    #[tokio::test]
    async fn extracts_rows_untagged() {
        let html = std::fs::read_to_string("tests/fixtures/uouin.html").unwrap();
        let fetcher = FakeFetcher::default().with_page(URL, &html);
        let ingestor = GenericIngestor::new("uouin", URL, ExtractRule::new(Some("tr"), false));

        let harvest = ingestor.ingest(&fetcher).await;
        let eps: Vec<&str> = harvest.items.iter().map(|i| i.endpoint.as_str()).collect();
        assert_eq!(eps, vec!["104.18.33.45", "162.159.45.9", "172.67.70.12"]);
        assert_eq!(harvest.tagged(), 0);
        assert!(harvest.failed_urls.is_empty());
    }

    #[tokio::test]
    async fn unavailable_source_contributes_nothing() {
        let fetcher = FakeFetcher::default().with_status(URL, 500);
        let ingestor = GenericIngestor::new("uouin", URL, ExtractRule::default());

        let harvest = ingestor.ingest(&fetcher).await;
        assert!(harvest.items.is_empty());
        assert_eq!(harvest.failed_urls, vec![URL.to_string()]);
    }
}
