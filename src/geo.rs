use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::error::LookupError;
use crate::extract::bare_address;
use crate::fetch::Fetcher;
use crate::limiter::RateLimiter;
use crate::model::{Enrichment, ISP_UNKNOWN};
use crate::settings::GeoSettings;

/// Provider response, ip-api.com field names.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeoRecord {
    pub status: String,
    #[serde(default)]
    pub country: String,
    #[serde(default)]
    pub country_code: String,
    #[serde(default)]
    pub region_name: String,
    #[serde(default)]
    pub isp: String,
}

impl GeoRecord {
    pub fn is_success(&self) -> bool {
        self.status == "success"
    }
}

/// Remote lookup of a bare address.
#[async_trait]
pub trait GeoLookup: Send + Sync {
    async fn lookup(&self, ip: &str) -> Result<GeoRecord, LookupError>;
}

/// GET against a templated URL; `{ip}` is substituted.
pub struct HttpGeoLookup {
    fetcher: Arc<dyn Fetcher>,
    url_template: String,
}

impl HttpGeoLookup {
    pub fn new(fetcher: Arc<dyn Fetcher>, url_template: &str) -> Self {
        HttpGeoLookup {
            fetcher,
            url_template: url_template.to_string(),
        }
    }
}

#[async_trait]
impl GeoLookup for HttpGeoLookup {
    async fn lookup(&self, ip: &str) -> Result<GeoRecord, LookupError> {
        let url = self.url_template.replace("{ip}", ip);
        let body = self.fetcher.fetch(&url).await?;
        Ok(serde_json::from_str(&body)?)
    }
}

/// Enrichment for an endpoint that neither a source nor the cache could label.
#[async_trait]
pub trait Resolver: Send + Sync {
    async fn resolve(&self, endpoint: &str) -> Enrichment;
}

pub struct GeoResolver {
    lookup: Box<dyn GeoLookup>,
    limiter: RateLimiter,
    flag_emoji: bool,
}

impl GeoResolver {
    pub fn new(lookup: Box<dyn GeoLookup>, settings: &GeoSettings) -> Self {
        GeoResolver {
            lookup,
            limiter: RateLimiter::new(
                settings.concurrency,
                Duration::from_millis(settings.min_interval_ms),
            ),
            flag_emoji: settings.flag_emoji,
        }
    }

    fn region_label(&self, record: &GeoRecord) -> String {
        let label = format!("{} {}", record.country.trim(), record.region_name.trim())
            .trim()
            .to_string();
        if label.is_empty() {
            return Enrichment::unknown().region;
        }
        match flag(&record.country_code) {
            Some(f) if self.flag_emoji => format!("{} {}", f, label),
            _ => label,
        }
    }
}

#[async_trait]
impl Resolver for GeoResolver {
    async fn resolve(&self, endpoint: &str) -> Enrichment {
        let ip = bare_address(endpoint);
        let _permit = self.limiter.acquire().await;

        match self.lookup.lookup(ip).await {
            Ok(record) if record.is_success() => {
                let isp = record.isp.trim();
                let isp = if isp.is_empty() { ISP_UNKNOWN } else { isp };
                Enrichment::new(self.region_label(&record), isp)
            }
            Ok(record) => {
                debug!("No location for {} (status {:?})", ip, record.status);
                Enrichment::unknown()
            }
            Err(e) => {
                warn!("Lookup failed for {}: {}", ip, e);
                Enrichment::lookup_failed()
            }
        }
    }
}

/// Regional indicator flag for a two-letter country code.
fn flag(country_code: &str) -> Option<String> {
    let code = country_code.trim();
    if code.len() != 2 || !code.chars().all(|c| c.is_ascii_alphabetic()) {
        return None;
    }
    code.to_ascii_uppercase()
        .chars()
        .map(|c| char::from_u32(c as u32 + 0x1F1A5))
        .collect()
}
