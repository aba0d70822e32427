use std::collections::HashMap;
use std::path::Path;

use tracing::{debug, info, warn};

use crate::extract::is_endpoint;
use crate::model::{Enrichment, ISP_UNKNOWN};

/// Region/ISP pairs from the previous catalog. Read-only once loaded; a hit
/// always wins over a fresh lookup.
#[derive(Debug, Clone, Default)]
pub struct EnrichmentCache {
    entries: HashMap<String, Enrichment>,
}

impl EnrichmentCache {
    /// Missing or unreadable files give an empty cache.
    pub fn load(path: &Path) -> Self {
        match std::fs::read(path) {
            Ok(bytes) => {
                let cache = Self::parse_bytes(&bytes);
                info!("Loaded {} cached entries from {:?}", cache.len(), path);
                cache
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!("No previous catalog at {:?}, starting with an empty cache", path);
                Self::default()
            }
            Err(e) => {
                warn!("Could not read previous catalog {:?}: {}", path, e);
                Self::default()
            }
        }
    }

    pub fn parse(text: &str) -> Self {
        Self::parse_bytes(text.as_bytes())
    }

    /// Lines that are not valid UTF-8 are skipped like any other malformed line.
    pub fn parse_bytes(bytes: &[u8]) -> Self {
        let mut entries = HashMap::new();
        let mut skipped = 0usize;
        for raw in bytes.split(|b| *b == b'\n') {
            let Ok(line) = std::str::from_utf8(raw) else {
                skipped += 1;
                continue;
            };
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            match parse_line(line) {
                Some((endpoint, enrichment)) => {
                    entries.insert(endpoint, enrichment);
                }
                None => skipped += 1,
            }
        }
        if skipped > 0 {
            debug!("Skipped {} malformed catalog lines", skipped);
        }
        EnrichmentCache { entries }
    }

    pub fn get(&self, endpoint: &str) -> Option<&Enrichment> {
        self.entries.get(endpoint)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Enrichment)> {
        self.entries.iter()
    }
}

/// `endpoint#region[-seq]#isp` or `endpoint#region[-seq]`.
fn parse_line(line: &str) -> Option<(String, Enrichment)> {
    let fields: Vec<&str> = line.split('#').map(str::trim).collect();
    let (endpoint, region, isp) = match fields.as_slice() {
        [e, r] => (*e, *r, ISP_UNKNOWN),
        [e, r, i] if !i.is_empty() => (*e, *r, *i),
        _ => return None,
    };
    if !is_endpoint(endpoint) {
        return None;
    }
    let region = strip_sequence(region);
    if region.is_empty() {
        return None;
    }
    Some((endpoint.to_string(), Enrichment::new(region, isp)))
}

/// Drop a trailing `-<digits>` numbering suffix.
fn strip_sequence(region: &str) -> &str {
    match region.rsplit_once('-') {
        Some((label, seq)) if !seq.is_empty() && seq.bytes().all(|b| b.is_ascii_digit()) => {
            label.trim_end()
        }
        _ => region,
    }
}
