use std::collections::{BTreeSet, HashSet};
use std::sync::LazyLock;

use regex::Regex;
use scraper::{Html, Selector};

/// Four dot-separated 1-3 digit groups, optional `:port`. Octet and port
/// ranges are not checked unless the rule is strict.
static ENDPOINT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\d{1,3}\.\d{1,3}\.\d{1,3}\.\d{1,3}(?::\d{1,5})?").unwrap());

static ENDPOINT_EXACT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d{1,3}\.\d{1,3}\.\d{1,3}\.\d{1,3}(?::\d{1,5})?$").unwrap());

/// Per-source extraction rule.
#[derive(Debug, Clone, Default)]
pub struct ExtractRule {
    selector: Option<Selector>,
    strict: bool,
}

impl ExtractRule {
    pub fn new(selector: Option<&str>, strict: bool) -> Self {
        // Selectors are checked when settings are validated.
        let selector = selector.and_then(|s| Selector::parse(s).ok());
        ExtractRule { selector, strict }
    }

    /// All endpoints in `body`, as a set.
    pub fn extract(&self, body: &str) -> BTreeSet<String> {
        match self.selected_text(body) {
            Some(texts) => texts.iter().flat_map(|t| find_all(t, self.strict)).collect(),
            None => find_all(body, self.strict).into_iter().collect(),
        }
    }

    /// Endpoints of one line, in order of appearance.
    pub fn find_in(&self, line: &str) -> Vec<String> {
        find_all(line, self.strict)
    }

    /// Lines for region matching: one per selected element, else the body's
    /// own lines.
    pub fn lines(&self, body: &str) -> Vec<String> {
        match self.selected_text(body) {
            Some(texts) => texts
                .iter()
                .map(|t| t.split_whitespace().collect::<Vec<_>>().join(" "))
                .collect(),
            None => body.lines().map(str::to_string).collect(),
        }
    }

    /// Text of each element matching the selector. `None` without a selector
    /// or when nothing matches, in which case the caller scans the raw body.
    fn selected_text(&self, body: &str) -> Option<Vec<String>> {
        let selector = self.selector.as_ref()?;
        let document = Html::parse_document(body);
        let texts: Vec<String> = document
            .select(selector)
            .map(|el| el.text().collect::<Vec<_>>().join(" "))
            .collect();
        (!texts.is_empty()).then_some(texts)
    }
}

/// Endpoints in order of first appearance.
pub fn find_all(text: &str, strict: bool) -> Vec<String> {
    let mut seen = HashSet::new();
    ENDPOINT_RE
        .find_iter(text)
        .map(|m| m.as_str())
        .filter(|ep| !strict || in_range(ep))
        .filter(|ep| seen.insert(*ep))
        .map(str::to_string)
        .collect()
}

pub fn is_endpoint(s: &str) -> bool {
    ENDPOINT_EXACT_RE.is_match(s)
}

/// Address part of an endpoint, without the port.
pub fn bare_address(endpoint: &str) -> &str {
    endpoint.split(':').next().unwrap_or(endpoint)
}

pub fn has_port(endpoint: &str) -> bool {
    endpoint.contains(':')
}

fn in_range(endpoint: &str) -> bool {
    let (addr, port) = match endpoint.split_once(':') {
        Some((a, p)) => (a, Some(p)),
        None => (endpoint, None),
    };
    let octets_ok = addr.split('.').all(|o| o.parse::<u8>().is_ok());
    let port_ok = port.map_or(true, |p| p.parse::<u16>().is_ok());
    octets_ok && port_ok
}
