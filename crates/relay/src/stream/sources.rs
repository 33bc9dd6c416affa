use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashSet;
use url::Url;

/// Most sources accepted from a single search-result block
pub const MAX_SOURCES_PER_BLOCK: usize = 5;
/// Most sources retained across a whole turn
pub const MAX_SOURCES_PER_TURN: usize = 20;

/// A web search citation surfaced by the provider
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Source {
    pub title: String,
    pub url: String,
    pub domain: String,
    pub timestamp: DateTime<Utc>,
}

impl Source {
    pub fn new<T: Into<String>, U: Into<String>>(title: T, url: U) -> Self {
        let url = url.into();
        Source {
            title: title.into(),
            domain: display_domain(&url),
            url,
            timestamp: Utc::now(),
        }
    }
}

/// Lower-cased host with any leading `www.` removed; falls back to the raw string
/// for urls that do not parse.
pub fn display_domain(raw: &str) -> String {
    match Url::parse(raw).ok().and_then(|u| u.host_str().map(str::to_lowercase)) {
        Some(host) => host.strip_prefix("www.").unwrap_or(&host).to_string(),
        None => raw.to_string(),
    }
}

/// Deduplicates and caps the citations seen during one turn.
///
/// Identity is the normalized url. The first-seen title wins and insertion order is kept.
#[derive(Debug, Default)]
pub struct SourceAggregator {
    sources: Vec<Source>,
    seen: HashSet<String>,
}

impl SourceAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add<I>(&mut self, candidates: I) -> &[Source]
    where
        I: IntoIterator<Item = Source>,
    {
        for source in candidates {
            let key = dedup_key(&source.url);
            if key.is_empty() || !self.seen.insert(key) {
                continue;
            }
            self.sources.push(source);
        }
        self.sources.truncate(MAX_SOURCES_PER_TURN);
        &self.sources
    }

    pub fn sources(&self) -> &[Source] {
        &self.sources
    }
}

/// Parsed form of the url (lower-cased host, normalized scheme and path); the trimmed raw
/// string when it does not parse.
fn dedup_key(raw: &str) -> String {
    let raw = raw.trim();
    match Url::parse(raw) {
        Ok(url) => url.to_string(),
        Err(_) => raw.to_string(),
    }
}
