//! Resolves tournament root URLs to canonical, season-qualified URLs.
//!
//! Results are cached in `tournament_url_mapping.json`. The cache only grows: an
//! entry, once written, is never replaced.
use std::collections::BTreeMap;
use std::sync::{Arc, OnceLock};

use anyhow::Context;
use regex::Regex;
use scraper::{Html, Selector};
use tracing::{debug, info, instrument, warn};
use url::Url;

use crate::artifacts::ArtifactStore;
use crate::fetch::BoundedFetcher;

pub type UrlMapping = BTreeMap<String, String>;

fn canonical_shape() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"/Regions/\d+/Tournaments/\d+/Seasons/\d+/Stages/\d+/")
            .expect("static canonical-shape regex")
    })
}

/// Whether `url` carries the region, tournament, season and stage segments.
pub fn is_canonical_shape(url: &str) -> bool {
    canonical_shape().is_match(url)
}

/// `href` of the page's `<link rel="canonical">`, made absolute against `page_url`.
pub fn canonical_href(html: &str, page_url: &str) -> Option<String> {
    let selector = Selector::parse(r#"link[rel="canonical"]"#).ok()?;
    let document = Html::parse_document(html);
    let href = document
        .select(&selector)
        .filter_map(|el| el.value().attr("href"))
        .map(str::trim)
        .find(|href| !href.is_empty())?;

    match Url::parse(href) {
        Ok(absolute) => Some(absolute.to_string()),
        Err(url::ParseError::RelativeUrlWithoutBase) => Url::parse(page_url)
            .ok()?
            .join(href)
            .ok()
            .map(|u| u.to_string()),
        Err(_) => None,
    }
}

pub struct UrlResolver {
    fetcher: Arc<BoundedFetcher>,
    store: ArtifactStore,
}

impl UrlResolver {
    pub fn new(fetcher: Arc<BoundedFetcher>, store: ArtifactStore) -> Self {
        Self { fetcher, store }
    }

    /// The persisted mapping, or an empty one on first run.
    pub fn load_mapping(&self) -> anyhow::Result<UrlMapping> {
        let path = self.store.url_mapping_path();
        let mapping = self
            .store
            .read_json_opt::<UrlMapping>(&path)
            .with_context(|| format!("load url mapping {}", path.display()))?;
        Ok(mapping.unwrap_or_default())
    }

    /// Resolves every URL not already cached and returns the merged mapping.
    /// URLs that could not be resolved are absent from the result.
    #[instrument(skip_all, fields(requested = urls.len()))]
    pub async fn resolve(&self, urls: &[String]) -> anyhow::Result<UrlMapping> {
        let mut mapping = self.load_mapping()?;

        let mut pending: Vec<String> = urls
            .iter()
            .filter(|url| !mapping.contains_key(url.as_str()))
            .cloned()
            .collect();
        pending.sort();
        pending.dedup();

        if pending.is_empty() {
            debug!(cached = mapping.len(), "all urls already resolved");
            return Ok(mapping);
        }

        let mut resolved = 0usize;
        for (url, body) in self.fetcher.fetch_all(pending.clone()).await {
            let Some(body) = body else {
                warn!(url = %url, "fetch failed; leaving unresolved");
                continue;
            };
            let html = String::from_utf8_lossy(&body);
            match canonical_href(&html, &url) {
                Some(canonical) if is_canonical_shape(&canonical) => {
                    debug!(url = %url, canonical = %canonical, "resolved");
                    mapping.entry(url).or_insert(canonical);
                    resolved += 1;
                }
                Some(canonical) => {
                    warn!(url = %url, canonical = %canonical, "canonical link lacks season/stage ids");
                }
                None => warn!(url = %url, "no canonical link found"),
            }
        }

        let path = self.store.url_mapping_path();
        self.store
            .write_json(&path, &mapping)
            .with_context(|| format!("write url mapping {}", path.display()))?;
        info!(
            attempted = pending.len(),
            resolved,
            total = mapping.len(),
            "url mapping updated"
        );

        Ok(mapping)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::testing::{fast_retry, ScriptedBackend};

    const CANONICAL: &str =
        "https://www.whoscored.com/Regions/252/Tournaments/2/Seasons/10316/Stages/23400/Show/England-Premier-League-2024-2025";

    fn page_with(href: &str) -> String {
        format!(r#"<html><head><link rel="canonical" href="{href}"></head><body></body></html>"#)
    }

    #[test]
    fn canonical_href_joins_relative_links() {
        let html = page_with("/Regions/1/Tournaments/2/Seasons/3/Stages/4/Show/X");
        let got = canonical_href(&html, "https://www.whoscored.com/Regions/1/Tournaments/2/X").unwrap();
        assert_eq!(
            got,
            "https://www.whoscored.com/Regions/1/Tournaments/2/Seasons/3/Stages/4/Show/X"
        );
        assert!(canonical_href("<html></html>", "https://x/").is_none());
        assert!(canonical_href(&page_with("  "), "https://x/").is_none());
    }

    #[test]
    fn shape_requires_season_and_stage() {
        assert!(is_canonical_shape(CANONICAL));
        assert!(!is_canonical_shape(
            "https://www.whoscored.com/Regions/252/Tournaments/2/England-Premier-League"
        ));
    }

    #[tokio::test]
    async fn every_url_is_mapped_to_canonical_shape_or_absent() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path());
        let backend = Arc::new(
            ScriptedBackend::default()
                .page("https://s/good", 200, &page_with(CANONICAL))
                .page("https://s/bad-shape", 200, &page_with("https://s/Regions/1/Tournaments/2/"))
                .page("https://s/no-link", 200, "<html></html>")
                .page("https://s/down", 500, ""),
        );
        let fetcher = Arc::new(BoundedFetcher::new(backend, 5, fast_retry()));
        let resolver = UrlResolver::new(fetcher, store.clone());

        let urls: Vec<String> = ["good", "bad-shape", "no-link", "down"]
            .iter()
            .map(|s| format!("https://s/{s}"))
            .collect();
        let mapping = resolver.resolve(&urls).await.unwrap();

        assert_eq!(mapping.len(), 1);
        assert_eq!(mapping["https://s/good"], CANONICAL);
        for value in mapping.values() {
            assert!(is_canonical_shape(value));
        }
        let on_disk: UrlMapping = store.read_json(&store.url_mapping_path()).unwrap();
        assert_eq!(on_disk, mapping);
    }

    #[tokio::test]
    async fn cached_entries_are_neither_refetched_nor_overwritten() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path());
        let mut seeded = UrlMapping::new();
        seeded.insert("https://s/old".into(), "https://s/Regions/1/Tournaments/1/Seasons/1/Stages/1/Show/Old".into());
        store.write_json(&store.url_mapping_path(), &seeded).unwrap();

        let backend = Arc::new(
            ScriptedBackend::default()
                .page("https://s/old", 200, &page_with(CANONICAL))
                .page("https://s/new", 200, &page_with(CANONICAL)),
        );
        let fetcher = Arc::new(BoundedFetcher::new(backend.clone(), 5, fast_retry()));
        let resolver = UrlResolver::new(fetcher, store);

        let mapping = resolver
            .resolve(&["https://s/old".to_string(), "https://s/new".to_string()])
            .await
            .unwrap();

        assert_eq!(backend.calls(), 1);
        assert_eq!(mapping["https://s/old"], seeded["https://s/old"]);
        assert_eq!(mapping["https://s/new"], CANONICAL);
    }
}
