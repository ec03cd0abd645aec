//! The crawl flows: `scrape` a tournament, `update` from recent livescores, and
//! bootstrap the `regions` catalog.
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use chrono::{Datelike, Local, NaiveDate};
use indexmap::IndexMap;
use tracing::{debug, info, instrument, warn};
use url::Url;

use crate::artifacts::ArtifactStore;
use crate::config::Settings;
use crate::discovery::{
    build_match_urls, match_url, match_url_template, parse_shard, MatchTarget, TournamentDiscovery,
    TournamentTarget, MONTH_NAMES,
};
use crate::extract::{self, parse_all_regions};
use crate::fetch::BoundedFetcher;
use crate::loader::{LoadReport, Loader};
use crate::model::{Region, TournamentListing};
use crate::resolver::UrlResolver;
use crate::util::db::Db;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScrapeReport {
    pub leagues: usize,
    pub match_urls: usize,
    pub fetched: usize,
    pub fetch_failed: usize,
    pub extracted: usize,
    pub match_centre_written: usize,
    pub without_payload: usize,
    pub extract_failed: usize,
}

impl fmt::Display for ScrapeReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} match pages across {} leagues: {} fetched ({} failed), {} extracted, {} with match centre data, {} without payload, {} unparsable",
            self.match_urls,
            self.leagues,
            self.fetched,
            self.fetch_failed,
            self.extracted,
            self.match_centre_written,
            self.without_payload,
            self.extract_failed,
        )
    }
}

/// A match page to fetch and the league directory it belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchJob {
    pub league: String,
    pub url: String,
}

pub struct Pipeline {
    fetcher: Arc<BoundedFetcher>,
    store: ArtifactStore,
    site_root: String,
}

impl Pipeline {
    pub fn new(settings: &Settings, fetcher: Arc<BoundedFetcher>) -> Self {
        Self {
            fetcher,
            store: ArtifactStore::new(&settings.matches_dir),
            site_root: settings.site_root.trim_end_matches('/').to_string(),
        }
    }

    pub fn store(&self) -> &ArtifactStore {
        &self.store
    }

    /// Discovery, then fetch and extract every listed match of the tournament.
    #[instrument(skip(self, target), fields(league = %target.league))]
    pub async fn scrape(&self, target: &TournamentTarget) -> Result<ScrapeReport> {
        let discovery = TournamentDiscovery::new(self.fetcher.clone(), self.store.clone());
        let grouped = discovery
            .discover(&target.league, &target.data_url_template(), target.season)
            .await;
        if grouped.is_empty() {
            warn!("no monthly shard returned any tournament");
        }

        let jobs: Vec<MatchJob> = build_match_urls(&grouped, &target.match_url_template())
            .into_iter()
            .map(|url| MatchJob {
                league: target.league.clone(),
                url,
            })
            .collect();
        self.fetch_and_extract(jobs).await
    }

    /// Fetches every job under the shared ceiling, stores the raw page and
    /// extracts its artifacts. Per-page failures are logged and counted.
    pub async fn fetch_and_extract(&self, jobs: Vec<MatchJob>) -> Result<ScrapeReport> {
        let mut report = ScrapeReport {
            match_urls: jobs.len(),
            ..ScrapeReport::default()
        };
        let leagues: Vec<String> = jobs.iter().map(|job| job.league.clone()).collect();
        report.leagues = leagues.iter().collect::<HashSet<_>>().len();
        info!(pages = jobs.len(), "fetching match pages");

        let responses = self
            .fetcher
            .fetch_all(jobs.into_iter().map(|job| job.url))
            .await;

        for (league, (url, body)) in leagues.iter().zip(responses) {
            let target = match MatchTarget::from_url(&url) {
                Ok(target) => target,
                Err(e) => {
                    warn!(url = %url, error = %e, "cannot route match page");
                    report.extract_failed += 1;
                    continue;
                }
            };
            let Some(body) = body else {
                report.fetch_failed += 1;
                continue;
            };
            report.fetched += 1;

            let html = String::from_utf8_lossy(&body);
            let raw_path = self.store.raw_html_path(league, &target.month, target.match_id);
            if let Err(e) = self.store.write_text(&raw_path, &html) {
                warn!(match_id = target.match_id, error = %e, "could not store raw page");
            }

            match extract::extract(&self.store, &html, &target.month, league) {
                Ok(Some(extraction)) => {
                    report.extracted += 1;
                    if extraction.match_centre.is_some() {
                        report.match_centre_written += 1;
                    }
                }
                Ok(None) => report.without_payload += 1,
                Err(e) => {
                    warn!(match_id = target.match_id, url = %url, error = %e, "extraction failed");
                    report.extract_failed += 1;
                }
            }
        }

        info!(%report, "match pages processed");
        Ok(report)
    }

    /// Fetches the front page and writes the region catalog.
    #[instrument(skip(self))]
    pub async fn regions(&self) -> Result<Vec<Region>> {
        let url = format!("{}/", self.site_root);
        let Some(body) = self.fetcher.fetch(&url).await else {
            bail!("front page {url} could not be fetched");
        };
        let html = String::from_utf8_lossy(&body);
        let regions = parse_all_regions(&html)
            .context("parse allRegions")?
            .with_context(|| format!("front page {url} carries no region catalog"))?;

        let path = self.store.all_regions_path();
        self.store.write_json(&path, &regions)?;
        info!(
            regions = regions.len(),
            tournaments = regions.iter().map(|r| r.tournaments.len()).sum::<usize>(),
            path = %path.display(),
            "region catalog written"
        );
        Ok(regions)
    }

    /// Scrapes the matches listed on today's and yesterday's livescores.
    pub async fn update(&self) -> Result<ScrapeReport> {
        self.update_for(Local::now().date_naive()).await
    }

    #[instrument(skip(self))]
    pub async fn update_for(&self, today: NaiveDate) -> Result<ScrapeReport> {
        let days: Vec<NaiveDate> = [Some(today), today.pred_opt()].into_iter().flatten().collect();
        let urls: Vec<String> = days.iter().map(|d| self.livescores_url(*d)).collect();
        let responses = self.fetcher.fetch_all(urls).await;

        let mut listings_by_day: Vec<(NaiveDate, Vec<TournamentListing>)> = Vec::new();
        for (day, (url, body)) in days.iter().zip(responses) {
            match body.as_deref().and_then(parse_shard) {
                Some(listings) => listings_by_day.push((*day, listings)),
                None => warn!(url = %url, "no livescores data"),
            }
        }

        let roots = self.tournament_roots().await?;
        let mut wanted: Vec<String> = Vec::new();
        for (_, listings) in &listings_by_day {
            for t in listings {
                match root_for(&roots, t) {
                    Some(root) => wanted.push(root.clone()),
                    None => warn!(
                        tournament_id = t.tournament_id,
                        region_id = ?t.region_id,
                        "tournament missing from region catalog"
                    ),
                }
            }
        }

        let resolver = UrlResolver::new(self.fetcher.clone(), self.store.clone());
        let mapping = resolver.resolve(&wanted).await?;
        let host = Url::parse(&self.site_root)
            .ok()
            .and_then(|u| u.host_str().map(str::to_string))
            .with_context(|| format!("site root {} has no host", self.site_root))?;

        let mut daily: IndexMap<(String, &'static str, u32), Vec<TournamentListing>> = IndexMap::new();
        let mut jobs: Vec<MatchJob> = Vec::new();
        for (day, listings) in listings_by_day {
            let month = MONTH_NAMES[day.month0() as usize];
            for t in listings {
                let Some(canonical) = root_for(&roots, &t).and_then(|root| mapping.get(root)) else {
                    debug!(tournament_id = t.tournament_id, "tournament root unresolved; skipping");
                    continue;
                };
                let Some(league) = league_from_canonical(canonical) else {
                    warn!(canonical = %canonical, "cannot derive league from canonical url");
                    continue;
                };
                let template = match_url_template(&host, &league);
                jobs.extend(t.matches.iter().map(|m| MatchJob {
                    league: league.clone(),
                    url: match_url(&template, m, month),
                }));
                daily.entry((league, month, day.day())).or_default().push(t);
            }
        }

        for ((league, month, day), listings) in &daily {
            let path = self.store.daily_matches_path(league, month, *day);
            if let Err(e) = self.store.write_json(&path, listings) {
                warn!(path = %path.display(), error = %e, "could not write daily listing");
            }
        }

        self.fetch_and_extract(jobs).await
    }

    fn livescores_url(&self, day: NaiveDate) -> String {
        format!(
            "{}/livescores/data?d={}&isSummary=true",
            self.site_root,
            day.format("%Y%m%d")
        )
    }

    /// `(region id, tournament id)` to tournament root URL, from `all_regions.json`.
    /// The catalog is bootstrapped from the front page when absent.
    async fn tournament_roots(&self) -> Result<HashMap<(i64, i64), String>> {
        let path = self.store.all_regions_path();
        let regions: Vec<Region> = match self.store.read_json_opt(&path)? {
            Some(regions) => regions,
            None => {
                info!("region catalog missing; fetching front page");
                self.regions().await?
            }
        };
        let mut roots = HashMap::new();
        for region in &regions {
            for t in &region.tournaments {
                if let Some(path) = t.url.as_deref() {
                    roots.insert((region.id, t.id), format!("{}{}", self.site_root, path));
                }
            }
        }
        Ok(roots)
    }
}

fn root_for<'a>(roots: &'a HashMap<(i64, i64), String>, t: &TournamentListing) -> Option<&'a String> {
    roots.get(&(t.region_id?, t.tournament_id))
}

/// Last path segment of a canonical tournament URL.
pub fn league_from_canonical(canonical: &str) -> Option<String> {
    let url = Url::parse(canonical).ok()?;
    url.path_segments()?
        .filter(|s| !s.is_empty())
        .last()
        .map(str::to_string)
}

/// Loads every artifact under the matches directory into `db`.
pub async fn populate(db: &Db, settings: &Settings) -> Result<LoadReport> {
    let store = ArtifactStore::new(&settings.matches_dir);
    Loader::new(db.clone(), store, settings.event_batch_size)
        .load()
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::testing::{fast_retry, ScriptedBackend};
    use serde_json::json;

    fn match_page(id: i64) -> String {
        format!(
            "<html><body><script>require.config.params[\"args\"] = {{ matchId: {id}, matchCentreData: {{\"home\":{{\"incidentEvents\":[{{\"id\":{id}01}}]}}}}, matchCentreEventTypeJson: {{}}, formationIdNameMappings: {{}} }};</script></body></html>"
        )
    }

    fn settings(dir: &std::path::Path) -> Settings {
        Settings {
            matches_dir: dir.to_path_buf(),
            site_root: "https://s".into(),
            ..Settings::default()
        }
    }

    #[test]
    fn league_is_last_canonical_segment() {
        assert_eq!(
            league_from_canonical("https://s/Regions/252/Tournaments/2/Seasons/1/Stages/3/Show/England-Premier-League-2024-2025").as_deref(),
            Some("England-Premier-League-2024-2025")
        );
        assert_eq!(league_from_canonical("https://s/a/b/").as_deref(), Some("b"));
    }

    #[tokio::test]
    async fn scrape_discovers_fetches_and_extracts() {
        let dir = tempfile::tempdir().unwrap();
        let target = TournamentTarget::parse(
            "https://s/Regions/1/Tournaments/2/Seasons/3/Stages/4/Fixtures/Cup-2024-2025",
        )
        .unwrap();
        let shard = json!({"tournaments": [{"tournamentId": 2, "matches": [
            {"id": 11, "homeTeamName": "A FC", "awayTeamName": "B. City"},
            {"id": 12, "homeTeamName": "C", "awayTeamName": "D"}
        ]}]})
        .to_string();
        let backend = Arc::new(
            ScriptedBackend::default()
                .page("https://s/tournaments/4/data/?d=202408&isAggregate=false", 200, &shard)
                .page(
                    "https://s/Matches/11/Live/Cup-2024-2025-A-FC-B-City?x-month=August",
                    200,
                    &match_page(11),
                )
                .page(
                    "https://s/Matches/12/Live/Cup-2024-2025-C-D?x-month=August",
                    200,
                    "<html>maintenance</html>",
                ),
        );
        let fetcher = Arc::new(BoundedFetcher::new(backend, 5, fast_retry()));
        let pipeline = Pipeline::new(&settings(dir.path()), fetcher);

        let report = pipeline.scrape(&target).await.unwrap();
        assert_eq!(report.match_urls, 2);
        assert_eq!(report.fetched, 2);
        assert_eq!(report.match_centre_written, 1);
        assert_eq!(report.without_payload, 1);

        let store = pipeline.store();
        assert!(store.raw_html_path("Cup-2024-2025", "August", 11).exists());
        assert!(store.match_centre_path("Cup-2024-2025", "August", 11).exists());
        assert!(!store.match_centre_path("Cup-2024-2025", "August", 12).exists());
        assert!(store.matches_path("Cup-2024-2025", "August").exists());
    }

    #[tokio::test]
    async fn update_routes_livescores_through_regions_and_resolver() {
        let dir = tempfile::tempdir().unwrap();
        let front = r#"<html><script>var allRegions = [{type:1, id:252, flg:'gb-eng', name:'England', tournaments:[{id:2, url:'/Regions/252/Tournaments/2/England-Premier-League', name:'Premier League', sortOrder:0}]}];</script></html>"#;
        let canonical = r#"<html><head><link rel="canonical" href="/Regions/252/Tournaments/2/Seasons/10316/Stages/23400/Show/England-Premier-League-2024-2025"></head></html>"#;
        let today = json!({"tournaments": [{"tournamentId": 2, "regionId": 252, "matches": [
            {"id": 21, "homeTeamName": "X", "awayTeamName": "Y"}
        ]}, {"tournamentId": 99, "regionId": 1, "matches": [{"id": 22}]}]})
        .to_string();

        let backend = Arc::new(
            ScriptedBackend::default()
                .page("https://s/", 200, front)
                .page("https://s/livescores/data?d=20240901&isSummary=true", 200, &today)
                .page("https://s/livescores/data?d=20240831&isSummary=true", 200, r#"{"tournaments": []}"#)
                .page("https://s/Regions/252/Tournaments/2/England-Premier-League", 200, canonical)
                .page(
                    "https://s/Matches/21/Live/England-Premier-League-2024-2025-X-Y?x-month=September",
                    200,
                    &match_page(21),
                ),
        );
        let fetcher = Arc::new(BoundedFetcher::new(backend, 5, fast_retry()));
        let pipeline = Pipeline::new(&settings(dir.path()), fetcher);

        let report = pipeline
            .update_for(NaiveDate::from_ymd_opt(2024, 9, 1).unwrap())
            .await
            .unwrap();

        assert_eq!(report.match_urls, 1);
        assert_eq!(report.match_centre_written, 1);
        let store = pipeline.store();
        let league = "England-Premier-League-2024-2025";
        assert!(store.all_regions_path().exists());
        assert!(store.daily_matches_path(league, "September", 1).exists());
        assert!(store.match_centre_path(league, "September", 21).exists());
    }

    #[tokio::test]
    async fn regions_fails_loudly_without_a_catalog() {
        let dir = tempfile::tempdir().unwrap();
        let backend = Arc::new(ScriptedBackend::default().page("https://s/", 200, "<html></html>"));
        let fetcher = Arc::new(BoundedFetcher::new(backend, 5, fast_retry()));
        let pipeline = Pipeline::new(&settings(dir.path()), fetcher);

        assert!(pipeline.regions().await.is_err());
        assert!(!pipeline.store().all_regions_path().exists());
    }
}
