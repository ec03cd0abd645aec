//! Month-by-month tournament discovery and match URL derivation.
use std::sync::{Arc, OnceLock};

use chrono::Datelike;
use indexmap::IndexMap;
use regex::Regex;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};
use url::Url;

use crate::artifacts::ArtifactStore;
use crate::fetch::BoundedFetcher;
use crate::model::{MatchListing, TournamentListing, TournamentsPage};

pub const MONTH_NAMES: [&str; 12] = [
    "January",
    "February",
    "March",
    "April",
    "May",
    "June",
    "July",
    "August",
    "September",
    "October",
    "November",
    "December",
];

/// Listings grouped by English month name, in calendar order.
pub type MonthlyListings = IndexMap<String, Vec<TournamentListing>>;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum TargetError {
    #[error("not a fixtures url (expected https://<host>/Regions/<id>/Tournaments/<id>/Seasons/<id>/Stages/<id>/Fixtures/<slug>): {0}")]
    NotFixturesUrl(String),
    #[error("not a match url: {0}")]
    NotMatchUrl(String),
    #[error("match url has no x-month marker: {0}")]
    MissingMonth(String),
}

fn fixtures_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"^https://([^/]+)/Regions/(\d+)/Tournaments/(\d+)/Seasons/(\d+)/Stages/(\d+)/Fixtures/([^/?#]+)$",
        )
        .expect("static fixtures regex")
    })
}

fn season_suffix() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?:^|-)(\d{4})(?:-(\d{4}))?$").expect("static season regex")
    })
}

/// The year a month's data shard is requested for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Season {
    /// A season spanning two years, e.g. `2024-2025`. July to December belong
    /// to `start`, January to June to `end`.
    Split { start: i32, end: i32 },
    Calendar(i32),
}

impl Season {
    pub fn from_slug(slug: &str, fallback_year: i32) -> Self {
        let Some(caps) = season_suffix().captures(slug) else {
            return Season::Calendar(fallback_year);
        };
        let first = caps.get(1).and_then(|m| m.as_str().parse().ok());
        let second = caps.get(2).and_then(|m| m.as_str().parse().ok());
        match (first, second) {
            (Some(start), Some(end)) => Season::Split { start, end },
            (Some(year), None) => Season::Calendar(year),
            _ => Season::Calendar(fallback_year),
        }
    }

    pub fn year_for(&self, month: u32) -> i32 {
        match *self {
            Season::Split { start, end } => {
                if month >= 7 {
                    start
                } else {
                    end
                }
            }
            Season::Calendar(year) => year,
        }
    }
}

/// A validated fixtures URL and everything derived from it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TournamentTarget {
    pub url: String,
    pub host: String,
    pub region_id: i64,
    pub tournament_id: i64,
    pub season_id: i64,
    pub stage_id: i64,
    /// Last path segment, e.g. `England-Premier-League-2024-2025`.
    pub league: String,
    pub season: Season,
}

impl TournamentTarget {
    pub fn parse(url: &str) -> Result<Self, TargetError> {
        let url = url.trim();
        let caps = fixtures_pattern()
            .captures(url)
            .ok_or_else(|| TargetError::NotFixturesUrl(url.to_string()))?;
        let id = |i: usize| -> Result<i64, TargetError> {
            caps.get(i)
                .and_then(|m| m.as_str().parse().ok())
                .ok_or_else(|| TargetError::NotFixturesUrl(url.to_string()))
        };
        let league = caps[6].to_string();
        let season = Season::from_slug(&league, chrono::Local::now().year());

        Ok(Self {
            url: url.to_string(),
            host: caps[1].to_string(),
            region_id: id(2)?,
            tournament_id: id(3)?,
            season_id: id(4)?,
            stage_id: id(5)?,
            league,
            season,
        })
    }

    /// Shard template with `{year}` and `{month}` placeholders.
    pub fn data_url_template(&self) -> String {
        format!(
            "https://{}/tournaments/{}/data/?d={{year}}{{month}}&isAggregate=false",
            self.host, self.stage_id
        )
    }

    pub fn match_url_template(&self) -> String {
        match_url_template(&self.host, &self.league)
    }
}

/// Match page template with `{match_id}`, `{home_team}` and `{away_team}` placeholders.
pub fn match_url_template(host: &str, league: &str) -> String {
    format!("https://{host}/Matches/{{match_id}}/Live/{league}-{{home_team}}-{{away_team}}")
}

pub fn shard_url(template: &str, year: i32, month: u32) -> String {
    template
        .replace("{year}", &year.to_string())
        .replace("{month}", &format!("{month:02}"))
}

/// Team name in the site's slug form: spaces become `-`, periods are dropped.
pub fn sanitize_team_name(name: &str) -> String {
    name.replace(' ', "-").replace('.', "")
}

/// One match-detail URL, tagged with the month it was listed under.
pub fn match_url(template: &str, listing: &MatchListing, month: &str) -> String {
    let home = sanitize_team_name(listing.home_team_name.as_deref().unwrap_or_default());
    let away = sanitize_team_name(listing.away_team_name.as_deref().unwrap_or_default());
    let base = template
        .replace("{match_id}", &listing.id.to_string())
        .replace("{home_team}", &home)
        .replace("{away_team}", &away);
    format!("{base}?x-month={month}")
}

/// One URL per listed match, in month then listing order.
pub fn build_match_urls(grouped: &MonthlyListings, template: &str) -> Vec<String> {
    grouped
        .iter()
        .flat_map(|(month, tournaments)| {
            tournaments
                .iter()
                .flat_map(|t| t.matches.iter())
                .map(move |m| match_url(template, m, month))
        })
        .collect()
}

/// Match id and month recovered from a URL built by [`match_url`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchTarget {
    pub url: String,
    pub match_id: i64,
    pub month: String,
}

impl MatchTarget {
    pub fn from_url(raw: &str) -> Result<Self, TargetError> {
        let parsed = Url::parse(raw).map_err(|_| TargetError::NotMatchUrl(raw.to_string()))?;
        let match_id = parsed
            .path_segments()
            .and_then(|mut segments| {
                segments.find(|s| *s == "Matches")?;
                segments.next()?.parse::<i64>().ok()
            })
            .ok_or_else(|| TargetError::NotMatchUrl(raw.to_string()))?;
        let month = parsed
            .query_pairs()
            .find(|(k, _)| k == "x-month")
            .map(|(_, v)| v.into_owned())
            .filter(|v| !v.is_empty())
            .ok_or_else(|| TargetError::MissingMonth(raw.to_string()))?;
        Ok(Self {
            url: raw.to_string(),
            match_id,
            month,
        })
    }
}

/// The JSON document inside a shard response. Browser-rendered responses wrap
/// the payload in an HTML shell.
pub fn json_payload(body: &str) -> &str {
    let trimmed = body.trim();
    if trimmed.starts_with('{') || trimmed.starts_with('[') {
        return trimmed;
    }
    match (trimmed.find('{'), trimmed.rfind('}')) {
        (Some(start), Some(end)) if start < end => &trimmed[start..=end],
        _ => trimmed,
    }
}

/// Tournament listings of one data shard. `None` when the body is not JSON or
/// carries no tournaments.
pub fn parse_shard(body: &[u8]) -> Option<Vec<TournamentListing>> {
    let text = String::from_utf8_lossy(body);
    let page: TournamentsPage = match serde_json::from_str(json_payload(&text)) {
        Ok(page) => page,
        Err(e) => {
            debug!(error = %e, "shard is not json");
            return None;
        }
    };
    let listings: Vec<TournamentListing> = page
        .tournaments
        .into_iter()
        .filter_map(|raw| match serde_json::from_value(raw) {
            Ok(listing) => Some(listing),
            Err(e) => {
                warn!(error = %e, "skipping unreadable tournament entry");
                None
            }
        })
        .collect();
    if listings.is_empty() {
        None
    } else {
        Some(listings)
    }
}

pub struct TournamentDiscovery {
    fetcher: Arc<BoundedFetcher>,
    store: ArtifactStore,
}

impl TournamentDiscovery {
    pub fn new(fetcher: Arc<BoundedFetcher>, store: ArtifactStore) -> Self {
        Self { fetcher, store }
    }

    /// Fetches all twelve monthly shards concurrently and groups the listings by
    /// month. Each non-empty month is written to `<league>/<month>/matches.json`.
    #[instrument(skip(self, template), fields(league = %league))]
    pub async fn discover(&self, league: &str, template: &str, season: Season) -> MonthlyListings {
        let urls: Vec<String> = (1..=12u32)
            .map(|month| shard_url(template, season.year_for(month), month))
            .collect();
        let responses = self.fetcher.fetch_all(urls).await;

        let mut grouped = MonthlyListings::new();
        for (month_name, (url, body)) in MONTH_NAMES.iter().zip(responses) {
            let Some(body) = body else {
                debug!(url = %url, "no shard data");
                continue;
            };
            let Some(listings) = parse_shard(&body) else {
                debug!(url = %url, month = month_name, "shard has no tournaments");
                continue;
            };
            grouped
                .entry((*month_name).to_string())
                .or_default()
                .extend(listings);
        }

        for (month, listings) in &grouped {
            let path = self.store.matches_path(league, month);
            if let Err(e) = self.store.write_json(&path, listings) {
                warn!(error = %e, month = %month, "could not write month listing");
            }
        }

        info!(
            months = grouped.len(),
            matches = grouped.values().flatten().map(|t| t.matches.len()).sum::<usize>(),
            "discovery finished"
        );
        grouped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::testing::{fast_retry, ScriptedBackend};

    const FIXTURES: &str = "https://www.whoscored.com/Regions/252/Tournaments/2/Seasons/10316/Stages/23400/Fixtures/England-Premier-League-2024-2025";

    #[test]
    fn parses_fixtures_url() {
        let t = TournamentTarget::parse(FIXTURES).unwrap();
        assert_eq!(t.host, "www.whoscored.com");
        assert_eq!((t.region_id, t.tournament_id, t.season_id, t.stage_id), (252, 2, 10316, 23400));
        assert_eq!(t.league, "England-Premier-League-2024-2025");
        assert_eq!(t.season, Season::Split { start: 2024, end: 2025 });
        assert_eq!(
            t.data_url_template(),
            "https://www.whoscored.com/tournaments/23400/data/?d={year}{month}&isAggregate=false"
        );
    }

    #[test]
    fn rejects_non_fixtures_urls() {
        for bad in [
            "http://www.whoscored.com/Regions/1/Tournaments/2/Seasons/3/Stages/4/Fixtures/X",
            "https://www.whoscored.com/Regions/1/Tournaments/2/Fixtures/X",
            "https://www.whoscored.com/Regions/a/Tournaments/2/Seasons/3/Stages/4/Fixtures/X",
            "https://www.whoscored.com/Regions/1/Tournaments/2/Seasons/3/Stages/4/Fixtures/",
            "not a url",
        ] {
            assert!(
                matches!(TournamentTarget::parse(bad), Err(TargetError::NotFixturesUrl(_))),
                "{bad}"
            );
        }
    }

    #[test]
    fn season_year_follows_slug() {
        let split = Season::from_slug("England-League-Cup-2024-2025", 1999);
        assert_eq!(split.year_for(8), 2024);
        assert_eq!(split.year_for(12), 2024);
        assert_eq!(split.year_for(1), 2025);
        assert_eq!(split.year_for(6), 2025);

        assert_eq!(Season::from_slug("Brazil-Brasileirao-2024", 1999), Season::Calendar(2024));
        assert_eq!(Season::from_slug("International-FIFA-World-Cup", 1999), Season::Calendar(1999));
        assert_eq!(shard_url("d={year}{month}", 2024, 3), "d=202403");
    }

    #[test]
    fn match_urls_sanitize_names_and_round_trip() {
        let listing: MatchListing = serde_json::from_value(serde_json::json!({
            "id": 1821060,
            "homeTeamName": "Man Utd",
            "awayTeamName": "St. Pauli"
        }))
        .unwrap();
        let mut grouped = MonthlyListings::new();
        grouped.insert(
            "August".into(),
            vec![serde_json::from_value(serde_json::json!({"tournamentId": 2, "matches": [listing]})).unwrap()],
        );

        let template = match_url_template("www.whoscored.com", "England-Premier-League-2024-2025");
        let urls = build_match_urls(&grouped, &template);
        assert_eq!(
            urls,
            vec!["https://www.whoscored.com/Matches/1821060/Live/England-Premier-League-2024-2025-Man-Utd-St-Pauli?x-month=August"]
        );

        let target = MatchTarget::from_url(&urls[0]).unwrap();
        assert_eq!(target.match_id, 1821060);
        assert_eq!(target.month, "August");
        assert!(matches!(
            MatchTarget::from_url("https://www.whoscored.com/Matches/1/Live/X"),
            Err(TargetError::MissingMonth(_))
        ));
    }

    #[test]
    fn json_payload_strips_browser_shell() {
        let wrapped = r#"<html><head></head><body><pre>{"tournaments":[]}</pre></body></html>"#;
        assert_eq!(json_payload(wrapped), r#"{"tournaments":[]}"#);
        assert_eq!(json_payload(" {\"a\":1} "), "{\"a\":1}");
    }

    #[tokio::test]
    async fn discover_groups_months_in_calendar_order_and_writes_listings() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path());
        let template = "https://s/tournaments/9/data/?d={year}{month}";
        let shard = |id: i64| {
            serde_json::json!({
                "tournaments": [{"tournamentId": 2, "matches": [{"id": id, "homeTeamName": "A", "awayTeamName": "B"}]}]
            })
            .to_string()
        };
        let backend = Arc::new(
            ScriptedBackend::default()
                .page("https://s/tournaments/9/data/?d=202410", 200, &shard(10))
                .page("https://s/tournaments/9/data/?d=202408", 200, &shard(8))
                .page("https://s/tournaments/9/data/?d=202409", 200, r#"{"tournaments": []}"#)
                .page("https://s/tournaments/9/data/?d=202501", 200, "<html>oops</html>"),
        );
        let fetcher = Arc::new(BoundedFetcher::new(backend.clone(), 5, fast_retry()));
        let discovery = TournamentDiscovery::new(fetcher, store.clone());

        let grouped = discovery
            .discover("L-2024-2025", template, Season::Split { start: 2024, end: 2025 })
            .await;

        // September is empty, January is not JSON, the rest are unreachable.
        assert_eq!(grouped.keys().collect::<Vec<_>>(), vec!["August", "October"]);
        assert!(store.matches_path("L-2024-2025", "October").exists());
        assert!(!store.matches_path("L-2024-2025", "January").exists());
        let back: Vec<TournamentListing> =
            store.read_json(&store.matches_path("L-2024-2025", "August")).unwrap();
        assert_eq!(back[0].matches[0].id, 8);
    }
}
