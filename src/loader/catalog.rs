use std::collections::HashSet;

use anyhow::{Context, Result};
use chrono::NaiveDateTime;
use sqlx::{QueryBuilder, Sqlite, SqliteConnection};
use tracing::{info, instrument, warn};

use crate::artifacts::ArtifactStore;
use crate::model::{IncidentListing, MatchListing, TournamentListing};
use crate::util::db::{rows_per_statement, Db, Table};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CatalogReport {
    pub files_read: usize,
    pub files_skipped: usize,
    pub tournaments: u64,
    pub teams: u64,
    pub matches: u64,
    pub incidents: u64,
    pub bets: u64,
}

#[derive(Debug, Clone, PartialEq)]
struct TournamentRow {
    id: i64,
    name: Option<String>,
    season_name: Option<String>,
    region_name: Option<String>,
    region_id: Option<i64>,
}

#[derive(Debug, Clone, PartialEq)]
struct TeamRow {
    id: i64,
    name: Option<String>,
    country_code: Option<String>,
    country_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
struct MatchRow {
    id: i64,
    stage_id: Option<i64>,
    tournament_id: i64,
    home_team_id: Option<i64>,
    away_team_id: Option<i64>,
    start_time: Option<NaiveDateTime>,
    status: Option<i64>,
    home_score: Option<i64>,
    away_score: Option<i64>,
    period: Option<i64>,
}

#[derive(Debug, Clone, PartialEq)]
struct IncidentRow {
    match_id: i64,
    minute: Option<i64>,
    kind: Option<i64>,
    sub_type: Option<i64>,
    player_name: Option<String>,
    participating_player_name: Option<String>,
    field: Option<i64>,
    period: Option<i64>,
    natural_key: String,
}

#[derive(Debug, Clone, PartialEq)]
struct BetRow {
    match_id: i64,
    bet_name: Option<String>,
    odds_decimal: Option<f64>,
    odds_fractional: Option<String>,
    provider_id: Option<i64>,
    click_out_url: Option<String>,
    natural_key: String,
}

fn key_part<T: ToString>(v: &Option<T>) -> String {
    v.as_ref().map(|v| v.to_string()).unwrap_or_default()
}

/// Identity of an incident within a match. Listings carry no incident id.
pub fn incident_natural_key(match_id: i64, i: &IncidentListing) -> String {
    [
        match_id.to_string(),
        key_part(&i.minute),
        key_part(&i.kind),
        key_part(&i.sub_type),
        key_part(&i.player_name),
        key_part(&i.participating_player_name),
        key_part(&i.field),
        key_part(&i.period),
    ]
    .join("|")
}

/// One offer per (match, market, provider).
pub fn bet_natural_key(match_id: i64, bet_name: Option<&str>, provider_id: Option<i64>) -> String {
    format!(
        "{}|{}|{}",
        match_id,
        bet_name.unwrap_or_default(),
        key_part(&provider_id)
    )
}

/// Rows not yet in the store, deduplicated against what it already holds and
/// against each other.
#[derive(Default)]
struct Staged {
    tournaments: Vec<TournamentRow>,
    teams: Vec<TeamRow>,
    matches: Vec<MatchRow>,
    incidents: Vec<IncidentRow>,
    bets: Vec<BetRow>,
}

struct Known {
    tournaments: HashSet<i64>,
    teams: HashSet<i64>,
    matches: HashSet<i64>,
    incidents: HashSet<String>,
    bets: HashSet<String>,
}

impl Known {
    async fn load(db: &Db) -> Result<Self> {
        Ok(Self {
            tournaments: db.existing_ids(Table::Tournaments).await?,
            teams: db.existing_ids(Table::Teams).await?,
            matches: db.existing_ids(Table::Matches).await?,
            incidents: db.existing_natural_keys(Table::Incidents).await?,
            bets: db.existing_natural_keys(Table::Bets).await?,
        })
    }
}

impl Staged {
    fn add_tournament(&mut self, known: &mut Known, t: &TournamentListing) {
        if known.tournaments.insert(t.tournament_id) {
            self.tournaments.push(TournamentRow {
                id: t.tournament_id,
                name: t.tournament_name.clone(),
                season_name: t.season_name.clone(),
                region_name: t.region_name.clone(),
                region_id: t.region_id,
            });
        }
        for m in &t.matches {
            self.add_match(known, t, m);
        }
    }

    fn add_match(&mut self, known: &mut Known, t: &TournamentListing, m: &MatchListing) {
        // First-seen team data wins.
        for (id, name, code, country) in [
            (
                m.home_team_id,
                &m.home_team_name,
                &m.home_team_country_code,
                &m.home_team_country_name,
            ),
            (
                m.away_team_id,
                &m.away_team_name,
                &m.away_team_country_code,
                &m.away_team_country_name,
            ),
        ] {
            if let Some(id) = id {
                if known.teams.insert(id) {
                    self.teams.push(TeamRow {
                        id,
                        name: name.clone(),
                        country_code: code.clone(),
                        country_name: country.clone(),
                    });
                }
            }
        }

        if known.matches.insert(m.id) {
            self.matches.push(MatchRow {
                id: m.id,
                stage_id: m.stage_id.or(t.stage_id),
                tournament_id: t.tournament_id,
                home_team_id: m.home_team_id,
                away_team_id: m.away_team_id,
                start_time: m.start_time_parsed(),
                status: m.status,
                home_score: m.home_score,
                away_score: m.away_score,
                period: m.period,
            });
        }

        for i in &m.incidents {
            let natural_key = incident_natural_key(m.id, i);
            if known.incidents.insert(natural_key.clone()) {
                self.incidents.push(IncidentRow {
                    match_id: m.id,
                    minute: i.minute,
                    kind: i.kind,
                    sub_type: i.sub_type,
                    player_name: i.player_name.clone(),
                    participating_player_name: i.participating_player_name.clone(),
                    field: i.field,
                    period: i.period,
                    natural_key,
                });
            }
        }

        let Some(markets) = &m.bets else { return };
        for (bet_name, market) in markets.named() {
            for offer in &market.offers {
                let natural_key = bet_natural_key(m.id, bet_name.as_deref(), offer.provider_id);
                if known.bets.insert(natural_key.clone()) {
                    self.bets.push(BetRow {
                        match_id: m.id,
                        bet_name: bet_name.clone(),
                        odds_decimal: offer.odds_decimal,
                        odds_fractional: offer.odds_fractional.clone(),
                        provider_id: offer.provider_id,
                        click_out_url: offer.click_out_url.clone(),
                        natural_key,
                    });
                }
            }
        }
    }

    fn is_empty(&self) -> bool {
        self.tournaments.is_empty()
            && self.teams.is_empty()
            && self.matches.is_empty()
            && self.incidents.is_empty()
            && self.bets.is_empty()
    }
}

/// Loads tournaments, teams, matches, incidents and bets from every listing file
/// in a single transaction, parents first.
#[instrument(skip(db, store))]
pub async fn load_catalog(db: &Db, store: &ArtifactStore) -> Result<CatalogReport> {
    let files = store.listing_files();
    let mut report = CatalogReport::default();
    if files.is_empty() {
        warn!(root = %store.root().display(), "no tournament listings found");
        return Ok(report);
    }

    let mut known = Known::load(db).await?;
    let mut staged = Staged::default();
    for path in files {
        let listings: Vec<TournamentListing> = match store.read_json(&path) {
            Ok(listings) => listings,
            Err(e) => {
                warn!(error = %e, "skipping unreadable listing file");
                report.files_skipped += 1;
                continue;
            }
        };
        report.files_read += 1;
        for t in &listings {
            staged.add_tournament(&mut known, t);
        }
    }

    if staged.is_empty() {
        info!(files = report.files_read, "catalog already up to date");
        return Ok(report);
    }

    let mut tx = db.pool.begin().await?;
    report.tournaments = insert_tournaments(&mut tx, &staged.tournaments).await?;
    report.teams = insert_teams(&mut tx, &staged.teams).await?;
    report.matches = insert_matches(&mut tx, &staged.matches).await?;
    report.incidents = insert_incidents(&mut tx, &staged.incidents).await?;
    report.bets = insert_bets(&mut tx, &staged.bets).await?;
    tx.commit().await.context("commit catalog")?;

    info!(
        tournaments = report.tournaments,
        teams = report.teams,
        matches = report.matches,
        incidents = report.incidents,
        bets = report.bets,
        "catalog loaded"
    );
    Ok(report)
}

async fn insert_tournaments(conn: &mut SqliteConnection, rows: &[TournamentRow]) -> Result<u64> {
    let mut inserted = 0;
    for chunk in rows.chunks(rows_per_statement(5)) {
        let mut qb: QueryBuilder<'_, Sqlite> = QueryBuilder::new(
            "INSERT INTO tournaments (id, name, season_name, region_name, region_id) ",
        );
        qb.push_values(chunk, |mut b, r| {
            b.push_bind(r.id)
                .push_bind(r.name.as_deref())
                .push_bind(r.season_name.as_deref())
                .push_bind(r.region_name.as_deref())
                .push_bind(r.region_id);
        });
        qb.push(" ON CONFLICT (id) DO NOTHING");
        inserted += qb.build().execute(&mut *conn).await?.rows_affected();
    }
    Ok(inserted)
}

async fn insert_teams(conn: &mut SqliteConnection, rows: &[TeamRow]) -> Result<u64> {
    let mut inserted = 0;
    for chunk in rows.chunks(rows_per_statement(4)) {
        let mut qb: QueryBuilder<'_, Sqlite> =
            QueryBuilder::new("INSERT INTO teams (id, name, country_code, country_name) ");
        qb.push_values(chunk, |mut b, r| {
            b.push_bind(r.id)
                .push_bind(r.name.as_deref())
                .push_bind(r.country_code.as_deref())
                .push_bind(r.country_name.as_deref());
        });
        qb.push(" ON CONFLICT (id) DO NOTHING");
        inserted += qb.build().execute(&mut *conn).await?.rows_affected();
    }
    Ok(inserted)
}

async fn insert_matches(conn: &mut SqliteConnection, rows: &[MatchRow]) -> Result<u64> {
    let mut inserted = 0;
    for chunk in rows.chunks(rows_per_statement(10)) {
        let mut qb: QueryBuilder<'_, Sqlite> = QueryBuilder::new(
            "INSERT INTO matches (id, stage_id, tournament_id, home_team_id, away_team_id, start_time, status, home_score, away_score, period) ",
        );
        qb.push_values(chunk, |mut b, r| {
            b.push_bind(r.id)
                .push_bind(r.stage_id)
                .push_bind(r.tournament_id)
                .push_bind(r.home_team_id)
                .push_bind(r.away_team_id)
                .push_bind(r.start_time)
                .push_bind(r.status)
                .push_bind(r.home_score)
                .push_bind(r.away_score)
                .push_bind(r.period);
        });
        qb.push(" ON CONFLICT (id) DO NOTHING");
        inserted += qb.build().execute(&mut *conn).await?.rows_affected();
    }
    Ok(inserted)
}

async fn insert_incidents(conn: &mut SqliteConnection, rows: &[IncidentRow]) -> Result<u64> {
    let mut inserted = 0;
    for chunk in rows.chunks(rows_per_statement(9)) {
        let mut qb: QueryBuilder<'_, Sqlite> = QueryBuilder::new(
            "INSERT INTO incidents (match_id, minute, type, sub_type, player_name, participating_player_name, field, period, natural_key) ",
        );
        qb.push_values(chunk, |mut b, r| {
            b.push_bind(r.match_id)
                .push_bind(r.minute)
                .push_bind(r.kind)
                .push_bind(r.sub_type)
                .push_bind(r.player_name.as_deref())
                .push_bind(r.participating_player_name.as_deref())
                .push_bind(r.field)
                .push_bind(r.period)
                .push_bind(r.natural_key.as_str());
        });
        qb.push(" ON CONFLICT (natural_key) DO NOTHING");
        inserted += qb.build().execute(&mut *conn).await?.rows_affected();
    }
    Ok(inserted)
}

async fn insert_bets(conn: &mut SqliteConnection, rows: &[BetRow]) -> Result<u64> {
    let mut inserted = 0;
    for chunk in rows.chunks(rows_per_statement(7)) {
        let mut qb: QueryBuilder<'_, Sqlite> = QueryBuilder::new(
            "INSERT INTO bets (match_id, bet_name, odds_decimal, odds_fractional, provider_id, click_out_url, natural_key) ",
        );
        qb.push_values(chunk, |mut b, r| {
            b.push_bind(r.match_id)
                .push_bind(r.bet_name.as_deref())
                .push_bind(r.odds_decimal)
                .push_bind(r.odds_fractional.as_deref())
                .push_bind(r.provider_id)
                .push_bind(r.click_out_url.as_deref())
                .push_bind(r.natural_key.as_str());
        });
        qb.push(" ON CONFLICT (natural_key) DO NOTHING");
        inserted += qb.build().execute(&mut *conn).await?.rows_affected();
    }
    Ok(inserted)
}
