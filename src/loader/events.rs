use anyhow::{Context, Result};
use sqlx::{QueryBuilder, Sqlite};
use tracing::{debug, info, instrument, warn};

use crate::artifacts::{match_id_from_match_centre_path, ArtifactStore};
use crate::model::{DisplayValue, IncidentEventRecord, MatchCentreData};
use crate::util::db::{rows_per_statement, Db, Table};

const COLUMNS: &[&str] = &[
    "id",
    "match_id",
    "event_id",
    "minute",
    "second",
    "team_id",
    "player_id",
    "x",
    "y",
    "expanded_minute",
    "period_value",
    "period_display_name",
    "type_value",
    "type_display_name",
    "outcome_type_value",
    "outcome_type_display_name",
    "qualifiers",
    "satisfied_events_types",
    "is_touch",
    "end_x",
    "end_y",
    "goal_mouth_x",
    "goal_mouth_y",
    "related_event_id",
    "related_player_id",
    "card_type_value",
    "card_type_display_name",
    "is_goal",
    "is_shot",
];

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventReport {
    pub files_read: usize,
    pub files_skipped: usize,
    pub events_seen: usize,
    pub skipped_existing: usize,
    pub inserted: u64,
    pub batches_committed: usize,
}

/// One `incident_event` row; nested display values are split into columns and
/// list fields serialized to JSON text.
#[derive(Debug, Clone, PartialEq)]
struct EventRow {
    id: i64,
    match_id: Option<i64>,
    event_id: Option<i64>,
    minute: Option<i64>,
    second: Option<i64>,
    team_id: Option<i64>,
    player_id: Option<i64>,
    x: Option<f64>,
    y: Option<f64>,
    expanded_minute: Option<i64>,
    period_value: Option<i64>,
    period_display_name: Option<String>,
    type_value: Option<i64>,
    type_display_name: Option<String>,
    outcome_type_value: Option<i64>,
    outcome_type_display_name: Option<String>,
    qualifiers: String,
    satisfied_events_types: String,
    is_touch: bool,
    end_x: Option<f64>,
    end_y: Option<f64>,
    goal_mouth_x: Option<f64>,
    goal_mouth_y: Option<f64>,
    related_event_id: Option<i64>,
    related_player_id: Option<i64>,
    card_type_value: Option<i64>,
    card_type_display_name: Option<String>,
    is_goal: bool,
    is_shot: bool,
}

fn split(display: Option<DisplayValue>) -> (Option<i64>, Option<String>) {
    match display {
        Some(d) => (d.value, d.display_name),
        None => (None, None),
    }
}

impl EventRow {
    fn from_record(match_id: Option<i64>, rec: IncidentEventRecord) -> Result<Self> {
        let (period_value, period_display_name) = split(rec.period);
        let (type_value, type_display_name) = split(rec.kind);
        let (outcome_type_value, outcome_type_display_name) = split(rec.outcome_type);
        let (card_type_value, card_type_display_name) = split(rec.card_type);
        Ok(Self {
            id: rec.id,
            match_id,
            event_id: rec.event_id,
            minute: rec.minute,
            second: rec.second,
            team_id: rec.team_id,
            player_id: rec.player_id,
            x: rec.x,
            y: rec.y,
            expanded_minute: rec.expanded_minute,
            period_value,
            period_display_name,
            type_value,
            type_display_name,
            outcome_type_value,
            outcome_type_display_name,
            qualifiers: serde_json::to_string(&rec.qualifiers)?,
            satisfied_events_types: serde_json::to_string(&rec.satisfied_events_types)?,
            is_touch: rec.is_touch,
            end_x: rec.end_x,
            end_y: rec.end_y,
            goal_mouth_x: rec.goal_mouth_x,
            goal_mouth_y: rec.goal_mouth_y,
            related_event_id: rec.related_event_id,
            related_player_id: rec.related_player_id,
            card_type_value,
            card_type_display_name,
            is_goal: rec.is_goal,
            is_shot: rec.is_shot,
        })
    }
}

/// Inserts every incident event whose id is not yet stored, committing once per
/// `batch_size` staged rows.
#[instrument(skip(db, store))]
pub async fn load_events(db: &Db, store: &ArtifactStore, batch_size: usize) -> Result<EventReport> {
    let files = store.match_centre_files();
    let mut report = EventReport::default();
    if files.is_empty() {
        warn!(root = %store.root().display(), "no match centre files found; scrape first");
        return Ok(report);
    }

    let mut known = db.existing_ids(Table::IncidentEvent).await?;
    info!(files = files.len(), stored = known.len(), "loading incident events");

    let mut staged: Vec<EventRow> = Vec::with_capacity(batch_size);
    for path in files {
        let data: MatchCentreData = match store.read_json(&path) {
            Ok(data) => data,
            Err(e) => {
                warn!(error = %e, "skipping unreadable match centre file");
                report.files_skipped += 1;
                continue;
            }
        };
        report.files_read += 1;
        let match_id = match_id_from_match_centre_path(&path);

        for record in data.into_events() {
            report.events_seen += 1;
            if !known.insert(record.id) {
                report.skipped_existing += 1;
                continue;
            }
            staged.push(EventRow::from_record(match_id, record)?);
            if staged.len() >= batch_size {
                report.inserted += commit_batch(db, &staged).await?;
                report.batches_committed += 1;
                staged.clear();
            }
        }
    }
    if !staged.is_empty() {
        report.inserted += commit_batch(db, &staged).await?;
        report.batches_committed += 1;
    }

    info!(
        inserted = report.inserted,
        batches = report.batches_committed,
        skipped = report.skipped_existing,
        "incident events loaded"
    );
    Ok(report)
}

async fn commit_batch(db: &Db, rows: &[EventRow]) -> Result<u64> {
    let mut tx = db.pool.begin().await?;
    let mut inserted = 0;
    for chunk in rows.chunks(rows_per_statement(COLUMNS.len())) {
        inserted += insert_chunk(&mut tx, chunk).await?;
    }
    tx.commit().await.context("commit incident event batch")?;
    debug!(rows = rows.len(), inserted, "batch committed");
    Ok(inserted)
}

async fn insert_chunk(conn: &mut sqlx::SqliteConnection, rows: &[EventRow]) -> Result<u64> {
    let mut qb: QueryBuilder<'_, Sqlite> =
        QueryBuilder::new(format!("INSERT INTO incident_event ({}) ", COLUMNS.join(", ")));
    qb.push_values(rows, |mut b, r| {
        b.push_bind(r.id)
            .push_bind(r.match_id)
            .push_bind(r.event_id)
            .push_bind(r.minute)
            .push_bind(r.second)
            .push_bind(r.team_id)
            .push_bind(r.player_id)
            .push_bind(r.x)
            .push_bind(r.y)
            .push_bind(r.expanded_minute)
            .push_bind(r.period_value)
            .push_bind(r.period_display_name.as_deref())
            .push_bind(r.type_value)
            .push_bind(r.type_display_name.as_deref())
            .push_bind(r.outcome_type_value)
            .push_bind(r.outcome_type_display_name.as_deref())
            .push_bind(r.qualifiers.as_str())
            .push_bind(r.satisfied_events_types.as_str())
            .push_bind(r.is_touch)
            .push_bind(r.end_x)
            .push_bind(r.end_y)
            .push_bind(r.goal_mouth_x)
            .push_bind(r.goal_mouth_y)
            .push_bind(r.related_event_id)
            .push_bind(r.related_player_id)
            .push_bind(r.card_type_value)
            .push_bind(r.card_type_display_name.as_deref())
            .push_bind(r.is_goal)
            .push_bind(r.is_shot);
    });
    qb.push(" ON CONFLICT (id) DO NOTHING");
    let done = qb.build().execute(&mut *conn).await?;
    Ok(done.rows_affected())
}
