//! Pulls the embedded match data out of a rendered match page.
use std::path::PathBuf;
use std::sync::OnceLock;

use regex::Regex;
use scraper::{Html, Selector};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

use crate::artifacts::{ArtifactError, ArtifactStore};
use crate::model::lenient::value_to_i64;

pub mod regions;
pub mod repair;

pub use regions::parse_all_regions;

/// Text identifying the script that carries the match payload.
pub const MATCH_ARGS_MARKER: &str = r#"require.config.params["args"]"#;

const MATCH_CENTRE_KEY: &str = "matchCentreData";

#[derive(Error, Debug)]
pub enum ExtractError {
    #[error("embedded script has no object literal")]
    NoLiteral,
    #[error("embedded data is not valid json after repair: {0}")]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Artifact(#[from] ArtifactError),
}

/// The four payload entries of a match page, typed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MatchPage {
    pub match_id: Option<i64>,
    /// `None` when the page has no (or a `null`) match-centre entry.
    pub match_centre_data: Option<Value>,
    pub event_types: Option<Value>,
    pub formation_mappings: Option<Value>,
    pub has_initial_match_data: bool,
}

/// What [`extract`] wrote for one page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Extraction {
    pub match_id: Option<i64>,
    pub match_centre: Option<PathBuf>,
    pub formation_mappings_written: bool,
    pub event_types_written: bool,
}

fn match_args_keys() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| repair::key_pattern(repair::MATCH_ARGS_KEYS).expect("static key regex"))
}

/// Text of the first `<script>` whose body contains `marker`.
pub fn find_script(html: &str, marker: &str) -> Option<String> {
    let selector = Selector::parse("script").ok()?;
    let document = Html::parse_document(html);
    document
        .select(&selector)
        .map(|el| el.text().collect::<String>())
        .find(|text| text.contains(marker))
}

/// `Ok(None)` when the page has no payload script, or the script carries no
/// match-centre entry at all.
pub fn parse_match_page(html: &str) -> Result<Option<MatchPage>, ExtractError> {
    let Some(script) = find_script(html, MATCH_ARGS_MARKER) else {
        warn!("page has no match payload script");
        return Ok(None);
    };
    let literal = repair::outer_slice(&script, '{', '}').ok_or(ExtractError::NoLiteral)?;
    if !literal.contains(MATCH_CENTRE_KEY) {
        warn!("match detail data unavailable on page");
        return Ok(None);
    }
    let repaired = repair::quote_keys(&repair::strip_newlines(literal), match_args_keys());
    let mut payload: serde_json::Map<String, Value> = serde_json::from_str(&repaired)?;

    let present = |v: Option<Value>| v.filter(|v| !v.is_null());
    Ok(Some(MatchPage {
        match_id: payload.get("matchId").and_then(value_to_i64),
        match_centre_data: present(payload.remove(MATCH_CENTRE_KEY)).filter(has_content),
        event_types: present(payload.remove("matchCentreEventTypeJson")),
        formation_mappings: present(payload.remove("formationIdNameMappings")),
        has_initial_match_data: payload.contains_key("initialMatchDataForScrappers"),
    }))
}

fn has_content(value: &Value) -> bool {
    match value {
        Value::Object(map) => !map.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Null => false,
        _ => true,
    }
}

/// Parses a match page and writes its artifacts under `<league>/<month>/`.
///
/// Formation mappings and the event-type catalog are shared by every match of a
/// month and are only written when absent. Match-centre data is written per
/// match, replacing any previous copy.
pub fn extract(
    store: &ArtifactStore,
    html: &str,
    month: &str,
    league: &str,
) -> Result<Option<Extraction>, ExtractError> {
    let Some(page) = parse_match_page(html)? else {
        return Ok(None);
    };

    let formation_mappings_written = match &page.formation_mappings {
        Some(v) => store.write_json_if_absent(&store.formation_mappings_path(league, month), v)?,
        None => false,
    };
    let event_types_written = match &page.event_types {
        Some(v) => store.write_json_if_absent(&store.event_types_path(league, month), v)?,
        None => false,
    };

    let match_centre = match (&page.match_centre_data, page.match_id) {
        (Some(data), Some(match_id)) => {
            let path = store.match_centre_path(league, month, match_id);
            store.write_json(&path, data)?;
            debug!(match_id, path = %path.display(), "match centre data written");
            Some(path)
        }
        (Some(_), None) => {
            warn!(league = %league, month = %month, "match centre data without matchId; not written");
            None
        }
        (None, _) => {
            warn!(match_id = ?page.match_id, "no match centre data on page");
            None
        }
    };

    Ok(Some(Extraction {
        match_id: page.match_id,
        match_centre,
        formation_mappings_written,
        event_types_written,
    }))
}
