//! On-disk artifact layout.
//!
//! ```text
//! <root>/all_regions.json
//! <root>/tournament_url_mapping.json
//! <root>/<league>/<month>/matches.json
//! <root>/<league>/<month>/matches_<dd>.json
//! <root>/<league>/<month>/raw_html_<match_id>.html
//! <root>/<league>/<month>/match_centre_data_<match_id>.json
//! <root>/<league>/<month>/formation_id_name_mappings.json
//! <root>/<league>/<month>/match_centre_event_type.json
//! ```
//!
//! Every write goes through a sibling temp file and a rename, so a reader never
//! observes a half-written artifact.
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;
use walkdir::WalkDir;

const ALL_REGIONS: &str = "all_regions.json";
const URL_MAPPING: &str = "tournament_url_mapping.json";
const MATCHES: &str = "matches.json";
const FORMATION_MAPPINGS: &str = "formation_id_name_mappings.json";
const EVENT_TYPES: &str = "match_centre_event_type.json";
const RAW_HTML_PREFIX: &str = "raw_html_";
const MATCH_CENTRE_PREFIX: &str = "match_centre_data_";

#[derive(Error, Debug)]
pub enum ArtifactError {
    #[error("io error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid json in {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

impl ArtifactError {
    fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    fn json(path: &Path, source: serde_json::Error) -> Self {
        Self::Json {
            path: path.to_path_buf(),
            source,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn month_dir(&self, league: &str, month: &str) -> PathBuf {
        self.root
            .join(path_component(league))
            .join(path_component(month))
    }

    pub fn all_regions_path(&self) -> PathBuf {
        self.root.join(ALL_REGIONS)
    }

    pub fn url_mapping_path(&self) -> PathBuf {
        self.root.join(URL_MAPPING)
    }

    pub fn matches_path(&self, league: &str, month: &str) -> PathBuf {
        self.month_dir(league, month).join(MATCHES)
    }

    /// Listing written by the recent-matches flow, one file per calendar day.
    pub fn daily_matches_path(&self, league: &str, month: &str, day: u32) -> PathBuf {
        self.month_dir(league, month)
            .join(format!("matches_{day:02}.json"))
    }

    pub fn raw_html_path(&self, league: &str, month: &str, match_id: i64) -> PathBuf {
        self.month_dir(league, month)
            .join(format!("{RAW_HTML_PREFIX}{match_id}.html"))
    }

    pub fn match_centre_path(&self, league: &str, month: &str, match_id: i64) -> PathBuf {
        self.month_dir(league, month)
            .join(format!("{MATCH_CENTRE_PREFIX}{match_id}.json"))
    }

    pub fn formation_mappings_path(&self, league: &str, month: &str) -> PathBuf {
        self.month_dir(league, month).join(FORMATION_MAPPINGS)
    }

    pub fn event_types_path(&self, league: &str, month: &str) -> PathBuf {
        self.month_dir(league, month).join(EVENT_TYPES)
    }

    pub fn write_text(&self, path: &Path, content: &str) -> Result<(), ArtifactError> {
        write_atomic(path, content.as_bytes())
    }

    pub fn write_json<T: Serialize + ?Sized>(
        &self,
        path: &Path,
        value: &T,
    ) -> Result<(), ArtifactError> {
        let bytes = to_pretty_json(value).map_err(|e| ArtifactError::json(path, e))?;
        write_atomic(path, &bytes)
    }

    /// Writes only when nothing is on disk yet. Returns whether a write happened.
    pub fn write_json_if_absent<T: Serialize + ?Sized>(
        &self,
        path: &Path,
        value: &T,
    ) -> Result<bool, ArtifactError> {
        if path.exists() {
            return Ok(false);
        }
        self.write_json(path, value)?;
        Ok(true)
    }

    pub fn read_text(&self, path: &Path) -> Result<String, ArtifactError> {
        fs::read_to_string(path).map_err(|e| ArtifactError::io(path, e))
    }

    pub fn read_json<T: DeserializeOwned>(&self, path: &Path) -> Result<T, ArtifactError> {
        let raw = self.read_text(path)?;
        serde_json::from_str(&raw).map_err(|e| ArtifactError::json(path, e))
    }

    /// Like `read_json`, but a missing file is `Ok(None)`.
    pub fn read_json_opt<T: DeserializeOwned>(
        &self,
        path: &Path,
    ) -> Result<Option<T>, ArtifactError> {
        if !path.exists() {
            return Ok(None);
        }
        self.read_json(path).map(Some)
    }

    /// All `match_centre_data_<id>.json` files below the root, sorted.
    pub fn match_centre_files(&self) -> Vec<PathBuf> {
        self.collect_files(|name| name.starts_with(MATCH_CENTRE_PREFIX) && name.ends_with(".json"))
    }

    /// All monthly and daily tournament listings below the root, sorted.
    pub fn listing_files(&self) -> Vec<PathBuf> {
        self.collect_files(is_listing_file_name)
    }

    fn collect_files(&self, keep: impl Fn(&str) -> bool) -> Vec<PathBuf> {
        let mut out: Vec<PathBuf> = WalkDir::new(&self.root)
            .into_iter()
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().is_file())
            .filter(|entry| entry.file_name().to_str().map(&keep).unwrap_or(false))
            .map(|entry| entry.into_path())
            .collect();
        out.sort();
        out
    }
}

/// Match id encoded in a `match_centre_data_<id>.json` file name.
pub fn match_id_from_match_centre_path(path: &Path) -> Option<i64> {
    path.file_name()?
        .to_str()?
        .strip_prefix(MATCH_CENTRE_PREFIX)?
        .strip_suffix(".json")?
        .parse()
        .ok()
}

fn is_listing_file_name(name: &str) -> bool {
    if name == MATCHES {
        return true;
    }
    name.strip_prefix("matches_")
        .and_then(|rest| rest.strip_suffix(".json"))
        .map(|day| !day.is_empty() && day.chars().all(|c| c.is_ascii_digit()))
        .unwrap_or(false)
}

/// Keeps a league or month name to a single, non-traversing path segment.
fn path_component(raw: &str) -> String {
    let cleaned: String = raw
        .trim()
        .chars()
        .map(|c| if matches!(c, '/' | '\\' | ':') { '_' } else { c })
        .collect();
    match cleaned.as_str() {
        "" | "." | ".." => "_".to_string(),
        _ => cleaned,
    }
}

/// Four-space indented JSON, non-ASCII left as-is.
fn to_pretty_json<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>, serde_json::Error> {
    let mut buf = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
    let mut ser = serde_json::Serializer::with_formatter(&mut buf, formatter);
    value.serialize(&mut ser)?;
    Ok(buf)
}

fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), ArtifactError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| ArtifactError::io(parent, e))?;
    }
    let mut tmp_name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    tmp_name.push(".tmp");
    let tmp = path.with_file_name(tmp_name);

    let mut file = fs::File::create(&tmp).map_err(|e| ArtifactError::io(&tmp, e))?;
    file.write_all(bytes)
        .and_then(|_| file.sync_all())
        .map_err(|e| ArtifactError::io(&tmp, e))?;
    drop(file);
    fs::rename(&tmp, path).map_err(|e| ArtifactError::io(path, e))
}
