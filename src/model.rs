//! Typed views over the upstream JSON payloads.
//!
//! Every scalar the site may omit is an `Option`. Boolean flags default to
//! `false` and list fields to empty when absent or null. Integer fields go through
//! [`lenient`] because the site is inconsistent about numbers vs. numeric
//! strings (and sometimes serializes ids as floats).
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

// --------------------------------------------------------------------------
// Monthly / daily tournament listings (`tournaments` array of the data shards)
// --------------------------------------------------------------------------

/// Envelope of a monthly data shard or a livescores response.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TournamentsPage {
    #[serde(default)]
    pub tournaments: Vec<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TournamentListing {
    #[serde(with = "lenient::i64_required")]
    pub tournament_id: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tournament_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub season_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region_name: Option<String>,
    #[serde(default, with = "lenient::i64_opt", skip_serializing_if = "Option::is_none")]
    pub region_id: Option<i64>,
    #[serde(default, with = "lenient::i64_opt", skip_serializing_if = "Option::is_none")]
    pub stage_id: Option<i64>,
    #[serde(default)]
    pub matches: Vec<MatchListing>,
    /// Fields the loader does not consume, kept so listings round-trip to disk intact.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchListing {
    #[serde(with = "lenient::i64_required")]
    pub id: i64,
    #[serde(default, with = "lenient::i64_opt", skip_serializing_if = "Option::is_none")]
    pub stage_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<String>,
    #[serde(default, with = "lenient::i64_opt", skip_serializing_if = "Option::is_none")]
    pub status: Option<i64>,
    #[serde(default, with = "lenient::i64_opt", skip_serializing_if = "Option::is_none")]
    pub home_team_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub home_team_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub home_team_country_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub home_team_country_name: Option<String>,
    #[serde(default, with = "lenient::i64_opt", skip_serializing_if = "Option::is_none")]
    pub away_team_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub away_team_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub away_team_country_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub away_team_country_name: Option<String>,
    #[serde(default, with = "lenient::i64_opt", skip_serializing_if = "Option::is_none")]
    pub home_score: Option<i64>,
    #[serde(default, with = "lenient::i64_opt", skip_serializing_if = "Option::is_none")]
    pub away_score: Option<i64>,
    #[serde(default, with = "lenient::i64_opt", skip_serializing_if = "Option::is_none")]
    pub period: Option<i64>,
    #[serde(default, deserialize_with = "lenient::vec_skip_invalid")]
    pub incidents: Vec<IncidentListing>,
    #[serde(
        default,
        deserialize_with = "lenient::opt_or_none",
        skip_serializing_if = "Option::is_none"
    )]
    pub bets: Option<BetMarkets>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl MatchListing {
    /// `startTime` as a naive timestamp; the site omits the offset.
    pub fn start_time_parsed(&self) -> Option<chrono::NaiveDateTime> {
        let raw = self.start_time.as_deref()?.trim();
        chrono::NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S")
            .or_else(|_| chrono::NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S"))
            .ok()
            .or_else(|| {
                chrono::DateTime::parse_from_rfc3339(raw)
                    .ok()
                    .map(|dt| dt.naive_utc())
            })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IncidentListing {
    #[serde(default, with = "lenient::i64_opt", skip_serializing_if = "Option::is_none")]
    pub minute: Option<i64>,
    #[serde(default, rename = "type", with = "lenient::i64_opt", skip_serializing_if = "Option::is_none")]
    pub kind: Option<i64>,
    #[serde(default, with = "lenient::i64_opt", skip_serializing_if = "Option::is_none")]
    pub sub_type: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub player_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub participating_player_name: Option<String>,
    #[serde(default, with = "lenient::i64_opt", skip_serializing_if = "Option::is_none")]
    pub field: Option<i64>,
    #[serde(default, with = "lenient::i64_opt", skip_serializing_if = "Option::is_none")]
    pub period: Option<i64>,
}

/// Betting markets come either keyed by outcome (`{"home": {...}}`) or as a plain list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum BetMarkets {
    Keyed(IndexMap<String, BetMarket>),
    Listed(Vec<BetMarket>),
}

impl BetMarkets {
    /// Markets paired with a display name, falling back to the outcome key.
    pub fn named(&self) -> Vec<(Option<String>, &BetMarket)> {
        match self {
            BetMarkets::Keyed(map) => map
                .iter()
                .map(|(key, market)| (market.bet_name.clone().or_else(|| Some(key.clone())), market))
                .collect(),
            BetMarkets::Listed(list) => list.iter().map(|m| (m.bet_name.clone(), m)).collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BetMarket {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bet_name: Option<String>,
    #[serde(default)]
    pub offers: Vec<BetOffer>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BetOffer {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub odds_decimal: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub odds_fractional: Option<String>,
    #[serde(default, with = "lenient::i64_opt", skip_serializing_if = "Option::is_none")]
    pub provider_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub click_out_url: Option<String>,
}

// --------------------------------------------------------------------------
// Match-centre data (per-match event payload)
// --------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchCentreData {
    #[serde(default)]
    pub home: Option<MatchCentreSide>,
    #[serde(default)]
    pub away: Option<MatchCentreSide>,
}

impl MatchCentreData {
    /// Home events followed by away events.
    pub fn into_events(self) -> Vec<IncidentEventRecord> {
        let mut out = Vec::new();
        for side in [self.home, self.away].into_iter().flatten() {
            out.extend(side.incident_events);
        }
        out
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchCentreSide {
    /// Events that fail to parse are dropped individually.
    #[serde(default, deserialize_with = "lenient::vec_skip_invalid")]
    pub incident_events: Vec<IncidentEventRecord>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DisplayValue {
    #[serde(default, with = "lenient::i64_opt")]
    pub value: Option<i64>,
    #[serde(default)]
    pub display_name: Option<String>,
}

/// One on-pitch action. `id` is the site's globally unique event id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IncidentEventRecord {
    #[serde(with = "lenient::i64_required")]
    pub id: i64,
    #[serde(default, with = "lenient::i64_opt")]
    pub event_id: Option<i64>,
    #[serde(default, with = "lenient::i64_opt")]
    pub minute: Option<i64>,
    #[serde(default, with = "lenient::i64_opt")]
    pub second: Option<i64>,
    #[serde(default, with = "lenient::i64_opt")]
    pub team_id: Option<i64>,
    #[serde(default, with = "lenient::i64_opt")]
    pub player_id: Option<i64>,
    #[serde(default)]
    pub x: Option<f64>,
    #[serde(default)]
    pub y: Option<f64>,
    #[serde(default, with = "lenient::i64_opt")]
    pub expanded_minute: Option<i64>,
    #[serde(default)]
    pub period: Option<DisplayValue>,
    #[serde(default, rename = "type")]
    pub kind: Option<DisplayValue>,
    #[serde(default)]
    pub outcome_type: Option<DisplayValue>,
    #[serde(default, deserialize_with = "lenient::or_default")]
    pub qualifiers: Vec<Value>,
    #[serde(default, deserialize_with = "lenient::or_default")]
    pub satisfied_events_types: Vec<Value>,
    #[serde(default, deserialize_with = "lenient::or_default")]
    pub is_touch: bool,
    #[serde(default)]
    pub end_x: Option<f64>,
    #[serde(default)]
    pub end_y: Option<f64>,
    #[serde(default)]
    pub goal_mouth_x: Option<f64>,
    #[serde(default)]
    pub goal_mouth_y: Option<f64>,
    #[serde(default, with = "lenient::i64_opt")]
    pub related_event_id: Option<i64>,
    #[serde(default, with = "lenient::i64_opt")]
    pub related_player_id: Option<i64>,
    #[serde(default)]
    pub card_type: Option<DisplayValue>,
    #[serde(default, deserialize_with = "lenient::or_default")]
    pub is_goal: bool,
    #[serde(default, deserialize_with = "lenient::or_default")]
    pub is_shot: bool,
}

// --------------------------------------------------------------------------
// Front-page region catalog
// --------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Region {
    #[serde(with = "lenient::i64_required")]
    pub id: i64,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default, rename = "type", with = "lenient::i64_opt")]
    pub kind: Option<i64>,
    #[serde(default)]
    pub flg: Option<String>,
    #[serde(default, with = "lenient::i64_opt")]
    pub sort_order: Option<i64>,
    #[serde(default)]
    pub tournaments: Vec<RegionTournament>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegionTournament {
    #[serde(with = "lenient::i64_required")]
    pub id: i64,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default, with = "lenient::i64_opt")]
    pub sort_order: Option<i64>,
}

/// Serde adapters for integers that may arrive as numbers, whole floats or strings.
pub mod lenient {
    use serde::de::Error;
    use serde::Deserialize;
    use serde_json::Value;

    pub fn value_to_i64(value: &Value) -> Option<i64> {
        match value {
            Value::Number(n) => n.as_i64().or_else(|| {
                n.as_f64()
                    .filter(|f| f.is_finite() && f.fract() == 0.0)
                    .map(|f| f as i64)
            }),
            Value::String(s) => {
                let s = s.trim();
                s.parse::<i64>().ok().or_else(|| {
                    s.parse::<f64>()
                        .ok()
                        .filter(|f| f.is_finite() && f.fract() == 0.0)
                        .map(|f| f as i64)
                })
            }
            _ => None,
        }
    }

    /// Keeps the elements that match `T`, dropping the rest.
    pub fn vec_skip_invalid<'de, D, T>(d: D) -> Result<Vec<T>, D::Error>
    where
        D: serde::Deserializer<'de>,
        T: serde::de::DeserializeOwned,
    {
        let values = match Option::<Value>::deserialize(d)? {
            Some(Value::Array(items)) => items,
            _ => Vec::new(),
        };
        Ok(values
            .into_iter()
            .filter_map(|v| serde_json::from_value(v).ok())
            .collect())
    }

    /// `T::default()` for absent, null, or unrecognised shapes.
    pub fn or_default<'de, D, T>(d: D) -> Result<T, D::Error>
    where
        D: serde::Deserializer<'de>,
        T: serde::de::DeserializeOwned + Default,
    {
        let value = Option::<Value>::deserialize(d)?;
        Ok(value
            .and_then(|v| serde_json::from_value(v).ok())
            .unwrap_or_default())
    }

    /// `None` for absent, null, or unrecognised shapes.
    pub fn opt_or_none<'de, D, T>(d: D) -> Result<Option<T>, D::Error>
    where
        D: serde::Deserializer<'de>,
        T: serde::de::DeserializeOwned,
    {
        let value = Option::<Value>::deserialize(d)?;
        Ok(value.and_then(|v| serde_json::from_value(v).ok()))
    }

    pub mod i64_opt {
        use super::*;

        pub fn deserialize<'de, D>(d: D) -> Result<Option<i64>, D::Error>
        where
            D: serde::Deserializer<'de>,
        {
            let value = Option::<Value>::deserialize(d)?;
            Ok(value.as_ref().and_then(value_to_i64))
        }

        pub fn serialize<S>(value: &Option<i64>, s: S) -> Result<S::Ok, S::Error>
        where
            S: serde::Serializer,
        {
            match value {
                Some(v) => s.serialize_i64(*v),
                None => s.serialize_none(),
            }
        }
    }

    pub mod i64_required {
        use super::*;

        pub fn deserialize<'de, D>(d: D) -> Result<i64, D::Error>
        where
            D: serde::Deserializer<'de>,
        {
            let value = Value::deserialize(d)?;
            value_to_i64(&value)
                .ok_or_else(|| D::Error::custom(format!("expected an integer id, got {value}")))
        }

        pub fn serialize<S>(value: &i64, s: S) -> Result<S::Ok, S::Error>
        where
            S: serde::Serializer,
        {
            s.serialize_i64(*value)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn incident_event_defaults_follow_source_fallbacks() {
        let ev: IncidentEventRecord = serde_json::from_value(json!({
            "id": 2736492811.0,
            "minute": "12",
            "type": {"value": 1, "displayName": "Pass"}
        }))
        .unwrap();
        assert_eq!(ev.id, 2736492811);
        assert_eq!(ev.minute, Some(12));
        assert!(!ev.is_touch && !ev.is_goal && !ev.is_shot);
        assert!(ev.qualifiers.is_empty());
        assert_eq!(ev.kind.unwrap().display_name.as_deref(), Some("Pass"));
        assert!(ev.card_type.is_none());
    }

    #[test]
    fn null_flags_and_lists_fall_back_to_defaults() {
        let ev: IncidentEventRecord = serde_json::from_value(json!({
            "id": 5,
            "qualifiers": null,
            "satisfiedEventsTypes": null,
            "isTouch": null,
            "isGoal": true,
            "isShot": null
        }))
        .unwrap();
        assert!(ev.qualifiers.is_empty() && ev.satisfied_events_types.is_empty());
        assert!(!ev.is_touch && ev.is_goal && !ev.is_shot);
    }

    #[test]
    fn one_bad_event_does_not_sink_its_side() {
        let data: MatchCentreData = serde_json::from_value(json!({
            "home": {"incidentEvents": [{"id": 1}, {"minute": 3}, {"id": "x"}, {"id": 2, "qualifiers": null}]}
        }))
        .unwrap();
        let ids: Vec<i64> = data.into_events().into_iter().map(|e| e.id).collect();
        assert_eq!(ids, vec![1, 2]);
    }

    #[test]
    fn listing_keeps_unknown_fields() {
        let raw = json!({
            "tournamentId": 2,
            "tournamentName": "Premier League",
            "sex": 1,
            "matches": [{"id": 10, "homeTeamName": "A", "awayTeamName": "B", "elapsed": "FT"}]
        });
        let listing: TournamentListing = serde_json::from_value(raw).unwrap();
        assert_eq!(listing.extra.get("sex"), Some(&json!(1)));
        assert_eq!(listing.matches[0].extra.get("elapsed"), Some(&json!("FT")));

        let back = serde_json::to_value(&listing).unwrap();
        assert_eq!(back["sex"], json!(1));
        assert_eq!(back["matches"][0]["homeTeamName"], json!("A"));
    }

    #[test]
    fn bets_accept_keyed_and_listed_shapes() {
        let keyed: BetMarkets = serde_json::from_value(json!({
            "home": {"offers": [{"oddsDecimal": 2.1, "providerId": 3}]}
        }))
        .unwrap();
        let named = keyed.named();
        assert_eq!(named[0].0.as_deref(), Some("home"));

        let listed: BetMarkets =
            serde_json::from_value(json!([{"betName": "1", "offers": []}])).unwrap();
        assert_eq!(listed.named()[0].0.as_deref(), Some("1"));
    }

    #[test]
    fn start_time_parses_naive_iso() {
        let m: MatchListing =
            serde_json::from_value(json!({"id": 1, "startTime": "2024-08-27T19:45:00"})).unwrap();
        let dt = m.start_time_parsed().unwrap();
        assert_eq!(dt.to_string(), "2024-08-27 19:45:00");
    }

    #[test]
    fn match_centre_flattens_home_then_away() {
        let data: MatchCentreData = serde_json::from_value(json!({
            "home": {"incidentEvents": [{"id": 1}]},
            "away": {"incidentEvents": [{"id": 2}, {"id": 3}]}
        }))
        .unwrap();
        let ids: Vec<i64> = data.into_events().into_iter().map(|e| e.id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
    }
}
