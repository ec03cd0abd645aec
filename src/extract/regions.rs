use std::sync::OnceLock;

use regex::Regex;
use tracing::warn;

use super::{find_script, repair, ExtractError};
use crate::model::Region;

pub const ALL_REGIONS_MARKER: &str = "var allRegions";

fn region_keys() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| repair::key_pattern(repair::REGION_KEYS).expect("static key regex"))
}

/// Region catalog from the front page's `var allRegions = [...]` literal.
pub fn parse_all_regions(html: &str) -> Result<Option<Vec<Region>>, ExtractError> {
    let Some(script) = find_script(html, ALL_REGIONS_MARKER) else {
        warn!("page has no allRegions script");
        return Ok(None);
    };
    // Other statements may share the script.
    let from_marker = script
        .find(ALL_REGIONS_MARKER)
        .map(|at| &script[at..])
        .unwrap_or(&script);
    let literal = repair::balanced_slice(from_marker, '[', ']').ok_or(ExtractError::NoLiteral)?;
    let json = repair::single_to_double_quotes(&repair::strip_newlines(literal));
    let json = repair::quote_keys(&json, region_keys());
    Ok(Some(serde_json::from_str(&json)?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_region_literal() {
        let html = r#"<html><body><script>
            var allRegions = [
                { type: 1, id: 252, flg: 'gb-eng', name: 'England', tournaments: [{ id: 2, url: '/Regions/252/Tournaments/2/England-Premier-League', name: 'Premier League', sortOrder: 0 }] },
                { type: 1, id: 62, flg: 'ci', name: 'Côte d\'Ivoire', tournaments: [] }
            ];
            var favoriteTournaments = [];
        </script></body></html>"#;

        let regions = parse_all_regions(html).unwrap().unwrap();
        assert_eq!(regions.len(), 2);
        assert_eq!(regions[0].id, 252);
        assert_eq!(regions[0].kind, Some(1));
        assert_eq!(regions[0].flg.as_deref(), Some("gb-eng"));
        assert_eq!(
            regions[0].tournaments[0].url.as_deref(),
            Some("/Regions/252/Tournaments/2/England-Premier-League")
        );
        assert_eq!(regions[1].name.as_deref(), Some("Côte d'Ivoire"));
    }

    #[test]
    fn page_without_regions_is_none() {
        assert!(parse_all_regions("<html></html>").unwrap().is_none());
    }
}
