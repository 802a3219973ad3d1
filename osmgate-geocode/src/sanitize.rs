//! Query clean-up and fallback query generation.

use once_cell::sync::Lazy;
use regex::Regex;

static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("Invalid whitespace regex"));
static PARENTHETICAL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\(([^)]*)\)").expect("Invalid parenthetical regex"));

/// An address split around its parenthetical alias.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sanitized {
    /// Trimmed input with whitespace runs collapsed.
    pub normalized: String,
    /// `normalized` with every parenthetical group removed.
    pub without_parens: String,
    /// Content of the first parenthetical group, if non-empty.
    pub parenthetical: Option<String>,
}

fn collapse_whitespace(text: &str) -> String {
    WHITESPACE.replace_all(text.trim(), " ").into_owned()
}

/// Collapse whitespace and pull out the first `( ... )` group.
pub fn sanitize(address: &str) -> Sanitized {
    let normalized = collapse_whitespace(address);

    let Some(captures) = PARENTHETICAL.captures(&normalized) else {
        return Sanitized {
            without_parens: normalized.clone(),
            normalized,
            parenthetical: None,
        };
    };

    let parenthetical = captures
        .get(1)
        .map(|m| m.as_str().trim().to_string())
        .filter(|s| !s.is_empty());
    let without_parens = collapse_whitespace(&PARENTHETICAL.replace_all(&normalized, " "));

    Sanitized {
        normalized,
        without_parens,
        parenthetical,
    }
}

/// Append `region` to a short, comma-free query that doesn't already name it.
pub fn ensure_region(query: &str, region: &str) -> String {
    let region = region.trim();
    if query.is_empty() || region.is_empty() || query.to_lowercase().contains(&region.to_lowercase()) {
        return query.to_string();
    }

    if !query.contains(',') && query.split_whitespace().count() < 3 {
        return format!("{query} {region}");
    }
    query.to_string()
}

/// Ordered, deduplicated fallback queries for one address.
///
/// Priority: the text without parentheses, the parenthetical alone, then the
/// whole (whitespace-normalized) input, each with `region` applied.
pub fn build_query_sequence(address: &str, region: &str) -> Vec<String> {
    let sanitized = sanitize(address);

    let mut raw = Vec::with_capacity(3);
    if !sanitized.without_parens.is_empty() && sanitized.without_parens != sanitized.normalized {
        raw.push(sanitized.without_parens.as_str());
    }
    if let Some(parenthetical) = sanitized.parenthetical.as_deref() {
        raw.push(parenthetical);
    }
    raw.push(sanitized.normalized.as_str());

    let mut queries: Vec<String> = Vec::with_capacity(raw.len());
    for query in raw.into_iter().filter(|q| !q.is_empty()) {
        let query = ensure_region(query, region);
        if !queries.contains(&query) {
            queries.push(query);
        }
    }
    queries
}

/// Cache and coalescing key for a forward query.
pub fn cache_key(query: &str) -> String {
    query.trim().to_lowercase()
}

/// Cache and coalescing key for a coordinate, rounded to about a meter.
pub fn reverse_cache_key(latitude: f64, longitude: f64) -> String {
    format!("{:.5},{:.5}", latitude, longitude)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_sanitize_splits_parenthetical() {
        let s = sanitize("Blue Temple (Wat Rong Suea Ten) in Chiang Rai");
        assert_eq!(s.without_parens, "Blue Temple in Chiang Rai");
        assert_eq!(s.parenthetical.as_deref(), Some("Wat Rong Suea Ten"));
    }

    #[test]
    fn test_sanitize_collapses_whitespace() {
        let s = sanitize("  Eiffel \t  Tower\n");
        assert_eq!(s.normalized, "Eiffel Tower");
        assert_eq!(s.without_parens, "Eiffel Tower");
        assert_eq!(s.parenthetical, None);
    }

    #[test]
    fn test_sanitize_empty_parens() {
        let s = sanitize("Old Market ()");
        assert_eq!(s.without_parens, "Old Market");
        assert_eq!(s.parenthetical, None);
    }

    #[test]
    fn test_ensure_region() {
        assert_eq!(ensure_region("Night Bazaar", "Chiang Rai"), "Night Bazaar Chiang Rai");
        // Already mentioned (case-insensitive)
        assert_eq!(ensure_region("night bazaar chiang rai", "Chiang Rai"), "night bazaar chiang rai");
        // Three words or more
        assert_eq!(ensure_region("White Temple Thailand", "Asia"), "White Temple Thailand");
        // Has a comma
        assert_eq!(ensure_region("Main St, Springfield", "USA"), "Main St, Springfield");
        assert_eq!(ensure_region("Anything", ""), "Anything");
    }

    #[test]
    fn test_query_sequence_order() {
        let queries = build_query_sequence("Blue Temple (Wat Rong Suea Ten) in Chiang Rai", "");
        assert_eq!(
            queries,
            vec![
                "Blue Temple in Chiang Rai",
                "Wat Rong Suea Ten",
                "Blue Temple (Wat Rong Suea Ten) in Chiang Rai",
            ]
        );
    }

    #[test]
    fn test_query_sequence_applies_region_to_short_candidates() {
        let queries = build_query_sequence("Doi Suthep (Phra That)", "Chiang Mai");
        assert_eq!(
            queries,
            vec![
                "Doi Suthep Chiang Mai",
                "Phra That Chiang Mai",
                "Doi Suthep (Phra That)",
            ]
        );
    }

    #[test]
    fn test_query_sequence_without_parens_is_single() {
        assert_eq!(build_query_sequence("  Big   Ben ", ""), vec!["Big Ben"]);
        assert!(build_query_sequence("   ", "").is_empty());
        assert!(build_query_sequence("", "Chiang Rai").is_empty());
    }

    #[test]
    fn test_keys() {
        assert_eq!(cache_key("  Big BEN "), "big ben");
        assert_eq!(reverse_cache_key(19.907312, 99.830912), "19.90731,99.83091");
    }

    proptest! {
        #[test]
        fn prop_sequence_unique_and_nonempty(input in "[a-zA-Z (),]{0,40}", region in "[a-zA-Z ]{0,12}") {
            let queries = build_query_sequence(&input, &region);
            for (i, q) in queries.iter().enumerate() {
                prop_assert!(!q.is_empty());
                prop_assert!(!queries[..i].contains(q));
            }
        }

        #[test]
        fn prop_sanitized_has_no_whitespace_runs(input in "\\PC{0,60}") {
            let s = sanitize(&input);
            prop_assert!(!s.normalized.contains("  "));
            prop_assert!(!s.without_parens.contains("  "));
            prop_assert_eq!(s.without_parens.trim(), s.without_parens.as_str());
        }
    }
}
