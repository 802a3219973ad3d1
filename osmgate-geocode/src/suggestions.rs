//! Remediation hints for addresses that resolved to nothing.

/// Suggestions derived from the structure of the original input.
pub fn no_results_suggestions(address: &str) -> Vec<String> {
    let mut suggestions = vec![
        "Try a simpler query without special characters".to_string(),
        "Include the city or country name".to_string(),
    ];

    if address.contains('(') && address.contains(')') {
        suggestions.push("Remove content in parentheses".to_string());
    }
    if address.contains(',') {
        suggestions.push("Try without commas".to_string());
    }
    if address.split_whitespace().count() >= 2 {
        suggestions.push("For international locations, try official or local name".to_string());
        suggestions.push("For tourist sites, add the region or country name".to_string());
    }

    suggestions
}
