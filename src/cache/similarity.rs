//! Client-side name similarity.
//!
//! Pure string scoring over cached names; no database function is involved,
//! so results do not depend on the principal's privileges.

/// How a name matched a search term.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchTier {
    /// The term occurs verbatim in the name.
    Substring,
    /// Edit-distance ratio at or above the threshold.
    Similar,
}

/// Case-folded comparison key for names and search terms.
pub fn fold(s: &str) -> String {
    s.trim().to_uppercase()
}

/// Edit-distance ratio in `[0, 1]`, case-insensitive.
pub fn similarity(a: &str, b: &str) -> f64 {
    strsim::normalized_levenshtein(&fold(a), &fold(b))
}

/// Score `name` against `term`.
///
/// Substring matches score `1.0`. Anything else is kept only when its ratio
/// reaches `threshold`.
pub fn score(term: &str, name: &str, threshold: f64) -> Option<(MatchTier, f64)> {
    score_folded(&fold(term), &fold(name), threshold)
}

/// [`score`] over keys that already went through [`fold`].
pub fn score_folded(term: &str, name: &str, threshold: f64) -> Option<(MatchTier, f64)> {
    if term.is_empty() {
        return None;
    }
    if name.contains(term) {
        return Some((MatchTier::Substring, 1.0));
    }
    let ratio = strsim::normalized_levenshtein(term, name);
    (ratio >= threshold).then_some((MatchTier::Similar, ratio))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_similarity_is_case_insensitive() {
        assert_eq!(similarity("customer", "CUSTOMER"), 1.0);
        assert!((similarity("CUSTOMR", "CUSTOMER") - 0.875).abs() < 1e-9);
    }

    #[test]
    fn test_substring_beats_ratio() {
        assert_eq!(
            score("cust", "CUSTOMER_ORDERS", 0.9),
            Some((MatchTier::Substring, 1.0))
        );
        let (tier, ratio) = score("CUSTOMR", "CUSTOMERS", 0.6).unwrap();
        assert_eq!(tier, MatchTier::Similar);
        assert!(ratio > 0.7 && ratio < 0.8);
        assert_eq!(score("CUSTOMR", "INVOICES", 0.6), None);
    }

    #[test]
    fn test_blank_term_matches_nothing() {
        assert_eq!(score("  ", "EMPLOYEES", 0.0), None);
    }
}
