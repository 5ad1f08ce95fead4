//! Value normalization for cross-source comparison
//!
//! Canonicalizes raw field values before any equality or similarity check:
//! Unicode NFKD fold, diacritic strip, lowercase, punctuation collapsed to
//! whitespace, then a small alias table for name variants that providers
//! habitually spell differently. Numeric fields (years, runtimes) are
//! compared as integers elsewhere, never through string normalization.

use crate::types::FieldValue;
use unicode_normalization::UnicodeNormalization;

/// Spelling standardizations for known name variants
///
/// Both sides are in already-normalized form. Applied to the whole
/// normalized string, exact match only.
const NAME_ALIASES: &[(&str, &str)] = &[
    ("chiranjivi", "chiranjeevi"),
    ("rajnikanth", "rajinikanth"),
    ("rajni kanth", "rajinikanth"),
    ("s s rajamouli", "rajamouli"),
    ("ss rajamouli", "rajamouli"),
    ("a r rahman", "ar rahman"),
    ("ilayaraja", "ilaiyaraaja"),
    ("kamal hassan", "kamal haasan"),
];

/// Normalize a raw string for comparison
///
/// NFKD fold, strip combining marks, lowercase, replace punctuation with
/// spaces, collapse whitespace, then apply the alias table.
pub fn normalize_str(raw: &str) -> String {
    let folded: String = raw
        .nfkd()
        .filter(|c| !unicode_normalization::char::is_combining_mark(*c))
        .collect();

    let lowered = folded.to_lowercase();
    let spaced: String = lowered
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect();

    let collapsed = spaced.split_whitespace().collect::<Vec<_>>().join(" ");
    apply_alias(collapsed)
}

fn apply_alias(normalized: String) -> String {
    for (variant, standard) in NAME_ALIASES {
        if normalized == *variant {
            return standard.to_string();
        }
    }
    normalized
}

/// Normalize a field value for comparison
///
/// Cast entries extract the credited name by matching on the variant;
/// order is preserved (billing order is part of the value).
pub fn normalize(value: &FieldValue) -> String {
    match value {
        FieldValue::Text(s) => normalize_str(s),
        FieldValue::Number(n) => n.to_string(),
        FieldValue::Cast(members) => {
            let names: Vec<String> = members
                .iter()
                .map(|m| normalize_str(m.name()))
                .filter(|n| !n.is_empty())
                .collect();
            names.join(", ")
        }
    }
}

/// Normalized equality; absent values normalize to the empty string
pub fn equals(a: Option<&FieldValue>, b: Option<&FieldValue>) -> bool {
    let na = a.map(normalize).unwrap_or_default();
    let nb = b.map(normalize).unwrap_or_default();
    na == nb
}

/// Unique tokens of a normalized string, sorted, re-joined
///
/// "The Lion King" and "Lion King, The" produce the same token-sorted form.
pub fn token_sorted(raw: &str) -> String {
    let normalized = normalize_str(raw);
    let mut tokens: Vec<&str> = normalized.split_whitespace().collect();
    tokens.sort_unstable();
    tokens.dedup();
    tokens.join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::CastMember;

    #[test]
    fn test_normalize_strips_diacritics() {
        assert_eq!(normalize_str("Les Misérables"), "les miserables");
        assert_eq!(normalize_str("Penélope Cruz"), "penelope cruz");
    }

    #[test]
    fn test_normalize_punctuation_and_whitespace() {
        assert_eq!(normalize_str("  S. S.  Rajamouli!  "), "rajamouli");
        assert_eq!(normalize_str("Baahubali: The Beginning"), "baahubali the beginning");
        assert_eq!(normalize_str("spider-man"), "spider man");
    }

    #[test]
    fn test_alias_table() {
        assert_eq!(normalize_str("Chiranjivi"), "chiranjeevi");
        assert_eq!(normalize_str("Chiranjeevi"), "chiranjeevi");
        assert_eq!(normalize_str("Rajni Kanth"), "rajinikanth");
    }

    #[test]
    fn test_normalize_cast_extracts_names() {
        let cast = FieldValue::Cast(vec![
            CastMember::Name("Prabhas".to_string()),
            CastMember::Detailed {
                name: "Anushka Shetty".to_string(),
                role: Some("Devasena".to_string()),
                order: Some(2),
            },
        ]);
        assert_eq!(normalize(&cast), "prabhas, anushka shetty");
    }

    #[test]
    fn test_equals_handles_absent_values() {
        assert!(equals(None, None));
        assert!(equals(None, Some(&FieldValue::text(""))));
        assert!(equals(
            Some(&FieldValue::text("RAJAMOULI")),
            Some(&FieldValue::text("S. S. Rajamouli")),
        ));
        assert!(!equals(None, Some(&FieldValue::text("x"))));
    }

    #[test]
    fn test_numbers_pass_through() {
        assert_eq!(normalize(&FieldValue::Number(2009)), "2009");
    }

    #[test]
    fn test_token_sorted_ignores_word_order() {
        assert_eq!(token_sorted("The Lion King"), token_sorted("Lion King, The"));
        assert_ne!(token_sorted("The Lion King"), token_sorted("The Lion Queen"));
    }
}
