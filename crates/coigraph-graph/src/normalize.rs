//! Name canonicalization and string similarity.
//!
//! `normalize` is the single comparison key used everywhere in the engine:
//! two mentions refer to the same spelling iff their normalized forms are
//! equal. It must stay deterministic and idempotent: resolution results and
//! the store's uniqueness constraint both depend on that.
//!
//! `trigram_similarity` backs the fuzzy resolution tier. It is approximate
//! discovery tooling: callers threshold the score, and a miss is never an
//! error.

/// Canonicalize a name for comparison.
///
/// Rules, in order:
/// - ASCII-lowercase,
/// - punctuation other than `&` becomes a word break,
/// - runs of whitespace collapse to a single space,
/// - leading/trailing whitespace is trimmed.
///
/// Idempotent: `normalize(normalize(x)) == normalize(x)` for all inputs.
pub fn normalize(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut pending_space = false;
    for ch in s.chars() {
        let mapped = if ch.is_alphanumeric() || ch == '&' {
            Some(ch.to_ascii_lowercase())
        } else {
            None
        };
        match mapped {
            Some(c) => {
                if pending_space && !out.is_empty() {
                    out.push(' ');
                }
                pending_space = false;
                out.push(c);
            }
            // Whitespace and stripped punctuation both act as word breaks.
            None => pending_space = true,
        }
    }
    out
}

/// Trigram (Jaccard) similarity between two strings, in `[0, 1]`.
///
/// Both inputs are normalized first, then padded with leading/trailing
/// sentinels so short strings still produce trigrams. Equal normalized
/// strings score 1.0; disjoint trigram sets score 0.0.
///
/// Symmetric: `trigram_similarity(a, b) == trigram_similarity(b, a)`.
pub fn trigram_similarity(a: &str, b: &str) -> f64 {
    let a = normalize(a);
    let b = normalize(b);
    if a.is_empty() || b.is_empty() {
        return if a == b { 1.0 } else { 0.0 };
    }
    if a == b {
        return 1.0;
    }

    let ta = trigrams(&a);
    let tb = trigrams(&b);
    let intersection = ta.iter().filter(|t| tb.contains(*t)).count();
    let union = ta.len() + tb.len() - intersection;
    if union == 0 {
        return 0.0;
    }
    intersection as f64 / union as f64
}

/// Padded character trigrams of an already-normalized string, deduplicated.
fn trigrams(s: &str) -> Vec<[char; 3]> {
    let mut padded: Vec<char> = Vec::with_capacity(s.chars().count() + 3);
    padded.push(' ');
    padded.push(' ');
    padded.extend(s.chars());
    padded.push(' ');

    let mut grams: Vec<[char; 3]> = padded.windows(3).map(|w| [w[0], w[1], w[2]]).collect();
    grams.sort_unstable();
    grams.dedup();
    grams
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use proptest::prelude::*;

    #[test]
    fn normalize_basic_forms() {
        assert_eq!(normalize("  John   Smith "), "john smith");
        assert_eq!(normalize("O'Brien, Patrick"), "o brien patrick");
        assert_eq!(normalize("TechCorp Industries, Inc."), "techcorp industries inc");
        assert_eq!(normalize("Smith & Wesson"), "smith & wesson");
        assert_eq!(normalize(""), "");
        assert_eq!(normalize("---"), "");
    }

    #[test]
    fn similarity_of_identical_names_is_one() {
        assert_relative_eq!(trigram_similarity("John Smith", "john  smith"), 1.0);
    }

    #[test]
    fn similarity_of_disjoint_names_is_low() {
        assert!(trigram_similarity("John Smith", "Acme Corp") < 0.1);
    }

    #[test]
    fn similar_names_score_between_exact_and_disjoint() {
        let close = trigram_similarity("TechCorp Industries", "TechCorp Industry");
        let far = trigram_similarity("TechCorp Industries", "Global Shipping");
        assert!(close > 0.5, "close = {close}");
        assert!(close < 1.0);
        assert!(far < close);
    }

    #[test]
    fn empty_vs_nonempty_scores_zero() {
        assert_relative_eq!(trigram_similarity("", "abc"), 0.0);
        assert_relative_eq!(trigram_similarity("", ""), 1.0);
    }

    proptest! {
        #[test]
        fn normalize_is_idempotent(s in ".{0,64}") {
            let once = normalize(&s);
            prop_assert_eq!(normalize(&once), once);
        }

        #[test]
        fn similarity_is_symmetric_and_bounded(a in ".{0,32}", b in ".{0,32}") {
            let ab = trigram_similarity(&a, &b);
            let ba = trigram_similarity(&b, &a);
            prop_assert!((ab - ba).abs() < 1e-12);
            prop_assert!((0.0..=1.0).contains(&ab));
        }
    }
}
