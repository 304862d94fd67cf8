//! Canonical word/phrase normalization (spec.md §3 "Normalization").
//!
//! The same function is used at ingest time and lookup time; agreement
//! between the two is a correctness invariant of the phrase index
//! (spec.md §8: `h = MD5(normalize(p))`).

use md5::{Digest, Md5};

/// Lowercase; collapse whitespace to single spaces; strip punctuation
/// except intra-word apostrophes; trim.
pub fn normalize(input: &str) -> String {
    let lowered = input.to_lowercase();

    let mut out = String::with_capacity(lowered.len());
    let mut last_was_space = false;
    for c in lowered.chars() {
        if c.is_whitespace() {
            if !out.is_empty() {
                last_was_space = true;
            }
            continue;
        }

        if last_was_space {
            out.push(' ');
            last_was_space = false;
        }

        if c.is_alphanumeric() || c == '\'' {
            out.push(c);
        }
        // other punctuation is dropped entirely, not replaced with a space
    }

    out.trim().to_string()
}

/// Split normalized text into its whitespace-separated tokens.
pub fn tokenize(normalized: &str) -> Vec<&str> {
    normalized.split(' ').filter(|s| !s.is_empty()).collect()
}

/// Normalize then tokenize in one step.
pub fn normalize_tokens(input: &str) -> Vec<String> {
    tokenize(&normalize(input))
        .into_iter()
        .map(str::to_string)
        .collect()
}

/// Hex MD5 of the normalized phrase text (spec.md §6).
pub fn phrase_hash(phrase_text: &str) -> String {
    let normalized = normalize(phrase_text);
    let mut hasher = Md5::new();
    hasher.update(normalized.as_bytes());
    let digest = hasher.finalize();
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lowercases_and_collapses_whitespace() {
        assert_eq!(normalize("  Hello    World  "), "hello world");
    }

    #[test]
    fn strips_punctuation_but_keeps_apostrophes() {
        assert_eq!(normalize("Don't stop, please!"), "don't stop please");
    }

    #[test]
    fn is_idempotent() {
        let samples = [
            "Hello, World!",
            "  multiple   spaces  ",
            "don't",
            "ALL CAPS; punctuation... here?",
            "",
        ];
        for s in samples {
            let once = normalize(s);
            let twice = normalize(&once);
            assert_eq!(once, twice, "normalize not idempotent for {s:?}");
        }
    }

    #[test]
    fn phrase_hash_is_md5_of_normalized_text() {
        let h1 = phrase_hash("Hello,   World!");
        let h2 = phrase_hash("hello world");
        assert_eq!(h1, h2);
        assert_eq!(h1.len(), 32);
    }

    #[test]
    fn tokenize_counts_match_word_count_invariant() {
        let normalized = normalize("The Quick, Brown Fox!");
        let tokens = tokenize(&normalized);
        assert_eq!(tokens, vec!["the", "quick", "brown", "fox"]);
    }
}
