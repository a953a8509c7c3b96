//! Text normalization shared by every model family.
//!
//! The same `clean` routine runs before training, evaluation and inference so that
//! neural and classical pipelines see identical input regardless of where the raw
//! text came from.

use rayon::prelude::*;
use regex::Regex;
use std::sync::OnceLock;

fn url_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"http\S+|www\S+|https\S+").expect("valid url pattern"))
}

fn mention_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"@\w+").expect("valid mention pattern"))
}

fn digit_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\d+").expect("valid digit pattern"))
}

fn clean_once(text: &str) -> String {
    let lowered = text.to_lowercase();
    let no_urls = url_regex().replace_all(&lowered, "");
    let no_mentions = mention_regex().replace_all(&no_urls, "");
    let no_punct: String = no_mentions
        .chars()
        .filter(|c| !c.is_ascii_punctuation())
        .collect();
    let no_digits = digit_regex().replace_all(&no_punct, "");
    no_digits.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Normalize raw text into its canonical cleaned form.
///
/// Lowercases, strips URLs and `@mentions`, drops ASCII punctuation and digit runs,
/// then collapses whitespace. Removing punctuation can glue fragments back into a
/// URL-like token (`ww.wx` becomes `wwwx`), so the pass repeats until nothing
/// changes. Every pass only removes characters, so the loop terminates.
pub fn clean(text: &str) -> String {
    let mut current = clean_once(text);
    loop {
        let next = clean_once(&current);
        if next == current {
            return current;
        }
        current = next;
    }
}

/// Clean an optional cell; missing values map to the empty string.
pub fn clean_opt(text: Option<&str>) -> String {
    text.map(clean).unwrap_or_default()
}

/// Clean a batch of texts in parallel, preserving order.
pub fn clean_all<S: AsRef<str> + Sync>(texts: &[S]) -> Vec<String> {
    texts.par_iter().map(|t| clean(t.as_ref())).collect()
}

/// Word tokens of a cleaned string.
pub fn tokenize(cleaned: &str) -> impl Iterator<Item = &str> {
    cleaned.split_whitespace()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean_pipeline() {
        let raw = "Loving the new @Apple phone!!! 10/10 see https://t.co/xyz   www.apple.com";
        assert_eq!(clean(raw), "loving the new phone see");
    }

    #[test]
    fn test_clean_handles_missing() {
        assert_eq!(clean_opt(None), "");
        assert_eq!(clean_opt(Some("  ")), "");
        assert_eq!(clean_opt(Some("OK.")), "ok");
    }

    #[test]
    fn test_clean_reaches_fixpoint() {
        let once = clean("ww.wx is great");
        assert_eq!(once, "is great");
        assert_eq!(clean(&once), once);
    }

    #[test]
    fn test_clean_all_preserves_order() {
        let out = clean_all(&["B!", "a 1", "C"]);
        assert_eq!(out, vec!["b", "a", "c"]);
    }
}
