use polarity_classifiers::preprocessing::{clean, clean_all, clean_opt};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

const ALPHABET: &[&str] = &[
    "a", "b", "Z", "é", "ß", " ", " ", "\t", "\n", "!", "?", ".", ",", "'", "\"", "#", "@",
    "0", "7", "9", "http", "https://", "www.", "ww", "@user", "::", "-", "_", "😀",
];

fn random_text(rng: &mut ChaCha8Rng) -> String {
    let len = rng.gen_range(0..40);
    (0..len)
        .map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())])
        .collect()
}

#[test]
fn test_clean_is_idempotent_on_random_input() {
    let mut rng = ChaCha8Rng::seed_from_u64(7);
    for _ in 0..2000 {
        let text = random_text(&mut rng);
        let once = clean(&text);
        assert_eq!(clean(&once), once, "not idempotent for {:?}", text);
    }
}

#[test]
fn test_clean_output_has_no_digits_punctuation_or_uppercase() {
    let mut rng = ChaCha8Rng::seed_from_u64(11);
    for _ in 0..2000 {
        let text = random_text(&mut rng);
        let out = clean(&text);
        assert!(!out.chars().any(|c| c.is_ascii_digit()), "{:?} -> {:?}", text, out);
        assert!(!out.chars().any(|c| c.is_ascii_punctuation()), "{:?} -> {:?}", text, out);
        assert!(!out.chars().any(|c| c.is_ascii_uppercase()), "{:?} -> {:?}", text, out);
        assert!(!out.starts_with(' ') && !out.ends_with(' '));
        assert!(!out.contains("  "));
    }
}

#[test]
fn test_reference_examples() {
    assert_eq!(
        clean("Check THIS out!!! https://example.com @bob 2023"),
        "check this out"
    );
    assert_eq!(clean("   "), "");
    assert_eq!(clean_opt(None), "");
    assert_eq!(clean_opt(Some("Hello, World")), "hello world");
}

#[test]
fn test_clean_all_keeps_order() {
    let texts = vec!["B!", "a?", "C 1"];
    assert_eq!(clean_all(&texts), vec!["b", "a", "c"]);
}
