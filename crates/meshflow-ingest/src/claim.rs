use bip39::Language;
use once_cell::sync::Lazy;
use rand::Rng;
use rand::seq::IndexedRandom;
use regex::Regex;

/// Two or three words followed by a two- or three-digit number, nothing else.
static CLAIM_KEY_SHAPE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^\s*[a-z]+(?:\s+[a-z]+){1,2}\s+\d{2,3}\s*$").expect("claim key pattern")
});

/// Canonical form of a message that looks like a claim key, or `None` if it doesn't.
///
/// Tokens are rejoined with single spaces and lowercased, so `"  Orange   TIGER 42 "`
/// becomes `"orange tiger 42"`.
pub fn match_claim_key(text: &str) -> Option<String> {
    if !CLAIM_KEY_SHAPE.is_match(text) {
        return None;
    }
    Some(text.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase())
}

/// A fresh claim key: two distinct BIP39 English words and a number from 10 to 99.
pub fn generate_claim_key() -> String {
    let mut rng = rand::rng();
    let wordlist: &[&str] = Language::English.word_list();
    let words: Vec<&str> = wordlist.choose_multiple(&mut rng, 2).copied().collect();
    let number = rng.random_range(10..100);
    format!("{} {}", words.join(" "), number)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shape_accepts_two_or_three_words_and_a_number() {
        assert_eq!(match_claim_key("orange tiger 42").as_deref(), Some("orange tiger 42"));
        assert_eq!(match_claim_key("  Orange \t TIGER   42 ").as_deref(), Some("orange tiger 42"));
        assert_eq!(match_claim_key("big orange tiger 420").as_deref(), Some("big orange tiger 420"));
    }

    #[test]
    fn shape_rejects_everything_else() {
        assert_eq!(match_claim_key("hello there friend"), None);
        assert_eq!(match_claim_key("tiger 42"), None);
        assert_eq!(match_claim_key("one two three four 42"), None);
        assert_eq!(match_claim_key("orange tiger 4"), None);
        assert_eq!(match_claim_key("orange tiger 4242"), None);
        assert_eq!(match_claim_key("claim: orange tiger 42"), None);
        assert_eq!(match_claim_key("orange tiger 42 please"), None);
    }

    #[test]
    fn generated_keys_match_the_shape() {
        for _ in 0..50 {
            let key = generate_claim_key();
            assert_eq!(match_claim_key(&key).as_deref(), Some(key.as_str()));

            let parts: Vec<&str> = key.split(' ').collect();
            assert_eq!(parts.len(), 3);
            assert_ne!(parts[0], parts[1]);
            let number: u32 = parts[2].parse().unwrap();
            assert!((10..100).contains(&number));
        }
    }

    #[test]
    fn key_words_come_from_the_full_wordlist() {
        let wordlist = Language::English.word_list();
        assert_eq!(wordlist.len(), 2048);
        assert!(wordlist.iter().all(|word| word.bytes().all(|b| b.is_ascii_lowercase())));

        let key = generate_claim_key();
        let mut parts = key.split(' ');
        for word in parts.by_ref().take(2) {
            assert!(wordlist.contains(&word));
        }
    }
}
