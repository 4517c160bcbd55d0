//! Tokenizer shared by indexing and querying.
//!
//! Lowercases and splits on anything that is not alphanumeric. No stemming
//! and no stop-word removal, so scores stay easy to reason about.

/// Split `text` into lowercase alphanumeric terms.
pub fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|term| !term.is_empty())
        .map(str::to_lowercase)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_on_punctuation_and_whitespace() {
        assert_eq!(
            tokenize("Apple, banana;  CHERRY-date"),
            vec!["apple", "banana", "cherry", "date"]
        );
    }

    #[test]
    fn keeps_digits_and_unicode_letters() {
        assert_eq!(tokenize("café 42 naïve"), vec!["café", "42", "naïve"]);
    }

    #[test]
    fn empty_and_symbol_only_input_yield_nothing() {
        assert!(tokenize("").is_empty());
        assert!(tokenize("  --- !! ").is_empty());
    }
}
