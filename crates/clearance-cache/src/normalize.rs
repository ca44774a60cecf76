//! Query normalization
//!
//! Case-folds, strips punctuation, drops stop words and collapses whitespace
//! so that differently phrased forms of the same question share a cache
//! entry. Normalization is idempotent.

/// Words that carry no retrieval signal.
pub const STOP_WORDS: &[&str] = &[
    "a", "about", "all", "an", "and", "any", "are", "as", "at", "be", "by", "can", "could", "do",
    "does", "for", "from", "give", "have", "how", "i", "in", "is", "it", "me", "my", "of", "on",
    "or", "our", "please", "show", "tell", "that", "the", "their", "this", "to", "us", "was",
    "we", "what", "when", "where", "which", "who", "why", "with", "would", "you", "your",
];

fn is_stop_word(token: &str) -> bool {
    STOP_WORDS.binary_search(&token).is_ok()
}

/// Normalize `text` for cache keying and retrieval.
///
/// A query made only of stop words keeps its tokens, so it still gets a key
/// of its own rather than collapsing into the empty query.
pub fn normalize_query(text: &str) -> String {
    let folded: String = text
        .chars()
        .flat_map(char::to_lowercase)
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect();

    let tokens: Vec<&str> = folded.split_whitespace().collect();
    let meaningful: Vec<&str> = tokens.iter().copied().filter(|t| !is_stop_word(t)).collect();

    if meaningful.is_empty() {
        tokens.join(" ")
    } else {
        meaningful.join(" ")
    }
}
