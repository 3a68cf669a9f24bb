//! Text tokenizer shared by indexing and querying.

/// Tokens longer than this are dropped; they are almost always encoded
/// blobs or URLs nobody searches for verbatim.
pub const MAX_TOKEN_LENGTH: usize = 64;

/// Splits text into lower-case alphanumeric tokens.
///
/// The position of a token is its index in the returned vector.
#[must_use]
pub fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|word| !word.is_empty() && word.chars().count() <= MAX_TOKEN_LENGTH)
        .map(str::to_lowercase)
        .collect()
}
