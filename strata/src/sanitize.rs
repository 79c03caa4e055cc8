//! Category label to file name component.

/// Longest key produced by [`sanitize`].
pub const MAX_KEY_LEN: usize = 50;

/// Keep ASCII letters, digits, `_` and `-`, then cut to [`MAX_KEY_LEN`].
///
/// The result is always a valid single path component (possibly empty).
/// Distinct labels may collide, e.g. `AskReddit!` and `AskReddit`; they
/// share one output file.
pub fn sanitize(raw: &str) -> String {
    raw.chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_' || *c == '-')
        .take(MAX_KEY_LEN)
        .collect()
}
