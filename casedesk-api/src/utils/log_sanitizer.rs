//! Keeps bearer tokens and large bodies out of logs.

/// Bytes of a body kept in log lines and error messages.
const BODY_LOG_LIMIT: usize = 256;

/// Leading token characters left readable by [`mask_token`].
const TOKEN_PREFIX_CHARS: usize = 6;

/// Shorten `body` to at most `BODY_LOG_LIMIT` bytes, cut on a char boundary.
pub fn truncate_for_log(body: &str) -> String {
    if body.len() <= BODY_LOG_LIMIT {
        return body.to_string();
    }
    let cut = body
        .char_indices()
        .map(|(i, _)| i)
        .take_while(|&i| i <= BODY_LOG_LIMIT)
        .last()
        .unwrap_or(0);
    format!("{}... [truncated, total {} bytes]", &body[..cut], body.len())
}

/// `eyJhbGciOi...` becomes `eyJhbG***`. Tokens too short to keep a prefix
/// are hidden entirely.
pub fn mask_token(token: &str) -> String {
    if token.chars().count() <= TOKEN_PREFIX_CHARS * 2 {
        return "***".to_string();
    }
    let prefix: String = token.chars().take(TOKEN_PREFIX_CHARS).collect();
    format!("{prefix}***")
}
