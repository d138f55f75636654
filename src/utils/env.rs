/// Get environment variable with TIDEQUEUE_ prefix, falling back to unprefixed version
///
/// Checks `TIDEQUEUE_{key}` first, then `{key}`.
///
/// # Examples
///
/// ```rust,ignore
/// use tidequeue::utils::get_env_with_prefix;
///
/// // Checks TIDEQUEUE_REDIS_URL first, then REDIS_URL
/// let url = get_env_with_prefix("REDIS_URL");
/// ```
pub fn get_env_with_prefix(key: &str) -> Option<String> {
    std::env::var(format!("TIDEQUEUE_{}", key))
        .or_else(|_| std::env::var(key))
        .ok()
}

/// Parse an environment variable, ignoring values that fail to parse
pub fn parse_env<T: std::str::FromStr>(key: &str) -> Option<T> {
    get_env_with_prefix(key).and_then(|v| v.parse().ok())
}
