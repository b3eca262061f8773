use std::collections::HashMap;

/// Parse a raw query string (the part after `?`) into key-value pairs.
///
/// Values are URL-decoded. Multiple values for the same key are not
/// supported (only the last is kept).
///
/// # Example
/// ```
/// use peep::core::query_params::parse_query_params;
///
/// let params = parse_query_params("author_id=2&sort=desc");
/// assert_eq!(params.get("author_id"), Some(&"2".to_string()));
/// assert_eq!(params.get("sort"), Some(&"desc".to_string()));
/// ```
pub fn parse_query_params(query: &str) -> HashMap<String, String> {
    let mut params = HashMap::new();

    for param in query.split('&').filter(|p| !p.is_empty()) {
        if let Some((key, encoded_value)) = param.split_once('=') {
            let decoded = urlencoding::decode(encoded_value)
                .unwrap_or(std::borrow::Cow::Borrowed(encoded_value))
                .to_string();
            params.insert(key.to_string(), decoded);
        } else {
            // Flag parameter without value
            params.insert(param.to_string(), String::new());
        }
    }

    params
}

/// Get a string parameter from parsed query params with optional default
pub fn get_string(params: &HashMap<String, String>, key: &str, default: Option<&str>) -> Option<String> {
    params
        .get(key)
        .cloned()
        .or_else(|| default.map(|d| d.to_string()))
}

/// Get an id parameter; absent or unparseable values yield `None`.
pub fn get_id(params: &HashMap<String, String>, key: &str) -> Option<u64> {
    params.get(key).and_then(|s| s.trim().parse::<u64>().ok())
}
