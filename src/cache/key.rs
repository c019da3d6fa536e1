//! Key building and stats formatting helpers.

use std::collections::BTreeMap;
use std::fmt::Display;
use std::time::Duration;

// == Cache Key ==
/// Builds a canonical cache key for a request.
///
/// Parameters are sorted by name so the same request always maps to the same
/// key regardless of call-site ordering:
/// `"{kind}:{name1}:{value1}-{name2}:{value2}"`.
///
/// ```
/// use upstream_cache::cache::cache_key;
///
/// let a = cache_key("coins", [("per_page", 20), ("page", 1)]);
/// let b = cache_key("coins", [("page", 1), ("per_page", 20)]);
/// assert_eq!(a, b);
/// assert_eq!(a, "coins:page:1-per_page:20");
/// ```
pub fn cache_key<I, K, V>(kind: &str, params: I) -> String
where
    I: IntoIterator<Item = (K, V)>,
    K: AsRef<str>,
    V: Display,
{
    let sorted: BTreeMap<String, String> = params
        .into_iter()
        .map(|(name, value)| (name.as_ref().to_string(), value.to_string()))
        .collect();

    if sorted.is_empty() {
        return kind.to_string();
    }

    let joined = sorted
        .iter()
        .map(|(name, value)| format!("{name}:{value}"))
        .collect::<Vec<_>>()
        .join("-");
    format!("{kind}:{joined}")
}

// == Formatting ==
/// Formats a ratio as a two-decimal percentage.
pub fn format_hit_rate(rate: f64) -> String {
    format!("{:.2}%", rate * 100.0)
}

/// Human-readable byte count.
pub fn format_bytes(bytes: usize) -> String {
    const UNITS: [&str; 4] = ["KB", "MB", "GB", "TB"];

    if bytes < 1024 {
        return format!("{bytes} B");
    }
    let mut value = bytes as f64 / 1024.0;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{:.2} {}", value, UNITS[unit])
}

/// `"Expired"` or whole seconds left, rounded up.
pub fn format_remaining_ttl(remaining: Option<Duration>) -> String {
    match remaining {
        Some(left) if !left.is_zero() => {
            let secs = (left.as_millis() as u64).div_ceil(1000);
            format!("{secs}s")
        }
        _ => "Expired".to_string(),
    }
}
