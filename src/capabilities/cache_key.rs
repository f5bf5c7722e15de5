//! Deterministic cache keys.
//!
//! Format: `<name>:<lat 4dp>:<lon 4dp>[:<k=v>...]`, with the extra pairs
//! sorted by key so insertion order never matters. Four decimal places is
//! roughly 11 m, which absorbs GPS jitter while bounding cardinality.

/// Decimal places coordinates are rounded to.
pub const COORDINATE_PRECISION: i32 = 4;

/// Round a coordinate to [`COORDINATE_PRECISION`] and render it.
///
/// Negative zero is normalized so `-0.00001` and `0.00001` share a key.
pub fn format_coordinate(value: f64) -> String {
    let scale = 10f64.powi(COORDINATE_PRECISION);
    let rounded = (value * scale).round() / scale + 0.0;
    format!("{:.*}", COORDINATE_PRECISION as usize, rounded)
}

/// Build the cache key for `capability` at (`latitude`, `longitude`) with
/// optional discriminating parameters.
pub fn cache_key<I, K, V>(capability: &str, latitude: f64, longitude: f64, extra: I) -> String
where
    I: IntoIterator<Item = (K, V)>,
    K: AsRef<str>,
    V: AsRef<str>,
{
    let mut pairs: Vec<(String, String)> = extra
        .into_iter()
        .map(|(k, v)| (k.as_ref().to_string(), v.as_ref().to_string()))
        .collect();
    pairs.sort();

    let mut key = format!(
        "{}:{}:{}",
        capability,
        format_coordinate(latitude),
        format_coordinate(longitude)
    );
    for (k, v) in pairs {
        key.push(':');
        key.push_str(&k);
        key.push('=');
        key.push_str(&v);
    }
    key
}
