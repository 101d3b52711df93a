use serde_json::Value;

/// Null-coalescing accessor.
pub fn value_or(value: Option<f64>, default: f64) -> f64 {
    value.filter(|v| !v.is_nan()).unwrap_or(default)
}

/// Numeric field `key` of a JSON object, or `default` when missing, null or non-numeric.
pub fn json_f64_or(object: &Value, key: &str, default: f64) -> f64 {
    value_or(object.get(key).and_then(Value::as_f64), default)
}

/// Euclidean norm.
pub fn magnitude(components: &[f64]) -> f64 {
    components.iter().map(|c| c * c).sum::<f64>().sqrt()
}

/// Render as `(x, y, z)` with a fixed number of decimals.
pub fn format_vector(components: &[f64], precision: usize) -> String {
    let parts: Vec<String> = components
        .iter()
        .map(|c| format!("{:.*}", precision, c))
        .collect();
    format!("({})", parts.join(", "))
}
