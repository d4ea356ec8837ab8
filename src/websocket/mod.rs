pub mod presence;
pub mod presence_registry;
pub mod signal_registry;
pub mod signaling;

/// Parses a frame as `{"type": "...", ...}`, returning the whole value.
/// Anything that isn't a JSON object with a string `type` field is not a
/// frame this server understands — callers treat `None` as a silent drop.
pub fn parse_frame(text: &str) -> Option<serde_json::Value> {
    let value: serde_json::Value = serde_json::from_str(text).ok()?;
    if value.get("type")?.is_string() {
        Some(value)
    } else {
        None
    }
}

pub fn frame_type(value: &serde_json::Value) -> &str {
    value.get("type").and_then(|v| v.as_str()).unwrap_or("")
}

pub fn coerce_bool(value: &serde_json::Value, key: &str) -> bool {
    value.get(key).and_then(|v| v.as_bool()).unwrap_or(false)
}

pub fn coerce_mic_level(value: &serde_json::Value, key: &str) -> f64 {
    value
        .get(key)
        .and_then(|v| v.as_f64())
        .filter(|n| n.is_finite())
        .unwrap_or(0.0)
}
