//! Search-result records consumed by the card renderer.

use serde::{Deserialize, Deserializer};

/// One card's source data. Field names follow the music service's search payload.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, serde::Serialize)]
pub struct ItemRecord {
    /// Thumbnail URL; may be scheme-relative (`//host/path`).
    #[serde(rename = "pic", default)]
    pub thumbnail_url: String,
    /// Raw title, possibly carrying highlight markup such as `<em>`.
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub author: String,
    #[serde(rename = "play", default, deserialize_with = "deserialize_count")]
    pub play_count: u64,
    /// Display string such as `4:13`.
    #[serde(default, deserialize_with = "deserialize_duration")]
    pub duration: String,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum CountRepr {
    Unsigned(u64),
    Signed(i64),
    Float(f64),
    Text(String),
}

#[derive(Deserialize)]
#[serde(untagged)]
enum DurationRepr {
    Seconds(u64),
    Text(String),
}

fn deserialize_count<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    let count = match Option::<CountRepr>::deserialize(deserializer)? {
        Some(CountRepr::Unsigned(value)) => value,
        Some(CountRepr::Signed(value)) => value.max(0) as u64,
        Some(CountRepr::Float(value)) if value.is_finite() && value > 0.0 => value as u64,
        Some(CountRepr::Float(_)) => 0,
        // Services report hidden counts as "--".
        Some(CountRepr::Text(text)) => text.trim().parse::<u64>().unwrap_or(0),
        None => 0,
    };
    Ok(count)
}

fn deserialize_duration<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let duration = match Option::<DurationRepr>::deserialize(deserializer)? {
        Some(DurationRepr::Seconds(seconds)) => format_duration_secs(seconds),
        Some(DurationRepr::Text(text)) => text,
        None => String::new(),
    };
    Ok(duration)
}

/// Formats whole seconds as `MM:SS`, or `h:mm:ss` past one hour.
pub fn format_duration_secs(seconds: u64) -> String {
    let hours = seconds / 3600;
    let minutes = (seconds % 3600) / 60;
    let secs = seconds % 60;
    if hours > 0 {
        format!("{hours}:{minutes:02}:{secs:02}")
    } else {
        format!("{minutes:02}:{secs:02}")
    }
}

/// Parses a JSON array of records.
pub fn parse_items(json: &str) -> Result<Vec<ItemRecord>, serde_json::Error> {
    serde_json::from_str(json)
}
