use std::collections::HashMap;

use tracing::warn;

/// Merges a configured base header set with per-call overrides into the
/// final outbound HTTP headers.
///
/// Raw specs come from the environment as either a JSON object
/// (`{"X-Key": "v"}`) or a comma-separated `Key: Value` list. Entries that
/// cannot be parsed are logged and skipped rather than failing the post.
#[derive(Debug, Clone, Default)]
pub struct HeaderBuilder {
    base_raw: Option<String>,
}

impl HeaderBuilder {
    #[must_use]
    pub fn new(base_raw: Option<String>) -> Self {
        Self { base_raw }
    }

    /// Final headers: `Content-Type: application/json` floor, then the base
    /// set, then `override_raw` on top.
    #[must_use]
    pub fn build(&self, override_raw: Option<&str>) -> HashMap<String, String> {
        let mut headers = HashMap::from([(
            "Content-Type".to_string(),
            "application/json".to_string(),
        )]);
        if let Some(raw) = self.base_raw.as_deref() {
            headers.extend(parse_headers(raw, "base webhook headers"));
        }
        if let Some(raw) = override_raw {
            headers.extend(parse_headers(raw, "override webhook headers"));
        }
        headers
    }
}

fn parse_headers(raw: &str, source_label: &str) -> HashMap<String, String> {
    // JSON object form first.
    match serde_json::from_str::<serde_json::Value>(raw) {
        Ok(serde_json::Value::Object(map)) => {
            return map
                .into_iter()
                .map(|(key, value)| {
                    let value = match value {
                        serde_json::Value::String(s) => s,
                        other => other.to_string(),
                    };
                    (key, value)
                })
                .collect();
        }
        Ok(other) => {
            warn!(source = source_label, "header spec must be a JSON object, got {other}");
            return HashMap::new();
        }
        Err(_) => {}
    }

    // Fall back to a comma-separated `Key: Value` list.
    let mut headers = HashMap::new();
    for entry in raw.split(',') {
        let entry = entry.trim();
        if entry.is_empty() {
            continue;
        }
        let Some((key, value)) = entry.split_once(':') else {
            warn!(source = source_label, entry, "unparseable header entry");
            continue;
        };
        let key = key.trim();
        if !key.is_empty() {
            headers.insert(key.to_string(), value.trim().to_string());
        }
    }

    if headers.is_empty() {
        warn!(source = source_label, "header spec yielded no headers");
    }
    headers
}
