mod json;
mod table;
mod yaml;

pub use json::JsonFormatter;
pub use table::TableFormatter;
pub use yaml::YamlFormatter;

use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;

use crate::cli::OutputFormat;

/// Tabular summary of a list of objects
#[derive(Debug, Clone)]
pub struct QueryResult {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl QueryResult {
    /// NAMESPACE, NAME, AGE and LABELS of each object
    pub fn summary(objects: &[JsonValue], now: DateTime<Utc>) -> Self {
        let rows = objects
            .iter()
            .map(|o| {
                let meta = &o["metadata"];
                let labels = match meta["labels"].as_object() {
                    Some(map) => map
                        .iter()
                        .map(|(k, v)| format!("{}={}", k, v.as_str().unwrap_or_default()))
                        .collect::<Vec<_>>()
                        .join(","),
                    None => String::new(),
                };
                vec![
                    meta["namespace"].as_str().unwrap_or_default().to_string(),
                    meta["name"].as_str().unwrap_or_default().to_string(),
                    meta["creationTimestamp"]
                        .as_str()
                        .map(|ts| age(ts, now))
                        .unwrap_or_else(|| "<unknown>".to_string()),
                    labels,
                ]
            })
            .collect();

        Self {
            columns: ["NAMESPACE", "NAME", "AGE", "LABELS"]
                .iter()
                .map(|c| c.to_string())
                .collect(),
            rows,
        }
    }

    pub fn format(&self, no_headers: bool) -> String {
        TableFormatter::format(self, no_headers)
    }
}

/// Render a structured value for display
pub fn format_value(value: &JsonValue, format: &OutputFormat) -> String {
    match format {
        OutputFormat::Json => JsonFormatter::format(value),
        OutputFormat::Yaml => YamlFormatter::format(value),
    }
}

/// kubectl-style age: `42s`, `7m`, `5h`, `3d`
fn age(timestamp: &str, now: DateTime<Utc>) -> String {
    let Ok(created) = DateTime::parse_from_rfc3339(timestamp) else {
        return "<unknown>".to_string();
    };
    let secs = (now - created.with_timezone(&Utc)).num_seconds().max(0);
    match secs {
        s if s < 60 => format!("{}s", s),
        s if s < 3600 => format!("{}m", s / 60),
        s if s < 86400 => format!("{}h", s / 3600),
        s => format!("{}d", s / 86400),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn now() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2025-01-03T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    #[test]
    fn test_age() {
        assert_eq!(age("2025-01-03T11:59:30Z", now()), "30s");
        assert_eq!(age("2025-01-03T11:15:00Z", now()), "45m");
        assert_eq!(age("2025-01-03T07:00:00Z", now()), "5h");
        assert_eq!(age("2025-01-01T00:00:00Z", now()), "2d");
        assert_eq!(age("not a time", now()), "<unknown>");
    }

    #[test]
    fn test_summary_rows() {
        let objects = vec![json!({
            "metadata": {
                "name": "web-1",
                "namespace": "shop",
                "creationTimestamp": "2025-01-03T11:00:00Z",
                "labels": { "app": "web" }
            }
        })];
        let result = QueryResult::summary(&objects, now());
        assert_eq!(result.columns, ["NAMESPACE", "NAME", "AGE", "LABELS"]);
        assert_eq!(result.rows[0], ["shop", "web-1", "1h", "app=web"]);
    }
}
