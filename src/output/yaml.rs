use serde_json::Value as JsonValue;

pub struct YamlFormatter;

impl YamlFormatter {
    pub fn format(value: &JsonValue) -> String {
        serde_yaml::to_string(value).unwrap_or_else(|_| "~".to_string())
    }
}
