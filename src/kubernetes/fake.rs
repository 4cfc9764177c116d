//! In-memory cluster for tests

use std::cell::RefCell;
use std::collections::BTreeMap;

use kube::api::ApiResource;
use serde_json::{Value as JsonValue, json};

use super::{Cluster, ListOptions};
use crate::bridge::{BridgeError, Result};

#[derive(Default)]
pub struct FakeCluster {
    objects: RefCell<Vec<JsonValue>>,
    logs: RefCell<BTreeMap<(String, String), String>>,
    /// Namespace and options of the most recent List
    pub last_list: RefCell<Option<(Option<String>, ListOptions)>>,
    pub deleted: RefCell<Vec<(String, String, String)>>,
}

fn meta<'a>(object: &'a JsonValue, field: &str) -> &'a str {
    object["metadata"][field].as_str().unwrap_or_default()
}

/// Set-based and equality label terms, as the API server reads them
fn label_term_matches(term: &str, labels: &JsonValue) -> bool {
    let label = |key: &str| labels[key.trim()].as_str();
    let values = |list: &str| -> Vec<String> {
        list.trim()
            .trim_start_matches('(')
            .trim_end_matches(')')
            .split(',')
            .map(|v| v.trim().to_string())
            .collect()
    };

    if let Some((key, list)) = term.split_once(" notin ") {
        return label(key).is_none_or(|v| !values(list).iter().any(|x| x == v));
    }
    if let Some((key, list)) = term.split_once(" in ") {
        return label(key).is_some_and(|v| values(list).iter().any(|x| x == v));
    }
    if let Some((key, value)) = term.split_once("!=") {
        return label(key) != Some(value.trim());
    }
    if let Some((key, value)) = term.split_once("==").or_else(|| term.split_once('=')) {
        return label(key) == Some(value.trim());
    }
    match term.strip_prefix('!') {
        Some(key) => label(key).is_none(),
        None => label(term).is_some(),
    }
}

/// Split a selector on the commas between terms, not those inside `( )`
fn label_terms(selector: &str) -> Vec<&str> {
    let mut terms = Vec::new();
    let (mut depth, mut start) = (0, 0);
    for (i, c) in selector.char_indices() {
        match c {
            '(' => depth += 1,
            ')' => depth -= 1,
            ',' if depth == 0 => {
                terms.push(selector[start..i].trim());
                start = i + 1;
            }
            _ => {}
        }
    }
    terms.push(selector[start..].trim());
    terms.into_iter().filter(|t| !t.is_empty()).collect()
}

fn matches_labels(object: &JsonValue, selector: &str) -> bool {
    let labels = &object["metadata"]["labels"];
    label_terms(selector)
        .into_iter()
        .all(|term| label_term_matches(term, labels))
}

impl FakeCluster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(self, kind: &str, namespace: &str, name: &str, extra: JsonValue) -> Self {
        let mut object = json!({
            "apiVersion": "v1",
            "kind": kind,
            "metadata": {
                "name": name,
                "namespace": namespace,
                "creationTimestamp": "2025-01-01T00:00:00Z",
            },
        });
        if let (JsonValue::Object(target), JsonValue::Object(extra)) = (&mut object, extra) {
            for (k, v) in extra {
                if k == "metadata" {
                    if let (Some(JsonValue::Object(m)), JsonValue::Object(v)) =
                        (target.get_mut("metadata"), v)
                    {
                        m.extend(v);
                    }
                } else {
                    target.insert(k, v);
                }
            }
        }
        self.objects.borrow_mut().push(object);
        self
    }

    pub fn with_logs(self, namespace: &str, pod: &str, text: &str) -> Self {
        self.logs
            .borrow_mut()
            .insert((namespace.to_string(), pod.to_string()), text.to_string());
        self
    }

    pub fn count(&self, kind: &str) -> usize {
        self.objects
            .borrow()
            .iter()
            .filter(|o| o["kind"] == kind)
            .count()
    }

    fn not_found(resource: &ApiResource, name: &str) -> BridgeError {
        BridgeError::Upstream(format!("{} \"{}\" not found", resource.plural, name))
    }
}

impl Cluster for FakeCluster {
    fn get(&self, resource: &ApiResource, namespace: &str, name: &str) -> Result<JsonValue> {
        self.objects
            .borrow()
            .iter()
            .find(|o| {
                o["kind"] == resource.kind.as_str()
                    && meta(o, "namespace") == namespace
                    && meta(o, "name") == name
            })
            .cloned()
            .ok_or_else(|| Self::not_found(resource, name))
    }

    fn list(
        &self,
        resource: &ApiResource,
        namespace: Option<&str>,
        options: &ListOptions,
    ) -> Result<Vec<JsonValue>> {
        *self.last_list.borrow_mut() = Some((namespace.map(String::from), options.clone()));
        Ok(self
            .objects
            .borrow()
            .iter()
            .filter(|o| o["kind"] == resource.kind.as_str())
            .filter(|o| namespace.is_none_or(|ns| meta(o, "namespace") == ns))
            .filter(|o| matches_labels(o, &options.label_selector))
            .cloned()
            .collect())
    }

    fn create(
        &self,
        resource: &ApiResource,
        namespace: &str,
        object: &JsonValue,
    ) -> Result<JsonValue> {
        let name = meta(object, "name").to_string();
        if self.get(resource, namespace, &name).is_ok() {
            return Err(BridgeError::Upstream(format!(
                "{} \"{}\" already exists",
                resource.plural, name
            )));
        }
        let mut created = object.clone();
        created["kind"] = json!(resource.kind);
        created["metadata"]["namespace"] = json!(namespace);
        created["metadata"]["creationTimestamp"] = json!("2025-01-01T00:00:00Z");
        self.objects.borrow_mut().push(created.clone());
        Ok(created)
    }

    fn delete(&self, resource: &ApiResource, namespace: &str, name: &str) -> Result<()> {
        let mut objects = self.objects.borrow_mut();
        let before = objects.len();
        objects.retain(|o| {
            !(o["kind"] == resource.kind.as_str()
                && meta(o, "namespace") == namespace
                && meta(o, "name") == name)
        });
        if objects.len() == before {
            return Err(Self::not_found(resource, name));
        }
        self.deleted.borrow_mut().push((
            resource.kind.clone(),
            namespace.to_string(),
            name.to_string(),
        ));
        Ok(())
    }

    fn logs(&self, namespace: &str, pod: &str) -> Result<String> {
        self.logs
            .borrow()
            .get(&(namespace.to_string(), pod.to_string()))
            .cloned()
            .ok_or_else(|| BridgeError::Upstream(format!("pods \"{}\" not found", pod)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_label_terms_split_outside_parens() {
        assert_eq!(
            label_terms("app in (web, api),tier=data,!legacy"),
            ["app in (web, api)", "tier=data", "!legacy"]
        );
        assert!(label_terms("").is_empty());
    }

    #[test]
    fn test_label_term_matches() {
        let labels = json!({ "app": "web", "tier": "front" });
        assert!(label_term_matches("app in (web, api)", &labels));
        assert!(!label_term_matches("app notin (web)", &labels));
        assert!(label_term_matches("tier=front", &labels));
        assert!(label_term_matches("tier!=data", &labels));
        assert!(label_term_matches("app", &labels));
        assert!(label_term_matches("!owner", &labels));
        assert!(!label_term_matches("owner in (ops)", &labels));
    }
}
