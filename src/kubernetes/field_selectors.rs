// Copyright (c) 2025 Nikolay Denev <ndenev@gmail.com>
// SPDX-License-Identifier: BSD-3-Clause

//! Kubernetes field selector terms and the registry of supported fields
//!
//! Field selectors allow filtering resources by specific field values when
//! listing. Only `==` and `!=` are supported by the API server, and the set
//! of selectable fields is fixed per resource type and not discoverable, so
//! it is hardcoded here from the Kubernetes documentation:
//! https://kubernetes.io/docs/concepts/overview/working-with-objects/field-selectors/#supported-fields
//!
//! The registry is advisory: an unsupported path is logged, and the request
//! still goes out so the server's own error reaches the user verbatim.

use std::collections::HashMap;
use std::sync::LazyLock;

use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldSelectorOperator {
    /// `==`
    Equals,
    /// `!=`
    NotEquals,
}

/// A single `path==value` / `path!=value` term
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldSelector {
    /// Dotted field path (e.g. "status.phase")
    pub path: String,
    pub operator: FieldSelectorOperator,
    pub value: String,
}

impl FieldSelector {
    /// Wire format used in `ListParams::fields`
    ///
    /// - `status.phase` Equals `Running` → `"status.phase==Running"`
    /// - `spec.nodeName` NotEquals `n1` → `"spec.nodeName!=n1"`
    pub fn to_k8s_string(&self) -> String {
        match self.operator {
            FieldSelectorOperator::Equals => format!("{}=={}", self.path, self.value),
            FieldSelectorOperator::NotEquals => format!("{}!={}", self.path, self.value),
        }
    }

    /// Parse one term in any of the accepted spellings (`=`, `==`, `!=`)
    pub fn parse(term: &str) -> Option<FieldSelector> {
        let term = term.trim();
        let (path, operator, value) = if let Some((p, v)) = term.split_once("!=") {
            (p, FieldSelectorOperator::NotEquals, v)
        } else if let Some((p, v)) = term.split_once("==") {
            (p, FieldSelectorOperator::Equals, v)
        } else {
            let (p, v) = term.split_once('=')?;
            (p, FieldSelectorOperator::Equals, v)
        };
        if path.trim().is_empty() {
            return None;
        }
        Some(FieldSelector {
            path: path.trim().to_string(),
            operator,
            value: value.trim().to_string(),
        })
    }
}

/// Initialized once on first access
pub static FIELD_SELECTOR_REGISTRY: LazyLock<FieldSelectorRegistry> =
    LazyLock::new(FieldSelectorRegistry::new);

/// Supported field selector paths per resource verb (`pods`, `services`, ...)
pub struct FieldSelectorRegistry {
    registry: HashMap<&'static str, Vec<&'static str>>,
}

impl FieldSelectorRegistry {
    /// Empty for resources the registry does not know
    pub fn get_supported_fields(&self, resource: &str) -> &[&'static str] {
        self.registry
            .get(resource)
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    pub fn is_supported(&self, resource: &str, field_path: &str) -> bool {
        self.get_supported_fields(resource).contains(&field_path)
    }

    /// Paths in `selector` that `resource` does not support
    ///
    /// Unknown resources report nothing, since nothing is known about them.
    pub fn unsupported_paths(&self, resource: &str, selector: &str) -> Vec<String> {
        if !self.registry.contains_key(resource) {
            return Vec::new();
        }
        selector
            .split(',')
            .filter(|t| !t.trim().is_empty())
            .filter_map(|t| match FieldSelector::parse(t) {
                Some(term) if self.is_supported(resource, &term.path) => None,
                Some(term) => Some(term.path),
                None => Some(t.trim().to_string()),
            })
            .collect()
    }

    /// Log a warning for every unsupported path in `selector`
    pub fn warn_unsupported(&self, resource: &str, selector: &str) {
        for path in self.unsupported_paths(resource, selector) {
            warn!(
                resource = %resource,
                field = %path,
                supported = ?self.get_supported_fields(resource),
                "Field selector path is not supported, the API server will reject it"
            );
        }
    }

    fn new() -> Self {
        let mut registry = HashMap::new();

        // Supported by every resource
        let universal = vec!["metadata.name", "metadata.namespace"];

        // https://kubernetes.io/docs/reference/kubernetes-api/workload-resources/pod-v1/
        registry.insert("pods", {
            let mut fields = universal.clone();
            fields.extend([
                "spec.nodeName",
                "spec.restartPolicy",
                "spec.schedulerName",
                "spec.serviceAccountName",
                "spec.hostNetwork",
                "status.phase",
                "status.podIP",
                "status.podIPs",
                "status.nominatedNodeName",
            ]);
            fields
        });

        // https://kubernetes.io/docs/reference/kubernetes-api/workload-resources/replica-set-v1/
        registry.insert("replicasets", {
            let mut fields = universal.clone();
            fields.push("status.replicas");
            fields
        });

        registry.insert("services", universal.clone());
        registry.insert("deployments", universal.clone());
        registry.insert("daemonsets", universal);

        Self { registry }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_selector_to_k8s_string() {
        let selector = FieldSelector {
            path: "status.phase".to_string(),
            operator: FieldSelectorOperator::Equals,
            value: "Running".to_string(),
        };
        assert_eq!(selector.to_k8s_string(), "status.phase==Running");

        let selector_ne = FieldSelector {
            path: "spec.nodeName".to_string(),
            operator: FieldSelectorOperator::NotEquals,
            value: "n1".to_string(),
        };
        assert_eq!(selector_ne.to_k8s_string(), "spec.nodeName!=n1");
    }

    #[test]
    fn test_parse_spellings() {
        let eq = FieldSelector::parse("status.phase=Running").unwrap();
        assert_eq!(eq.operator, FieldSelectorOperator::Equals);
        assert_eq!(eq.path, "status.phase");

        let eq2 = FieldSelector::parse(" status.phase == Running ").unwrap();
        assert_eq!(eq2, eq);

        let ne = FieldSelector::parse("spec.nodeName!=n1").unwrap();
        assert_eq!(ne.operator, FieldSelectorOperator::NotEquals);
        assert_eq!(ne.value, "n1");

        assert!(FieldSelector::parse("status.phase").is_none());
        assert!(FieldSelector::parse("=x").is_none());
    }

    #[test]
    fn test_registry_pod_fields() {
        let registry = &*FIELD_SELECTOR_REGISTRY;
        assert!(registry.is_supported("pods", "metadata.name"));
        assert!(registry.is_supported("pods", "status.phase"));
        assert!(registry.is_supported("pods", "spec.nodeName"));
        assert!(!registry.is_supported("pods", "status.unsupportedField"));
        assert!(registry.is_supported("replicasets", "status.replicas"));
        assert!(!registry.is_supported("deployments", "status.replicas"));
    }

    #[test]
    fn test_unsupported_paths() {
        let registry = &*FIELD_SELECTOR_REGISTRY;
        assert_eq!(
            registry.unsupported_paths("pods", "status.phase==Running,spec.foo==bar"),
            vec!["spec.foo".to_string()]
        );
        assert!(registry.unsupported_paths("pods", "").is_empty());
        assert!(registry.unsupported_paths("widgets", "x==y").is_empty());
    }
}
