mod client;
#[cfg(test)]
pub mod fake;
pub mod field_selectors;

use kube::api::{ApiResource, ListParams};
use serde_json::Value as JsonValue;
use tracing::trace;

use crate::bridge::Result;

pub use client::KubeCluster;

/// Selectors pushed down to the Kubernetes API on List
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListOptions {
    /// Label selector string (e.g., "app in (web),tier")
    pub label_selector: String,
    /// Field selector string (e.g., "status.phase==Running")
    pub field_selector: String,
}

impl ListOptions {
    pub fn is_empty(&self) -> bool {
        self.label_selector.is_empty() && self.field_selector.is_empty()
    }

    /// Selectors are only set when non-empty
    pub fn to_list_params(&self) -> ListParams {
        let mut params = ListParams::default();

        if !self.label_selector.is_empty() {
            params = params.labels(&self.label_selector);
        }

        if !self.field_selector.is_empty() {
            params = params.fields(&self.field_selector);
        }

        trace!(
            label_selector = %self.label_selector,
            field_selector = %self.field_selector,
            "Built ListParams"
        );

        params
    }
}

/// Blocking access to a cluster, exchanging objects as JSON
///
/// `namespace: None` on `list` means all namespaces. Failures from the API
/// surface as [`crate::bridge::BridgeError::Upstream`] with the server's message.
pub trait Cluster {
    fn get(&self, resource: &ApiResource, namespace: &str, name: &str) -> Result<JsonValue>;

    fn list(
        &self,
        resource: &ApiResource,
        namespace: Option<&str>,
        options: &ListOptions,
    ) -> Result<Vec<JsonValue>>;

    fn create(&self, resource: &ApiResource, namespace: &str, object: &JsonValue)
    -> Result<JsonValue>;

    fn delete(&self, resource: &ApiResource, namespace: &str, name: &str) -> Result<()>;

    /// Whole log of the pod's (single) container
    fn logs(&self, namespace: &str, pod: &str) -> Result<String>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_list_params_from_options() {
        let params = ListOptions::default().to_list_params();
        assert!(params.label_selector.is_none());
        assert!(params.field_selector.is_none());

        let options = ListOptions {
            label_selector: "app in (web)".into(),
            field_selector: "status.phase==Running".into(),
        };
        let params = options.to_list_params();
        assert_eq!(params.label_selector.as_deref(), Some("app in (web)"));
        assert_eq!(params.field_selector.as_deref(), Some("status.phase==Running"));
        assert!(!options.is_empty());
    }
}
