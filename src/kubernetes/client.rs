use std::future::Future;
use std::time::{Duration, Instant};

use anyhow::{Context, anyhow};
use k8s_openapi::api::core::v1::Pod;
use kube::api::{
    ApiResource, DeleteParams, DynamicObject, ListParams, LogParams, ObjectList, PostParams,
};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Api, Client, Config};
use serde_json::Value as JsonValue;
use tokio::runtime::Runtime;
use tracing::{debug, info, warn};

use super::field_selectors::FIELD_SELECTOR_REGISTRY;
use super::{Cluster, ListOptions};
use crate::bridge::{BridgeError, Result};

/// Timeout for connecting to K8s API
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Timeout for reading K8s API responses
const READ_TIMEOUT: Duration = Duration::from_secs(30);

/// Maximum attempts for transient failures
const MAX_RETRIES: u32 = 3;

/// Base delay for exponential backoff (doubles each retry)
const RETRY_BASE_DELAY: Duration = Duration::from_millis(100);

/// Page size for paginated list requests
const PAGE_SIZE: u32 = 500;

/// Client bound to one kubeconfig context
///
/// Calls block the evaluation thread on an owned current-thread runtime.
pub struct KubeCluster {
    runtime: Runtime,
    client: Client,
    context: String,
    default_namespace: String,
}

impl KubeCluster {
    pub fn connect(context: Option<&str>) -> anyhow::Result<Self> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .context("Failed to start the async runtime")?;

        let kubeconfig = Kubeconfig::read().context("Failed to read kubeconfig")?;

        let context_name = context
            .map(String::from)
            .or_else(|| kubeconfig.current_context.clone())
            .ok_or_else(|| anyhow!("No context specified and no current context in kubeconfig"))?;

        if !kubeconfig.contexts.iter().any(|c| c.name == context_name) {
            return Err(anyhow!(
                "Context '{}' not found in kubeconfig",
                context_name
            ));
        }

        let start = Instant::now();
        let config = runtime
            .block_on(Config::from_custom_kubeconfig(
                kubeconfig,
                &KubeConfigOptions {
                    context: Some(context_name.clone()),
                    ..Default::default()
                },
            ))
            .with_context(|| format!("Failed to load kubeconfig for context '{}'", context_name))?;

        let default_namespace = config.default_namespace.clone();
        let mut config = config;
        config.connect_timeout = Some(CONNECT_TIMEOUT);
        config.read_timeout = Some(READ_TIMEOUT);

        // The client spawns its connection tasks on the current runtime
        let client = {
            let _guard = runtime.enter();
            Client::try_from(config).with_context(|| {
                format!("Failed to create client for context '{}'", context_name)
            })?
        };

        info!(
            context = %context_name,
            namespace = %default_namespace,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Connected to cluster"
        );

        Ok(Self {
            runtime,
            client,
            context: context_name,
            default_namespace,
        })
    }

    pub fn context(&self) -> &str {
        &self.context
    }

    /// Namespace configured for the context in kubeconfig
    pub fn default_namespace(&self) -> &str {
        &self.default_namespace
    }

    fn api(&self, resource: &ApiResource, namespace: Option<&str>) -> Api<DynamicObject> {
        match namespace {
            Some(ns) => Api::namespaced_with(self.client.clone(), ns, resource),
            None => Api::all_with(self.client.clone(), resource),
        }
    }

    /// List all pages using continue tokens
    async fn list_all(
        api: &Api<DynamicObject>,
        base_params: &ListParams,
        kind: &str,
    ) -> std::result::Result<Vec<DynamicObject>, kube::Error> {
        let mut all_items: Vec<DynamicObject> = Vec::new();
        let mut continue_token: Option<String> = None;
        let mut page_count = 0u32;

        loop {
            let mut params = base_params.clone().limit(PAGE_SIZE);
            if let Some(ref token) = continue_token {
                params = params.continue_token(token);
            }

            let list: ObjectList<DynamicObject> = with_retry(kind, || api.list(&params)).await?;

            let items_count = list.items.len();
            all_items.extend(list.items);
            page_count += 1;

            match list.metadata.continue_ {
                Some(token) if !token.is_empty() => {
                    debug!(
                        kind = %kind,
                        page = page_count,
                        items_this_page = items_count,
                        total_so_far = all_items.len(),
                        "Fetched page, continuing"
                    );
                    continue_token = Some(token);
                }
                _ => break,
            }
        }

        if page_count > 1 {
            debug!(
                kind = %kind,
                pages = page_count,
                total_items = all_items.len(),
                "Pagination complete"
            );
        }
        Ok(all_items)
    }
}

/// Run `op` again on transient failures, with exponential backoff
async fn with_retry<T, F, Fut>(what: &str, mut op: F) -> std::result::Result<T, kube::Error>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::result::Result<T, kube::Error>>,
{
    let mut attempt = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if is_retryable_error(&e) && attempt + 1 < MAX_RETRIES => {
                let delay = RETRY_BASE_DELAY * 2u32.pow(attempt);
                warn!(
                    what = %what,
                    attempt = attempt + 1,
                    max_attempts = MAX_RETRIES,
                    delay_ms = delay.as_millis(),
                    error = %e,
                    "Retryable error, backing off"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => {
                debug!(what = %what, error = %e, "Giving up on request");
                return Err(e);
            }
        }
    }
}

/// Connection errors and HTTP 429/503/504 are transient
fn is_retryable_error(err: &kube::Error) -> bool {
    match err {
        kube::Error::HyperError(_) => true,
        kube::Error::Api(api_err) => matches!(api_err.code, 429 | 503 | 504),
        _ => false,
    }
}

/// apiVersion string (e.g., "v1", "apps/v1")
fn api_version(resource: &ApiResource) -> String {
    if resource.group.is_empty() {
        resource.version.clone()
    } else {
        format!("{}/{}", resource.group, resource.version)
    }
}

/// The list API leaves apiVersion and kind off the items
fn to_json(resource: &ApiResource, object: DynamicObject) -> Result<JsonValue> {
    let mut value = serde_json::to_value(object)?;
    if let JsonValue::Object(ref mut map) = value {
        map.insert(
            "apiVersion".to_string(),
            JsonValue::String(api_version(resource)),
        );
        map.insert(
            "kind".to_string(),
            JsonValue::String(resource.kind.clone()),
        );
    }
    Ok(value)
}

impl Cluster for KubeCluster {
    fn get(&self, resource: &ApiResource, namespace: &str, name: &str) -> Result<JsonValue> {
        debug!(kind = %resource.kind, namespace = %namespace, name = %name, "Get");
        let api = self.api(resource, Some(namespace));
        let object = self
            .runtime
            .block_on(with_retry(&resource.kind, || api.get(name)))?;
        to_json(resource, object)
    }

    fn list(
        &self,
        resource: &ApiResource,
        namespace: Option<&str>,
        options: &ListOptions,
    ) -> Result<Vec<JsonValue>> {
        debug!(
            kind = %resource.kind,
            context = %self.context,
            namespace = ?namespace,
            label_selector = %options.label_selector,
            field_selector = %options.field_selector,
            "List"
        );
        FIELD_SELECTOR_REGISTRY.warn_unsupported(&resource.plural, &options.field_selector);

        let api = self.api(resource, namespace);
        let params = options.to_list_params();
        let items = self
            .runtime
            .block_on(Self::list_all(&api, &params, &resource.kind))?;
        items.into_iter().map(|o| to_json(resource, o)).collect()
    }

    fn create(
        &self,
        resource: &ApiResource,
        namespace: &str,
        object: &JsonValue,
    ) -> Result<JsonValue> {
        debug!(kind = %resource.kind, namespace = %namespace, "Create");
        let object: DynamicObject = serde_json::from_value(object.clone())?;
        let api = self.api(resource, Some(namespace));
        let created = self
            .runtime
            .block_on(api.create(&PostParams::default(), &object))?;
        to_json(resource, created)
    }

    fn delete(&self, resource: &ApiResource, namespace: &str, name: &str) -> Result<()> {
        debug!(kind = %resource.kind, namespace = %namespace, name = %name, "Delete");
        let api = self.api(resource, Some(namespace));
        self.runtime
            .block_on(api.delete(name, &DeleteParams::default()))?;
        Ok(())
    }

    fn logs(&self, namespace: &str, pod: &str) -> Result<String> {
        debug!(namespace = %namespace, pod = %pod, "Logs");
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let params = LogParams::default();
        self.runtime
            .block_on(with_retry("logs", || api.logs(pod, &params)))
            .map_err(BridgeError::from)
    }
}
